use crate::action::ActionType;
use crate::config::ActionLimit;
use crate::errors::RateLimitError;
use crate::record::{Attempt, RateLimitRecord};
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type RecordKey = (String, ActionType);

/// Process-local storage. Every mutation runs under one write lock, which is
/// what makes `record_attempt` atomic.
pub struct InMemoryStorage {
    records: Arc<RwLock<HashMap<RecordKey, RateLimitRecord>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn key(identifier: &str, action: ActionType) -> RecordKey {
        (identifier.to_string(), action)
    }

    /// Store a record as-is. Intended for seeding state.
    pub fn insert(&self, record: RateLimitRecord) -> Result<(), RateLimitError> {
        let mut map = self.records.write()?;
        map.insert(Self::key(&record.identifier, record.action_type), record);
        Ok(())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn record_attempt(
        &self,
        identifier: &str,
        action: ActionType,
        limit: &ActionLimit,
        now: DateTime<Utc>,
    ) -> Result<Attempt, RateLimitError> {
        let mut map = self.records.write()?;

        let entry = map
            .entry(Self::key(identifier, action))
            .or_insert_with(|| RateLimitRecord::new(identifier, action, now));
        let counted = entry.register_attempt(limit, now);

        Ok(Attempt {
            record: entry.clone(),
            counted,
        })
    }

    async fn refresh(
        &self,
        identifier: &str,
        action: ActionType,
        limit: &ActionLimit,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitRecord>, RateLimitError> {
        let mut map = self.records.write()?;

        Ok(map.get_mut(&Self::key(identifier, action)).map(|entry| {
            entry.reset_if_expired(limit, now);
            entry.clone()
        }))
    }

    async fn get_record(
        &self,
        identifier: &str,
        action: ActionType,
    ) -> Result<Option<RateLimitRecord>, RateLimitError> {
        let map = self.records.read()?;
        Ok(map.get(&Self::key(identifier, action)).cloned())
    }

    async fn delete_identifier(&self, identifier: &str) -> Result<u64, RateLimitError> {
        let mut map = self.records.write()?;
        let before = map.len();
        map.retain(|(id, _), _| id != identifier);
        Ok((before - map.len()) as u64)
    }

    async fn count_identifier(&self, identifier: &str) -> Result<u64, RateLimitError> {
        let map = self.records.read()?;
        Ok(map.keys().filter(|(id, _)| id == identifier).count() as u64)
    }

    async fn purge_expired(
        &self,
        limits: &HashMap<ActionType, ActionLimit>,
        now: DateTime<Utc>,
    ) -> Result<u64, RateLimitError> {
        let mut map = self.records.write()?;
        let before = map.len();
        // records for actions without a configured limit are left alone
        map.retain(|(_, action), record| match limits.get(action) {
            Some(limit) => !record.is_expired(limit, now),
            None => true,
        });
        Ok((before - map.len()) as u64)
    }
}
