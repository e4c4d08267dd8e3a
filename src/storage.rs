use crate::action::ActionType;
use crate::config::{ActionLimit, RateLimitConfig, StorageType};
use crate::errors::RateLimitError;
use crate::record::{Attempt, RateLimitRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryStorage;
pub use self::redis::RedisStorage;

/// Durable home of rate limit records.
///
/// Mutating methods must be atomic per record: two concurrent
/// `record_attempt` calls for the same pair may not both observe the same
/// counter value.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load or create the record, apply the lazy reset, count one attempt
    /// (capped at the limit) and persist the result.
    async fn record_attempt(
        &self,
        identifier: &str,
        action: ActionType,
        limit: &ActionLimit,
        now: DateTime<Utc>,
    ) -> Result<Attempt, RateLimitError>;

    /// Apply the lazy reset to an existing record and return it.
    async fn refresh(
        &self,
        identifier: &str,
        action: ActionType,
        limit: &ActionLimit,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitRecord>, RateLimitError>;

    async fn get_record(
        &self,
        identifier: &str,
        action: ActionType,
    ) -> Result<Option<RateLimitRecord>, RateLimitError>;

    /// Remove every record for `identifier`, across all action types.
    async fn delete_identifier(&self, identifier: &str) -> Result<u64, RateLimitError>;

    async fn count_identifier(&self, identifier: &str) -> Result<u64, RateLimitError>;

    /// Remove records whose window and block have both run out.
    async fn purge_expired(
        &self,
        limits: &HashMap<ActionType, ActionLimit>,
        now: DateTime<Utc>,
    ) -> Result<u64, RateLimitError>;
}

/// Build the backend selected by `config.storage_type`.
pub fn connect(config: &RateLimitConfig) -> Result<Arc<dyn Storage>, RateLimitError> {
    let storage: Arc<dyn Storage> = match config.storage_type {
        StorageType::Memory => Arc::new(InMemoryStorage::new()),
        StorageType::Redis => Arc::new(RedisStorage::new(&config.redis_url)?),
    };
    Ok(storage)
}
