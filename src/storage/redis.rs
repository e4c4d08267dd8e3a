use crate::action::ActionType;
use crate::config::ActionLimit;
use crate::errors::RateLimitError;
use crate::record::{Attempt, RateLimitRecord};
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use tracing::debug;

// KEYS[1] record hash
// ARGV now_ms, window_ms, max_attempts, block_ms, increment (1|0)
// Returns {attempts, window_start, last_attempt, blocked_until, counted} or nil
// when the record does not exist and nothing was counted. blocked_until = 0
// means unblocked.
const RECORD_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max_attempts = tonumber(ARGV[3])
local block = tonumber(ARGV[4])
local increment = ARGV[5] == '1'

local fields = redis.call('HMGET', key, 'attempts', 'window_start', 'last_attempt', 'blocked_until')
if not fields[1] then
  if not increment then
    return false
  end
  fields = {0, now, now, 0}
end

local attempts = tonumber(fields[1])
local window_start = tonumber(fields[2])
local last_attempt = tonumber(fields[3])
local blocked_until = tonumber(fields[4])

if blocked_until > 0 then
  if now >= blocked_until then
    attempts = 0
    window_start = now
    blocked_until = 0
  end
elseif now > window_start + window then
  attempts = 0
  window_start = now
end

local counted = 0
if increment then
  last_attempt = now
  if blocked_until == 0 then
    if attempts < max_attempts then
      attempts = attempts + 1
      counted = 1
    end
    if attempts >= max_attempts then
      blocked_until = now + block
    end
  end
end

redis.call('HSET', key,
  'attempts', attempts,
  'window_start', window_start,
  'last_attempt', last_attempt,
  'blocked_until', blocked_until)

local expires = window_start + window
if blocked_until > 0 then
  expires = blocked_until
end
redis.call('PEXPIREAT', key, expires)

return {attempts, window_start, last_attempt, blocked_until, counted}
"#;

/// Records live in one hash per (identifier, action) at
/// `rate_limit:<action>:<identifier>` and expire on their own once neither the
/// window nor the block is active.
pub struct RedisStorage {
    client: redis::Client,
    script: Script,
}

impl RedisStorage {
    pub fn new(redis_url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            script: Script::new(RECORD_SCRIPT),
        })
    }

    fn record_key(identifier: &str, action: ActionType) -> String {
        format!("rate_limit:{}:{}", action, identifier)
    }

    fn identifier_keys(identifier: &str) -> Vec<String> {
        ActionType::ALL
            .into_iter()
            .map(|action| Self::record_key(identifier, action))
            .collect()
    }

    async fn run_script(
        &self,
        identifier: &str,
        action: ActionType,
        limit: &ActionLimit,
        now: DateTime<Utc>,
        increment: bool,
    ) -> Result<Option<Attempt>, RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Option<Vec<i64>> = self
            .script
            .key(Self::record_key(identifier, action))
            .arg(now.timestamp_millis())
            .arg(limit.window.as_millis() as u64)
            .arg(limit.max_attempts)
            .arg(limit.block_duration.as_millis() as u64)
            .arg(if increment { 1 } else { 0 })
            .invoke_async(&mut conn)
            .await?;

        match reply {
            Some(fields) => match fields.as_slice() {
                [attempts, window_start, last_attempt, blocked_until, counted] => {
                    Ok(Some(Attempt {
                        record: to_record(
                            identifier,
                            action,
                            *attempts,
                            *window_start,
                            *last_attempt,
                            *blocked_until,
                        )?,
                        counted: *counted == 1,
                    }))
                }
                _ => Err(RateLimitError::StorageUnavailable(
                    "Unexpected rate limit script reply".into(),
                )),
            },
            None => Ok(None),
        }
    }
}

fn to_time(ms: i64) -> Result<DateTime<Utc>, RateLimitError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| RateLimitError::StorageUnavailable(format!("Invalid timestamp {}", ms)))
}

fn to_record(
    identifier: &str,
    action: ActionType,
    attempts: i64,
    window_start: i64,
    last_attempt: i64,
    blocked_until: i64,
) -> Result<RateLimitRecord, RateLimitError> {
    let blocked = blocked_until > 0;
    Ok(RateLimitRecord {
        identifier: identifier.to_string(),
        action_type: action,
        attempts: attempts.max(0) as u32,
        window_start: to_time(window_start)?,
        last_attempt: to_time(last_attempt)?,
        blocked,
        blocked_until: if blocked {
            Some(to_time(blocked_until)?)
        } else {
            None
        },
    })
}

#[async_trait]
impl Storage for RedisStorage {
    async fn record_attempt(
        &self,
        identifier: &str,
        action: ActionType,
        limit: &ActionLimit,
        now: DateTime<Utc>,
    ) -> Result<Attempt, RateLimitError> {
        self.run_script(identifier, action, limit, now, true)
            .await?
            .ok_or_else(|| RateLimitError::StorageUnavailable("Attempt was not recorded".into()))
    }

    async fn refresh(
        &self,
        identifier: &str,
        action: ActionType,
        limit: &ActionLimit,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitRecord>, RateLimitError> {
        Ok(self
            .run_script(identifier, action, limit, now, false)
            .await?
            .map(|attempt| attempt.record))
    }

    async fn get_record(
        &self,
        identifier: &str,
        action: ActionType,
    ) -> Result<Option<RateLimitRecord>, RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let fields: HashMap<String, i64> = conn.hgetall(Self::record_key(identifier, action)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| fields.get(name).copied().unwrap_or(0);
        Ok(Some(to_record(
            identifier,
            action,
            field("attempts"),
            field("window_start"),
            field("last_attempt"),
            field("blocked_until"),
        )?))
    }

    async fn delete_identifier(&self, identifier: &str) -> Result<u64, RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let deleted: u64 = conn.del(Self::identifier_keys(identifier)).await?;
        Ok(deleted)
    }

    async fn count_identifier(&self, identifier: &str) -> Result<u64, RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: u64 = conn.exists(Self::identifier_keys(identifier)).await?;
        Ok(count)
    }

    async fn purge_expired(
        &self,
        _limits: &HashMap<ActionType, ActionLimit>,
        _now: DateTime<Utc>,
    ) -> Result<u64, RateLimitError> {
        // Keys carry PEXPIREAT, Redis evicts them itself.
        debug!("Redis storage relies on key expiry, nothing to purge");
        Ok(0)
    }
}
