use crate::action::ActionType;
use crate::errors::RateLimitError;
use std::collections::HashMap;
use std::time::Duration;

/// Limits applied to one action type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionLimit {
    /// Length of the attempt counting window.
    pub window: Duration,
    pub max_attempts: u32,
    /// How long an identifier stays blocked once `max_attempts` is reached.
    pub block_duration: Duration,
}

impl ActionLimit {
    pub fn new(window: Duration, max_attempts: u32, block_duration: Duration) -> Self {
        Self {
            window,
            max_attempts,
            block_duration,
        }
    }

    pub(crate) fn window_delta(&self) -> chrono::Duration {
        to_delta(self.window)
    }

    pub(crate) fn block_delta(&self) -> chrono::Duration {
        to_delta(self.block_duration)
    }
}

/// Longest window or block accepted; keeps timestamp arithmetic in range.
pub const MAX_LIMIT_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

fn to_delta(duration: Duration) -> chrono::Duration {
    let millis = duration.min(MAX_LIMIT_DURATION).as_millis() as i64;
    chrono::Duration::milliseconds(millis)
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub limits: HashMap<ActionType, ActionLimit>,
    pub storage_type: StorageType,
    pub redis_url: String,
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StorageType {
    Memory,
    Redis,
}

const HOUR: Duration = Duration::from_secs(3600);
const QUARTER_HOUR: Duration = Duration::from_secs(900);

impl Default for RateLimitConfig {
    fn default() -> Self {
        let limits = ActionType::ALL
            .into_iter()
            .map(|action| {
                let limit = match action {
                    ActionType::Signup => ActionLimit::new(HOUR, 5, HOUR),
                    ActionType::Signin => ActionLimit::new(QUARTER_HOUR, 5, QUARTER_HOUR),
                    _ => ActionLimit::new(HOUR, 3, HOUR),
                };
                (action, limit)
            })
            .collect();

        Self {
            limits,
            storage_type: StorageType::Redis,
            redis_url: "redis://127.0.0.1/".to_string(),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, action: ActionType) -> Result<ActionLimit, RateLimitError> {
        self.limits
            .get(&action)
            .copied()
            .ok_or_else(|| RateLimitError::InvalidActionType(action.to_string()))
    }

    /// Replace the limit for one action, keeping the rest.
    pub fn with_limit(mut self, action: ActionType, limit: ActionLimit) -> Self {
        self.limits.insert(action, limit);
        self
    }

    pub fn from_env() -> Result<Self, RateLimitError> {
        let mut config = Self::default();

        for action in ActionType::ALL {
            let prefix = action.env_prefix();
            let mut limit = config.limit_for(action)?;

            if let Some(secs) = parse_env::<u64>(&format!("{}_WINDOW_SECONDS", prefix))? {
                limit.window = Duration::from_secs(secs);
            }
            if let Some(max) = parse_env::<u32>(&format!("{}_MAX_ATTEMPTS", prefix))? {
                limit.max_attempts = max;
            }
            if let Some(secs) = parse_env::<u64>(&format!("{}_BLOCK_SECONDS", prefix))? {
                limit.block_duration = Duration::from_secs(secs);
            }

            config.limits.insert(action, limit);
        }

        if let Some(secs) = parse_env::<u64>("RATE_LIMIT_CLEANUP_INTERVAL_SECONDS")? {
            config.cleanup_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("STORAGE_TYPE") {
            config.storage_type = parse_storage_type(&val)?;
        }

        if config.storage_type == StorageType::Redis {
            if let Ok(url) = std::env::var("REDIS_URL") {
                config.redis_url = url;
            } else {
                let redis_host = std::env::var("REDIS_HOST")
                    .map_err(|_| RateLimitError::ConfigError("REDIS_HOST must be set".to_string()))?;
                let redis_port = std::env::var("REDIS_PORT")
                    .map_err(|_| RateLimitError::ConfigError("REDIS_PORT must be set".to_string()))?;
                config.redis_url = format!("redis://{}:{}/", redis_host, redis_port);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject limits and intervals the limiter cannot run with.
    pub fn validate(&self) -> Result<(), RateLimitError> {
        for (action, limit) in &self.limits {
            let prefix = action.env_prefix();
            if limit.max_attempts == 0 {
                return Err(RateLimitError::ConfigError(format!(
                    "{}_MAX_ATTEMPTS must be at least 1",
                    prefix
                )));
            }
            if limit.window > MAX_LIMIT_DURATION {
                return Err(RateLimitError::ConfigError(format!(
                    "{}_WINDOW_SECONDS must not exceed {}",
                    prefix,
                    MAX_LIMIT_DURATION.as_secs()
                )));
            }
            if limit.block_duration > MAX_LIMIT_DURATION {
                return Err(RateLimitError::ConfigError(format!(
                    "{}_BLOCK_SECONDS must not exceed {}",
                    prefix,
                    MAX_LIMIT_DURATION.as_secs()
                )));
            }
        }

        if self.cleanup_interval.is_zero() {
            return Err(RateLimitError::ConfigError(
                "RATE_LIMIT_CLEANUP_INTERVAL_SECONDS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_storage_type(val: &str) -> Result<StorageType, RateLimitError> {
    match val.to_lowercase().as_str() {
        "memory" => Ok(StorageType::Memory),
        "redis" => Ok(StorageType::Redis),
        _ => Err(RateLimitError::ConfigError(
            "Invalid STORAGE_TYPE: must be 'memory' or 'redis'".to_string(),
        )),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, RateLimitError> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RateLimitError::ConfigError(format!("Invalid {}", name))),
        Err(_) => Ok(None),
    }
}
