use std::sync::PoisonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid action type: {0}")]
    InvalidActionType(String),

    #[error("No identifier supplied")]
    MissingIdentifier,

    #[error("Rate limit exceeded, retry in {retry_after_ms}ms")]
    RateLimitExceeded { retry_after_ms: u64 },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RateLimitError {
    /// True for failures of the backing store, as opposed to limiter decisions.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            RateLimitError::RedisError(_) | RateLimitError::StorageUnavailable(_)
        )
    }
}

impl<T> From<PoisonError<T>> for RateLimitError {
    fn from(_: PoisonError<T>) -> Self {
        RateLimitError::StorageUnavailable("Lock poisoned".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, RwLock};

    #[test]
    fn test_poisoned_lock_is_storage_failure() {
        let lock = Arc::new(RwLock::new(0u32));
        let writer = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = writer.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        let err: RateLimitError = match lock.read() {
            Ok(_) => panic!("lock should be poisoned"),
            Err(e) => e.into(),
        };
        assert!(err.is_storage_failure());
    }
}
