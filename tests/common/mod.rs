use auth_rate_limit::{
    ActionLimit, ActionType, InMemoryStorage, RateLimitConfig, RateLimiter, RedisStorage,
    Storage, StorageType,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    /// Needs `REDIS_URL`; tests using it are `#[ignore]`d and run with `--ignored`.
    Redis,
}

#[allow(dead_code)]
pub fn config_with(action: ActionType, max_attempts: u32, window: Duration, block: Duration) -> RateLimitConfig {
    let mut config = RateLimitConfig::default()
        .with_limit(action, ActionLimit::new(window, max_attempts, block));
    config.storage_type = StorageType::Memory;
    config
}

#[allow(dead_code)]
pub fn storage_for(backend: Backend) -> Arc<dyn Storage> {
    match backend {
        Backend::Memory => Arc::new(InMemoryStorage::new()),
        Backend::Redis => {
            let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for Redis tests");
            Arc::new(RedisStorage::new(&url).unwrap())
        }
    }
}

#[allow(dead_code)]
pub fn limiter_for(backend: Backend, config: RateLimitConfig) -> (Arc<RateLimiter>, Arc<dyn Storage>) {
    let storage = storage_for(backend);
    let limiter = Arc::new(RateLimiter::new(storage.clone(), config));
    (limiter, storage)
}

#[allow(dead_code)]
pub fn memory_limiter(config: RateLimitConfig) -> (Arc<RateLimiter>, Arc<dyn Storage>) {
    limiter_for(Backend::Memory, config)
}

#[allow(dead_code)]
pub fn unique_email() -> String {
    format!("listener_{}@test.com", Uuid::new_v4())
}
