#![doc = include_str!("../README.md")]

pub mod action;
#[cfg(feature = "axum")]
pub mod axum_api;
pub mod config;
pub mod cron;
pub mod errors;
pub mod identifier;
pub mod rate_limit;
pub mod record;
pub mod storage;
pub mod users;

pub use action::ActionType;
pub use config::{ActionLimit, RateLimitConfig, StorageType};
pub use cron::CleanupService;
pub use errors::RateLimitError;
pub use rate_limit::{format_remaining_time, CheckOptions, RateLimitStatus, RateLimiter};
pub use record::{Attempt, Decision, RateLimitRecord};
pub use storage::{InMemoryStorage, RedisStorage, Storage};
pub use users::{InMemoryUserDirectory, UserDirectory};
