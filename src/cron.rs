use crate::config::RateLimitConfig;
use crate::errors::RateLimitError;
use crate::identifier::derived_identifiers;
use crate::storage::Storage;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{error, info, instrument};

pub struct CleanupService {
    storage: Arc<dyn Storage>,
    config: RateLimitConfig,
}

impl CleanupService {
    pub fn new(storage: Arc<dyn Storage>, config: RateLimitConfig) -> Self {
        Self { storage, config }
    }

    /// Delete records whose window and block have both run out.
    #[instrument(skip(self))]
    pub async fn run_cleanup(&self) -> Result<u64, RateLimitError> {
        info!("Starting rate limit cleanup job...");
        let purged = self
            .storage
            .purge_expired(&self.config.limits, Utc::now())
            .await?;
        info!(purged, "Rate limit cleanup job completed.");
        Ok(purged)
    }

    /// Delete every record derived from an account email. Call on soft and
    /// hard deletion of the account.
    #[instrument(skip(self))]
    pub async fn remove_user_records(&self, email: &str) -> Result<u64, RateLimitError> {
        let mut removed = 0;
        for identifier in derived_identifiers(email) {
            removed += self.storage.delete_identifier(&identifier).await?;
        }
        info!(removed, "Removed rate limit records for deleted user");
        Ok(removed)
    }

    /// Runs `run_cleanup` every `interval` until the task is dropped.
    pub async fn start_scheduler(self: Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            error!("Cleanup interval must be non-zero, scheduler not started");
            return;
        }
        let mut timer = time::interval(interval);

        info!("Cleanup scheduler started with interval: {:?}", interval);

        loop {
            timer.tick().await;

            // a slow sweep must not delay the next tick
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.run_cleanup().await {
                    error!("Cleanup job failed: {:?}", e);
                }
            });
        }
    }

    /// Start the scheduler on its own task using `config.cleanup_interval`.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.cleanup_interval;
        tokio::spawn(self.start_scheduler(interval))
    }
}
