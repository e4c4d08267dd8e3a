use crate::cron::CleanupService;
use crate::errors::RateLimitError;
use crate::identifier::normalize_email;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Lookup of registered accounts, used when a check must only pass for
/// existing users.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// True if an account with this email exists and is not soft-deleted.
    async fn is_active_user(&self, email: &str) -> Result<bool, RateLimitError>;
}

#[derive(Debug, Clone)]
pub struct UserAccount {
    pub email: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Accounts kept in memory. With a cleanup service attached, soft and hard
/// deletes also remove every rate limit record derived from the account email.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    accounts: RwLock<HashMap<String, UserAccount>>,
    cleanup: Option<Arc<CleanupService>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cleanup(mut self, cleanup: Arc<CleanupService>) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    pub fn insert(&self, email: &str) -> Result<(), RateLimitError> {
        let email = normalize_email(email);
        let mut map = self.accounts.write()?;
        map.insert(
            email.clone(),
            UserAccount {
                email,
                deleted_at: None,
            },
        );
        Ok(())
    }

    /// Mark the account deleted. Returns false if there was no such account.
    pub async fn soft_delete(&self, email: &str) -> Result<bool, RateLimitError> {
        let email = normalize_email(email);
        let found = {
            let mut map = self.accounts.write()?;
            match map.get_mut(&email) {
                Some(account) => {
                    account.deleted_at = Some(Utc::now());
                    true
                }
                None => false,
            }
        };

        if found {
            self.purge_records(&email).await?;
        }
        Ok(found)
    }

    pub async fn hard_delete(&self, email: &str) -> Result<bool, RateLimitError> {
        let email = normalize_email(email);
        let found = self.accounts.write()?.remove(&email).is_some();

        if found {
            self.purge_records(&email).await?;
        }
        Ok(found)
    }

    async fn purge_records(&self, email: &str) -> Result<(), RateLimitError> {
        if let Some(cleanup) = &self.cleanup {
            let removed = cleanup.remove_user_records(email).await?;
            info!(removed, "Rate limit records purged with account");
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn is_active_user(&self, email: &str) -> Result<bool, RateLimitError> {
        let map = self.accounts.read()?;
        Ok(map
            .get(&normalize_email(email))
            .is_some_and(|account| account.deleted_at.is_none()))
    }
}
