use crate::action::ActionType;
use crate::config::RateLimitConfig;
use crate::errors::RateLimitError;
use crate::identifier::email_from_identifier;
use crate::record::Decision;
use crate::storage::Storage;
use crate::users::UserDirectory;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    /// Count this check as an attempt.
    pub increment_on_check: bool,
    /// Fail with `UserNotFound` unless an active account matches the identifier.
    pub require_user_exists: bool,
}

impl CheckOptions {
    pub fn advisory() -> Self {
        Self::default()
    }

    pub fn counting() -> Self {
        Self {
            increment_on_check: true,
            ..Self::default()
        }
    }
}

/// Display-ready view of an identifier's limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub has_active_limit: bool,
    pub remaining_time: u64,
    pub formatted_time: String,
    pub message: String,
}

pub struct RateLimiter {
    storage: Arc<dyn Storage>,
    users: Option<Arc<dyn UserDirectory>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(storage: Arc<dyn Storage>, config: RateLimitConfig) -> Self {
        Self {
            storage,
            users: None,
            config,
        }
    }

    pub fn with_user_directory(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether `identifier` may perform `action` now.
    ///
    /// This always may write: an expired window or an ended block is reset in
    /// storage before the decision is made, and with `increment_on_check` the
    /// check itself is counted atomically. The limit is applied before the
    /// account lookup, so a limited identifier is refused whether or not the
    /// account exists.
    #[instrument(skip(self))]
    pub async fn check(
        &self,
        identifier: &str,
        action: ActionType,
        options: CheckOptions,
    ) -> Result<Decision, RateLimitError> {
        let limit = self.config.limit_for(action)?;
        let now = Utc::now();

        let decision = if options.increment_on_check {
            self.storage
                .record_attempt(identifier, action, &limit, now)
                .await?
                .decision(&limit, now)
        } else {
            match self.storage.refresh(identifier, action, &limit, now).await? {
                Some(record) => record.evaluate(&limit, now),
                None => Decision::fresh(&limit),
            }
        };

        if !decision.allowed {
            warn!(reset_time = decision.reset_time, "Rate limit reached");
            return Ok(decision);
        }

        if options.require_user_exists {
            self.ensure_user_exists(identifier).await?;
        }

        Ok(decision)
    }

    /// Count one attempt, blocking the identifier once the limit is reached.
    #[instrument(skip(self))]
    pub async fn increment(
        &self,
        identifier: &str,
        action: ActionType,
    ) -> Result<(), RateLimitError> {
        let limit = self.config.limit_for(action)?;
        let attempt = self
            .storage
            .record_attempt(identifier, action, &limit, Utc::now())
            .await?;

        if attempt.counted && attempt.record.blocked {
            warn!(
                attempts = attempt.record.attempts,
                blocked_until = ?attempt.record.blocked_until,
                "Identifier blocked"
            );
        } else {
            debug!(attempts = attempt.record.attempts, "Attempt recorded");
        }
        Ok(())
    }

    /// Like `check` with `increment_on_check`, but a refusal is an error.
    pub async fn enforce(
        &self,
        identifier: &str,
        action: ActionType,
    ) -> Result<Decision, RateLimitError> {
        let decision = self
            .check(identifier, action, CheckOptions::counting())
            .await?;
        if !decision.allowed {
            return Err(RateLimitError::RateLimitExceeded {
                retry_after_ms: decision.reset_time,
            });
        }
        Ok(decision)
    }

    /// Milliseconds until `identifier` may act again. Never writes.
    pub async fn remaining_time(
        &self,
        identifier: &str,
        action: ActionType,
    ) -> Result<u64, RateLimitError> {
        let limit = self.config.limit_for(action)?;
        let record = self.storage.get_record(identifier, action).await?;
        Ok(record
            .map(|record| record.remaining_ms(&limit, Utc::now()))
            .unwrap_or(0))
    }

    pub async fn is_rate_limited(
        &self,
        identifier: &str,
        action: ActionType,
    ) -> Result<bool, RateLimitError> {
        Ok(self.remaining_time(identifier, action).await? > 0)
    }

    pub async fn status(
        &self,
        identifier: &str,
        action: ActionType,
    ) -> Result<RateLimitStatus, RateLimitError> {
        let remaining_time = self.remaining_time(identifier, action).await?;
        Ok(status_for(action, remaining_time))
    }

    async fn ensure_user_exists(&self, identifier: &str) -> Result<(), RateLimitError> {
        let users = self.users.as_ref().ok_or_else(|| {
            RateLimitError::ConfigError("No user directory configured".to_string())
        })?;

        let email = email_from_identifier(identifier).ok_or(RateLimitError::UserNotFound)?;
        if users.is_active_user(&email).await? {
            Ok(())
        } else {
            Err(RateLimitError::UserNotFound)
        }
    }
}

pub(crate) fn status_for(action: ActionType, remaining_time: u64) -> RateLimitStatus {
    let formatted_time = format_remaining_time(remaining_time);
    let has_active_limit = remaining_time > 0;
    let message = if has_active_limit {
        format!("{}. Please wait {}.", action.limit_message(), formatted_time)
    } else {
        "No active rate limit.".to_string()
    };

    RateLimitStatus {
        has_active_limit,
        remaining_time,
        formatted_time,
        message,
    }
}

/// Human readable wait time, rounded up: "45 seconds", "1 minute", "2 minutes".
pub fn format_remaining_time(ms: u64) -> String {
    let seconds = ms.div_ceil(1000);
    if seconds < 60 {
        return plural(seconds, "second");
    }
    plural(seconds.div_ceil(60), "minute")
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}
