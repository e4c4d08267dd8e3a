use crate::action::ActionType;
use crate::config::ActionLimit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attempt counter for one (identifier, action type) pair.
///
/// All transitions take `now` explicitly so that a backend can run them under
/// its own lock or transaction with a single timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub identifier: String,
    pub action_type: ActionType,
    pub attempts: u32,
    pub window_start: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
    pub blocked: bool,
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Outcome of evaluating a record against its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    /// Milliseconds until the identifier may act again; 0 when allowed.
    pub reset_time: u64,
    pub attempts_remaining: u32,
}

impl Decision {
    pub fn fresh(limit: &ActionLimit) -> Self {
        Self {
            allowed: true,
            reset_time: 0,
            attempts_remaining: limit.max_attempts,
        }
    }
}

/// A record after one attempt was offered to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub record: RateLimitRecord,
    /// False when the attempt was refused (blocked or already at the limit).
    pub counted: bool,
}

impl Attempt {
    pub fn decision(&self, limit: &ActionLimit, now: DateTime<Utc>) -> Decision {
        if self.counted {
            Decision {
                allowed: true,
                reset_time: 0,
                attempts_remaining: limit.max_attempts.saturating_sub(self.record.attempts),
            }
        } else {
            Decision {
                allowed: false,
                reset_time: self.record.remaining_ms(limit, now),
                attempts_remaining: 0,
            }
        }
    }
}

impl RateLimitRecord {
    pub fn new(identifier: &str, action_type: ActionType, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.to_string(),
            action_type,
            attempts: 0,
            window_start: now,
            last_attempt: now,
            blocked: false,
            blocked_until: None,
        }
    }

    pub fn window_end(&self, limit: &ActionLimit) -> DateTime<Utc> {
        self.window_start + limit.window_delta()
    }

    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked && self.blocked_until.is_some_and(|until| now < until)
    }

    /// Time after which the record carries no state worth keeping.
    pub fn expires_at(&self, limit: &ActionLimit) -> DateTime<Utc> {
        match (self.blocked, self.blocked_until) {
            (true, Some(until)) => until,
            (true, None) => self.window_start,
            (false, _) => self.window_end(limit),
        }
    }

    pub fn is_expired(&self, limit: &ActionLimit, now: DateTime<Utc>) -> bool {
        now >= self.expires_at(limit)
    }

    /// Start a new window if the block has ended or the window has run out.
    /// Returns true if the record changed.
    pub fn reset_if_expired(&mut self, limit: &ActionLimit, now: DateTime<Utc>) -> bool {
        let expired = if self.blocked {
            !self.is_blocked_at(now)
        } else {
            now > self.window_end(limit)
        };

        if expired {
            self.attempts = 0;
            self.window_start = now;
            self.blocked = false;
            self.blocked_until = None;
        }
        expired
    }

    /// Count one attempt. Returns false if the attempt was refused because the
    /// identifier is blocked or already at the limit; `attempts` never exceeds
    /// `max_attempts`.
    pub fn register_attempt(&mut self, limit: &ActionLimit, now: DateTime<Utc>) -> bool {
        self.reset_if_expired(limit, now);
        self.last_attempt = now;

        if self.is_blocked_at(now) {
            return false;
        }
        if self.attempts >= limit.max_attempts {
            // limit was lowered under an existing counter
            self.block(limit, now);
            return false;
        }

        self.attempts += 1;
        if self.attempts >= limit.max_attempts {
            self.block(limit, now);
        }
        true
    }

    fn block(&mut self, limit: &ActionLimit, now: DateTime<Utc>) {
        self.blocked = true;
        self.blocked_until = Some(now + limit.block_delta());
    }

    /// Milliseconds until the identifier may act again, without mutating.
    pub fn remaining_ms(&self, limit: &ActionLimit, now: DateTime<Utc>) -> u64 {
        let until = if self.blocked {
            match self.blocked_until {
                Some(until) => until,
                None => return 0,
            }
        } else if self.attempts >= limit.max_attempts {
            self.window_end(limit)
        } else {
            return 0;
        };

        (until - now).num_milliseconds().max(0) as u64
    }

    pub fn evaluate(&self, limit: &ActionLimit, now: DateTime<Utc>) -> Decision {
        let reset_time = self.remaining_ms(limit, now);
        let allowed = reset_time == 0;
        let attempts_remaining = if allowed && !self.is_blocked_at(now) {
            limit.max_attempts.saturating_sub(self.attempts)
        } else {
            0
        };

        Decision {
            allowed,
            reset_time,
            attempts_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn limit() -> ActionLimit {
        ActionLimit::new(StdDuration::from_secs(3600), 3, StdDuration::from_secs(600))
    }

    fn record(now: DateTime<Utc>) -> RateLimitRecord {
        RateLimitRecord::new("email_a@test.com", ActionType::MagicLink, now)
    }

    #[test]
    fn test_blocks_on_reaching_threshold() {
        let now = Utc::now();
        let mut rec = record(now);

        assert!(rec.register_attempt(&limit(), now));
        assert!(rec.register_attempt(&limit(), now));
        assert!(!rec.blocked);
        assert!(rec.register_attempt(&limit(), now));

        assert_eq!(rec.attempts, 3);
        assert!(rec.blocked);
        assert_eq!(rec.blocked_until, Some(now + Duration::seconds(600)));

        let decision = rec.evaluate(&limit(), now);
        assert!(!decision.allowed);
        assert_eq!(decision.reset_time, 600_000);
        assert_eq!(decision.attempts_remaining, 0);
    }

    #[test]
    fn test_attempts_are_capped_while_blocked() {
        let now = Utc::now();
        let mut rec = record(now);
        for _ in 0..3 {
            rec.register_attempt(&limit(), now);
        }
        let until = rec.blocked_until;

        let later = now + Duration::seconds(30);
        assert!(!rec.register_attempt(&limit(), later));
        assert_eq!(rec.attempts, 3);
        assert_eq!(rec.blocked_until, until);
        assert_eq!(rec.last_attempt, later);
    }

    #[test]
    fn test_block_expiry_resets_counter() {
        let now = Utc::now();
        let mut rec = record(now);
        for _ in 0..3 {
            rec.register_attempt(&limit(), now);
        }

        let after = now + Duration::seconds(600);
        assert!(rec.evaluate(&limit(), after).allowed);
        assert!(rec.reset_if_expired(&limit(), after));
        assert_eq!(rec.attempts, 0);
        assert_eq!(rec.window_start, after);
        assert!(!rec.blocked);
        assert_eq!(rec.blocked_until, None);

        assert!(rec.register_attempt(&limit(), after));
        assert_eq!(rec.attempts, 1);
    }

    #[test]
    fn test_window_expiry_resets_counter() {
        let now = Utc::now();
        let mut rec = record(now);
        rec.register_attempt(&limit(), now);
        rec.register_attempt(&limit(), now);

        assert!(!rec.reset_if_expired(&limit(), now + Duration::seconds(3600)));
        assert_eq!(rec.attempts, 2);

        let later = now + Duration::seconds(3601);
        assert!(rec.reset_if_expired(&limit(), later));
        assert_eq!(rec.attempts, 0);
        assert_eq!(rec.window_start, later);
    }

    #[test]
    fn test_remaining_time_is_monotonic() {
        let now = Utc::now();
        let mut rec = record(now);
        for _ in 0..3 {
            rec.register_attempt(&limit(), now);
        }
        let until = rec.blocked_until.unwrap();

        let mut previous = u64::MAX;
        for step in 0..=60 {
            let at = now + Duration::seconds(step * 10);
            let remaining = rec.remaining_ms(&limit(), at);
            assert!(remaining <= previous);
            previous = remaining;
        }
        assert_eq!(rec.remaining_ms(&limit(), until), 0);
        assert_eq!(
            rec.remaining_ms(&limit(), until - Duration::milliseconds(1)),
            1
        );
    }

    #[test]
    fn test_lowered_limit_blocks_existing_counter() {
        let now = Utc::now();
        let mut rec = record(now);
        rec.attempts = 5;

        assert!(!rec.register_attempt(&limit(), now));
        assert!(rec.blocked);
        assert_eq!(rec.attempts, 5);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut rec = record(now);
        rec.register_attempt(&limit(), now);
        assert!(!rec.is_expired(&limit(), now + Duration::seconds(10)));
        assert!(rec.is_expired(&limit(), now + Duration::seconds(3600)));

        for _ in 0..2 {
            rec.register_attempt(&limit(), now);
        }
        assert_eq!(rec.expires_at(&limit()), now + Duration::seconds(600));
    }

    #[test]
    fn test_attempt_decision() {
        let now = Utc::now();
        let mut rec = record(now);
        for _ in 0..2 {
            rec.register_attempt(&limit(), now);
        }
        let counted = rec.register_attempt(&limit(), now);
        let attempt = Attempt {
            record: rec.clone(),
            counted,
        };
        let decision = attempt.decision(&limit(), now);
        assert!(decision.allowed);
        assert_eq!(decision.reset_time, 0);
        assert_eq!(decision.attempts_remaining, 0);

        let counted = rec.register_attempt(&limit(), now);
        let refused = Attempt {
            record: rec,
            counted,
        }
        .decision(&limit(), now);
        assert!(!refused.allowed);
        assert_eq!(refused.reset_time, 600_000);
    }

    #[test]
    fn test_fresh_record_allows() {
        let now = Utc::now();
        let decision = record(now).evaluate(&limit(), now);
        assert_eq!(decision, Decision::fresh(&limit()));
    }
}
