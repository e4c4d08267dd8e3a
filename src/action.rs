use crate::errors::RateLimitError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of throttled operation. Each one has its own counter per identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    MagicLink,
    PasswordReset,
    EmailVerification,
    Signup,
    Signin,
    Contact,
    EmailChange,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        ActionType::MagicLink,
        ActionType::PasswordReset,
        ActionType::EmailVerification,
        ActionType::Signup,
        ActionType::Signin,
        ActionType::Contact,
        ActionType::EmailChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::MagicLink => "magic_link",
            ActionType::PasswordReset => "password_reset",
            ActionType::EmailVerification => "email_verification",
            ActionType::Signup => "signup",
            ActionType::Signin => "signin",
            ActionType::Contact => "contact",
            ActionType::EmailChange => "email_change",
        }
    }

    /// Prefix used for environment overrides, e.g. `RATE_LIMIT_MAGIC_LINK`.
    pub fn env_prefix(&self) -> String {
        format!("RATE_LIMIT_{}", self.as_str().to_uppercase())
    }

    /// Short user-facing description of the limit being hit.
    pub fn limit_message(&self) -> &'static str {
        match self {
            ActionType::MagicLink => "Too many magic link requests",
            ActionType::PasswordReset => "Too many password reset requests",
            ActionType::EmailVerification => "Too many verification email requests",
            ActionType::Signup => "Too many signup attempts",
            ActionType::Signin => "Too many signin attempts",
            ActionType::Contact => "Too many contact form submissions",
            ActionType::EmailChange => "Too many email change requests",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| RateLimitError::InvalidActionType(s.to_string()))
    }
}
