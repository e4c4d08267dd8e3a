//! Identifier conventions shared by callers, storage and account cleanup.
//!
//! Emails are trimmed and lowercased before use. Callers scope their limits with
//! one of the prefixed forms below; account deletion removes every form derived
//! from the account email.

use std::net::IpAddr;

pub const EMAIL_PREFIX: &str = "email_";
pub const ACTIVATION_PREFIX: &str = "email_activation_";

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// `email_<address>`, the identifier used for email-scoped limits.
pub fn email_identifier(email: &str) -> String {
    format!("{}{}", EMAIL_PREFIX, normalize_email(email))
}

/// `email_activation_<address>`, used while an account is awaiting activation.
pub fn activation_identifier(email: &str) -> String {
    format!("{}{}", ACTIVATION_PREFIX, normalize_email(email))
}

/// Canonical textual form of a client IP, or `None` if it does not parse.
pub fn ip_identifier(ip: &str) -> Option<String> {
    ip.trim().parse::<IpAddr>().ok().map(|addr| match addr {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(|v4| v4.to_string())
            .unwrap_or_else(|| v6.to_string()),
        IpAddr::V4(v4) => v4.to_string(),
    })
}

/// Every identifier form that belongs to the account with this email.
pub fn derived_identifiers(email: &str) -> Vec<String> {
    vec![
        normalize_email(email),
        email_identifier(email),
        activation_identifier(email),
    ]
}

/// Recover the email an identifier was built from, if it was built from one.
pub fn email_from_identifier(identifier: &str) -> Option<String> {
    let candidate = identifier
        .strip_prefix(ACTIVATION_PREFIX)
        .or_else(|| identifier.strip_prefix(EMAIL_PREFIX))
        .unwrap_or(identifier);

    if candidate.contains('@') {
        Some(normalize_email(candidate))
    } else {
        None
    }
}
