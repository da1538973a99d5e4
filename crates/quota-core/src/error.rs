//! Domain-level error types.

use thiserror::Error;

/// Counter store failures.
///
/// Every variant is recoverable on the request path: the limiter converts
/// them into a fail-open decision instead of surfacing them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Store connection closed")]
    Closed,
}

/// Configuration errors - fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Throttle policy validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Policy '{0}' has a zero-length window")]
    ZeroWindow(String),

    #[error("Policy '{0}' has a zero request limit")]
    ZeroLimit(String),

    #[error("Policy name must not be empty")]
    EmptyName,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateKeyError {
    #[error("Rate key must not be empty")]
    Empty,
}
