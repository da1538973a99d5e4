use std::fmt;

use crate::error::RateKeyError;

/// Identifies the entity being throttled, scoped by policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey(String);

impl RateKey {
    pub fn new(key: impl Into<String>) -> Result<Self, RateKeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(RateKeyError::Empty);
        }
        Ok(Self(key))
    }

    /// Build `"{prefix}:{policy}:{tracker}"`.
    ///
    /// The tracker is usually the client IP or an API credential. An empty
    /// tracker is rejected so anonymous callers never share one bucket by
    /// accident.
    pub fn scoped(prefix: &str, policy: &str, tracker: &str) -> Result<Self, RateKeyError> {
        if tracker.is_empty() {
            return Err(RateKeyError::Empty);
        }
        let key = if prefix.is_empty() {
            format!("{}:{}", policy, tracker)
        } else {
            format!("{}:{}:{}", prefix, policy, tracker)
        };
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
