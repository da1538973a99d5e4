use std::time::Duration;

use crate::error::PolicyError;

/// One named throttling rule: at most `limit` hits per `window`.
///
/// `block_duration` is only reported back to blocked callers as a cooldown
/// hint; the counter itself never enforces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub name: String,
    pub window: Duration,
    pub limit: u64,
    pub block_duration: Duration,
}

impl ThrottlePolicy {
    pub fn new(
        name: impl Into<String>,
        window: Duration,
        limit: u64,
        block_duration: Duration,
    ) -> Result<Self, PolicyError> {
        let name = name.into();
        if name.is_empty() {
            return Err(PolicyError::EmptyName);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow(name));
        }
        if limit == 0 {
            return Err(PolicyError::ZeroLimit(name));
        }
        Ok(Self {
            name,
            window,
            limit,
            block_duration,
        })
    }

    /// Build a policy from millisecond quantities, as throttler settings are
    /// usually written.
    pub fn from_millis(
        name: impl Into<String>,
        window_ms: u64,
        limit: u64,
        block_duration_ms: u64,
    ) -> Result<Self, PolicyError> {
        Self::new(
            name,
            Duration::from_millis(window_ms),
            limit,
            Duration::from_millis(block_duration_ms),
        )
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}
