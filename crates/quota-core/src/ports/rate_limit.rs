//! Rate limiting port.

use async_trait::async_trait;

use crate::domain::{RateKey, ThrottleDecision, ThrottlePolicy};

/// Rate limiter trait - what the throttling middleware talks to.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one hit for `key` under `policy` and decide whether it is over quota.
    ///
    /// Never fails: when the backing store is unusable the implementation
    /// returns `ThrottleDecision::allow_all()`.
    async fn check_and_increment(&self, key: &RateKey, policy: &ThrottlePolicy)
    -> ThrottleDecision;

    /// Whether the backing store currently answers.
    async fn is_healthy(&self) -> bool;

    /// Release backend resources during graceful shutdown.
    async fn shutdown(&self);
}
