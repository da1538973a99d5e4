use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{CounterRecord, RateKey};
use crate::error::StoreError;

/// Counter store trait - abstraction over shared counter backends (Redis, in-memory).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key` by one and re-arm its expiry to `window`,
    /// as one indivisible operation.
    ///
    /// Returns the post-increment count and the remaining TTL.
    async fn increment(&self, key: &RateKey, window: Duration) -> Result<CounterRecord, StoreError>;

    /// Check that the store answers.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release the connection. Later calls fail with `StoreError::Closed`.
    async fn shutdown(&self) {}
}
