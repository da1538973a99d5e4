//! Distributed request counter - fixed-window throttling over a shared store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use quota_core::ports::{CounterStore, RateLimiter};
use quota_core::{RateKey, StoreError, ThrottleDecision, ThrottlePolicy};

/// Fixed-window request counter backed by a shared `CounterStore`.
///
/// Each check is one atomic increment-and-expire against the store. Store
/// failures never reach the caller: they are logged and the check answers
/// with `ThrottleDecision::allow_all()`, so a limiter outage degrades to "no
/// throttling" instead of failing requests.
pub struct DistributedRequestCounter {
    store: Arc<dyn CounterStore>,
    command_timeout: Duration,
}

impl DistributedRequestCounter {
    pub fn new(store: Arc<dyn CounterStore>, command_timeout: Duration) -> Self {
        Self {
            store,
            command_timeout,
        }
    }

    async fn increment(
        &self,
        key: &RateKey,
        policy: &ThrottlePolicy,
    ) -> Result<ThrottleDecision, StoreError> {
        let increment = self.store.increment(key, policy.window);
        let record = tokio::time::timeout(self.command_timeout, increment)
            .await
            .map_err(|_| StoreError::Timeout(self.command_timeout))??;

        Ok(ThrottleDecision::from_record(record, policy))
    }
}

#[async_trait]
impl RateLimiter for DistributedRequestCounter {
    async fn check_and_increment(
        &self,
        key: &RateKey,
        policy: &ThrottlePolicy,
    ) -> ThrottleDecision {
        match self.increment(key, policy).await {
            Ok(decision) => {
                if decision.is_blocked {
                    tracing::debug!(
                        key = %key,
                        policy = %policy.name,
                        total_hits = decision.total_hits,
                        limit = policy.limit,
                        "Request over quota"
                    );
                }
                decision
            }
            Err(e) => {
                // Fail open: availability of the protected service wins over quota enforcement.
                tracing::error!(
                    key = %key,
                    policy = %policy.name,
                    error = %e,
                    fail_open = true,
                    "Counter store error, allowing request"
                );
                ThrottleDecision::allow_all()
            }
        }
    }

    async fn is_healthy(&self) -> bool {
        match tokio::time::timeout(self.command_timeout, self.store.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Counter store health check failed");
                false
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.command_timeout,
                    "Counter store health check timed out"
                );
                false
            }
        }
    }

    async fn shutdown(&self) {
        self.store.shutdown().await;
        tracing::info!("Request counter shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use quota_core::CounterRecord;

    use crate::store::InMemoryCounterStore;

    /// Store that always reports the backend as down.
    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn increment(
            &self,
            _key: &RateKey,
            _window: Duration,
        ) -> Result<CounterRecord, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    /// Store whose commands never complete.
    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        async fn increment(
            &self,
            _key: &RateKey,
            _window: Duration,
        ) -> Result<CounterRecord, StoreError> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    fn counter_with(store: Arc<dyn CounterStore>) -> DistributedRequestCounter {
        DistributedRequestCounter::new(store, Duration::from_millis(500))
    }

    fn memory_counter() -> DistributedRequestCounter {
        counter_with(Arc::new(InMemoryCounterStore::new()))
    }

    fn key(raw: &str) -> RateKey {
        RateKey::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_sequential_hits_count_up() {
        let counter = memory_counter();
        let policy = ThrottlePolicy::from_millis("default", 60_000, 100, 0).unwrap();

        for expected in 1..=10 {
            let decision = counter.check_and_increment(&key("client"), &policy).await;
            assert_eq!(decision.total_hits, expected);
            assert_eq!(decision.time_to_expire_ms, 60_000);
            assert!(!decision.is_blocked);
        }
    }

    #[tokio::test]
    async fn test_blocks_once_limit_is_reached() {
        let counter = memory_counter();
        let policy = ThrottlePolicy::from_millis("default", 60_000, 5, 1_000).unwrap();

        for n in 1..=8u64 {
            let decision = counter.check_and_increment(&key("client"), &policy).await;
            assert_eq!(decision.is_blocked, n >= 5, "hit {}", n);
            let expected_block = if n >= 5 { 1_000 } else { 0 };
            assert_eq!(decision.time_to_block_expire_ms, expected_block);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_after_idle_period() {
        let counter = memory_counter();
        let policy = ThrottlePolicy::from_millis("default", 1_000, 10, 0).unwrap();

        counter.check_and_increment(&key("client"), &policy).await;
        counter.check_and_increment(&key("client"), &policy).await;

        tokio::time::advance(Duration::from_millis(1_001)).await;

        let decision = counter.check_and_increment(&key("client"), &policy).await;
        assert_eq!(decision.total_hits, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hits_have_no_lost_updates() {
        let counter = Arc::new(memory_counter());
        let policy = Arc::new(ThrottlePolicy::from_millis("default", 60_000, 50, 0).unwrap());

        let calls = (0..50).map(|_| {
            let counter = counter.clone();
            let policy = policy.clone();
            tokio::spawn(async move { counter.check_and_increment(&key("fresh"), &policy).await })
        });

        let hits: HashSet<u64> = futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|r| r.unwrap().total_hits)
            .collect();

        assert_eq!(hits, (1..=50).collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let counter = memory_counter();
        let policy = ThrottlePolicy::from_millis("default", 60_000, 2, 0).unwrap();

        for _ in 0..3 {
            counter.check_and_increment(&key("a"), &policy).await;
        }

        let b = counter.check_and_increment(&key("b"), &policy).await;
        assert_eq!(b.total_hits, 1);
        assert!(!b.is_blocked);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_unreachable() {
        let counter = counter_with(Arc::new(UnreachableStore));
        let policy = ThrottlePolicy::from_millis("default", 60_000, 1, 5_000).unwrap();

        let decision = counter.check_and_increment(&key("client"), &policy).await;
        assert_eq!(decision, ThrottleDecision::allow_all());
        assert!(!counter.is_healthy().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_open_when_store_stalls() {
        let counter = counter_with(Arc::new(StalledStore));
        let policy = ThrottlePolicy::from_millis("default", 60_000, 1, 5_000).unwrap();

        let decision = counter.check_and_increment(&key("client"), &policy).await;
        assert_eq!(decision, ThrottleDecision::allow_all());
        assert!(!counter.is_healthy().await);
    }

    #[tokio::test]
    async fn test_fails_open_after_shutdown() {
        let counter = memory_counter();
        let policy = ThrottlePolicy::from_millis("default", 60_000, 1, 0).unwrap();

        assert!(counter.check_and_increment(&key("client"), &policy).await.is_blocked);

        counter.shutdown().await;

        let decision = counter.check_and_increment(&key("client"), &policy).await;
        assert_eq!(decision, ThrottleDecision::allow_all());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concrete_scenario() {
        let counter = memory_counter();
        let policy = ThrottlePolicy::from_millis("default", 60_000, 3, 5_000).unwrap();
        let client = key("ip:1.2.3.4");

        let first = counter.check_and_increment(&client, &policy).await;
        let second = counter.check_and_increment(&client, &policy).await;
        assert_eq!((first.total_hits, first.is_blocked), (1, false));
        assert_eq!((second.total_hits, second.is_blocked), (2, false));

        // The limit-th hit already trips the block (total_hits >= limit).
        let third = counter.check_and_increment(&client, &policy).await;
        assert_eq!((third.total_hits, third.is_blocked), (3, true));

        let fourth = counter.check_and_increment(&client, &policy).await;
        assert_eq!(fourth.total_hits, 4);
        assert!(fourth.is_blocked);
        assert_eq!(fourth.time_to_block_expire_ms, 5_000);

        tokio::time::advance(Duration::from_millis(60_001)).await;

        let fifth = counter.check_and_increment(&client, &policy).await;
        assert_eq!(fifth.total_hits, 1);
        assert!(!fifth.is_blocked);
    }
}
