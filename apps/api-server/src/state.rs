//! Application state - shared across all handlers.

use std::sync::Arc;
use std::time::Duration;

use quota_core::ConfigError;
use quota_core::ports::{CounterStore, RateLimiter};
use quota_infra::{DistributedRequestCounter, InMemoryCounterStore};

#[cfg(feature = "redis")]
use quota_infra::RedisCounterStore;

use crate::config::{AppConfig, StoreBackend, ThrottleConfig};

/// How often the in-memory store drops expired counters.
const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn RateLimiter>,
    pub throttle: Arc<ThrottleConfig>,
}

impl AppState {
    pub fn new(limiter: Arc<dyn RateLimiter>, throttle: ThrottleConfig) -> Self {
        Self {
            limiter,
            throttle: Arc::new(throttle),
        }
    }

    /// Build the application state and run the store's startup hook.
    pub async fn build(config: &AppConfig) -> Result<Self, ConfigError> {
        let store: Arc<dyn CounterStore> = match &config.store {
            #[cfg(feature = "redis")]
            StoreBackend::Redis(redis_config) => {
                let store = RedisCounterStore::new(redis_config.clone())?;
                if let Err(e) = store.connect().await {
                    tracing::warn!(
                        error = %e,
                        "Counter store not reachable at startup - throttling fails open until it is"
                    );
                }
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory counter store - limits are per-process");
                let store = Arc::new(InMemoryCounterStore::new());
                spawn_purge_task(store.clone());
                store
            }
        };

        let limiter = Arc::new(DistributedRequestCounter::new(
            store,
            config.throttle.command_timeout,
        ));

        tracing::info!(
            policies = config.throttle.policies.len(),
            "Application state initialized"
        );

        Ok(Self::new(limiter, config.throttle.clone()))
    }
}

fn spawn_purge_task(store: Arc<InMemoryCounterStore>) {
    actix_rt::spawn(async move {
        let mut interval = actix_rt::time::interval(MEMORY_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired counters");
            }
        }
    });
}
