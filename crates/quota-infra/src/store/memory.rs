//! In-memory counter store - per-process stand-in for the shared store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use quota_core::ports::CounterStore;
use quota_core::{CounterRecord, RateKey, StoreError};

struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// In-memory counter store using a HashMap behind an async Mutex.
///
/// Honours the same increment-and-expire contract as the Redis store, so it
/// backs tests and single-instance deployments.
/// Note: Counters are per-process, not shared across instances.
pub struct InMemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
    closed: AtomicBool,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Drop every expired counter. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of live counters.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(
        &self,
        key: &RateKey,
        window: Duration,
    ) -> Result<CounterRecord, StoreError> {
        self.ensure_open()?;

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.as_str().to_string())
            .or_insert(CounterEntry {
                count: 0,
                expires_at: now,
            });

        // An expired counter starts over, exactly as if the store had evicted it.
        if entry.expires_at <= now {
            entry.count = 0;
        }

        entry.count += 1;
        entry.expires_at = now + window;

        Ok(CounterRecord {
            count: entry.count,
            ttl: window,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.ensure_open()
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.entries.lock().await.clear();
    }
}
