//! # Quota Infrastructure
//!
//! Concrete implementations of the ports defined in `quota-core`:
//! counter stores and the fail-open distributed request counter built on them.
//!
//! ## Feature Flags
//!
//! - `redis` (default) - Redis-backed shared counter store
//!
//! Without `redis` only the in-memory store is available.

pub mod env;
pub mod limiter;
pub mod store;

pub use limiter::DistributedRequestCounter;
pub use store::InMemoryCounterStore;

#[cfg(feature = "redis")]
pub use store::{IpFamily, RedisConfig, RedisCounterStore};
