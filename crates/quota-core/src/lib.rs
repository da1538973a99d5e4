//! # Quota Core
//!
//! The domain layer of the request counter.
//! This crate holds the throttling rules and the ports adapters must implement,
//! with zero infrastructure dependencies.

pub mod domain;
pub mod error;
pub mod ports;

pub use domain::{CounterRecord, RateKey, ThrottleDecision, ThrottlePolicy};
pub use error::{ConfigError, PolicyError, RateKeyError, StoreError};
