//! Observability module - tracing and alerting.

mod alert;

pub use alert::{AlertConfig, AlertLayer};
