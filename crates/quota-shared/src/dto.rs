//! Data Transfer Objects - response bodies for the API.

use serde::{Deserialize, Serialize};

/// Counter store reachability as seen by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Up,
    Down,
}

/// Response of the health endpoint.
///
/// `status` stays `"ok"` while the store is down: throttling fails open, so
/// the service itself is still healthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub store: StoreStatus,
}
