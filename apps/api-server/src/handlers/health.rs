//! Health check endpoint.

use actix_web::{HttpResponse, web};
use quota_core::ports::RateLimiter;
use quota_shared::ApiResponse;
use quota_shared::dto::{HealthResponse, StoreStatus};

use crate::state::AppState;

/// Health check endpoint - returns server and counter store status.
///
/// GET /api/health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let store = if state.limiter.is_healthy().await {
        StoreStatus::Up
    } else {
        StoreStatus::Down
    };

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        store,
    };

    HttpResponse::Ok().json(ApiResponse::ok(response))
}
