//! HTTP handlers and route configuration.

mod health;

use actix_web::{HttpResponse, web};

use crate::middleware::error::{AppError, AppResult};

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health::health_check))
            .route("/ping", web::get().to(ping)),
    );
}

/// GET /api/ping - cheap throttled endpoint for clients and smoke tests.
async fn ping() -> HttpResponse {
    HttpResponse::Ok().body("pong")
}

/// Fallback for unknown routes.
pub async fn not_found(req: actix_web::HttpRequest) -> AppResult<HttpResponse> {
    Err(AppError::NotFound(req.path().to_string()))
}
