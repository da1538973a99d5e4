//! # Quota API Server
//!
//! Actix-web host for the distributed request counter: every request passes
//! through the throttling middleware before reaching a handler.

use actix_web::{App, HttpServer, web};
use quota_core::ports::RateLimiter;
use tracing_actix_web::TracingLogger;

mod config;
mod handlers;
mod middleware;
mod observability;
mod state;
mod telemetry;

use config::AppConfig;
use middleware::throttle::ThrottleMiddleware;
use state::AppState;
use telemetry::TelemetryConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let telemetry = TelemetryConfig::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    telemetry::init_telemetry(&telemetry);

    // Configuration errors are deployment defects: refuse to start.
    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;

    tracing::info!("Starting Quota API Server on {}:{}", config.host, config.port);

    let state = AppState::build(&config).await.map_err(|e| {
        tracing::error!(error = %e, "Invalid counter store configuration");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;
    let limiter = state.limiter.clone();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(ThrottleMiddleware::new(
                state.limiter.clone(),
                state.throttle.clone(),
            ))
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure_routes)
            .default_service(web::to(handlers::not_found))
    })
    .bind((config.host.as_str(), config.port))?
    .run();

    let result = server.await;

    // Shutdown hook: the server has drained, release the store connection.
    limiter.shutdown().await;
    tracing::info!("Server stopped");

    result
}
