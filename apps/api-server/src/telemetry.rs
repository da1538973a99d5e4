//! Telemetry initialization - tracing and alerting setup.

use std::time::Duration;

use quota_core::ConfigError;
use quota_infra::env;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::observability::{AlertConfig, AlertLayer};

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Enable JSON logging (for production).
    pub json_logs: bool,
    /// Service name for tracing.
    pub service_name: String,
    /// Enable critical error alerting.
    pub alerts_enabled: bool,
    /// Webhook URL for alerts (Slack, Discord, etc.).
    pub alert_webhook_url: Option<String>,
    /// Quiet period between identical alerts.
    pub alert_cooldown: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            service_name: "quota-api".to_string(),
            alerts_enabled: true,
            alert_webhook_url: None,
            alert_cooldown: Duration::from_secs(60),
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from environment variables.
    ///
    /// Runs before the subscriber exists, so errors go back to `main` unlogged.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            json_logs: env::optional("LOG_FORMAT")
                .is_some_and(|v| v.eq_ignore_ascii_case("json")),
            service_name: env::optional("SERVICE_NAME").unwrap_or(defaults.service_name),
            alerts_enabled: env::flag("ALERTS_ENABLED", defaults.alerts_enabled)?,
            alert_webhook_url: env::optional("ALERT_WEBHOOK_URL"),
            alert_cooldown: Duration::from_secs(env::parse_or(
                "ALERT_COOLDOWN_SECS",
                defaults.alert_cooldown.as_secs(),
            )?),
        })
    }
}

/// Initialize telemetry (tracing and alerting).
///
/// Must run inside the async runtime: the alert layer spawns its dispatch task.
pub fn init_telemetry(config: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,api_server=debug,quota_infra=debug"));

    let alert_config = AlertConfig {
        cooldown: config.alert_cooldown,
        ..AlertConfig::default()
    };

    // Create alert layer if enabled
    let alert_layer = if config.alerts_enabled {
        let layer = match &config.alert_webhook_url {
            Some(webhook_url) => AlertLayer::webhook(webhook_url.clone(), alert_config),
            None => AlertLayer::console(alert_config),
        };
        Some(layer)
    } else {
        None
    };

    // Build and init subscriber based on log format
    if config.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(alert_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .with(alert_layer)
            .init();
    }

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        alerts_enabled = config.alerts_enabled,
        webhook = config.alert_webhook_url.is_some(),
        "Telemetry initialized"
    );
}
