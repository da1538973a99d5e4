//! Critical error alerting layer for tracing.
//!
//! This layer intercepts ERROR-level events (fail-open counter errors among
//! them) and dispatches alerts to the console or a webhook. Repeats of the
//! same event are suppressed for a cooldown period, so a store outage raises
//! one alert instead of one per request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{Event, Subscriber};
use tracing_subscriber::{Layer, layer::Context};

/// Alert message containing error details.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub level: String,
    pub message: String,
    pub target: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub fields: Vec<(String, String)>,
    /// Identical events dropped since the previous alert for this event.
    pub suppressed: u64,
}

/// Configuration for the alert layer.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Minimum level to trigger alerts (default: ERROR).
    pub min_level: tracing::Level,
    /// Channel buffer size.
    pub buffer_size: usize,
    /// Quiet period per (target, message) after an alert fires.
    pub cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            min_level: tracing::Level::ERROR,
            buffer_size: 100,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Trait for alert senders - implement this for different backends.
#[async_trait::async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, alert: AlertMessage) -> Result<(), AlertError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Failed to send alert: {0}")]
    SendError(String),
}

/// Console alert sender - logs alerts to stderr (for development).
pub struct ConsoleAlertSender;

#[async_trait::async_trait]
impl AlertSender for ConsoleAlertSender {
    async fn send(&self, alert: AlertMessage) -> Result<(), AlertError> {
        eprintln!(
            "\n[ALERT] {} {}\n  message: {}\n  time: {}\n  suppressed repeats: {}\n",
            alert.level, alert.target, alert.message, alert.timestamp, alert.suppressed
        );
        Ok(())
    }
}

/// Webhook alert sender - posts alerts to a webhook URL (Slack, Discord, etc.).
pub struct WebhookAlertSender {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertSender {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl AlertSender for WebhookAlertSender {
    async fn send(&self, alert: AlertMessage) -> Result<(), AlertError> {
        let details: Vec<String> = alert
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let payload = serde_json::json!({
            "text": format!(
                "*{}* {}\n*Message:* {}\n*Fields:* {}\n*Time:* {}\n*Suppressed repeats:* {}",
                alert.level,
                alert.target,
                alert.message,
                details.join(" "),
                alert.timestamp,
                alert.suppressed
            )
        });

        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| AlertError::SendError(e.to_string()))?;

        Ok(())
    }
}

/// Per-event cooldown bookkeeping.
struct AlertGate {
    cooldown: Duration,
    last_sent: HashMap<(String, String), (Instant, u64)>,
}

impl AlertGate {
    fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: HashMap::new(),
        }
    }

    /// Returns `Some(suppressed)` when the event may alert now, with the
    /// number of repeats swallowed since the last alert.
    fn admit(&mut self, target: &str, message: &str, now: Instant) -> Option<u64> {
        let key = (target.to_string(), message.to_string());
        match self.last_sent.get_mut(&key) {
            Some((sent_at, suppressed)) if now.duration_since(*sent_at) < self.cooldown => {
                *suppressed += 1;
                None
            }
            Some((sent_at, suppressed)) => {
                let dropped = *suppressed;
                *sent_at = now;
                *suppressed = 0;
                Some(dropped)
            }
            None => {
                self.last_sent.insert(key, (now, 0));
                Some(0)
            }
        }
    }
}

/// Tracing layer that sends alerts on events at or above the configured level.
pub struct AlertLayer {
    sender: mpsc::Sender<AlertMessage>,
    min_level: tracing::Level,
    gate: Mutex<AlertGate>,
}

impl AlertLayer {
    /// Create a new alert layer with the given sender.
    pub fn new(alert_sender: Arc<dyn AlertSender>, config: AlertConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<AlertMessage>(config.buffer_size);

        // Spawn background task to process alerts
        tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                if let Err(e) = alert_sender.send(alert).await {
                    eprintln!("Failed to send alert: {}", e);
                }
            }
        });

        Self {
            sender: tx,
            min_level: config.min_level,
            gate: Mutex::new(AlertGate::new(config.cooldown)),
        }
    }

    /// Create an alert layer that logs to console.
    pub fn console(config: AlertConfig) -> Self {
        Self::new(Arc::new(ConsoleAlertSender), config)
    }

    /// Create an alert layer that sends to a webhook.
    pub fn webhook(url: String, config: AlertConfig) -> Self {
        Self::new(Arc::new(WebhookAlertSender::new(url)), config)
    }
}

/// Visitor to extract fields from events.
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: String::new(),
            fields: Vec::new(),
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .push((field.name().to_string(), format!("{:?}", value)));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

impl<S> Layer<S> for AlertLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Level ordering: ERROR is the "smallest" level.
        if *event.metadata().level() > self.min_level {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        let target = event.metadata().target();
        let suppressed = match self.gate.lock() {
            Ok(mut gate) => match gate.admit(target, &visitor.message, Instant::now()) {
                Some(suppressed) => suppressed,
                None => return,
            },
            Err(_) => 0,
        };

        let alert = AlertMessage {
            level: event.metadata().level().to_string(),
            message: visitor.message,
            target: target.to_string(),
            timestamp: chrono::Utc::now(),
            fields: visitor.fields,
            suppressed,
        };

        // Non-blocking send
        let _ = self.sender.try_send(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_suppresses_repeats_within_cooldown() {
        let mut gate = AlertGate::new(Duration::from_secs(60));
        let start = Instant::now();
        let target = "quota_infra::limiter";
        let message = "Counter store error, allowing request";

        assert_eq!(gate.admit(target, message, start), Some(0));
        assert_eq!(gate.admit(target, message, start + Duration::from_secs(1)), None);
        assert_eq!(gate.admit(target, message, start + Duration::from_secs(2)), None);

        // Different events are gated independently.
        assert_eq!(gate.admit(target, "other", start + Duration::from_secs(2)), Some(0));

        assert_eq!(
            gate.admit(target, message, start + Duration::from_secs(61)),
            Some(2)
        );
    }

    struct CapturingSender(mpsc::UnboundedSender<AlertMessage>);

    #[async_trait::async_trait]
    impl AlertSender for CapturingSender {
        async fn send(&self, alert: AlertMessage) -> Result<(), AlertError> {
            self.0
                .send(alert)
                .map_err(|e| AlertError::SendError(e.to_string()))
        }
    }

    #[tokio::test]
    async fn test_layer_forwards_error_events_once() {
        use tracing_subscriber::layer::SubscriberExt;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let layer = AlertLayer::new(Arc::new(CapturingSender(tx)), AlertConfig::default());
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("not an alert");
            tracing::error!(key = "throttle:default:1.2.3.4", "Counter store error");
            tracing::error!(key = "throttle:default:1.2.3.4", "Counter store error");
        });

        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.message, "Counter store error");
        assert_eq!(alert.level, "ERROR");
        assert!(alert.fields.iter().any(|(k, _)| k == "key"));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
