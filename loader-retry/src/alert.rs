use async_trait::async_trait;
use hashbrown::HashMap;
use log::warn;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub message: String,
    pub severity: Severity,
    pub attempt: u32,
}

/// The operator-configured webhook collaborator. Out of scope: this is the
/// network transport, specified only by its contract.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, payload: serde_json::Value) -> Result<(), WebhookError>;
}

#[derive(Debug, thiserror::Error)]
#[error("webhook delivery failed: {0}")]
pub struct WebhookError(pub String);

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send(&self, alert: Alert);
}

/// Forwards alerts to the webhook transport with operator-configured tags.
/// Delivery failures are logged and swallowed; they must never propagate
/// back into the retry loop that triggered the alert.
pub struct WebhookAlerter<T> {
    transport: T,
    tags: HashMap<String, String>,
}

impl<T: WebhookTransport> WebhookAlerter<T> {
    pub fn new(transport: T, tags: HashMap<String, String>) -> Self {
        Self { transport, tags }
    }
}

#[async_trait]
impl<T: WebhookTransport> Alerter for WebhookAlerter<T> {
    async fn send(&self, alert: Alert) {
        let payload = serde_json::json!({
            "message": alert.message,
            "tags": self.tags,
            "severity": alert.severity,
        });

        if let Err(err) = self.transport.post(payload).await {
            warn!("failed to deliver alert (attempt {}): {err}", alert.attempt);
        }
    }
}

/// No-op alerter for deployments with `monitoring.webhook` unset.
pub struct NullAlerter;

#[async_trait]
impl Alerter for NullAlerter {
    async fn send(&self, _alert: Alert) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyTransport {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WebhookTransport for FlakyTransport {
        async fn post(&self, _payload: serde_json::Value) -> Result<(), WebhookError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(WebhookError("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn delivery_failure_does_not_propagate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let alerter = WebhookAlerter::new(
            FlakyTransport {
                calls: calls.clone(),
            },
            HashMap::new(),
        );

        alerter
            .send(Alert {
                message: "setup error".to_string(),
                severity: Severity::Error,
                attempt: 0,
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
