//! Notification sinks for desktop and server hosts

use async_trait::async_trait;
use bridge_traits::alert::{Alert, AlertSeverity, NotificationSink};
use reqwest::Client;
use std::time::Duration;
use tracing::{error, warn};

/// Writes every alert to the tracing pipeline.
#[derive(Debug, Clone, Default)]
pub struct TracingNotificationSink;

impl TracingNotificationSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, alert: Alert) {
        let fields = format!("{:?}", alert.fields);
        match alert.severity {
            AlertSeverity::Warning => warn!(
                source = %alert.source,
                fields = %fields,
                "{}",
                alert.message
            ),
            AlertSeverity::Error | AlertSeverity::Critical => error!(
                severity = alert.severity.as_str(),
                source = %alert.source,
                fields = %fields,
                "{}",
                alert.message
            ),
        }
    }
}

/// Posts alerts as JSON to an HTTP endpoint (chat webhook, pager bridge).
///
/// Delivery failures are logged and dropped.
pub struct WebhookNotificationSink {
    client: Client,
    url: String,
    min_severity: AlertSeverity,
    timeout: Duration,
}

impl WebhookNotificationSink {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            min_severity: AlertSeverity::Warning,
            timeout: Duration::from_secs(5),
        }
    }

    /// Drop alerts below `severity`.
    pub fn with_min_severity(mut self, severity: AlertSeverity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, alert: Alert) {
        if alert.severity < self.min_severity {
            return;
        }

        let result = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&alert)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => warn!(
                status = response.status().as_u16(),
                source = %alert.source,
                "Alert webhook rejected notification"
            ),
            Err(e) => warn!(error = %e, source = %alert.source, "Alert webhook unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracing_sink_accepts_every_severity() {
        let sink = TracingNotificationSink::new();
        for severity in [
            AlertSeverity::Warning,
            AlertSeverity::Error,
            AlertSeverity::Critical,
        ] {
            sink.notify(Alert::new(severity, "test", "message").with_field("job_id", "j1"))
                .await;
        }
    }

    #[tokio::test]
    async fn test_webhook_swallows_delivery_failure() {
        let sink = WebhookNotificationSink::new(Client::new(), "http://127.0.0.1:9/alerts")
            .with_timeout(Duration::from_millis(200));
        sink.notify(Alert::new(AlertSeverity::Critical, "job_poller", "stalled"))
            .await;
    }

    #[tokio::test]
    async fn test_webhook_filters_low_severity() {
        // An unroutable URL would only be hit if the alert passed the filter.
        let sink = WebhookNotificationSink::new(Client::new(), "http://127.0.0.1:9/alerts")
            .with_min_severity(AlertSeverity::Critical);
        sink.notify(Alert::new(AlertSeverity::Warning, "job_poller", "slow"))
            .await;
    }
}
