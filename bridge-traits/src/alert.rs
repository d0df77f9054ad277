//! Operator Alerts
//!
//! Fire-and-forget notification of fatal or unexpected pipeline conditions
//! (stalled jobs, failed submissions, consistency faults). Callers never
//! consume a result: a sink that cannot deliver must log and move on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// A single operator-facing alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    /// Component that raised the alert, e.g. `job_poller`
    pub source: String,
    pub message: String,
    /// Structured context (job id, account id, ...)
    pub fields: BTreeMap<String, String>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            source: source.into(),
            message: message.into(),
            fields: BTreeMap::new(),
            raised_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    pub fn raised_at(mut self, at: DateTime<Utc>) -> Self {
        self.raised_at = at;
        self
    }
}

/// Notification sink trait
///
/// Implementations must not block the pipeline for long and must swallow
/// their own delivery failures.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alert: Alert);
}

/// Sink that drops every alert.
#[derive(Debug, Clone, Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify(&self, _alert: Alert) {}
}
