//! # Event Bus System
//!
//! Broadcasts pipeline progress to interested observers (dashboards, operator
//! tooling, tests) over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **[`BulkEvent`]**: what happened to a submission scope or a batch job
//! - **[`EventBus`]**: the broadcast channel
//! - **[`EventStream`]**: a receiver with an optional predicate
//! - **[`EventBusNotifier`]**: adapts the bus into a
//!   [`NotificationSink`](bridge_traits::alert::NotificationSink) so alerts
//!   show up on the same stream
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{BulkEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(BulkEvent::JobSubmitted {
//!     job_id: "job-1".to_string(),
//!     account_id: "1234567890".to_string(),
//!     operand: "keyword".to_string(),
//!     action: "add".to_string(),
//!     item_count: 3,
//!     operation_count: 3,
//! })
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.job_id(), Some("job-1"));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! `emit` fails only when nobody is subscribed; publishers ignore that.
//! Slow subscribers receive `RecvError::Lagged(n)` and may keep reading.

use async_trait::async_trait;
use bridge_traits::alert::{Alert, AlertSeverity, NotificationSink};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Event Types
// ============================================================================

/// Pipeline events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BulkEvent {
    /// A remote job was created, loaded and started.
    JobSubmitted {
        job_id: String,
        account_id: String,
        operand: String,
        action: String,
        item_count: usize,
        operation_count: usize,
    },
    /// Job creation, upload or run failed.
    SubmissionFailed {
        account_id: String,
        operand: String,
        action: String,
        message: String,
    },
    /// A poll left the job pending.
    JobPolled {
        job_id: String,
        attempts: u32,
        next_poll_at: i64,
    },
    /// The job finished and every item was accounted for.
    JobCompleted {
        job_id: String,
        resolved: usize,
        failed: usize,
        used_fallback: bool,
    },
    /// The job ended in error.
    JobFailed { job_id: String, reason: String },
    /// The remote accepted the job but never started it.
    JobStalled { job_id: String, attempts: u32 },
    /// Queue rows for campaigns the resolver did not know were dropped.
    ScopePurged {
        account_id: String,
        campaign_ids: Vec<String>,
        removed: u64,
    },
    /// Mirror of an operator alert.
    Alert {
        severity: AlertSeverity,
        source: String,
        message: String,
        fields: BTreeMap<String, String>,
    },
}

impl BulkEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &'static str {
        match self {
            BulkEvent::JobSubmitted { .. } => "Batch job submitted",
            BulkEvent::SubmissionFailed { .. } => "Batch submission failed",
            BulkEvent::JobPolled { .. } => "Batch job still pending",
            BulkEvent::JobCompleted { .. } => "Batch job reconciled",
            BulkEvent::JobFailed { .. } => "Batch job failed",
            BulkEvent::JobStalled { .. } => "Batch job stalled",
            BulkEvent::ScopePurged { .. } => "Unresolvable queue scope purged",
            BulkEvent::Alert { .. } => "Operator alert",
        }
    }

    /// Job the event belongs to, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            BulkEvent::JobSubmitted { job_id, .. }
            | BulkEvent::JobPolled { job_id, .. }
            | BulkEvent::JobCompleted { job_id, .. }
            | BulkEvent::JobFailed { job_id, .. }
            | BulkEvent::JobStalled { job_id, .. } => Some(job_id),
            BulkEvent::Alert { fields, .. } => fields.get("job_id").map(String::as_str),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BulkEvent::SubmissionFailed { .. }
                | BulkEvent::JobFailed { .. }
                | BulkEvent::JobStalled { .. }
        )
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`BulkEvent`]s. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BulkEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event; returns the number of receivers.
    pub fn emit(&self, event: BulkEvent) -> Result<usize, SendError<BulkEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<BulkEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&BulkEvent) -> bool + Send + Sync>;

/// A receiver that skips events not matching its predicate.
pub struct EventStream {
    receiver: Receiver<BulkEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<BulkEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BulkEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    pub async fn recv(&mut self) -> Result<BulkEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            match &self.filter {
                Some(filter) if !filter(&event) => continue,
                _ => return Ok(event),
            }
        }
    }

    /// Non-blocking receive; `None` when nothing matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<BulkEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => match &self.filter {
                    Some(filter) if !filter(&event) => continue,
                    _ => return Some(Ok(event)),
                },
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Notification adapter
// ============================================================================

/// Publishes every alert as [`BulkEvent::Alert`].
#[derive(Debug, Clone)]
pub struct EventBusNotifier {
    bus: EventBus,
}

impl EventBusNotifier {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationSink for EventBusNotifier {
    async fn notify(&self, alert: Alert) {
        let _ = self.bus.emit(BulkEvent::Alert {
            severity: alert.severity,
            source: alert.source,
            message: alert.message,
            fields: alert.fields,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(job: &str) -> BulkEvent {
        BulkEvent::JobFailed {
            job_id: job.to_string(),
            reason: "boom".to_string(),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(failed("a")).is_err());
    }

    #[tokio::test]
    async fn test_all_subscribers_receive() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.emit(failed("j")).unwrap(), 2);
        assert_eq!(a.recv().await.unwrap(), failed("j"));
        assert_eq!(b.recv().await.unwrap(), failed("j"));
    }

    #[tokio::test]
    async fn test_stream_filter_skips_non_matching() {
        let bus = EventBus::new(8);
        let mut stream = EventStream::new(bus.subscribe()).filter(BulkEvent::is_failure);

        bus.emit(BulkEvent::JobPolled {
            job_id: "j".to_string(),
            attempts: 1,
            next_poll_at: 10,
        })
        .unwrap();
        bus.emit(failed("j")).unwrap();

        let event = stream.recv().await.unwrap();
        assert_eq!(event.description(), "Batch job failed");
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_notifier_mirrors_alerts() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let notifier = EventBusNotifier::new(bus.clone());

        notifier
            .notify(
                Alert::new(AlertSeverity::Critical, "job_poller", "stalled")
                    .with_field("job_id", "job-9"),
            )
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id(), Some("job-9"));
        assert!(matches!(
            event,
            BulkEvent::Alert {
                severity: AlertSeverity::Critical,
                ..
            }
        ));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(failed("x")).unwrap();
        assert_eq!(json["event"], "job_failed");
        assert_eq!(json["job_id"], "x");
    }
}
