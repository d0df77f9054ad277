//! # Host Bridge Traits
//!
//! Host abstraction traits that the bulk sync core depends on.
//!
//! ## Overview
//!
//! This crate defines the contract between the sync core and the process that
//! hosts it. Each trait represents a capability the core requires but that a
//! host may provide differently (a desktop daemon, a server worker, a test
//! harness).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with retry and TLS
//!
//! ### Operations
//! - [`NotificationSink`](alert::NotificationSink) - Fire-and-forget operator alerts
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Host
//! implementations should convert their native errors into `BridgeError` and
//! include enough context (URL, status code) to act on the failure.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared as
//! `Arc<dyn Trait>` across async tasks.
//!
//! ## Examples
//!
//! ### Implementing NotificationSink
//!
//! ```ignore
//! use bridge_traits::alert::{Alert, NotificationSink};
//! use async_trait::async_trait;
//!
//! pub struct StderrSink;
//!
//! #[async_trait]
//! impl NotificationSink for StderrSink {
//!     async fn notify(&self, alert: Alert) {
//!         eprintln!("[{}] {}", alert.severity.as_str(), alert.message);
//!     }
//! }
//! ```

pub mod alert;
pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use alert::{Alert, AlertSeverity, NoopNotificationSink, NotificationSink};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{Clock, ManualClock, SystemClock};
