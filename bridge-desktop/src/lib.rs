//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop and server hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `NotificationSink` writing to `tracing`, or posting JSON to a webhook
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TracingNotificationSink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let http_client = Arc::new(ReqwestHttpClient::new()?);
//!     let notifier = Arc::new(TracingNotificationSink::new());
//!
//!     // Hand both to the bulk sync dependencies
//!     Ok(())
//! }
//! ```

mod alert;
mod http;

pub use alert::{TracingNotificationSink, WebhookNotificationSink};
pub use http::ReqwestHttpClient;
