//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the bulk sync workers:
//! - Logging and tracing setup
//! - Pipeline and remote API configuration
//! - Event bus for pipeline progress
//!
//! ## Overview
//!
//! Other crates depend on this one for their configuration types and for the
//! logging conventions they follow; nothing here talks to the database or the
//! network.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{BulkSyncConfig, RemoteApiConfig};
pub use error::{Error, Result};
pub use events::{BulkEvent, EventBus, EventBusNotifier};
