//! # Google Ads Provider
//!
//! Implements `BulkMutationApi` and `PayloadMapper` for the Google Ads REST API.
//!
//! ## Overview
//!
//! This crate provides:
//! - Batch job creation, chunked uploads chained by sequence token, and run
//! - Job status polling and paginated result listing
//! - GAQL lookups of live entities for natural-key reconciliation
//! - Translation of queue items into `MutateOperation` payloads
//!
//! ## Usage
//!
//! ```ignore
//! use provider_google_ads::{GoogleAdsBulkClient, GoogleAdsPayloadMapper};
//! use core_runtime::config::RemoteApiConfig;
//!
//! let config = RemoteApiConfig::from_env()?;
//! let remote = Arc::new(GoogleAdsBulkClient::new(http_client, config));
//! let deps = BulkSyncDeps::sqlite(pool, remote, Arc::new(GoogleAdsPayloadMapper::new()), notifier);
//! ```

pub mod connector;
pub mod error;
pub mod mapping;
pub mod types;
pub mod wire;

pub use connector::GoogleAdsBulkClient;
pub use error::{GoogleAdsError, Result};
pub use mapping::GoogleAdsPayloadMapper;
