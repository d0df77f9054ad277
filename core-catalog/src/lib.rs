//! # Catalog Module
//!
//! Local persistence for the bulk sync pipeline.
//!
//! ## Overview
//!
//! This crate owns the SQLite schema and the repositories the pipeline reads
//! and writes:
//! - **Queue Store**: pending changes per content type ([`QueueRepository`])
//! - **Confirmed Store**: entities the remote platform acknowledged
//!   ([`ConfirmedRepository`])
//! - **Error Log**: per-item remote failures ([`ErrorLogRepository`])
//! - **Campaign directory**: local to remote campaign ids
//!   ([`CampaignRepository`])
//!
//! Batch job persistence lives next to the job state machine in `core-bulk`
//! but shares the schema and pool created here.

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{CatalogError, Result};
pub use models::{
    Action, Campaign, ConfirmedEntity, ErrorRecord, ExemptionKey, ItemFailure, NaturalKey,
    OperandType, QueueItem, QueueItemId, QueueScope,
};
pub use repositories::{
    CampaignRepository, ConfirmedRepository, ErrorLogRepository, QueueRepository,
    SqliteCampaignRepository, SqliteConfirmedRepository, SqliteErrorLogRepository,
    SqliteQueueRepository,
};
