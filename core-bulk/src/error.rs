use crate::remote::RemoteError;
use core_catalog::CatalogError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BulkError {
    #[error("Batch job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error(
        "Job {job_id} polled in status {status} after {attempts} attempts; \
         only pending jobs may be polled"
    )]
    UnexpectedJobState {
        job_id: String,
        status: String,
        attempts: u32,
    },

    #[error("Submission already in progress for scope {scope}")]
    ScopeBusy { scope: String },

    #[error("Operation plan invariant violated: {0}")]
    PlanInvariant(String),

    #[error("Remote API error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for BulkError {
    fn from(e: sqlx::Error) -> Self {
        BulkError::Database(e.to_string())
    }
}

impl From<core_runtime::Error> for BulkError {
    fn from(e: core_runtime::Error) -> Self {
        BulkError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BulkError>;
