//! # Remote Bulk Mutation API
//!
//! Vendor-neutral contract for the asynchronous bulk job protocol:
//!
//! ```text
//! create_job ─► add_operations (chunk 1, no token) ─► add_operations (chunk k+1, token k)
//!            ─► run ─► poll_status … ─► fetch_results
//!                                     └► query_entities (reconciliation fallback only)
//! ```
//!
//! Implementations translate [`Operation`]s into the vendor wire format and
//! vendor responses back into the types here. A concrete implementation for
//! Google Ads lives in `provider-google-ads`.

use crate::operation::Operation;
use async_trait::async_trait;
use core_catalog::{ExemptionKey, OperandType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Handle of a created remote job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    /// Numeric or opaque job id used for status and result lookups
    pub job_id: String,
    /// Fully qualified resource name used for upload and run calls
    pub resource_name: String,
}

impl JobRef {
    pub fn new(job_id: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            resource_name: resource_name.into(),
        }
    }
}

/// Handle of the asynchronous execution started by `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub operation_name: String,
}

/// Remote job state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteJobState {
    /// Accepted but not started
    Pending,
    Running,
    Done,
    /// Reported with a value this client does not recognise
    Unknown,
    /// Reported without a value
    Unspecified,
}

impl RemoteJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteJobState::Pending => "PENDING",
            RemoteJobState::Running => "RUNNING",
            RemoteJobState::Done => "DONE",
            RemoteJobState::Unknown => "UNKNOWN",
            RemoteJobState::Unspecified => "UNSPECIFIED",
        }
    }
}

/// Result of `poll_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobStatus {
    pub state: RemoteJobState,
    pub operation_count: Option<u64>,
    pub executed_operation_count: Option<u64>,
}

impl RemoteJobStatus {
    pub fn new(state: RemoteJobState) -> Self {
        Self {
            state,
            operation_count: None,
            executed_operation_count: None,
        }
    }

    pub fn with_counts(mut self, operation_count: u64, executed: u64) -> Self {
        self.operation_count = Some(operation_count);
        self.executed_operation_count = Some(executed);
        self
    }
}

/// A rejected operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub message: String,
    /// Stable machine code, e.g. `adGroupError.DUPLICATE_ADGROUP_NAME`
    pub code: Option<String>,
    /// Policy violations the operator may exempt on resubmission
    pub exemptible: Vec<ExemptionKey>,
}

impl OperationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            exemptible: Vec::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_exemptible(mut self, keys: Vec<ExemptionKey>) -> Self {
        self.exemptible = keys;
        self
    }
}

/// Outcome of one physical operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Applied; carries the id the platform assigned or touched
    Success { external_id: Option<String> },
    Failure(OperationFailure),
}

/// Outcome keyed by the operation's index in upload order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedOutcome {
    pub index: usize,
    pub outcome: OperationOutcome,
}

impl IndexedOutcome {
    pub fn success(index: usize, external_id: impl Into<String>) -> Self {
        Self {
            index,
            outcome: OperationOutcome::Success {
                external_id: Some(external_id.into()),
            },
        }
    }

    pub fn failure(index: usize, failure: OperationFailure) -> Self {
        Self {
            index,
            outcome: OperationOutcome::Failure(failure),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, OperationOutcome::Failure(_))
    }
}

/// A live remote entity, used to re-identify items by content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntity {
    pub external_id: String,
    pub parent_external_id: String,
    /// Distinguishing content in the same form as the local natural key text
    pub text: String,
}

/// Remote failure, independent of the vendor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The platform rejected the request
    #[error("{message}")]
    Api {
        code: Option<String>,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    /// The response could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn api(message: impl Into<String>) -> Self {
        RemoteError::Api {
            code: None,
            message: message.into(),
        }
    }
}

/// Remote bulk mutation API.
#[async_trait]
pub trait BulkMutationApi: Send + Sync {
    async fn create_job(&self, account_id: &str) -> Result<JobRef, RemoteError>;

    /// Uploads one chunk. Every call after the first must pass the token
    /// returned by the previous call; returns the next token.
    async fn add_operations(
        &self,
        job: &JobRef,
        operations: &[Operation],
        continuation_token: Option<&str>,
    ) -> Result<String, RemoteError>;

    async fn run(&self, job: &JobRef) -> Result<RunHandle, RemoteError>;

    async fn poll_status(&self, account_id: &str, job_id: &str)
        -> Result<RemoteJobStatus, RemoteError>;

    /// Every reported outcome; may be sparse.
    async fn fetch_results(
        &self,
        account_id: &str,
        job_id: &str,
    ) -> Result<Vec<IndexedOutcome>, RemoteError>;

    /// Live entities of `operand` whose parent is one of `parent_external_ids`.
    async fn query_entities(
        &self,
        account_id: &str,
        operand: OperandType,
        parent_external_ids: &[String],
    ) -> Result<Vec<RemoteEntity>, RemoteError>;
}
