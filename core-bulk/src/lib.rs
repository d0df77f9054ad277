//! # Bulk Mutation Pipeline
//!
//! Turns a backlog of pending ad content changes into asynchronous remote
//! bulk jobs and reconciles the results back onto the backlog.
//!
//! ## Overview
//!
//! One fixed pipeline shape (submit → poll → reconcile → commit) serves ads,
//! ad groups, keywords and extensions. Each run is driven by an external
//! scheduler through [`BulkSyncCoordinator`].
//!
//! ## Components
//!
//! - **Operation Builder** (`operation`): queue items to ordered, attributable operations
//! - **Batch Submitter** (`submitter`): remote job creation, chunked upload, run
//! - **Job Poller** (`poller`): bounded exponential backoff over the job state machine
//! - **Result Reconciler** (`reconciler`): positional mapping with a natural-key fallback
//! - **Local State Committer** (`committer`): promotes, removes or errors queue items
//! - **Error Classifier** (`classifier`): remote failures to short categories
//! - **Batch Job** (`job`, `repository`): local job record and its persistence
//! - **Remote API** (`remote`): the vendor-neutral bulk mutation contract

pub mod classifier;
pub mod committer;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod operation;
pub mod poller;
pub mod reconciler;
pub mod remote;
pub mod repository;
pub mod submitter;

pub use classifier::{DefaultErrorClassifier, ErrorCategory, ErrorClassifier};
pub use committer::{CommitSummary, LocalStateCommitter, UNRECONCILED_MESSAGE};
pub use coordinator::{BulkSyncCoordinator, BulkSyncDeps, ScopeSubmission};
pub use error::{BulkError, Result};
pub use job::{BatchJob, BatchJobId, BatchJobStatus};
pub use operation::{
    operations_per_item, BuildAbort, MappingContext, MappingOutcome, Operation, OperationBuilder,
    OperationKind, OperationPlan, PayloadMapper, PlanEntry, ResolutionContext, ResourceKind,
    SkippedItem, TemporaryIds,
};
pub use poller::{JobPoller, PollOutcome};
pub use reconciler::{Reconciliation, ReconciliationPath, ResultReconciler};
pub use remote::{
    BulkMutationApi, IndexedOutcome, JobRef, OperationFailure, OperationOutcome, RemoteEntity,
    RemoteError, RemoteJobState, RemoteJobStatus, RunHandle,
};
pub use repository::{BatchJobRepository, SqliteBatchJobRepository};
pub use submitter::{BatchSubmitter, SubmissionOutcome};
