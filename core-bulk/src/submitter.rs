//! # Batch Submitter
//!
//! Creates a remote job for an [`OperationPlan`], uploads its operations and
//! starts execution.
//!
//! ```text
//! create_job ──fail──► every submittable item of the account errored, no local job
//!     │
//!     ▼
//! persist BatchJob (PendingResult, attempts 0, due now + grace)
//!     │
//!     ▼
//! add_operations × ⌈n / limit⌉ (token chained) ─► run
//!     │ any failure
//!     ▼
//! BatchJob = Error, items errored, alert; never retried
//! ```

use crate::job::BatchJob;
use crate::operation::OperationPlan;
use crate::remote::{BulkMutationApi, JobRef};
use crate::repository::BatchJobRepository;
use crate::{BulkError, Result};
use bridge_traits::alert::{Alert, AlertSeverity, NotificationSink};
use bridge_traits::time::Clock;
use core_catalog::{QueueRepository, QueueScope};
use core_runtime::config::BulkSyncConfig;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const ALERT_SOURCE: &str = "batch_submitter";

/// What a submission attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Nothing to submit
    Empty,
    /// The job is loaded, running and due for polling
    Submitted { job: BatchJob },
    /// The remote job could not be created; no local job exists
    CreateFailed { message: String, items_marked: u64 },
    /// Upload or run failed after the job was persisted
    UploadFailed { job: BatchJob, message: String },
}

pub struct BatchSubmitter {
    remote: Arc<dyn BulkMutationApi>,
    jobs: Arc<dyn BatchJobRepository>,
    queue: Arc<dyn QueueRepository>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    config: BulkSyncConfig,
}

impl BatchSubmitter {
    pub fn new(
        remote: Arc<dyn BulkMutationApi>,
        jobs: Arc<dyn BatchJobRepository>,
        queue: Arc<dyn QueueRepository>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        config: BulkSyncConfig,
    ) -> Self {
        Self {
            remote,
            jobs,
            queue,
            clock,
            notifier,
            config,
        }
    }

    #[instrument(skip(self, plan), fields(scope = %scope, items = plan.len()))]
    pub async fn submit(&self, scope: &QueueScope, plan: &OperationPlan) -> Result<SubmissionOutcome> {
        if plan.scope() != scope {
            return Err(BulkError::PlanInvariant(format!(
                "plan built for {} submitted as {}",
                plan.scope(),
                scope
            )));
        }
        if plan.is_empty() {
            return Ok(SubmissionOutcome::Empty);
        }
        if plan.physical_len() != plan.len() * plan.ratio() {
            return Err(BulkError::PlanInvariant(format!(
                "{} operations for {} items at ratio {}",
                plan.physical_len(),
                plan.len(),
                plan.ratio()
            )));
        }

        let remote_job = match self.remote.create_job(&scope.account_id).await {
            Ok(job) => job,
            Err(e) => return self.handle_create_failure(scope, e.to_string()).await,
        };

        let now = self.clock.unix_timestamp();
        let grace = i64::try_from(self.config.poll_grace_period.as_secs()).unwrap_or(i64::MAX);
        let mut job = BatchJob::new(
            scope,
            remote_job,
            plan.item_ids(),
            plan.physical_len(),
            now,
            now.saturating_add(grace),
        );
        self.jobs.insert(&job).await?;
        self.queue
            .assign_job(job.item_ids(), &job.id.as_str(), now)
            .await?;

        if let Err(message) = self.upload_and_run(&job.remote, plan).await {
            error!(job_id = %job.id, error = %message, "Batch upload failed");
            let now = self.clock.unix_timestamp();
            job.fail(message.clone(), now)?;
            // Items first: if the job row write fails the poller retires the job later.
            self.queue
                .set_error_for_ids(job.item_ids(), &message, now)
                .await?;
            self.jobs.update(&job).await?;
            self.notifier
                .notify(
                    Alert::new(AlertSeverity::Error, ALERT_SOURCE, "Batch job upload failed")
                        .with_field("job_id", job.id)
                        .with_field("scope", scope)
                        .with_field("error", &message),
                )
                .await;
            return Ok(SubmissionOutcome::UploadFailed { job, message });
        }

        info!(
            job_id = %job.id,
            remote_job_id = %job.remote.job_id,
            operations = job.operation_count,
            "Submitted batch job"
        );
        Ok(SubmissionOutcome::Submitted { job })
    }

    /// Uploads every chunk in order, then starts the job.
    async fn upload_and_run(
        &self,
        remote_job: &JobRef,
        plan: &OperationPlan,
    ) -> std::result::Result<(), String> {
        let operations = plan.operations();
        let limit = self.config.max_operations_per_upload.max(1);
        let mut token: Option<String> = None;

        for (chunk_index, chunk) in operations.chunks(limit).enumerate() {
            let next = self
                .remote
                .add_operations(remote_job, chunk, token.as_deref())
                .await
                .map_err(|e| format!("Upload of chunk {} failed: {}", chunk_index + 1, e))?;
            token = Some(next);
        }

        self.remote
            .run(remote_job)
            .await
            .map_err(|e| format!("Starting the batch job failed: {}", e))?;
        Ok(())
    }

    async fn handle_create_failure(
        &self,
        scope: &QueueScope,
        message: String,
    ) -> Result<SubmissionOutcome> {
        warn!(scope = %scope, error = %message, "Remote job creation failed");
        let items_marked = self
            .queue
            .mark_account_errors(&scope.account_id, &message, self.clock.unix_timestamp())
            .await?;
        self.notifier
            .notify(
                Alert::new(AlertSeverity::Error, ALERT_SOURCE, "Batch job creation failed")
                    .with_field("scope", scope)
                    .with_field("error", &message)
                    .with_field("items_marked", items_marked),
            )
            .await;
        Ok(SubmissionOutcome::CreateFailed {
            message,
            items_marked,
        })
    }
}
