//! # Job Poller
//!
//! Drives a [`BatchJob`] from `PendingResult` to a terminal status.
//!
//! Every poll counts as an attempt, whatever the remote answers, so the
//! attempt ceiling is reached in bounded time:
//!
//! | Remote state         | Result |
//! |----------------------|--------|
//! | Pending              | `PendingCancellation`, alert, items errored |
//! | Running              | rescheduled with exponential backoff; `Error` once attempts exceed the ceiling |
//! | Unknown, Unspecified | `Error`, alert, items errored |
//! | Done                 | results reconciled and committed; `Complete` if every item is accounted for, else `Error` |
//!
//! Transport failures while polling or fetching results are treated like
//! `Running`. Polling a job that is no longer `PendingResult` is a
//! consistency defect upstream: it is tolerated a few times, then reported
//! as [`BulkError::UnexpectedJobState`].
//!
//! Item writes always precede the job row update. If a store write fails the
//! job stays `PendingResult` and the next poll repeats the work; the commit
//! is idempotent, so a repeated `Done` converges on the same local state.
//!
//! Abandoned remote jobs are not cancelled remotely.

use crate::committer::{CommitSummary, LocalStateCommitter};
use crate::coordinator::BulkSyncDeps;
use crate::job::{BatchJob, BatchJobStatus};
use crate::operation::ResolutionContext;
use crate::reconciler::{Reconciliation, ResultReconciler};
use crate::remote::{BulkMutationApi, RemoteJobState};
use crate::repository::BatchJobRepository;
use crate::{BulkError, Result};
use bridge_traits::alert::{Alert, AlertSeverity, NotificationSink};
use bridge_traits::time::Clock;
use core_catalog::{CampaignRepository, ConfirmedRepository, QueueRepository};
use core_runtime::config::BulkSyncConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const ALERT_SOURCE: &str = "job_poller";

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Still running remotely; polled again at `next_poll_at`
    Pending { attempts: u32, next_poll_at: i64 },
    /// Accepted remotely but never started
    Stalled,
    /// Ended in `Error` without results
    Failed { reason: String },
    /// Results were reconciled and committed
    Reconciled {
        reconciliation: Reconciliation,
        summary: CommitSummary,
        status: BatchJobStatus,
    },
    /// The job was no longer pending; nothing was done
    Ignored { status: BatchJobStatus },
}

pub struct JobPoller {
    remote: Arc<dyn BulkMutationApi>,
    jobs: Arc<dyn BatchJobRepository>,
    queue: Arc<dyn QueueRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    confirmed: Arc<dyn ConfirmedRepository>,
    reconciler: ResultReconciler,
    committer: LocalStateCommitter,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    config: BulkSyncConfig,
}

impl JobPoller {
    pub fn new(deps: &BulkSyncDeps, config: BulkSyncConfig) -> Self {
        Self {
            remote: deps.remote.clone(),
            jobs: deps.jobs.clone(),
            queue: deps.queue.clone(),
            campaigns: deps.campaigns.clone(),
            confirmed: deps.confirmed.clone(),
            reconciler: ResultReconciler::new(deps.remote.clone()),
            committer: LocalStateCommitter::new(
                deps.queue.clone(),
                deps.confirmed.clone(),
                deps.errors.clone(),
                deps.classifier.clone(),
                deps.clock.clone(),
            ),
            clock: deps.clock.clone(),
            notifier: deps.notifier.clone(),
            config,
        }
    }

    /// `base × 2^attempts`, capped.
    pub fn next_poll_delay(&self, attempts: u32) -> Duration {
        let cap = self.config.poll_backoff_cap;
        2u32.checked_pow(attempts)
            .and_then(|factor| self.config.poll_backoff_base.checked_mul(factor))
            .map_or(cap, |delay| delay.min(cap))
    }

    /// Polls the job once and persists the result.
    #[instrument(skip(self, job), fields(job_id = %job.id, attempts = job.attempts))]
    pub async fn poll(&self, job: &mut BatchJob) -> Result<PollOutcome> {
        let now = self.clock.unix_timestamp();
        job.record_attempt(now);

        if job.status != BatchJobStatus::PendingResult {
            return self.handle_unexpected_state(job).await;
        }

        let status = match self
            .remote
            .poll_status(&job.account_id, &job.remote.job_id)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Status poll failed, treating job as running");
                return self.keep_waiting(job).await;
            }
        };
        debug!(
            state = status.state.as_str(),
            operations = ?status.operation_count,
            executed = ?status.executed_operation_count,
            "Polled remote job"
        );

        match status.state {
            RemoteJobState::Pending => self.stall(job).await,
            RemoteJobState::Running => self.keep_waiting(job).await,
            RemoteJobState::Unknown | RemoteJobState::Unspecified => {
                let reason = format!("Remote reported job state {}", status.state.as_str());
                self.fail(job, reason).await
            }
            RemoteJobState::Done => self.finish(job).await,
        }
    }

    async fn handle_unexpected_state(&self, job: &mut BatchJob) -> Result<PollOutcome> {
        self.jobs.update(job).await?;
        if job.attempts > self.config.unexpected_state_attempt_limit {
            error!(status = %job.status, "Polled a job that is no longer pending");
            self.notifier
                .notify(
                    Alert::new(
                        AlertSeverity::Critical,
                        ALERT_SOURCE,
                        "Batch job polled outside PendingResult",
                    )
                    .with_field("job_id", job.id)
                    .with_field("status", job.status)
                    .with_field("attempts", job.attempts),
                )
                .await;
            return Err(BulkError::UnexpectedJobState {
                job_id: job.id.to_string(),
                status: job.status.to_string(),
                attempts: job.attempts,
            });
        }
        warn!(status = %job.status, "Ignoring poll of a job that is no longer pending");
        Ok(PollOutcome::Ignored { status: job.status })
    }

    async fn keep_waiting(&self, job: &mut BatchJob) -> Result<PollOutcome> {
        if job.attempts > self.config.max_poll_attempts {
            let reason = format!(
                "Remote job still running after {} polls",
                self.config.max_poll_attempts
            );
            return self.fail(job, reason).await;
        }

        let now = self.clock.unix_timestamp();
        let delay = i64::try_from(self.next_poll_delay(job.attempts).as_secs()).unwrap_or(i64::MAX);
        job.schedule(now.saturating_add(delay), now)?;
        self.jobs.update(job).await?;

        debug!(next_poll_at = job.next_poll_at, "Job still running");
        Ok(PollOutcome::Pending {
            attempts: job.attempts,
            next_poll_at: job.next_poll_at,
        })
    }

    async fn stall(&self, job: &mut BatchJob) -> Result<PollOutcome> {
        job.mark_stalled(self.clock.unix_timestamp())?;
        self.committer
            .mark_items_failed(job, "batch job was accepted remotely but never started")
            .await?;
        self.jobs.update(job).await?;

        warn!("Remote job never started, marked pending cancellation");
        self.notifier
            .notify(
                Alert::new(AlertSeverity::Warning, ALERT_SOURCE, "Batch job stalled")
                    .with_field("job_id", job.id)
                    .with_field("remote_job_id", &job.remote.job_id)
                    .with_field("attempts", job.attempts),
            )
            .await;
        Ok(PollOutcome::Stalled)
    }

    async fn fail(&self, job: &mut BatchJob, reason: String) -> Result<PollOutcome> {
        job.fail(reason.clone(), self.clock.unix_timestamp())?;
        self.committer.mark_items_failed(job, &reason).await?;
        self.jobs.update(job).await?;

        error!(reason = %reason, "Batch job failed");
        self.notifier
            .notify(
                Alert::new(AlertSeverity::Error, ALERT_SOURCE, "Batch job failed")
                    .with_field("job_id", job.id)
                    .with_field("remote_job_id", &job.remote.job_id)
                    .with_field("reason", &reason),
            )
            .await;
        Ok(PollOutcome::Failed { reason })
    }

    async fn finish(&self, job: &mut BatchJob) -> Result<PollOutcome> {
        let results = match self
            .remote
            .fetch_results(&job.account_id, &job.remote.job_id)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Fetching results failed, retrying later");
                return self.keep_waiting(job).await;
            }
        };

        let ctx = ResolutionContext::load(
            &job.account_id,
            self.campaigns.as_ref(),
            self.confirmed.as_ref(),
        )
        .await?;
        let items = self.queue.find_by_ids(job.item_ids()).await?;

        let reconciliation = match self.reconciler.reconcile(job, &items, &results, &ctx).await {
            Ok(rec) => rec,
            Err(BulkError::Remote(e)) => {
                warn!(error = %e, "Fallback lookup failed, retrying later");
                return self.keep_waiting(job).await;
            }
            Err(e) => return Err(e),
        };
        let summary = self.committer.commit(job, &items, &reconciliation).await?;

        let now = self.clock.unix_timestamp();
        if reconciliation.is_complete() {
            job.complete(now)?;
            self.jobs.update(job).await?;
            info!(
                resolved = reconciliation.resolved.len(),
                failed = reconciliation.failed.len(),
                settled = reconciliation.settled.len(),
                path = reconciliation.path.as_str(),
                "Batch job complete"
            );
        } else {
            let reason = format!(
                "{} of {} items could not be reconciled",
                reconciliation.unaccounted.len(),
                reconciliation.submitted
            );
            job.fail(reason.clone(), now)?;
            self.jobs.update(job).await?;
            error!(reason = %reason, "Batch job reconciliation incomplete");
            self.notifier
                .notify(
                    Alert::new(
                        AlertSeverity::Error,
                        ALERT_SOURCE,
                        "Batch job results could not be fully reconciled",
                    )
                    .with_field("job_id", job.id)
                    .with_field("reason", &reason),
                )
                .await;
        }

        Ok(PollOutcome::Reconciled {
            status: job.status,
            reconciliation,
            summary,
        })
    }
}

