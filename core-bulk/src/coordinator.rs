//! # Bulk Sync Coordinator
//!
//! Entry points for the external scheduler and for operators.
//!
//! ## Overview
//!
//! The coordinator wires the pipeline stages together:
//!
//! ```text
//! Queue Store ─► OperationBuilder ─► BatchSubmitter ─► (remote job)
//!                                                         │
//! Queue / Confirmed Store ◄─ LocalStateCommitter ◄─ ResultReconciler ◄─ JobPoller
//! ```
//!
//! - [`submit_pending`](BulkSyncCoordinator::submit_pending) walks every
//!   `(operand, action)` scope of an account and submits what is pending.
//! - [`process_due_jobs`](BulkSyncCoordinator::process_due_jobs) polls every
//!   job whose next poll is due.
//! - Operator calls clear errors, grant policy exemptions, list failures and
//!   prune old terminal jobs.
//!
//! Submission for one scope is serialized in-process: a second concurrent
//! submission for a busy scope returns [`BulkError::ScopeBusy`]. Items of a
//! live job carry its id and are never selected again, so separate processes
//! cannot re-submit in-flight items either.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let deps = BulkSyncDeps::sqlite(pool, remote, mapper, notifier);
//! let coordinator = BulkSyncCoordinator::new(deps, BulkSyncConfig::from_env()?)?
//!     .with_event_bus(bus.clone());
//!
//! coordinator.submit_pending("1234567890").await?;
//! for (job_id, outcome) in coordinator.process_due_jobs().await? {
//!     println!("{job_id}: {outcome:?}");
//! }
//! ```

use crate::classifier::{DefaultErrorClassifier, ErrorClassifier};
use crate::job::{BatchJob, BatchJobId, BatchJobStatus};
use crate::operation::{BuildAbort, OperationBuilder, PayloadMapper, ResolutionContext};
use crate::poller::{JobPoller, PollOutcome};
use crate::remote::BulkMutationApi;
use crate::repository::{BatchJobRepository, SqliteBatchJobRepository};
use crate::submitter::{BatchSubmitter, SubmissionOutcome};
use crate::{BulkError, Result};
use bridge_traits::alert::NotificationSink;
use bridge_traits::time::{Clock, SystemClock};
use core_catalog::{
    Action, CampaignRepository, ConfirmedRepository, ErrorLogRepository, ErrorRecord,
    OperandType, QueueItem, QueueItemId, QueueRepository, QueueScope, SqliteCampaignRepository,
    SqliteConfirmedRepository, SqliteErrorLogRepository, SqliteQueueRepository,
};
use core_runtime::config::BulkSyncConfig;
use core_runtime::events::{BulkEvent, EventBus};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Collaborators injected into the pipeline.
#[derive(Clone)]
pub struct BulkSyncDeps {
    pub remote: Arc<dyn BulkMutationApi>,
    pub mapper: Arc<dyn PayloadMapper>,
    pub queue: Arc<dyn QueueRepository>,
    pub jobs: Arc<dyn BatchJobRepository>,
    pub confirmed: Arc<dyn ConfirmedRepository>,
    pub errors: Arc<dyn ErrorLogRepository>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl BulkSyncDeps {
    /// SQLite stores on `pool`, the system clock and the default classifier.
    pub fn sqlite(
        pool: SqlitePool,
        remote: Arc<dyn BulkMutationApi>,
        mapper: Arc<dyn PayloadMapper>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            remote,
            mapper,
            queue: Arc::new(SqliteQueueRepository::new(pool.clone())),
            jobs: Arc::new(SqliteBatchJobRepository::new(pool.clone())),
            confirmed: Arc::new(SqliteConfirmedRepository::new(pool.clone())),
            errors: Arc::new(SqliteErrorLogRepository::new(pool.clone())),
            campaigns: Arc::new(SqliteCampaignRepository::new(pool)),
            classifier: Arc::new(DefaultErrorClassifier::new()),
            clock: Arc::new(SystemClock),
            notifier,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }
}

/// Result of one scope submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeSubmission {
    /// No pending items in the scope
    Idle,
    Submitted(SubmissionOutcome),
    /// The batch referenced unknown campaigns; their queue rows were dropped
    Purged {
        campaign_ids: Vec<String>,
        removed: u64,
    },
}

pub struct BulkSyncCoordinator {
    deps: BulkSyncDeps,
    config: BulkSyncConfig,
    builder: OperationBuilder,
    submitter: BatchSubmitter,
    poller: JobPoller,
    events: Option<EventBus>,
    scope_locks: Mutex<HashMap<QueueScope, Arc<tokio::sync::Mutex<()>>>>,
}

impl BulkSyncCoordinator {
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid
    pub fn new(deps: BulkSyncDeps, config: BulkSyncConfig) -> Result<Self> {
        config.validate()?;

        let builder = OperationBuilder::new(deps.mapper.clone());
        let submitter = BatchSubmitter::new(
            deps.remote.clone(),
            deps.jobs.clone(),
            deps.queue.clone(),
            deps.clock.clone(),
            deps.notifier.clone(),
            config.clone(),
        );
        let poller = JobPoller::new(&deps, config.clone());

        Ok(Self {
            deps,
            config,
            builder,
            submitter,
            poller,
            events: None,
            scope_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn config(&self) -> &BulkSyncConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    /// Submits every non-empty scope of the account.
    ///
    /// Stops early when remote job creation fails, since that error has been
    /// written onto every submittable item of the account.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn submit_pending(
        &self,
        account_id: &str,
    ) -> Result<Vec<(QueueScope, ScopeSubmission)>> {
        let mut report = Vec::new();

        for operand in OperandType::ALL {
            for action in Action::ALL {
                let scope = QueueScope::new(account_id, operand, action);
                if self.deps.queue.count_pending(&scope).await? == 0 {
                    continue;
                }

                let submission = match self.submit_scope(&scope).await {
                    Ok(submission) => submission,
                    Err(BulkError::ScopeBusy { .. }) => {
                        debug!(scope = %scope, "Scope busy, skipping");
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let create_failed = matches!(
                    submission,
                    ScopeSubmission::Submitted(SubmissionOutcome::CreateFailed { .. })
                );
                report.push((scope, submission));
                if create_failed {
                    warn!("Remote job creation failed, skipping remaining scopes");
                    return Ok(report);
                }
            }
        }

        Ok(report)
    }

    /// Builds and submits one batch for `scope`.
    ///
    /// # Errors
    ///
    /// Returns `ScopeBusy` if another submission for the scope is running
    #[instrument(skip(self), fields(scope = %scope))]
    pub async fn submit_scope(&self, scope: &QueueScope) -> Result<ScopeSubmission> {
        let lock = self.scope_lock(scope);
        let _guard = lock.try_lock_owned().map_err(|_| BulkError::ScopeBusy {
            scope: scope.to_string(),
        })?;

        let items = self
            .deps
            .queue
            .find_pending(scope, self.config.batch_size)
            .await?;
        if items.is_empty() {
            return Ok(ScopeSubmission::Idle);
        }

        let ctx = ResolutionContext::load(
            &scope.account_id,
            self.deps.campaigns.as_ref(),
            self.deps.confirmed.as_ref(),
        )
        .await?;

        let plan = match self.builder.build(scope, &items, &ctx) {
            Ok(plan) => plan,
            Err(BuildAbort::UnknownCampaigns { campaign_ids }) => {
                return self.purge(scope, campaign_ids).await;
            }
        };
        if !plan.skipped().is_empty() {
            info!(skipped = plan.skipped().len(), "Skipped unmappable items");
        }

        let outcome = self.submitter.submit(scope, &plan).await?;
        self.emit_submission(scope, &outcome);
        Ok(ScopeSubmission::Submitted(outcome))
    }

    async fn purge(&self, scope: &QueueScope, campaign_ids: Vec<String>) -> Result<ScopeSubmission> {
        let removed = self
            .deps
            .queue
            .remove_by_campaigns(&campaign_ids, Some(scope.operand))
            .await?;
        warn!(
            campaigns = ?campaign_ids,
            removed,
            "Purged queue rows of unknown campaigns"
        );
        self.emit(BulkEvent::ScopePurged {
            account_id: scope.account_id.clone(),
            campaign_ids: campaign_ids.clone(),
            removed,
        });
        Ok(ScopeSubmission::Purged {
            campaign_ids,
            removed,
        })
    }

    fn scope_lock(&self, scope: &QueueScope) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .scope_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(scope.clone()).or_default().clone()
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    /// Polls every due job once; one job's failure does not stop the others.
    #[instrument(skip(self))]
    pub async fn process_due_jobs(&self) -> Result<Vec<(BatchJobId, Result<PollOutcome>)>> {
        let now = self.deps.clock.unix_timestamp();
        let due = self.deps.jobs.find_due(now).await?;
        debug!(jobs = due.len(), "Processing due batch jobs");

        let mut outcomes = Vec::with_capacity(due.len());
        for mut job in due {
            let outcome = self.poll_job(&mut job).await;
            outcomes.push((job.id, outcome));
        }
        Ok(outcomes)
    }

    /// Polls one job regardless of its schedule.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn process_job(&self, job_id: &BatchJobId) -> Result<PollOutcome> {
        let mut job = self.get_job(job_id).await?;
        self.poll_job(&mut job).await
    }

    pub async fn get_job(&self, job_id: &BatchJobId) -> Result<BatchJob> {
        self.deps
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| BulkError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    async fn poll_job(&self, job: &mut BatchJob) -> Result<PollOutcome> {
        let outcome = self.poller.poll(job).await;
        match &outcome {
            Ok(outcome) => self.emit_poll(job, outcome),
            Err(e) => self.emit(BulkEvent::JobFailed {
                job_id: job.id.to_string(),
                reason: e.to_string(),
            }),
        }
        outcome
    }

    // ------------------------------------------------------------------------
    // Operator controls
    // ------------------------------------------------------------------------

    /// Acknowledges an item's policy findings and releases it for resubmission.
    pub async fn grant_exemption(&self, item_id: &QueueItemId) -> Result<bool> {
        let now = self.deps.clock.unix_timestamp();
        Ok(self.deps.queue.grant_exemption(item_id, now).await?)
    }

    /// Clears an item's error so the next scan selects it again.
    pub async fn clear_error(&self, item_id: &QueueItemId) -> Result<bool> {
        let now = self.deps.clock.unix_timestamp();
        Ok(self.deps.queue.clear_error(item_id, now).await?)
    }

    /// Queue items of the account that carry an error.
    pub async fn list_errors(&self, account_id: &str) -> Result<Vec<QueueItem>> {
        Ok(self.deps.queue.find_errored(account_id).await?)
    }

    /// Error records logged against a campaign.
    pub async fn error_history(&self, campaign_id: &str) -> Result<Vec<ErrorRecord>> {
        Ok(self.deps.errors.find_by_campaign(campaign_id).await?)
    }

    /// Deletes terminal jobs older than the retention window.
    pub async fn prune_terminal_jobs(&self) -> Result<u64> {
        let retention =
            i64::try_from(self.config.terminal_job_retention.as_secs()).unwrap_or(i64::MAX);
        let before = self.deps.clock.unix_timestamp().saturating_sub(retention);
        let pruned = self.deps.jobs.prune_terminal(before).await?;
        info!(pruned, "Pruned terminal batch jobs");
        Ok(pruned)
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    fn emit(&self, event: BulkEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event).ok();
        }
    }

    fn emit_submission(&self, scope: &QueueScope, outcome: &SubmissionOutcome) {
        match outcome {
            SubmissionOutcome::Empty => {}
            SubmissionOutcome::Submitted { job } => self.emit(BulkEvent::JobSubmitted {
                job_id: job.id.to_string(),
                account_id: scope.account_id.clone(),
                operand: scope.operand.to_string(),
                action: scope.action.to_string(),
                item_count: job.item_ids().len(),
                operation_count: job.operation_count,
            }),
            SubmissionOutcome::CreateFailed { message, .. }
            | SubmissionOutcome::UploadFailed { message, .. } => {
                self.emit(BulkEvent::SubmissionFailed {
                    account_id: scope.account_id.clone(),
                    operand: scope.operand.to_string(),
                    action: scope.action.to_string(),
                    message: message.clone(),
                })
            }
        }
    }

    fn emit_poll(&self, job: &BatchJob, outcome: &PollOutcome) {
        let job_id = job.id.to_string();
        match outcome {
            PollOutcome::Pending {
                attempts,
                next_poll_at,
            } => self.emit(BulkEvent::JobPolled {
                job_id,
                attempts: *attempts,
                next_poll_at: *next_poll_at,
            }),
            PollOutcome::Stalled => self.emit(BulkEvent::JobStalled {
                job_id,
                attempts: job.attempts,
            }),
            PollOutcome::Failed { reason } => self.emit(BulkEvent::JobFailed {
                job_id,
                reason: reason.clone(),
            }),
            PollOutcome::Reconciled {
                reconciliation,
                status,
                ..
            } => {
                if *status == BatchJobStatus::Complete {
                    self.emit(BulkEvent::JobCompleted {
                        job_id,
                        resolved: reconciliation.resolved.len(),
                        failed: reconciliation.failed.len(),
                        used_fallback: reconciliation.used_fallback(),
                    });
                } else {
                    self.emit(BulkEvent::JobFailed {
                        job_id,
                        reason: job.error_message.clone().unwrap_or_default(),
                    });
                }
            }
            PollOutcome::Ignored { .. } => {}
        }
    }
}
