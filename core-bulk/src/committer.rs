//! # Local State Committer
//!
//! Applies a [`Reconciliation`] to the local stores.
//!
//! - Resolved adds and updates: the external id is written onto the queue
//!   row and the entity is mirrored into the Confirmed Store, replacing any
//!   row for the same remote entity.
//! - Resolved deletes: confirmed rows carrying the external id are removed.
//! - Failures: an error record (raw message plus category) is appended and
//!   the queue row keeps the error so it is excluded from future batches.
//!   An update rejected as identical and redundant is a no-op change the
//!   remote already holds; it is committed like a resolved update and leaves
//!   no error record.
//! - Unaccounted items get an "unreconciled" marker without an error record.
//!
//! Every step is idempotent and the queue rows of resolved items are removed
//! last, in one statement batch. A commit interrupted by a store failure can
//! therefore be repeated from the same results: items already removed come
//! back from the reconciler as settled.

use crate::classifier::{ErrorCategory, ErrorClassifier};
use crate::job::BatchJob;
use crate::reconciler::Reconciliation;
use crate::Result;
use bridge_traits::time::Clock;
use core_catalog::{
    Action, ConfirmedEntity, ConfirmedRepository, ErrorLogRepository, ErrorRecord, ItemFailure,
    QueueItem, QueueItemId, QueueRepository,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Error marker for items reconciliation could not account for.
pub const UNRECONCILED_MESSAGE: &str =
    "unreconciled: the remote job finished without a verifiable outcome for this item";

/// Counts of what a commit changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    /// Adds and updates mirrored into the Confirmed Store
    pub promoted: usize,
    /// Deletes applied locally
    pub removed: usize,
    /// Items left with an error and an error record
    pub failed: usize,
    /// Updates rejected as identical and redundant, committed as successes
    pub redundant: usize,
    /// Items marked unreconciled
    pub unreconciled: usize,
}

pub struct LocalStateCommitter {
    queue: Arc<dyn QueueRepository>,
    confirmed: Arc<dyn ConfirmedRepository>,
    errors: Arc<dyn ErrorLogRepository>,
    classifier: Arc<dyn ErrorClassifier>,
    clock: Arc<dyn Clock>,
}

impl LocalStateCommitter {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        confirmed: Arc<dyn ConfirmedRepository>,
        errors: Arc<dyn ErrorLogRepository>,
        classifier: Arc<dyn ErrorClassifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            confirmed,
            errors,
            classifier,
            clock,
        }
    }

    #[instrument(skip(self, job, items, rec), fields(job_id = %job.id))]
    pub async fn commit(
        &self,
        job: &BatchJob,
        items: &[QueueItem],
        rec: &Reconciliation,
    ) -> Result<CommitSummary> {
        let now = self.clock.unix_timestamp();
        let by_id: HashMap<QueueItemId, &QueueItem> = items.iter().map(|i| (i.id, i)).collect();
        let mut summary = CommitSummary::default();

        let mut confirmed_pairs: Vec<(QueueItemId, String)> = Vec::new();
        let mut deleted_pairs: Vec<(QueueItemId, String)> = Vec::new();
        for (id, external_id) in &rec.resolved {
            match job.action {
                Action::Add | Action::Update => confirmed_pairs.push((*id, external_id.clone())),
                Action::Delete => deleted_pairs.push((*id, external_id.clone())),
            }
        }

        let mut error_records = Vec::new();
        let mut item_failures = Vec::new();
        for (id, failure) in &rec.failed {
            let category = self
                .classifier
                .classify(failure.code.as_deref(), &failure.message);
            let item = by_id.get(id);

            if job.action == Action::Update && category == ErrorCategory::IdenticalAndRedundant {
                if let Some(external_id) = item.and_then(|i| i.external_id.clone()) {
                    confirmed_pairs.push((*id, external_id));
                    summary.redundant += 1;
                    continue;
                }
            }

            match item {
                Some(item) => error_records.push(ErrorRecord {
                    id: None,
                    operand: job.operand,
                    account_id: item.account_id.clone(),
                    campaign_id: item.campaign_id.clone(),
                    queue_item_id: *id,
                    batch_job_id: Some(job.id.as_str()),
                    message: failure.message.clone(),
                    category: category.as_str().to_string(),
                    created_at: now,
                }),
                None => warn!(item_id = %id, "Failed item has no queue row, no error record kept"),
            }
            item_failures.push((
                *id,
                ItemFailure::new(failure.message.clone())
                    .with_category(category.as_str())
                    .with_policy_findings(failure.exemptible.clone()),
            ));
        }

        if !confirmed_pairs.is_empty() {
            self.queue.set_external_ids(&confirmed_pairs, now).await?;
            let entities: Vec<ConfirmedEntity> = confirmed_pairs
                .iter()
                .filter_map(|(id, external_id)| {
                    by_id
                        .get(id)
                        .map(|item| ConfirmedEntity::from_queue_item(item, external_id, now))
                })
                .collect();
            self.confirmed.upsert_many(&entities).await?;
            summary.promoted = confirmed_pairs.len() - summary.redundant;
        }

        if !deleted_pairs.is_empty() {
            let external_ids: Vec<String> =
                deleted_pairs.iter().map(|(_, ext)| ext.clone()).collect();
            self.confirmed
                .remove_by_external_ids(job.operand, &external_ids)
                .await?;
            summary.removed = deleted_pairs.len();
        }

        if !item_failures.is_empty() {
            self.errors.append(&error_records).await?;
            self.queue.set_errors(&item_failures, now).await?;
            summary.failed = item_failures.len();
        }

        if !rec.unaccounted.is_empty() {
            self.queue
                .set_error_for_ids(&rec.unaccounted, UNRECONCILED_MESSAGE, now)
                .await?;
            summary.unreconciled = rec.unaccounted.len();
        }

        let finished: Vec<QueueItemId> = confirmed_pairs
            .iter()
            .chain(&deleted_pairs)
            .map(|(id, _)| *id)
            .collect();
        if !finished.is_empty() {
            self.queue.remove_by_ids(&finished).await?;
        }

        info!(
            promoted = summary.promoted,
            removed = summary.removed,
            failed = summary.failed,
            redundant = summary.redundant,
            unreconciled = summary.unreconciled,
            settled = rec.settled.len(),
            "Committed batch job results"
        );
        Ok(summary)
    }

    /// Sets `message` on every item of a job that ended without results.
    pub async fn mark_items_failed(&self, job: &BatchJob, message: &str) -> Result<u64> {
        let now = self.clock.unix_timestamp();
        let marked = self
            .queue
            .set_error_for_ids(job.item_ids(), message, now)
            .await?;
        warn!(job_id = %job.id, items = marked, "Marked job items failed");
        Ok(marked)
    }
}
