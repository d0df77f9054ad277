//! # Result Reconciler
//!
//! Maps per-operation outcomes of a finished job back onto the queue items
//! the operations were built from.
//!
//! ## Primary path
//!
//! When the remote reports exactly one outcome per uploaded operation, each
//! at a distinct in-range index, outcome `i` belongs to logical item
//! `i / ratio`. A logical item fails if any of its operations failed;
//! otherwise its primary (first) operation carries the external id. No
//! remote call is made.
//!
//! ## Fallback path
//!
//! Any other shape means positions cannot be trusted. The reconciler then
//! lists live entities under the affected parents and re-identifies items by
//! natural key:
//!
//! | Action | Resolved when |
//! |--------|---------------|
//! | Add    | an unclaimed entity with the same parent and text exists |
//! | Update | the item's external id is live and carries the item's text |
//! | Delete | the item's external id is no longer live |
//!
//! Reported failures are deduplicated per logical position. If the number of
//! items left unresolved equals the number of distinct failures, they are
//! paired in order; otherwise the leftovers are unaccounted and the job can
//! not complete.
//!
//! ## Settled items
//!
//! A job item whose queue row no longer exists was already committed by an
//! earlier attempt (successes are removed from the queue last) or removed
//! locally. It is reported as settled on either path and needs no commit.

use crate::job::BatchJob;
use crate::operation::ResolutionContext;
use crate::remote::{
    BulkMutationApi, IndexedOutcome, OperationFailure, OperationOutcome, RemoteEntity,
};
use crate::Result;
use core_catalog::{Action, QueueItem, QueueItemId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationPath {
    Positional,
    Fallback,
}

impl ReconciliationPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationPath::Positional => "positional",
            ReconciliationPath::Fallback => "fallback",
        }
    }
}

/// Per-item verdicts for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub path: ReconciliationPath,
    /// Logical items the job carried
    pub submitted: usize,
    pub resolved: Vec<(QueueItemId, String)>,
    pub failed: Vec<(QueueItemId, OperationFailure)>,
    /// Items neither resolved nor attributable to a failure
    pub unaccounted: Vec<QueueItemId>,
    /// Items without a queue row, already committed
    pub settled: Vec<QueueItemId>,
}

impl Reconciliation {
    fn new(path: ReconciliationPath, submitted: usize) -> Self {
        Self {
            path,
            submitted,
            resolved: Vec::new(),
            failed: Vec::new(),
            unaccounted: Vec::new(),
            settled: Vec::new(),
        }
    }

    pub fn used_fallback(&self) -> bool {
        self.path == ReconciliationPath::Fallback
    }

    /// Every submitted item is resolved, failed or settled.
    pub fn is_complete(&self) -> bool {
        self.unaccounted.is_empty()
            && self.resolved.len() + self.failed.len() + self.settled.len() == self.submitted
    }
}

pub struct ResultReconciler {
    remote: Arc<dyn BulkMutationApi>,
}

impl ResultReconciler {
    pub fn new(remote: Arc<dyn BulkMutationApi>) -> Self {
        Self { remote }
    }

    /// Reconciles `results` against the job's ordered item ids.
    ///
    /// `items` are the queue rows still present for the job; ids without a
    /// row are settled.
    #[instrument(skip(self, job, items, results, ctx), fields(job_id = %job.id, results = results.len()))]
    pub async fn reconcile(
        &self,
        job: &BatchJob,
        items: &[QueueItem],
        results: &[IndexedOutcome],
        ctx: &ResolutionContext,
    ) -> Result<Reconciliation> {
        let by_id: HashMap<QueueItemId, &QueueItem> = items.iter().map(|i| (i.id, i)).collect();

        let reconciliation = if positions_trustworthy(job, results) {
            reconcile_positional(job, &by_id, results)
        } else {
            warn!(
                expected = job.operation_count,
                received = results.len(),
                "Result count mismatch, re-identifying items by natural key"
            );
            self.reconcile_fallback(job, &by_id, results, ctx).await?
        };

        info!(
            path = reconciliation.path.as_str(),
            resolved = reconciliation.resolved.len(),
            failed = reconciliation.failed.len(),
            unaccounted = reconciliation.unaccounted.len(),
            settled = reconciliation.settled.len(),
            "Reconciled batch job"
        );
        Ok(reconciliation)
    }

    async fn reconcile_fallback(
        &self,
        job: &BatchJob,
        by_id: &HashMap<QueueItemId, &QueueItem>,
        results: &[IndexedOutcome],
        ctx: &ResolutionContext,
    ) -> Result<Reconciliation> {
        let ratio = job.ratio().max(1);
        let item_ids = job.item_ids();
        let mut rec = Reconciliation::new(ReconciliationPath::Fallback, item_ids.len());

        // First reported failure per logical position, in index order
        let mut failures: BTreeMap<usize, OperationFailure> = BTreeMap::new();
        for outcome in results {
            if let OperationOutcome::Failure(failure) = &outcome.outcome {
                let position = outcome.index / ratio;
                let live = item_ids.get(position).is_some_and(|id| by_id.contains_key(id));
                if live {
                    failures.entry(position).or_insert_with(|| failure.clone());
                }
            }
        }

        let parents: BTreeSet<String> = item_ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .filter_map(|item| ctx.parent_external_id(item))
            .map(str::to_string)
            .collect();
        let parents: Vec<String> = parents.into_iter().collect();

        let entities = if parents.is_empty() {
            Vec::new()
        } else {
            self.remote
                .query_entities(&job.account_id, job.operand, &parents)
                .await?
        };
        debug!(parents = parents.len(), entities = entities.len(), "Fetched live entities");

        let mut matcher = EntityMatcher::new(&entities);
        let mut unresolved = Vec::new();

        for id in item_ids {
            let Some(item) = by_id.get(id) else {
                rec.settled.push(*id);
                continue;
            };
            match matcher.resolve(item, ctx.parent_external_id(item)) {
                Some(external_id) => rec.resolved.push((*id, external_id)),
                None => unresolved.push(*id),
            }
        }

        if unresolved.len() == failures.len() {
            rec.failed
                .extend(unresolved.into_iter().zip(failures.into_values()));
        } else {
            warn!(
                unresolved = unresolved.len(),
                failures = failures.len(),
                "Unresolved items cannot be attributed to reported failures"
            );
            rec.unaccounted.extend(unresolved);
        }

        Ok(rec)
    }
}

/// One outcome per operation, every index distinct and in range.
fn positions_trustworthy(job: &BatchJob, results: &[IndexedOutcome]) -> bool {
    if results.len() != job.operation_count {
        return false;
    }
    let mut seen = HashSet::with_capacity(results.len());
    results
        .iter()
        .all(|r| r.index < job.operation_count && seen.insert(r.index))
}

fn reconcile_positional(
    job: &BatchJob,
    by_id: &HashMap<QueueItemId, &QueueItem>,
    results: &[IndexedOutcome],
) -> Reconciliation {
    let ratio = job.ratio().max(1);
    let item_ids = job.item_ids();
    let mut rec = Reconciliation::new(ReconciliationPath::Positional, item_ids.len());
    let outcomes: HashMap<usize, &OperationOutcome> =
        results.iter().map(|r| (r.index, &r.outcome)).collect();

    for (position, id) in item_ids.iter().enumerate() {
        let Some(item) = by_id.get(id) else {
            rec.settled.push(*id);
            continue;
        };
        let slice: Vec<&OperationOutcome> = (position * ratio..position * ratio + ratio)
            .filter_map(|index| outcomes.get(&index).copied())
            .collect();

        let failure = slice.iter().find_map(|outcome| match outcome {
            OperationOutcome::Failure(failure) => Some(failure.clone()),
            OperationOutcome::Success { .. } => None,
        });
        if let Some(failure) = failure {
            rec.failed.push((*id, failure));
            continue;
        }

        let reported = match slice.first() {
            Some(OperationOutcome::Success { external_id }) => external_id.clone(),
            _ => None,
        };
        let external_id = match job.action {
            Action::Add => reported,
            Action::Update | Action::Delete => item.external_id.clone().or(reported),
        };

        match external_id {
            Some(external_id) => rec.resolved.push((*id, external_id)),
            None => rec.unaccounted.push(*id),
        }
    }

    rec
}

/// Natural key lookups over the live entities of one job.
struct EntityMatcher<'a> {
    by_key: HashMap<(&'a str, &'a str), Vec<&'a RemoteEntity>>,
    by_external_id: HashMap<&'a str, &'a RemoteEntity>,
    claimed: HashSet<&'a str>,
}

impl<'a> EntityMatcher<'a> {
    fn new(entities: &'a [RemoteEntity]) -> Self {
        let mut by_key: HashMap<(&str, &str), Vec<&RemoteEntity>> = HashMap::new();
        let mut by_external_id = HashMap::new();
        for entity in entities {
            by_key
                .entry((entity.parent_external_id.as_str(), entity.text.as_str()))
                .or_default()
                .push(entity);
            by_external_id.insert(entity.external_id.as_str(), entity);
        }
        Self {
            by_key,
            by_external_id,
            claimed: HashSet::new(),
        }
    }

    fn resolve(&mut self, item: &QueueItem, parent: Option<&str>) -> Option<String> {
        match item.action {
            Action::Add => {
                let candidates = self.by_key.get(&(parent?, item.natural_key.text.as_str()))?;
                let entity: &'a RemoteEntity = *candidates
                    .iter()
                    .find(|e| !self.claimed.contains(e.external_id.as_str()))?;
                self.claimed.insert(entity.external_id.as_str());
                Some(entity.external_id.clone())
            }
            Action::Update => {
                let external_id = item.external_id.as_deref()?;
                let entity = self.by_external_id.get(external_id)?;
                (entity.text == item.natural_key.text).then(|| external_id.to_string())
            }
            Action::Delete => {
                let external_id = item.external_id.as_deref()?;
                (!self.by_external_id.contains_key(external_id)).then(|| external_id.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use crate::remote::{JobRef, RemoteError, RemoteJobStatus, RunHandle};
    use async_trait::async_trait;
    use core_catalog::{NaturalKey, OperandType, QueueScope};
    use std::sync::Mutex;

    /// Serves a fixed entity list and counts lookups.
    struct EntityRemote {
        entities: Vec<RemoteEntity>,
        queries: Mutex<usize>,
    }

    impl EntityRemote {
        fn new(entities: Vec<RemoteEntity>) -> Arc<Self> {
            Arc::new(Self {
                entities,
                queries: Mutex::new(0),
            })
        }

        fn queries(&self) -> usize {
            *self.queries.lock().unwrap()
        }
    }

    #[async_trait]
    impl BulkMutationApi for EntityRemote {
        async fn create_job(&self, _: &str) -> std::result::Result<JobRef, RemoteError> {
            unreachable!()
        }
        async fn add_operations(
            &self,
            _: &JobRef,
            _: &[Operation],
            _: Option<&str>,
        ) -> std::result::Result<String, RemoteError> {
            unreachable!()
        }
        async fn run(&self, _: &JobRef) -> std::result::Result<RunHandle, RemoteError> {
            unreachable!()
        }
        async fn poll_status(
            &self,
            _: &str,
            _: &str,
        ) -> std::result::Result<RemoteJobStatus, RemoteError> {
            unreachable!()
        }
        async fn fetch_results(
            &self,
            _: &str,
            _: &str,
        ) -> std::result::Result<Vec<IndexedOutcome>, RemoteError> {
            unreachable!()
        }
        async fn query_entities(
            &self,
            _: &str,
            _: OperandType,
            parents: &[String],
        ) -> std::result::Result<Vec<RemoteEntity>, RemoteError> {
            *self.queries.lock().unwrap() += 1;
            Ok(self
                .entities
                .iter()
                .filter(|e| parents.contains(&e.parent_external_id))
                .cloned()
                .collect())
        }
    }

    fn entity(id: &str, parent: &str, text: &str) -> RemoteEntity {
        RemoteEntity {
            external_id: id.to_string(),
            parent_external_id: parent.to_string(),
            text: text.to_string(),
        }
    }

    fn ad_groups(n: usize) -> Vec<QueueItem> {
        (0..n)
            .map(|i| {
                QueueItem::new(
                    OperandType::AdGroup,
                    Action::Add,
                    "acct",
                    "c1",
                    NaturalKey::ad_group("c1", &format!("group {i}")),
                )
            })
            .collect()
    }

    fn job_for(items: &[QueueItem], operand: OperandType, action: Action, ratio: usize) -> BatchJob {
        let scope = QueueScope::new("acct", operand, action);
        BatchJob::new(
            &scope,
            JobRef::new("1", "customers/1/batchJobs/1"),
            items.iter().map(|i| i.id).collect(),
            items.len() * ratio,
            0,
            60,
        )
    }

    fn ctx() -> ResolutionContext {
        ResolutionContext::new("acct").with_campaign("c1", Some("100"))
    }

    #[tokio::test]
    async fn test_positional_path_skips_remote_lookup() {
        let remote = EntityRemote::new(Vec::new());
        let reconciler = ResultReconciler::new(remote.clone());
        let items = ad_groups(5);
        let job = job_for(&items, OperandType::AdGroup, Action::Add, 1);
        let mut results: Vec<_> = (0..4)
            .map(|i| IndexedOutcome::success(i, format!("90{i}")))
            .collect();
        results.push(IndexedOutcome::failure(4, OperationFailure::new("bad name")));

        let rec = reconciler.reconcile(&job, &items, &results, &ctx()).await.unwrap();

        assert_eq!(rec.path, ReconciliationPath::Positional);
        assert_eq!(rec.resolved.len(), 4);
        assert_eq!(rec.resolved[2], (items[2].id, "902".to_string()));
        assert_eq!(rec.failed[0].0, items[4].id);
        assert!(rec.is_complete());
        assert_eq!(remote.queries(), 0);
    }

    #[tokio::test]
    async fn test_items_without_queue_row_are_settled() {
        let remote = EntityRemote::new(Vec::new());
        let reconciler = ResultReconciler::new(remote);
        let items = ad_groups(3);
        let job = job_for(&items, OperandType::AdGroup, Action::Add, 1);
        let results: Vec<_> = (0..3)
            .map(|i| IndexedOutcome::success(i, format!("90{i}")))
            .collect();

        // An earlier attempt already committed and removed the first two rows.
        let rec = reconciler
            .reconcile(&job, &items[2..], &results, &ctx())
            .await
            .unwrap();
        assert_eq!(rec.settled, vec![items[0].id, items[1].id]);
        assert_eq!(rec.resolved, vec![(items[2].id, "902".to_string())]);
        assert!(rec.unaccounted.is_empty());
        assert!(rec.is_complete());

        // Fallback path ignores failures reported for settled positions.
        let results = vec![IndexedOutcome::failure(0, OperationFailure::new("late"))];
        let rec = reconciler
            .reconcile(&job, &items[2..], &results, &ctx())
            .await
            .unwrap();
        assert!(rec.used_fallback());
        assert_eq!(rec.settled.len(), 2);
        assert!(rec.failed.is_empty());
        assert_eq!(rec.unaccounted, vec![items[2].id]);
    }

    #[tokio::test]
    async fn test_positional_extension_pairs_operations() {
        let remote = EntityRemote::new(Vec::new());
        let reconciler = ResultReconciler::new(remote);
        let items: Vec<_> = (0..2)
            .map(|i| {
                QueueItem::new(
                    OperandType::Extension,
                    Action::Add,
                    "acct",
                    "c1",
                    NaturalKey::sitelink("c1", &format!("link {i}")),
                )
            })
            .collect();
        let job = job_for(&items, OperandType::Extension, Action::Add, 2);
        let results = vec![
            IndexedOutcome::success(0, "a0"),
            IndexedOutcome::success(1, "l0"),
            IndexedOutcome::success(2, "a1"),
            IndexedOutcome::failure(3, OperationFailure::new("link rejected")),
        ];

        let rec = reconciler.reconcile(&job, &items, &results, &ctx()).await.unwrap();
        assert_eq!(rec.resolved, vec![(items[0].id, "a0".to_string())]);
        assert_eq!(rec.failed.len(), 1);
        assert_eq!(rec.failed[0].0, items[1].id);
    }

    #[tokio::test]
    async fn test_fallback_leaves_unattributed_item_unaccounted() {
        let items = ad_groups(5);
        let remote = EntityRemote::new(
            (0..4)
                .map(|i| entity(&format!("70{i}"), "100", &format!("group {i}")))
                .collect(),
        );
        let reconciler = ResultReconciler::new(remote.clone());
        let job = job_for(&items, OperandType::AdGroup, Action::Add, 1);
        let results: Vec<_> = (0..4)
            .map(|i| IndexedOutcome::success(i, format!("70{i}")))
            .collect();

        let rec = reconciler.reconcile(&job, &items, &results, &ctx()).await.unwrap();

        assert!(rec.used_fallback());
        assert_eq!(remote.queries(), 1);
        assert_eq!(rec.resolved.len(), 4);
        assert_eq!(rec.unaccounted, vec![items[4].id]);
        assert!(!rec.is_complete());
    }

    #[tokio::test]
    async fn test_fallback_pairs_unresolved_with_failures() {
        let items = ad_groups(5);
        // Item 1 failed remotely; the reported index is off by one
        let remote = EntityRemote::new(vec![
            entity("700", "100", "group 0"),
            entity("702", "100", "group 2"),
            entity("703", "100", "group 3"),
            entity("704", "100", "group 4"),
        ]);
        let reconciler = ResultReconciler::new(remote);
        let job = job_for(&items, OperandType::AdGroup, Action::Add, 1);
        let results = vec![
            IndexedOutcome::success(0, "700"),
            IndexedOutcome::success(1, "702"),
            IndexedOutcome::failure(2, OperationFailure::new("duplicate name")),
            IndexedOutcome::success(3, "703"),
        ];

        let rec = reconciler.reconcile(&job, &items, &results, &ctx()).await.unwrap();

        assert!(rec.used_fallback());
        assert_eq!(rec.resolved.len(), 4);
        assert_eq!(rec.failed.len(), 1);
        assert_eq!(rec.failed[0].0, items[1].id);
        assert_eq!(rec.failed[0].1.message, "duplicate name");
        assert!(rec.is_complete());
    }

    #[tokio::test]
    async fn test_fallback_matches_duplicate_texts_once_each() {
        let mut items = ad_groups(2);
        items[1].natural_key = items[0].natural_key.clone();
        let remote = EntityRemote::new(vec![entity("1", "100", "group 0")]);
        let reconciler = ResultReconciler::new(remote);
        let job = job_for(&items, OperandType::AdGroup, Action::Add, 1);

        let rec = reconciler.reconcile(&job, &items, &[], &ctx()).await.unwrap();
        assert_eq!(rec.resolved.len(), 1);
        assert_eq!(rec.unaccounted.len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_update_and_delete_rules() {
        let updated = QueueItem::new(
            OperandType::AdGroup,
            Action::Update,
            "acct",
            "c1",
            NaturalKey::ad_group("c1", "renamed"),
        )
        .with_external_id("11");
        let stale = QueueItem::new(
            OperandType::AdGroup,
            Action::Update,
            "acct",
            "c1",
            NaturalKey::ad_group("c1", "new name"),
        )
        .with_external_id("12");
        let remote = EntityRemote::new(vec![
            entity("11", "100", "renamed"),
            entity("12", "100", "old name"),
        ]);
        let reconciler = ResultReconciler::new(remote.clone());
        let items = vec![updated.clone(), stale.clone()];
        let job = job_for(&items, OperandType::AdGroup, Action::Update, 1);

        let rec = reconciler.reconcile(&job, &items, &[], &ctx()).await.unwrap();
        assert_eq!(rec.resolved, vec![(updated.id, "11".to_string())]);
        assert_eq!(rec.unaccounted, vec![stale.id]);

        let removed = QueueItem::new(
            OperandType::AdGroup,
            Action::Delete,
            "acct",
            "c1",
            NaturalKey::ad_group("c1", "gone"),
        )
        .with_external_id("99");
        let still_live = QueueItem::new(
            OperandType::AdGroup,
            Action::Delete,
            "acct",
            "c1",
            NaturalKey::ad_group("c1", "renamed"),
        )
        .with_external_id("11");
        let items = vec![removed.clone(), still_live.clone()];
        let job = job_for(&items, OperandType::AdGroup, Action::Delete, 1);
        let results = vec![IndexedOutcome::failure(
            0,
            OperationFailure::new("cannot remove"),
        )];

        let rec = reconciler.reconcile(&job, &items, &results, &ctx()).await.unwrap();
        assert_eq!(rec.resolved, vec![(removed.id, "99".to_string())]);
        assert_eq!(rec.failed.len(), 1);
        assert_eq!(rec.failed[0].0, still_live.id);
        assert!(rec.is_complete());
    }

    #[tokio::test]
    async fn test_duplicate_indices_force_fallback() {
        let items = ad_groups(2);
        let remote = EntityRemote::new(vec![
            entity("1", "100", "group 0"),
            entity("2", "100", "group 1"),
        ]);
        let reconciler = ResultReconciler::new(remote.clone());
        let job = job_for(&items, OperandType::AdGroup, Action::Add, 1);
        let results = vec![IndexedOutcome::success(0, "1"), IndexedOutcome::success(0, "2")];

        let rec = reconciler.reconcile(&job, &items, &results, &ctx()).await.unwrap();
        assert!(rec.used_fallback());
        assert_eq!(remote.queries(), 1);
        assert!(rec.is_complete());
    }
}
