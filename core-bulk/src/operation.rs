//! # Operation Builder
//!
//! Turns a batch of queue items from one submission scope into vendor-neutral
//! operations.
//!
//! ## Overview
//!
//! The builder produces an [`OperationPlan`]: an ordered list of
//! `(item id, operations)` entries. Every entry holds exactly
//! [`operations_per_item`] physical operations for the scope, so the
//! physical operation at index `i` always belongs to entry `i / ratio`.
//! That pairing is the only channel later used to attribute remote results
//! to queue items, which is why it lives in one structure instead of two
//! parallel lists.
//!
//! Field mapping is delegated to a [`PayloadMapper`]. Items the mapper (or
//! the resolution context) cannot express are skipped, not errored. An item
//! whose campaign is missing from the campaign directory aborts the whole
//! batch with [`BuildAbort::UnknownCampaigns`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! let ctx = ResolutionContext::load(&account, campaigns.as_ref(), confirmed.as_ref()).await?;
//! let plan = OperationBuilder::new(mapper).build(&scope, &items, &ctx)?;
//! assert_eq!(plan.physical_len(), plan.len() * plan.ratio());
//! ```

use crate::error::Result;
use core_catalog::{
    Action, CampaignRepository, ConfirmedRepository, ExemptionKey, OperandType, QueueItem,
    QueueItemId, QueueScope,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

// ============================================================================
// Operations
// ============================================================================

/// Remote resource an operation mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    AdGroup,
    AdGroupAd,
    AdGroupCriterion,
    Asset,
    CampaignAsset,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::AdGroup => "ad_group",
            ResourceKind::AdGroupAd => "ad_group_ad",
            ResourceKind::AdGroupCriterion => "ad_group_criterion",
            ResourceKind::Asset => "asset",
            ResourceKind::CampaignAsset => "campaign_asset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Remove,
}

impl From<Action> for OperationKind {
    fn from(action: Action) -> Self {
        match action {
            Action::Add => OperationKind::Create,
            Action::Update => OperationKind::Update,
            Action::Delete => OperationKind::Remove,
        }
    }
}

/// One physical mutation, independent of the vendor wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub resource: ResourceKind,
    pub kind: OperationKind,
    /// Resource body for create and update
    pub payload: serde_json::Value,
    /// Fields touched by an update
    pub update_mask: Vec<String>,
    /// Target of update and remove; temporary name for creates referenced later
    pub resource_name: Option<String>,
    /// Policy violations acknowledged for this operation
    pub exemption_keys: Vec<ExemptionKey>,
}

impl Operation {
    pub fn create(resource: ResourceKind, payload: serde_json::Value) -> Self {
        Self {
            resource,
            kind: OperationKind::Create,
            payload,
            update_mask: Vec::new(),
            resource_name: None,
            exemption_keys: Vec::new(),
        }
    }

    pub fn update(
        resource: ResourceKind,
        resource_name: impl Into<String>,
        payload: serde_json::Value,
        update_mask: Vec<String>,
    ) -> Self {
        Self {
            resource,
            kind: OperationKind::Update,
            payload,
            update_mask,
            resource_name: Some(resource_name.into()),
            exemption_keys: Vec::new(),
        }
    }

    pub fn remove(resource: ResourceKind, resource_name: impl Into<String>) -> Self {
        Self {
            resource,
            kind: OperationKind::Remove,
            payload: serde_json::Value::Null,
            update_mask: Vec::new(),
            resource_name: Some(resource_name.into()),
            exemption_keys: Vec::new(),
        }
    }

    pub fn with_resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = Some(resource_name.into());
        self
    }

    pub fn with_exemptions(mut self, keys: Vec<ExemptionKey>) -> Self {
        self.exemption_keys = keys;
        self
    }
}

/// Physical operations emitted per logical item.
///
/// Extensions are created or updated as an asset plus its campaign link, and
/// removed by dropping the link alone.
pub fn operations_per_item(operand: OperandType, action: Action) -> usize {
    match (operand, action) {
        (OperandType::Extension, Action::Add | Action::Update) => 2,
        _ => 1,
    }
}

/// Allocator of negative ids for resources created and referenced in the
/// same job.
#[derive(Debug)]
pub struct TemporaryIds {
    next: AtomicI64,
}

impl TemporaryIds {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(-1),
        }
    }

    pub fn allocate(&self) -> i64 {
        self.next.fetch_sub(1, Ordering::Relaxed)
    }
}

impl Default for TemporaryIds {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Field mapping collaborator
// ============================================================================

/// Resolved identifiers handed to the mapper for one item.
#[derive(Debug)]
pub struct MappingContext<'a> {
    pub account_id: &'a str,
    pub campaign_external_id: &'a str,
    /// Campaign for ad groups and extensions, ad group for ads and keywords
    pub parent_external_id: &'a str,
    pub temp_ids: &'a TemporaryIds,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MappingOutcome {
    Mapped(Vec<Operation>),
    /// The item breaks a business rule (e.g. a required field is missing)
    Skip { reason: String },
}

/// Translates one queue item into vendor-neutral operations.
pub trait PayloadMapper: Send + Sync {
    fn map(&self, item: &QueueItem, ctx: &MappingContext<'_>) -> MappingOutcome;
}

// ============================================================================
// Resolution context
// ============================================================================

/// Local to remote id lookups for one account.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    account_id: String,
    /// Every campaign in the directory; `None` until the campaign is created remotely
    campaigns: HashMap<String, Option<String>>,
    /// Confirmed ad groups by local id
    ad_groups: HashMap<String, String>,
}

impl ResolutionContext {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Self::default()
        }
    }

    /// Loads the campaign directory and confirmed ad groups of an account.
    pub async fn load(
        account_id: &str,
        campaigns: &dyn CampaignRepository,
        confirmed: &dyn ConfirmedRepository,
    ) -> Result<Self> {
        let mut ctx = Self::new(account_id);
        for campaign in campaigns.find_by_account(account_id).await? {
            ctx.campaigns.insert(campaign.id, campaign.external_id);
        }
        for ad_group in confirmed
            .find_by_account(account_id, OperandType::AdGroup)
            .await?
        {
            ctx.ad_groups.insert(ad_group.local_id, ad_group.external_id);
        }
        debug!(
            account_id = %account_id,
            campaigns = ctx.campaigns.len(),
            ad_groups = ctx.ad_groups.len(),
            "Loaded resolution context"
        );
        Ok(ctx)
    }

    pub fn with_campaign(mut self, id: impl Into<String>, external_id: Option<&str>) -> Self {
        self.campaigns
            .insert(id.into(), external_id.map(str::to_string));
        self
    }

    pub fn with_ad_group(mut self, id: impl Into<String>, external_id: impl Into<String>) -> Self {
        self.ad_groups.insert(id.into(), external_id.into());
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn knows_campaign(&self, campaign_id: &str) -> bool {
        self.campaigns.contains_key(campaign_id)
    }

    pub fn campaign_external_id(&self, campaign_id: &str) -> Option<&str> {
        self.campaigns.get(campaign_id).and_then(|e| e.as_deref())
    }

    pub fn ad_group_external_id(&self, ad_group_id: &str) -> Option<&str> {
        self.ad_groups.get(ad_group_id).map(String::as_str)
    }

    /// Remote id of the entity the item hangs under.
    pub fn parent_external_id(&self, item: &QueueItem) -> Option<&str> {
        if item.operand.has_ad_group_parent() {
            item.ad_group_id
                .as_deref()
                .and_then(|id| self.ad_group_external_id(id))
        } else {
            self.campaign_external_id(&item.campaign_id)
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// One logical change and its physical operations.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub item_id: QueueItemId,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub item_id: QueueItemId,
    pub reason: String,
}

/// Ordered, attributable operations for one submission scope.
#[derive(Debug, Clone)]
pub struct OperationPlan {
    scope: QueueScope,
    ratio: usize,
    entries: Vec<PlanEntry>,
    skipped: Vec<SkippedItem>,
}

impl OperationPlan {
    pub fn scope(&self) -> &QueueScope {
        &self.scope
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn skipped(&self) -> &[SkippedItem] {
        &self.skipped
    }

    /// Item ids in submission order, one per logical change.
    pub fn item_ids(&self) -> Vec<QueueItemId> {
        self.entries.iter().map(|e| e.item_id).collect()
    }

    /// Physical operations in upload order.
    pub fn operations(&self) -> Vec<Operation> {
        self.entries
            .iter()
            .flat_map(|e| e.operations.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn physical_len(&self) -> usize {
        self.entries.iter().map(|e| e.operations.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The batch cannot be submitted at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildAbort {
    #[error("Batch references campaigns unknown to the directory: {}", campaign_ids.join(", "))]
    UnknownCampaigns { campaign_ids: Vec<String> },
}

// ============================================================================
// Builder
// ============================================================================

pub struct OperationBuilder {
    mapper: Arc<dyn PayloadMapper>,
}

impl OperationBuilder {
    pub fn new(mapper: Arc<dyn PayloadMapper>) -> Self {
        Self { mapper }
    }

    /// Builds the plan for `items`, preserving their order.
    pub fn build(
        &self,
        scope: &QueueScope,
        items: &[QueueItem],
        ctx: &ResolutionContext,
    ) -> std::result::Result<OperationPlan, BuildAbort> {
        let unknown: BTreeSet<&str> = items
            .iter()
            .filter(|item| !ctx.knows_campaign(&item.campaign_id))
            .map(|item| item.campaign_id.as_str())
            .collect();
        if !unknown.is_empty() {
            return Err(BuildAbort::UnknownCampaigns {
                campaign_ids: unknown.into_iter().map(str::to_string).collect(),
            });
        }

        let ratio = operations_per_item(scope.operand, scope.action);
        let temp_ids = TemporaryIds::new();
        let mut entries = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();

        for item in items {
            let resolved = self.check_item(scope, item, ctx);
            let (campaign_external_id, parent_external_id) = match resolved {
                Ok(ids) => ids,
                Err(reason) => {
                    skipped.push(SkippedItem {
                        item_id: item.id,
                        reason,
                    });
                    continue;
                }
            };

            let mapping_ctx = MappingContext {
                account_id: &scope.account_id,
                campaign_external_id,
                parent_external_id,
                temp_ids: &temp_ids,
            };

            match self.mapper.map(item, &mapping_ctx) {
                MappingOutcome::Mapped(mut operations) => {
                    if operations.len() != ratio {
                        warn!(
                            item_id = %item.id,
                            expected = ratio,
                            produced = operations.len(),
                            "Mapper produced an unexpected operation count, skipping item"
                        );
                        skipped.push(SkippedItem {
                            item_id: item.id,
                            reason: format!(
                                "expected {} operations, mapper produced {}",
                                ratio,
                                operations.len()
                            ),
                        });
                        continue;
                    }
                    if !item.exemption_keys.is_empty() {
                        if let Some(primary) = operations.first_mut() {
                            if primary.exemption_keys.is_empty() {
                                primary.exemption_keys = item.exemption_keys.clone();
                            }
                        }
                    }
                    entries.push(PlanEntry {
                        item_id: item.id,
                        operations,
                    });
                }
                MappingOutcome::Skip { reason } => {
                    debug!(item_id = %item.id, reason = %reason, "Skipping unmappable item");
                    skipped.push(SkippedItem {
                        item_id: item.id,
                        reason,
                    });
                }
            }
        }

        debug!(
            scope = %scope,
            entries = entries.len(),
            skipped = skipped.len(),
            "Built operation plan"
        );

        Ok(OperationPlan {
            scope: scope.clone(),
            ratio,
            entries,
            skipped,
        })
    }

    /// Returns the campaign and parent remote ids, or why the item is skipped.
    fn check_item<'c>(
        &self,
        scope: &QueueScope,
        item: &QueueItem,
        ctx: &'c ResolutionContext,
    ) -> std::result::Result<(&'c str, &'c str), String> {
        if item.account_id != scope.account_id
            || item.operand != scope.operand
            || item.action != scope.action
        {
            return Err(format!("item does not belong to scope {}", scope));
        }
        if !item.is_submittable() {
            return Err("item carries an error or is already in flight".to_string());
        }
        if let Err(e) = item.validate() {
            return Err(e.to_string());
        }
        let campaign = ctx
            .campaign_external_id(&item.campaign_id)
            .ok_or_else(|| format!("campaign {} has no remote id yet", item.campaign_id))?;
        let parent = ctx
            .parent_external_id(item)
            .ok_or_else(|| "parent ad group has no remote id yet".to_string())?;
        Ok((campaign, parent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_catalog::NaturalKey;
    use serde_json::json;

    /// Emits `ratio` operations unless the item has a `skip` attribute.
    struct StubMapper;

    impl PayloadMapper for StubMapper {
        fn map(&self, item: &QueueItem, ctx: &MappingContext<'_>) -> MappingOutcome {
            if item.attribute_str("skip").is_some() {
                return MappingOutcome::Skip {
                    reason: "skip requested".to_string(),
                };
            }
            let ratio = operations_per_item(item.operand, item.action);
            let ops = (0..ratio)
                .map(|_| {
                    Operation::create(
                        ResourceKind::AdGroup,
                        json!({ "parent": ctx.parent_external_id, "tmp": ctx.temp_ids.allocate() }),
                    )
                })
                .collect();
            MappingOutcome::Mapped(ops)
        }
    }

    fn builder() -> OperationBuilder {
        OperationBuilder::new(Arc::new(StubMapper))
    }

    fn ad_group(campaign: &str, name: &str) -> QueueItem {
        QueueItem::new(
            OperandType::AdGroup,
            Action::Add,
            "acct",
            campaign,
            NaturalKey::ad_group(campaign, name),
        )
    }

    fn ctx() -> ResolutionContext {
        ResolutionContext::new("acct")
            .with_campaign("c1", Some("111"))
            .with_campaign("c2", None)
            .with_ad_group("ag1", "555")
    }

    #[test]
    fn test_plan_preserves_item_order() {
        let scope = QueueScope::new("acct", OperandType::AdGroup, Action::Add);
        let items: Vec<_> = (0..5).map(|i| ad_group("c1", &format!("g{i}"))).collect();

        let plan = builder().build(&scope, &items, &ctx()).unwrap();

        let expected: Vec<_> = items.iter().map(|i| i.id).collect();
        assert_eq!(plan.item_ids(), expected);
        assert_eq!(plan.operations().len(), 5);
        assert_eq!(plan.physical_len(), 5);
    }

    #[test]
    fn test_unknown_campaign_aborts_batch() {
        let scope = QueueScope::new("acct", OperandType::AdGroup, Action::Add);
        let items = vec![
            ad_group("c1", "a"),
            ad_group("zz", "b"),
            ad_group("yy", "c"),
            ad_group("zz", "d"),
        ];

        let err = builder().build(&scope, &items, &ctx()).unwrap_err();
        assert_eq!(
            err,
            BuildAbort::UnknownCampaigns {
                campaign_ids: vec!["yy".to_string(), "zz".to_string()]
            }
        );
    }

    #[test]
    fn test_unresolvable_items_are_skipped() {
        let scope = QueueScope::new("acct", OperandType::AdGroup, Action::Add);
        let mut errored = ad_group("c1", "errored");
        errored.error_message = Some("boom".to_string());
        let items = vec![
            ad_group("c1", "ok"),
            ad_group("c2", "campaign not created"),
            errored,
            ad_group("c1", "rule").with_attributes(json!({ "skip": "yes" })),
        ];

        let plan = builder().build(&scope, &items, &ctx()).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.item_ids(), vec![items[0].id]);
        assert_eq!(plan.skipped().len(), 3);
    }

    #[test]
    fn test_keyword_without_confirmed_ad_group_is_skipped() {
        let scope = QueueScope::new("acct", OperandType::Keyword, Action::Add);
        let confirmed = QueueItem::new(
            OperandType::Keyword,
            Action::Add,
            "acct",
            "c1",
            NaturalKey::keyword("ag1", "shoes", "exact"),
        )
        .with_ad_group("ag1");
        let orphan = QueueItem::new(
            OperandType::Keyword,
            Action::Add,
            "acct",
            "c1",
            NaturalKey::keyword("ag9", "boots", "exact"),
        )
        .with_ad_group("ag9");

        let plan = builder()
            .build(&scope, &[confirmed.clone(), orphan], &ctx())
            .unwrap();
        assert_eq!(plan.item_ids(), vec![confirmed.id]);
        assert_eq!(plan.operations()[0].payload["parent"], "555");
    }

    #[test]
    fn test_extension_entries_hold_two_operations() {
        let scope = QueueScope::new("acct", OperandType::Extension, Action::Add);
        let items: Vec<_> = (0..3)
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

        let plan = builder().build(&scope, &items, &ctx()).unwrap();
        assert_eq!(plan.ratio(), 2);
        assert_eq!(plan.physical_len(), 6);
        for (entry, id) in plan.entries().iter().zip(plan.item_ids()) {
            assert_eq!(entry.item_id, id);
            assert_eq!(entry.operations.len(), 2);
        }
    }

    #[test]
    fn test_exemptions_attach_to_primary_operation() {
        let scope = QueueScope::new("acct", OperandType::AdGroup, Action::Add);
        let mut item = ad_group("c1", "exempt");
        item.exemption_keys = vec![ExemptionKey::new("TRADEMARKS", Some("Acme".to_string()))];

        let plan = builder().build(&scope, &[item], &ctx()).unwrap();
        assert_eq!(plan.entries()[0].operations[0].exemption_keys.len(), 1);
    }

    #[test]
    fn test_temporary_ids_are_negative_and_unique() {
        let ids = TemporaryIds::new();
        let a = ids.allocate();
        let b = ids.allocate();
        assert!(a < 0 && b < 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_operations_per_item_table() {
        assert_eq!(operations_per_item(OperandType::Extension, Action::Add), 2);
        assert_eq!(operations_per_item(OperandType::Extension, Action::Update), 2);
        assert_eq!(operations_per_item(OperandType::Extension, Action::Delete), 1);
        assert_eq!(operations_per_item(OperandType::Keyword, Action::Add), 1);
    }
}
