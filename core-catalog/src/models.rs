//! Domain models for the sync catalog
//!
//! Queue items, confirmed entities, error records and campaigns, plus the
//! enums that tag them. Models are plain data; row mapping lives in the
//! repositories.

use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueItemId(pub Uuid);

impl QueueItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_string(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Category of domain object being mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperandType {
    Ad,
    AdGroup,
    Keyword,
    Extension,
}

impl OperandType {
    /// Submission order: parents before children.
    pub const ALL: [OperandType; 4] = [
        OperandType::AdGroup,
        OperandType::Ad,
        OperandType::Keyword,
        OperandType::Extension,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperandType::Ad => "ad",
            OperandType::AdGroup => "ad_group",
            OperandType::Keyword => "keyword",
            OperandType::Extension => "extension",
        }
    }

    /// Whether the natural key's parent is an ad group (otherwise a campaign).
    pub fn has_ad_group_parent(&self) -> bool {
        matches!(self, OperandType::Ad | OperandType::Keyword)
    }
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperandType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ad" => Ok(OperandType::Ad),
            "ad_group" => Ok(OperandType::AdGroup),
            "keyword" => Ok(OperandType::Keyword),
            "extension" => Ok(OperandType::Extension),
            other => Err(CatalogError::invalid("operand", format!("unknown operand type: {}", other))),
        }
    }
}

/// Requested change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Add,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Add, Action::Update, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(Action::Add),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(CatalogError::invalid("action", format!("unknown action: {}", other))),
        }
    }
}

// =============================================================================
// Value types
// =============================================================================

/// Business-identifying attributes used to re-match an entity by content.
///
/// `parent_id` is the local id of the parent: the campaign for ad groups and
/// extensions, the ad group for ads and keywords. `text` is the
/// distinguishing content, compared exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey {
    pub parent_id: String,
    pub text: String,
}

impl NaturalKey {
    pub fn new(parent_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            text: text.into(),
        }
    }

    /// Ad group keyed by its name.
    pub fn ad_group(campaign_id: impl Into<String>, name: &str) -> Self {
        Self::new(campaign_id, name.trim())
    }

    /// Keyword keyed by `text:MATCH_TYPE`, the way remote criteria are listed.
    pub fn keyword(ad_group_id: impl Into<String>, text: &str, match_type: &str) -> Self {
        Self::new(
            ad_group_id,
            format!("{}:{}", text.trim(), match_type.trim().to_ascii_uppercase()),
        )
    }

    /// Ad keyed by its first headline and final URL.
    pub fn ad(ad_group_id: impl Into<String>, headline: &str, final_url: &str) -> Self {
        Self::new(ad_group_id, format!("{}|{}", headline.trim(), final_url.trim()))
    }

    /// Sitelink extension keyed by its link text.
    pub fn sitelink(campaign_id: impl Into<String>, link_text: &str) -> Self {
        Self::new(campaign_id, link_text.trim())
    }
}

/// A policy violation the operator may acknowledge to resubmit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExemptionKey {
    pub policy_name: String,
    pub violating_text: Option<String>,
}

impl ExemptionKey {
    pub fn new(policy_name: impl Into<String>, violating_text: Option<String>) -> Self {
        Self {
            policy_name: policy_name.into(),
            violating_text,
        }
    }
}

/// Failure details written onto a queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub message: String,
    pub category: Option<String>,
    pub policy_findings: Vec<ExemptionKey>,
}

impl ItemFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category: None,
            policy_findings: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_policy_findings(mut self, findings: Vec<ExemptionKey>) -> Self {
        self.policy_findings = findings;
        self
    }
}

/// Submission scope: one account, one content type, one action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueScope {
    pub account_id: String,
    pub operand: OperandType,
    pub action: Action,
}

impl QueueScope {
    pub fn new(account_id: impl Into<String>, operand: OperandType, action: Action) -> Self {
        Self {
            account_id: account_id.into(),
            operand,
            action,
        }
    }
}

impl fmt::Display for QueueScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account_id, self.operand, self.action)
    }
}

// =============================================================================
// Queue Item
// =============================================================================

/// A pending add, update or delete for one domain entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub operand: OperandType,
    pub action: Action,
    pub account_id: String,
    pub campaign_id: String,
    /// Owning ad group for ads and keywords; the local id for ad groups
    pub ad_group_id: Option<String>,
    pub template_id: Option<String>,
    pub natural_key: NaturalKey,
    /// Content fields consumed by the payload mapper
    pub attributes: serde_json::Value,
    /// Remote id; known up front for updates and deletes
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub error_category: Option<String>,
    /// Acknowledged policy violations sent with the next submission
    pub exemption_keys: Vec<ExemptionKey>,
    /// Exemptible violations reported by the last failure
    pub policy_findings: Vec<ExemptionKey>,
    /// Job the item is in flight with
    pub batch_job_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QueueItem {
    pub fn new(
        operand: OperandType,
        action: Action,
        account_id: impl Into<String>,
        campaign_id: impl Into<String>,
        natural_key: NaturalKey,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: QueueItemId::new(),
            operand,
            action,
            account_id: account_id.into(),
            campaign_id: campaign_id.into(),
            ad_group_id: None,
            template_id: None,
            natural_key,
            attributes: serde_json::Value::Object(Default::default()),
            external_id: None,
            error_message: None,
            error_category: None,
            exemption_keys: Vec::new(),
            policy_findings: Vec::new(),
            batch_job_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_ad_group(mut self, ad_group_id: impl Into<String>) -> Self {
        self.ad_group_id = Some(ad_group_id.into());
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }

    /// Local id of the domain entity this item mutates.
    ///
    /// Ad groups carry their own id in `ad_group_id`; other operands have
    /// no local entity id and fall back to the queue item id.
    pub fn entity_key(&self) -> String {
        match (self.operand, &self.ad_group_id) {
            (OperandType::AdGroup, Some(id)) if !id.trim().is_empty() => id.clone(),
            _ => self.id.as_string(),
        }
    }

    /// Eligible for a new submission batch.
    pub fn is_submittable(&self) -> bool {
        self.error_message.as_deref().map_or(true, str::is_empty) && self.batch_job_id.is_none()
    }

    /// Reads a string attribute, trimmed; empty strings count as missing.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            return Err(CatalogError::invalid("account_id", "cannot be empty"));
        }
        if self.campaign_id.trim().is_empty() {
            return Err(CatalogError::invalid("campaign_id", "cannot be empty"));
        }
        if self.natural_key.parent_id.trim().is_empty() {
            return Err(CatalogError::invalid("natural_key.parent_id", "cannot be empty"));
        }
        if matches!(self.action, Action::Update | Action::Delete) && self.external_id.is_none() {
            return Err(CatalogError::invalid(
                "external_id",
                format!("{} requires the remote id", self.action),
            ));
        }
        if !self.attributes.is_object() {
            return Err(CatalogError::invalid("attributes", "must be a JSON object"));
        }
        Ok(())
    }
}

// =============================================================================
// Confirmed entity, error record, campaign
// =============================================================================

/// An entity the remote platform has acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedEntity {
    pub operand: OperandType,
    /// Local entity id, see [`QueueItem::entity_key`]
    pub local_id: String,
    pub account_id: String,
    pub campaign_id: String,
    pub ad_group_id: Option<String>,
    pub natural_key: NaturalKey,
    pub external_id: String,
    pub confirmed_at: i64,
}

impl ConfirmedEntity {
    /// Mirrors a queue item that now has a remote id.
    pub fn from_queue_item(item: &QueueItem, external_id: impl Into<String>, now: i64) -> Self {
        Self {
            operand: item.operand,
            local_id: item.entity_key(),
            account_id: item.account_id.clone(),
            campaign_id: item.campaign_id.clone(),
            ad_group_id: item.ad_group_id.clone(),
            natural_key: item.natural_key.clone(),
            external_id: external_id.into(),
            confirmed_at: now,
        }
    }
}

/// One per-item remote failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Assigned by the store
    pub id: Option<i64>,
    pub operand: OperandType,
    pub account_id: String,
    pub campaign_id: String,
    pub queue_item_id: QueueItemId,
    pub batch_job_id: Option<String>,
    pub message: String,
    pub category: String,
    pub created_at: i64,
}

/// Local campaign and its remote id once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub account_id: String,
    pub external_id: Option<String>,
    pub name: String,
}

impl Campaign {
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            external_id: None,
            name: name.into(),
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enum_round_trip_through_strings() {
        for operand in OperandType::ALL {
            assert_eq!(operand.as_str().parse::<OperandType>().unwrap(), operand);
        }
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("campaign".parse::<OperandType>().is_err());
        assert!("remove".parse::<Action>().is_err());
    }

    #[test]
    fn test_natural_key_conventions() {
        assert_eq!(
            NaturalKey::keyword("ag-1", " running shoes ", "phrase").text,
            "running shoes:PHRASE"
        );
        assert_eq!(
            NaturalKey::ad("ag-1", "Fast Shoes", "https://x.test/").text,
            "Fast Shoes|https://x.test/"
        );
        assert_eq!(NaturalKey::sitelink("c-1", " Sale ").text, "Sale");
    }

    #[test]
    fn test_submittable_excludes_errors_and_in_flight() {
        let mut item = QueueItem::new(
            OperandType::Keyword,
            Action::Add,
            "acct",
            "c-1",
            NaturalKey::keyword("ag-1", "shoes", "EXACT"),
        );
        assert!(item.is_submittable());

        item.error_message = Some("DUPLICATE".to_string());
        assert!(!item.is_submittable());

        item.error_message = Some(String::new());
        assert!(item.is_submittable());

        item.batch_job_id = Some("job".to_string());
        assert!(!item.is_submittable());
    }

    #[test]
    fn test_validate_requires_external_id_for_updates() {
        let item = QueueItem::new(
            OperandType::AdGroup,
            Action::Update,
            "acct",
            "c-1",
            NaturalKey::ad_group("c-1", "Group"),
        );
        assert!(matches!(
            item.validate(),
            Err(CatalogError::InvalidInput { ref field, .. }) if field == "external_id"
        ));
        assert!(item.with_external_id("55").validate().is_ok());
    }

    #[test]
    fn test_attribute_str_treats_blank_as_missing() {
        let item = QueueItem::new(
            OperandType::AdGroup,
            Action::Add,
            "acct",
            "c-1",
            NaturalKey::ad_group("c-1", "Group"),
        )
        .with_attributes(json!({"name": "Group", "blank": "  ", "bid": 3}));

        assert_eq!(item.attribute_str("name"), Some("Group"));
        assert_eq!(item.attribute_str("blank"), None);
        assert_eq!(item.attribute_str("bid"), None);
    }

    #[test]
    fn test_confirmed_entity_keyed_by_domain_id() {
        let ad_group = QueueItem::new(
            OperandType::AdGroup,
            Action::Add,
            "acct",
            "c-1",
            NaturalKey::ad_group("c-1", "Group"),
        )
        .with_ad_group("ag-1");
        assert_eq!(
            ConfirmedEntity::from_queue_item(&ad_group, "900", 1).local_id,
            "ag-1"
        );

        let keyword = QueueItem::new(
            OperandType::Keyword,
            Action::Add,
            "acct",
            "c-1",
            NaturalKey::keyword("ag-1", "shoes", "EXACT"),
        )
        .with_ad_group("ag-1");
        assert_eq!(keyword.entity_key(), keyword.id.as_string());
    }
}
