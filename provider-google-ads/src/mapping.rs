//! Queue item to `MutateOperation` mapping
//!
//! Content fields are read from the item's `attributes`:
//!
//! | Operand   | Attributes |
//! |-----------|------------|
//! | AdGroup   | `status`, `cpc_bid_micros`, `type` (name comes from the natural key) |
//! | Keyword   | `text`, `match_type`, `status`, `cpc_bid_micros` |
//! | Ad        | `headlines`, `descriptions`, `final_url`, `path1`, `path2`, `status` |
//! | Extension | `link_text`, `final_url`, `description1`, `description2`, `status` |
//!
//! Keyword text and match type, and sitelink text, fall back to the natural
//! key when the attribute is absent.

use core_bulk::{MappingContext, MappingOutcome, Operation, PayloadMapper, ResourceKind};
use core_catalog::{Action, OperandType, QueueItem};
use serde_json::{Map, Value};

const DEFAULT_STATUS: &str = "ENABLED";
const DEFAULT_AD_GROUP_TYPE: &str = "SEARCH_STANDARD";
const MIN_HEADLINES: usize = 3;
const MIN_DESCRIPTIONS: usize = 2;

/// Builds resource names under one customer.
struct ResourceNames {
    customer: String,
}

impl ResourceNames {
    fn new(account_id: &str) -> Self {
        Self {
            customer: account_id.replace('-', ""),
        }
    }

    fn campaign(&self, id: &str) -> String {
        format!("customers/{}/campaigns/{}", self.customer, id)
    }

    fn ad_group(&self, id: &str) -> String {
        format!("customers/{}/adGroups/{}", self.customer, id)
    }

    fn ad_group_criterion(&self, ad_group: &str, id: &str) -> String {
        format!("customers/{}/adGroupCriteria/{}~{}", self.customer, ad_group, id)
    }

    fn ad_group_ad(&self, ad_group: &str, id: &str) -> String {
        format!("customers/{}/adGroupAds/{}~{}", self.customer, ad_group, id)
    }

    fn asset(&self, id: impl std::fmt::Display) -> String {
        format!("customers/{}/assets/{}", self.customer, id)
    }

    fn sitelink_link(&self, campaign: &str, asset: &str) -> String {
        format!(
            "customers/{}/campaignAssets/{}~{}~SITELINK",
            self.customer, campaign, asset
        )
    }
}

/// `PayloadMapper` for the Google Ads API.
#[derive(Debug, Clone, Default)]
pub struct GoogleAdsPayloadMapper;

impl GoogleAdsPayloadMapper {
    pub fn new() -> Self {
        Self
    }

    fn map_ad_group(&self, item: &QueueItem, ctx: &MappingContext<'_>) -> MappingOutcome {
        let names = ResourceNames::new(ctx.account_id);
        match item.action {
            Action::Add => {
                let mut body = Map::new();
                body.insert("name".into(), Value::from(item.natural_key.text.as_str()));
                body.insert("campaign".into(), Value::from(names.campaign(ctx.parent_external_id)));
                body.insert("status".into(), Value::from(status(item)));
                body.insert(
                    "type".into(),
                    Value::from(item.attribute_str("type").unwrap_or(DEFAULT_AD_GROUP_TYPE)),
                );
                insert_bid(&mut body, item);
                mapped(Operation::create(ResourceKind::AdGroup, Value::Object(body)))
            }
            Action::Update => {
                let mut body = Map::new();
                let mut mask = vec!["name".to_string()];
                body.insert("name".into(), Value::from(item.natural_key.text.as_str()));
                if let Some(status) = item.attribute_str("status") {
                    body.insert("status".into(), Value::from(status));
                    mask.push("status".into());
                }
                if insert_bid(&mut body, item) {
                    mask.push("cpcBidMicros".into());
                }
                mapped(Operation::update(
                    ResourceKind::AdGroup,
                    names.ad_group(external_id(item)),
                    Value::Object(body),
                    mask,
                ))
            }
            Action::Delete => mapped(Operation::remove(
                ResourceKind::AdGroup,
                names.ad_group(external_id(item)),
            )),
        }
    }

    fn map_keyword(&self, item: &QueueItem, ctx: &MappingContext<'_>) -> MappingOutcome {
        let names = ResourceNames::new(ctx.account_id);
        let ad_group = ctx.parent_external_id;
        match item.action {
            Action::Add => {
                let Some((text, match_type)) = keyword_parts(item) else {
                    return skip("keyword text and match type are required");
                };
                let mut body = Map::new();
                body.insert("adGroup".into(), Value::from(names.ad_group(ad_group)));
                body.insert("status".into(), Value::from(status(item)));
                body.insert(
                    "keyword".into(),
                    object([("text", text.into()), ("matchType", match_type.into())]),
                );
                insert_bid(&mut body, item);
                mapped(Operation::create(
                    ResourceKind::AdGroupCriterion,
                    Value::Object(body),
                ))
            }
            Action::Update => {
                let mut body = Map::new();
                let mut mask = Vec::new();
                if let Some(status) = item.attribute_str("status") {
                    body.insert("status".into(), Value::from(status));
                    mask.push("status".to_string());
                }
                if insert_bid(&mut body, item) {
                    mask.push("cpcBidMicros".to_string());
                }
                if mask.is_empty() {
                    return skip("keyword update changes neither status nor bid");
                }
                mapped(Operation::update(
                    ResourceKind::AdGroupCriterion,
                    names.ad_group_criterion(ad_group, external_id(item)),
                    Value::Object(body),
                    mask,
                ))
            }
            Action::Delete => mapped(Operation::remove(
                ResourceKind::AdGroupCriterion,
                names.ad_group_criterion(ad_group, external_id(item)),
            )),
        }
    }

    fn map_ad(&self, item: &QueueItem, ctx: &MappingContext<'_>) -> MappingOutcome {
        let names = ResourceNames::new(ctx.account_id);
        let ad_group = ctx.parent_external_id;
        match item.action {
            Action::Add => {
                let headlines = string_list(item, "headlines");
                let descriptions = string_list(item, "descriptions");
                if headlines.len() < MIN_HEADLINES {
                    return skip(format!("responsive search ad needs {} headlines", MIN_HEADLINES));
                }
                if descriptions.len() < MIN_DESCRIPTIONS {
                    return skip(format!(
                        "responsive search ad needs {} descriptions",
                        MIN_DESCRIPTIONS
                    ));
                }
                let Some(final_url) = item.attribute_str("final_url") else {
                    return skip("final_url is required");
                };

                let mut rsa = Map::new();
                rsa.insert("headlines".into(), text_assets(&headlines));
                rsa.insert("descriptions".into(), text_assets(&descriptions));
                for path in ["path1", "path2"] {
                    if let Some(value) = item.attribute_str(path) {
                        rsa.insert(path.into(), Value::from(value));
                    }
                }
                let ad = object([
                    ("finalUrls", url_list(final_url)),
                    ("responsiveSearchAd", Value::Object(rsa)),
                ]);
                let body = object([
                    ("adGroup", names.ad_group(ad_group).into()),
                    ("status", status(item).into()),
                    ("ad", ad),
                ]);
                mapped(Operation::create(ResourceKind::AdGroupAd, body))
            }
            Action::Update => {
                let Some(status) = item.attribute_str("status") else {
                    return skip("only the status of an ad can be updated");
                };
                mapped(Operation::update(
                    ResourceKind::AdGroupAd,
                    names.ad_group_ad(ad_group, external_id(item)),
                    object([("status", status.into())]),
                    vec!["status".to_string()],
                ))
            }
            Action::Delete => mapped(Operation::remove(
                ResourceKind::AdGroupAd,
                names.ad_group_ad(ad_group, external_id(item)),
            )),
        }
    }

    fn map_extension(&self, item: &QueueItem, ctx: &MappingContext<'_>) -> MappingOutcome {
        let names = ResourceNames::new(ctx.account_id);
        let campaign = ctx.campaign_external_id;
        let link_text = item
            .attribute_str("link_text")
            .unwrap_or(item.natural_key.text.as_str());

        match item.action {
            Action::Add => {
                let Some(final_url) = item.attribute_str("final_url") else {
                    return skip("final_url is required");
                };
                let asset_name = names.asset(ctx.temp_ids.allocate());
                let asset = Operation::create(
                    ResourceKind::Asset,
                    object([
                        ("sitelinkAsset", sitelink(item, link_text)),
                        ("finalUrls", url_list(final_url)),
                    ]),
                )
                .with_resource_name(asset_name.clone());
                let link = Operation::create(
                    ResourceKind::CampaignAsset,
                    object([
                        ("campaign", names.campaign(campaign).into()),
                        ("asset", asset_name.into()),
                        ("fieldType", "SITELINK".into()),
                        ("status", status(item).into()),
                    ]),
                );
                MappingOutcome::Mapped(vec![asset, link])
            }
            Action::Update => {
                let asset_id = external_id(item);
                let mut body = Map::new();
                let mut mask = vec!["sitelinkAsset.linkText".to_string()];
                body.insert("sitelinkAsset".into(), sitelink(item, link_text));
                for field in ["description1", "description2"] {
                    if item.attribute_str(field).is_some() {
                        mask.push(format!("sitelinkAsset.{}", field));
                    }
                }
                if let Some(final_url) = item.attribute_str("final_url") {
                    body.insert("finalUrls".into(), url_list(final_url));
                    mask.push("finalUrls".to_string());
                }
                let asset = Operation::update(
                    ResourceKind::Asset,
                    names.asset(asset_id),
                    Value::Object(body),
                    mask,
                );
                let link = Operation::update(
                    ResourceKind::CampaignAsset,
                    names.sitelink_link(campaign, asset_id),
                    object([("status", status(item).into())]),
                    vec!["status".to_string()],
                );
                MappingOutcome::Mapped(vec![asset, link])
            }
            Action::Delete => mapped(Operation::remove(
                ResourceKind::CampaignAsset,
                names.sitelink_link(campaign, external_id(item)),
            )),
        }
    }
}

impl PayloadMapper for GoogleAdsPayloadMapper {
    fn map(&self, item: &QueueItem, ctx: &MappingContext<'_>) -> MappingOutcome {
        match item.operand {
            OperandType::AdGroup => self.map_ad_group(item, ctx),
            OperandType::Keyword => self.map_keyword(item, ctx),
            OperandType::Ad => self.map_ad(item, ctx),
            OperandType::Extension => self.map_extension(item, ctx),
        }
    }
}

fn object<const N: usize>(fields: [(&str, Value); N]) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

fn url_list(url: &str) -> Value {
    Value::Array(vec![Value::from(url)])
}

fn mapped(operation: Operation) -> MappingOutcome {
    MappingOutcome::Mapped(vec![operation])
}

fn skip(reason: impl Into<String>) -> MappingOutcome {
    MappingOutcome::Skip {
        reason: reason.into(),
    }
}

fn status(item: &QueueItem) -> &str {
    item.attribute_str("status").unwrap_or(DEFAULT_STATUS)
}

/// Present for updates and deletes; checked by item validation.
fn external_id(item: &QueueItem) -> &str {
    item.external_id.as_deref().unwrap_or_default()
}

/// Adds `cpcBidMicros` when the item carries a bid; returns whether it did.
fn insert_bid(body: &mut Map<String, Value>, item: &QueueItem) -> bool {
    match item.attributes.get("cpc_bid_micros").and_then(Value::as_i64) {
        Some(micros) => {
            body.insert("cpcBidMicros".into(), Value::String(micros.to_string()));
            true
        }
        None => false,
    }
}

fn keyword_parts(item: &QueueItem) -> Option<(String, String)> {
    let from_attributes = item
        .attribute_str("text")
        .zip(item.attribute_str("match_type"));
    if let Some((text, match_type)) = from_attributes {
        return Some((text.to_string(), match_type.to_ascii_uppercase()));
    }
    let (text, match_type) = item.natural_key.text.rsplit_once(':')?;
    (!text.is_empty() && !match_type.is_empty())
        .then(|| (text.to_string(), match_type.to_string()))
}

fn string_list(item: &QueueItem, key: &str) -> Vec<String> {
    item.attributes
        .get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn text_assets(texts: &[String]) -> Value {
    Value::Array(
        texts
            .iter()
            .map(|t| object([("text", t.as_str().into())]))
            .collect(),
    )
}

fn sitelink(item: &QueueItem, link_text: &str) -> Value {
    let mut sitelink = Map::new();
    sitelink.insert("linkText".into(), Value::from(link_text));
    for field in ["description1", "description2"] {
        if let Some(value) = item.attribute_str(field) {
            sitelink.insert(field.into(), Value::from(value));
        }
    }
    Value::Object(sitelink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_bulk::{operations_per_item, OperationKind, TemporaryIds};
    use core_catalog::NaturalKey;
    use serde_json::json;

    fn ctx<'a>(temp_ids: &'a TemporaryIds, parent: &'a str) -> MappingContext<'a> {
        MappingContext {
            account_id: "1",
            campaign_external_id: "100",
            parent_external_id: parent,
            temp_ids,
        }
    }

    fn operations(outcome: MappingOutcome) -> Vec<Operation> {
        match outcome {
            MappingOutcome::Mapped(ops) => ops,
            MappingOutcome::Skip { reason } => panic!("unexpected skip: {reason}"),
        }
    }

    #[test]
    fn test_ad_group_create() {
        let temp_ids = TemporaryIds::new();
        let item = QueueItem::new(
            OperandType::AdGroup,
            Action::Add,
            "123-456-7890",
            "c1",
            NaturalKey::ad_group("c1", "Shoes"),
        )
        .with_attributes(json!({ "cpc_bid_micros": 1_500_000 }));

        let context = MappingContext {
            account_id: "123-456-7890",
            ..ctx(&temp_ids, "100")
        };
        let ops = operations(GoogleAdsPayloadMapper::new().map(&item, &context));
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].payload["name"], "Shoes");
        assert_eq!(ops[0].payload["campaign"], "customers/1234567890/campaigns/100");
        assert_eq!(ops[0].payload["status"], "ENABLED");
        assert_eq!(ops[0].payload["cpcBidMicros"], "1500000");
    }

    #[test]
    fn test_keyword_falls_back_to_natural_key() {
        let temp_ids = TemporaryIds::new();
        let item = QueueItem::new(
            OperandType::Keyword,
            Action::Add,
            "1",
            "c1",
            NaturalKey::keyword("ag1", "running shoes", "exact"),
        )
        .with_ad_group("ag1");

        let ops = operations(GoogleAdsPayloadMapper::new().map(&item, &ctx(&temp_ids, "55")));
        assert_eq!(ops[0].resource, ResourceKind::AdGroupCriterion);
        assert_eq!(ops[0].payload["adGroup"], "customers/1/adGroups/55");
        assert_eq!(ops[0].payload["keyword"]["text"], "running shoes");
        assert_eq!(ops[0].payload["keyword"]["matchType"], "EXACT");
    }

    #[test]
    fn test_keyword_delete_uses_composite_name() {
        let temp_ids = TemporaryIds::new();
        let item = QueueItem::new(
            OperandType::Keyword,
            Action::Delete,
            "1",
            "c1",
            NaturalKey::keyword("ag1", "boots", "broad"),
        )
        .with_external_id("77");

        let ops = operations(GoogleAdsPayloadMapper::new().map(&item, &ctx(&temp_ids, "55")));
        assert_eq!(ops[0].kind, OperationKind::Remove);
        assert_eq!(
            ops[0].resource_name.as_deref(),
            Some("customers/1/adGroupCriteria/55~77")
        );
    }

    #[test]
    fn test_ad_without_enough_headlines_is_skipped() {
        let temp_ids = TemporaryIds::new();
        let item = QueueItem::new(
            OperandType::Ad,
            Action::Add,
            "1",
            "c1",
            NaturalKey::ad("ag1", "Buy shoes", "https://example.com"),
        )
        .with_attributes(json!({
            "headlines": ["Buy shoes", "Free shipping"],
            "descriptions": ["a", "b"],
            "final_url": "https://example.com",
        }));

        let outcome = GoogleAdsPayloadMapper::new().map(&item, &ctx(&temp_ids, "55"));
        assert!(matches!(outcome, MappingOutcome::Skip { .. }));
    }

    #[test]
    fn test_ad_create_builds_responsive_search_ad() {
        let temp_ids = TemporaryIds::new();
        let item = QueueItem::new(
            OperandType::Ad,
            Action::Add,
            "1",
            "c1",
            NaturalKey::ad("ag1", "Buy shoes", "https://example.com"),
        )
        .with_attributes(json!({
            "headlines": ["Buy shoes", "Free shipping", "Top brands"],
            "descriptions": ["Wide range", "Order today"],
            "final_url": "https://example.com",
            "path1": "shoes",
        }));

        let ops = operations(GoogleAdsPayloadMapper::new().map(&item, &ctx(&temp_ids, "55")));
        let rsa = &ops[0].payload["ad"]["responsiveSearchAd"];
        assert_eq!(rsa["headlines"][2]["text"], "Top brands");
        assert_eq!(rsa["path1"], "shoes");
        assert_eq!(ops[0].payload["ad"]["finalUrls"][0], "https://example.com");
    }

    #[test]
    fn test_sitelink_create_links_temporary_asset() {
        let temp_ids = TemporaryIds::new();
        let item = QueueItem::new(
            OperandType::Extension,
            Action::Add,
            "1",
            "c1",
            NaturalKey::sitelink("c1", "Contact us"),
        )
        .with_attributes(json!({ "final_url": "https://example.com/contact" }));

        let ops = operations(GoogleAdsPayloadMapper::new().map(&item, &ctx(&temp_ids, "100")));
        assert_eq!(ops.len(), operations_per_item(OperandType::Extension, Action::Add));
        assert_eq!(ops[0].resource_name.as_deref(), Some("customers/1/assets/-1"));
        assert_eq!(ops[0].payload["sitelinkAsset"]["linkText"], "Contact us");
        assert_eq!(ops[1].payload["asset"], "customers/1/assets/-1");
        assert_eq!(ops[1].payload["campaign"], "customers/1/campaigns/100");
    }

    #[test]
    fn test_sitelink_update_and_remove_counts() {
        let temp_ids = TemporaryIds::new();
        let mapper = GoogleAdsPayloadMapper::new();
        let update = QueueItem::new(
            OperandType::Extension,
            Action::Update,
            "1",
            "c1",
            NaturalKey::sitelink("c1", "Contact"),
        )
        .with_external_id("900");
        let ops = operations(mapper.map(&update, &ctx(&temp_ids, "100")));
        assert_eq!(ops.len(), operations_per_item(OperandType::Extension, Action::Update));
        assert_eq!(
            ops[1].resource_name.as_deref(),
            Some("customers/1/campaignAssets/100~900~SITELINK")
        );

        let mut remove = update.clone();
        remove.action = Action::Delete;
        let ops = operations(mapper.map(&remove, &ctx(&temp_ids, "100")));
        assert_eq!(ops.len(), operations_per_item(OperandType::Extension, Action::Delete));
        assert_eq!(ops[0].resource, ResourceKind::CampaignAsset);
    }
}
