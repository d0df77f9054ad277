//! Translation between vendor-neutral pipeline types and the Google Ads wire
//! format.

use crate::error::{GoogleAdsError, Result};
use crate::types::{BatchJobResult, GoogleAdsErrorDetail, GoogleAdsFailure, GoogleAdsRow};
use core_bulk::{
    IndexedOutcome, Operation, OperationFailure, OperationKind, OperationOutcome, RemoteEntity,
    RemoteJobState, ResourceKind,
};
use core_catalog::{ExemptionKey, NaturalKey, OperandType};
use serde_json::{Map, Value};
use tracing::debug;

/// `MutateOperation` member name for a resource.
pub fn operation_field(resource: ResourceKind) -> &'static str {
    match resource {
        ResourceKind::AdGroup => "adGroupOperation",
        ResourceKind::AdGroupAd => "adGroupAdOperation",
        ResourceKind::AdGroupCriterion => "adGroupCriterionOperation",
        ResourceKind::Asset => "assetOperation",
        ResourceKind::CampaignAsset => "campaignAssetOperation",
    }
}

/// Encodes one operation as a `MutateOperation`.
pub fn encode_operation(operation: &Operation) -> Value {
    let mut inner = Map::new();

    match operation.kind {
        OperationKind::Create | OperationKind::Update => {
            let mut body = match &operation.payload {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            if let Some(name) = &operation.resource_name {
                body.insert("resourceName".to_string(), Value::String(name.clone()));
            }
            let member = if operation.kind == OperationKind::Create {
                "create"
            } else {
                "update"
            };
            inner.insert(member.to_string(), Value::Object(body));
            if operation.kind == OperationKind::Update && !operation.update_mask.is_empty() {
                inner.insert(
                    "updateMask".to_string(),
                    Value::String(operation.update_mask.join(",")),
                );
            }
        }
        OperationKind::Remove => {
            let name = operation.resource_name.clone().unwrap_or_default();
            inner.insert("remove".to_string(), Value::String(name));
        }
    }

    if !operation.exemption_keys.is_empty() {
        let keys: Vec<Value> = operation
            .exemption_keys
            .iter()
            .map(|key| {
                let mut entry = Map::new();
                entry.insert(
                    "policyName".to_string(),
                    Value::String(key.policy_name.clone()),
                );
                if let Some(text) = &key.violating_text {
                    entry.insert("violatingText".to_string(), Value::String(text.clone()));
                }
                Value::Object(entry)
            })
            .collect();
        match operation.resource {
            ResourceKind::AdGroupCriterion => {
                inner.insert("exemptPolicyViolationKeys".to_string(), Value::Array(keys));
            }
            ResourceKind::AdGroupAd => {
                let mut parameter = Map::new();
                parameter.insert("exemptPolicyViolationKeys".to_string(), Value::Array(keys));
                inner.insert(
                    "policyValidationParameter".to_string(),
                    Value::Object(parameter),
                );
            }
            _ => {
                debug!(
                    resource = operation.resource.as_str(),
                    "Resource does not accept policy exemptions"
                );
            }
        }
    }

    let mut outer = Map::new();
    outer.insert(
        operation_field(operation.resource).to_string(),
        Value::Object(inner),
    );
    Value::Object(outer)
}

/// Maps a `BatchJobStatus` enum name onto the pipeline's job state.
pub fn parse_job_state(status: Option<&str>) -> RemoteJobState {
    match status {
        Some("PENDING") => RemoteJobState::Pending,
        Some("RUNNING") => RemoteJobState::Running,
        Some("DONE") => RemoteJobState::Done,
        None | Some("") | Some("UNSPECIFIED") => RemoteJobState::Unspecified,
        Some(_) => RemoteJobState::Unknown,
    }
}

/// Extracts the entity id from a resource name.
///
/// Composite names (`adGroupCriteria/12~34`, `campaignAssets/1~56~SITELINK`)
/// carry the entity's own id in the second component.
pub fn external_id_from_resource_name(resource_name: &str) -> Option<String> {
    let last = resource_name.rsplit('/').next()?;
    let id = match last.split('~').nth(1) {
        Some(id) => id,
        None => last,
    };
    (!id.is_empty()).then(|| id.to_string())
}

/// Decodes one `listResults` entry.
pub fn decode_result(result: BatchJobResult) -> Result<IndexedOutcome> {
    let index = result
        .operation_index
        .ok_or(GoogleAdsError::MissingField("operationIndex"))?;
    let index = usize::try_from(index)
        .map_err(|_| GoogleAdsError::ParseError(format!("negative operationIndex {}", index)))?;

    if let Some(status) = result.status.filter(|s| s.code != 0) {
        return Ok(IndexedOutcome {
            index,
            outcome: OperationOutcome::Failure(decode_failure(&status.message, &status.details)),
        });
    }

    let external_id = result
        .mutate_operation_response
        .as_ref()
        .and_then(response_resource_name)
        .and_then(|name| external_id_from_resource_name(&name));
    Ok(IndexedOutcome {
        index,
        outcome: OperationOutcome::Success { external_id },
    })
}

fn response_resource_name(response: &Value) -> Option<String> {
    response
        .as_object()?
        .values()
        .find_map(|member| member.get("resourceName")?.as_str().map(str::to_string))
}

/// Collapses a `GoogleAdsFailure` into one failure: the first error's code
/// and message, plus every exemptible policy key.
pub fn decode_failure(fallback_message: &str, details: &[GoogleAdsFailure]) -> OperationFailure {
    let errors: Vec<&GoogleAdsErrorDetail> = details.iter().flat_map(|d| &d.errors).collect();

    let message = errors
        .first()
        .map(|e| e.message.as_str())
        .filter(|m| !m.is_empty())
        .unwrap_or(fallback_message);
    let mut failure = OperationFailure::new(message);
    if let Some(code) = errors.first().and_then(|e| error_code(e)) {
        failure = failure.with_code(code);
    }

    let mut exemptible = Vec::new();
    for error in &errors {
        let Some(details) = &error.details else {
            continue;
        };
        if let Some(violation) = &details.policy_violation_details {
            if let (true, Some(key)) = (violation.is_exemptible, &violation.key) {
                exemptible.push(ExemptionKey::new(
                    key.policy_name.clone(),
                    key.violating_text.clone(),
                ));
            }
        }
        if let Some(finding) = &details.policy_finding_details {
            exemptible.extend(
                finding
                    .policy_topic_entries
                    .iter()
                    .map(|entry| ExemptionKey::new(entry.topic.clone(), None)),
            );
        }
    }
    failure.with_exemptible(exemptible)
}

/// `errorCode` rendered as `namespace.VALUE`.
pub fn error_code(error: &GoogleAdsErrorDetail) -> Option<String> {
    let (namespace, value) = error.error_code.iter().next()?;
    Some(match value.as_str() {
        Some(value) => format!("{}.{}", namespace, value),
        None => namespace.clone(),
    })
}

// ============================================================================
// GAQL
// ============================================================================

/// Status query for one batch job.
pub fn batch_job_status_query(resource_name: &str) -> String {
    format!(
        "SELECT batch_job.resource_name, batch_job.status, batch_job.metadata.operation_count, \
         batch_job.metadata.executed_operation_count FROM batch_job \
         WHERE batch_job.resource_name = '{}'",
        resource_name.replace('\'', "")
    )
}

/// Query for live entities of `operand` under the given parents.
///
/// Ids are numeric; anything else is dropped from the filter. Returns `None`
/// when no usable parent id remains.
pub fn entity_query(operand: OperandType, parent_external_ids: &[String]) -> Option<String> {
    let ids: Vec<&str> = parent_external_ids
        .iter()
        .map(String::as_str)
        .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
        .collect();
    if ids.is_empty() {
        return None;
    }
    let ids = ids.join(", ");

    Some(match operand {
        OperandType::AdGroup => format!(
            "SELECT ad_group.id, ad_group.name, campaign.id FROM ad_group \
             WHERE campaign.id IN ({}) AND ad_group.status != 'REMOVED'",
            ids
        ),
        OperandType::Keyword => format!(
            "SELECT ad_group_criterion.criterion_id, ad_group_criterion.keyword.text, \
             ad_group_criterion.keyword.match_type, ad_group.id FROM ad_group_criterion \
             WHERE ad_group.id IN ({}) AND ad_group_criterion.type = 'KEYWORD' \
             AND ad_group_criterion.status != 'REMOVED'",
            ids
        ),
        OperandType::Ad => format!(
            "SELECT ad_group_ad.ad.id, ad_group_ad.ad.final_urls, \
             ad_group_ad.ad.responsive_search_ad.headlines, ad_group.id FROM ad_group_ad \
             WHERE ad_group.id IN ({}) AND ad_group_ad.status != 'REMOVED'",
            ids
        ),
        OperandType::Extension => format!(
            "SELECT asset.id, asset.sitelink_asset.link_text, campaign.id FROM campaign_asset \
             WHERE campaign.id IN ({}) AND campaign_asset.field_type = 'SITELINK' \
             AND campaign_asset.status != 'REMOVED'",
            ids
        ),
    })
}

/// Converts a search row into a remote entity whose `text` is built the way
/// the local natural key is.
pub fn entity_from_row(operand: OperandType, row: &GoogleAdsRow) -> Option<RemoteEntity> {
    let (external_id, parent, key) = match operand {
        OperandType::AdGroup => {
            let ad_group = row.ad_group.as_ref()?;
            let parent = row.campaign.as_ref()?.id?;
            let key = NaturalKey::ad_group("", ad_group.name.as_deref()?);
            (ad_group.id?, parent, key)
        }
        OperandType::Keyword => {
            let criterion = row.ad_group_criterion.as_ref()?;
            let keyword = criterion.keyword.as_ref()?;
            let parent = row.ad_group.as_ref()?.id?;
            let key = NaturalKey::keyword("", &keyword.text, &keyword.match_type);
            (criterion.criterion_id?, parent, key)
        }
        OperandType::Ad => {
            let ad = row.ad_group_ad.as_ref()?.ad.as_ref()?;
            let parent = row.ad_group.as_ref()?.id?;
            let headline = ad.responsive_search_ad.as_ref()?.headlines.first()?;
            let key = NaturalKey::ad("", &headline.text, ad.final_urls.first()?);
            (ad.id?, parent, key)
        }
        OperandType::Extension => {
            let asset = row.asset.as_ref()?;
            let parent = row.campaign.as_ref()?.id?;
            let key = NaturalKey::sitelink("", &asset.sitelink_asset.as_ref()?.link_text);
            (asset.id?, parent, key)
        }
    };

    Some(RemoteEntity {
        external_id: external_id.to_string(),
        parent_external_id: parent.to_string(),
        text: key.text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ListResultsResponse, SearchResponse};
    use serde_json::json;

    #[test]
    fn test_external_id_from_resource_names() {
        assert_eq!(
            external_id_from_resource_name("customers/1/adGroups/99").as_deref(),
            Some("99")
        );
        assert_eq!(
            external_id_from_resource_name("customers/1/adGroupCriteria/55~77").as_deref(),
            Some("77")
        );
        assert_eq!(
            external_id_from_resource_name("customers/1/campaignAssets/100~123~SITELINK")
                .as_deref(),
            Some("123")
        );
        assert_eq!(external_id_from_resource_name("customers/1/adGroups/"), None);
    }

    #[test]
    fn test_encode_update_with_mask() {
        let op = Operation::update(
            ResourceKind::AdGroup,
            "customers/1/adGroups/9",
            json!({"name": "Shoes"}),
            vec!["name".to_string(), "status".to_string()],
        );
        let encoded = encode_operation(&op);
        let inner = &encoded["adGroupOperation"];
        assert_eq!(inner["update"]["resourceName"], "customers/1/adGroups/9");
        assert_eq!(inner["update"]["name"], "Shoes");
        assert_eq!(inner["updateMask"], "name,status");
    }

    #[test]
    fn test_encode_keyword_exemptions() {
        let op = Operation::create(ResourceKind::AdGroupCriterion, json!({"status": "ENABLED"}))
            .with_exemptions(vec![ExemptionKey::new("HEALTH", Some("pill".to_string()))]);
        let encoded = encode_operation(&op);
        let keys = &encoded["adGroupCriterionOperation"]["exemptPolicyViolationKeys"];
        assert_eq!(keys[0]["policyName"], "HEALTH");
        assert_eq!(keys[0]["violatingText"], "pill");

        let ad = Operation::remove(ResourceKind::AdGroupAd, "customers/1/adGroupAds/2~3")
            .with_exemptions(vec![ExemptionKey::new("TRADEMARKS", None)]);
        let encoded = encode_operation(&ad);
        assert_eq!(encoded["adGroupAdOperation"]["remove"], "customers/1/adGroupAds/2~3");
        assert_eq!(
            encoded["adGroupAdOperation"]["policyValidationParameter"]["exemptPolicyViolationKeys"]
                [0]["policyName"],
            "TRADEMARKS"
        );
    }

    #[test]
    fn test_decode_success_and_failure() {
        let page: ListResultsResponse = serde_json::from_str(
            r#"{"results": [
                {"operationIndex": "0",
                 "mutateOperationResponse": {"adGroupResult": {"resourceName": "customers/1/adGroups/501"}}},
                {"operationIndex": "1",
                 "status": {"code": 3, "message": "Multiple errors",
                   "details": [{"errors": [{
                     "errorCode": {"adGroupError": "DUPLICATE_ADGROUP_NAME"},
                     "message": "Ad group with the same name already exists."}]}]}}
            ]}"#,
        )
        .unwrap();

        let outcomes: Vec<IndexedOutcome> = page
            .results
            .into_iter()
            .map(|r| decode_result(r).unwrap())
            .collect();
        assert_eq!(outcomes[0], IndexedOutcome::success(0, "501"));
        match &outcomes[1].outcome {
            OperationOutcome::Failure(failure) => {
                assert_eq!(outcomes[1].index, 1);
                assert_eq!(
                    failure.code.as_deref(),
                    Some("adGroupError.DUPLICATE_ADGROUP_NAME")
                );
                assert_eq!(failure.message, "Ad group with the same name already exists.");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_decode_result_requires_index() {
        let result: BatchJobResult = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            decode_result(result),
            Err(GoogleAdsError::MissingField("operationIndex"))
        ));
    }

    #[test]
    fn test_entity_query_drops_non_numeric_ids() {
        let query = entity_query(
            OperandType::Keyword,
            &["12".to_string(), "3' OR '1".to_string(), "45".to_string()],
        )
        .unwrap();
        assert!(query.contains("ad_group.id IN (12, 45)"));
        assert!(entity_query(OperandType::AdGroup, &["x".to_string()]).is_none());
    }

    #[test]
    fn test_entity_text_matches_local_keys() {
        let page: SearchResponse = serde_json::from_str(
            r#"{"results": [
                {"adGroupCriterion": {"criterionId": "77", "keyword": {"text": "running shoes", "matchType": "PHRASE"}},
                 "adGroup": {"id": "55"}},
                {"adGroupCriterion": {"criterionId": "78"}, "adGroup": {"id": "55"}}
            ]}"#,
        )
        .unwrap();

        let entities: Vec<RemoteEntity> = page
            .results
            .iter()
            .filter_map(|row| entity_from_row(OperandType::Keyword, row))
            .collect();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].external_id, "77");
        assert_eq!(entities[0].parent_external_id, "55");
        assert_eq!(
            entities[0].text,
            NaturalKey::keyword("ag", "running shoes", "phrase").text
        );
    }

    #[test]
    fn test_parse_job_state() {
        assert_eq!(parse_job_state(Some("DONE")), RemoteJobState::Done);
        assert_eq!(parse_job_state(Some("PENDING")), RemoteJobState::Pending);
        assert_eq!(parse_job_state(None), RemoteJobState::Unspecified);
        assert_eq!(parse_job_state(Some("UNKNOWN")), RemoteJobState::Unknown);
        assert_eq!(parse_job_state(Some("PAUSED")), RemoteJobState::Unknown);
    }
}
