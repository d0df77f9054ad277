//! Google Ads API request and response types
//!
//! Data structures for the REST (JSON) transcoding of the Google Ads API.
//! `int64` fields arrive as JSON strings; the [`int64`] helpers accept both
//! strings and numbers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Batch job mutation
// ============================================================================

/// `BatchJobService.MutateBatchJob` request with a single create operation
#[derive(Debug, Serialize)]
pub struct MutateBatchJobRequest {
    pub operation: BatchJobOperation,
}

#[derive(Debug, Serialize)]
pub struct BatchJobOperation {
    pub create: Empty,
}

#[derive(Debug, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Deserialize)]
pub struct MutateBatchJobResponse {
    pub result: Option<MutateBatchJobResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutateBatchJobResult {
    pub resource_name: String,
}

/// `BatchJobService.AddBatchJobOperations` request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOperationsRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_token: Option<&'a str>,
    pub mutate_operations: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOperationsResponse {
    #[serde(default, deserialize_with = "int64::option")]
    pub total_operations: Option<i64>,
    pub next_sequence_token: Option<String>,
}

/// Long-running operation returned by `RunBatchJob`
#[derive(Debug, Deserialize)]
pub struct LongRunningOperation {
    pub name: String,
}

// ============================================================================
// Results
// ============================================================================

/// `BatchJobService.ListBatchJobResults` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResultsResponse {
    #[serde(default)]
    pub results: Vec<BatchJobResult>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobResult {
    #[serde(default, deserialize_with = "int64::option")]
    pub operation_index: Option<i64>,
    /// One `<resource>Result` member carrying the `resourceName`
    pub mutate_operation_response: Option<serde_json::Value>,
    /// Set when the operation failed
    pub status: Option<RpcStatus>,
}

/// `google.rpc.Status`
#[derive(Debug, Default, Deserialize)]
pub struct RpcStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Vec<GoogleAdsFailure>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GoogleAdsFailure {
    #[serde(default)]
    pub errors: Vec<GoogleAdsErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAdsErrorDetail {
    /// Single entry such as `{"adGroupError": "DUPLICATE_ADGROUP_NAME"}`
    #[serde(default)]
    pub error_code: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub message: String,
    pub details: Option<ErrorDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub policy_violation_details: Option<PolicyViolationDetails>,
    pub policy_finding_details: Option<PolicyFindingDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyViolationDetails {
    #[serde(default)]
    pub is_exemptible: bool,
    pub key: Option<PolicyViolationKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyViolationKey {
    pub policy_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violating_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFindingDetails {
    #[serde(default)]
    pub policy_topic_entries: Vec<PolicyTopicEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PolicyTopicEntry {
    pub topic: String,
}

/// Error envelope of a non-2xx response
#[derive(Debug, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<GoogleAdsFailure>,
}

// ============================================================================
// GAQL search
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<GoogleAdsRow>,
    pub next_page_token: Option<String>,
}

/// One GAQL result row; only the selected resources are present.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAdsRow {
    pub batch_job: Option<BatchJobRow>,
    pub campaign: Option<IdOnly>,
    pub ad_group: Option<AdGroupRow>,
    pub ad_group_criterion: Option<AdGroupCriterionRow>,
    pub ad_group_ad: Option<AdGroupAdRow>,
    pub asset: Option<AssetRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobRow {
    pub resource_name: Option<String>,
    pub status: Option<String>,
    pub metadata: Option<BatchJobMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobMetadata {
    #[serde(default, deserialize_with = "int64::option")]
    pub operation_count: Option<i64>,
    #[serde(default, deserialize_with = "int64::option")]
    pub executed_operation_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct IdOnly {
    #[serde(default, deserialize_with = "int64::option")]
    pub id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AdGroupRow {
    #[serde(default, deserialize_with = "int64::option")]
    pub id: Option<i64>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdGroupCriterionRow {
    #[serde(default, deserialize_with = "int64::option")]
    pub criterion_id: Option<i64>,
    pub keyword: Option<KeywordInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordInfo {
    pub text: String,
    pub match_type: String,
}

#[derive(Debug, Deserialize)]
pub struct AdGroupAdRow {
    pub ad: Option<AdRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdRow {
    #[serde(default, deserialize_with = "int64::option")]
    pub id: Option<i64>,
    #[serde(default)]
    pub final_urls: Vec<String>,
    pub responsive_search_ad: Option<ResponsiveSearchAdRow>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsiveSearchAdRow {
    #[serde(default)]
    pub headlines: Vec<AdTextAsset>,
}

#[derive(Debug, Deserialize)]
pub struct AdTextAsset {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRow {
    #[serde(default, deserialize_with = "int64::option")]
    pub id: Option<i64>,
    pub sitelink_asset: Option<SitelinkAssetRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitelinkAssetRow {
    pub link_text: String,
}

/// Deserializers for proto3 `int64`, which JSON carries as a string.
pub mod int64 {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        Text(String),
    }

    pub fn option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Number(n)) => Ok(Some(n)),
            Some(Repr::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int64_accepts_strings_and_numbers() {
        let metadata: BatchJobMetadata =
            serde_json::from_str(r#"{"operationCount": "12", "executedOperationCount": 7}"#)
                .unwrap();
        assert_eq!(metadata.operation_count, Some(12));
        assert_eq!(metadata.executed_operation_count, Some(7));

        let empty: BatchJobMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.operation_count, None);
    }

    #[test]
    fn test_add_operations_request_omits_first_token() {
        let request = AddOperationsRequest {
            sequence_token: None,
            mutate_operations: vec![serde_json::json!({"adGroupOperation": {"remove": "x"}})],
        };
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("sequenceToken").is_none());
        assert_eq!(body["mutateOperations"][0]["adGroupOperation"]["remove"], "x");
    }

    #[test]
    fn test_failed_result_parses_error_details() {
        let result: BatchJobResult = serde_json::from_str(
            r#"{
                "operationIndex": "3",
                "status": {
                    "code": 3,
                    "message": "Multiple errors in 'details'.",
                    "details": [{
                        "@type": "type.googleapis.com/google.ads.googleads.v17.errors.GoogleAdsFailure",
                        "errors": [{
                            "errorCode": {"policyViolationError": "POLICY_ERROR"},
                            "message": "A policy was violated.",
                            "details": {
                                "policyViolationDetails": {
                                    "isExemptible": true,
                                    "key": {"policyName": "TRADEMARKS", "violatingText": "Acme"}
                                }
                            }
                        }]
                    }]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(result.operation_index, Some(3));
        let status = result.status.unwrap();
        let error = &status.details[0].errors[0];
        assert_eq!(error.error_code["policyViolationError"], "POLICY_ERROR");
        let violation = error
            .details
            .as_ref()
            .and_then(|d| d.policy_violation_details.as_ref())
            .unwrap();
        assert!(violation.is_exemptible);
        assert_eq!(violation.key.as_ref().unwrap().policy_name, "TRADEMARKS");
    }
}
