//! Google Ads API connector implementation
//!
//! Implements `BulkMutationApi` over the REST transcoding of `BatchJobService`
//! and `GoogleAdsService.Search`.

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use core_bulk::{
    BulkMutationApi, IndexedOutcome, JobRef, Operation, RemoteEntity, RemoteError,
    RemoteJobStatus, RunHandle,
};
use core_catalog::OperandType;
use core_runtime::config::RemoteApiConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{GoogleAdsError, Result};
use crate::types::{
    AddOperationsRequest, AddOperationsResponse, ApiErrorEnvelope, BatchJobOperation, Empty,
    GoogleAdsRow, ListResultsResponse, LongRunningOperation, MutateBatchJobRequest,
    MutateBatchJobResponse, SearchRequest, SearchResponse,
};
use crate::wire;

/// Default page size for `listResults`
const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Google Ads bulk mutation connector
///
/// Mutating calls (`mutate`, `addOperations`, `run`) are sent exactly once:
/// a repeated `addOperations` would break the sequence token chain. Reads
/// (`search`, `listResults`) go through the transport retry policy.
///
/// # Example
///
/// ```ignore
/// use provider_google_ads::GoogleAdsBulkClient;
///
/// let client = GoogleAdsBulkClient::new(http_client, RemoteApiConfig::from_env()?);
/// let job = client.create_job("123-456-7890").await?;
/// ```
pub struct GoogleAdsBulkClient {
    http_client: Arc<dyn HttpClient>,
    config: RemoteApiConfig,
    page_size: u32,
    read_retry: RetryPolicy,
}

impl GoogleAdsBulkClient {
    pub fn new(http_client: Arc<dyn HttpClient>, config: RemoteApiConfig) -> Self {
        Self {
            http_client,
            config,
            page_size: DEFAULT_PAGE_SIZE,
            read_retry: RetryPolicy::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    /// Customer ids are sent without dashes.
    fn customer_id(account_id: &str) -> String {
        account_id.replace('-', "")
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            path.trim_start_matches('/')
        )
    }

    /// Request with authentication headers.
    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, self.url(path))
            .bearer_token(self.config.access_token.clone())
            .header("developer-token", self.config.developer_token.clone())
            .optional_header("login-customer-id", self.config.login_customer_id.clone())
            .header("Accept", "application/json")
            .timeout(self.config.request_timeout)
    }

    fn json_request<B: Serialize>(&self, path: &str, body: &B) -> Result<HttpRequest> {
        Ok(self.request(HttpMethod::Post, path).json(body)?)
    }

    /// Sends the request and decodes a successful body.
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn send<T: DeserializeOwned>(&self, request: HttpRequest, retry: bool) -> Result<T> {
        let response = if retry {
            self.http_client
                .execute_with_retry(request, self.read_retry.clone())
                .await?
        } else {
            self.http_client.execute(request).await?
        };

        if !response.is_success() {
            return Err(Self::api_error(&response));
        }
        debug!(status = response.status, "API request succeeded");
        response.json().map_err(|e| GoogleAdsError::ParseError(e.to_string()))
    }

    /// Maps a non-2xx response onto a provider error.
    fn api_error(response: &HttpResponse) -> GoogleAdsError {
        let envelope: Option<ApiErrorEnvelope> = response.json().ok();
        let (code, message) = match &envelope {
            Some(envelope) => {
                let first = envelope.error.details.iter().flat_map(|d| &d.errors).next();
                let code = first.and_then(wire::error_code);
                let message = first
                    .map(|e| e.message.clone())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| envelope.error.message.clone());
                (code, message)
            }
            None => (
                None,
                String::from_utf8_lossy(&response.body).trim().to_string(),
            ),
        };
        warn!(status = response.status, code = ?code, "API request failed");

        match response.status {
            401 => GoogleAdsError::AuthenticationFailed(message),
            429 => GoogleAdsError::RateLimitExceeded(message),
            status_code => GoogleAdsError::ApiError {
                status_code,
                code: code.or_else(|| envelope.and_then(|e| e.error.status)),
                message,
            },
        }
    }

    /// Runs a GAQL query, following page tokens.
    async fn search(&self, account_id: &str, query: &str) -> Result<Vec<GoogleAdsRow>> {
        let path = format!(
            "customers/{}/googleAds:search",
            Self::customer_id(account_id)
        );
        let mut rows = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let request = self.json_request(
                &path,
                &SearchRequest {
                    query,
                    page_token: page_token.take(),
                },
            )?;
            let page: SearchResponse = self.send(request, true).await?;
            rows.extend(page.results);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(rows),
            }
        }
    }

    async fn create_job_inner(&self, account_id: &str) -> Result<JobRef> {
        let path = format!(
            "customers/{}/batchJobs:mutate",
            Self::customer_id(account_id)
        );
        let request = self.json_request(
            &path,
            &MutateBatchJobRequest {
                operation: BatchJobOperation { create: Empty {} },
            },
        )?;
        let response: MutateBatchJobResponse = self.send(request, false).await?;
        let resource_name = response
            .result
            .map(|r| r.resource_name)
            .ok_or(GoogleAdsError::MissingField("result.resourceName"))?;
        let job_id = wire::external_id_from_resource_name(&resource_name)
            .ok_or(GoogleAdsError::MissingField("result.resourceName"))?;

        info!(resource_name = %resource_name, "Created batch job");
        Ok(JobRef::new(job_id, resource_name))
    }

    async fn add_operations_inner(
        &self,
        job: &JobRef,
        operations: &[Operation],
        sequence_token: Option<&str>,
    ) -> Result<String> {
        let request = self.json_request(
            &format!("{}:addOperations", job.resource_name),
            &AddOperationsRequest {
                sequence_token,
                mutate_operations: operations.iter().map(wire::encode_operation).collect(),
            },
        )?;
        let response: AddOperationsResponse = self.send(request, false).await?;

        debug!(
            uploaded = operations.len(),
            total = ?response.total_operations,
            "Added operations to batch job"
        );
        response
            .next_sequence_token
            .filter(|t| !t.is_empty())
            .ok_or(GoogleAdsError::MissingField("nextSequenceToken"))
    }

    async fn run_inner(&self, job: &JobRef) -> Result<RunHandle> {
        let request = self.json_request(&format!("{}:run", job.resource_name), &Empty {})?;
        let operation: LongRunningOperation = self.send(request, false).await?;
        info!(resource_name = %job.resource_name, operation = %operation.name, "Started batch job");
        Ok(RunHandle {
            operation_name: operation.name,
        })
    }

    fn job_resource_name(account_id: &str, job_id: &str) -> String {
        format!(
            "customers/{}/batchJobs/{}",
            Self::customer_id(account_id),
            job_id
        )
    }

    async fn poll_status_inner(&self, account_id: &str, job_id: &str) -> Result<RemoteJobStatus> {
        let resource_name = Self::job_resource_name(account_id, job_id);
        let rows = self
            .search(account_id, &wire::batch_job_status_query(&resource_name))
            .await?;
        let batch_job = rows
            .into_iter()
            .find_map(|row| row.batch_job)
            .ok_or(GoogleAdsError::MissingField("batchJob"))?;

        let metadata = batch_job.metadata.unwrap_or_default();
        let mut status = RemoteJobStatus::new(wire::parse_job_state(batch_job.status.as_deref()));
        status.operation_count = metadata.operation_count.and_then(|n| u64::try_from(n).ok());
        status.executed_operation_count = metadata
            .executed_operation_count
            .and_then(|n| u64::try_from(n).ok());
        Ok(status)
    }

    async fn fetch_results_inner(
        &self,
        account_id: &str,
        job_id: &str,
    ) -> Result<Vec<IndexedOutcome>> {
        let path = format!(
            "{}:listResults",
            Self::job_resource_name(account_id, job_id)
        );
        let mut outcomes = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .request(HttpMethod::Get, &path)
                .query_param("pageSize", self.page_size.to_string());
            if let Some(token) = page_token.take() {
                request = request.query_param("pageToken", token);
            }
            let page: ListResultsResponse = self.send(request, true).await?;
            for result in page.results {
                outcomes.push(wire::decode_result(result)?);
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(results = outcomes.len(), "Listed batch job results");
        Ok(outcomes)
    }

    async fn query_entities_inner(
        &self,
        account_id: &str,
        operand: OperandType,
        parent_external_ids: &[String],
    ) -> Result<Vec<RemoteEntity>> {
        let Some(query) = wire::entity_query(operand, parent_external_ids) else {
            return Ok(Vec::new());
        };
        let rows = self.search(account_id, &query).await?;
        Ok(rows
            .iter()
            .filter_map(|row| wire::entity_from_row(operand, row))
            .collect())
    }
}

#[async_trait]
impl BulkMutationApi for GoogleAdsBulkClient {
    #[instrument(skip(self))]
    async fn create_job(&self, account_id: &str) -> std::result::Result<JobRef, RemoteError> {
        Ok(self.create_job_inner(account_id).await?)
    }

    #[instrument(skip(self, operations), fields(job_id = %job.job_id, operations = operations.len()))]
    async fn add_operations(
        &self,
        job: &JobRef,
        operations: &[Operation],
        continuation_token: Option<&str>,
    ) -> std::result::Result<String, RemoteError> {
        Ok(self
            .add_operations_inner(job, operations, continuation_token)
            .await?)
    }

    #[instrument(skip(self), fields(job_id = %job.job_id))]
    async fn run(&self, job: &JobRef) -> std::result::Result<RunHandle, RemoteError> {
        Ok(self.run_inner(job).await?)
    }

    #[instrument(skip(self))]
    async fn poll_status(
        &self,
        account_id: &str,
        job_id: &str,
    ) -> std::result::Result<RemoteJobStatus, RemoteError> {
        Ok(self.poll_status_inner(account_id, job_id).await?)
    }

    #[instrument(skip(self))]
    async fn fetch_results(
        &self,
        account_id: &str,
        job_id: &str,
    ) -> std::result::Result<Vec<IndexedOutcome>, RemoteError> {
        Ok(self.fetch_results_inner(account_id, job_id).await?)
    }

    #[instrument(skip(self, parent_external_ids), fields(parents = parent_external_ids.len()))]
    async fn query_entities(
        &self,
        account_id: &str,
        operand: OperandType,
        parent_external_ids: &[String],
    ) -> std::result::Result<Vec<RemoteEntity>, RemoteError> {
        Ok(self
            .query_entities_inner(account_id, operand, parent_external_ids)
            .await?)
    }
}
