//! # Bulk Sync Configuration
//!
//! Tunables for the bulk mutation pipeline and credentials for the remote
//! advertising API.
//!
//! ## Overview
//!
//! Configuration is assembled with builders that enforce fail-fast
//! validation: an invalid combination (a backoff cap below its base, an
//! empty developer token) is rejected at build time with an actionable
//! [`Error::Config`] rather than surfacing mid-pipeline.
//!
//! ## Usage
//!
//! ### Defaults
//!
//! ```
//! use core_runtime::config::BulkSyncConfig;
//!
//! let config = BulkSyncConfig::builder().build().unwrap();
//! assert_eq!(config.max_poll_attempts, 50);
//! ```
//!
//! ### From the environment
//!
//! ```no_run
//! use core_runtime::config::{BulkSyncConfig, RemoteApiConfig};
//!
//! let sync = BulkSyncConfig::from_env().expect("invalid ADSYNC_* settings");
//! let remote = RemoteApiConfig::from_env().expect("missing API credentials");
//! ```
//!
//! | Variable | Field |
//! |----------|-------|
//! | `ADSYNC_BATCH_SIZE` | `batch_size` |
//! | `ADSYNC_MAX_OPERATIONS_PER_UPLOAD` | `max_operations_per_upload` |
//! | `ADSYNC_POLL_GRACE_SECS` | `poll_grace_period` |
//! | `ADSYNC_POLL_BACKOFF_BASE_SECS` | `poll_backoff_base` |
//! | `ADSYNC_POLL_BACKOFF_CAP_SECS` | `poll_backoff_cap` |
//! | `ADSYNC_MAX_POLL_ATTEMPTS` | `max_poll_attempts` |
//! | `ADSYNC_API_BASE_URL` | `RemoteApiConfig::base_url` |
//! | `ADSYNC_API_VERSION` | `RemoteApiConfig::api_version` |
//! | `ADSYNC_DEVELOPER_TOKEN` | `RemoteApiConfig::developer_token` |
//! | `ADSYNC_ACCESS_TOKEN` | `RemoteApiConfig::access_token` |
//! | `ADSYNC_LOGIN_CUSTOMER_ID` | `RemoteApiConfig::login_customer_id` |

use crate::error::{Error, Result};
use std::str::FromStr;
use std::time::Duration;

/// Largest operation count the remote API accepts in one upload call.
pub const REMOTE_UPLOAD_LIMIT: usize = 10_000;

/// Pipeline tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkSyncConfig {
    /// Maximum queue items selected into one submission batch
    pub batch_size: usize,

    /// Maximum operations carried by a single upload call
    pub max_operations_per_upload: usize,

    /// Delay between job creation and the first poll
    pub poll_grace_period: Duration,

    /// Base of the exponential poll backoff
    pub poll_backoff_base: Duration,

    /// Upper bound on the delay between two polls
    pub poll_backoff_cap: Duration,

    /// Attempts allowed while the remote job is running before it is
    /// declared stalled
    pub max_poll_attempts: u32,

    /// Attempts after which a poll on a job that is no longer pending is
    /// treated as a consistency fault
    pub unexpected_state_attempt_limit: u32,

    /// Page size requested when listing job results and entities
    pub results_page_size: u32,

    /// How long terminal jobs are kept before pruning
    pub terminal_job_retention: Duration,
}

impl Default for BulkSyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 5_000,
            max_operations_per_upload: REMOTE_UPLOAD_LIMIT,
            poll_grace_period: Duration::from_secs(60),
            poll_backoff_base: Duration::from_secs(15),
            poll_backoff_cap: Duration::from_secs(30 * 60),
            max_poll_attempts: 50,
            unexpected_state_attempt_limit: 7,
            results_page_size: 1_000,
            terminal_job_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl BulkSyncConfig {
    pub fn builder() -> BulkSyncConfigBuilder {
        BulkSyncConfigBuilder::default()
    }

    /// Loads overrides from `ADSYNC_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(v) = parse_var::<usize, _>(&lookup, "ADSYNC_BATCH_SIZE")? {
            builder = builder.batch_size(v);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "ADSYNC_MAX_OPERATIONS_PER_UPLOAD")? {
            builder = builder.max_operations_per_upload(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "ADSYNC_POLL_GRACE_SECS")? {
            builder = builder.poll_grace_period(Duration::from_secs(v));
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "ADSYNC_POLL_BACKOFF_BASE_SECS")? {
            builder = builder.poll_backoff_base(Duration::from_secs(v));
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "ADSYNC_POLL_BACKOFF_CAP_SECS")? {
            builder = builder.poll_backoff_cap(Duration::from_secs(v));
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "ADSYNC_MAX_POLL_ATTEMPTS")? {
            builder = builder.max_poll_attempts(v);
        }

        builder.build()
    }

    /// Validates the configuration.
    ///
    /// This checks:
    /// - Batch and upload sizes are positive
    /// - Upload size does not exceed the remote per-call limit
    /// - Backoff base is positive and not above the cap
    /// - The poll ceiling is positive
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("Batch size must be greater than 0".to_string()));
        }

        if self.max_operations_per_upload == 0 {
            return Err(Error::Config(
                "Operations per upload must be greater than 0".to_string(),
            ));
        }

        if self.max_operations_per_upload > REMOTE_UPLOAD_LIMIT {
            return Err(Error::Config(format!(
                "Operations per upload ({}) exceeds the remote limit of {}",
                self.max_operations_per_upload, REMOTE_UPLOAD_LIMIT
            )));
        }

        if self.poll_backoff_base.is_zero() {
            return Err(Error::Config(
                "Poll backoff base must be greater than 0".to_string(),
            ));
        }

        if self.poll_backoff_cap < self.poll_backoff_base {
            return Err(Error::Config(format!(
                "Poll backoff cap ({:?}) must not be below the base ({:?})",
                self.poll_backoff_cap, self.poll_backoff_base
            )));
        }

        if self.max_poll_attempts == 0 {
            return Err(Error::Config(
                "Max poll attempts must be greater than 0".to_string(),
            ));
        }

        if self.results_page_size == 0 {
            return Err(Error::Config(
                "Results page size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`BulkSyncConfig`].
#[derive(Debug, Default)]
pub struct BulkSyncConfigBuilder {
    config: BulkSyncConfig,
}

impl BulkSyncConfigBuilder {
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn max_operations_per_upload(mut self, limit: usize) -> Self {
        self.config.max_operations_per_upload = limit;
        self
    }

    pub fn poll_grace_period(mut self, grace: Duration) -> Self {
        self.config.poll_grace_period = grace;
        self
    }

    pub fn poll_backoff_base(mut self, base: Duration) -> Self {
        self.config.poll_backoff_base = base;
        self
    }

    pub fn poll_backoff_cap(mut self, cap: Duration) -> Self {
        self.config.poll_backoff_cap = cap;
        self
    }

    pub fn max_poll_attempts(mut self, attempts: u32) -> Self {
        self.config.max_poll_attempts = attempts;
        self
    }

    pub fn unexpected_state_attempt_limit(mut self, attempts: u32) -> Self {
        self.config.unexpected_state_attempt_limit = attempts;
        self
    }

    pub fn results_page_size(mut self, size: u32) -> Self {
        self.config.results_page_size = size;
        self
    }

    pub fn terminal_job_retention(mut self, retention: Duration) -> Self {
        self.config.terminal_job_retention = retention;
        self
    }

    /// Builds the config, failing fast on invalid values.
    pub fn build(self) -> Result<BulkSyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Credentials and endpoint for the remote advertising API.
///
/// # Security Note
///
/// Tokens should be injected from the environment or a secret store, never
/// compiled in. The `Debug` output redacts them.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteApiConfig {
    pub base_url: String,
    pub api_version: String,
    pub developer_token: String,
    pub access_token: String,
    /// Manager account used for `login-customer-id`, digits only
    pub login_customer_id: Option<String>,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for RemoteApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteApiConfig")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("developer_token", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .field("login_customer_id", &self.login_customer_id)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl RemoteApiConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://googleads.googleapis.com";
    pub const DEFAULT_API_VERSION: &'static str = "v17";

    pub fn new(developer_token: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            api_version: Self::DEFAULT_API_VERSION.to_string(),
            developer_token: developer_token.into(),
            access_token: access_token.into(),
            login_customer_id: None,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Sets the manager account; dashes (`123-456-7890`) are stripped.
    pub fn with_login_customer_id(mut self, id: impl Into<String>) -> Self {
        self.login_customer_id = Some(id.into().replace('-', ""));
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let developer_token = lookup("ADSYNC_DEVELOPER_TOKEN").ok_or_else(|| {
            Error::Config("ADSYNC_DEVELOPER_TOKEN is not set".to_string())
        })?;
        let access_token = lookup("ADSYNC_ACCESS_TOKEN")
            .ok_or_else(|| Error::Config("ADSYNC_ACCESS_TOKEN is not set".to_string()))?;

        let mut config = Self::new(developer_token, access_token);
        if let Some(url) = lookup("ADSYNC_API_BASE_URL") {
            config = config.with_base_url(url);
        }
        if let Some(version) = lookup("ADSYNC_API_VERSION") {
            config = config.with_api_version(version);
        }
        if let Some(id) = lookup("ADSYNC_LOGIN_CUSTOMER_ID") {
            config = config.with_login_customer_id(id);
        }

        config.validate()?;
        Ok(config)
    }

    /// `{base_url}/{api_version}` without a trailing slash.
    pub fn versioned_base(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_version
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.developer_token.trim().is_empty() {
            return Err(Error::Config("Developer token cannot be empty".to_string()));
        }

        if self.access_token.trim().is_empty() {
            return Err(Error::Config("Access token cannot be empty".to_string()));
        }

        if !self.base_url.starts_with("https://") && !self.base_url.starts_with("http://") {
            return Err(Error::Config(format!(
                "API base URL must be http(s): {}",
                self.base_url
            )));
        }

        if let Some(ref id) = self.login_customer_id {
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::Config(format!(
                    "Login customer id must contain only digits: {}",
                    id
                )));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{} has invalid value '{}': {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = BulkSyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 5_000);
        assert_eq!(config.max_operations_per_upload, 10_000);
        assert_eq!(config.poll_grace_period, Duration::from_secs(60));
        assert_eq!(config.unexpected_state_attempt_limit, 7);
    }

    #[test]
    fn test_builder_rejects_oversized_upload() {
        let result = BulkSyncConfig::builder()
            .max_operations_per_upload(REMOTE_UPLOAD_LIMIT + 1)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_cap_below_base() {
        let result = BulkSyncConfig::builder()
            .poll_backoff_base(Duration::from_secs(60))
            .poll_backoff_cap(Duration::from_secs(30))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_lookup_overrides_defaults() {
        let config = BulkSyncConfig::from_lookup(lookup_from(&[
            ("ADSYNC_BATCH_SIZE", "250"),
            ("ADSYNC_MAX_POLL_ATTEMPTS", " 7 "),
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 250);
        assert_eq!(config.max_poll_attempts, 7);
        assert_eq!(config.poll_backoff_base, Duration::from_secs(15));
    }

    #[test]
    fn test_from_lookup_reports_bad_number() {
        let err = BulkSyncConfig::from_lookup(lookup_from(&[("ADSYNC_BATCH_SIZE", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("ADSYNC_BATCH_SIZE"));
    }

    #[test]
    fn test_remote_config_requires_tokens() {
        let err = RemoteApiConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("ADSYNC_DEVELOPER_TOKEN"));

        let config = RemoteApiConfig::from_lookup(lookup_from(&[
            ("ADSYNC_DEVELOPER_TOKEN", "dev"),
            ("ADSYNC_ACCESS_TOKEN", "ya29"),
            ("ADSYNC_LOGIN_CUSTOMER_ID", "123-456-7890"),
        ]))
        .unwrap();
        assert_eq!(config.login_customer_id.as_deref(), Some("1234567890"));
        assert_eq!(config.versioned_base(), "https://googleads.googleapis.com/v17");
    }

    #[test]
    fn test_remote_config_rejects_non_numeric_customer() {
        let config = RemoteApiConfig::new("dev", "token").with_login_customer_id("abc");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_config_debug_redacts_tokens() {
        let config = RemoteApiConfig::new("dev-secret", "access-secret");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("dev-secret"));
        assert!(!rendered.contains("access-secret"));
    }
}
