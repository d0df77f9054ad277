//! Integration tests for logging and configuration loading

use core_runtime::config::BulkSyncConfig;
use core_runtime::logging::{
    init_logging, mask_identifier, redact_if_sensitive, LogFormat, LogLevel, LoggingConfig,
};
use std::time::Duration;

#[test]
fn test_logging_initializes_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug);

    init_logging(config.clone()).expect("first initialization succeeds");
    tracing::info!(job_id = "job-1", "logged after init");

    // The global subscriber is already set.
    assert!(init_logging(config).is_err());
}

#[test]
fn test_credentials_never_reach_logs() {
    let token = "1/abcdef-developer";
    assert_eq!(redact_if_sensitive("developer_token", token), "[REDACTED]");
    assert_eq!(redact_if_sensitive("access_token", token), "[REDACTED]");
    assert_eq!(mask_identifier("5550001234"), "******1234");
}

#[test]
fn test_env_overrides_compose_with_defaults() {
    let config = BulkSyncConfig::from_lookup(|key| match key {
        "ADSYNC_POLL_GRACE_SECS" => Some("5".to_string()),
        "ADSYNC_POLL_BACKOFF_CAP_SECS" => Some("600".to_string()),
        _ => None,
    })
    .unwrap();

    assert_eq!(config.poll_grace_period, Duration::from_secs(5));
    assert_eq!(config.poll_backoff_cap, Duration::from_secs(600));
    assert_eq!(config.max_poll_attempts, 50);
}
