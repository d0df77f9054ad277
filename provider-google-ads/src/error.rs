//! Error types for the Google Ads provider

use core_bulk::RemoteError;
use thiserror::Error;

/// Google Ads provider errors
#[derive(Error, Debug)]
pub enum GoogleAdsError {
    /// Credentials were rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// API request returned an error
    #[error("Google Ads API error (status {status_code}): {message}")]
    ApiError {
        status_code: u16,
        /// First `GoogleAdsFailure` error code, e.g. `authorizationError.USER_PERMISSION_DENIED`
        code: Option<String>,
        message: String,
    },

    /// Rate limit exceeded after transport retries
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// The response lacked a field the protocol requires
    #[error("Missing field in API response: {0}")]
    MissingField(&'static str),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] bridge_traits::error::BridgeError),
}

/// Result type for Google Ads operations
pub type Result<T> = std::result::Result<T, GoogleAdsError>;

impl From<GoogleAdsError> for RemoteError {
    fn from(error: GoogleAdsError) -> Self {
        match error {
            GoogleAdsError::AuthenticationFailed(message) => RemoteError::Api {
                code: Some("authenticationError".to_string()),
                message,
            },
            GoogleAdsError::ApiError { code, message, .. } => RemoteError::Api { code, message },
            GoogleAdsError::RateLimitExceeded(message) => RemoteError::Transport(message),
            GoogleAdsError::ParseError(message) => RemoteError::Protocol(message),
            GoogleAdsError::MissingField(field) => {
                RemoteError::Protocol(format!("missing field {}", field))
            }
            GoogleAdsError::BridgeError(e) => RemoteError::Transport(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = GoogleAdsError::ApiError {
            status_code: 403,
            code: Some("authorizationError.USER_PERMISSION_DENIED".to_string()),
            message: "User doesn't have permission".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Google Ads API error (status 403): User doesn't have permission"
        );
    }

    #[test]
    fn test_error_conversion() {
        let remote: RemoteError = GoogleAdsError::ApiError {
            status_code: 400,
            code: Some("quotaError.RESOURCE_EXHAUSTED".to_string()),
            message: "Too many requests".to_string(),
        }
        .into();
        assert_eq!(
            remote,
            RemoteError::Api {
                code: Some("quotaError.RESOURCE_EXHAUSTED".to_string()),
                message: "Too many requests".to_string(),
            }
        );

        let remote: RemoteError = GoogleAdsError::MissingField("nextSequenceToken").into();
        assert!(matches!(remote, RemoteError::Protocol(_)));
    }
}
