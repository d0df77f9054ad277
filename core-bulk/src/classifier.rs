//! Error Classifier: turns a remote failure into a short category.
//!
//! Stable machine codes are looked up first (exact code, then the code's
//! namespace); message phrases are only a fallback because message text is
//! not a stable contract.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The remote rejected a change that would not alter anything
    IdenticalAndRedundant,
    Duplicate,
    PolicyViolation,
    InvalidField,
    LimitExceeded,
    ParentNotFound,
    Authorization,
    Quota,
    Internal,
    Unclassified,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::IdenticalAndRedundant => "identical_and_redundant",
            ErrorCategory::Duplicate => "duplicate",
            ErrorCategory::PolicyViolation => "policy_violation",
            ErrorCategory::InvalidField => "invalid_field",
            ErrorCategory::LimitExceeded => "limit_exceeded",
            ErrorCategory::ParentNotFound => "parent_not_found",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Quota => "quota",
            ErrorCategory::Internal => "internal",
            ErrorCategory::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, code: Option<&str>, message: &str) -> ErrorCategory;
}

const CODE_TABLE: &[(&str, ErrorCategory)] = &[
    ("mutateError.IDENTICAL_AND_REDUNDANT", ErrorCategory::IdenticalAndRedundant),
    ("adGroupError.DUPLICATE_ADGROUP_NAME", ErrorCategory::Duplicate),
    ("mutateError.RESOURCE_ALREADY_EXISTS", ErrorCategory::Duplicate),
    ("criterionError.KEYWORD_ALREADY_EXISTS", ErrorCategory::Duplicate),
    ("assetError.DUPLICATE_ASSET", ErrorCategory::Duplicate),
    ("policyFindingError.POLICY_FINDING", ErrorCategory::PolicyViolation),
    ("policyViolationError.POLICY_ERROR", ErrorCategory::PolicyViolation),
    ("stringLengthError.TOO_LONG", ErrorCategory::InvalidField),
    ("stringLengthError.TOO_SHORT", ErrorCategory::InvalidField),
    ("fieldError.REQUIRED", ErrorCategory::InvalidField),
    ("urlFieldError.INVALID_URL", ErrorCategory::InvalidField),
    ("mutateError.RESOURCE_NOT_FOUND", ErrorCategory::ParentNotFound),
    ("adGroupError.CANNOT_ADD_ADGROUP_TO_REMOVED_CAMPAIGN", ErrorCategory::ParentNotFound),
    ("quotaError.RESOURCE_EXHAUSTED", ErrorCategory::Quota),
    ("quotaError.RESOURCE_TEMPORARILY_EXHAUSTED", ErrorCategory::Quota),
    ("internalError.INTERNAL_ERROR", ErrorCategory::Internal),
    ("internalError.TRANSIENT_ERROR", ErrorCategory::Internal),
];

const NAMESPACE_TABLE: &[(&str, ErrorCategory)] = &[
    ("resourceCountLimitExceededError", ErrorCategory::LimitExceeded),
    ("policyFindingError", ErrorCategory::PolicyViolation),
    ("policyViolationError", ErrorCategory::PolicyViolation),
    ("authorizationError", ErrorCategory::Authorization),
    ("authenticationError", ErrorCategory::Authorization),
    ("quotaError", ErrorCategory::Quota),
    ("internalError", ErrorCategory::Internal),
    ("stringLengthError", ErrorCategory::InvalidField),
    ("fieldError", ErrorCategory::InvalidField),
];

/// Checked in order against the lowercased message.
const PHRASE_TABLE: &[(&str, ErrorCategory)] = &[
    ("identical and redundant", ErrorCategory::IdenticalAndRedundant),
    ("identical_and_redundant", ErrorCategory::IdenticalAndRedundant),
    ("duplicate", ErrorCategory::Duplicate),
    ("already exists", ErrorCategory::Duplicate),
    ("policy", ErrorCategory::PolicyViolation),
    ("too long", ErrorCategory::InvalidField),
    ("required field", ErrorCategory::InvalidField),
    ("invalid", ErrorCategory::InvalidField),
    ("limit exceeded", ErrorCategory::LimitExceeded),
    ("too many", ErrorCategory::LimitExceeded),
    ("not found", ErrorCategory::ParentNotFound),
    ("permission", ErrorCategory::Authorization),
    ("not authorized", ErrorCategory::Authorization),
    ("quota", ErrorCategory::Quota),
    ("internal error", ErrorCategory::Internal),
];

/// Table-driven classifier for Google Ads style error codes.
#[derive(Debug, Clone)]
pub struct DefaultErrorClassifier {
    codes: HashMap<String, ErrorCategory>,
}

impl DefaultErrorClassifier {
    pub fn new() -> Self {
        Self {
            codes: CODE_TABLE
                .iter()
                .map(|(code, category)| (code.to_string(), *category))
                .collect(),
        }
    }

    /// Adds or overrides an exact code mapping.
    pub fn with_code(mut self, code: impl Into<String>, category: ErrorCategory) -> Self {
        self.codes.insert(code.into(), category);
        self
    }

    fn by_code(&self, code: &str) -> Option<ErrorCategory> {
        if let Some(category) = self.codes.get(code) {
            return Some(*category);
        }
        let namespace = code.split('.').next()?;
        NAMESPACE_TABLE
            .iter()
            .find(|(ns, _)| *ns == namespace)
            .map(|(_, category)| *category)
    }
}

impl Default for DefaultErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier for DefaultErrorClassifier {
    fn classify(&self, code: Option<&str>, message: &str) -> ErrorCategory {
        if let Some(category) = code.and_then(|c| self.by_code(c.trim())) {
            return category;
        }
        let lowered = message.to_lowercase();
        PHRASE_TABLE
            .iter()
            .find(|(phrase, _)| lowered.contains(phrase))
            .map_or(ErrorCategory::Unclassified, |(_, category)| *category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_code_wins_over_message() {
        let classifier = DefaultErrorClassifier::new();
        assert_eq!(
            classifier.classify(Some("adGroupError.DUPLICATE_ADGROUP_NAME"), "policy text"),
            ErrorCategory::Duplicate
        );
    }

    #[test]
    fn test_namespace_fallback() {
        let classifier = DefaultErrorClassifier::new();
        assert_eq!(
            classifier.classify(Some("authorizationError.USER_PERMISSION_DENIED"), ""),
            ErrorCategory::Authorization
        );
        assert_eq!(
            classifier.classify(Some("resourceCountLimitExceededError.ACCOUNT_LIMIT"), ""),
            ErrorCategory::LimitExceeded
        );
    }

    #[test]
    fn test_message_phrases() {
        let classifier = DefaultErrorClassifier::new();
        assert_eq!(
            classifier.classify(None, "The operation is Identical and Redundant."),
            ErrorCategory::IdenticalAndRedundant
        );
        assert_eq!(
            classifier.classify(Some("unknownError.X"), "Keyword already exists"),
            ErrorCategory::Duplicate
        );
        assert_eq!(
            classifier.classify(None, "something odd"),
            ErrorCategory::Unclassified
        );
    }

    #[test]
    fn test_custom_code() {
        let classifier = DefaultErrorClassifier::new()
            .with_code("campaignError.CAMPAIGN_ENDED", ErrorCategory::ParentNotFound);
        assert_eq!(
            classifier.classify(Some("campaignError.CAMPAIGN_ENDED"), ""),
            ErrorCategory::ParentNotFound
        );
    }
}
