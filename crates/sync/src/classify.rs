//! Data-driven error classifier.
//!
//! Remote failures arrive as strings (transport errors, service rejection
//! messages). The classifier maps them onto the engine taxonomy through a
//! configurable rule table instead of hard-coded branching, so deployments
//! can extend the table without code changes and tests can cover it
//! exhaustively.
//!
//! Classification is pure: no I/O, no allocation beyond the returned
//! triple, and it never fails. Unknown inputs fall back to a retryable
//! medium-severity network classification.

use serde::{Deserialize, Serialize};

use crate::error::{Classification, ErrorCategory, ErrorSeverity};

/// One pattern → classification mapping.
///
/// Patterns match case-insensitively as substrings, in table order; the
/// first hit wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub pattern: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
}

impl ClassificationRule {
    /// Construct a rule for a lowercase pattern.
    pub fn new(
        pattern: &str,
        category: ErrorCategory,
        severity: ErrorSeverity,
        retryable: bool,
    ) -> Self {
        Self { pattern: pattern.to_lowercase(), category, severity, retryable }
    }
}

/// Classifier over a configurable rule table.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
    fallback: Classification,
}

impl ErrorClassifier {
    /// Create a classifier from an explicit rule table.
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self {
            rules,
            fallback: Classification::new(ErrorCategory::Network, ErrorSeverity::Medium, true),
        }
    }

    /// Create a classifier with the standard rule table.
    ///
    /// Transient transport and service conditions classify retryable;
    /// authentication, authorization and corruption classify terminal.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            ClassificationRule::new(
                "timeout",
                ErrorCategory::Network,
                ErrorSeverity::Medium,
                true,
            ),
            ClassificationRule::new(
                "network_error",
                ErrorCategory::Network,
                ErrorSeverity::Medium,
                true,
            ),
            ClassificationRule::new(
                "connection",
                ErrorCategory::Network,
                ErrorSeverity::Medium,
                true,
            ),
            ClassificationRule::new(
                "service_unavailable",
                ErrorCategory::Service,
                ErrorSeverity::High,
                true,
            ),
            ClassificationRule::new(
                "rate_limited",
                ErrorCategory::Service,
                ErrorSeverity::Low,
                true,
            ),
            ClassificationRule::new(
                "internal_server_error",
                ErrorCategory::Service,
                ErrorSeverity::High,
                true,
            ),
            ClassificationRule::new(
                "authentication_error",
                ErrorCategory::Security,
                ErrorSeverity::High,
                false,
            ),
            ClassificationRule::new(
                "authorization_error",
                ErrorCategory::Security,
                ErrorSeverity::High,
                false,
            ),
            ClassificationRule::new(
                "encryption",
                ErrorCategory::Security,
                ErrorSeverity::Critical,
                false,
            ),
            ClassificationRule::new(
                "data_corruption",
                ErrorCategory::Data,
                ErrorSeverity::Critical,
                false,
            ),
            ClassificationRule::new(
                "checksum_mismatch",
                ErrorCategory::Data,
                ErrorSeverity::High,
                false,
            ),
            ClassificationRule::new(
                "version conflict",
                ErrorCategory::Data,
                ErrorSeverity::Medium,
                false,
            ),
            ClassificationRule::new(
                "validation",
                ErrorCategory::Validation,
                ErrorSeverity::Medium,
                false,
            ),
        ])
    }

    /// Classify a raw failure message.
    ///
    /// Never fails; unknown messages get the retryable network fallback.
    pub fn classify(&self, message: &str) -> Classification {
        let haystack = message.to_lowercase();
        for rule in &self.rules {
            if haystack.contains(&rule.pattern) {
                return Classification::new(rule.category, rule.severity, rule.retryable);
            }
        }
        self.fallback
    }

    /// Replace the fallback classification for unknown errors.
    pub fn with_fallback(mut self, fallback: Classification) -> Self {
        self.fallback = fallback;
        self
    }

    /// Number of rules in the table.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}
