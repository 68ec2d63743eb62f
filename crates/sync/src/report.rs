//! Caller-facing result and monitoring types.
//!
//! Everything in this module may be serialized into logs or dashboards by
//! callers, so none of it carries payload content: failures are described
//! by identifiers, categories and timestamps only.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::breaker::BreakerSnapshot;
use crate::conflict::ConflictRecord;
use crate::error::{Classification, ErrorCategory, ErrorSeverity};
use crate::queue::QueueMetricsSnapshot;

/// Per-request attempt accounting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AttemptMetrics {
    pub total_attempts: u32,
    pub total_time: Duration,
}

/// Scrubbed description of a terminal failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureInfo {
    pub operation_id: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub crisis_mode: bool,
    pub recovery_suggestions: Vec<String>,
    /// Non-sensitive context (identifiers, priority, flags), already
    /// passed through the scrubber by the engine.
    pub context: serde_json::Value,
    /// Millis since epoch when the failure was recorded.
    pub occurred_at: u64,
}

impl FailureInfo {
    /// Build failure info from a classification.
    ///
    /// `context` must already be scrubbed; the engine is the only
    /// constructor site and owns that enforcement.
    pub fn from_classification(
        operation_id: &str,
        classification: &Classification,
        crisis_mode: bool,
        context: serde_json::Value,
        occurred_at: u64,
    ) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            category: classification.category,
            severity: classification.severity,
            crisis_mode,
            recovery_suggestions: suggestions_for(classification),
            context,
            occurred_at,
        }
    }
}

fn suggestions_for(classification: &Classification) -> Vec<String> {
    let mut suggestions = Vec::new();
    match classification.category {
        ErrorCategory::Network => {
            suggestions.push("check device connectivity".to_string());
            suggestions.push("operation is queued and retries on reconnect".to_string());
        }
        ErrorCategory::Service => {
            suggestions.push("remote service degraded; backoff is active".to_string());
        }
        ErrorCategory::Security => {
            suggestions.push("re-authenticate before retrying".to_string());
            suggestions.push("do not retry automatically".to_string());
        }
        ErrorCategory::Data => {
            suggestions.push("verify entity version and checksum".to_string());
        }
        ErrorCategory::Validation => {
            suggestions.push("correct the request before resubmitting".to_string());
        }
    }
    if classification.retryable {
        suggestions.push("retry recommended".to_string());
    }
    suggestions
}

/// Result of one `execute_resilient_sync` call.
///
/// A recoverable failure never surfaces as an error: the caller sees
/// `success=true` with `fallback_triggered=true` and `queued_for_later`
/// telling it the data is parked safely, not that it definitively synced.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub operation_id: String,
    pub success: bool,
    pub fallback_triggered: bool,
    pub retry_recommended: bool,
    pub queued_for_later: bool,
    /// Audit form of a conflict resolved along the way, if any.
    pub conflict: Option<ConflictRecord>,
    pub metrics: AttemptMetrics,
    pub failure: Option<FailureInfo>,
}

/// Outcome of one `recover_persisted_operations` pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RecoveryReport {
    pub recovered: u32,
    pub failed: u32,
    pub expired: u32,
}

/// Aggregate read-only view for external monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceStatistics {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub fallback_operations: u64,
    pub crisis_operations: u64,
    pub recovered_operations: u64,
    pub breaker: BreakerSnapshot,
    pub queue: QueueMetricsSnapshot,
    pub queue_depth: usize,
    pub queue_capacity: usize,
}

/// Coarse health roll-up of breaker, queue and error-rate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for report construction.
    use super::*;

    /// Validates `FailureInfo::from_classification` behavior for the
    /// suggestions scenario.
    ///
    /// Assertions:
    /// - Confirms security failures advise against automatic retry.
    /// - Confirms retryable network failures mention the queue.
    #[test]
    fn test_failure_info_suggestions() {
        let security =
            Classification::new(ErrorCategory::Security, ErrorSeverity::High, false);
        let info = FailureInfo::from_classification(
            "op-1",
            &security,
            false,
            serde_json::json!({}),
            1_000,
        );
        assert!(info.recovery_suggestions.iter().any(|s| s.contains("do not retry")));

        let network = Classification::new(ErrorCategory::Network, ErrorSeverity::Medium, true);
        let info = FailureInfo::from_classification(
            "op-1",
            &network,
            false,
            serde_json::json!({}),
            1_000,
        );
        assert!(info.recovery_suggestions.iter().any(|s| s.contains("queued")));
        assert!(info.recovery_suggestions.iter().any(|s| s.contains("retry recommended")));
    }

    /// Validates health status display names.
    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "healthy");
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert_eq!(HealthStatus::Critical.to_string(), "critical");
    }
}
