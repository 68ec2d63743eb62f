//! Common error types shared across the sync engine.
//!
//! The engine distinguishes two layers of error handling:
//!
//! 1. **`SyncError`**: concrete failures raised by engine components (lock
//!    poisoning, persistence, encryption, remote transport, timeouts).
//!    Module-specific enums embed it via `#[error(transparent)]`.
//!
//! 2. **`Classification`**: the category/severity/retryable triple attached
//!    to a remote failure by the [`crate::classify::ErrorClassifier`]. The
//!    retry policy and the persistence queue act on classifications, never
//!    on raw error strings.
//!
//! Every error type implements [`ErrorClassification`] so retry loops and
//! health reporting can treat failures uniformly.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard result type using `SyncError`.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failure category taxonomy used across classification, reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Service,
    Security,
    Data,
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Service => write!(f, "service"),
            Self::Security => write!(f, "security"),
            Self::Data => write!(f, "data"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// Severity levels for monitoring and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Category/severity/retryable triple produced by the error classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
}

impl Classification {
    /// Construct a classification triple.
    pub fn new(category: ErrorCategory, severity: ErrorSeverity, retryable: bool) -> Self {
        Self { category, severity, retryable }
    }
}

/// Error classification trait for consistent handling across modules.
///
/// Implementors describe how their failures interact with the retry and
/// health machinery: whether a retry may succeed, how loud monitoring
/// should be, and whether a specific backoff delay is already known.
pub trait ErrorClassification {
    /// Check if this error is retryable.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention.
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Get the suggested retry delay if applicable.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Common error variants that appear across engine modules.
///
/// Module-specific enums (`QueueError`, `CryptoError`) embed this type with
/// `#[error(transparent)] Common(#[from] SyncError)` so the `?` operator
/// propagates cleanly across module boundaries.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Configuration validation failed at construction time.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Lock acquisition failed or a lock was poisoned.
    #[error("Lock error for '{resource}': {message}")]
    Lock { resource: String, message: String },

    /// The circuit breaker short-circuited the call.
    #[error("Circuit breaker open for '{service}'")]
    CircuitOpen { service: String, retry_after: Option<Duration> },

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// The durable store rejected a read or write.
    #[error("Persistence error during '{operation}': {message}")]
    Persistence { operation: String, message: String },

    /// An attempt exceeded its operation-level deadline.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    /// The remote sync service rejected the operation.
    #[error("Remote sync error: {message}")]
    Remote { message: String, retryable: bool },

    /// Payload encryption or decryption failed.
    #[error("Encryption error during '{operation}': {message}")]
    Encryption { operation: String, message: String },

    /// Invariant violations that should not occur in normal operation.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a lock error for a named resource.
    pub fn lock<R: Into<String>, S: Into<String>>(resource: R, message: S) -> Self {
        Self::Lock { resource: resource.into(), message: message.into() }
    }

    /// Create a circuit-open error without retry timing.
    pub fn circuit_open<S: Into<String>>(service: S) -> Self {
        Self::CircuitOpen { service: service.into(), retry_after: None }
    }

    /// Create a circuit-open error with suggested retry timing.
    pub fn circuit_open_with_retry<S: Into<String>>(service: S, retry_after: Duration) -> Self {
        Self::CircuitOpen { service: service.into(), retry_after: Some(retry_after) }
    }

    /// Create a serialization error.
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Create a persistence error for a specific operation.
    pub fn persistence<O: Into<String>, S: Into<String>>(operation: O, message: S) -> Self {
        Self::Persistence { operation: operation.into(), message: message.into() }
    }

    /// Create a timeout error.
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Create a remote transport error.
    pub fn remote<S: Into<String>>(message: S, retryable: bool) -> Self {
        Self::Remote { message: message.into(), retryable }
    }

    /// Create an encryption error.
    pub fn encryption<O: Into<String>, S: Into<String>>(operation: O, message: S) -> Self {
        Self::Encryption { operation: operation.into(), message: message.into() }
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Get the taxonomy category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } => ErrorCategory::Validation,
            Self::Lock { .. } | Self::Internal { .. } => ErrorCategory::Service,
            Self::CircuitOpen { .. } => ErrorCategory::Service,
            Self::Serialization { .. } | Self::Persistence { .. } => ErrorCategory::Data,
            Self::Timeout { .. } | Self::Remote { .. } => ErrorCategory::Network,
            Self::Encryption { .. } => ErrorCategory::Security,
        }
    }
}

impl ErrorClassification for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => true,
            Self::Timeout { .. } => true,
            Self::Lock { .. } => true,
            Self::Persistence { .. } => true,
            Self::Remote { retryable, .. } => *retryable,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Config { .. } => ErrorSeverity::High,
            Self::Lock { .. } => ErrorSeverity::Low,
            Self::CircuitOpen { .. } => ErrorSeverity::Medium,
            Self::Serialization { .. } => ErrorSeverity::Medium,
            Self::Persistence { .. } => ErrorSeverity::High,
            Self::Timeout { .. } => ErrorSeverity::Medium,
            Self::Remote { .. } => ErrorSeverity::Medium,
            Self::Encryption { .. } => ErrorSeverity::Critical,
            Self::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence("io", err.to_string())
    }
}
