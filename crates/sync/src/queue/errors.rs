//! Queue operation errors.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::error::{ErrorClassification, ErrorSeverity, SyncError};

/// Errors raised by the persistence queue.
///
/// Common failures (lock poisoning, persistence, serialization) propagate
/// through the embedded `SyncError`; encryption failures keep their own
/// variant because they classify as security-critical and must be
/// reported, never swallowed.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Common(#[from] SyncError),

    #[error("Encryption failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Queue is at maximum capacity ({0})")]
    CapacityExceeded(usize),

    #[error("Duplicate operation id: {0}")]
    DuplicateOperation(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Queue is shutting down")]
    ShuttingDown,
}

impl ErrorClassification for QueueError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Common(e) => e.is_retryable(),
            Self::Crypto(e) => e.is_retryable(),
            // Capacity pressure can clear as the queue drains.
            Self::CapacityExceeded(_) => true,
            Self::DuplicateOperation(_) => false,
            Self::OperationNotFound(_) => false,
            Self::ShuttingDown => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Common(e) => e.severity(),
            Self::Crypto(e) => e.severity(),
            Self::CapacityExceeded(_) => ErrorSeverity::High,
            Self::DuplicateOperation(_) => ErrorSeverity::Low,
            Self::OperationNotFound(_) => ErrorSeverity::Low,
            Self::ShuttingDown => ErrorSeverity::Low,
        }
    }
}

impl From<QueueError> for SyncError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Common(e) => e,
            QueueError::Crypto(e) => e.into(),
            QueueError::CapacityExceeded(size) => {
                SyncError::persistence("enqueue", format!("queue at capacity {size}"))
            }
            QueueError::DuplicateOperation(id) => {
                SyncError::internal(format!("duplicate queued operation: {id}"))
            }
            QueueError::OperationNotFound(id) => {
                SyncError::internal(format!("queued operation not found: {id}"))
            }
            QueueError::ShuttingDown => SyncError::internal("queue is shutting down"),
        }
    }
}

/// Queue operation result type.
pub type QueueResult<T> = Result<T, QueueError>;
