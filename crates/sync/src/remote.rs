//! Injected remote sync collaborator contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::{SyncPayload, SyncRequest};

/// Acknowledgement returned by the remote service on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAck {
    /// Version the remote applied for the entity.
    pub applied_version: u64,
    /// Remote wall-clock millis, when the service reports one.
    pub server_time: Option<u64>,
}

impl RemoteAck {
    /// Acknowledge a request at a given applied version.
    pub fn at_version(applied_version: u64) -> Self {
        Self { applied_version, server_time: None }
    }
}

/// Failure modes of the remote sync call.
///
/// `Rejected` messages feed the error classifier; `VersionConflict` is
/// handled structurally (it routes to the conflict resolver, never to the
/// retry ladder). The conflict's `Display` form carries identifiers only;
/// the remote payload data stays out of rendered errors.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("remote rejected operation: {message}")]
    Rejected { message: String },

    #[error("version conflict for entity '{}'", remote.entity_id)]
    VersionConflict { remote: SyncPayload },
}

impl RemoteError {
    /// Convenience constructor for classifiable rejections.
    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self::Rejected { message: message.into() }
    }
}

/// The injected remote operation.
///
/// Implementations must be idempotent per `operation_id`: recovery may
/// submit the same operation twice and expects at most one remote effect.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Execute one sync attempt against the remote service.
    async fn sync(&self, request: &SyncRequest) -> Result<RemoteAck, RemoteError>;
}
