//! Queue item and configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictStrategy;
use crate::error::{ErrorCategory, SyncError, SyncResult};
use crate::request::SyncPriority;

/// A deferred sync operation held by the persistence queue.
///
/// The payload travels as an opaque `blob` (encrypted before the item is
/// built); everything else is non-sensitive routing metadata, which is all
/// that may appear in logs derived from queue contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub operation_id: String,
    pub priority: SyncPriority,
    pub entity_id: String,
    pub entity_type: String,
    pub conflict_strategy: ConflictStrategy,
    pub crisis_mode: bool,
    /// Millis since epoch at enqueue time.
    pub enqueued_at: u64,
    /// Attempts spent across the operation's whole lineage.
    pub attempts: u32,
    pub max_retries: u32,
    /// Category of the failure that parked the operation here.
    pub last_error: Option<ErrorCategory>,
    /// Encrypted payload container (base64), or plaintext JSON when the
    /// queue runs with encryption disabled.
    pub blob: String,
    pub encrypted: bool,
}

impl QueuedOperation {
    /// Age of this item relative to `now_ms`.
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.enqueued_at))
    }

    /// True once the item has outlived the retention bound.
    pub fn is_expired(&self, now_ms: u64, max_retention: Duration) -> bool {
        self.age(now_ms) > max_retention
    }
}

/// Persistence queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Mirror queue contents into the durable store.
    pub enable_persistence: bool,
    /// Capacity bound; exceeded enqueues trigger priority-aware
    /// backpressure.
    pub max_queue_size: usize,
    /// Encrypt payloads before they are held or persisted.
    pub encryption_enabled: bool,
    /// Items older than this expire during maintenance.
    pub max_retention: Duration,
    /// Priority assigned to payloads parked by the crisis fast-path.
    pub crisis_priority: SyncPriority,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enable_persistence: true,
            max_queue_size: 1_000,
            encryption_enabled: true,
            max_retention: Duration::from_secs(72 * 3600),
            crisis_priority: SyncPriority::CriticalSafety,
        }
    }
}

impl QueueConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_queue_size == 0 {
            return Err(SyncError::config("max_queue_size must be greater than 0"));
        }
        if self.max_retention.is_zero() {
            return Err(SyncError::config("max_retention must be greater than 0"));
        }
        Ok(())
    }
}
