//! Sync request types: the unit of work submitted to the engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::conflict::ConflictStrategy;

/// Priority tiers for sync operations.
///
/// Lower discriminant means higher importance. Ordering drives queue drain
/// order and circuit-breaker exemption: `CriticalSafety` operations carry
/// the crisis exemption when the breaker is configured for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPriority {
    CriticalSafety = 0,
    HighClinical = 1,
    MediumUser = 2,
    LowBackground = 3,
}

impl SyncPriority {
    /// True for the safety-critical tier.
    pub fn is_critical(self) -> bool {
        self == Self::CriticalSafety
    }

    /// True when `self` strictly outranks `other`.
    pub fn outranks(self, other: Self) -> bool {
        self < other
    }
}

impl fmt::Display for SyncPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CriticalSafety => write!(f, "critical_safety"),
            Self::HighClinical => write!(f, "high_clinical"),
            Self::MediumUser => write!(f, "medium_user"),
            Self::LowBackground => write!(f, "low_background"),
        }
    }
}

impl From<u8> for SyncPriority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::CriticalSafety,
            1 => Self::HighClinical,
            2 => Self::MediumUser,
            _ => Self::LowBackground,
        }
    }
}

/// Structured payload plus the metadata needed for conflict detection.
///
/// `data` is opaque to the engine and treated as sensitive: it is encrypted
/// before persistence and excluded from every log, error and statistics
/// surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub entity_id: String,
    pub entity_type: String,
    pub version: u64,
    /// Millis since epoch of the last local modification.
    pub last_modified: u64,
    pub checksum: String,
    pub data: Value,
}

impl SyncPayload {
    /// Construct a payload, computing the checksum over the serialized data.
    pub fn new<I: Into<String>, T: Into<String>>(
        entity_id: I,
        entity_type: T,
        version: u64,
        last_modified: u64,
        data: Value,
    ) -> Self {
        let checksum = Self::checksum_of(&data);
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            version,
            last_modified,
            checksum,
            data,
        }
    }

    /// SHA-256 checksum (hex, truncated) of a JSON value.
    pub fn checksum_of(data: &Value) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(data.to_string().as_bytes());
        let digest = hasher.finalize();
        digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
    }

    /// Verify that the stored checksum still matches the data.
    pub fn checksum_matches(&self) -> bool {
        Self::checksum_of(&self.data) == self.checksum
    }
}

/// One imperative unit of sync work.
///
/// `operation_id` identifies the logical attempt chain: recovery may submit
/// the same id twice, so the remote side must treat it idempotently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub operation_id: String,
    pub priority: SyncPriority,
    pub payload: SyncPayload,
    pub conflict_strategy: ConflictStrategy,
    pub crisis_mode: bool,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl SyncRequest {
    /// Create a request with a generated operation id.
    pub fn new(priority: SyncPriority, payload: SyncPayload) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), priority, payload)
    }

    /// Create a request with a caller-supplied operation id.
    pub fn with_id<S: Into<String>>(
        operation_id: S,
        priority: SyncPriority,
        payload: SyncPayload,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            priority,
            payload,
            conflict_strategy: ConflictStrategy::LatestTimestampWins,
            crisis_mode: false,
            retry_count: 0,
            max_retries: 3,
        }
    }

    /// Set the conflict resolution strategy.
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    /// Route this request through the crisis fast-path.
    pub fn with_crisis_mode(mut self, crisis: bool) -> Self {
        self.crisis_mode = crisis;
        self
    }

    /// Set the maximum retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for request types.
    use serde_json::json;

    use super::*;

    /// Tests priority ordering for queue processing.
    ///
    /// Verifies:
    /// - CriticalSafety outranks every other tier
    /// - Ordering follows CriticalSafety < HighClinical < MediumUser <
    ///   LowBackground
    #[test]
    fn test_priority_ordering() {
        assert!(SyncPriority::CriticalSafety < SyncPriority::HighClinical);
        assert!(SyncPriority::HighClinical < SyncPriority::MediumUser);
        assert!(SyncPriority::MediumUser < SyncPriority::LowBackground);
        assert!(SyncPriority::CriticalSafety.outranks(SyncPriority::LowBackground));
        assert!(!SyncPriority::LowBackground.outranks(SyncPriority::LowBackground));
    }

    /// Validates `SyncPriority::from` behavior for the u8 conversion scenario.
    ///
    /// Assertions:
    /// - Confirms `SyncPriority::from(0)` equals `CriticalSafety`.
    /// - Confirms out-of-range values map to `LowBackground`.
    #[test]
    fn test_priority_from_u8() {
        assert_eq!(SyncPriority::from(0), SyncPriority::CriticalSafety);
        assert_eq!(SyncPriority::from(1), SyncPriority::HighClinical);
        assert_eq!(SyncPriority::from(2), SyncPriority::MediumUser);
        assert_eq!(SyncPriority::from(3), SyncPriority::LowBackground);
        assert_eq!(SyncPriority::from(99), SyncPriority::LowBackground);
    }

    /// Validates `SyncPayload::new` behavior for the checksum scenario.
    ///
    /// Assertions:
    /// - Ensures `payload.checksum_matches()` evaluates to true.
    /// - Ensures a mutated payload fails the checksum.
    #[test]
    fn test_payload_checksum_detects_mutation() {
        let mut payload =
            SyncPayload::new("entity-1", "subscription", 1, 1_700_000_000_000, json!({"tier": "plus"}));
        assert!(payload.checksum_matches());

        payload.data = json!({"tier": "free"});
        assert!(!payload.checksum_matches());
    }

    /// Validates `SyncRequest::new` behavior for the defaults scenario.
    ///
    /// Assertions:
    /// - Confirms `request.retry_count` equals `0`.
    /// - Confirms `request.max_retries` equals `3`.
    /// - Ensures `!request.crisis_mode` evaluates to true.
    #[test]
    fn test_request_defaults() {
        let payload = SyncPayload::new("e", "t", 1, 0, json!({}));
        let request = SyncRequest::new(SyncPriority::MediumUser, payload);

        assert_eq!(request.retry_count, 0);
        assert_eq!(request.max_retries, 3);
        assert!(!request.crisis_mode);
        assert!(!request.operation_id.is_empty());
    }

    /// Validates builder setters for the request options scenario.
    #[test]
    fn test_request_builders() {
        let payload = SyncPayload::new("e", "t", 1, 0, json!({}));
        let request = SyncRequest::with_id("op-1", SyncPriority::CriticalSafety, payload)
            .with_crisis_mode(true)
            .with_max_retries(1)
            .with_conflict_strategy(ConflictStrategy::ClientWins);

        assert_eq!(request.operation_id, "op-1");
        assert!(request.crisis_mode);
        assert_eq!(request.max_retries, 1);
        assert_eq!(request.conflict_strategy, ConflictStrategy::ClientWins);
    }

    /// Tests request serialization round trip.
    #[test]
    fn test_request_serialization() {
        let payload = SyncPayload::new("e", "t", 2, 5, json!({"k": 1}));
        let request = SyncRequest::with_id("op-2", SyncPriority::HighClinical, payload);

        let serialized = serde_json::to_string(&request).unwrap();
        let deserialized: SyncRequest = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.operation_id, "op-2");
        assert_eq!(deserialized.priority, SyncPriority::HighClinical);
        assert_eq!(deserialized.payload.version, 2);
    }
}
