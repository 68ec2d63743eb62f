//! Resilient synchronization engine for Solace.
//!
//! Executes sync operations (subscription and payment state, clinical
//! session metadata) against an unreliable remote service while
//! guaranteeing that safety-critical operations are never blocked by that
//! unreliability. The pieces:
//!
//! - [`classify`]: data-driven failure classification
//! - [`retry`]: classification-aware exponential backoff policy
//! - [`breaker`]: sliding-window circuit breaker with crisis exemption
//! - [`queue`]: encrypted, priority-ordered persistence queue
//! - [`conflict`]: deterministic multi-device conflict resolution
//! - [`crisis`]: guaranteed-success fast-path for emergencies
//! - [`engine`]: the orchestrator façade tying it all together
//!
//! A failure anywhere downgrades gracefully rather than blocking the
//! caller: transient failures retry, exhausted retries park the payload
//! for later recovery, and crisis operations always succeed locally.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod breaker;
pub mod classify;
pub mod clock;
pub mod conflict;
pub mod crisis;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod queue;
pub mod remote;
pub mod report;
pub mod request;
pub mod retry;
pub mod scrub;
pub mod store;
pub mod testing;

// Re-export commonly used types for convenience
// ------------------------------------------------
pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classify::{ClassificationRule, ErrorClassifier};
pub use clock::{Clock, MockClock, SystemClock};
pub use conflict::{
    ConflictRecord, ConflictResolution, ConflictResolver, ConflictStrategy, ConflictWinner,
    DataIntegrity,
};
pub use crisis::{CrisisConfig, CrisisContext, CrisisOutcome, CrisisResource, CrisisResources};
pub use crypto::{AesGcmEncryptor, CryptoError, EncryptedData, Encryptor};
pub use engine::{EngineConfig, SyncEngine};
pub use error::{
    Classification, ErrorCategory, ErrorClassification, ErrorSeverity, SyncError, SyncResult,
};
pub use queue::{PersistenceQueue, QueueConfig, QueueError, QueueMetricsSnapshot, QueuedOperation};
pub use remote::{RemoteAck, RemoteError, RemoteSync};
pub use report::{
    AttemptMetrics, FailureInfo, HealthStatus, RecoveryReport, ResilienceStatistics, SyncReport,
};
pub use request::{SyncPayload, SyncPriority, SyncRequest};
pub use retry::{RetryDecision, RetryPolicy, RetryPolicyConfig};
pub use scrub::Scrubber;
pub use store::{DurableStore, FileStore, MemoryStore};
