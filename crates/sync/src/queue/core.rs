//! Encrypted priority persistence queue.
//!
//! Holds operations that could not complete immediately, ordered by
//! priority then enqueue sequence. Payloads are encrypted before the item
//! is built, so neither the in-memory state nor the durable store ever
//! holds plaintext. Entries are mirrored into the durable store on every
//! mutation; draining leaves the stored copy in place until the engine
//! acknowledges success, so a crash mid-recovery loses nothing (the remote
//! is idempotent per operation id).

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use tracing::{debug, info, instrument, warn};

use super::errors::{QueueError, QueueResult};
use super::metrics::{QueueMetrics, QueueMetricsSnapshot};
use super::types::{QueueConfig, QueuedOperation};
use crate::clock::{Clock, SystemClock};
use crate::crypto::Encryptor;
use crate::error::{ErrorCategory, SyncError};
use crate::request::{SyncPayload, SyncRequest};
use crate::store::DurableStore;

/// Heap entry ordering items by priority, then FIFO within a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PriorityItem {
    priority: crate::request::SyncPriority,
    sequence: u64,
    operation_id: String,
}

impl Ord for PriorityItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse ordering for min-heap behavior (higher priority first).
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for PriorityItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct QueueState {
    heap: BinaryHeap<PriorityItem>,
    /// operation id -> (live sequence, operation). Heap entries whose
    /// sequence no longer matches are stale and skipped on pop.
    by_id: HashMap<String, (u64, QueuedOperation)>,
    sequence: u64,
}

/// Durable, priority-ordered store of deferred sync operations.
pub struct PersistenceQueue<C: Clock = SystemClock> {
    config: QueueConfig,
    state: RwLock<QueueState>,
    metrics: QueueMetrics,
    encryptor: Arc<dyn Encryptor>,
    store: Arc<dyn DurableStore>,
    clock: Arc<C>,
    shutdown: AtomicBool,
}

impl PersistenceQueue<SystemClock> {
    /// Create a queue with the system clock, loading any persisted items.
    pub fn new(
        config: QueueConfig,
        encryptor: Arc<dyn Encryptor>,
        store: Arc<dyn DurableStore>,
    ) -> QueueResult<Self> {
        Self::with_clock(config, encryptor, store, SystemClock)
    }
}

impl<C: Clock> PersistenceQueue<C> {
    /// Create a queue with a custom clock (useful for testing retention).
    pub fn with_clock(
        config: QueueConfig,
        encryptor: Arc<dyn Encryptor>,
        store: Arc<dyn DurableStore>,
        clock: C,
    ) -> QueueResult<Self> {
        config.validate().map_err(QueueError::Common)?;

        let queue = Self {
            config,
            state: RwLock::new(QueueState {
                heap: BinaryHeap::new(),
                by_id: HashMap::new(),
                sequence: 0,
            }),
            metrics: QueueMetrics::new(),
            encryptor,
            store,
            clock: Arc::new(clock),
            shutdown: AtomicBool::new(false),
        };

        if queue.config.enable_persistence {
            let restored = queue.load_persisted()?;
            if restored > 0 {
                info!(restored, "restored persisted sync operations");
            }
        }

        Ok(queue)
    }

    /// Enqueue a request for later recovery.
    ///
    /// The payload is encrypted (keyed by operation id) before anything is
    /// held or persisted. At capacity the lowest-priority pending item is
    /// evicted if and only if the newcomer strictly outranks it; otherwise
    /// the newcomer is rejected.
    #[instrument(skip(self, request), fields(operation_id = %request.operation_id, priority = %request.priority))]
    pub fn enqueue(&self, request: &SyncRequest) -> QueueResult<()> {
        self.enqueue_with_lineage(request, request.retry_count, None)
    }

    /// Enqueue with explicit lineage, used when re-parking a failed
    /// recovery attempt.
    pub fn enqueue_with_lineage(
        &self,
        request: &SyncRequest,
        attempts: u32,
        last_error: Option<ErrorCategory>,
    ) -> QueueResult<()> {
        if self.shutdown.load(AtomicOrdering::Relaxed) {
            return Err(QueueError::ShuttingDown);
        }

        let blob = self.seal_payload(&request.payload, &request.operation_id)?;
        let operation = QueuedOperation {
            operation_id: request.operation_id.clone(),
            priority: request.priority,
            entity_id: request.payload.entity_id.clone(),
            entity_type: request.payload.entity_type.clone(),
            conflict_strategy: request.conflict_strategy,
            crisis_mode: request.crisis_mode,
            enqueued_at: self.clock.millis_since_epoch(),
            attempts,
            max_retries: request.max_retries,
            last_error,
            blob,
            encrypted: self.config.encryption_enabled,
        };

        let mut state = self.write_state()?;

        if state.by_id.contains_key(&operation.operation_id) {
            return Err(QueueError::DuplicateOperation(operation.operation_id));
        }

        if state.by_id.len() >= self.config.max_queue_size {
            self.apply_backpressure(&mut state, &operation)?;
        }

        self.insert_locked(&mut state, operation)?;
        self.metrics.record_enqueue();
        self.metrics.update_depth(state.by_id.len());
        debug!("operation queued for later recovery");
        Ok(())
    }

    /// Pop up to `budget` operations in priority-then-FIFO order.
    ///
    /// Drained items stay in the durable store until acknowledged.
    pub fn drain(&self, budget: usize) -> QueueResult<Vec<QueuedOperation>> {
        if self.shutdown.load(AtomicOrdering::Relaxed) {
            return Err(QueueError::ShuttingDown);
        }

        let mut state = self.write_state()?;
        let mut drained = Vec::new();

        while drained.len() < budget {
            let Some(entry) = state.heap.pop() else {
                break;
            };
            // Skip stale heap entries left behind by evictions.
            let live = state
                .by_id
                .get(&entry.operation_id)
                .is_some_and(|(sequence, _)| *sequence == entry.sequence);
            if !live {
                continue;
            }
            if let Some((_, operation)) = state.by_id.remove(&entry.operation_id) {
                drained.push(operation);
            }
        }

        self.metrics.record_drain(drained.len() as u64);
        self.metrics.update_depth(state.by_id.len());
        Ok(drained)
    }

    /// Confirm a drained operation completed; removes the durable copy.
    pub fn acknowledge(&self, operation_id: &str) -> QueueResult<()> {
        if self.config.enable_persistence {
            self.store
                .delete(operation_id)
                .map_err(|e| QueueError::Common(SyncError::persistence("acknowledge", e.to_string())))?;
        }
        self.metrics.record_acknowledge();
        Ok(())
    }

    /// Re-park a drained operation after a failed recovery attempt.
    ///
    /// Lineage is incremented; items past the retention bound are expired
    /// instead of re-queued.
    pub fn requeue(
        &self,
        mut operation: QueuedOperation,
        last_error: Option<ErrorCategory>,
    ) -> QueueResult<()> {
        if self.shutdown.load(AtomicOrdering::Relaxed) {
            return Err(QueueError::ShuttingDown);
        }

        operation.attempts += 1;
        operation.last_error = last_error;

        let now_ms = self.clock.millis_since_epoch();
        if operation.is_expired(now_ms, self.config.max_retention) {
            warn!(
                operation_id = %operation.operation_id,
                age_ms = operation.age(now_ms).as_millis() as u64,
                "expiring operation past retention during requeue"
            );
            self.metrics.record_expiry(1);
            if self.config.enable_persistence {
                self.store.delete(&operation.operation_id).ok();
            }
            return Ok(());
        }

        let mut state = self.write_state()?;
        if state.by_id.len() >= self.config.max_queue_size {
            self.apply_backpressure(&mut state, &operation)?;
        }
        self.insert_locked(&mut state, operation)?;
        self.metrics.record_requeue();
        self.metrics.update_depth(state.by_id.len());
        Ok(())
    }

    /// Drop items past the retention bound. Returns the expired ids so the
    /// caller can report them; expiry is observable, never silent loss.
    pub fn expire_stale(&self) -> QueueResult<Vec<String>> {
        let now_ms = self.clock.millis_since_epoch();
        let mut state = self.write_state()?;

        let expired: Vec<String> = state
            .by_id
            .values()
            .filter(|(_, op)| op.is_expired(now_ms, self.config.max_retention))
            .map(|(_, op)| op.operation_id.clone())
            .collect();

        for operation_id in &expired {
            state.by_id.remove(operation_id);
            if self.config.enable_persistence {
                self.store.delete(operation_id).ok();
            }
            warn!(%operation_id, "expired queued operation past retention");
        }

        self.metrics.record_expiry(expired.len() as u64);
        self.metrics.update_depth(state.by_id.len());
        Ok(expired)
    }

    /// Decrypt a drained operation back into a submittable request.
    pub fn unseal(&self, operation: &QueuedOperation) -> QueueResult<SyncRequest> {
        let plaintext = if operation.encrypted {
            self.encryptor.decrypt(&operation.blob, &operation.operation_id)?
        } else {
            operation.blob.clone().into_bytes()
        };
        let payload: SyncPayload = serde_json::from_slice(&plaintext)
            .map_err(|e| QueueError::Common(SyncError::serialization(e.to_string())))?;

        Ok(SyncRequest {
            operation_id: operation.operation_id.clone(),
            priority: operation.priority,
            payload,
            conflict_strategy: operation.conflict_strategy,
            crisis_mode: operation.crisis_mode,
            retry_count: operation.attempts,
            max_retries: operation.max_retries,
        })
    }

    /// Number of pending operations.
    pub fn depth(&self) -> usize {
        self.state.read().map(|s| s.by_id.len()).unwrap_or(0)
    }

    /// Capacity bound from configuration.
    pub fn capacity(&self) -> usize {
        self.config.max_queue_size
    }

    /// Point-in-time metrics snapshot.
    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop accepting work. Persisted entries are already current, so
    /// shutdown only needs to flip the flag.
    pub fn shutdown(&self) {
        self.shutdown.store(true, AtomicOrdering::Relaxed);
        info!(depth = self.depth(), "persistence queue shut down");
    }

    fn seal_payload(&self, payload: &SyncPayload, operation_id: &str) -> QueueResult<String> {
        let plaintext = serde_json::to_vec(payload)
            .map_err(|e| QueueError::Common(SyncError::serialization(e.to_string())))?;

        if self.config.encryption_enabled {
            Ok(self.encryptor.encrypt(&plaintext, operation_id)?)
        } else {
            String::from_utf8(plaintext)
                .map_err(|e| QueueError::Common(SyncError::serialization(e.to_string())))
        }
    }

    /// Capacity backpressure: evict the worst pending item when the
    /// newcomer strictly outranks it, otherwise reject the newcomer.
    fn apply_backpressure(
        &self,
        state: &mut RwLockWriteGuard<'_, QueueState>,
        incoming: &QueuedOperation,
    ) -> QueueResult<()> {
        let worst = state
            .by_id
            .values()
            .max_by(|(seq_a, op_a), (seq_b, op_b)| {
                op_a.priority.cmp(&op_b.priority).then_with(|| seq_a.cmp(seq_b))
            })
            .map(|(_, op)| (op.operation_id.clone(), op.priority));

        match worst {
            Some((victim_id, victim_priority)) if incoming.priority.outranks(victim_priority) => {
                state.by_id.remove(&victim_id);
                if self.config.enable_persistence {
                    self.store.delete(&victim_id).ok();
                }
                self.metrics.record_eviction();
                warn!(
                    victim = %victim_id,
                    victim_priority = %victim_priority,
                    incoming = %incoming.operation_id,
                    "evicted lowest-priority operation under capacity pressure"
                );
                Ok(())
            }
            _ => {
                self.metrics.record_rejection();
                Err(QueueError::CapacityExceeded(self.config.max_queue_size))
            }
        }
    }

    fn insert_locked(
        &self,
        state: &mut RwLockWriteGuard<'_, QueueState>,
        operation: QueuedOperation,
    ) -> QueueResult<()> {
        if self.config.enable_persistence {
            let serialized = serde_json::to_string(&operation)
                .map_err(|e| QueueError::Common(SyncError::serialization(e.to_string())))?;
            self.store.put(&operation.operation_id, &serialized)?;
        }

        let sequence = state.sequence;
        state.sequence += 1;
        state.heap.push(PriorityItem {
            priority: operation.priority,
            sequence,
            operation_id: operation.operation_id.clone(),
        });
        state.by_id.insert(operation.operation_id.clone(), (sequence, operation));
        Ok(())
    }

    fn load_persisted(&self) -> QueueResult<usize> {
        let keys = self.store.keys().map_err(QueueError::Common)?;
        let mut restored: Vec<QueuedOperation> = Vec::with_capacity(keys.len());

        for key in keys {
            match self.store.get(&key).map_err(QueueError::Common)? {
                Some(serialized) => match serde_json::from_str(&serialized) {
                    Ok(operation) => restored.push(operation),
                    Err(err) => {
                        warn!(operation_id = %key, error = %err, "dropping unreadable persisted operation");
                        self.store.delete(&key).ok();
                    }
                },
                None => continue,
            }
        }

        // Re-assign sequences in arrival order so priority-then-FIFO
        // ordering survives the restart.
        restored.sort_by(|a, b| {
            a.enqueued_at.cmp(&b.enqueued_at).then_with(|| a.operation_id.cmp(&b.operation_id))
        });

        let count = restored.len();
        let mut state = self.write_state()?;
        for operation in restored {
            let sequence = state.sequence;
            state.sequence += 1;
            state.heap.push(PriorityItem {
                priority: operation.priority,
                sequence,
                operation_id: operation.operation_id.clone(),
            });
            state.by_id.insert(operation.operation_id.clone(), (sequence, operation));
        }
        self.metrics.update_depth(state.by_id.len());
        Ok(count)
    }

    fn write_state(&self) -> QueueResult<RwLockWriteGuard<'_, QueueState>> {
        self.state
            .write()
            .map_err(|e| QueueError::Common(SyncError::lock("queue_state", e.to_string())))
    }
}

impl<C: Clock> std::fmt::Debug for PersistenceQueue<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceQueue")
            .field("config", &self.config)
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the persistence queue.
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::clock::MockClock;
    use crate::crypto::AesGcmEncryptor;
    use crate::request::SyncPriority;
    use crate::store::MemoryStore;

    fn request(id: &str, priority: SyncPriority) -> SyncRequest {
        let payload = SyncPayload::new(
            format!("entity-{id}"),
            "session",
            1,
            1_000,
            json!({"assessment_score": 17}),
        );
        SyncRequest::with_id(id, priority, payload)
    }

    fn queue_with(config: QueueConfig) -> PersistenceQueue<MockClock> {
        let encryptor = Arc::new(AesGcmEncryptor::new(AesGcmEncryptor::generate_key()).unwrap());
        PersistenceQueue::with_clock(config, encryptor, Arc::new(MemoryStore::new()), MockClock::new())
            .unwrap()
    }

    /// Validates drain order for the priority scenario: items enqueued as
    /// LOW, CRITICAL, MEDIUM drain as CRITICAL, MEDIUM, LOW.
    #[test]
    fn test_priority_then_fifo_drain_order() {
        let queue = queue_with(QueueConfig::default());

        queue.enqueue(&request("low", SyncPriority::LowBackground)).unwrap();
        queue.enqueue(&request("critical", SyncPriority::CriticalSafety)).unwrap();
        queue.enqueue(&request("medium", SyncPriority::MediumUser)).unwrap();

        let drained = queue.drain(10).unwrap();
        let ids: Vec<&str> = drained.iter().map(|op| op.operation_id.as_str()).collect();
        assert_eq!(ids, vec!["critical", "medium", "low"]);
    }

    /// Tests FIFO ordering within a single priority tier.
    #[test]
    fn test_fifo_within_tier() {
        let queue = queue_with(QueueConfig::default());

        for id in ["first", "second", "third"] {
            queue.enqueue(&request(id, SyncPriority::MediumUser)).unwrap();
        }

        let drained = queue.drain(10).unwrap();
        let ids: Vec<&str> = drained.iter().map(|op| op.operation_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    /// Validates the capacity scenario: a full queue rejects a LOW enqueue
    /// but admits a CRITICAL one by evicting the lowest-priority item.
    #[test]
    fn test_backpressure_is_priority_aware() {
        let queue = queue_with(QueueConfig { max_queue_size: 2, ..QueueConfig::default() });

        queue.enqueue(&request("a", SyncPriority::MediumUser)).unwrap();
        queue.enqueue(&request("b", SyncPriority::LowBackground)).unwrap();

        // LOW newcomer does not outrank the worst pending item.
        let rejected = queue.enqueue(&request("c", SyncPriority::LowBackground));
        assert!(matches!(rejected, Err(QueueError::CapacityExceeded(2))));

        // CRITICAL newcomer evicts the LOW item.
        queue.enqueue(&request("d", SyncPriority::CriticalSafety)).unwrap();

        let drained = queue.drain(10).unwrap();
        let ids: Vec<&str> = drained.iter().map(|op| op.operation_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a"]);

        let metrics = queue.metrics();
        assert_eq!(metrics.total_evicted, 1);
        assert_eq!(metrics.total_rejected, 1);
    }

    /// Validates duplicate operation ids are rejected while queued.
    #[test]
    fn test_duplicate_operation_rejected() {
        let queue = queue_with(QueueConfig::default());

        queue.enqueue(&request("same", SyncPriority::MediumUser)).unwrap();
        let result = queue.enqueue(&request("same", SyncPriority::MediumUser));

        assert!(matches!(result, Err(QueueError::DuplicateOperation(id)) if id == "same"));
    }

    /// Validates payloads are encrypted at rest: neither the queue blob nor
    /// the durable store contains plaintext markers.
    #[test]
    fn test_payload_encrypted_at_rest() {
        let encryptor = Arc::new(AesGcmEncryptor::new(AesGcmEncryptor::generate_key()).unwrap());
        let store = Arc::new(MemoryStore::new());
        let queue = PersistenceQueue::with_clock(
            QueueConfig::default(),
            encryptor,
            Arc::clone(&store) as Arc<dyn DurableStore>,
            MockClock::new(),
        )
        .unwrap();

        queue.enqueue(&request("op", SyncPriority::HighClinical)).unwrap();

        let stored = store.get("op").unwrap().unwrap();
        assert!(!stored.contains("assessment_score"));

        let drained = queue.drain(1).unwrap();
        assert!(!drained[0].blob.contains("assessment_score"));
    }

    /// Validates unseal round trip restores the original request.
    #[test]
    fn test_unseal_round_trip() {
        let queue = queue_with(QueueConfig::default());
        let original = request("op", SyncPriority::HighClinical);

        queue.enqueue(&original).unwrap();
        let drained = queue.drain(1).unwrap();
        let restored = queue.unseal(&drained[0]).unwrap();

        assert_eq!(restored.operation_id, original.operation_id);
        assert_eq!(restored.payload, original.payload);
        assert_eq!(restored.priority, original.priority);
    }

    /// Validates persistence restart: a second queue over the same store
    /// restores items in the original drain order.
    #[test]
    fn test_restart_restores_items_and_order() {
        let encryptor = Arc::new(AesGcmEncryptor::new(AesGcmEncryptor::generate_key()).unwrap());
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());

        {
            let clock = MockClock::new();
            let queue = PersistenceQueue::with_clock(
                QueueConfig::default(),
                Arc::clone(&encryptor) as Arc<dyn Encryptor>,
                Arc::clone(&store),
                clock.clone(),
            )
            .unwrap();
            queue.enqueue(&request("low", SyncPriority::LowBackground)).unwrap();
            clock.advance(Duration::from_millis(5));
            queue.enqueue(&request("critical", SyncPriority::CriticalSafety)).unwrap();
        }

        let restarted = PersistenceQueue::with_clock(
            QueueConfig::default(),
            Arc::clone(&encryptor) as Arc<dyn Encryptor>,
            store,
            MockClock::new(),
        )
        .unwrap();

        assert_eq!(restarted.depth(), 2);
        let drained = restarted.drain(10).unwrap();
        let ids: Vec<&str> = drained.iter().map(|op| op.operation_id.as_str()).collect();
        assert_eq!(ids, vec!["critical", "low"]);
    }

    /// Validates retention expiry is observable through metrics and ids.
    #[test]
    fn test_expire_stale_past_retention() {
        let encryptor = Arc::new(AesGcmEncryptor::new(AesGcmEncryptor::generate_key()).unwrap());
        let clock = MockClock::new();
        let queue = PersistenceQueue::with_clock(
            QueueConfig { max_retention: Duration::from_secs(60), ..QueueConfig::default() },
            encryptor,
            Arc::new(MemoryStore::new()),
            clock.clone(),
        )
        .unwrap();

        queue.enqueue(&request("old", SyncPriority::MediumUser)).unwrap();
        clock.advance(Duration::from_secs(61));
        queue.enqueue(&request("fresh", SyncPriority::MediumUser)).unwrap();

        let expired = queue.expire_stale().unwrap();
        assert_eq!(expired, vec!["old".to_string()]);
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.metrics().total_expired, 1);
    }

    /// Validates requeue increments lineage and expires exhausted items.
    #[test]
    fn test_requeue_lineage_and_expiry() {
        let encryptor = Arc::new(AesGcmEncryptor::new(AesGcmEncryptor::generate_key()).unwrap());
        let clock = MockClock::new();
        let queue = PersistenceQueue::with_clock(
            QueueConfig { max_retention: Duration::from_secs(60), ..QueueConfig::default() },
            encryptor,
            Arc::new(MemoryStore::new()),
            clock.clone(),
        )
        .unwrap();

        queue.enqueue(&request("op", SyncPriority::MediumUser)).unwrap();
        let drained = queue.drain(1).unwrap();

        queue.requeue(drained[0].clone(), Some(ErrorCategory::Network)).unwrap();
        let drained_again = queue.drain(1).unwrap();
        assert_eq!(drained_again[0].attempts, 1);
        assert_eq!(drained_again[0].last_error, Some(ErrorCategory::Network));

        // Past retention the item is expired instead of re-queued.
        clock.advance(Duration::from_secs(61));
        queue.requeue(drained_again[0].clone(), Some(ErrorCategory::Network)).unwrap();
        assert_eq!(queue.depth(), 0);
        assert_eq!(queue.metrics().total_expired, 1);
    }

    /// Validates shutdown rejects further mutation.
    #[test]
    fn test_shutdown_rejects_work() {
        let queue = queue_with(QueueConfig::default());
        queue.shutdown();

        assert!(matches!(
            queue.enqueue(&request("op", SyncPriority::MediumUser)),
            Err(QueueError::ShuttingDown)
        ));
        assert!(matches!(queue.drain(1), Err(QueueError::ShuttingDown)));
    }

    /// Validates plaintext mode when encryption is disabled.
    #[test]
    fn test_encryption_disabled_stores_plain_json() {
        let queue = queue_with(QueueConfig { encryption_enabled: false, ..QueueConfig::default() });

        queue.enqueue(&request("op", SyncPriority::MediumUser)).unwrap();
        let drained = queue.drain(1).unwrap();

        assert!(!drained[0].encrypted);
        let restored = queue.unseal(&drained[0]).unwrap();
        assert_eq!(restored.payload.entity_id, "entity-op");
    }
}
