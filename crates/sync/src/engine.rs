//! Resilience orchestrator: the façade wiring breaker, retry, queue,
//! conflict resolution and the crisis fast-path together.
//!
//! One engine instance owns one circuit breaker and one persistence queue
//! for its lifetime (explicit construction and `shutdown`, no module-level
//! singleton). The normal pipeline runs inside a spawned task so that a
//! caller abandoning the future cannot cancel the attempt or the terminal
//! enqueue: the persistence side-effect always completes.
//!
//! Locking discipline: component locks are held only for state mutation,
//! never across an await point. The crisis fast-path therefore never waits
//! on a lock held through a retry backoff sleep.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::classify::ErrorClassifier;
use crate::clock::{Clock, SystemClock};
use crate::conflict::{ConflictRecord, ConflictResolution, ConflictResolver, ConflictStrategy};
use crate::crisis::{CrisisConfig, CrisisContext, CrisisOutcome, CrisisPipeline};
use crate::crypto::Encryptor;
use crate::error::{Classification, ErrorCategory, ErrorSeverity, SyncError, SyncResult};
use crate::queue::{PersistenceQueue, QueueConfig};
use crate::remote::{RemoteError, RemoteSync};
use crate::report::{
    AttemptMetrics, FailureInfo, HealthStatus, RecoveryReport, ResilienceStatistics, SyncReport,
};
use crate::request::{SyncPayload, SyncRequest};
use crate::retry::{RetryPolicy, RetryPolicyConfig};
use crate::scrub::Scrubber;

/// Bound on resolved-conflict re-attempts within one request.
const MAX_CONFLICT_ROUNDS: u32 = 1;

/// Bound on the in-memory conflict audit trail.
const AUDIT_CAPACITY: usize = 256;

/// Top-level engine configuration; every component's knobs are explicit.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name of the protected dependency, used in logs and circuit errors.
    pub service_name: String,
    pub retry: RetryPolicyConfig,
    pub breaker: CircuitBreakerConfig,
    pub queue: QueueConfig,
    pub crisis: CrisisConfig,
    /// Per-attempt deadline on the remote call.
    pub attempt_timeout: Duration,
    /// Drain budget per recovery pass.
    pub recovery_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "sync_backend".to_string(),
            retry: RetryPolicyConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            queue: QueueConfig::default(),
            crisis: CrisisConfig::default(),
            attempt_timeout: Duration::from_secs(10),
            recovery_batch: 50,
        }
    }
}

impl EngineConfig {
    /// Validate all component configurations.
    pub fn validate(&self) -> SyncResult<()> {
        self.retry.validate()?;
        self.breaker.validate()?;
        self.queue.validate()?;
        if self.attempt_timeout.is_zero() {
            return Err(SyncError::config("attempt_timeout must be greater than 0"));
        }
        if self.recovery_batch == 0 {
            return Err(SyncError::config("recovery_batch must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct EngineCounters {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    fallback: AtomicU64,
    crisis: AtomicU64,
    recovered: AtomicU64,
}

struct EngineShared<C: Clock> {
    config: EngineConfig,
    remote: Arc<dyn RemoteSync>,
    classifier: ErrorClassifier,
    policy: RetryPolicy,
    breaker: CircuitBreaker<C>,
    queue: Arc<PersistenceQueue<C>>,
    crisis: CrisisPipeline<C>,
    resolver: ConflictResolver,
    scrubber: Scrubber,
    clock: Arc<C>,
    counters: EngineCounters,
    audit: RwLock<VecDeque<ConflictRecord>>,
}

/// The resilient sync engine.
///
/// Cheap to clone; clones share the same breaker, queue and statistics.
pub struct SyncEngine<C: Clock + Clone = SystemClock> {
    shared: Arc<EngineShared<C>>,
}

impl<C: Clock + Clone> Clone for SyncEngine<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl SyncEngine<SystemClock> {
    /// Create an engine on the system clock.
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn RemoteSync>,
        encryptor: Arc<dyn Encryptor>,
        store: Arc<dyn crate::store::DurableStore>,
    ) -> SyncResult<Self> {
        Self::with_clock(config, remote, encryptor, store, SystemClock)
    }
}

impl<C: Clock + Clone> SyncEngine<C> {
    /// Create an engine with a custom clock (useful for testing).
    pub fn with_clock(
        config: EngineConfig,
        remote: Arc<dyn RemoteSync>,
        encryptor: Arc<dyn Encryptor>,
        store: Arc<dyn crate::store::DurableStore>,
        clock: C,
    ) -> SyncResult<Self> {
        config.validate()?;

        let policy = RetryPolicy::new(config.retry.clone())?;
        let breaker = CircuitBreaker::with_clock(config.breaker.clone(), clock.clone())?;
        let queue = Arc::new(
            PersistenceQueue::with_clock(config.queue.clone(), encryptor, store, clock.clone())
                .map_err(SyncError::from)?,
        );
        let shared_clock = Arc::new(clock);
        let crisis = CrisisPipeline::new(
            config.crisis.clone(),
            Arc::clone(&remote),
            Arc::clone(&queue),
            Arc::clone(&shared_clock),
        );

        info!(service = %config.service_name, "sync engine initialized");
        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                remote,
                classifier: ErrorClassifier::with_defaults(),
                policy,
                breaker,
                queue,
                crisis,
                resolver: ConflictResolver,
                scrubber: Scrubber::with_defaults(),
                clock: shared_clock,
                counters: EngineCounters::default(),
                audit: RwLock::new(VecDeque::with_capacity(AUDIT_CAPACITY)),
            }),
        })
    }

    /// Execute one sync request through the resilient pipeline.
    ///
    /// Crisis-mode requests route to the crisis fast-path. For everything
    /// else the flow is: breaker gate, attempt with per-attempt timeout,
    /// classify, retry with backoff, and on retryable exhaustion park the
    /// payload and report success-with-fallback. The caller never receives
    /// a hard error for a recoverable failure.
    #[instrument(skip(self, request), fields(operation_id = %request.operation_id, crisis = request.crisis_mode))]
    pub async fn execute_resilient_sync(&self, request: SyncRequest) -> SyncReport {
        let shared = Arc::clone(&self.shared);
        shared.counters.total.fetch_add(1, Ordering::Relaxed);

        if request.crisis_mode {
            shared.counters.crisis.fetch_add(1, Ordering::Relaxed);
            let operation_id = request.operation_id.clone();
            let outcome = shared.crisis.handle_request(request).await;
            return crisis_report(operation_id, &outcome);
        }

        // Spawned so an abandoned caller future cannot cancel the attempt
        // or the terminal enqueue.
        let operation_id = request.operation_id.clone();
        let handle = tokio::spawn(async move { shared.run_normal(request).await });
        match handle.await {
            Ok(report) => report,
            Err(join_err) => {
                warn!(error = %join_err, "sync pipeline task aborted");
                let shared = &self.shared;
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                let classification =
                    Classification::new(ErrorCategory::Service, ErrorSeverity::Critical, false);
                SyncReport {
                    operation_id: operation_id.clone(),
                    success: false,
                    fallback_triggered: false,
                    retry_recommended: false,
                    queued_for_later: false,
                    conflict: None,
                    metrics: AttemptMetrics { total_attempts: 0, total_time: Duration::ZERO },
                    failure: Some(FailureInfo::from_classification(
                        &operation_id,
                        &classification,
                        false,
                        serde_json::json!({ "operation_id": operation_id }),
                        shared.clock.millis_since_epoch(),
                    )),
                }
            }
        }
    }

    /// Handle a crisis emergency directly.
    ///
    /// Always succeeds from the caller's perspective; see
    /// [`crate::crisis`].
    pub async fn handle_crisis_emergency(&self, context: CrisisContext) -> CrisisOutcome {
        self.shared.counters.total.fetch_add(1, Ordering::Relaxed);
        self.shared.counters.crisis.fetch_add(1, Ordering::Relaxed);
        self.shared.crisis.handle(context).await
    }

    /// Drain the persistence queue and resubmit parked operations.
    ///
    /// Runs in priority-then-FIFO order; a CRITICAL item is never
    /// reordered behind a LOW one, even when earlier items fail. Items the
    /// breaker blocks are re-parked untouched for the next pass.
    #[instrument(skip(self))]
    pub async fn recover_persisted_operations(&self) -> RecoveryReport {
        let shared = &self.shared;
        let mut report = RecoveryReport::default();

        match shared.queue.expire_stale() {
            Ok(expired) => report.expired = expired.len() as u32,
            Err(err) => warn!(error = %err, "retention sweep failed"),
        }

        let drained = match shared.queue.drain(shared.config.recovery_batch) {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "queue drain failed during recovery");
                return report;
            }
        };

        debug!(count = drained.len(), "recovering persisted operations");
        for operation in drained {
            if !shared.breaker.allow(operation.crisis_mode) {
                // Dependency still unhealthy: park untouched for later.
                if let Err(err) = shared.queue.requeue(operation, None) {
                    warn!(error = %err, "failed to re-park operation while breaker open");
                    report.failed += 1;
                }
                continue;
            }

            let request = match shared.queue.unseal(&operation) {
                Ok(request) => request,
                Err(err) => {
                    // Undecryptable payloads cannot ever succeed; drop
                    // them observably rather than loop forever.
                    warn!(
                        operation_id = %operation.operation_id,
                        error = %err,
                        "dropping unrecoverable queued operation"
                    );
                    shared.queue.acknowledge(&operation.operation_id).ok();
                    report.failed += 1;
                    continue;
                }
            };

            match shared.attempt_with_conflicts(&request).await {
                Ok(_) => {
                    shared.breaker.record_success();
                    shared.queue.acknowledge(&operation.operation_id).ok();
                    shared.counters.recovered.fetch_add(1, Ordering::Relaxed);
                    report.recovered += 1;
                }
                Err(classification) => {
                    shared.breaker.record_failure();
                    report.failed += 1;
                    if classification.retryable {
                        if let Err(err) =
                            shared.queue.requeue(operation, Some(classification.category))
                        {
                            warn!(error = %err, "failed to re-park operation after recovery failure");
                        }
                    } else {
                        warn!(
                            operation_id = %operation.operation_id,
                            category = %classification.category,
                            "dropping terminally failed queued operation"
                        );
                        shared.queue.acknowledge(&operation.operation_id).ok();
                    }
                }
            }
        }

        info!(
            recovered = report.recovered,
            failed = report.failed,
            expired = report.expired,
            "recovery pass complete"
        );
        report
    }

    /// Resolve a conflict and append it to the audit trail.
    pub fn resolve_conflict(
        &self,
        local: &SyncPayload,
        remote: &SyncPayload,
        strategy: ConflictStrategy,
    ) -> ConflictResolution {
        let outcome = self.shared.resolver.resolve(local, remote, strategy);
        self.shared.record_audit(local, remote, &outcome);
        outcome
    }

    /// Conflict audit trail (most recent last).
    pub fn conflict_audit(&self) -> Vec<ConflictRecord> {
        self.shared
            .audit
            .read()
            .map(|trail| trail.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Read-only aggregate statistics; never mutates state.
    pub fn statistics(&self) -> ResilienceStatistics {
        let shared = &self.shared;
        ResilienceStatistics {
            total_operations: shared.counters.total.load(Ordering::Acquire),
            successful_operations: shared.counters.success.load(Ordering::Acquire),
            failed_operations: shared.counters.failed.load(Ordering::Acquire),
            fallback_operations: shared.counters.fallback.load(Ordering::Acquire),
            crisis_operations: shared.counters.crisis.load(Ordering::Acquire),
            recovered_operations: shared.counters.recovered.load(Ordering::Acquire),
            breaker: shared.breaker.snapshot(),
            queue: shared.queue.metrics(),
            queue_depth: shared.queue.depth(),
            queue_capacity: shared.queue.capacity(),
        }
    }

    /// Coarse health roll-up of breaker and queue state.
    pub fn health(&self) -> HealthStatus {
        let shared = &self.shared;
        let depth = shared.queue.depth();
        let capacity = shared.queue.capacity();

        if depth >= capacity {
            return HealthStatus::Critical;
        }
        match shared.breaker.state() {
            CircuitState::Open => HealthStatus::Critical,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Closed => {
                if depth * 2 >= capacity {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
        }
    }

    /// Force the breaker closed (operational override).
    pub fn reset_breaker(&self) {
        self.shared.breaker.reset();
    }

    /// Stop accepting work and flush queue state.
    pub fn shutdown(&self) {
        self.shared.queue.shutdown();
        info!(service = %self.shared.config.service_name, "sync engine shut down");
    }
}

impl<C: Clock> EngineShared<C> {
    async fn run_normal(self: Arc<Self>, mut request: SyncRequest) -> SyncReport {
        let started = self.clock.now();
        let mut attempts = 0u32;
        let mut conflict_rounds = 0u32;
        let mut conflict_record: Option<ConflictRecord> = None;

        if !self.breaker.allow(false) {
            debug!(service = %self.config.service_name, "circuit open; parking without attempt");
            let classification =
                Classification::new(ErrorCategory::Service, ErrorSeverity::High, true);
            return self.park(&request, attempts, started, &classification, conflict_record);
        }

        loop {
            attempts += 1;
            let attempt =
                tokio::time::timeout(self.config.attempt_timeout, self.remote.sync(&request))
                    .await;

            let classification = match attempt {
                Ok(Ok(ack)) => {
                    self.breaker.record_success();
                    self.counters.success.fetch_add(1, Ordering::Relaxed);
                    debug!(applied_version = ack.applied_version, "sync succeeded");
                    return SyncReport {
                        operation_id: request.operation_id,
                        success: true,
                        fallback_triggered: false,
                        retry_recommended: false,
                        queued_for_later: false,
                        conflict: conflict_record,
                        metrics: self.metrics_since(started, attempts),
                        failure: None,
                    };
                }
                Ok(Err(RemoteError::VersionConflict { remote })) => {
                    // A conflict is a data disagreement, not dependency
                    // unhealthiness: it does not feed the breaker window.
                    let outcome =
                        self.resolver.resolve(&request.payload, &remote, request.conflict_strategy);
                    self.record_audit(&request.payload, &remote, &outcome);
                    conflict_record = Some(ConflictRecord::from_resolution(
                        &request.payload,
                        &remote,
                        &outcome,
                        self.clock.millis_since_epoch(),
                    ));

                    let resolved = outcome.resolved;
                    match outcome.resolution {
                        Some(resolution) if resolved && conflict_rounds < MAX_CONFLICT_ROUNDS => {
                            conflict_rounds += 1;
                            request.payload = resolution;
                            continue;
                        }
                        _ => {
                            self.counters.failed.fetch_add(1, Ordering::Relaxed);
                            let classification = Classification::new(
                                ErrorCategory::Data,
                                ErrorSeverity::Medium,
                                false,
                            );
                            return self.failure_report(
                                &request,
                                attempts,
                                started,
                                &classification,
                                conflict_record,
                            );
                        }
                    }
                }
                Ok(Err(RemoteError::Rejected { message })) => {
                    self.breaker.record_failure();
                    self.classifier.classify(&message)
                }
                Err(_elapsed) => {
                    self.breaker.record_failure();
                    self.classifier.classify("timeout")
                }
            };

            let decision = self.policy.decide(&classification, attempts, request.crisis_mode);
            if decision.should_retry {
                debug!(
                    attempt = attempts,
                    delay_ms = decision.delay.as_millis() as u64,
                    category = %classification.category,
                    "attempt failed; backing off"
                );
                tokio::time::sleep(decision.delay).await;
                continue;
            }

            if classification.retryable {
                // Retry budget exhausted on a transient failure: park for
                // later recovery instead of surfacing an error.
                return self.park(&request, attempts, started, &classification, conflict_record);
            }

            // Security/data/validation failures surface immediately.
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return self.failure_report(
                &request,
                attempts,
                started,
                &classification,
                conflict_record,
            );
        }
    }

    /// One remote attempt plus at most one resolved-conflict follow-up,
    /// used by recovery. Returns the failure classification on error.
    async fn attempt_with_conflicts(&self, request: &SyncRequest) -> Result<(), Classification> {
        let mut request = request.clone();
        let mut conflict_rounds = 0u32;

        loop {
            let attempt =
                tokio::time::timeout(self.config.attempt_timeout, self.remote.sync(&request))
                    .await;

            match attempt {
                Ok(Ok(_ack)) => return Ok(()),
                Ok(Err(RemoteError::VersionConflict { remote })) => {
                    let outcome =
                        self.resolver.resolve(&request.payload, &remote, request.conflict_strategy);
                    self.record_audit(&request.payload, &remote, &outcome);

                    let resolved = outcome.resolved;
                    match outcome.resolution {
                        Some(resolution) if resolved && conflict_rounds < MAX_CONFLICT_ROUNDS => {
                            conflict_rounds += 1;
                            request.payload = resolution;
                        }
                        _ => {
                            return Err(Classification::new(
                                ErrorCategory::Data,
                                ErrorSeverity::Medium,
                                false,
                            ))
                        }
                    }
                }
                Ok(Err(RemoteError::Rejected { message })) => {
                    return Err(self.classifier.classify(&message))
                }
                Err(_elapsed) => return Err(self.classifier.classify("timeout")),
            }
        }
    }

    fn park(
        &self,
        request: &SyncRequest,
        attempts: u32,
        started: std::time::Instant,
        classification: &Classification,
        conflict: Option<ConflictRecord>,
    ) -> SyncReport {
        match self
            .queue
            .enqueue_with_lineage(request, attempts, Some(classification.category))
        {
            Ok(()) => {
                self.counters.fallback.fetch_add(1, Ordering::Relaxed);
                info!(
                    operation_id = %request.operation_id,
                    category = %classification.category,
                    "operation parked for recovery"
                );
                SyncReport {
                    operation_id: request.operation_id.clone(),
                    success: true,
                    fallback_triggered: true,
                    retry_recommended: true,
                    queued_for_later: true,
                    conflict,
                    metrics: self.metrics_since(started, attempts),
                    failure: None,
                }
            }
            Err(err) => {
                // Recovery storage failed too: this is the one case where
                // a retryable failure surfaces synchronously.
                warn!(
                    operation_id = %request.operation_id,
                    error = %err,
                    "failed to park operation; surfacing failure"
                );
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                let storage_classification = Classification::new(
                    SyncError::from(err).category(),
                    ErrorSeverity::Critical,
                    classification.retryable,
                );
                self.failure_report(request, attempts, started, &storage_classification, conflict)
            }
        }
    }

    fn failure_report(
        &self,
        request: &SyncRequest,
        attempts: u32,
        started: std::time::Instant,
        classification: &Classification,
        conflict: Option<ConflictRecord>,
    ) -> SyncReport {
        SyncReport {
            operation_id: request.operation_id.clone(),
            success: false,
            fallback_triggered: false,
            retry_recommended: classification.retryable,
            queued_for_later: false,
            conflict,
            metrics: self.metrics_since(started, attempts),
            failure: Some(FailureInfo::from_classification(
                &request.operation_id,
                classification,
                request.crisis_mode,
                self.failure_context(request),
                self.clock.millis_since_epoch(),
            )),
        }
    }

    /// Non-sensitive failure context. Runs through the scrubber even
    /// though only identifiers are assembled here; payload content must
    /// never reach a report surface.
    fn failure_context(&self, request: &SyncRequest) -> serde_json::Value {
        self.scrubber.scrub(&serde_json::json!({
            "operation_id": request.operation_id,
            "entity_id": request.payload.entity_id,
            "priority": request.priority.to_string(),
            "crisis_mode": request.crisis_mode,
        }))
    }

    fn metrics_since(&self, started: std::time::Instant, attempts: u32) -> AttemptMetrics {
        AttemptMetrics {
            total_attempts: attempts,
            total_time: self.clock.now().duration_since(started),
        }
    }

    fn record_audit(
        &self,
        local: &SyncPayload,
        remote: &SyncPayload,
        outcome: &ConflictResolution,
    ) {
        let record = ConflictRecord::from_resolution(
            local,
            remote,
            outcome,
            self.clock.millis_since_epoch(),
        );
        if let Ok(mut trail) = self.audit.write() {
            if trail.len() == AUDIT_CAPACITY {
                trail.pop_front();
            }
            trail.push_back(record);
        }
    }
}

fn crisis_report(operation_id: String, outcome: &CrisisOutcome) -> SyncReport {
    SyncReport {
        operation_id,
        success: outcome.success,
        fallback_triggered: outcome.fallback_triggered,
        retry_recommended: outcome.fallback_triggered,
        queued_for_later: outcome.queued_for_later,
        conflict: None,
        metrics: AttemptMetrics { total_attempts: 1, total_time: outcome.response_time },
        failure: None,
    }
}
