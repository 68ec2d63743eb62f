//! Crisis fast-path: guaranteed-success handling for safety-critical
//! operations.
//!
//! The remote attempt races a hard response deadline. Whatever happens
//! (remote success, remote rejection, deadline expiry, encryption or
//! storage outage), the caller gets a success outcome within the bound,
//! carrying locally-sourced crisis resources that depend on nothing
//! network-side. "Success" here means *the user is not blocked*, not *the
//! remote call succeeded*; `remote_synced` and `fallback_triggered` carry
//! the distinction.
//!
//! Design decision: race-with-deadline rather than attempt-then-fallback.
//! A sequential attempt cannot both wait on a real network call and honor
//! the response bound, so the attempt is spawned and the deadline races
//! it. An attempt still in flight at the deadline keeps running in the
//! background; if it ultimately fails, the payload is parked in the
//! persistence queue from the watcher task (fire-and-forget completion,
//! never caller-driven cancellation).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::error::ErrorCategory;
use crate::queue::PersistenceQueue;
use crate::remote::RemoteSync;
use crate::request::{SyncPayload, SyncPriority, SyncRequest};

/// Emergency context submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisContext {
    pub emergency_id: String,
    pub user_id: String,
    pub device_id: String,
    pub payload: SyncPayload,
}

/// One locally-available support resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisResource {
    pub name: String,
    pub contact: String,
}

/// Bundle of support resources sourced purely from local state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisResources {
    pub entries: Vec<CrisisResource>,
    /// Store key of the locally cached safety plan, when one exists.
    pub safety_plan_key: Option<String>,
}

impl Default for CrisisResources {
    fn default() -> Self {
        Self {
            entries: vec![
                CrisisResource {
                    name: "Suicide & Crisis Lifeline".to_string(),
                    contact: "988".to_string(),
                },
                CrisisResource {
                    name: "Crisis Text Line".to_string(),
                    contact: "text HOME to 741741".to_string(),
                },
            ],
            safety_plan_key: None,
        }
    }
}

/// Crisis fast-path configuration.
#[derive(Debug, Clone)]
pub struct CrisisConfig {
    /// End-to-end bound on the decision to proceed.
    pub response_deadline: Duration,
    /// Priority assigned to crisis payloads parked for recovery.
    pub queue_priority: SyncPriority,
    pub resources: CrisisResources,
}

impl Default for CrisisConfig {
    fn default() -> Self {
        Self {
            response_deadline: Duration::from_millis(200),
            queue_priority: SyncPriority::CriticalSafety,
            resources: CrisisResources::default(),
        }
    }
}

/// Outcome of a crisis emergency submission. `success` is always true.
#[derive(Debug, Clone, Serialize)]
pub struct CrisisOutcome {
    pub emergency_id: String,
    pub success: bool,
    pub crisis_override_used: bool,
    pub fallback_triggered: bool,
    /// True only when the remote confirmed within the deadline.
    pub remote_synced: bool,
    pub queued_for_later: bool,
    pub resources: CrisisResources,
    pub response_time: Duration,
}

/// The parallel execution path for safety-critical operations.
///
/// Never consults the circuit breaker and never returns failure.
pub struct CrisisPipeline<C: Clock> {
    config: CrisisConfig,
    remote: Arc<dyn RemoteSync>,
    queue: Arc<PersistenceQueue<C>>,
    clock: Arc<C>,
}

impl<C: Clock> CrisisPipeline<C> {
    pub fn new(
        config: CrisisConfig,
        remote: Arc<dyn RemoteSync>,
        queue: Arc<PersistenceQueue<C>>,
        clock: Arc<C>,
    ) -> Self {
        Self { config, remote, queue, clock }
    }

    /// Handle a crisis emergency.
    ///
    /// Always returns within roughly `response_deadline`, and always with
    /// `success=true`.
    #[instrument(skip(self, context), fields(emergency_id = %context.emergency_id))]
    pub async fn handle(&self, context: CrisisContext) -> CrisisOutcome {
        let request = self.crisis_request(&context);
        self.run(context.emergency_id, request).await
    }

    /// Handle a crisis-mode sync request routed here by the orchestrator.
    pub async fn handle_request(&self, request: SyncRequest) -> CrisisOutcome {
        self.run(request.operation_id.clone(), request).await
    }

    async fn run(&self, emergency_id: String, request: SyncRequest) -> CrisisOutcome {
        let started = self.clock.now();

        let remote = Arc::clone(&self.remote);
        let attempt_request = request.clone();
        let mut attempt =
            tokio::spawn(async move { remote.sync(&attempt_request).await });

        let (remote_synced, attempt_failed) =
            match tokio::time::timeout(self.config.response_deadline, &mut attempt).await {
                Ok(Ok(Ok(_ack))) => {
                    debug!("crisis sync confirmed within deadline");
                    (true, false)
                }
                Ok(Ok(Err(err))) => {
                    warn!(error = %err, "crisis remote attempt failed fast");
                    (false, true)
                }
                Ok(Err(join_err)) => {
                    warn!(error = %join_err, "crisis remote attempt aborted");
                    (false, true)
                }
                Err(_elapsed) => {
                    // Attempt still in flight: let it finish in the
                    // background and park the payload if it fails.
                    info!("crisis deadline elapsed; detaching remote attempt");
                    let queue = Arc::clone(&self.queue);
                    let pending_request = request.clone();
                    tokio::spawn(async move {
                        match attempt.await {
                            Ok(Ok(_)) => {
                                debug!(
                                    operation_id = %pending_request.operation_id,
                                    "late crisis sync completed"
                                );
                            }
                            _ => {
                                if let Err(err) = queue.enqueue(&pending_request) {
                                    warn!(
                                        operation_id = %pending_request.operation_id,
                                        error = %err,
                                        "failed to park crisis payload after late failure"
                                    );
                                }
                            }
                        }
                    });
                    (false, false)
                }
            };

        // Best-effort persistence of a fast failure. A queue or encryption
        // outage is reported in logs but cannot flip the outcome.
        let mut queued_for_later = false;
        if attempt_failed {
            match self.queue.enqueue(&request) {
                Ok(()) => queued_for_later = true,
                Err(err) => {
                    warn!(
                        operation_id = %request.operation_id,
                        error = %err,
                        category = %ErrorCategory::Security,
                        "crisis payload could not be parked; continuing with local resources"
                    );
                }
            }
        }

        let fallback_triggered = !remote_synced;
        CrisisOutcome {
            emergency_id,
            success: true,
            crisis_override_used: true,
            fallback_triggered,
            remote_synced,
            queued_for_later,
            resources: self.config.resources.clone(),
            response_time: self.clock.now().duration_since(started),
        }
    }

    fn crisis_request(&self, context: &CrisisContext) -> SyncRequest {
        SyncRequest::with_id(
            format!("crisis-{}", context.emergency_id),
            self.config.queue_priority,
            context.payload.clone(),
        )
        .with_crisis_mode(true)
        .with_max_retries(1)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the crisis fast-path.
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::clock::SystemClock;
    use crate::crypto::AesGcmEncryptor;
    use crate::queue::QueueConfig;
    use crate::remote::{RemoteAck, RemoteError};
    use crate::store::MemoryStore;

    struct ScriptedRemote {
        calls: AtomicU32,
        behavior: Behavior,
    }

    enum Behavior {
        Succeed,
        Reject,
        Hang(Duration),
    }

    #[async_trait]
    impl RemoteSync for ScriptedRemote {
        async fn sync(&self, request: &SyncRequest) -> Result<RemoteAck, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(RemoteAck::at_version(request.payload.version)),
                Behavior::Reject => Err(RemoteError::rejected("service_unavailable")),
                Behavior::Hang(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(RemoteAck::at_version(request.payload.version))
                }
            }
        }
    }

    fn pipeline(behavior: Behavior) -> (CrisisPipeline<SystemClock>, Arc<ScriptedRemote>) {
        let remote = Arc::new(ScriptedRemote { calls: AtomicU32::new(0), behavior });
        let encryptor = Arc::new(AesGcmEncryptor::new(AesGcmEncryptor::generate_key()).unwrap());
        let queue = Arc::new(
            PersistenceQueue::new(QueueConfig::default(), encryptor, Arc::new(MemoryStore::new()))
                .unwrap(),
        );
        let pipeline = CrisisPipeline::new(
            CrisisConfig::default(),
            Arc::clone(&remote) as Arc<dyn RemoteSync>,
            queue,
            Arc::new(SystemClock),
        );
        (pipeline, remote)
    }

    fn context() -> CrisisContext {
        CrisisContext {
            emergency_id: "em-1".to_string(),
            user_id: "user-1".to_string(),
            device_id: "device-1".to_string(),
            payload: SyncPayload::new("entity-em", "crisis_event", 1, 1_000, json!({"kind": "alert"})),
        }
    }

    /// Validates the happy path: remote confirms within the deadline.
    #[tokio::test]
    async fn test_crisis_remote_success() {
        let (pipeline, remote) = pipeline(Behavior::Succeed);

        let outcome = pipeline.handle(context()).await;

        assert!(outcome.success);
        assert!(outcome.remote_synced);
        assert!(!outcome.fallback_triggered);
        assert!(outcome.crisis_override_used);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    /// Validates the always-rejecting remote scenario: success with
    /// fallback, non-empty resources, payload parked for recovery.
    #[tokio::test]
    async fn test_crisis_remote_rejection_still_succeeds() {
        let (pipeline, remote) = pipeline(Behavior::Reject);

        let outcome = pipeline.handle(context()).await;

        assert!(outcome.success);
        assert!(outcome.crisis_override_used);
        assert!(outcome.fallback_triggered);
        assert!(!outcome.remote_synced);
        assert!(outcome.queued_for_later);
        assert!(!outcome.resources.entries.is_empty());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    /// Validates the deadline race: a hanging remote does not hold the
    /// caller past the response bound.
    #[tokio::test]
    async fn test_crisis_deadline_detaches_hanging_remote() {
        let (pipeline, _remote) = pipeline(Behavior::Hang(Duration::from_secs(5)));

        let started = std::time::Instant::now();
        let outcome = pipeline.handle(context()).await;
        let elapsed = started.elapsed();

        assert!(outcome.success);
        assert!(outcome.fallback_triggered);
        assert!(!outcome.remote_synced);
        assert!(elapsed < Duration::from_secs(1), "caller held for {elapsed:?}");
    }

    /// Validates default resources are usable offline.
    #[test]
    fn test_default_resources_non_empty() {
        let resources = CrisisResources::default();
        assert!(!resources.entries.is_empty());
        assert!(resources.entries.iter().any(|r| r.contact.contains("988")));
    }
}
