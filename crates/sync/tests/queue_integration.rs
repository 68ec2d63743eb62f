//! Integration tests for durable queue persistence.
//!
//! Runs the engine against the file-backed store to prove parked
//! operations survive a process restart encrypted, and recover on the new
//! instance.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use solace_sync::testing::{MockRemote, RemoteScript};
use solace_sync::{
    AesGcmEncryptor, CircuitBreakerConfig, EngineConfig, FileStore, RetryPolicyConfig,
    SyncEngine, SyncPayload, SyncPriority, SyncRequest,
};

fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicyConfig::builder()
            .max_attempts(2)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .jitter_max(Duration::ZERO)
            .build()
            .expect("valid retry config"),
        breaker: CircuitBreakerConfig::builder()
            .failure_threshold(100)
            .build()
            .expect("valid breaker config"),
        attempt_timeout: Duration::from_secs(2),
        ..EngineConfig::default()
    }
}

fn request(id: &str, priority: SyncPriority) -> SyncRequest {
    let payload = SyncPayload::new(
        format!("entity-{id}"),
        "clinical_session",
        1,
        1_000,
        json!({"phq9_score": 14, "session_notes": "spoke about family"}),
    );
    SyncRequest::with_id(id, priority, payload)
}

/// Validates the full offline story: operations parked by one engine
/// instance are encrypted on disk and recovered by the next instance.
#[tokio::test(flavor = "multi_thread")]
async fn test_parked_operations_survive_restart_encrypted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store_path = dir.path().join("sync-queue.json");
    let key = AesGcmEncryptor::generate_key();

    // First instance: remote is down, operations park.
    {
        let remote = Arc::new(MockRemote::new(RemoteScript::AlwaysReject {
            message: "network_error".to_string(),
        }));
        let engine = SyncEngine::new(
            fast_config(),
            Arc::clone(&remote) as Arc<dyn solace_sync::RemoteSync>,
            Arc::new(AesGcmEncryptor::new(key.clone()).expect("valid key")),
            Arc::new(FileStore::open(&store_path).expect("store opens")),
        )
        .expect("engine construction");

        let low = engine.execute_resilient_sync(request("low", SyncPriority::LowBackground)).await;
        let high =
            engine.execute_resilient_sync(request("high", SyncPriority::HighClinical)).await;
        assert!(low.queued_for_later);
        assert!(high.queued_for_later);

        engine.shutdown();
    }

    // The on-disk snapshot never holds plaintext clinical content.
    let raw = std::fs::read_to_string(&store_path).expect("snapshot readable");
    assert!(!raw.contains("phq9_score"));
    assert!(!raw.contains("spoke about family"));
    assert!(raw.contains("high"), "operation ids are allowed in the snapshot");

    // Second instance over the same store: remote is healthy again.
    let remote = Arc::new(MockRemote::new(RemoteScript::AlwaysSucceed));
    let engine = SyncEngine::new(
        fast_config(),
        Arc::clone(&remote) as Arc<dyn solace_sync::RemoteSync>,
        Arc::new(AesGcmEncryptor::new(key).expect("valid key")),
        Arc::new(FileStore::open(&store_path).expect("store reopens")),
    )
    .expect("engine construction");

    assert_eq!(engine.statistics().queue_depth, 2, "parked operations restored");

    let recovery = engine.recover_persisted_operations().await;
    assert_eq!(recovery.recovered, 2);
    assert_eq!(remote.applied(), vec!["high", "low"], "priority order survives restart");

    // Acknowledged operations leave the durable store.
    let raw = std::fs::read_to_string(&store_path).expect("snapshot readable");
    assert!(!raw.contains("high"));
}

/// Validates recovery against a wrong key fails loudly and drops the
/// unreadable items instead of looping forever.
#[tokio::test(flavor = "multi_thread")]
async fn test_recovery_with_wrong_key_drops_observably() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store_path = dir.path().join("sync-queue.json");

    {
        let remote = Arc::new(MockRemote::new(RemoteScript::AlwaysReject {
            message: "network_error".to_string(),
        }));
        let engine = SyncEngine::new(
            fast_config(),
            Arc::clone(&remote) as Arc<dyn solace_sync::RemoteSync>,
            Arc::new(
                AesGcmEncryptor::new(AesGcmEncryptor::generate_key()).expect("valid key"),
            ),
            Arc::new(FileStore::open(&store_path).expect("store opens")),
        )
        .expect("engine construction");
        engine.execute_resilient_sync(request("op-1", SyncPriority::MediumUser)).await;
    }

    // New instance with a different key cannot decrypt the parked blob.
    let remote = Arc::new(MockRemote::new(RemoteScript::AlwaysSucceed));
    let engine = SyncEngine::new(
        fast_config(),
        Arc::clone(&remote) as Arc<dyn solace_sync::RemoteSync>,
        Arc::new(AesGcmEncryptor::new(AesGcmEncryptor::generate_key()).expect("valid key")),
        Arc::new(FileStore::open(&store_path).expect("store reopens")),
    )
    .expect("engine construction");

    let recovery = engine.recover_persisted_operations().await;
    assert_eq!(recovery.recovered, 0);
    assert_eq!(recovery.failed, 1);
    assert_eq!(remote.calls(), 0, "undecryptable payloads are never submitted");
    assert_eq!(engine.statistics().queue_depth, 0);
}
