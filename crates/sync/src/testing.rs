//! Test support: scripted collaborators for deterministic engine tests.
//!
//! These doubles let tests drive failure timing and remote behavior
//! without a network: a scripted remote, an encryptor that always fails
//! (total encryption outage) and a store that rejects writes (storage
//! outage).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::crypto::{CryptoError, CryptoResult, Encryptor};
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteAck, RemoteError, RemoteSync};
use crate::request::{SyncPayload, SyncRequest};
use crate::store::DurableStore;

/// Behavior script for [`MockRemote`].
#[derive(Debug, Clone)]
pub enum RemoteScript {
    /// Every call succeeds.
    AlwaysSucceed,
    /// Every call is rejected with the given message.
    AlwaysReject { message: String },
    /// The first `failures` calls are rejected, then calls succeed.
    FailThenSucceed { failures: u32, message: String },
    /// The first call reports a version conflict, then calls succeed.
    ConflictThenSucceed { remote: SyncPayload },
    /// Every call hangs for `delay` before succeeding.
    Hang { delay: Duration },
}

/// Scripted remote sync collaborator.
///
/// Tracks per-operation applied effects so tests can assert idempotency:
/// recovery may submit an operation twice, but a successful effect should
/// land at most once per operation id.
pub struct MockRemote {
    script: RemoteScript,
    calls: AtomicU32,
    applied: Mutex<Vec<String>>,
}

impl MockRemote {
    pub fn new(script: RemoteScript) -> Self {
        Self { script, calls: AtomicU32::new(0), applied: Mutex::new(Vec::new()) }
    }

    /// Total calls received.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Operation ids with applied effects, in application order.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Number of successful effects applied for one operation id.
    pub fn applied_count(&self, operation_id: &str) -> usize {
        self.applied
            .lock()
            .map(|a| a.iter().filter(|id| id.as_str() == operation_id).count())
            .unwrap_or(0)
    }

    fn record_applied(&self, operation_id: &str) {
        if let Ok(mut applied) = self.applied.lock() {
            // Idempotent remote: a repeated operation id is a no-op.
            if !applied.iter().any(|id| id == operation_id) {
                applied.push(operation_id.to_string());
            }
        }
    }
}

#[async_trait]
impl RemoteSync for MockRemote {
    async fn sync(&self, request: &SyncRequest) -> Result<RemoteAck, RemoteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            RemoteScript::AlwaysSucceed => {
                self.record_applied(&request.operation_id);
                Ok(RemoteAck::at_version(request.payload.version))
            }
            RemoteScript::AlwaysReject { message } => Err(RemoteError::rejected(message.clone())),
            RemoteScript::FailThenSucceed { failures, message } => {
                if call < *failures {
                    Err(RemoteError::rejected(message.clone()))
                } else {
                    self.record_applied(&request.operation_id);
                    Ok(RemoteAck::at_version(request.payload.version))
                }
            }
            RemoteScript::ConflictThenSucceed { remote } => {
                if call == 0 {
                    Err(RemoteError::VersionConflict { remote: remote.clone() })
                } else {
                    self.record_applied(&request.operation_id);
                    Ok(RemoteAck::at_version(request.payload.version))
                }
            }
            RemoteScript::Hang { delay } => {
                tokio::time::sleep(*delay).await;
                self.record_applied(&request.operation_id);
                Ok(RemoteAck::at_version(request.payload.version))
            }
        }
    }
}

/// Encryptor simulating a total encryption outage.
#[derive(Debug, Default)]
pub struct FailingEncryptor;

impl Encryptor for FailingEncryptor {
    fn encrypt(&self, _plaintext: &[u8], key_id: &str) -> CryptoResult<String> {
        Err(CryptoError::EncryptFailed { key_id: key_id.to_string() })
    }

    fn decrypt(&self, _blob: &str, key_id: &str) -> CryptoResult<Vec<u8>> {
        Err(CryptoError::DecryptFailed { key_id: key_id.to_string() })
    }
}

/// Store simulating a storage outage: every mutation fails.
#[derive(Debug, Default)]
pub struct FailingStore;

impl DurableStore for FailingStore {
    fn put(&self, _key: &str, _value: &str) -> SyncResult<()> {
        Err(SyncError::persistence("put", "storage offline"))
    }

    fn get(&self, _key: &str) -> SyncResult<Option<String>> {
        Err(SyncError::persistence("get", "storage offline"))
    }

    fn delete(&self, _key: &str) -> SyncResult<()> {
        Err(SyncError::persistence("delete", "storage offline"))
    }

    fn keys(&self) -> SyncResult<Vec<String>> {
        Ok(Vec::new())
    }
}
