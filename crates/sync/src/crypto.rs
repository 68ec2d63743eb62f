//! Payload encryption for the persistence queue.
//!
//! The engine consumes encryption through the narrow [`Encryptor`] trait so
//! tests can substitute failing fakes; [`AesGcmEncryptor`] is the
//! production implementation (AES-256-GCM, random nonce per payload, the
//! operation id bound in as associated data so a blob cannot be replayed
//! under a different operation).

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity, SyncError};

/// Errors raised by encryption collaborators.
///
/// Always classified `security`/non-retryable: a cipher failure is never
/// something a retry can fix, and it must be reported rather than
/// swallowed.
#[derive(Debug, Clone, Error)]
pub enum CryptoError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Encryption failed for '{key_id}'")]
    EncryptFailed { key_id: String },

    #[error("Decryption failed for '{key_id}'")]
    DecryptFailed { key_id: String },

    #[error("Malformed encrypted payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Common(#[from] SyncError),
}

impl ErrorClassification for CryptoError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Common(e) => e.is_retryable(),
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Common(e) => e.severity(),
            _ => ErrorSeverity::Critical,
        }
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Common(e) => e,
            other => SyncError::encryption("payload", other.to_string()),
        }
    }
}

/// Result type for encryption operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Serializable encrypted payload container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub algorithm: String,
}

/// Injected encryption collaborator.
///
/// `key_id` identifies the logical owner of the blob (the operation id);
/// implementations must bind it so decryption under a different id fails.
pub trait Encryptor: Send + Sync {
    /// Encrypt `plaintext` into an opaque base64 blob.
    fn encrypt(&self, plaintext: &[u8], key_id: &str) -> CryptoResult<String>;

    /// Decrypt a blob produced by [`Encryptor::encrypt`] with the same
    /// `key_id`.
    fn decrypt(&self, blob: &str, key_id: &str) -> CryptoResult<Vec<u8>>;
}

const ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM encryptor.
pub struct AesGcmEncryptor {
    key: Vec<u8>,
    cipher: Aes256Gcm,
}

impl fmt::Debug for AesGcmEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmEncryptor").field("key", &"[REDACTED]").finish()
    }
}

impl AesGcmEncryptor {
    /// Create an encryptor from a raw 32-byte key.
    pub fn new(key: Vec<u8>) -> CryptoResult<Self> {
        if key.len() != 32 {
            return Err(CryptoError::InvalidKey("key must be exactly 32 bytes".to_string()));
        }

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        Ok(Self { key, cipher })
    }

    /// Generate a random 32-byte symmetric key.
    pub fn generate_key() -> Vec<u8> {
        let mut key = vec![0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Short fingerprint of the current key for telemetry.
    pub fn key_fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        let digest = hasher.finalize();
        BASE64.encode(&digest[..8])
    }

    fn generate_nonce() -> [u8; 12] {
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }
}

impl Encryptor for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &[u8], key_id: &str) -> CryptoResult<String> {
        let nonce_bytes = Self::generate_nonce();
        let ciphertext = self
            .cipher
            .encrypt(
                &Nonce::from(nonce_bytes),
                Payload { msg: plaintext, aad: key_id.as_bytes() },
            )
            .map_err(|_| CryptoError::EncryptFailed { key_id: key_id.to_string() })?;

        let container = EncryptedData {
            nonce: nonce_bytes.to_vec(),
            ciphertext,
            algorithm: ALGORITHM.to_string(),
        };
        let serialized = serde_json::to_vec(&container)
            .map_err(|e| CryptoError::MalformedPayload(e.to_string()))?;
        Ok(BASE64.encode(serialized))
    }

    fn decrypt(&self, blob: &str, key_id: &str) -> CryptoResult<Vec<u8>> {
        let decoded =
            BASE64.decode(blob).map_err(|e| CryptoError::MalformedPayload(e.to_string()))?;
        let container: EncryptedData = serde_json::from_slice(&decoded)
            .map_err(|e| CryptoError::MalformedPayload(e.to_string()))?;

        if container.algorithm != ALGORITHM {
            return Err(CryptoError::MalformedPayload(format!(
                "unsupported algorithm: {}",
                container.algorithm
            )));
        }
        if container.nonce.len() != 12 {
            return Err(CryptoError::MalformedPayload("nonce must be 12 bytes".to_string()));
        }

        let nonce_array: [u8; 12] = container
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::MalformedPayload("nonce must be 12 bytes".to_string()))?;

        self.cipher
            .decrypt(
                &Nonce::from(nonce_array),
                Payload { msg: container.ciphertext.as_ref(), aad: key_id.as_bytes() },
            )
            .map_err(|_| CryptoError::DecryptFailed { key_id: key_id.to_string() })
    }
}
