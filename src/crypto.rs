//! Encryption at rest for persisted registry snapshots
//!
//! A persisted registry holds every real value the engine has ever seen, so
//! file-backed stores can seal the snapshot with AES-256-GCM. Supports key
//! rotation via key IDs: new snapshots use the active key, older ones stay
//! readable as long as their key is registered.

use crate::error::{PiiError, Result};
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, AeadCore, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Associated data bound into every ciphertext
const SNAPSHOT_AAD: &[u8] = b"a3s-pii/registry-snapshot/v1";

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// Sealed snapshot envelope, stored as JSON in place of the plain snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSnapshot {
    /// Identifies which key was used for encryption
    pub key_id: String,

    /// Base64-encoded nonce (96-bit for AES-256-GCM)
    pub nonce: String,

    /// Base64-encoded ciphertext
    pub ciphertext: String,

    /// Marker to identify encrypted snapshots
    #[serde(default = "default_encrypted")]
    pub encrypted: bool,
}

fn default_encrypted() -> bool {
    true
}

impl EncryptedSnapshot {
    /// Check if a JSON value is an encrypted envelope
    pub fn is_encrypted(value: &serde_json::Value) -> bool {
        value
            .get("encrypted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Seals and opens serialized registry snapshots
pub trait SnapshotEncryptor: Send + Sync {
    /// Encrypt serialized snapshot bytes
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedSnapshot>;

    /// Decrypt an envelope back to the serialized snapshot bytes
    fn decrypt(&self, envelope: &EncryptedSnapshot) -> Result<Vec<u8>>;

    /// The key ID new envelopes are sealed with
    fn active_key_id(&self) -> &str;
}

/// AES-256-GCM encryptor with key rotation support
pub struct Aes256GcmEncryptor {
    active_key_id: String,
    keys: RwLock<HashMap<String, Aes256Gcm>>,
}

fn cipher_for(key: &[u8; 32]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

fn lock_error<E: std::fmt::Display>(e: E) -> PiiError {
    PiiError::Encryption(format!("Failed to acquire key lock: {}", e))
}

impl Aes256GcmEncryptor {
    /// Create an encryptor with a single 256-bit key
    pub fn new(key_id: impl Into<String>, key: &[u8; 32]) -> Self {
        let key_id = key_id.into();
        let mut keys = HashMap::new();
        keys.insert(key_id.clone(), cipher_for(key));

        Self {
            active_key_id: key_id,
            keys: RwLock::new(keys),
        }
    }

    /// Register an additional key for decryption
    pub fn add_key(&self, key_id: impl Into<String>, key: &[u8; 32]) -> Result<()> {
        let mut keys = self.keys.write().map_err(lock_error)?;
        keys.insert(key_id.into(), cipher_for(key));
        Ok(())
    }

    /// Switch the active key; it must already be registered
    pub fn rotate_to(&mut self, key_id: &str) -> Result<()> {
        let keys = self.keys.read().map_err(lock_error)?;
        if !keys.contains_key(key_id) {
            return Err(PiiError::Config(format!(
                "Key '{}' not registered, add it first",
                key_id
            )));
        }
        drop(keys);
        self.active_key_id = key_id.to_string();
        tracing::info!(key_id, "Snapshot encryption key rotated");
        Ok(())
    }

    /// All registered key IDs
    pub fn key_ids(&self) -> Vec<String> {
        self.keys
            .read()
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl SnapshotEncryptor for Aes256GcmEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedSnapshot> {
        let keys = self.keys.read().map_err(lock_error)?;
        let cipher = keys.get(&self.active_key_id).ok_or_else(|| {
            PiiError::Encryption(format!("Active key '{}' not found", self.active_key_id))
        })?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let payload = Payload {
            msg: plaintext,
            aad: SNAPSHOT_AAD,
        };
        let ciphertext = cipher
            .encrypt(&nonce, payload)
            .map_err(|e| PiiError::Encryption(format!("Encryption failed: {}", e)))?;

        Ok(EncryptedSnapshot {
            key_id: self.active_key_id.clone(),
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
            encrypted: true,
        })
    }

    fn decrypt(&self, envelope: &EncryptedSnapshot) -> Result<Vec<u8>> {
        let keys = self.keys.read().map_err(lock_error)?;
        let cipher = keys.get(&envelope.key_id).ok_or_else(|| {
            PiiError::Encryption(format!(
                "Decryption key '{}' not registered",
                envelope.key_id
            ))
        })?;

        let nonce_bytes = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| PiiError::Encryption(format!("Invalid nonce encoding: {}", e)))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(PiiError::Encryption(format!(
                "Invalid nonce length {} (expected {})",
                nonce_bytes.len(),
                NONCE_LEN
            )));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| PiiError::Encryption(format!("Invalid ciphertext encoding: {}", e)))?;

        let payload = Payload {
            msg: ciphertext.as_ref(),
            aad: SNAPSHOT_AAD,
        };
        cipher
            .decrypt(nonce, payload)
            .map_err(|e| PiiError::Encryption(format!("Decryption failed: {}", e)))
    }

    fn active_key_id(&self) -> &str {
        &self.active_key_id
    }
}
