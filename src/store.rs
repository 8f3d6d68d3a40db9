//! Registry persistence
//!
//! A registry survives restarts by flushing a `RegistrySnapshot` to a
//! `RegistryStore` and rehydrating from it later. The snapshot carries the
//! per-type counters, so numbers handed out before a restart are never
//! handed out again.

use crate::crypto::{EncryptedSnapshot, SnapshotEncryptor};
use crate::error::{PiiError, Result};
use crate::registry::RegistrySnapshot;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Pluggable backend for registry snapshots
pub trait RegistryStore: Send + Sync {
    /// Replace the stored snapshot
    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()>;

    /// Load the stored snapshot, or an empty one if nothing was saved yet
    fn load(&self) -> Result<RegistrySnapshot>;
}

/// JSON file-based registry store
///
/// Atomic writes via temp file + rename. With an encryptor configured the
/// file holds an `EncryptedSnapshot` envelope instead of plain JSON; plain
/// files are still readable so an existing store can be migrated in place.
pub struct FileRegistryStore {
    path: PathBuf,
    encryptor: Option<Arc<dyn SnapshotEncryptor>>,
}

impl FileRegistryStore {
    /// Create a file store at the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encryptor: None,
        }
    }

    /// Encrypt snapshots at rest
    pub fn with_encryptor(mut self, encryptor: Arc<dyn SnapshotEncryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode(&self, snapshot: &RegistrySnapshot) -> Result<Vec<u8>> {
        match &self.encryptor {
            Some(encryptor) => {
                let plaintext = serde_json::to_vec(snapshot)?;
                let envelope = encryptor.encrypt(&plaintext)?;
                Ok(serde_json::to_vec_pretty(&envelope)?)
            }
            None => Ok(serde_json::to_vec_pretty(snapshot)?),
        }
    }

    fn decode(&self, raw: &[u8]) -> Result<RegistrySnapshot> {
        let value: serde_json::Value = serde_json::from_slice(raw).map_err(|e| {
            PiiError::Store(format!(
                "Failed to parse registry file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        if !EncryptedSnapshot::is_encrypted(&value) {
            if self.encryptor.is_some() {
                tracing::warn!(
                    path = %self.path.display(),
                    "Registry file is not encrypted, it will be sealed on next save"
                );
            }
            return Ok(serde_json::from_value(value)?);
        }

        let encryptor = self.encryptor.as_ref().ok_or_else(|| {
            PiiError::Store(format!(
                "Registry file {} is encrypted but no encryptor is configured",
                self.path.display()
            ))
        })?;
        let envelope: EncryptedSnapshot = serde_json::from_value(value)?;
        let plaintext = encryptor.decrypt(&envelope)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl RegistryStore for FileRegistryStore {
    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let bytes = self.encode(snapshot)?;

        // Atomic write: write to temp file, then rename
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PiiError::Store(format!(
                    "Failed to create registry directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&tmp_path, bytes).map_err(|e| {
            PiiError::Store(format!(
                "Failed to write registry file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            PiiError::Store(format!(
                "Failed to rename registry file {} → {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(
            path = %self.path.display(),
            entries = snapshot.entries.len(),
            encrypted = self.encryptor.is_some(),
            "Registry saved"
        );
        Ok(())
    }

    fn load(&self) -> Result<RegistrySnapshot> {
        if !self.path.exists() {
            return Ok(RegistrySnapshot::default());
        }

        let raw = std::fs::read(&self.path).map_err(|e| {
            PiiError::Store(format!(
                "Failed to read registry file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let snapshot = self.decode(&raw)?;

        tracing::debug!(
            path = %self.path.display(),
            entries = snapshot.entries.len(),
            "Registry file loaded"
        );
        Ok(snapshot)
    }
}

/// In-memory registry store, lost on drop
#[derive(Default)]
pub struct MemoryRegistryStore {
    snapshot: RwLock<Option<RegistrySnapshot>>,
}

impl RegistryStore for MemoryRegistryStore {
    fn save(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let mut state = self
            .snapshot
            .write()
            .map_err(|e| PiiError::Store(format!("Failed to acquire store lock: {}", e)))?;
        *state = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<RegistrySnapshot> {
        let state = self
            .snapshot
            .read()
            .map_err(|e| PiiError::Store(format!("Failed to acquire store lock: {}", e)))?;
        Ok(state.clone().unwrap_or_default())
    }
}
