//! Identity vault: durable key → blob storage for sealed PII.
//!
//! The vault is keyed only by random ids and offers no way to search by
//! content. Backends implement [`VaultStore`]; the orchestrators never see
//! which one they are talking to.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use cloak_shared::constants::VAULT_PAYLOAD_VERSION;
use cloak_shared::EncryptedField;

/// Raw bytes of a vault id: 32 bytes, hex encoded to 64 chars.
const VAULT_ID_BYTES: usize = 32;
const VAULT_FILE_EXT: &str = "vault";
/// Suffix of the staging file an entry is written to before it is linked in.
const STAGING_EXT: &str = "partial";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault entry not found: {0}")]
    NotFound(String),

    #[error("Vault entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid vault id")]
    InvalidId,

    #[error("Vault entry is corrupt: {0}")]
    Corrupt(String),

    #[error("Vault IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fresh, high-entropy vault id. Never reused.
pub fn new_vault_id() -> String {
    let mut bytes = [0u8; VAULT_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn is_valid_vault_id(id: &str) -> bool {
    id.len() == VAULT_ID_BYTES * 2 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn check_id(id: &str) -> Result<(), VaultError> {
    if is_valid_vault_id(id) {
        Ok(())
    } else {
        Err(VaultError::InvalidId)
    }
}

// ---------------------------------------------------------------------------
// Stored record
// ---------------------------------------------------------------------------

/// What a vault entry holds on disk. `sealed` is the vault-key layer; the
/// identity-key layer lives inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub version: u16,
    pub vault_id: String,
    pub created_at: DateTime<Utc>,
    pub sealed: EncryptedField,
}

impl VaultRecord {
    pub fn new(vault_id: String, sealed: EncryptedField) -> Self {
        Self {
            version: VAULT_PAYLOAD_VERSION,
            vault_id,
            created_at: Utc::now(),
            sealed,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, VaultError> {
        serde_json::to_vec(self).map_err(|e| VaultError::Corrupt(e.to_string()))
    }

    /// Parse a stored entry and check it belongs under `expected_id`.
    pub fn decode(expected_id: &str, bytes: &[u8]) -> Result<Self, VaultError> {
        let record: Self =
            serde_json::from_slice(bytes).map_err(|e| VaultError::Corrupt(e.to_string()))?;
        if record.version != VAULT_PAYLOAD_VERSION {
            return Err(VaultError::Corrupt(format!(
                "unsupported version {}",
                record.version
            )));
        }
        if record.vault_id != expected_id {
            return Err(VaultError::Corrupt("vault id mismatch".to_string()));
        }
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Storage contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Write a new entry. Fails with `AlreadyExists` rather than overwrite.
    async fn store(&self, vault_id: &str, payload: &[u8]) -> Result<(), VaultError>;

    async fn retrieve(&self, vault_id: &str) -> Result<Vec<u8>, VaultError>;

    /// Remove an entry. Administrative only; masking and unmasking never call
    /// this except to discard an entry whose masking did not commit.
    async fn purge(&self, vault_id: &str) -> Result<(), VaultError>;
}

// ---------------------------------------------------------------------------
// Filesystem backend
// ---------------------------------------------------------------------------

/// Verify that a resolved path stays within the vault directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, VaultError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => return Err(VaultError::InvalidId),
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(VaultError::InvalidId);
    }
    Ok(resolved)
}

/// One file per entry under a single directory.
#[derive(Debug, Clone)]
pub struct FsVault {
    base_path: PathBuf,
}

impl FsVault {
    pub async fn new(base_path: PathBuf) -> Result<Self, VaultError> {
        fs::create_dir_all(&base_path).await?;
        info!(path = %base_path.display(), "Identity vault initialized");
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn entry_path(&self, vault_id: &str) -> Result<PathBuf, VaultError> {
        check_id(vault_id)?;
        let raw = self
            .base_path
            .join(format!("{vault_id}.{VAULT_FILE_EXT}"));
        ensure_within(&self.base_path, &raw)
    }

    fn staging_path(&self, vault_id: &str) -> Result<PathBuf, VaultError> {
        check_id(vault_id)?;
        let raw = self
            .base_path
            .join(format!("{vault_id}.{VAULT_FILE_EXT}.{STAGING_EXT}"));
        ensure_within(&self.base_path, &raw)
    }
}

async fn write_synced(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?;
    file.write_all(payload).await?;
    file.sync_all().await
}

#[async_trait]
impl VaultStore for FsVault {
    async fn store(&self, vault_id: &str, payload: &[u8]) -> Result<(), VaultError> {
        let path = self.entry_path(vault_id)?;
        let staging = self.staging_path(vault_id)?;

        if fs::try_exists(&path).await? {
            return Err(VaultError::AlreadyExists(vault_id.to_string()));
        }

        // The entry only appears under its final name once fully synced;
        // hard_link refuses to replace an existing entry.
        let result = match write_synced(&staging, payload).await {
            Ok(()) => fs::hard_link(&staging, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = fs::remove_file(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(vault_id, error = %e, "Failed to remove vault staging file");
            }
        }

        match result {
            Ok(()) => {
                debug!(vault_id, size = payload.len(), "Stored vault entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(VaultError::AlreadyExists(vault_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn retrieve(&self, vault_id: &str) -> Result<Vec<u8>, VaultError> {
        let path = self.entry_path(vault_id)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VaultError::NotFound(vault_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn purge(&self, vault_id: &str) -> Result<(), VaultError> {
        let path = self.entry_path(vault_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(vault_id, "Purged vault entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VaultError::NotFound(vault_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryVault {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Overwrite an existing entry's bytes in place. For fault-injection
    /// tests that simulate tampering with the backing store.
    pub async fn replace_raw(&self, vault_id: &str, bytes: Vec<u8>) -> Result<(), VaultError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(vault_id) {
            Some(slot) => {
                *slot = bytes;
                Ok(())
            }
            None => Err(VaultError::NotFound(vault_id.to_string())),
        }
    }
}

#[async_trait]
impl VaultStore for MemoryVault {
    async fn store(&self, vault_id: &str, payload: &[u8]) -> Result<(), VaultError> {
        check_id(vault_id)?;
        let mut entries = self.entries.write().await;
        if entries.contains_key(vault_id) {
            return Err(VaultError::AlreadyExists(vault_id.to_string()));
        }
        entries.insert(vault_id.to_string(), payload.to_vec());
        Ok(())
    }

    async fn retrieve(&self, vault_id: &str) -> Result<Vec<u8>, VaultError> {
        check_id(vault_id)?;
        self.entries
            .read()
            .await
            .get(vault_id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(vault_id.to_string()))
    }

    async fn purge(&self, vault_id: &str) -> Result<(), VaultError> {
        check_id(vault_id)?;
        self.entries
            .write()
            .await
            .remove(vault_id)
            .map(|_| ())
            .ok_or_else(|| VaultError::NotFound(vault_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloak_shared::crypto::{encrypt, generate_symmetric_key};
    use tempfile::TempDir;

    async fn fs_vault() -> (FsVault, TempDir) {
        let dir = TempDir::new().unwrap();
        let vault = FsVault::new(dir.path().join("vault")).await.unwrap();
        (vault, dir)
    }

    #[test]
    fn test_vault_ids_are_fresh_and_valid() {
        let a = new_vault_id();
        let b = new_vault_id();
        assert_ne!(a, b);
        assert!(is_valid_vault_id(&a));
        assert!(!is_valid_vault_id("../etc/passwd"));
        assert!(!is_valid_vault_id(&a.to_uppercase()));
        assert!(!is_valid_vault_id(&a[..63]));
    }

    #[test]
    fn test_record_decode_checks_id() {
        let sealed = encrypt(&generate_symmetric_key(), b"payload").unwrap();
        let id = new_vault_id();
        let bytes = VaultRecord::new(id.clone(), sealed).encode().unwrap();

        assert_eq!(VaultRecord::decode(&id, &bytes).unwrap().vault_id, id);
        assert!(matches!(
            VaultRecord::decode(&new_vault_id(), &bytes),
            Err(VaultError::Corrupt(_))
        ));
        assert!(matches!(
            VaultRecord::decode(&id, b"not json"),
            Err(VaultError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_store_and_retrieve() {
        let (vault, _dir) = fs_vault().await;
        let id = new_vault_id();

        vault.store(&id, b"sealed-bytes").await.unwrap();
        assert_eq!(vault.retrieve(&id).await.unwrap(), b"sealed-bytes");
        assert!(vault
            .base_path()
            .join(format!("{id}.vault"))
            .exists());
    }

    #[tokio::test]
    async fn test_fs_refuses_overwrite() {
        let (vault, _dir) = fs_vault().await;
        let id = new_vault_id();

        vault.store(&id, b"first").await.unwrap();
        assert!(matches!(
            vault.store(&id, b"second").await,
            Err(VaultError::AlreadyExists(_))
        ));
        assert_eq!(vault.retrieve(&id).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_fs_interrupted_write_leaves_no_entry() {
        let (vault, _dir) = fs_vault().await;
        let id = new_vault_id();
        let staging = vault.base_path().join(format!("{id}.vault.partial"));

        // A store that died mid-write leaves only a truncated staging file.
        std::fs::write(&staging, b"trunc").unwrap();
        assert!(matches!(vault.retrieve(&id).await, Err(VaultError::NotFound(_))));

        vault.store(&id, b"complete-payload").await.unwrap();
        assert_eq!(vault.retrieve(&id).await.unwrap(), b"complete-payload");
        assert!(!staging.exists());

        let entries = std::fs::read_dir(vault.base_path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_fs_missing_and_purge() {
        let (vault, _dir) = fs_vault().await;
        let id = new_vault_id();

        assert!(matches!(vault.retrieve(&id).await, Err(VaultError::NotFound(_))));

        vault.store(&id, b"x").await.unwrap();
        vault.purge(&id).await.unwrap();
        assert!(matches!(vault.retrieve(&id).await, Err(VaultError::NotFound(_))));
        assert!(matches!(vault.purge(&id).await, Err(VaultError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fs_rejects_traversal_ids() {
        let (vault, _dir) = fs_vault().await;
        assert!(matches!(
            vault.store("../escape", b"x").await,
            Err(VaultError::InvalidId)
        ));
        assert!(matches!(
            vault.retrieve("..").await,
            Err(VaultError::InvalidId)
        ));
    }

    #[tokio::test]
    async fn test_memory_vault() {
        let vault = MemoryVault::new();
        let id = new_vault_id();

        vault.store(&id, b"a").await.unwrap();
        assert!(matches!(
            vault.store(&id, b"b").await,
            Err(VaultError::AlreadyExists(_))
        ));
        vault.replace_raw(&id, b"tampered".to_vec()).await.unwrap();
        assert_eq!(vault.retrieve(&id).await.unwrap(), b"tampered");
        assert_eq!(vault.len().await, 1);

        vault.purge(&id).await.unwrap();
        assert!(vault.is_empty().await);
    }
}
