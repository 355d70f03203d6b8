//! Durable store: per-instance key/value persistence for coordinator state.
//!
//! Every coordinator owns one instance id (see [`instance_id`]) and reads and
//! writes opaque blobs under fixed slot names inside that instance. Two
//! implementations:
//! - [`FileStore`]: one directory per instance, atomic tmp-file + rename writes
//! - [`MemoryStore`]: process-local map, used in tests

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Slot holding the serialized `GroupState`.
pub const GROUP_SLOT: &str = "group";

/// Stable instance id for a group id. The same group always lands on the
/// same storage partition, across restarts.
pub fn instance_id(group_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, group_id.as_bytes())
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt blob in {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Read-your-writes blob storage partitioned by instance.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, instance: Uuid, slot: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Must not return until the blob would survive a restart.
    async fn put(&self, instance: Uuid, slot: &str, blob: &[u8]) -> Result<(), StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// FileStore
// ============================================================================

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_path(&self, instance: Uuid, slot: &str) -> PathBuf {
        self.root
            .join(instance.to_string())
            .join(format!("{}.json", slot))
    }

    /// Create the root directory and verify it is writable.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let key = self.root.display().to_string();
        let io = |source| StoreError::Io {
            key: key.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.root).await.map_err(io)?;
        let marker = self.root.join(".write-check");
        tokio::fs::write(&marker, b"ok").await.map_err(io)?;
        tokio::fs::remove_file(&marker).await.map_err(io)?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, instance: Uuid, slot: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.slot_path(instance, slot);
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: path.display().to_string(),
                source,
            }),
        }
    }

    async fn put(&self, instance: Uuid, slot: &str, blob: &[u8]) -> Result<(), StoreError> {
        let path = self.slot_path(instance, slot);
        let key = path.display().to_string();
        let io = |source| StoreError::Io {
            key: key.clone(),
            source,
        };

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(io)?;
        }

        // Write beside the target, fsync, then rename over it.
        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io)?;
        file.write_all(blob).await.map_err(io)?;
        file.sync_all().await.map_err(io)?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await.map_err(io)?;
        tracing::debug!(instance = %instance, slot, bytes = blob.len(), "Slot written");
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<(Uuid, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots written so far.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, instance: Uuid, slot: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slots.get(&(instance, slot.to_string())).cloned())
    }

    async fn put(&self, instance: Uuid, slot: &str, blob: &[u8]) -> Result<(), StoreError> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.insert((instance, slot.to_string()), blob.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
