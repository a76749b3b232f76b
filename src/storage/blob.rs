//! Key-addressed blob storage for archived sessions.
//!
//! The [`BlobStore`] trait is the seam an object store would plug into;
//! the production implementation is a filesystem store rooted at the state
//! directory, using the same `archives/<userId>/<sessionId>.json` key space
//! an object store would.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Errors from blob store operations.
#[derive(Error, Debug, Clone)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Metadata for one stored blob.
#[derive(Debug, Clone)]
pub struct BlobInfo {
    /// Full key, e.g. `archives/42/abc.json`.
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// Key-addressed put/get/list/delete with prefix enumeration.
///
/// `delete` of an absent key succeeds (double-delete tolerance).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;
    async fn exists(&self, key: &str) -> Result<bool, BlobError>;
    async fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>, BlobError>;
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Filesystem-backed blob store. Keys map to relative paths under the root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `<state_dir>` (keys carry their own
    /// `archives/` prefix).
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Resolve a key to a path, rejecting traversal components.
    fn key_path(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        let valid = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !valid {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), BlobError> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Io(e.to_string()))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|e| BlobError::Io(e.to_string()))?;

        debug!(target: "sessions", key = %key, size = bytes.len(), "blob written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.key_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(BlobError::Io(e.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let path = self.key_path(key)?;
        Ok(path.exists())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobInfo>, BlobError> {
        let dir = self.key_path(prefix.trim_end_matches('/'))?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| BlobError::Io(e.to_string()))?;
        let mut infos = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobError::Io(e.to_string()))?
        {
            let meta = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let name = entry.file_name().to_string_lossy().to_string();
            let last_modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            infos.push(BlobInfo {
                key: format!("{}/{}", prefix.trim_end_matches('/'), name),
                size_bytes: meta.len(),
                last_modified,
            });
        }

        // Listing order from the filesystem is arbitrary; sort by key so
        // callers see a stable order.
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(target: "sessions", key = %key, "blob deleted");
                Ok(())
            }
            // Absent key: already deleted, treat as success.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::Io(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_store() -> (FsBlobStore, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let store = FsBlobStore::new(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _dir) = create_test_store();

        store.put("archives/42/s1.json", b"{\"a\":1}").await.unwrap();
        let bytes = store.get("archives/42/s1.json").await.unwrap();
        assert_eq!(bytes, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (store, _dir) = create_test_store();

        let result = store.get("archives/42/missing.json").await;
        assert!(matches!(result, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_exists() {
        let (store, _dir) = create_test_store();

        assert!(!store.exists("archives/42/s1.json").await.unwrap());
        store.put("archives/42/s1.json", b"x").await.unwrap();
        assert!(store.exists("archives/42/s1.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let (store, _dir) = create_test_store();

        store.put("archives/42/a.json", b"aaaa").await.unwrap();
        store.put("archives/42/b.json", b"bb").await.unwrap();
        store.put("archives/7/c.json", b"c").await.unwrap();

        let infos = store.list("archives/42").await.unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].key, "archives/42/a.json");
        assert_eq!(infos[0].size_bytes, 4);
        assert_eq!(infos[1].key, "archives/42/b.json");
        assert_eq!(infos[1].size_bytes, 2);
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let (store, _dir) = create_test_store();
        let infos = store.list("archives/999").await.unwrap();
        assert!(infos.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _dir) = create_test_store();

        store.put("archives/42/s1.json", b"x").await.unwrap();
        store.delete("archives/42/s1.json").await.unwrap();
        assert!(!store.exists("archives/42/s1.json").await.unwrap());

        // Second delete of an absent key succeeds.
        store.delete("archives/42/s1.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let (store, _dir) = create_test_store();

        assert!(matches!(
            store.get("../outside.json").await,
            Err(BlobError::InvalidKey(_))
        ));
        assert!(matches!(
            store.put("", b"x").await,
            Err(BlobError::InvalidKey(_))
        ));
    }
}
