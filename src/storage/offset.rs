//! Offset store: the single durable bookmark of polling progress.
//!
//! One JSON row under the state directory holds the "next update id to
//! request" cursor plus a version counter for conditional writes. Reads
//! degrade to the zero cursor on any failure so a missing or corrupt row
//! means "process from the start", never a failed poll cycle.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed sentinel partition key for the single offset row.
pub const OFFSET_PARTITION_KEY: &str = "POLLER#OFFSET";
/// Sort key naming the tracked attribute.
pub const OFFSET_SORT_KEY: &str = "last_update_id";

/// Errors from offset store writes. Reads never fail (they degrade to the
/// zero cursor).
#[derive(Debug, Clone, Error)]
pub enum OffsetStoreError {
    #[error("cursor version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
    #[error("IO error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for OffsetStoreError {
    fn from(err: std::io::Error) -> Self {
        OffsetStoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OffsetStoreError {
    fn from(err: serde_json::Error) -> Self {
        OffsetStoreError::Serialization(err.to_string())
    }
}

/// The loaded cursor: next update id to request, plus the row version the
/// caller must present on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub value: i64,
    pub version: u64,
}

impl Cursor {
    /// Cursor for a store that has never acknowledged an update.
    pub fn zero() -> Self {
        Cursor {
            value: 0,
            version: 0,
        }
    }

    /// True when no cursor has ever been committed (first-run mode).
    pub fn is_unset(&self) -> bool {
        self.value == 0
    }
}

/// Persisted row shape.
#[derive(Debug, Serialize, Deserialize)]
struct OffsetRow {
    partition_key: String,
    sort_key: String,
    value: i64,
    version: u64,
}

/// Single-row cursor store with atomic writes and compare-and-swap commits.
#[derive(Debug)]
pub struct OffsetStore {
    path: PathBuf,
    /// Serializes in-process read-modify-write sequences. Cross-process
    /// coordination relies on the version check alone.
    write_lock: Mutex<()>,
}

impl OffsetStore {
    /// Create a store rooted at the state directory. The row lives at
    /// `<state_dir>/offset/cursor.json`.
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            path: state_dir.join("offset").join("cursor.json"),
            write_lock: Mutex::new(()),
        }
    }

    /// Load the persisted cursor.
    ///
    /// An absent or unreadable row yields the zero cursor; the failure is
    /// logged but never surfaced, since reprocessing from the start is safe.
    pub fn load(&self) -> Cursor {
        if !self.path.exists() {
            return Cursor::zero();
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    target: "poller",
                    path = %self.path.display(),
                    error = %e,
                    "failed to read cursor row, degrading to zero cursor"
                );
                return Cursor::zero();
            }
        };

        match serde_json::from_str::<OffsetRow>(&content) {
            Ok(row) => Cursor {
                value: row.value,
                version: row.version,
            },
            Err(e) => {
                warn!(
                    target: "poller",
                    path = %self.path.display(),
                    error = %e,
                    "cursor row is corrupt, degrading to zero cursor"
                );
                Cursor::zero()
            }
        }
    }

    /// Conditionally commit a new cursor value.
    ///
    /// The stored version must equal `expected_version`; the row is written
    /// with `version + 1`. A commit that would move the cursor backwards is
    /// a no-op returning the current cursor (the cursor never decreases).
    pub fn commit(&self, next: i64, expected_version: u64) -> Result<Cursor, OffsetStoreError> {
        let _guard = self.write_lock.lock();

        let current = self.load();
        if current.version != expected_version {
            return Err(OffsetStoreError::VersionConflict {
                expected: expected_version,
                found: current.version,
            });
        }

        if next < current.value {
            warn!(
                target: "poller",
                next = next,
                current = current.value,
                "refusing to move cursor backwards"
            );
            return Ok(current);
        }

        let row = OffsetRow {
            partition_key: OFFSET_PARTITION_KEY.to_string(),
            sort_key: OFFSET_SORT_KEY.to_string(),
            value: next,
            version: current.version + 1,
        };
        self.write_row(&row)?;

        debug!(target: "poller", cursor = next, version = row.version, "cursor committed");

        Ok(Cursor {
            value: row.value,
            version: row.version,
        })
    }

    /// Write the row atomically via temp file + rename.
    fn write_row(&self, row: &OffsetRow) -> Result<(), OffsetStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(row)?)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (OffsetStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = OffsetStore::new(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    #[test]
    fn test_load_absent_returns_zero() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.load(), Cursor::zero());
        assert!(store.load().is_unset());
    }

    #[test]
    fn test_commit_and_load() {
        let (store, _dir) = create_test_store();

        let cursor = store.commit(8, 0).unwrap();
        assert_eq!(cursor.value, 8);
        assert_eq!(cursor.version, 1);

        let loaded = store.load();
        assert_eq!(loaded.value, 8);
        assert_eq!(loaded.version, 1);
        assert!(!loaded.is_unset());
    }

    #[test]
    fn test_commit_version_conflict() {
        let (store, _dir) = create_test_store();

        store.commit(8, 0).unwrap();

        // Stale version: a concurrent writer already advanced the row.
        let result = store.commit(12, 0);
        assert!(matches!(
            result,
            Err(OffsetStoreError::VersionConflict {
                expected: 0,
                found: 1
            })
        ));

        // The stored cursor is untouched.
        assert_eq!(store.load().value, 8);
    }

    #[test]
    fn test_commit_never_moves_backwards() {
        let (store, _dir) = create_test_store();

        let cursor = store.commit(20, 0).unwrap();
        let after = store.commit(5, cursor.version).unwrap();

        assert_eq!(after.value, 20, "cursor must not decrease");
        assert_eq!(store.load().value, 20);
    }

    #[test]
    fn test_cursor_monotonic_across_commits() {
        let (store, _dir) = create_test_store();

        let mut cursor = store.load();
        for next in [3_i64, 7, 7, 11, 11] {
            let committed = store.commit(next, cursor.version).unwrap();
            assert!(committed.value >= cursor.value);
            cursor = committed;
        }
        assert_eq!(store.load().value, 11);
    }

    #[test]
    fn test_load_corrupt_row_degrades_to_zero() {
        let (store, dir) = create_test_store();

        let path = dir.path().join("offset").join("cursor.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(store.load(), Cursor::zero());
    }

    #[test]
    fn test_row_shape_on_disk() {
        let (store, dir) = create_test_store();
        store.commit(42, 0).unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("offset").join("cursor.json")).unwrap();
        let row: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert_eq!(row["partition_key"], OFFSET_PARTITION_KEY);
        assert_eq!(row["sort_key"], OFFSET_SORT_KEY);
        assert_eq!(row["value"], 42);
        assert_eq!(row["version"], 1);
    }
}
