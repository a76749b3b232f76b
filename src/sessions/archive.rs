//! Archive manager: cold storage for session snapshots.
//!
//! Archiving is a move, not a copy: the snapshot is written to blob storage
//! under `archives/<userId>/<sessionId>.json`, then the live session row is
//! deleted. The two writes are not transactional; a failed delete leaves a
//! duplicate, never a loss. The blob-existence check before writing makes
//! the retry path safe: a retry after a failed delete completes the move
//! without clobbering the archived copy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::sessions::store::{ConversationEntry, Session, SessionError, SessionStore};
use crate::sessions::now_millis;
use crate::storage::blob::{BlobError, BlobStore};

/// Archive snapshot schema version.
pub const ARCHIVE_SCHEMA_VERSION: u32 = 1;

/// Errors from archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive not found: {0}")]
    NotFound(String),
    #[error("archive index {index} out of range 1..={len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("archive write failed: {0}")]
    StorageWriteFailed(String),
    #[error("session delete failed after archive write: {0}")]
    StorageDeleteFailed(String),
    #[error("import payload is not valid JSON: {0}")]
    MalformedPayload(String),
    #[error("import payload has no conversation field")]
    MissingConversationField,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Frozen snapshot of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    pub schema_version: u32,
    pub original_owner_user_id: i64,
    pub original_session_id: String,
    pub model: String,
    pub conversation: Vec<ConversationEntry>,
    /// Unix ms.
    pub archived_at: i64,
    /// Unix ms; set only on imported archives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<i64>,
}

/// One listing entry from the archive store.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub archive_id: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// Moves sessions into blob storage and back out as exports/imports.
pub struct ArchiveManager {
    sessions: Arc<SessionStore>,
    blobs: Arc<dyn BlobStore>,
}

impl ArchiveManager {
    pub fn new(sessions: Arc<SessionStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { sessions, blobs }
    }

    fn user_prefix(user: i64) -> String {
        format!("archives/{}", user)
    }

    fn archive_key(user: i64, archive_id: &str) -> String {
        format!("archives/{}/{}.json", user, archive_id)
    }

    /// Archive the session at the given 1-based display index.
    ///
    /// Writes the snapshot blob (unless one already exists from an earlier
    /// attempt), then deletes the live session row. Returns the archive id.
    pub async fn archive(&self, user: i64, session_index: usize) -> Result<String, ArchiveError> {
        let session = self
            .sessions
            .session_by_index(user, session_index)
            .map_err(|e| match e {
                SessionError::IndexOutOfRange { index, len } => {
                    ArchiveError::IndexOutOfRange { index, len }
                }
                other => ArchiveError::Session(other),
            })?;

        let key = Self::archive_key(user, &session.session_id);

        // Existence check first: a retry after a failed hot-delete must not
        // rewrite the already-archived copy.
        let already_archived = self
            .blobs
            .exists(&key)
            .await
            .map_err(|e| ArchiveError::StorageWriteFailed(e.to_string()))?;

        if already_archived {
            warn!(
                target: "sessions",
                user = user,
                session_id = %session.session_id,
                "archive blob already present, completing pending delete"
            );
        } else {
            let snapshot = Self::snapshot(&session);
            let bytes = serde_json::to_vec_pretty(&snapshot)
                .map_err(|e| ArchiveError::StorageWriteFailed(e.to_string()))?;
            self.blobs
                .put(&key, &bytes)
                .await
                .map_err(|e| ArchiveError::StorageWriteFailed(e.to_string()))?;
        }

        self.sessions
            .remove_session(user, &session.session_id)
            .map_err(|e| ArchiveError::StorageDeleteFailed(e.to_string()))?;

        info!(
            target: "sessions",
            user = user,
            archive_id = %session.session_id,
            "session archived"
        );
        Ok(session.session_id)
    }

    /// Enumerate the user's archives in the store's listing order.
    pub async fn list_archives(&self, user: i64) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let infos = self
            .blobs
            .list(&Self::user_prefix(user))
            .await
            .map_err(|e| ArchiveError::StorageWriteFailed(e.to_string()))?;

        Ok(infos
            .into_iter()
            .map(|info| {
                let archive_id = info
                    .key
                    .rsplit('/')
                    .next()
                    .unwrap_or(&info.key)
                    .trim_end_matches(".json")
                    .to_string();
                ArchiveEntry {
                    archive_id,
                    size_bytes: info.size_bytes,
                    last_modified: info.last_modified,
                }
            })
            .collect())
    }

    /// Fetch and decode one archive snapshot.
    pub async fn retrieve(&self, user: i64, archive_id: &str) -> Result<Archive, ArchiveError> {
        let bytes = self.raw_archive(user, archive_id).await?;
        serde_json::from_slice(&bytes).map_err(|e| ArchiveError::MalformedPayload(e.to_string()))
    }

    /// The archive blob verbatim, by 1-based listing index, for download
    /// hand-off. Returns the suggested filename and the bytes.
    pub async fn export(
        &self,
        user: i64,
        archive_index: usize,
    ) -> Result<(String, Vec<u8>), ArchiveError> {
        let archives = self.list_archives(user).await?;
        if archive_index == 0 || archive_index > archives.len() {
            return Err(ArchiveError::IndexOutOfRange {
                index: archive_index,
                len: archives.len(),
            });
        }

        let archive_id = &archives[archive_index - 1].archive_id;
        let bytes = self.raw_archive(user, archive_id).await?;
        Ok((format!("{}.json", archive_id), bytes))
    }

    /// Import an exported archive payload under a new identity.
    ///
    /// The payload must parse as JSON and carry a `conversation` field. The
    /// new archive never reuses the source session id; provenance fields
    /// are preserved and `imported_at` is stamped. Imported data goes
    /// straight to archival storage, never through the hot registry.
    pub async fn import(&self, user: i64, payload: &[u8]) -> Result<String, ArchiveError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| ArchiveError::MalformedPayload(e.to_string()))?;

        let conversation_value = value
            .get("conversation")
            .cloned()
            .ok_or(ArchiveError::MissingConversationField)?;
        let conversation: Vec<ConversationEntry> = serde_json::from_value(conversation_value)
            .map_err(|e| ArchiveError::MalformedPayload(e.to_string()))?;

        // Provenance: prefer the snapshot's own fields, falling back to the
        // live-session field names for payloads exported by older tooling.
        let original_session_id = value
            .get("original_session_id")
            .or_else(|| value.get("session_id"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let original_owner_user_id = value
            .get("original_owner_user_id")
            .or_else(|| value.get("owner_user_id"))
            .and_then(|v| v.as_i64())
            .unwrap_or(user);
        let model = value
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let archive_id = Uuid::new_v4().to_string();
        let archive = Archive {
            schema_version: ARCHIVE_SCHEMA_VERSION,
            original_owner_user_id,
            original_session_id,
            model,
            conversation,
            archived_at: value
                .get("archived_at")
                .and_then(|v| v.as_i64())
                .unwrap_or_else(now_millis),
            imported_at: Some(now_millis()),
        };

        let bytes = serde_json::to_vec_pretty(&archive)
            .map_err(|e| ArchiveError::StorageWriteFailed(e.to_string()))?;
        self.blobs
            .put(&Self::archive_key(user, &archive_id), &bytes)
            .await
            .map_err(|e| ArchiveError::StorageWriteFailed(e.to_string()))?;

        info!(
            target: "sessions",
            user = user,
            archive_id = %archive_id,
            original_session_id = %archive.original_session_id,
            "archive imported"
        );
        Ok(archive_id)
    }

    fn snapshot(session: &Session) -> Archive {
        Archive {
            schema_version: ARCHIVE_SCHEMA_VERSION,
            original_owner_user_id: session.owner_user_id,
            original_session_id: session.session_id.clone(),
            model: session.model.clone(),
            conversation: session.conversation.clone(),
            archived_at: now_millis(),
            imported_at: None,
        }
    }

    async fn raw_archive(&self, user: i64, archive_id: &str) -> Result<Vec<u8>, ArchiveError> {
        match self.blobs.get(&Self::archive_key(user, archive_id)).await {
            Ok(bytes) => Ok(bytes),
            Err(BlobError::NotFound(_)) => Err(ArchiveError::NotFound(archive_id.to_string())),
            Err(e) => Err(ArchiveError::StorageWriteFailed(e.to_string())),
        }
    }
}
