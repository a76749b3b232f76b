//! Session registry and archive manager.
//!
//! A session is a named conversation thread owned by one user; at most one
//! session per user is active at any observable time. The conversation log
//! is stored inline with the session row. Archival moves a whole session
//! into blob storage and deletes the live row.

pub mod archive;
pub mod store;

pub use archive::{Archive, ArchiveEntry, ArchiveError, ArchiveManager, ARCHIVE_SCHEMA_VERSION};
pub use store::{ConversationEntry, MessageRole, Session, SessionError, SessionStore};

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
