//! Session store implementation
//!
//! File-based storage for sessions with inline conversation logs. Each
//! session is one JSON row under `sessions/<owner_user_id>/`, carrying the
//! logical sort key `MODEL#<model>#SESSION#<sessionId>` and a version
//! counter for conditional writes. Storing the conversation inline bounds
//! its size by the backend's per-item limit; that ceiling is accepted.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

use crate::sessions::now_millis;

/// Error types for session registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session index {index} out of range 1..={len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("session version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
    #[error("IO error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

/// Role of a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry in a session's conversation log.
///
/// Append-only: insertion order is chronological order, and entries are
/// never mutated or removed except by archival of the whole session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: MessageRole,
    pub content: String,
    pub at: i64,
}

impl ConversationEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            at: now_millis(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            at: now_millis(),
        }
    }
}

/// A chat session owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Numeric owner identity extracted from the message sender.
    pub owner_user_id: i64,
    /// Opaque unique token (UUID v4).
    pub session_id: String,
    /// Logical sort key, `MODEL#<model>#SESSION#<sessionId>`.
    pub sort_key: String,
    /// Completion model serving this session.
    pub model: String,
    /// At most one session per user has this set.
    pub is_active: bool,
    /// Unix ms.
    pub created_at: i64,
    /// Unix ms; equals `created_at` until the first append.
    pub last_message_at: i64,
    /// Inline conversation log.
    #[serde(default)]
    pub conversation: Vec<ConversationEntry>,
    /// Backs the conditional-write discipline.
    #[serde(default)]
    pub version: u64,
}

impl Session {
    /// Create a fresh active session with an empty conversation.
    pub fn new(owner_user_id: i64, model: impl Into<String>) -> Self {
        let now = now_millis();
        let model = model.into();
        let session_id = Uuid::new_v4().to_string();
        Self {
            owner_user_id,
            sort_key: sort_key(&model, &session_id),
            session_id,
            model,
            is_active: true,
            created_at: now,
            last_message_at: now,
            conversation: Vec::new(),
            version: 0,
        }
    }
}

/// Build the logical sort key for a session row.
fn sort_key(model: &str, session_id: &str) -> String {
    format!("MODEL#{}#SESSION#{}", model, session_id)
}

/// Thread-safe session registry with file-based persistence.
///
/// Creation-plus-deactivation is a single logical unit under the write
/// lock; concurrent processes racing on the same user resolve last-writer-
/// wins, which is the documented weak-consistency trade-off.
#[derive(Debug)]
pub struct SessionStore {
    base_path: PathBuf,
    /// Guards read-modify-write sequences within this process.
    lock: RwLock<()>,
}

impl SessionStore {
    /// Create a store rooted at the state directory; rows live under
    /// `<state_dir>/sessions/<owner_user_id>/`.
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            base_path: state_dir.join("sessions"),
            lock: RwLock::new(()),
        }
    }

    fn user_dir(&self, user: i64) -> PathBuf {
        self.base_path.join(user.to_string())
    }

    fn session_path(&self, user: i64, session_id: &str) -> PathBuf {
        self.user_dir(user).join(format!("{}.json", session_id))
    }

    /// The user's active session, or a freshly created one (configured
    /// default model, active, empty conversation) when none exists.
    pub fn active_session(&self, user: i64, default_model: &str) -> Result<Session, SessionError> {
        let _guard = self.lock.write();

        let sessions = self.load_user_sessions(user)?;
        if let Some(active) = sessions.iter().find(|s| s.is_active) {
            return Ok(active.clone());
        }

        self.insert_active_locked(user, default_model, sessions)
    }

    /// Explicit creation: deactivates every other session of the user, then
    /// inserts the new one as active.
    pub fn create_session(&self, user: i64, model: &str) -> Result<Session, SessionError> {
        let _guard = self.lock.write();
        let sessions = self.load_user_sessions(user)?;
        self.insert_active_locked(user, model, sessions)
    }

    /// All sessions for a user in stable creation order (displayed 1-based).
    pub fn list_sessions(&self, user: i64) -> Result<Vec<Session>, SessionError> {
        let _guard = self.lock.read();
        self.load_user_sessions(user)
    }

    /// Resolve a session by its 1-based display index.
    pub fn session_by_index(&self, user: i64, index: usize) -> Result<Session, SessionError> {
        let _guard = self.lock.read();
        let sessions = self.load_user_sessions(user)?;
        Self::pick_by_index(&sessions, index).cloned()
    }

    /// Activate the chosen session and deactivate its siblings.
    ///
    /// Fails typed when `index` is outside `[1, len]`, leaving the active
    /// session unchanged.
    pub fn switch_active(&self, user: i64, index: usize) -> Result<Session, SessionError> {
        let _guard = self.lock.write();

        let mut sessions = self.load_user_sessions(user)?;
        // Validate before mutating anything.
        Self::pick_by_index(&sessions, index)?;

        let mut chosen = None;
        for (pos, session) in sessions.iter_mut().enumerate() {
            let want_active = pos + 1 == index;
            if session.is_active != want_active {
                session.is_active = want_active;
                self.write_session_checked(session)?;
            }
            if want_active {
                chosen = Some(session.clone());
            }
        }

        // pick_by_index above guarantees the index is in range.
        chosen.ok_or(SessionError::IndexOutOfRange {
            index,
            len: sessions.len(),
        })
    }

    /// Append a conversation entry and persist the whole session record.
    pub fn append_message(
        &self,
        user: i64,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Session, SessionError> {
        let _guard = self.lock.write();

        let mut session = self.load_session(user, session_id)?;
        let entry = ConversationEntry {
            role,
            content: content.to_string(),
            at: now_millis(),
        };
        session.last_message_at = entry.at;
        session.conversation.push(entry);
        self.write_session_checked(&mut session)?;
        Ok(session)
    }

    /// Delete a session row. Deleting an absent row is a no-op success.
    pub fn remove_session(&self, user: i64, session_id: &str) -> Result<(), SessionError> {
        let _guard = self.lock.write();

        let path = self.session_path(user, session_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Total number of persisted sessions across all users.
    pub fn count_sessions(&self) -> usize {
        let _guard = self.lock.read();
        let Ok(users) = fs::read_dir(&self.base_path) else {
            return 0;
        };
        users
            .flatten()
            .filter_map(|u| fs::read_dir(u.path()).ok())
            .flat_map(|dir| dir.flatten())
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
            .count()
    }

    fn pick_by_index(sessions: &[Session], index: usize) -> Result<&Session, SessionError> {
        if index == 0 || index > sessions.len() {
            return Err(SessionError::IndexOutOfRange {
                index,
                len: sessions.len(),
            });
        }
        Ok(&sessions[index - 1])
    }

    /// Deactivate all existing sessions, then insert a new active one.
    /// Caller holds the write lock.
    fn insert_active_locked(
        &self,
        user: i64,
        model: &str,
        mut sessions: Vec<Session>,
    ) -> Result<Session, SessionError> {
        for session in sessions.iter_mut().filter(|s| s.is_active) {
            session.is_active = false;
            self.write_session_checked(session)?;
        }

        let mut session = Session::new(user, model);
        self.write_session_checked(&mut session)?;

        tracing::info!(
            target: "sessions",
            user = user,
            session_id = %session.session_id,
            model = %session.model,
            "session created"
        );
        Ok(session)
    }

    fn load_session(&self, user: i64, session_id: &str) -> Result<Session, SessionError> {
        let path = self.session_path(user, session_id);
        if !path.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load every session row for a user, sorted into stable creation order.
    fn load_user_sessions(&self, user: i64) -> Result<Vec<Session>, SessionError> {
        let dir = self.user_dir(user);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<Session>(&content) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::warn!(
                        target: "sessions",
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable session row"
                    );
                }
            }
        }

        // Creation order; session_id breaks ties from equal timestamps.
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    /// Conditional write: the on-disk version must match the session's
    /// current version; the row is persisted with `version + 1` atomically
    /// (temp file + rename). Bumps the session's version on success.
    fn write_session_checked(&self, session: &mut Session) -> Result<(), SessionError> {
        let path = self.session_path(session.owner_user_id, &session.session_id);

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            if let Ok(stored) = serde_json::from_str::<Session>(&content) {
                if stored.version != session.version {
                    return Err(SessionError::VersionConflict {
                        expected: session.version,
                        found: stored.version,
                    });
                }
            }
        }

        session.version += 1;

        fs::create_dir_all(self.user_dir(session.owner_user_id))?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(session)?)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const USER: i64 = 12_345_678;

    fn create_test_store() -> (SessionStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    fn active_count(store: &SessionStore, user: i64) -> usize {
        store
            .list_sessions(user)
            .unwrap()
            .iter()
            .filter(|s| s.is_active)
            .count()
    }

    #[test]
    fn test_active_session_auto_creates() {
        let (store, _dir) = create_test_store();

        let session = store.active_session(USER, "llama3").unwrap();
        assert_eq!(session.owner_user_id, USER);
        assert_eq!(session.model, "llama3");
        assert!(session.is_active);
        assert!(session.conversation.is_empty());
        assert!(session.created_at > 0);

        // A second call returns the same session, not a new one.
        let again = store.active_session(USER, "llama3").unwrap();
        assert_eq!(again.session_id, session.session_id);
        assert_eq!(store.list_sessions(USER).unwrap().len(), 1);
    }

    #[test]
    fn test_create_session_deactivates_siblings() {
        let (store, _dir) = create_test_store();

        let first = store.create_session(USER, "llama3").unwrap();
        let second = store.create_session(USER, "mistral").unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(active_count(&store, USER), 1);

        let sessions = store.list_sessions(USER).unwrap();
        let active = sessions.iter().find(|s| s.is_active).unwrap();
        assert_eq!(active.session_id, second.session_id);
    }

    #[test]
    fn test_single_active_invariant_across_operations() {
        let (store, _dir) = create_test_store();

        store.create_session(USER, "llama3").unwrap();
        assert_eq!(active_count(&store, USER), 1);
        store.create_session(USER, "llama3").unwrap();
        assert_eq!(active_count(&store, USER), 1);
        store.switch_active(USER, 1).unwrap();
        assert_eq!(active_count(&store, USER), 1);
        store.create_session(USER, "mistral").unwrap();
        assert_eq!(active_count(&store, USER), 1);
        store.switch_active(USER, 2).unwrap();
        assert_eq!(active_count(&store, USER), 1);
    }

    #[test]
    fn test_list_sessions_stable_creation_order() {
        let (store, _dir) = create_test_store();

        let a = store.create_session(USER, "llama3").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = store.create_session(USER, "llama3").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let c = store.create_session(USER, "mistral").unwrap();

        let listed: Vec<String> = store
            .list_sessions(USER)
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(listed, vec![a.session_id, b.session_id, c.session_id]);
    }

    #[test]
    fn test_switch_active() {
        let (store, _dir) = create_test_store();

        let first = store.create_session(USER, "llama3").unwrap();
        store.create_session(USER, "llama3").unwrap();

        let switched = store.switch_active(USER, 1).unwrap();
        assert_eq!(switched.session_id, first.session_id);
        assert!(switched.is_active);
        assert_eq!(active_count(&store, USER), 1);
    }

    #[test]
    fn test_switch_out_of_range_is_typed_and_leaves_active_unchanged() {
        let (store, _dir) = create_test_store();

        store.create_session(USER, "llama3").unwrap();
        let active_before = store.create_session(USER, "llama3").unwrap();

        for bad_index in [0, 3] {
            let result = store.switch_active(USER, bad_index);
            assert!(matches!(
                result,
                Err(SessionError::IndexOutOfRange { len: 2, .. })
            ));
        }

        let sessions = store.list_sessions(USER).unwrap();
        let active = sessions.iter().find(|s| s.is_active).unwrap();
        assert_eq!(active.session_id, active_before.session_id);
    }

    #[test]
    fn test_append_message_updates_log_and_timestamps() {
        let (store, _dir) = create_test_store();

        let session = store.create_session(USER, "llama3").unwrap();
        let after_user = store
            .append_message(USER, &session.session_id, MessageRole::User, "Hello!")
            .unwrap();
        let after_assistant = store
            .append_message(
                USER,
                &session.session_id,
                MessageRole::Assistant,
                "Hi there!",
            )
            .unwrap();

        assert_eq!(after_assistant.conversation.len(), 2);
        assert_eq!(after_assistant.conversation[0].role, MessageRole::User);
        assert_eq!(after_assistant.conversation[0].content, "Hello!");
        assert_eq!(after_assistant.conversation[1].role, MessageRole::Assistant);
        assert!(after_assistant.last_message_at >= after_user.last_message_at);
        assert!(after_assistant.version > session.version);
    }

    #[test]
    fn test_append_to_missing_session_is_not_found() {
        let (store, _dir) = create_test_store();

        let result = store.append_message(USER, "no-such-id", MessageRole::User, "x");
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[test]
    fn test_remove_session_is_idempotent() {
        let (store, _dir) = create_test_store();

        let session = store.create_session(USER, "llama3").unwrap();
        store.remove_session(USER, &session.session_id).unwrap();
        assert!(store.list_sessions(USER).unwrap().is_empty());

        // Double-delete is a no-op, not an error.
        store.remove_session(USER, &session.session_id).unwrap();
    }

    #[test]
    fn test_rows_survive_store_restart() {
        let temp_dir = TempDir::new().unwrap();
        let session = {
            let store = SessionStore::new(temp_dir.path().to_path_buf());
            let s = store.create_session(USER, "llama3").unwrap();
            store
                .append_message(USER, &s.session_id, MessageRole::User, "persisted?")
                .unwrap()
        };

        let reopened = SessionStore::new(temp_dir.path().to_path_buf());
        let sessions = reopened.list_sessions(USER).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, session.session_id);
        assert_eq!(sessions[0].conversation.len(), 1);
        assert!(sessions[0].is_active);
    }

    #[test]
    fn test_sort_key_shape() {
        let (store, _dir) = create_test_store();
        let session = store.create_session(USER, "llama3").unwrap();
        assert_eq!(
            session.sort_key,
            format!("MODEL#llama3#SESSION#{}", session.session_id)
        );
    }

    #[test]
    fn test_users_are_isolated() {
        let (store, _dir) = create_test_store();

        store.create_session(USER, "llama3").unwrap();
        store.create_session(999, "llama3").unwrap();

        assert_eq!(store.list_sessions(USER).unwrap().len(), 1);
        assert_eq!(store.list_sessions(999).unwrap().len(), 1);
        assert_eq!(store.count_sessions(), 2);

        // Creating for one user never touches the other's active flag.
        store.create_session(999, "mistral").unwrap();
        assert!(store.list_sessions(USER).unwrap()[0].is_active);
    }
}
