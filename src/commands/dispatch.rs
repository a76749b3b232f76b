//! Command dispatcher: maps classified updates to session, archive and
//! completion operations.
//!
//! Dispatch never returns an error. Every failure becomes an in-band
//! outcome: the user gets a reply describing what went wrong, the failure
//! is logged, and the poll cycle keeps going.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channels::{MessageSender, Update, UpdateKind};
use crate::commands::{parse_command, Command};
use crate::completion::CompletionBackend;
use crate::poller::UpdateHandler;
use crate::sessions::{ArchiveError, ArchiveManager, MessageRole, SessionError, SessionStore};

/// Reply used when the completion backend fails. The user entry stays in
/// the conversation; this reply is not recorded as an assistant entry.
pub const FALLBACK_REPLY: &str =
    "Sorry, I couldn't reach the model right now. Please try again in a moment.";

const HELP_TEXT: &str = "Available commands:\n\
    /new [model] - start a new session\n\
    /sessions - list your sessions\n\
    /switch <n> - switch to session n\n\
    /archive <n> - archive session n\n\
    /archives - list your archives\n\
    /export <n> - download archive n as a file\n\
    /import - send a .json file with this caption to import it\n\
    Anything else is sent to the active session's model.";

/// Outcome tag for one handled update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A command reply (help, list, confirmation, usage hint) was sent.
    Replied,
    /// Plain text went through the completion backend.
    Chatted,
    /// Completion failed; the fixed fallback reply was sent.
    ChatFallback,
    Archived,
    Exported,
    Imported,
    /// An operation failed and the failure was reported to the user.
    ErrorReplied,
    /// Update carried nothing actionable.
    Ignored,
}

/// Fans classified updates out to the session registry, archive manager
/// and completion backend.
pub struct Dispatcher {
    sessions: Arc<SessionStore>,
    archives: Arc<ArchiveManager>,
    sender: Arc<dyn MessageSender>,
    completion: Arc<dyn CompletionBackend>,
    default_model: String,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<SessionStore>,
        archives: Arc<ArchiveManager>,
        sender: Arc<dyn MessageSender>,
        completion: Arc<dyn CompletionBackend>,
        default_model: String,
    ) -> Self {
        Self {
            sessions,
            archives,
            sender,
            completion,
            default_model,
        }
    }

    /// Handle one classified update. Infallible by contract.
    pub async fn dispatch(&self, update: &Update) -> DispatchOutcome {
        match &update.kind {
            UpdateKind::TextMessage {
                chat_id,
                user_id,
                text,
            } => match parse_command(text) {
                Some(command) => self.handle_command(*chat_id, *user_id, command).await,
                None => self.handle_chat(*chat_id, *user_id, text).await,
            },
            UpdateKind::DocumentMessage {
                chat_id,
                user_id,
                file_id,
                file_name,
                caption,
            } => {
                let wants_import = caption
                    .as_deref()
                    .and_then(parse_command)
                    .map(|c| c == Command::Import)
                    .unwrap_or(false);
                if wants_import {
                    self.handle_import(*chat_id, *user_id, file_id, file_name.as_deref())
                        .await
                } else {
                    self.reply(
                        *chat_id,
                        "I only understand documents captioned /import.",
                        DispatchOutcome::Replied,
                    )
                    .await
                }
            }
            UpdateKind::Unrecognized => {
                debug!(target: "channels", update_id = update.update_id, "unrecognized update ignored");
                DispatchOutcome::Ignored
            }
        }
    }

    async fn handle_command(&self, chat_id: i64, user_id: i64, command: Command) -> DispatchOutcome {
        match command {
            Command::Start | Command::Help => {
                self.reply(chat_id, HELP_TEXT, DispatchOutcome::Replied).await
            }
            Command::New { model } => self.handle_new(chat_id, user_id, model).await,
            Command::Sessions => self.handle_sessions(chat_id, user_id).await,
            Command::Switch { arg } => self.handle_switch(chat_id, user_id, arg).await,
            Command::Archive { arg } => self.handle_archive(chat_id, user_id, arg).await,
            Command::Archives => self.handle_archives(chat_id, user_id).await,
            Command::Export { arg } => self.handle_export(chat_id, user_id, arg).await,
            Command::Import => {
                self.reply(
                    chat_id,
                    "Send the exported .json file as a document with the caption /import.",
                    DispatchOutcome::Replied,
                )
                .await
            }
            Command::Unknown { token } => {
                let text = format!("Unknown command {}. Send /help for the command list.", token);
                self.reply(chat_id, &text, DispatchOutcome::Replied).await
            }
        }
    }

    async fn handle_chat(&self, chat_id: i64, user_id: i64, text: &str) -> DispatchOutcome {
        let session = match self.sessions.active_session(user_id, &self.default_model) {
            Ok(s) => s,
            Err(e) => return self.report_error(chat_id, "load session", &e.to_string()).await,
        };

        let session = match self
            .sessions
            .append_message(user_id, &session.session_id, MessageRole::User, text)
        {
            Ok(s) => s,
            Err(e) => return self.report_error(chat_id, "record message", &e.to_string()).await,
        };

        match self
            .completion
            .complete(&session.model, &session.conversation)
            .await
        {
            Ok(assistant_text) => {
                if let Err(e) = self.sessions.append_message(
                    user_id,
                    &session.session_id,
                    MessageRole::Assistant,
                    &assistant_text,
                ) {
                    warn!(target: "sessions", error = %e, "failed to record assistant reply");
                }
                self.reply(chat_id, &assistant_text, DispatchOutcome::Chatted).await
            }
            Err(e) => {
                warn!(
                    target: "channels",
                    user_id = user_id,
                    model = %session.model,
                    error = %e,
                    "completion failed, sending fallback reply"
                );
                self.reply(chat_id, FALLBACK_REPLY, DispatchOutcome::ChatFallback)
                    .await
            }
        }
    }

    async fn handle_new(
        &self,
        chat_id: i64,
        user_id: i64,
        model: Option<String>,
    ) -> DispatchOutcome {
        let model = model.unwrap_or_else(|| self.default_model.clone());
        match self.sessions.create_session(user_id, &model) {
            Ok(session) => {
                let text = format!("Started a new session with model {}.", session.model);
                self.reply(chat_id, &text, DispatchOutcome::Replied).await
            }
            Err(e) => self.report_error(chat_id, "create session", &e.to_string()).await,
        }
    }

    async fn handle_sessions(&self, chat_id: i64, user_id: i64) -> DispatchOutcome {
        let sessions = match self.sessions.list_sessions(user_id) {
            Ok(s) => s,
            Err(e) => return self.report_error(chat_id, "list sessions", &e.to_string()).await,
        };

        if sessions.is_empty() {
            return self
                .reply(
                    chat_id,
                    "No sessions yet. Send /new or just start chatting.",
                    DispatchOutcome::Replied,
                )
                .await;
        }

        let mut lines = Vec::with_capacity(sessions.len() + 1);
        lines.push("Your sessions:".to_string());
        for (pos, session) in sessions.iter().enumerate() {
            let marker = if session.is_active { " [active]" } else { "" };
            lines.push(format!(
                "{}. {} ({} messages){}",
                pos + 1,
                session.model,
                session.conversation.len(),
                marker
            ));
        }
        self.reply(chat_id, &lines.join("\n"), DispatchOutcome::Replied)
            .await
    }

    async fn handle_switch(
        &self,
        chat_id: i64,
        user_id: i64,
        arg: Option<String>,
    ) -> DispatchOutcome {
        let Some(index) = arg.as_deref().and_then(|a| a.parse::<usize>().ok()) else {
            return self
                .reply(chat_id, "Usage: /switch <number>", DispatchOutcome::Replied)
                .await;
        };

        match self.sessions.switch_active(user_id, index) {
            Ok(session) => {
                let text = format!("Switched to session {} ({}).", index, session.model);
                self.reply(chat_id, &text, DispatchOutcome::Replied).await
            }
            Err(SessionError::IndexOutOfRange { index, len }) => {
                let text = out_of_range_text("session", index, len);
                self.reply(chat_id, &text, DispatchOutcome::Replied).await
            }
            Err(e) => self.report_error(chat_id, "switch session", &e.to_string()).await,
        }
    }

    async fn handle_archive(
        &self,
        chat_id: i64,
        user_id: i64,
        arg: Option<String>,
    ) -> DispatchOutcome {
        let Some(index) = arg.as_deref().and_then(|a| a.parse::<usize>().ok()) else {
            return self
                .reply(chat_id, "Usage: /archive <number>", DispatchOutcome::Replied)
                .await;
        };

        match self.archives.archive(user_id, index).await {
            Ok(archive_id) => {
                info!(target: "sessions", user_id = user_id, archive_id = %archive_id, "session archived");
                let text = format!("Session archived as {}.", archive_id);
                self.reply(chat_id, &text, DispatchOutcome::Archived).await
            }
            Err(ArchiveError::IndexOutOfRange { index, len }) => {
                let text = out_of_range_text("session", index, len);
                self.reply(chat_id, &text, DispatchOutcome::Replied).await
            }
            Err(e) => self.report_error(chat_id, "archive session", &e.to_string()).await,
        }
    }

    async fn handle_archives(&self, chat_id: i64, user_id: i64) -> DispatchOutcome {
        let archives = match self.archives.list_archives(user_id).await {
            Ok(a) => a,
            Err(e) => return self.report_error(chat_id, "list archives", &e.to_string()).await,
        };

        if archives.is_empty() {
            return self
                .reply(chat_id, "No archives yet.", DispatchOutcome::Replied)
                .await;
        }

        let mut lines = Vec::with_capacity(archives.len() + 1);
        lines.push("Your archives:".to_string());
        for (pos, entry) in archives.iter().enumerate() {
            lines.push(format!(
                "{}. {} ({} bytes, {})",
                pos + 1,
                entry.archive_id,
                entry.size_bytes,
                entry.last_modified.to_rfc3339()
            ));
        }
        self.reply(chat_id, &lines.join("\n"), DispatchOutcome::Replied)
            .await
    }

    async fn handle_export(
        &self,
        chat_id: i64,
        user_id: i64,
        arg: Option<String>,
    ) -> DispatchOutcome {
        let Some(index) = arg.as_deref().and_then(|a| a.parse::<usize>().ok()) else {
            return self
                .reply(chat_id, "Usage: /export <number>", DispatchOutcome::Replied)
                .await;
        };

        match self.archives.export(user_id, index).await {
            Ok((filename, bytes)) => {
                match self
                    .sender
                    .send_document(chat_id, bytes, &filename, "Archived session export")
                    .await
                {
                    Ok(()) => DispatchOutcome::Exported,
                    Err(e) => {
                        warn!(target: "channels", chat_id = chat_id, error = %e, "export delivery failed");
                        DispatchOutcome::ErrorReplied
                    }
                }
            }
            Err(ArchiveError::IndexOutOfRange { index, len }) => {
                let text = out_of_range_text("archive", index, len);
                self.reply(chat_id, &text, DispatchOutcome::Replied).await
            }
            Err(e) => self.report_error(chat_id, "export archive", &e.to_string()).await,
        }
    }

    async fn handle_import(
        &self,
        chat_id: i64,
        user_id: i64,
        file_id: &str,
        file_name: Option<&str>,
    ) -> DispatchOutcome {
        let payload = match self.sender.fetch_file(file_id).await {
            Ok(bytes) => bytes,
            Err(e) => return self.report_error(chat_id, "download file", &e.to_string()).await,
        };

        match self.archives.import(user_id, &payload).await {
            Ok(archive_id) => {
                info!(
                    target: "sessions",
                    user_id = user_id,
                    archive_id = %archive_id,
                    file_name = file_name.unwrap_or("<unnamed>"),
                    "archive imported"
                );
                let text = format!("Imported as archive {}.", archive_id);
                self.reply(chat_id, &text, DispatchOutcome::Imported).await
            }
            Err(ArchiveError::MalformedPayload(e)) => {
                let text = format!("That file is not a valid archive export: {}", e);
                self.reply(chat_id, &text, DispatchOutcome::Replied).await
            }
            Err(ArchiveError::MissingConversationField) => {
                self.reply(
                    chat_id,
                    "That file is not a valid archive export: missing conversation.",
                    DispatchOutcome::Replied,
                )
                .await
            }
            Err(e) => self.report_error(chat_id, "import archive", &e.to_string()).await,
        }
    }

    /// Send a reply, degrading to a logged warning when outbound delivery
    /// fails (outbound sends are best-effort).
    async fn reply(&self, chat_id: i64, text: &str, outcome: DispatchOutcome) -> DispatchOutcome {
        if let Err(e) = self.sender.send_text(chat_id, text).await {
            warn!(target: "channels", chat_id = chat_id, error = %e, "reply delivery failed");
        }
        outcome
    }

    async fn report_error(&self, chat_id: i64, action: &str, error: &str) -> DispatchOutcome {
        warn!(target: "channels", action = action, error = error, "dispatch operation failed");
        let text = format!("Could not {}: {}", action, error);
        self.reply(chat_id, &text, DispatchOutcome::ErrorReplied).await
    }
}

fn out_of_range_text(noun: &str, index: usize, len: usize) -> String {
    if len == 0 {
        format!("No {}s to pick from.", noun)
    } else {
        format!("No {} {}: valid range is 1..={}.", noun, index, len)
    }
}

#[async_trait]
impl UpdateHandler for Dispatcher {
    async fn handle(&self, update: &Update) -> DispatchOutcome {
        self.dispatch(update).await
    }
}
