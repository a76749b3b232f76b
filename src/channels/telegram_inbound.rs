//! Telegram inbound update parsing.
//!
//! Wire structs mirror the Bot API update shape; [`classify`] reduces a raw
//! update to the small [`UpdateKind`] vocabulary the dispatcher understands.
//! Updates with no recognizable content are still carried (as
//! [`UpdateKind::Unrecognized`]) so the poller can acknowledge their ids.

use serde::Deserialize;

/// Raw Telegram update payload.
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

/// Raw Telegram message payload.
#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub document: Option<TelegramDocument>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
}

/// Attached document metadata.
#[derive(Debug, Deserialize)]
pub struct TelegramDocument {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Chat metadata.
#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// User metadata.
#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
}

/// A classified inbound update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    pub kind: UpdateKind,
}

/// The content of an update, reduced to what the dispatcher handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    TextMessage {
        chat_id: i64,
        user_id: i64,
        text: String,
    },
    DocumentMessage {
        chat_id: i64,
        user_id: i64,
        file_id: String,
        file_name: Option<String>,
        caption: Option<String>,
    },
    /// No message, or a message with neither text nor document. Still
    /// acknowledged by the poller.
    Unrecognized,
}

/// Classify a raw update.
///
/// The owning user id falls back to the chat id when `from` is absent
/// (direct chats carry the same id in both).
pub fn classify(update: TelegramUpdate) -> Update {
    let update_id = update.update_id;

    let Some(message) = update.message else {
        return Update {
            update_id,
            kind: UpdateKind::Unrecognized,
        };
    };

    let chat_id = message.chat.id;
    let user_id = message.from.as_ref().map(|u| u.id).unwrap_or(chat_id);

    if let Some(document) = message.document {
        return Update {
            update_id,
            kind: UpdateKind::DocumentMessage {
                chat_id,
                user_id,
                file_id: document.file_id,
                file_name: document.file_name,
                caption: message.caption,
            },
        };
    }

    if let Some(text) = message.text.filter(|t| !t.is_empty()) {
        return Update {
            update_id,
            kind: UpdateKind::TextMessage {
                chat_id,
                user_id,
                text,
            },
        };
    }

    Update {
        update_id,
        kind: UpdateKind::Unrecognized,
    }
}
