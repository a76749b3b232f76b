//! Command parsing for inbound text.
//!
//! A message is a command when it starts with `/`. Everything else is plain
//! conversation text handled by the chat flow.

pub mod dispatch;

pub use dispatch::{DispatchOutcome, Dispatcher};

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    New { model: Option<String> },
    Sessions,
    Switch { arg: Option<String> },
    Archive { arg: Option<String> },
    Archives,
    Export { arg: Option<String> },
    Import,
    Unknown { token: String },
}

/// Parse a slash command from message text. Returns `None` for plain text.
pub fn parse_command(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.split_whitespace();
    let token = parts.next().unwrap_or(trimmed);
    let arg = parts.next().map(|s| s.to_string());

    let command = match token {
        "/start" => Command::Start,
        "/help" => Command::Help,
        "/new" => Command::New { model: arg },
        "/sessions" => Command::Sessions,
        "/switch" => Command::Switch { arg },
        "/archive" => Command::Archive { arg },
        "/archives" => Command::Archives,
        "/export" => Command::Export { arg },
        "/import" => Command::Import,
        other => Command::Unknown {
            token: other.to_string(),
        },
    };
    Some(command)
}
