//! Message platform boundary.
//!
//! [`MessageSender`] covers outbound traffic (replies, document delivery,
//! file retrieval); [`UpdateSource`] covers the inbound `getUpdates` pull.
//! Both are object-safe seams so the dispatcher and poller can be exercised
//! against in-memory fakes.

pub mod telegram;
pub mod telegram_inbound;
pub mod telegram_source;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use telegram::TelegramSender;
pub use telegram_inbound::{Update, UpdateKind};
pub use telegram_source::TelegramUpdateSource;

pub const TELEGRAM_DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";
const DEFAULT_POLL_LIMIT: u32 = 100;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

/// Errors from outbound channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Network-level failure: timeout, connect, TLS.
    #[error("transport error: {0}")]
    Transport(String),
    /// The platform accepted the request but reported a failure.
    #[error("API error: {0}")]
    Api(String),
    #[error("file not found: {0}")]
    NotFound(String),
}

/// Errors from the inbound update fetch.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("response decode error: {0}")]
    Decode(String),
}

/// Outbound message sender (consumed interface).
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChannelError>;

    async fn send_document(
        &self,
        chat_id: i64,
        bytes: Vec<u8>,
        filename: &str,
        caption: &str,
    ) -> Result<(), ChannelError>;

    async fn fetch_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError>;
}

/// Update source adapter: fetch the batch of pending updates starting at
/// the given cursor. An empty batch is a normal result, not an error.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn fetch_updates(&self, offset: i64) -> Result<Vec<Update>, SourceError>;
}

/// Telegram connection settings decoded from the `telegram` config section.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_base_url: String,
    pub poll_limit: u32,
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: TELEGRAM_DEFAULT_API_BASE_URL.to_string(),
            poll_limit: DEFAULT_POLL_LIMIT,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
        }
    }
}

/// Build a `TelegramConfig` from the loaded JSON configuration.
/// `TELSON_BOT_TOKEN` overrides the configured token.
pub fn build_telegram_config(cfg: &Value) -> TelegramConfig {
    let telegram = cfg.get("telegram").and_then(|v| v.as_object());

    let bot_token = std::env::var("TELSON_BOT_TOKEN").ok().unwrap_or_else(|| {
        telegram
            .and_then(|t| t.get("botToken"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    });

    let api_base_url = telegram
        .and_then(|t| t.get("apiBaseUrl"))
        .and_then(|v| v.as_str())
        .unwrap_or(TELEGRAM_DEFAULT_API_BASE_URL)
        .to_string();

    let poll_limit = telegram
        .and_then(|t| t.get("pollLimit"))
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_POLL_LIMIT);

    let poll_timeout_secs = telegram
        .and_then(|t| t.get("pollTimeoutSecs"))
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_POLL_TIMEOUT_SECS);

    TelegramConfig {
        bot_token,
        api_base_url,
        poll_limit,
        poll_timeout_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_telegram_config_defaults() {
        let cfg = serde_json::json!({});
        let config = build_telegram_config(&cfg);

        assert_eq!(config.api_base_url, TELEGRAM_DEFAULT_API_BASE_URL);
        assert_eq!(config.poll_limit, 100);
        assert_eq!(config.poll_timeout_secs, 30);
    }

    #[test]
    fn test_build_telegram_config_from_json() {
        let cfg = serde_json::json!({
            "telegram": {
                "botToken": "123:abc",
                "apiBaseUrl": "http://localhost:8081",
                "pollLimit": 25,
                "pollTimeoutSecs": 5
            }
        });
        let config = build_telegram_config(&cfg);

        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.api_base_url, "http://localhost:8081");
        assert_eq!(config.poll_limit, 25);
        assert_eq!(config.poll_timeout_secs, 5);
    }
}
