//! Long-poll update source over `getUpdates`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::channels::telegram_inbound::{classify, TelegramUpdate};
use crate::channels::{SourceError, TelegramConfig, Update, UpdateSource};

/// Extra client-side allowance beyond the server-side long-poll timeout.
const TIMEOUT_SLACK_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Vec<TelegramUpdate>,
    #[serde(default)]
    description: Option<String>,
}

/// Fetches pending updates from the Bot API with long polling.
pub struct TelegramUpdateSource {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
    limit: u32,
    timeout_secs: u64,
}

impl TelegramUpdateSource {
    pub fn new(config: &TelegramConfig) -> Self {
        // The HTTP timeout must outlast the server-side long-poll window.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                config.poll_timeout_secs + TIMEOUT_SLACK_SECS,
            ))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.api_base_url.clone(),
            bot_token: config.bot_token.clone(),
            limit: config.poll_limit,
            timeout_secs: config.poll_timeout_secs,
        }
    }

    fn api_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/bot{}/getUpdates", base, self.bot_token)
    }

    /// Request body for the given cursor. A cursor of zero (or below) omits
    /// `offset` entirely so the server returns everything still pending.
    fn request_body(&self, offset: i64) -> serde_json::Value {
        let mut body = json!({
            "limit": self.limit,
            "timeout": self.timeout_secs,
        });
        if offset > 0 {
            body["offset"] = json!(offset);
        }
        body
    }
}

#[async_trait]
impl UpdateSource for TelegramUpdateSource {
    async fn fetch_updates(&self, offset: i64) -> Result<Vec<Update>, SourceError> {
        let resp = self
            .client
            .post(self.api_url())
            .json(&self.request_body(offset))
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let parsed: GetUpdatesResponse = serde_json::from_str(&body_text)
            .map_err(|e| SourceError::Decode(format!("status {status}: {e}")))?;

        if !parsed.ok {
            return Err(SourceError::Api(
                parsed
                    .description
                    .unwrap_or_else(|| format!("getUpdates failed with status {status}")),
            ));
        }

        let updates: Vec<Update> = parsed.result.into_iter().map(classify).collect();
        debug!(target: "poller", offset = offset, count = updates.len(), "updates fetched");
        Ok(updates)
    }
}
