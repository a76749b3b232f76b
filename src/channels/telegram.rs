//! Outbound Telegram Bot API client.
//!
//! Implements [`MessageSender`] over `sendMessage`, `sendDocument` and the
//! two-step `getFile` / file download flow.

use async_trait::async_trait;
use reqwest::multipart;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::channels::{ChannelError, MessageSender, TelegramConfig};

const SEND_TIMEOUT_SECS: u64 = 30;

/// Bot API message sender.
pub struct TelegramSender {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl TelegramSender {
    pub fn new(config: &TelegramConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.api_base_url.clone(),
            bot_token: config.bot_token.clone(),
        }
    }

    /// Build the API endpoint URL for a method.
    fn api_url(&self, method: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/bot{}/{}", base, self.bot_token, method)
    }

    /// URL for downloading a file by the path returned from `getFile`.
    fn file_url(&self, file_path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/file/bot{}/{}", base, self.bot_token, file_path)
    }

    /// Decode the `{ok, result, description}` envelope.
    async fn parse_response(resp: reqwest::Response) -> Result<Value, ChannelError> {
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        let parsed: Value = serde_json::from_str(&body_text).unwrap_or(Value::Null);

        let ok = parsed
            .get("ok")
            .and_then(|v| v.as_bool())
            .unwrap_or(status.is_success());

        if ok {
            return Ok(parsed.get("result").cloned().unwrap_or(Value::Null));
        }

        let description = parsed
            .get("description")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                if body_text.is_empty() {
                    "request failed".to_string()
                } else {
                    body_text
                }
            });
        Err(ChannelError::Api(description))
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        Self::parse_response(resp).await?;
        debug!(target: "channels", chat_id = chat_id, "text message sent");
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        bytes: Vec<u8>,
        filename: &str,
        caption: &str,
    ) -> Result<(), ChannelError> {
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let mut form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);
        if !caption.is_empty() {
            form = form.text("caption", caption.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        Self::parse_response(resp).await?;
        debug!(target: "channels", chat_id = chat_id, filename = %filename, "document sent");
        Ok(())
    }

    async fn fetch_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        let body = json!({ "file_id": file_id });
        let resp = self
            .client
            .post(self.api_url("getFile"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        let result = Self::parse_response(resp).await?;
        let file_path = result
            .get("file_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::NotFound(file_id.to_string()))?;

        let download = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        if !download.status().is_success() {
            return Err(ChannelError::Api(format!(
                "file download failed with status {}",
                download.status()
            )));
        }

        let bytes = download
            .bytes()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
