//! HTTP completion backend speaking the Ollama `/api/chat` protocol.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::completion::{CompletionBackend, CompletionError};
use crate::sessions::ConversationEntry;

pub const DEFAULT_COMPLETION_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_COMPLETION_MODEL: &str = "llama3";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Completion settings decoded from the `completion` config section.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_COMPLETION_ENDPOINT.to_string(),
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Build a `CompletionConfig` from the loaded JSON configuration.
pub fn build_completion_config(cfg: &Value) -> CompletionConfig {
    let completion = cfg.get("completion").and_then(|v| v.as_object());

    let endpoint = completion
        .and_then(|c| c.get("endpoint"))
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_COMPLETION_ENDPOINT)
        .to_string();

    let model = completion
        .and_then(|c| c.get("model"))
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_COMPLETION_MODEL)
        .to_string();

    let timeout_secs = completion
        .and_then(|c| c.get("timeoutSecs"))
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    CompletionConfig {
        endpoint,
        model,
        timeout_secs,
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Backend posting the whole conversation to `{endpoint}/api/chat`.
pub struct HttpCompletionBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCompletionBackend {
    pub fn new(config: &CompletionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.endpoint)
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(
        &self,
        model: &str,
        conversation: &[ConversationEntry],
    ) -> Result<String, CompletionError> {
        let messages: Vec<Value> = conversation
            .iter()
            .map(|entry| {
                json!({
                    "role": entry.role.to_string(),
                    "content": entry.content,
                })
            })
            .collect();

        let body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });

        let resp = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Api(format!(
                "completion failed with status {status}: {body_text}"
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::Decode(e.to_string()))?;

        debug!(
            target: "channels",
            model = %model,
            turns = conversation.len(),
            "completion received"
        );
        Ok(parsed.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::ConversationEntry;

    #[test]
    fn test_build_completion_config_defaults() {
        let config = build_completion_config(&json!({}));
        assert_eq!(config.endpoint, DEFAULT_COMPLETION_ENDPOINT);
        assert_eq!(config.model, DEFAULT_COMPLETION_MODEL);
        assert_eq!(config.timeout_secs, 120);
    }

    #[test]
    fn test_build_completion_config_from_json() {
        let config = build_completion_config(&json!({
            "completion": {
                "endpoint": "http://models.internal:9000/",
                "model": "mistral",
                "timeoutSecs": 30
            }
        }));
        assert_eq!(config.endpoint, "http://models.internal:9000/");
        assert_eq!(config.model, "mistral");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_chat_url_trims_trailing_slash() {
        let backend = HttpCompletionBackend::new(&CompletionConfig {
            endpoint: "http://localhost:11434/".to_string(),
            ..Default::default()
        });
        assert_eq!(backend.chat_url(), "http://localhost:11434/api/chat");
    }

    #[tokio::test]
    async fn test_complete_connection_failure() {
        // TEST-NET address: connection fails.
        let backend = HttpCompletionBackend::new(&CompletionConfig {
            endpoint: "http://192.0.2.1:1".to_string(),
            timeout_secs: 2,
            ..Default::default()
        });
        let conversation = vec![ConversationEntry::user("hi")];
        let result = backend.complete("llama3", &conversation).await;
        assert!(matches!(result, Err(CompletionError::Transport(_))));
    }
}
