//! Chat completion backend.
//!
//! [`CompletionBackend`] is the seam between the command dispatcher and
//! whatever model server answers conversations. The production backend
//! speaks the Ollama-style `/api/chat` protocol.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

pub use http::{build_completion_config, CompletionConfig, HttpCompletionBackend};

use crate::sessions::ConversationEntry;

/// Errors from completion requests.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("response decode error: {0}")]
    Decode(String),
}

/// Produce an assistant reply for a conversation.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        conversation: &[ConversationEntry],
    ) -> Result<String, CompletionError>;
}
