//! Error types for the chat pipeline.

use thiserror::Error;
use uuid::Uuid;

use colloquy_core::error::ColloquyError;
use colloquy_llm::LlmError;

/// Errors from the orchestrator and registry.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,

    /// The chat is absent, expired, or owned by someone else. The three
    /// cases are deliberately indistinguishable to the caller.
    #[error("chat not found: {0}")]
    ChatNotFound(Uuid),

    /// An LLM failure before any persistence happened (e.g. an invalid
    /// model override).
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Generation failed after the user message was already persisted.
    /// Carries the chat id so the caller can retry without losing context.
    #[error("generation failed for chat {chat_id}: {source}")]
    Generation {
        chat_id: Uuid,
        #[source]
        source: LlmError,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<ColloquyError> for ChatError {
    fn from(err: ColloquyError) -> Self {
        ChatError::Storage(err.to_string())
    }
}
