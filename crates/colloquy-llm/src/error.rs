//! Error types and the transient/fatal retry classifier.

use thiserror::Error;

/// Errors from the LLM gateway and its transport.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The requested model is not in the allow-list.
    #[error("unknown model '{name}'")]
    InvalidModel { name: String, allowed: Vec<String> },

    /// The conversation history violates the upstream precondition.
    #[error("invalid history state: {0}")]
    InvalidHistory(String),

    /// The upstream API answered with an error.
    #[error("upstream error (status {status:?}): {message}")]
    Upstream { status: Option<u16>, message: String },

    /// The request never produced an upstream answer (connect, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream answer could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Retry classification of an error.
///
/// Produced by structured inspection (variant + HTTP status), never by
/// matching on vendor error text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff.
    Transient,
    /// Retrying cannot help; propagate immediately.
    Fatal,
}

impl LlmError {
    /// Classify this error against the configured retryable status set.
    pub fn classify(&self, retryable_statuses: &[u16]) -> ErrorClass {
        match self {
            LlmError::Upstream {
                status: Some(status),
                ..
            } if retryable_statuses.contains(status) => ErrorClass::Transient,
            LlmError::Transport(_) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }
}
