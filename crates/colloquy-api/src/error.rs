//! API error types and JSON error response formatting.
//!
//! `ApiError` maps internal failures onto the standard error envelope:
//! `{success: false, error: CODE, message, errorType?, retryAfter?,
//! chatId?}`. Internal detail is logged server-side and never sent to the
//! caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use colloquy_chat::ChatError;
use colloquy_llm::LlmError;

/// Seconds a caller should wait before retrying after an upstream outage.
const RETRY_AFTER_SECS: u64 = 30;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    /// Machine-readable error code (e.g. "BAD_REQUEST").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(rename = "errorType", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(rename = "chatId", skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<Uuid>,
}

/// API error type that maps to HTTP status codes and JSON envelopes.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - empty content, invalid pagination parameter, malformed body.
    BadRequest(String),
    /// 401 - missing or invalid credential.
    Unauthorized(String),
    /// 404 - chat absent, expired, or not owned.
    NotFound(String),
    /// 400 - model name outside the allow-list.
    InvalidModel { name: String, allowed: Vec<String> },
    /// 503 - the LLM stayed unavailable after retries. Carries the chat id
    /// when the chat record already exists so the client keeps its context.
    LlmUnavailable { chat_id: Option<Uuid> },
    /// 500 - unexpected failure; detail goes to the log only.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new("BAD_REQUEST", message),
            ),
            ApiError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody::new("UNAUTHORIZED", message),
            ),
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, ErrorBody::new("NOT_FOUND", message))
            }
            ApiError::InvalidModel { name, allowed } => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new(
                    "INVALID_MODEL",
                    format!(
                        "unknown model '{}'; allowed models: {}",
                        name,
                        allowed.join(", ")
                    ),
                ),
            ),
            ApiError::LlmUnavailable { chat_id } => {
                let mut body = ErrorBody::new(
                    "LLM_UNAVAILABLE",
                    "The language model is temporarily unavailable. Please retry shortly."
                        .to_string(),
                );
                body.error_type = Some("LLM_UNAVAILABLE".to_string());
                body.retry_after = Some(RETRY_AFTER_SECS);
                body.chat_id = chat_id;
                (StatusCode::SERVICE_UNAVAILABLE, body)
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("INTERNAL_ERROR", "An internal error occurred".to_string()),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl ErrorBody {
    fn new(code: &str, message: String) -> Self {
        Self {
            success: false,
            error: code.to_string(),
            message,
            error_type: None,
            retry_after: None,
            chat_id: None,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyMessage => {
                ApiError::BadRequest("message cannot be empty".to_string())
            }
            ChatError::ChatNotFound(id) => ApiError::NotFound(format!("chat not found: {}", id)),
            ChatError::Llm(LlmError::InvalidModel { name, allowed }) => {
                ApiError::InvalidModel { name, allowed }
            }
            ChatError::Llm(other) => match other {
                LlmError::InvalidHistory(detail) => ApiError::Internal(detail),
                _ => ApiError::LlmUnavailable { chat_id: None },
            },
            ChatError::Generation { chat_id, .. } => ApiError::LlmUnavailable {
                chat_id: Some(chat_id),
            },
            ChatError::Storage(detail) => ApiError::Internal(detail),
        }
    }
}
