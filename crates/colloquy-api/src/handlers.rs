//! Route handler functions for all API endpoints.
//!
//! Each handler extracts parameters via axum extractors, drives the
//! orchestrator, and wraps the result in the standard success envelope
//! `{success: true, data}`. Streaming sends answer with an SSE channel
//! framed as `data: <JSON>` events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Extension, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use colloquy_chat::{Audience, StreamEvent};

use crate::auth::AuthedUser;
use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Envelopes and request types
// =============================================================================

/// Standard success envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub title: Option<String>,
    /// Optional initial message; triggers the full generation cycle
    /// synchronously.
    pub message: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameChatRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct MigrateRequest {
    pub chat_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct GetChatParams {
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchModelRequest {
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub ephemeral_chats: usize,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
    pub current: String,
}

// =============================================================================
// Helpers
// =============================================================================

/// Parse the `limit` query parameter: absent uses the default window,
/// `0`/`all` means unlimited, anything else must be a number.
fn parse_limit(raw: Option<&str>) -> Result<Option<u64>, ApiError> {
    match raw {
        None => Ok(None),
        Some("all") => Ok(Some(0)),
        Some(s) => s.parse::<u64>().map(Some).map_err(|_| {
            ApiError::BadRequest(format!("invalid limit parameter: '{}'", s))
        }),
    }
}

/// Extract the delegated tool credential from `X-Tool-Authorization`.
fn delegated_credential(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-tool-authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).to_string())
        .filter(|value| !value.is_empty())
}

/// Wrap a stream of events as an SSE response.
///
/// Caching and proxy buffering are disabled so fragments flush to the
/// client immediately.
fn sse_response(events: ReceiverStream<StreamEvent>) -> impl IntoResponse {
    let stream = events.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| {
            r#"{"type":"error","error":"event serialization failed"}"#.to_string()
        });
        Ok::<Event, Infallible>(Event::default().data(data))
    });

    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    )
}

// =============================================================================
// Authenticated chat endpoints
// =============================================================================

/// POST /chats
pub async fn create_chat(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    headers: HeaderMap,
    Json(body): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let credential = delegated_credential(&headers);
    let created = state
        .orchestrator
        .create_chat(
            &user,
            body.title,
            body.message.as_deref(),
            body.model.as_deref(),
            credential.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, ok(created)))
}

/// GET /chats
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
) -> Result<impl IntoResponse, ApiError> {
    let chats = state.orchestrator.list_chats(&user)?;
    Ok(ok(chats))
}

/// GET /chats/{id}
pub async fn get_chat(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Path(chat_id): Path<Uuid>,
    Query(params): Query<GetChatParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = parse_limit(params.limit.as_deref())?;
    let chat = state.orchestrator.get_chat(&user, chat_id, limit)?;
    Ok(ok(chat))
}

/// PUT /chats/{id}
pub async fn rename_chat(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<RenameChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title cannot be empty".to_string()));
    }
    state.orchestrator.rename_chat(&user, chat_id, &body.title)?;
    Ok(ok(serde_json::json!({ "id": chat_id, "title": body.title })))
}

/// DELETE /chats/{id}
pub async fn delete_chat(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Path(chat_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.delete_chat(&user, chat_id)?;
    Ok(ok(serde_json::json!({ "id": chat_id, "deleted": true })))
}

/// POST /chats/{id}/messages - blocks until the full response exists.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Path(chat_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let credential = delegated_credential(&headers);
    let message = state
        .orchestrator
        .send_message(
            &Audience::Owner(user),
            chat_id,
            &body.content,
            body.model.as_deref(),
            credential.as_deref(),
        )
        .await?;
    Ok(ok(serde_json::json!({ "message": message })))
}

/// POST /chats/{id}/messages/stream - SSE send.
pub async fn stream_message(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let events = std::sync::Arc::clone(&state.orchestrator)
        .stream_message(
            Audience::Owner(user),
            chat_id,
            &body.content,
            body.model.as_deref(),
        )
        .await?;
    Ok(sse_response(events))
}

/// POST /chats/migrate - bulk-adopt ephemeral chats.
pub async fn migrate_chats(
    State(state): State<AppState>,
    Extension(AuthedUser(user)): Extension<AuthedUser>,
    Json(body): Json<MigrateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let adopted = state.orchestrator.migrate(&user, &body.chat_ids)?;
    Ok(ok(serde_json::json!({ "migrated": adopted })))
}

/// GET /models
pub async fn models(
    State(state): State<AppState>,
    Extension(AuthedUser(_user)): Extension<AuthedUser>,
) -> Result<impl IntoResponse, ApiError> {
    let gateway = state.orchestrator.gateway();
    Ok(ok(ModelsResponse {
        models: gateway.allowed_models().to_vec(),
        current: gateway.current_model(),
    }))
}

/// PUT /models - switch the process-wide default model.
///
/// Per-request overrides on the send endpoints do not touch this; the
/// switch only applies to requests that carry no override.
pub async fn switch_model(
    State(state): State<AppState>,
    Extension(AuthedUser(_user)): Extension<AuthedUser>,
    Json(body): Json<SwitchModelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let gateway = state.orchestrator.gateway();
    gateway.switch_model(&body.model).map_err(|e| match e {
        colloquy_llm::LlmError::InvalidModel { name, allowed } => {
            ApiError::InvalidModel { name, allowed }
        }
        other => ApiError::Internal(other.to_string()),
    })?;
    Ok(ok(ModelsResponse {
        models: gateway.allowed_models().to_vec(),
        current: gateway.current_model(),
    }))
}

// =============================================================================
// Anonymous endpoints
// =============================================================================

/// POST /anonymous/chats
pub async fn create_anonymous_chat(
    State(state): State<AppState>,
    Json(body): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .orchestrator
        .create_anonymous_chat(body.title, body.message.as_deref(), body.model.as_deref())
        .await?;
    Ok((StatusCode::CREATED, ok(created)))
}

/// POST /anonymous/chats/{id}/messages
pub async fn send_anonymous_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .orchestrator
        .send_message(
            &Audience::Anonymous,
            chat_id,
            &body.content,
            body.model.as_deref(),
            None,
        )
        .await?;
    Ok(ok(serde_json::json!({ "message": message })))
}

/// POST /anonymous/chats/{id}/messages/stream
pub async fn stream_anonymous_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let events = std::sync::Arc::clone(&state.orchestrator)
        .stream_message(
            Audience::Anonymous,
            chat_id,
            &body.content,
            body.model.as_deref(),
        )
        .await?;
    Ok(sse_response(events))
}

// =============================================================================
// Health
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(ok(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        ephemeral_chats: state.registry.len(),
    }))
}
