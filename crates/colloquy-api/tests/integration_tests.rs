//! Integration tests for the Colloquy API.
//!
//! Covers every endpoint: happy paths, error paths, authentication, and
//! the SSE framing contract. Each test builds an independent in-memory
//! state with a scripted mock LLM.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use colloquy_api::{create_router, AppState};
use colloquy_chat::{ChatOrchestrator, EphemeralRegistry};
use colloquy_core::config::ColloquyConfig;
use colloquy_llm::{LlmClient, LlmError, LlmGateway, MockLlm};
use colloquy_store::Database;

// =============================================================================
// Helpers
// =============================================================================

const TEST_TOKEN: &str = "test-token-12345";

/// Create a fresh AppState around the given mock LLM.
fn make_state_with(mock: Arc<MockLlm>) -> AppState {
    let mut config = ColloquyConfig::default();
    config.llm.backoff_base_ms = 1;
    config.llm.backoff_cap_ms = 2;

    let db = Arc::new(Database::in_memory().unwrap());
    let registry = Arc::new(EphemeralRegistry::new(Duration::from_secs(3600)));
    let gateway = Arc::new(LlmGateway::new(
        mock as Arc<dyn LlmClient>,
        config.llm.clone(),
    ));
    let orchestrator = Arc::new(ChatOrchestrator::new(
        db,
        Arc::clone(&registry),
        gateway,
        None,
    ));

    let mut state = AppState::new(config, orchestrator, registry);
    state.api_token = TEST_TOKEN.to_string();
    state
}

/// State whose LLM always answers "4".
fn make_state() -> AppState {
    make_state_with(Arc::new(MockLlm::replying("4")))
}

fn make_app() -> axum::Router {
    create_router(make_state())
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("authorization", format!("Bearer {}", TEST_TOKEN))
        .body(Body::empty())
        .unwrap()
}

fn authed_post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {}", TEST_TOKEN))
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn authed_put_json(uri: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("authorization", format!("Bearer {}", TEST_TOKEN))
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn authed_delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("authorization", format!("Bearer {}", TEST_TOKEN))
        .body(Body::empty())
        .unwrap()
}

fn anon_post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Parse an SSE body into the JSON payloads of its `data:` events.
async fn sse_events(resp: axum::response::Response) -> Vec<Value> {
    let bytes = axum::body::to_bytes(resp.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    let text = String::from_utf8_lossy(&bytes);

    let mut events = Vec::new();
    for block in text.split("\n\n") {
        for line in block.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if let Ok(value) = serde_json::from_str::<Value>(data) {
                    events.push(value);
                }
            }
        }
    }
    events
}

/// Create a chat through the API and return its id.
async fn create_chat_for(state: &AppState) -> Uuid {
    let app = create_router(state.clone());
    let resp = app
        .oneshot(authed_post_json("/chats", r#"{"title":"test chat"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    json["data"]["chat"]["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap()
}

// =============================================================================
// Public endpoints
// =============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let app = make_app();
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "healthy");
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_protected_endpoint_requires_auth() {
    let app = make_app();
    let resp = app
        .oneshot(Request::get("/chats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(resp).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_protected_endpoint_rejects_bad_token() {
    let app = make_app();
    let resp = app
        .oneshot(
            Request::get("/chats")
                .header("authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stream_endpoint_requires_auth() {
    let app = make_app();
    let resp = app
        .oneshot(anon_post_json(
            &format!("/chats/{}/messages/stream", Uuid::new_v4()),
            r#"{"content":"hi"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Chat CRUD
// =============================================================================

#[tokio::test]
async fn test_create_chat_without_message() {
    let app = make_app();
    let resp = app
        .oneshot(authed_post_json("/chats", r#"{"title":"empty start"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["chat"]["title"], "empty start");
    assert_eq!(json["data"]["messages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_create_chat_with_initial_message_generates() {
    let app = make_app();
    let resp = app
        .oneshot(authed_post_json("/chats", r#"{"message":"2+2?"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let json = body_json(resp).await;
    let messages = json["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "2+2?");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "4");
    // Title auto-derived from the first message.
    assert_eq!(json["data"]["chat"]["title"], "2+2?");
}

#[tokio::test]
async fn test_create_chat_empty_message_is_bad_request() {
    let app = make_app();
    let resp = app
        .oneshot(authed_post_json("/chats", r#"{"message":"   "}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let json = body_json(resp).await;
    assert_eq!(json["error"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_create_chat_invalid_model_rejected() {
    let state = make_state();
    let app = create_router(state.clone());
    let resp = app
        .oneshot(authed_post_json(
            "/chats",
            r#"{"message":"hi","model":"not-a-model"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let json = body_json(resp).await;
    assert_eq!(json["error"], "INVALID_MODEL");
    assert!(json["message"].as_str().unwrap().contains("gemini-2.0-flash"));

    // No partially-created chat is left behind.
    let app = create_router(state);
    let resp = app.oneshot(authed_get("/chats")).await.unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_list_chats() {
    let state = make_state();
    create_chat_for(&state).await;
    create_chat_for(&state).await;

    let app = create_router(state);
    let resp = app.oneshot(authed_get("/chats")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_get_chat_not_found() {
    let app = make_app();
    let resp = app
        .oneshot(authed_get(&format!("/chats/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let json = body_json(resp).await;
    assert_eq!(json["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_get_chat_invalid_limit_param() {
    let state = make_state();
    let chat_id = create_chat_for(&state).await;

    let app = create_router(state);
    let resp = app
        .oneshot(authed_get(&format!("/chats/{}?limit=abc", chat_id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_chat_limit_all() {
    let state = make_state();
    let chat_id = create_chat_for(&state).await;

    let app = create_router(state);
    let resp = app
        .oneshot(authed_get(&format!("/chats/{}?limit=all", chat_id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rename_chat() {
    let state = make_state();
    let chat_id = create_chat_for(&state).await;

    let app = create_router(state.clone());
    let resp = app
        .oneshot(authed_put_json(
            &format!("/chats/{}", chat_id),
            r#"{"title":"renamed"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let app = create_router(state);
    let resp = app
        .oneshot(authed_get(&format!("/chats/{}", chat_id)))
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["data"]["chat"]["title"], "renamed");
}

#[tokio::test]
async fn test_delete_chat() {
    let state = make_state();
    let chat_id = create_chat_for(&state).await;

    let app = create_router(state.clone());
    let resp = app
        .oneshot(authed_delete(&format!("/chats/{}", chat_id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let app = create_router(state);
    let resp = app
        .oneshot(authed_get(&format!("/chats/{}", chat_id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// REST send
// =============================================================================

#[tokio::test]
async fn test_send_message_returns_assistant_reply() {
    let state = make_state();
    let chat_id = create_chat_for(&state).await;

    let app = create_router(state);
    let resp = app
        .oneshot(authed_post_json(
            &format!("/chats/{}/messages", chat_id),
            r#"{"content":"2+2?"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["message"]["role"], "assistant");
    assert_eq!(json["data"]["message"]["content"], "4");
}

#[tokio::test]
async fn test_send_empty_message_no_side_effects() {
    let state = make_state();
    let chat_id = create_chat_for(&state).await;

    let app = create_router(state.clone());
    let resp = app
        .oneshot(authed_post_json(
            &format!("/chats/{}/messages", chat_id),
            r#"{"content":"   "}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let app = create_router(state);
    let resp = app
        .oneshot(authed_get(&format!("/chats/{}", chat_id)))
        .await
        .unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["data"]["messages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_send_to_unknown_chat_is_not_found() {
    let app = make_app();
    let resp = app
        .oneshot(authed_post_json(
            &format!("/chats/{}/messages", Uuid::new_v4()),
            r#"{"content":"hi"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_llm_outage_returns_503_with_chat_id() {
    // A mock with no scripted replies and no default fails every call.
    let state = make_state_with(Arc::new(MockLlm::new()));
    let chat_id = {
        let app = create_router(state.clone());
        let resp = app
            .oneshot(authed_post_json("/chats", r#"{"title":"t"}"#))
            .await
            .unwrap();
        let json = body_json(resp).await;
        json["data"]["chat"]["id"]
            .as_str()
            .unwrap()
            .parse::<Uuid>()
            .unwrap()
    };

    let app = create_router(state.clone());
    let resp = app
        .oneshot(authed_post_json(
            &format!("/chats/{}/messages", chat_id),
            r#"{"content":"hello"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(resp).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["errorType"], "LLM_UNAVAILABLE");
    assert_eq!(json["chatId"], chat_id.to_string());
    assert!(json["retryAfter"].as_u64().is_some());

    // The user message survives for a later retry.
    let app = create_router(state);
    let resp = app
        .oneshot(authed_get(&format!("/chats/{}", chat_id)))
        .await
        .unwrap();
    let json = body_json(resp).await;
    let messages = json["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
}

// =============================================================================
// SSE streaming
// =============================================================================

#[tokio::test]
async fn test_stream_headers_disable_buffering() {
    let mock = Arc::new(MockLlm::new());
    mock.push_stream(vec![Ok("4".to_string())]);
    let state = make_state_with(mock);
    let chat_id = create_chat_for(&state).await;

    let app = create_router(state);
    let resp = app
        .oneshot(authed_post_json(
            &format!("/chats/{}/messages/stream", chat_id),
            r#"{"content":"2+2?"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(resp.headers().get("x-accel-buffering").unwrap(), "no");
}

#[tokio::test]
async fn test_stream_chunks_concatenate_to_done_message() {
    let mock = Arc::new(MockLlm::new());
    mock.push_stream(vec![
        Ok("The answer ".to_string()),
        Ok("is ".to_string()),
        Ok("4".to_string()),
    ]);
    let state = make_state_with(mock);
    let chat_id = create_chat_for(&state).await;

    let app = create_router(state);
    let resp = app
        .oneshot(authed_post_json(
            &format!("/chats/{}/messages/stream", chat_id),
            r#"{"content":"2+2?"}"#,
        ))
        .await
        .unwrap();
    let events = sse_events(resp).await;

    let chunks: String = events
        .iter()
        .filter(|e| e["type"] == "chunk")
        .map(|e| e["content"].as_str().unwrap())
        .collect();
    assert_eq!(chunks, "The answer is 4");

    let done = events.last().unwrap();
    assert_eq!(done["type"], "done");
    assert_eq!(done["message"]["content"], "The answer is 4");
    assert_eq!(done["message"]["role"], "assistant");
}

#[tokio::test]
async fn test_stream_failure_emits_error_and_no_done() {
    let mock = Arc::new(MockLlm::new());
    mock.push_stream(vec![
        Ok("par".to_string()),
        Err(LlmError::Transport("connection reset".to_string())),
    ]);
    let state = make_state_with(mock);
    let chat_id = create_chat_for(&state).await;

    let app = create_router(state);
    let resp = app
        .oneshot(authed_post_json(
            &format!("/chats/{}/messages/stream", chat_id),
            r#"{"content":"hi"}"#,
        ))
        .await
        .unwrap();
    let events = sse_events(resp).await;

    assert!(events.iter().any(|e| e["type"] == "error"));
    assert!(!events.iter().any(|e| e["type"] == "done"));

    // The error payload references the surviving chat.
    let error = events.iter().find(|e| e["type"] == "error").unwrap();
    assert!(error["error"]
        .as_str()
        .unwrap()
        .contains(&chat_id.to_string()));
}

#[tokio::test]
async fn test_stream_empty_content_is_rejected() {
    let state = make_state();
    let chat_id = create_chat_for(&state).await;

    let app = create_router(state);
    let resp = app
        .oneshot(authed_post_json(
            &format!("/chats/{}/messages/stream", chat_id),
            r#"{"content":""}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Anonymous flows
// =============================================================================

#[tokio::test]
async fn test_anonymous_end_to_end() {
    let state = make_state();

    // Create with initial message, no auth header at all.
    let app = create_router(state.clone());
    let resp = app
        .oneshot(anon_post_json("/anonymous/chats", r#"{"message":"2+2?"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let json = body_json(resp).await;
    let messages = json["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["content"], "4");
    let chat_id: Uuid = json["data"]["chat"]["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    // Follow-up send against the same ephemeral chat.
    let app = create_router(state);
    let resp = app
        .oneshot(anon_post_json(
            &format!("/anonymous/chats/{}/messages", chat_id),
            r#"{"content":"and 3+3?"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["data"]["message"]["content"], "4");
}

#[tokio::test]
async fn test_anonymous_send_unknown_chat() {
    let app = make_app();
    let resp = app
        .oneshot(anon_post_json(
            &format!("/anonymous/chats/{}/messages", Uuid::new_v4()),
            r#"{"content":"hi"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_anonymous_stream() {
    let mock = Arc::new(MockLlm::new());
    mock.push_stream(vec![Ok("4".to_string())]);
    let state = make_state_with(mock);

    let app = create_router(state.clone());
    let resp = app
        .oneshot(anon_post_json("/anonymous/chats", r#"{}"#))
        .await
        .unwrap();
    let json = body_json(resp).await;
    let chat_id: Uuid = json["data"]["chat"]["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let app = create_router(state);
    let resp = app
        .oneshot(anon_post_json(
            &format!("/anonymous/chats/{}/messages/stream", chat_id),
            r#"{"content":"2+2?"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let events = sse_events(resp).await;
    assert_eq!(events.last().unwrap()["type"], "done");
}

// =============================================================================
// Migration
// =============================================================================

#[tokio::test]
async fn test_migrate_adopts_anonymous_chat() {
    let state = make_state();

    let app = create_router(state.clone());
    let resp = app
        .oneshot(anon_post_json("/anonymous/chats", r#"{"message":"2+2?"}"#))
        .await
        .unwrap();
    let json = body_json(resp).await;
    let chat_id: Uuid = json["data"]["chat"]["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let app = create_router(state.clone());
    let resp = app
        .oneshot(authed_post_json(
            "/chats/migrate",
            &format!(r#"{{"chat_ids":["{}"]}}"#, chat_id),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["data"]["migrated"].as_array().unwrap().len(), 1);

    // Now owned and fetchable through the authenticated surface.
    let app = create_router(state.clone());
    let resp = app
        .oneshot(authed_get(&format!("/chats/{}", chat_id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["data"]["messages"].as_array().unwrap().len(), 2);

    // And gone from the registry.
    assert!(state.registry.is_empty());
}

// =============================================================================
// Models
// =============================================================================

#[tokio::test]
async fn test_models_endpoint() {
    let app = make_app();
    let resp = app.oneshot(authed_get("/models")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["data"]["current"], "gemini-2.0-flash");
    assert!(json["data"]["models"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m == "gemini-2.0-flash"));
}

#[tokio::test]
async fn test_switch_model() {
    let state = make_state();

    let app = create_router(state.clone());
    let resp = app
        .oneshot(authed_put_json("/models", r#"{"model":"gemini-1.5-pro"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["data"]["current"], "gemini-1.5-pro");

    let app = create_router(state);
    let resp = app.oneshot(authed_get("/models")).await.unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["data"]["current"], "gemini-1.5-pro");
}

#[tokio::test]
async fn test_switch_model_unknown_leaves_default_unchanged() {
    let state = make_state();

    let app = create_router(state.clone());
    let resp = app
        .oneshot(authed_put_json("/models", r#"{"model":"not-a-model"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["error"], "INVALID_MODEL");

    let app = create_router(state);
    let resp = app.oneshot(authed_get("/models")).await.unwrap();
    let json = body_json(resp).await;
    assert_eq!(json["data"]["current"], "gemini-2.0-flash");
}
