//! Client seam for the upstream generation API.
//!
//! `LlmClient` abstracts the transport so the gateway, the orchestrator,
//! and the tests can swap the real HTTP client for a scripted mock.
//! `HttpLlmClient` speaks a Gemini-style wire protocol: JSON request with
//! user/model `contents`, SSE-framed fragments for streaming.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::types::{Completion, GenerateRequest, TokenUsage};

/// A finite, non-restartable sequence of text fragments.
///
/// The natural end of the stream signals completion; an error item aborts
/// the sequence without a synthetic terminator.
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

/// Transport seam to the upstream generation model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single-shot completion. No retry at this layer.
    async fn generate(&self, request: &GenerateRequest) -> Result<Completion, LlmError>;

    /// Streaming completion. Fragments are yielded as they arrive.
    async fn stream_generate(&self, request: &GenerateRequest) -> Result<FragmentStream, LlmError>;
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(rename = "generationConfig")]
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct WireGenerationConfig {
    temperature: f64,
    #[serde(rename = "topP")]
    top_p: f64,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<WireUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}

impl WireRequest {
    fn from_request(request: &GenerateRequest) -> Self {
        Self {
            contents: request
                .turns
                .iter()
                .map(|t| WireContent {
                    role: t.role.as_str().to_string(),
                    parts: vec![WirePart {
                        text: t.text.clone(),
                    }],
                })
                .collect(),
            generation_config: WireGenerationConfig {
                temperature: request.params.temperature,
                top_p: request.params.top_p,
                top_k: request.params.top_k,
                max_output_tokens: request.params.max_output_tokens,
            },
        }
    }
}

/// Concatenate the text parts of the first candidate, if any.
fn candidate_text(response: &WireResponse) -> Option<String> {
    let content = response.candidates.first()?.content.as_ref()?;
    if content.parts.is_empty() {
        return None;
    }
    Some(
        content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<String>(),
    )
}

/// Parse one SSE `data:` payload into an optional text fragment.
///
/// Empty fragments (e.g. safety-only chunks) yield `Ok(None)`.
fn fragment_from_event(data: &str) -> Result<Option<String>, LlmError> {
    let response: WireResponse = serde_json::from_str(data)
        .map_err(|e| LlmError::Decode(format!("invalid stream event: {}", e)))?;
    Ok(candidate_text(&response).filter(|t| !t.is_empty()))
}

// =============================================================================
// HttpLlmClient
// =============================================================================

/// Reqwest-backed client for a Gemini-style generation API.
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    /// Build a client with the given per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("colloquy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LlmError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, model, method)
    }

    async fn post(
        &self,
        url: &str,
        request: &GenerateRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let mut builder = self.client.post(url).json(&WireRequest::from_request(request));
        if let Some(ref key) = self.api_key {
            builder = builder.header("x-goog-api-key", key.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Transport(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Upstream {
                status: Some(status.as_u16()),
                message: body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<Completion, LlmError> {
        let url = self.endpoint(&request.model, "generateContent");
        debug!(model = %request.model, turns = request.turns.len(), "Sending completion request");

        let response = self.post(&url, request).await?;
        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(format!("invalid response body: {}", e)))?;

        let content = candidate_text(&wire).ok_or_else(|| LlmError::Upstream {
            status: None,
            message: "response contained no candidates".to_string(),
        })?;

        let usage = wire.usage_metadata.map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
        });

        Ok(Completion { content, usage })
    }

    async fn stream_generate(&self, request: &GenerateRequest) -> Result<FragmentStream, LlmError> {
        let url = format!(
            "{}?alt=sse",
            self.endpoint(&request.model, "streamGenerateContent")
        );
        debug!(model = %request.model, "Opening streaming completion");

        let response = self.post(&url, request).await?;
        let byte_stream = Box::pin(response.bytes_stream());

        let (tx, rx) = mpsc::channel::<Result<String, LlmError>>(32);
        tokio::spawn(forward_sse(byte_stream, tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Consume an SSE byte stream and forward text fragments to `tx`.
///
/// Events are delimited by blank lines; each `data:` payload is a JSON
/// chunk in the non-streaming response shape. Returns when the body ends,
/// on the `[DONE]` sentinel, or when the receiver is dropped (the caller
/// disconnected — the upstream body is dropped with the task).
async fn forward_sse<S>(mut byte_stream: S, tx: mpsc::Sender<Result<String, LlmError>>)
where
    S: futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
{
    let mut buffer = String::new();

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(Err(LlmError::Transport(format!("stream aborted: {}", e))))
                    .await;
                return;
            }
        };

        let text = String::from_utf8_lossy(&chunk).replace('\r', "");
        buffer.push_str(&text);

        while let Some(pos) = buffer.find("\n\n") {
            let block = buffer[..pos].to_string();
            buffer.drain(..pos + 2);
            if !process_sse_block(&block, &tx).await {
                return;
            }
        }
    }

    // Trailing partial event without a blank-line terminator.
    if !buffer.trim().is_empty() {
        process_sse_block(&buffer, &tx).await;
    }
}

/// Handle one SSE event block. Returns false when forwarding should stop.
async fn process_sse_block(block: &str, tx: &mpsc::Sender<Result<String, LlmError>>) -> bool {
    for line in block.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if data == "[DONE]" {
            return false;
        }

        match fragment_from_event(data) {
            Ok(Some(fragment)) => {
                if tx.send(Ok(fragment)).await.is_err() {
                    // Receiver dropped: the consumer went away.
                    return false;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Skipping undecodable stream event");
            }
        }
    }
    true
}

// =============================================================================
// Tests
// =============================================================================
