//! The LLM gateway: model selection, history construction, retry/backoff.
//!
//! Sits between the orchestrator and the transport client. Non-streaming
//! completions are retried on transient failures with exponential backoff
//! and jitter; streaming completions are never retried.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use colloquy_core::config::LlmConfig;
use colloquy_core::types::{Message, Role};

use crate::client::{FragmentStream, LlmClient};
use crate::error::{ErrorClass, LlmError};
use crate::types::{Completion, GenerateRequest, SamplingParams, Turn};

/// Fixed system instruction describing the response conventions.
///
/// The upstream protocol has no native system-message slot, so this is
/// prepended as a synthetic user/model exchange ahead of the real history.
const SYSTEM_INSTRUCTION: &str = "\
You are Colloquy, a concise and helpful assistant.

Response conventions:
- Answer in plain prose by default.
- When tabular or numeric data benefits from a chart, embed one as a fenced \
block: ```chart\n{\"type\": \"bar|line|pie\", \"labels\": [...], \"series\": \
[{\"name\": \"...\", \"data\": [...]}]}\n```
- When a location benefits from a map, embed one as a fenced block: \
```map\n{\"center\": [lat, lng], \"zoom\": 10, \"markers\": [{\"position\": \
[lat, lng], \"label\": \"...\"}]}\n```
- Never emit these blocks unless they genuinely help the answer.";

const SYSTEM_ACK: &str =
    "Understood. I will follow these conventions in my responses.";

/// Build the upstream turn sequence from a conversation history.
///
/// Prepends the system instruction pair, filters `system`-role messages
/// (the upstream protocol only accepts user/model turns), and requires the
/// last real message to be user-authored.
pub fn build_turns(history: &[Message]) -> Result<Vec<Turn>, LlmError> {
    let last = history
        .last()
        .ok_or_else(|| LlmError::InvalidHistory("history is empty".to_string()))?;
    if last.role != Role::User {
        return Err(LlmError::InvalidHistory(format!(
            "last message must be user-authored, got '{}'",
            last.role.as_str()
        )));
    }

    let mut turns = Vec::with_capacity(history.len() + 2);
    turns.push(Turn::user(SYSTEM_INSTRUCTION));
    turns.push(Turn::model(SYSTEM_ACK));

    for message in history {
        match message.role {
            Role::User => turns.push(Turn::user(message.content.clone())),
            Role::Assistant => turns.push(Turn::model(message.content.clone())),
            Role::System => {}
        }
    }

    Ok(turns)
}

/// Gateway to the upstream model.
pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    cfg: LlmConfig,
    current_model: RwLock<String>,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, cfg: LlmConfig) -> Self {
        let current_model = RwLock::new(cfg.default_model.clone());
        Self {
            client,
            cfg,
            current_model,
        }
    }

    /// The process-wide default model.
    pub fn current_model(&self) -> String {
        self.current_model
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|_| self.cfg.default_model.clone())
    }

    /// The fixed allow-list of selectable models.
    pub fn allowed_models(&self) -> &[String] {
        &self.cfg.allowed_models
    }

    /// Swap the process-wide default model.
    ///
    /// Rejects names outside the allow-list and leaves the previous model
    /// active in that case.
    pub fn switch_model(&self, name: &str) -> Result<(), LlmError> {
        self.validate_model(name)?;
        if let Ok(mut current) = self.current_model.write() {
            debug!(from = %current, to = %name, "Switching default model");
            *current = name.to_string();
        }
        Ok(())
    }

    /// Resolve a per-request model override against the allow-list.
    ///
    /// `None` yields the current default. Overrides are threaded through
    /// generation explicitly instead of mutating shared gateway state, so
    /// concurrent requests with different preferences do not race.
    pub fn resolve_model(&self, requested: Option<&str>) -> Result<String, LlmError> {
        match requested {
            Some(name) => {
                self.validate_model(name)?;
                Ok(name.to_string())
            }
            None => Ok(self.current_model()),
        }
    }

    fn validate_model(&self, name: &str) -> Result<(), LlmError> {
        if self.cfg.allowed_models.iter().any(|m| m == name) {
            Ok(())
        } else {
            Err(LlmError::InvalidModel {
                name: name.to_string(),
                allowed: self.cfg.allowed_models.clone(),
            })
        }
    }

    fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.cfg.temperature,
            top_p: self.cfg.top_p,
            top_k: self.cfg.top_k,
            max_output_tokens: self.cfg.max_output_tokens,
        }
    }

    fn build_request(
        &self,
        history: &[Message],
        model: Option<&str>,
    ) -> Result<GenerateRequest, LlmError> {
        Ok(GenerateRequest {
            model: self.resolve_model(model)?,
            turns: build_turns(history)?,
            params: self.sampling_params(),
        })
    }

    /// Non-streaming completion with bounded retry.
    ///
    /// Transient failures (per the configured classifier) are retried with
    /// exponential backoff and jitter; fatal ones propagate immediately.
    /// The last error is surfaced once the attempt budget is spent.
    pub async fn complete(
        &self,
        history: &[Message],
        model: Option<&str>,
    ) -> Result<Completion, LlmError> {
        let request = self.build_request(history, model)?;
        let max_attempts = self.cfg.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            match self.client.generate(&request).await {
                Ok(completion) => return Ok(completion),
                Err(e) => {
                    let class = e.classify(&self.cfg.retryable_statuses);
                    attempt += 1;
                    if class == ErrorClass::Fatal || attempt >= max_attempts {
                        return Err(e);
                    }
                    let delay = self.backoff_delay(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient upstream failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Streaming completion. Not retried: the sequence is not restartable.
    pub async fn stream_complete(
        &self,
        history: &[Message],
        model: Option<&str>,
    ) -> Result<FragmentStream, LlmError> {
        let request = self.build_request(history, model)?;
        self.client.stream_generate(&request).await
    }

    /// Best-effort single round trip. Errors are swallowed into `false`.
    pub async fn test_connectivity(&self) -> bool {
        let request = GenerateRequest {
            model: self.current_model(),
            turns: vec![Turn::user("ping")],
            params: SamplingParams {
                max_output_tokens: 8,
                ..self.sampling_params()
            },
        };
        match self.client.generate(&request).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }

    /// Delay before retry `attempt` (0-based): `base * 2^attempt + jitter`,
    /// capped by the configured maximum.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .cfg
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(20));
        let jitter: u64 = rand::rng().random_range(0..=1000);
        Duration::from_millis((exp.saturating_add(jitter)).min(self.cfg.backoff_cap_ms))
    }
}

// =============================================================================
// Tests
// =============================================================================
