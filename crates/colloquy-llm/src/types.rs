//! Request and reply types shared by the client implementations.

use serde::{Deserialize, Serialize};

/// Author of an upstream conversation turn.
///
/// The upstream protocol only knows user and model turns; `system`-role
/// messages are rewritten before they reach this layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Model,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        }
    }
}

/// One turn of the conversation as sent upstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            text: text.into(),
        }
    }
}

/// Sampling parameters, fixed per deployment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

/// A fully resolved generation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub turns: Vec<Turn>,
    pub params: SamplingParams,
}

/// Token accounting reported by the upstream model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A completed (non-streaming) generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }

    pub fn with_usage(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            usage: Some(usage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_constructors() {
        let t = Turn::user("hello");
        assert_eq!(t.role, TurnRole::User);
        assert_eq!(t.text, "hello");
        assert_eq!(Turn::model("hi").role.as_str(), "model");
    }

    #[test]
    fn test_completion_helpers() {
        let c = Completion::new("answer");
        assert!(c.usage.is_none());

        let c = Completion::with_usage(
            "answer",
            TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
        );
        assert_eq!(c.usage.unwrap().completion_tokens, 5);
    }

    #[test]
    fn test_sampling_defaults() {
        let p = SamplingParams::default();
        assert_eq!(p.top_k, 40);
        assert_eq!(p.max_output_tokens, 2048);
    }
}
