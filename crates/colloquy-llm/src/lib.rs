//! Colloquy LLM crate - gateway to the upstream text-generation model.
//!
//! `LlmClient` is the transport seam: `HttpLlmClient` speaks the real wire
//! protocol, `MockLlm` is the scripted test collaborator. `LlmGateway`
//! layers model selection, history construction, and retry/backoff on top.

pub mod client;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod types;

pub use client::{FragmentStream, HttpLlmClient, LlmClient};
pub use error::{ErrorClass, LlmError};
pub use gateway::LlmGateway;
pub use mock::MockLlm;
pub use types::{Completion, GenerateRequest, SamplingParams, TokenUsage, Turn, TurnRole};
