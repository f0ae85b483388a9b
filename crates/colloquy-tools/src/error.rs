//! Error types for tool invocation.

use thiserror::Error;

use colloquy_llm::LlmError;

/// Errors from the tool provider and the invocation loop.
///
/// Never surfaced to end users directly: the orchestrator catches these
/// and falls back to a plain completion.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The provider could not be reached or answered with a protocol error.
    #[error("tool provider error: {0}")]
    Provider(String),

    /// The provider did not answer within the configured deadline.
    #[error("tool call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// A tool execution failed and the correction cycle could not repair it.
    #[error("tool '{tool}' failed: {message}")]
    ExecutionFailed { tool: String, message: String },

    /// The LLM failed while driving the loop.
    #[error("LLM failure inside tool loop: {0}")]
    Llm(#[from] LlmError),
}
