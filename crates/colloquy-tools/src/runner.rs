//! The tool invocation loop.
//!
//! Lets the model decide whether to call tools, executes the calls, and
//! recovers from failures through a bounded correction cycle before the
//! caller falls back to a plain completion. The cycle is an explicit loop
//! with an attempt counter, so termination is guaranteed.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use colloquy_core::types::{Message, Role};
use colloquy_llm::LlmGateway;

use crate::directive::{parse_directives, ToolCall, GIVE_UP_MARKER};
use crate::error::ToolError;
use crate::provider::{ToolProvider, ToolSpec};

/// Drives tool-augmented responses.
pub struct ToolRunner {
    gateway: Arc<LlmGateway>,
    max_corrections: u32,
}

impl ToolRunner {
    pub fn new(gateway: Arc<LlmGateway>, max_corrections: u32) -> Self {
        Self {
            gateway,
            max_corrections,
        }
    }

    /// Produce a tool-augmented answer for the given history.
    ///
    /// The final message of `history` must be the user's request. On any
    /// `ToolError` the caller is expected to fall back to a plain
    /// completion; transient tool errors never reach the end user.
    pub async fn respond(
        &self,
        provider: &dyn ToolProvider,
        credential: Option<&str>,
        history: &[Message],
        model: Option<&str>,
    ) -> Result<String, ToolError> {
        let tools = provider.list_tools(credential).await?;

        let augmented = augment_history(history, &tools);
        let first = self.gateway.complete(&augmented, model).await?;

        let calls = parse_directives(&first.content);
        if calls.is_empty() {
            return Ok(first.content);
        }

        info!(count = calls.len(), "Executing tool directives");
        // One correction budget for the whole operation: the first failing
        // call consumes it. A deliberate simplification, not per-call
        // isolation.
        let mut corrections = 0u32;
        let mut results: Vec<(String, serde_json::Value)> = Vec::new();
        for call in calls {
            let labeled = self
                .execute_with_correction(provider, credential, call, model, &mut corrections)
                .await?;
            results.push(labeled);
        }

        let followup = followup_history(history, &first.content, &results);
        let final_reply = self.gateway.complete(&followup, model).await?;
        Ok(final_reply.content)
    }

    /// Execute one call, asking the model to repair it on failure.
    ///
    /// At most `max_corrections` repair rounds; a give-up marker or an
    /// unparseable correction fails immediately.
    async fn execute_with_correction(
        &self,
        provider: &dyn ToolProvider,
        credential: Option<&str>,
        call: ToolCall,
        model: Option<&str>,
        corrections: &mut u32,
    ) -> Result<(String, serde_json::Value), ToolError> {
        let mut current = call;

        loop {
            match provider
                .call(&current.tool_name, &current.arguments, credential)
                .await
            {
                Ok(value) => return Ok((current.tool_name, value)),
                Err(e) => {
                    warn!(
                        tool = %current.tool_name,
                        corrections = *corrections,
                        error = %e,
                        "Tool execution failed"
                    );
                    if *corrections >= self.max_corrections {
                        return Err(ToolError::ExecutionFailed {
                            tool: current.tool_name,
                            message: format!("correction budget exhausted; last error: {}", e),
                        });
                    }
                    *corrections += 1;

                    let prompt = correction_prompt(&current, &e);
                    let reply = self
                        .gateway
                        .complete(&[Message::user(Uuid::nil(), prompt)], model)
                        .await?;

                    if reply.content.contains(GIVE_UP_MARKER) {
                        return Err(ToolError::ExecutionFailed {
                            tool: current.tool_name,
                            message: "model gave up on correcting the call".to_string(),
                        });
                    }
                    match parse_directives(&reply.content).into_iter().next() {
                        Some(corrected) => current = corrected,
                        None => {
                            return Err(ToolError::ExecutionFailed {
                                tool: current.tool_name,
                                message: "model produced no parseable corrected call".to_string(),
                            });
                        }
                    }
                }
            }
        }
    }
}

/// Rewrite the final user message to carry the tool instructions.
fn augment_history(history: &[Message], tools: &[ToolSpec]) -> Vec<Message> {
    let mut augmented = history.to_vec();
    if let Some(last) = augmented.last_mut() {
        if last.role == Role::User {
            last.content = format!("{}\n\n{}", tool_instructions(tools), last.content);
        }
    }
    augmented
}

fn tool_instructions(tools: &[ToolSpec]) -> String {
    let mut out = String::from("You may call external tools to answer this request.\nAvailable tools:\n");
    for tool in tools {
        out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }
    out.push_str(
        "\nTo call a tool, emit a directive of the exact form \
TOOL_CALL:<name>:<json arguments object>, one per line. \
If no tool is needed, answer the user directly.",
    );
    out
}

fn correction_prompt(call: &ToolCall, error: &ToolError) -> String {
    format!(
        "A tool call you issued failed.\n\
Tool: {}\n\
Arguments: {}\n\
Error: {}\n\n\
If the call can be fixed, reply with exactly one corrected \
TOOL_CALL:<name>:<json> directive and nothing else. \
If it cannot be fixed, reply with {}.",
        call.tool_name, call.arguments, error, GIVE_UP_MARKER
    )
}

/// Build the follow-up history asking for the final answer.
fn followup_history(
    history: &[Message],
    directive_reply: &str,
    results: &[(String, serde_json::Value)],
) -> Vec<Message> {
    let chat_id = history.last().map(|m| m.chat_id).unwrap_or_else(Uuid::nil);

    let mut prompt = String::from("Tool results:\n");
    for (name, value) in results {
        prompt.push_str(&format!("[{}]: {}\n", name, value));
    }
    prompt.push_str(
        "\nUsing these results where relevant, write the final answer to my \
request. Do not mention the tool invocation mechanics.",
    );

    let mut followup = history.to_vec();
    followup.push(Message::assistant(chat_id, directive_reply));
    followup.push(Message::user(chat_id, prompt));
    followup
}

// =============================================================================
// Tests
// =============================================================================
