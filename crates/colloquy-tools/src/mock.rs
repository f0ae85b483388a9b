//! Scripted tool provider for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ToolError;
use crate::provider::{ToolProvider, ToolSpec};

/// One recorded tool invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub name: String,
    pub arguments: serde_json::Value,
    pub credential: Option<String>,
}

/// A scripted `ToolProvider`.
///
/// Call results are consumed in invocation order, independent of tool
/// name; every invocation is recorded for assertions.
pub struct MockToolProvider {
    tools: Vec<ToolSpec>,
    results: Mutex<VecDeque<Result<serde_json::Value, ToolError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockToolProvider {
    /// A provider advertising the given tool names (empty descriptions).
    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names
                .iter()
                .map(|n| ToolSpec {
                    name: n.to_string(),
                    description: format!("mock tool {}", n),
                    input_schema: serde_json::json!({"type": "object"}),
                })
                .collect(),
            results: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue the result for the next `call` invocation.
    pub fn push_result(&self, result: Result<serde_json::Value, ToolError>) {
        self.results.lock().unwrap().push_back(result);
    }

    /// All invocations seen so far.
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolProvider for MockToolProvider {
    async fn list_tools(&self, _credential: Option<&str>) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(self.tools.clone())
    }

    async fn call(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        credential: Option<&str>,
    ) -> Result<serde_json::Value, ToolError> {
        self.calls.lock().unwrap().push(RecordedCall {
            name: name.to_string(),
            arguments: arguments.clone(),
            credential: credential.map(str::to_string),
        });

        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ToolError::Provider(
                    "mock result queue exhausted".to_string(),
                ))
            })
    }
}
