//! The external tool provider seam.
//!
//! `HttpToolProvider` speaks JSON-RPC 2.0 (`tools/list`, `tools/call`)
//! over HTTP with a deliberate per-call deadline. The delegated credential
//! is forwarded opaquely as a bearer token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ToolError;

/// A callable tool advertised by the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Remote service exposing named tools the model may invoke.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Enumerate the available tools.
    async fn list_tools(&self, credential: Option<&str>) -> Result<Vec<ToolSpec>, ToolError>;

    /// Invoke one tool by name.
    async fn call(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        credential: Option<&str>,
    ) -> Result<serde_json::Value, ToolError>;
}

// =============================================================================
// JSON-RPC wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ToolListResult {
    #[serde(default)]
    tools: Vec<ToolSpec>,
}

// =============================================================================
// HttpToolProvider
// =============================================================================

/// Reqwest-backed JSON-RPC tool provider client.
pub struct HttpToolProvider {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpToolProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("colloquy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ToolError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    async fn rpc(
        &self,
        method: &str,
        params: serde_json::Value,
        credential: Option<&str>,
    ) -> Result<serde_json::Value, ToolError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(cred) = credential {
            builder = builder.header("authorization", format!("Bearer {}", cred));
        }

        let future = builder.send();
        let response = tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| ToolError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| ToolError::Provider(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Provider(format!(
                "provider returned status {}: {}",
                status, body
            )));
        }

        let body = tokio::time::timeout(self.timeout, response.json::<RpcResponse>())
            .await
            .map_err(|_| ToolError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| ToolError::Provider(format!("invalid response body: {}", e)))?;

        if let Some(error) = body.error {
            return Err(ToolError::Provider(format!(
                "rpc error {}: {}",
                error.code, error.message
            )));
        }
        body.result
            .ok_or_else(|| ToolError::Provider("response carried no result".to_string()))
    }
}

#[async_trait]
impl ToolProvider for HttpToolProvider {
    async fn list_tools(&self, credential: Option<&str>) -> Result<Vec<ToolSpec>, ToolError> {
        let result = self
            .rpc("tools/list", serde_json::json!({}), credential)
            .await?;
        let parsed: ToolListResult = serde_json::from_value(result)
            .map_err(|e| ToolError::Provider(format!("invalid tool list: {}", e)))?;
        debug!(count = parsed.tools.len(), "Fetched tool list");
        Ok(parsed.tools)
    }

    async fn call(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        credential: Option<&str>,
    ) -> Result<serde_json::Value, ToolError> {
        debug!(tool = name, "Invoking tool");
        self.rpc(
            "tools/call",
            serde_json::json!({"name": name, "arguments": arguments}),
            credential,
        )
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================
