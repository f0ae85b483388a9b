use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ColloquyError, Result};

/// Top-level configuration for the Colloquy application.
///
/// Loaded from `~/.colloquy/config.toml` by default. Each section
/// corresponds to a bounded context or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColloquyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub ephemeral: EphemeralConfig,
}

impl ColloquyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ColloquyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file does not
    /// exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ColloquyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Validate cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.llm.allowed_models.is_empty() {
            return Err(ColloquyError::Config(
                "llm.allowed_models must not be empty".to_string(),
            ));
        }
        if !self.llm.allowed_models.contains(&self.llm.default_model) {
            return Err(ColloquyError::Config(format!(
                "llm.default_model '{}' is not in llm.allowed_models",
                self.llm.default_model
            )));
        }
        if self.ephemeral.ttl_minutes == 0 {
            return Err(ColloquyError::Config(
                "ephemeral.ttl_minutes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// API server port.
    pub port: u16,
    /// Data directory for SQLite and the API token file.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            port: 3900,
            data_dir: "~/.colloquy/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Upstream text-generation model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the upstream generation API.
    pub base_url: String,
    /// API key. When empty, the `COLLOQUY_LLM_API_KEY` env var is used.
    pub api_key: String,
    /// Model used when a request carries no override.
    pub default_model: String,
    /// Fixed allow-list of selectable models.
    pub allowed_models: Vec<String>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling parameter.
    pub top_p: f64,
    /// Top-k sampling parameter.
    pub top_k: u32,
    /// Maximum output tokens per completion.
    pub max_output_tokens: u32,
    /// Maximum attempts for a non-streaming completion (first try included).
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff delay cap in milliseconds.
    pub backoff_cap_ms: u64,
    /// HTTP statuses treated as transient by the retry classifier.
    pub retryable_statuses: Vec<u16>,
    /// Per-request timeout for upstream calls, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key: String::new(),
            default_model: "gemini-2.0-flash".to_string(),
            allowed_models: vec![
                "gemini-2.0-flash".to_string(),
                "gemini-2.0-flash-lite".to_string(),
                "gemini-1.5-pro".to_string(),
            ],
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 2048,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
            request_timeout_secs: 120,
        }
    }
}

/// External tool-provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Whether tool augmentation is available in this deployment.
    pub enabled: bool,
    /// JSON-RPC endpoint of the tool provider.
    pub endpoint: String,
    /// Per-call timeout in seconds. Exceeding it counts as a tool failure.
    pub timeout_secs: u64,
    /// Maximum correction retries after a failed tool execution.
    pub max_corrections: u32,
    /// Whether a delegated credential is required to invoke tools.
    pub require_credential: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://127.0.0.1:9400/rpc".to_string(),
            timeout_secs: 20,
            max_corrections: 2,
            require_credential: true,
        }
    }
}

/// Ephemeral (anonymous) chat lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EphemeralConfig {
    /// Entries older than this are removed by the sweep.
    pub ttl_minutes: u64,
    /// How often the sweep runs.
    pub sweep_interval_minutes: u64,
}

impl Default for EphemeralConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 60,
            sweep_interval_minutes: 30,
        }
    }
}
