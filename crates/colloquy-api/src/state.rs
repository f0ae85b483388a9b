//! Application state shared across all route handlers.
//!
//! AppState holds references to the orchestrator and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use colloquy_chat::{ChatOrchestrator, EphemeralRegistry};
use colloquy_core::config::ColloquyConfig;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<ColloquyConfig>,
    /// The request orchestrator (store, registry, gateway, tool loop).
    pub orchestrator: Arc<ChatOrchestrator>,
    /// The ephemeral chat registry, shared with the background sweeper.
    pub registry: Arc<EphemeralRegistry>,
    /// Bearer token protecting the authenticated routes.
    pub api_token: String,
    /// Identity the bundled single-token auth gate resolves to.
    pub api_user: String,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: ColloquyConfig,
        orchestrator: Arc<ChatOrchestrator>,
        registry: Arc<EphemeralRegistry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            registry,
            api_token: String::new(),
            api_user: "local".to_string(),
            start_time: Instant::now(),
        }
    }
}
