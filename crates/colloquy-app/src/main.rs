//! Colloquy application binary - composition root.
//!
//! Ties together all Colloquy crates into a single executable:
//! 1. Load configuration from TOML (with CLI/env overrides)
//! 2. Open the SQLite conversation store
//! 3. Build the LLM gateway (and the tool loop, when enabled)
//! 4. Start the ephemeral-chat sweeper
//! 5. Start the axum REST/SSE API server

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use colloquy_api::{auth, routes, AppState};
use colloquy_chat::{ChatOrchestrator, EphemeralRegistry, ToolSupport};
use colloquy_core::config::ColloquyConfig;
use colloquy_llm::{HttpLlmClient, LlmClient, LlmGateway};
use colloquy_store::Database;
use colloquy_tools::{HttpToolProvider, ToolRunner};

mod cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ColloquyConfig::load_or_default(&config_file);
    config.general.port = args.resolve_port(config.general.port);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    if args.no_tools {
        config.tools.enabled = false;
    }
    config.validate()?;

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.general.log_level.clone())),
        )
        .init();

    tracing::info!("Starting Colloquy v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = cli::resolve_data_dir(&config.general.data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let db_path = data_dir.join("colloquy.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite conversation store opened");

    // LLM gateway.
    let api_key = if config.llm.api_key.is_empty() {
        std::env::var("COLLOQUY_LLM_API_KEY").ok()
    } else {
        Some(config.llm.api_key.clone())
    };
    if api_key.is_none() {
        tracing::warn!("No LLM API key configured; upstream calls will likely be rejected");
    }

    let client: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
        config.llm.base_url.clone(),
        api_key,
        Duration::from_secs(config.llm.request_timeout_secs),
    )?);
    let gateway = Arc::new(LlmGateway::new(client, config.llm.clone()));
    tracing::info!(model = %gateway.current_model(), "LLM gateway ready");

    if gateway.test_connectivity().await {
        tracing::info!("Upstream LLM reachable");
    } else {
        tracing::warn!("Upstream LLM connectivity probe failed; continuing anyway");
    }

    // Tool augmentation.
    let tools = if config.tools.enabled {
        let provider = Arc::new(HttpToolProvider::new(
            config.tools.endpoint.clone(),
            Duration::from_secs(config.tools.timeout_secs),
        )?);
        tracing::info!(endpoint = %config.tools.endpoint, "Tool provider configured");
        Some(ToolSupport {
            provider,
            runner: ToolRunner::new(Arc::clone(&gateway), config.tools.max_corrections),
            require_credential: config.tools.require_credential,
        })
    } else {
        tracing::info!("Tool augmentation disabled");
        None
    };

    // Ephemeral registry + background sweeper.
    let registry = Arc::new(EphemeralRegistry::new(Duration::from_secs(
        config.ephemeral.ttl_minutes * 60,
    )));
    let sweep_interval = Duration::from_secs(config.ephemeral.sweep_interval_minutes * 60);
    let sweeper_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        sweeper_registry.run_sweeper(sweep_interval).await;
    });

    // Orchestrator + API state.
    let orchestrator = Arc::new(ChatOrchestrator::new(
        db,
        Arc::clone(&registry),
        gateway,
        tools,
    ));

    let token_path = data_dir.join("api_token");
    let mut state = AppState::new(config, orchestrator, Arc::clone(&registry));
    state.api_token = auth::load_or_generate_token(&token_path);

    // Serve until interrupted, then stop the sweeper.
    tokio::select! {
        result = routes::start_server(state) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }
    registry.shutdown();

    Ok(())
}
