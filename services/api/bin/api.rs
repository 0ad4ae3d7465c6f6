//! Main Entrypoint for the Livewire API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Starting the optional MCP tool server and the Gemini connector.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use gemini_realtime::GeminiLiveConnector;
use livewire_api::{config::Config, router::create_router, state::AppState};
use livewire_core::{InMemoryMemory, LiveOrchestrator, McpToolEngine, NoTools, ToolEngine};
use rmcp::{ServiceExt, transport::TokioChildProcess};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler.");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Spawns the configured stdio MCP server and connects a client to it.
async fn start_tool_engine(command: Option<&[String]>) -> anyhow::Result<Arc<dyn ToolEngine>> {
    let Some((program, args)) = command.and_then(|parts| parts.split_first()) else {
        info!("No MCP server configured. Sessions run without tools.");
        return Ok(Arc::new(NoTools));
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args);
    let transport = TokioChildProcess::new(cmd)
        .with_context(|| format!("Failed to spawn MCP server '{program}'"))?;
    let client = ()
        .serve(transport)
        .await
        .context("Failed to initialize MCP client")?;
    info!(server = %program, "Connected to MCP tool server.");
    Ok(Arc::new(McpToolEngine::new(client)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let tools = start_tool_engine(config.mcp_server_command.as_deref()).await?;
    let connector = Arc::new(GeminiLiveConnector::new(config.gemini_api_key.clone()));
    let memory = Arc::new(InMemoryMemory::new());

    let mut orchestrator = LiveOrchestrator::new(connector, tools, memory.clone());
    if let Some(path) = &config.system_prompt_path {
        let system_prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {}", path.display()))?;
        orchestrator = orchestrator.with_system_prompt(system_prompt);
    }

    let app_state = Arc::new(AppState {
        orchestrator,
        config: Arc::new(config.clone()),
        memory,
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.gemini_model,
        auto_reconnect = config.auto_reconnect,
        max_attempts = config.reconnect_policy.max_attempts(),
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
