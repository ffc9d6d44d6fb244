//! agent-sandbox HTTP Server
//!
//! Axum-based server exposing runtime settings, provider and tool discovery,
//! request/response chat and WebSocket streaming over one `Coordinator`.

mod config;
mod handlers;
mod routes;
mod state;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{Coordinator, RuntimeSettings, SettingsStore, ToolRegistry};
use agent_tools::{ConnectorKind, HttpConnector, MemoryRecordStore, MemoryTableStore};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    // Runtime settings and providers
    let settings = Arc::new(SettingsStore::new(RuntimeSettings::from_env()));
    let router = Arc::new(agent_runtime::providers_from_env());

    let active = settings.get();
    tracing::info!(provider = %active.provider, model = %active.model, temperature = active.temperature, "Runtime settings");
    if router.select(active.provider).is_err() {
        tracing::warn!(provider = %active.provider, "Active provider has no API key; turns will fail until one is set");
    }

    // Tools
    let tools = Arc::new(ToolRegistry::new());
    agent_tools::install_defaults(
        &tools,
        Arc::new(MemoryRecordStore::new()),
        Arc::new(MemoryTableStore::new()),
    )
    .await?;
    agent_tools::install_connectors(&tools, ConnectorKind::ALL.map(HttpConnector::from_env)).await;

    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    let coordinator = Arc::new(Coordinator::new(settings, router, tools, config.agent.clone()));
    let app = routes::router(AppState::new(coordinator), &config.static_dir);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("agent-sandbox server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET   /health                        - Health check");
    tracing::info!("  GET   /api/settings                  - Runtime settings");
    tracing::info!("  PATCH /api/settings                  - Update settings");
    tracing::info!("  GET   /api/providers                 - Provider status");
    tracing::info!("  GET   /api/providers/{{p}}/models      - Models per provider");
    tracing::info!("  GET   /api/tools                     - Registered tools");
    tracing::info!("  POST  /api/chat                      - Send message");
    tracing::info!("  GET   /api/chat/stream               - WebSocket streaming");
    tracing::info!("  GET   /api/agents                    - Active sessions");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
