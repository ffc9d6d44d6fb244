//! Router assembly

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::handlers::{
    broadcast, chat_handler, chat_stream_handler, get_settings, health_check, list_agents,
    list_models, list_providers, list_tools, patch_settings, remove_agent,
};
use crate::state::AppState;

pub fn router(state: AppState, static_dir: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/settings", get(get_settings).patch(patch_settings))
        .route("/api/providers", get(list_providers))
        .route("/api/providers/{provider}/models", get(list_models))
        .route("/api/tools", get(list_tools))
        // Agent API
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", get(chat_stream_handler))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/broadcast", post(broadcast))
        .route("/api/agents/{id}", delete(remove_agent))
        // Static chat UI
        .fallback_service(ServeDir::new(static_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
