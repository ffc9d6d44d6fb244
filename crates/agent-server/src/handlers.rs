//! HTTP/WebSocket Handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use agent_core::{
    Agent, AgentError, Coordinator, ErrorKind, ProviderKind, RuntimeSettings, SessionId, SessionInfo,
    SettingsPatch, StreamEvent, ToolSpec,
    bus::McpMessage,
    provider::ProviderStatus,
};

use crate::state::AppState;

/// Events buffered per connection before a slow client backs up the turn
const EVENT_BUFFER: usize = 64;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: ProviderKind,
    pub model: String,
    pub provider_configured: bool,
    pub tools: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    /// Present only when the caller named a session to keep
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Tool events of the turn, in order
    pub tools: Vec<StreamEvent>,
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorKind,
}

/// Handler failure rendered as `{error, code}`
pub struct ApiError {
    status: StatusCode,
    error: AgentError,
}

impl ApiError {
    pub fn new(status: StatusCode, error: AgentError) -> Self {
        Self { status, error }
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        let status = match error.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidProvider | ErrorKind::InvalidRange | ErrorKind::InvalidModel => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorKind::TurnInProgress => StatusCode::CONFLICT,
            ErrorKind::ProviderAuth => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ProviderRequest => StatusCode::BAD_GATEWAY,
            ErrorKind::UnknownTool => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = %self.error, "Request failed");
        }
        let body = ErrorResponse {
            error: self.error.user_message(),
            code: self.error.kind(),
        };
        (self.status, Json(body)).into_response()
    }
}

fn prompt_missing() -> AgentError {
    AgentError::Validation("Prompt missing".into())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let coordinator = &state.coordinator;
    let settings = coordinator.settings().get();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider_configured: coordinator.router().select(settings.provider).is_ok(),
        provider: settings.provider,
        model: settings.model,
        tools: coordinator.tools().len(),
    })
}

pub async fn get_settings(State(state): State<AppState>) -> Json<RuntimeSettings> {
    Json(state.coordinator.settings().get())
}

/// Apply a partial update; nothing changes when any field is rejected
pub async fn patch_settings(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<RuntimeSettings>, ApiError> {
    let applied = state.coordinator.settings().patch(patch)?;
    Ok(Json(applied))
}

pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderStatus>> {
    Json(state.coordinator.router().status())
}

/// Models offered by one provider, default first
pub async fn list_models(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let kind: ProviderKind = provider
        .parse()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?;

    let models = match state.coordinator.router().get(kind) {
        Some(adapter) => adapter.list_models().await?,
        None => kind.catalog().iter().map(ToString::to_string).collect(),
    };
    Ok(Json(models))
}

pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolSpec>> {
    Json(state.coordinator.tools().schemas())
}

pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.coordinator.list_agents())
}

pub async fn remove_agent(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.coordinator.remove(&SessionId::from_string(id)) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Text message to every agent inbox
pub async fn broadcast(
    State(state): State<AppState>,
    Json(payload): Json<BroadcastRequest>,
) -> Json<BroadcastResponse> {
    let delivered = state.coordinator.broadcast(McpMessage::Text {
        content: payload.content,
    });
    Json(BroadcastResponse { delivered })
}

/// Keeps a streaming client's agent alive; a session the client did not
/// name is removed when the guard drops.
pub(crate) struct StreamSession {
    coordinator: Arc<Coordinator>,
    agent: Arc<Agent>,
    persistent: bool,
}

impl StreamSession {
    pub(crate) fn open(coordinator: Arc<Coordinator>, session_id: Option<&str>) -> Self {
        let persistent = session_id.is_some_and(|id| !id.trim().is_empty());
        let agent = coordinator.get_or_create(session_id);
        Self {
            coordinator,
            agent,
            persistent,
        }
    }

    pub(crate) fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if !self.persistent {
            self.coordinator.remove(self.agent.id());
        }
    }
}

/// Request/response chat: runs a whole turn and returns the answer.
/// Without a `session_id` the agent lives for this request only.
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let prompt = payload
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(prompt_missing)?;

    let session = StreamSession::open(state.coordinator.clone(), payload.session_id.as_deref());
    let agent = session.agent().clone();
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

    let turn = {
        let agent = agent.clone();
        async move {
            let outcome = agent.chat(&prompt, &tx).await;
            drop(tx);
            outcome
        }
    };
    let collect = async move {
        let mut tools = Vec::new();
        while let Some(event) = rx.recv().await {
            if matches!(event, StreamEvent::Tool { .. }) {
                tools.push(event);
            }
        }
        tools
    };

    let (outcome, tools) = tokio::join!(turn, collect);
    let session_id = session.persistent.then(|| agent.id().clone());
    drop(session);
    Ok(Json(ChatResponse {
        response: outcome?,
        session_id,
        tools,
    }))
}

/// WebSocket streaming chat
pub async fn chat_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    let session = StreamSession::open(state.coordinator.clone(), params.session_id.as_deref());
    ws.on_upgrade(move |socket| handle_stream(socket, session))
}

async fn handle_stream(socket: WebSocket, session: StreamSession) {
    let agent = session.agent().clone();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
    tracing::info!(session = %agent.id(), "Stream connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Unserializable event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(session = %agent.id(), error = %e, "WebSocket error");
                break;
            }
            _ => continue,
        };
        handle_prompt(&agent, text.as_str(), &tx).await;
    }

    // turns still running finish on their own; their events are dropped
    writer.abort();
    tracing::info!(session = %agent.id(), persistent = session.persistent, "Stream closed");
}

/// Start a turn for one client frame. A bad frame gets a `ValidationError`
/// event; a frame arriving mid-turn gets `TurnInProgressError`.
pub(crate) async fn handle_prompt(agent: &Arc<Agent>, frame: &str, events: &mpsc::Sender<StreamEvent>) {
    let request: ChatRequest = match serde_json::from_str(frame) {
        Ok(request) => request,
        Err(e) => {
            let err = AgentError::Validation(format!("Invalid request: {e}"));
            let _ = events.send(StreamEvent::error(&err)).await;
            return;
        }
    };
    let Some(prompt) = request.prompt.filter(|p| !p.trim().is_empty()) else {
        let _ = events.send(StreamEvent::error(&prompt_missing())).await;
        return;
    };

    // wait until the turn holds the conversation so the next frame sees it
    let (claimed_tx, claimed_rx) = oneshot::channel();
    let agent = agent.clone();
    let events = events.clone();
    tokio::spawn(async move {
        match agent.try_begin() {
            Ok(turn) => {
                let _ = claimed_tx.send(());
                let _ = turn.run(&prompt, &events).await;
            }
            Err(e) => {
                drop(claimed_tx);
                let _ = events.send(StreamEvent::error(&e)).await;
            }
        }
    });
    let _ = claimed_rx.await;
}
