//! Fixtures shared by the handler and route tests

use std::sync::Arc;

use agent_core::{
    AgentConfig, Completion, Coordinator, GenerationOptions, LlmProvider, Message, ProviderKind,
    ProviderRouter, Result, RuntimeSettings, SettingsStore, ToolRegistry, ToolSpec,
    provider::{CompletionStream, StreamChunk},
};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::state::AppState;

/// Answers every prompt with "Hello" + " world". When `gate` is set, the
/// stream waits for it before the first token.
pub struct Stub {
    pub kind: ProviderKind,
    pub gate: Option<Arc<Notify>>,
}

#[async_trait]
impl LlmProvider for Stub {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
        _options: &GenerationOptions,
    ) -> Result<Completion> {
        Ok(Completion::Answer(String::new()))
    }

    async fn complete_stream(
        &self,
        _messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let chunks = vec![Ok(StreamChunk::new("Hello")), Ok(StreamChunk::new(" world"))];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

pub async fn state_with_gate(gate: Option<Arc<Notify>>) -> AppState {
    let router = ProviderRouter::new().with_provider(Arc::new(Stub {
        kind: ProviderKind::OpenAi,
        gate,
    }));
    let tools = Arc::new(ToolRegistry::new());
    agent_tools::install_defaults(
        &tools,
        Arc::new(agent_tools::MemoryRecordStore::new()),
        Arc::new(agent_tools::MemoryTableStore::new()),
    )
    .await
    .unwrap();

    AppState::new(Arc::new(Coordinator::new(
        Arc::new(SettingsStore::new(RuntimeSettings::default())),
        Arc::new(router),
        tools,
        AgentConfig::default(),
    )))
}

pub async fn state() -> AppState {
    state_with_gate(None).await
}
