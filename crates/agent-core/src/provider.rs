//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for the supported LLM backends (OpenAI,
//! Anthropic, Gemini, DeepSeek) so the agent works with any of them without
//! code changes. The set of backends is closed: [`ProviderKind`] names them,
//! and the [`ProviderRouter`] picks the adapter for the kind selected in the
//! runtime settings at the start of each turn.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{ProviderKind, ProviderRouter};
//!
//! let router = ProviderRouter::new().with_provider(Arc::new(openai));
//! let provider = router.select(ProviderKind::OpenAi)?;
//! let completion = provider.complete(&messages, &tools, &options).await?;
//! ```

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::tool::{ToolCall, ToolSpec};

/// Supported LLM backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    DeepSeek,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::DeepSeek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::DeepSeek => "deepseek",
        }
    }

    /// Models offered for this provider, default first
    pub fn catalog(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["gpt-4o-mini", "gpt-4o", "gpt-4.1-mini", "gpt-4.1", "gpt-3.5-turbo"],
            ProviderKind::Anthropic => &[
                "claude-3-5-sonnet-latest",
                "claude-3-5-haiku-latest",
                "claude-3-opus-latest",
            ],
            ProviderKind::Gemini => &["gemini-1.5-flash", "gemini-1.5-pro", "gemini-2.0-flash"],
            ProviderKind::DeepSeek => &["deepseek-chat", "deepseek-reasoner"],
        }
    }

    pub fn default_model(&self) -> &'static str {
        self.catalog()[0]
    }

    pub fn offers_model(&self, model: &str) -> bool {
        self.catalog().contains(&model)
    }

    /// Whether the backend's API has native function calling
    pub fn supports_native_tools(&self) -> bool {
        matches!(self, ProviderKind::OpenAi | ProviderKind::DeepSeek)
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            _ => Err(AgentError::InvalidProvider(s.to_string())),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4o-mini", "claude-3-5-sonnet-latest")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 2.0 = most random)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 1024 }

impl GenerationOptions {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::new(ProviderKind::OpenAi.default_model(), default_temperature())
    }
}

/// Outcome of a classifying completion
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    /// The model answered in plain text
    Answer(String),
    /// The model asked for a tool
    ToolCall(ToolCall),
}

/// A chunk from streaming completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The text delta
    pub delta: String,
}

impl StreamChunk {
    pub fn new(delta: impl Into<String>) -> Self {
        Self { delta: delta.into() }
    }
}

/// Stream type for completion streaming. Finite, lazy and not restartable.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Which backend this adapter talks to
    fn kind(&self) -> ProviderKind;

    /// Whether a credential is available
    fn is_configured(&self) -> bool;

    /// Decide between answering and calling one of `tools`
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// Generate a streaming completion
    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream>;

    /// List available models
    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.kind().catalog().iter().map(ToString::to_string).collect())
    }
}

/// Per-provider availability, as reported to clients
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: ProviderKind,
    pub configured: bool,
    pub default_model: String,
}

/// Maps each provider kind to its adapter
#[derive(Clone, Default)]
pub struct ProviderRouter {
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind, replacing any previous one
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn insert(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(&kind).cloned()
    }

    /// Adapter for a turn; fails when missing or without credentials
    pub fn select(&self, kind: ProviderKind) -> Result<Arc<dyn LlmProvider>> {
        match self.providers.get(&kind) {
            Some(provider) if provider.is_configured() => Ok(provider.clone()),
            _ => Err(AgentError::ProviderAuth(kind.to_string())),
        }
    }

    pub fn status(&self) -> Vec<ProviderStatus> {
        ProviderKind::ALL
            .iter()
            .map(|kind| ProviderStatus {
                provider: *kind,
                configured: self.providers.get(kind).is_some_and(|p| p.is_configured()),
                default_model: kind.default_model().to_string(),
            })
            .collect()
    }
}
