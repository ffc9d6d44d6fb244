//! # agent-runtime
//!
//! Concrete LLM providers over the vendors' REST APIs.
//!
//! ## Providers
//!
//! - **OpenAI**: Chat Completions with native function calling
//! - **DeepSeek**: same adapter, OpenAI-compatible endpoint
//! - **Anthropic**: Messages API, textual tool classification
//! - **Gemini**: Generative Language API, textual tool classification
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::providers_from_env;
//!
//! let router = Arc::new(providers_from_env());
//! let coordinator = Coordinator::new(settings, router, tools, AgentConfig::default());
//! ```

pub mod anthropic;
pub mod config;
pub mod gemini;
mod http;
pub mod openai;
mod sse;

use std::sync::Arc;

use agent_core::provider::{LlmProvider, ProviderKind, ProviderRouter};

pub use anthropic::AnthropicProvider;
pub use config::ProviderConfig;
pub use gemini::GeminiProvider;
pub use openai::OpenAiCompatProvider;

/// Adapter for `kind` built from its config
pub fn provider(kind: ProviderKind, config: ProviderConfig) -> Arc<dyn LlmProvider> {
    match kind {
        ProviderKind::OpenAi | ProviderKind::DeepSeek => {
            Arc::new(OpenAiCompatProvider::new(kind, config))
        }
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(config)),
    }
}

/// Router with every provider, configured from the environment.
/// Providers without a key are registered but report `ProviderAuth` on use.
pub fn providers_from_env() -> ProviderRouter {
    providers_from_lookup(|key| std::env::var(key).ok())
}

pub fn providers_from_lookup(get: impl Fn(&str) -> Option<String>) -> ProviderRouter {
    let mut router = ProviderRouter::new();
    for kind in ProviderKind::ALL {
        let config = ProviderConfig::from_lookup(kind, &get);
        if config.api_key.is_some() {
            tracing::info!(provider = %kind, base_url = %config.base_url, "Provider configured");
        } else {
            tracing::warn!(provider = %kind, "No API key, provider disabled");
        }
        router.insert(provider(kind, config));
    }
    router
}
