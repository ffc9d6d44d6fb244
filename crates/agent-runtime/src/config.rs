//! Provider configuration from the environment

use std::time::Duration;

use agent_core::provider::ProviderKind;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Connection settings for one provider
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// API key; `None` leaves the provider unconfigured
    pub api_key: Option<String>,

    /// API base URL
    pub base_url: String,

    /// Whole-request timeout, including streamed bodies
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(kind).into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_env(kind: ProviderKind) -> Self {
        Self::from_lookup(kind, |key| std::env::var(key).ok())
    }

    /// Read `<PREFIX>_API_KEY`, `<PREFIX>_BASE_URL` and `PROVIDER_TIMEOUT_SECS`
    pub fn from_lookup(kind: ProviderKind, get: impl Fn(&str) -> Option<String>) -> Self {
        let (key_var, url_var) = env_names(kind);

        let api_key = get(key_var)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let base_url = get(url_var)
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| default_base_url(kind).into());
        let timeout = get("PROVIDER_TIMEOUT_SECS")
            .and_then(|t| t.trim().parse().ok())
            .filter(|secs| *secs > 0)
            .map_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS), Duration::from_secs);

        Self {
            api_key,
            base_url,
            timeout,
        }
    }
}

fn env_names(kind: ProviderKind) -> (&'static str, &'static str) {
    match kind {
        ProviderKind::OpenAi => ("OPENAI_API_KEY", "OPENAI_BASE_URL"),
        ProviderKind::Anthropic => ("ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
        ProviderKind::Gemini => ("GOOGLE_API_KEY", "GEMINI_BASE_URL"),
        ProviderKind::DeepSeek => ("DEEPSEEK_API_KEY", "DEEPSEEK_BASE_URL"),
    }
}

fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "https://api.openai.com/v1",
        ProviderKind::Anthropic => "https://api.anthropic.com",
        ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
        ProviderKind::DeepSeek => "https://api.deepseek.com/v1",
    }
}
