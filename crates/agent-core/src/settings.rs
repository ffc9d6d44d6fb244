//! Runtime Settings
//!
//! Process-wide provider/model/temperature selection, changed live from the
//! UI. A turn reads one snapshot at its start; patches apply to later turns.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

use crate::error::{AgentError, Result};
use crate::provider::{GenerationOptions, ProviderKind};

/// Accepted temperature range, inclusive
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Current LLM selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: ProviderKind::OpenAi.default_model().to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl RuntimeSettings {
    /// Load from `LLM_PROVIDER`, `LLM_MODEL` and `LLM_TEMPERATURE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a variable lookup; invalid values fall back to defaults
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let provider = match get("LLM_PROVIDER") {
            Some(raw) => raw.parse().unwrap_or_else(|e: AgentError| {
                tracing::warn!(error = %e, "Ignoring LLM_PROVIDER");
                defaults.provider
            }),
            None => defaults.provider,
        };

        let model = match get("LLM_MODEL") {
            Some(m) if provider.offers_model(m.trim()) => m.trim().to_string(),
            Some(m) => {
                tracing::warn!(model = %m, provider = %provider, "Ignoring LLM_MODEL not offered by provider");
                provider.default_model().to_string()
            }
            None => provider.default_model().to_string(),
        };

        let temperature = match get("LLM_TEMPERATURE") {
            Some(raw) => raw
                .trim()
                .parse::<f32>()
                .map_err(|e| AgentError::InvalidRange(e.to_string()))
                .and_then(check_temperature)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Ignoring LLM_TEMPERATURE");
                    defaults.temperature
                }),
            None => defaults.temperature,
        };

        Self {
            provider,
            model,
            temperature,
        }
    }

    /// Options for provider calls made under this snapshot
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions::new(self.model.clone(), self.temperature)
    }
}

fn check_temperature(value: f32) -> Result<f32> {
    if value.is_finite() && TEMPERATURE_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(AgentError::InvalidRange(format!(
            "temperature must be between {} and {}, got {}",
            TEMPERATURE_RANGE.start(),
            TEMPERATURE_RANGE.end(),
            value
        )))
    }
}

/// Partial update; absent fields keep their current value
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Shared settings cell
#[derive(Debug, Default)]
pub struct SettingsStore {
    inner: RwLock<RuntimeSettings>,
}

impl SettingsStore {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Snapshot of the current settings
    pub fn get(&self) -> RuntimeSettings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and apply a patch. On error nothing changes.
    ///
    /// Switching provider without naming a model selects that provider's
    /// default model.
    pub fn patch(&self, patch: SettingsPatch) -> Result<RuntimeSettings> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let provider = match patch.provider.as_deref() {
            Some(raw) => raw.parse::<ProviderKind>()?,
            None => guard.provider,
        };

        let temperature = match patch.temperature {
            Some(t) => check_temperature(t)?,
            None => guard.temperature,
        };

        let requested_model = patch
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());
        let model = match requested_model {
            Some(m) if provider.offers_model(m) => m.to_string(),
            Some(m) => {
                return Err(AgentError::InvalidModel {
                    provider: provider.to_string(),
                    model: m.to_string(),
                });
            }
            None if provider != guard.provider => provider.default_model().to_string(),
            None => guard.model.clone(),
        };

        *guard = RuntimeSettings {
            provider,
            model,
            temperature,
        };
        tracing::info!(
            provider = %guard.provider,
            model = %guard.model,
            temperature = guard.temperature,
            "Runtime settings updated"
        );
        Ok(guard.clone())
    }
}
