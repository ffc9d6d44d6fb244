//! Google Gemini provider (Generative Language REST API)
//!
//! Like Anthropic, tool selection uses the textual intent classifier.

use agent_core::error::{AgentError, Result};
use agent_core::intent;
use agent_core::message::{Message, Role};
use agent_core::provider::{
    Completion, CompletionStream, GenerationOptions, LlmProvider, ProviderKind,
};
use agent_core::tool::ToolSpec;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::{http, sse};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default()
    }
}

/// Gemini provider
pub struct GeminiProvider {
    config: ProviderConfig,
    client: Client,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: http::build_client(config.timeout),
            config,
        }
    }

    async fn send(&self, method: &str, model: &str, request: &GenerateRequest, sse: bool) -> Result<reqwest::Response> {
        let key = http::require_key(ProviderKind::Gemini, self.config.api_key.as_deref())?;
        tracing::debug!(provider = "gemini", model, method, "Generate request");

        let mut builder = self
            .client
            .post(format!("{}/v1beta/models/{}:{}", self.config.base_url, model, method))
            .header("x-goog-api-key", key)
            .json(request);
        if sse {
            builder = builder.query(&[("alt", "sse")]);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| http::request_error(ProviderKind::Gemini, &e))?;
        http::check_status(ProviderKind::Gemini, response).await
    }

    async fn text(&self, messages: &[Message], options: &GenerationOptions) -> Result<String> {
        let response = self
            .send("generateContent", &options.model, &build_request(messages, options), false)
            .await?;
        let body: GenerateResponse = http::read_json(ProviderKind::Gemini, response).await?;
        Ok(body.text().trim().to_string())
    }
}

fn build_request(messages: &[Message], options: &GenerationOptions) -> GenerateRequest {
    let system: Vec<Part> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| Part {
            text: m.content.clone(),
        })
        .collect();

    let contents = messages
        .iter()
        .filter_map(|m| {
            let (role, text) = match (m.role, m.tool_call()) {
                (Role::System, _) => return None,
                (Role::Assistant, Some(call)) => (
                    "model",
                    format!("(called tool '{}' with {})", call.name, call.arguments),
                ),
                (Role::Assistant, None) => ("model", m.content.clone()),
                (Role::User | Role::Tool, _) => ("user", m.content.clone()),
            };
            (!text.trim().is_empty()).then(|| Content {
                role: Some(role.to_string()),
                parts: vec![Part { text }],
            })
        })
        .collect();

    GenerateRequest {
        contents,
        system_instruction: (!system.is_empty()).then_some(Content {
            role: None,
            parts: system,
        }),
        generation_config: GenerationConfig {
            temperature: options.temperature,
            max_output_tokens: options.max_tokens,
        },
    }
}

fn extract_delta(data: &str) -> Result<Option<String>> {
    let value = sse::parse_payload(ProviderKind::Gemini, data)?;
    if let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(AgentError::ProviderRequest(format!("gemini stream error: {message}")));
    }
    let chunk: GenerateResponse = serde_json::from_value(value).map_err(|e| {
        AgentError::ProviderRequest(format!("undecodable gemini stream event: {e}"))
    })?;
    Ok(Some(chunk.text()).filter(|t| !t.is_empty()))
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        if tools.is_empty() {
            return self.text(messages, options).await.map(Completion::Answer);
        }

        let classifier = GenerationOptions {
            temperature: 0.0,
            ..options.clone()
        };
        let reply = self
            .text(&intent::classification_messages(messages, tools), &classifier)
            .await?;
        Ok(match intent::parse_tool_call(&reply, tools) {
            Some(call) => Completion::ToolCall(call),
            None => Completion::Answer(reply),
        })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let response = self
            .send("streamGenerateContent", &options.model, &build_request(messages, options), true)
            .await?;
        Ok(sse::deltas(ProviderKind::Gemini, response, extract_delta))
    }
}
