//! Anthropic Messages API provider
//!
//! Tool selection goes through the textual intent classifier: the model is
//! asked for a `{"tool": .., "args": ..}` object and the reply is parsed by
//! `agent_core::intent`.

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

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Claude provider
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: http::build_client(config.timeout),
            config,
        }
    }

    async fn send(&self, request: &MessagesRequest) -> Result<reqwest::Response> {
        let key = http::require_key(ProviderKind::Anthropic, self.config.api_key.as_deref())?;
        tracing::debug!(provider = "anthropic", model = %request.model, stream = request.stream, "Messages request");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| http::request_error(ProviderKind::Anthropic, &e))?;

        http::check_status(ProviderKind::Anthropic, response).await
    }

    async fn text(&self, messages: &[Message], options: &GenerationOptions) -> Result<String> {
        let response = self.send(&build_request(messages, options, false)).await?;
        let body: MessagesResponse = http::read_json(ProviderKind::Anthropic, response).await?;
        Ok(body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<String>()
            .trim()
            .to_string())
    }
}

/// System messages go in the `system` field; tool turns are replayed as text
fn build_request(messages: &[Message], options: &GenerationOptions, stream: bool) -> MessagesRequest {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let messages = messages
        .iter()
        .filter_map(|m| {
            let (role, content) = match (m.role, m.tool_call()) {
                (Role::System, _) => return None,
                (Role::Assistant, Some(call)) => (
                    "assistant",
                    format!("(called tool '{}' with {})", call.name, call.arguments),
                ),
                (Role::Assistant, None) => ("assistant", m.content.clone()),
                (Role::User | Role::Tool, _) => ("user", m.content.clone()),
            };
            (!content.trim().is_empty()).then_some(ApiMessage { role, content })
        })
        .collect();

    MessagesRequest {
        model: options.model.clone(),
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        messages,
        max_tokens: options.max_tokens,
        temperature: options.temperature,
        stream,
    }
}

fn extract_delta(data: &str) -> Result<Option<String>> {
    let value = sse::parse_payload(ProviderKind::Anthropic, data)?;
    match value.get("type").and_then(|t| t.as_str()) {
        Some("content_block_delta") => Ok(value
            .pointer("/delta/text")
            .and_then(|t| t.as_str())
            .map(str::to_string)),
        Some("error") => {
            let message = value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            Err(AgentError::ProviderRequest(format!("anthropic stream error: {message}")))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
        let response = self.send(&build_request(messages, options, true)).await?;
        Ok(sse::deltas(ProviderKind::Anthropic, response, extract_delta))
    }
}
