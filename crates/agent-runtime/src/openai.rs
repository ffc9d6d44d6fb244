//! OpenAI-compatible Chat Completions provider
//!
//! Serves both OpenAI and DeepSeek (whose API is wire-compatible). Tool
//! selection uses native function calling: the registry schema is sent as
//! `tools` and the first returned `tool_calls` entry becomes the call.

use agent_core::error::{AgentError, Result};
use agent_core::message::{Message, Role};
use agent_core::provider::{
    Completion, CompletionStream, GenerationOptions, LlmProvider, ProviderKind,
};
use agent_core::tool::{ToolCall, ToolSpec};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::{http, sse};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    /// Null for assistant messages that only carry tool calls
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ToolCallRequest {
    id: String,
    r#type: &'static str,
    function: FunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    /// JSON-encoded arguments
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    r#type: &'static str,
    function: FunctionDef,
}

#[derive(Debug, Serialize)]
struct FunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallResponse>,
}

#[derive(Debug, Deserialize)]
struct ToolCallResponse {
    id: String,
    function: FunctionCall,
}

// ============================================================================
// Provider
// ============================================================================

/// OpenAI-compatible provider (OpenAI, DeepSeek)
pub struct OpenAiCompatProvider {
    kind: ProviderKind,
    config: ProviderConfig,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(kind: ProviderKind, config: ProviderConfig) -> Self {
        Self {
            client: http::build_client(config.timeout),
            kind,
            config,
        }
    }

    pub fn openai(config: ProviderConfig) -> Self {
        Self::new(ProviderKind::OpenAi, config)
    }

    pub fn deepseek(config: ProviderConfig) -> Self {
        Self::new(ProviderKind::DeepSeek, config)
    }

    fn request(&self, messages: &[Message], tools: &[ToolSpec], options: &GenerationOptions, stream: bool) -> ChatRequest {
        let tools = (!tools.is_empty()).then(|| convert_tools(tools));
        ChatRequest {
            model: options.model.clone(),
            messages: convert_messages(messages),
            tool_choice: tools.as_ref().map(|_| "auto"),
            tools,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let key = http::require_key(self.kind, self.config.api_key.as_deref())?;
        tracing::debug!(provider = %self.kind, model = %request.model, stream = request.stream, "Chat request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(key)
            .json(request)
            .send()
            .await
            .map_err(|e| http::request_error(self.kind, &e))?;

        http::check_status(self.kind, response).await
    }
}

/// Convert conversation messages to Chat Completions format
fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };

            let tool_calls = msg.tool_call().map(|call| {
                vec![ToolCallRequest {
                    id: call.id.clone().unwrap_or_default(),
                    r#type: "function",
                    function: FunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                }]
            });

            ChatMessage {
                role,
                content: if msg.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(msg.content.clone())
                },
                tool_calls,
                tool_call_id: msg.tool_call_id().map(str::to_string),
            }
        })
        .collect()
}

fn convert_tools(tools: &[ToolSpec]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|t| ChatTool {
            r#type: "function",
            function: FunctionDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.json_schema(),
            },
        })
        .collect()
}

/// First tool call wins; arguments that are not a JSON object mean no call
fn convert_response(kind: ProviderKind, response: ChatResponse) -> Completion {
    let Some(choice) = response.choices.into_iter().next() else {
        return Completion::Answer(String::new());
    };
    let content = choice.message.content.unwrap_or_default();

    let Some(tc) = choice.message.tool_calls.into_iter().next() else {
        return Completion::Answer(content);
    };
    match serde_json::from_str::<serde_json::Value>(&tc.function.arguments) {
        Ok(args @ serde_json::Value::Object(_)) => {
            Completion::ToolCall(ToolCall::new(tc.function.name, args).with_id(tc.id))
        }
        _ => {
            tracing::warn!(provider = %kind, tool = %tc.function.name, "Ignoring tool call with malformed arguments");
            Completion::Answer(content)
        }
    }
}

/// Text delta of one streamed chunk
fn extract_delta(kind: ProviderKind, data: &str) -> Result<Option<String>> {
    let value = sse::parse_payload(kind, data)?;
    if let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(AgentError::ProviderRequest(format!("{kind} stream error: {message}")));
    }
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
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
        let request = self.request(messages, tools, options, false);
        let response = self.send(&request).await?;
        let body: ChatResponse = http::read_json(self.kind, response).await?;
        Ok(convert_response(self.kind, body))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let request = self.request(messages, &[], options, true);
        let response = self.send(&request).await?;
        let kind = self.kind;
        Ok(sse::deltas(kind, response, move |data| extract_delta(kind, data)))
    }
}
