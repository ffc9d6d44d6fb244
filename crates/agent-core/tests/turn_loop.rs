//! Full turns driven against scripted providers.

use agent_core::error::{AgentError, ErrorKind};
use agent_core::intent;
use agent_core::message::Role;
use agent_core::provider::{CompletionStream, StreamChunk};
use agent_core::tool::{ParamType, ParameterSchema, handler_fn};
use agent_core::{
    Agent, AgentConfig, Completion, GenerationOptions, LlmProvider, Message, ProviderKind,
    ProviderRouter, SessionId, SettingsPatch, SettingsStore, StreamEvent, ToolCall, ToolRegistry,
    ToolSpec,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};

type Chunks = Vec<agent_core::Result<StreamChunk>>;

/// Provider replaying queued classifications and answer streams
struct Scripted {
    kind: ProviderKind,
    configured: bool,
    classifications: Mutex<VecDeque<agent_core::Result<Completion>>>,
    streams: Mutex<VecDeque<Chunks>>,
    contexts: Mutex<Vec<Vec<Message>>>,
    models: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
}

impl Scripted {
    fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            configured: true,
            classifications: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            contexts: Mutex::new(Vec::new()),
            models: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn classify(self, completion: Completion) -> Self {
        self.classifications.lock().unwrap().push_back(Ok(completion));
        self
    }

    fn classify_err(self, err: AgentError) -> Self {
        self.classifications.lock().unwrap().push_back(Err(err));
        self
    }

    fn stream(self, chunks: Chunks) -> Self {
        self.streams.lock().unwrap().push_back(chunks);
        self
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

fn text(delta: &str) -> agent_core::Result<StreamChunk> {
    Ok(StreamChunk::new(delta))
}

#[async_trait]
impl LlmProvider for Scripted {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
        options: &GenerationOptions,
    ) -> agent_core::Result<Completion> {
        self.contexts.lock().unwrap().push(messages.to_vec());
        self.models.lock().unwrap().push(options.model.clone());
        self.classifications
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Completion::Answer(String::new())))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> agent_core::Result<CompletionStream> {
        self.contexts.lock().unwrap().push(messages.to_vec());
        self.models.lock().unwrap().push(options.model.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let chunks = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![text("fallback")]);
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

fn echo_registry() -> Arc<ToolRegistry> {
    let tools = ToolRegistry::new();
    tools
        .register(
            ToolSpec::new("echo", "Returns the text it receives").param(ParameterSchema::required(
                "text",
                ParamType::String,
                "Text to echo",
            )),
            handler_fn(|args: Value| async move { Ok(args["text"].clone()) }),
        )
        .unwrap();
    Arc::new(tools)
}

fn agent_with(
    router: ProviderRouter,
    tools: Arc<ToolRegistry>,
    settings: Arc<SettingsStore>,
    config: AgentConfig,
) -> Arc<Agent> {
    Arc::new(Agent::new(
        SessionId::new(),
        settings,
        Arc::new(router),
        tools,
        config,
    ))
}

fn agent(provider: Arc<Scripted>) -> Arc<Agent> {
    agent_with(
        ProviderRouter::new().with_provider(provider),
        echo_registry(),
        Arc::new(SettingsStore::default()),
        AgentConfig::default(),
    )
}

async fn run(agent: &Agent, prompt: &str) -> (agent_core::Result<String>, Vec<StreamEvent>) {
    let (tx, mut rx) = mpsc::channel(128);
    let result = agent.chat(prompt, &tx).await;
    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

fn assert_single_terminal_last(events: &[StreamEvent]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {events:?}");
    assert!(events.last().is_some_and(StreamEvent::is_terminal));
}

#[tokio::test]
async fn test_plain_answer_streams_tokens_then_done() {
    let provider = Arc::new(
        Scripted::new(ProviderKind::OpenAi).stream(vec![text("Hel"), text("lo")]),
    );
    let agent = agent(provider);

    let (result, events) = run(&agent, "hello").await;
    assert_eq!(result.unwrap(), "Hello");
    assert_eq!(
        events,
        vec![StreamEvent::token("Hel"), StreamEvent::token("lo"), StreamEvent::Done]
    );

    let history = agent.history().await;
    assert_eq!(history.messages()[0].role, Role::System);
    assert_eq!(history.last().unwrap().content, "Hello");
}

#[tokio::test]
async fn test_echo_tool_event_precedes_tokens() {
    let provider = Arc::new(
        Scripted::new(ProviderKind::OpenAi)
            .classify(Completion::ToolCall(ToolCall::new("echo", json!({"text": "hi"}))))
            .classify(Completion::Answer(String::new()))
            .stream(vec![text("You said "), text("hi")]),
    );
    let agent = agent(provider.clone());

    let (result, events) = run(&agent, "echo hi").await;
    assert_eq!(result.unwrap(), "You said hi");
    assert_eq!(
        events[0],
        StreamEvent::Tool {
            tool: "echo".into(),
            payload: json!({"text": "hi"}),
            result: json!("hi"),
            success: true,
        }
    );
    assert!(matches!(events[1], StreamEvent::Token { .. }));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
    assert_single_terminal_last(&events);

    // the answering call sees the tool result
    let contexts = provider.contexts.lock().unwrap();
    let answering = contexts.last().unwrap();
    assert!(answering.iter().any(|m| m.role == Role::Tool && m.content.contains("hi")));
}

#[tokio::test]
async fn test_tool_chain_over_bound_still_finishes() {
    let mut scripted = Scripted::new(ProviderKind::OpenAi);
    for _ in 0..10 {
        scripted = scripted.classify(Completion::ToolCall(ToolCall::new("echo", json!({"text": "again"}))));
    }
    let provider = Arc::new(scripted.stream(vec![text("enough")]));
    let agent = agent(provider.clone());

    let (result, events) = run(&agent, "loop forever").await;
    assert_eq!(result.unwrap(), "enough");

    let tool_events = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Tool { .. }))
        .count();
    assert_eq!(tool_events, 3);
    assert_single_terminal_last(&events);
    assert_eq!(events.last(), Some(&StreamEvent::Done));
    // 3 classifications + 1 answer
    assert_eq!(provider.contexts.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_unknown_and_invalid_tool_calls_are_reported_not_fatal() {
    let provider = Arc::new(
        Scripted::new(ProviderKind::OpenAi)
            .classify(Completion::ToolCall(ToolCall::new("nope", json!({}))))
            .classify(Completion::ToolCall(ToolCall::new("echo", json!({}))))
            .classify(Completion::Answer(String::new()))
            .stream(vec![text("sorry")]),
    );
    let agent = agent(provider);

    let (result, events) = run(&agent, "do things").await;
    assert!(result.is_ok());

    let failures: Vec<&Value> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Tool { success: false, result, .. } => Some(result),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 2);
    assert!(failures[0]["error"].as_str().unwrap().contains("Unknown tool"));
    assert!(failures[1]["error"].as_str().unwrap().contains("Validation"));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
}

#[tokio::test]
async fn test_back_to_back_prompts_reject_the_second() {
    let gate = Arc::new(Notify::new());
    let provider = Arc::new(
        Scripted::new(ProviderKind::OpenAi)
            .gated(gate.clone())
            .stream(vec![text("first answer")]),
    );
    let agent = agent(provider);

    let (tx, mut rx) = mpsc::channel(32);
    let first = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.chat("first", &tx).await })
    };

    while !agent.info().busy {
        tokio::task::yield_now().await;
    }

    let (second, events) = run(&agent, "second").await;
    assert!(matches!(second, Err(AgentError::TurnInProgress)));
    assert!(matches!(
        events.as_slice(),
        [StreamEvent::Error { kind: ErrorKind::TurnInProgress, .. }]
    ));

    gate.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), "first answer");
    let mut first_events = Vec::new();
    while let Some(event) = rx.recv().await {
        first_events.push(event);
    }
    assert_eq!(first_events.last(), Some(&StreamEvent::Done));

    // the rejected prompt never entered the conversation
    let history = agent.history().await;
    assert!(!history.messages().iter().any(|m| m.content == "second"));
}

#[tokio::test]
async fn test_stream_failure_emits_one_error_and_next_turn_succeeds() {
    let provider = Arc::new(
        Scripted::new(ProviderKind::OpenAi)
            .stream(vec![
                text("par"),
                Err(AgentError::ProviderRequest("timeout".into())),
            ])
            .stream(vec![text("recovered")]),
    );
    let agent = agent(provider);

    let (result, events) = run(&agent, "first").await;
    assert!(matches!(result, Err(AgentError::ProviderRequest(_))));
    assert_eq!(events[0], StreamEvent::token("par"));
    assert!(matches!(
        events[1],
        StreamEvent::Error { kind: ErrorKind::ProviderRequest, .. }
    ));
    assert_eq!(events.len(), 2);

    let history = agent.history().await;
    let last = history.last().unwrap();
    assert_eq!(last.content, "par");
    assert!(last.is_incomplete());

    let (result, events) = run(&agent, "second").await;
    assert_eq!(result.unwrap(), "recovered");
    assert_eq!(events.last(), Some(&StreamEvent::Done));
}

#[tokio::test]
async fn test_classification_failure_is_a_single_error() {
    let provider = Arc::new(
        Scripted::new(ProviderKind::OpenAi)
            .classify_err(AgentError::ProviderRequest("connection refused".into())),
    );
    let agent = agent(provider);

    let (_, events) = run(&agent, "hi").await;
    assert!(matches!(
        events.as_slice(),
        [StreamEvent::Error { kind: ErrorKind::ProviderRequest, .. }]
    ));
}

#[tokio::test]
async fn test_missing_credentials_fail_with_provider_auth() {
    let provider = Arc::new(Scripted::new(ProviderKind::OpenAi).unconfigured());
    let agent = agent(provider);

    let (result, events) = run(&agent, "hi").await;
    assert!(matches!(result, Err(AgentError::ProviderAuth(_))));
    assert!(matches!(
        events.as_slice(),
        [StreamEvent::Error { kind: ErrorKind::ProviderAuth, .. }]
    ));
}

#[tokio::test]
async fn test_settings_changes_apply_to_the_next_turn() {
    let openai = Arc::new(Scripted::new(ProviderKind::OpenAi).stream(vec![text("from openai")]));
    let claude = Arc::new(Scripted::new(ProviderKind::Anthropic).stream(vec![text("from claude")]));
    let settings = Arc::new(SettingsStore::default());
    let agent = agent_with(
        ProviderRouter::new()
            .with_provider(openai)
            .with_provider(claude.clone()),
        echo_registry(),
        settings.clone(),
        AgentConfig::default(),
    );

    let (result, _) = run(&agent, "one").await;
    assert_eq!(result.unwrap(), "from openai");

    settings
        .patch(SettingsPatch {
            provider: Some("anthropic".into()),
            ..Default::default()
        })
        .unwrap();

    let (result, _) = run(&agent, "two").await;
    assert_eq!(result.unwrap(), "from claude");
    assert!(
        claude
            .models
            .lock()
            .unwrap()
            .iter()
            .all(|m| m == ProviderKind::Anthropic.default_model())
    );
}

#[tokio::test]
async fn test_patch_during_turn_applies_to_next_turn() {
    let gate = Arc::new(Notify::new());
    let openai = Arc::new(
        Scripted::new(ProviderKind::OpenAi)
            .gated(gate.clone())
            .stream(vec![text("from openai")]),
    );
    let claude = Arc::new(Scripted::new(ProviderKind::Anthropic).stream(vec![text("from claude")]));
    let settings = Arc::new(SettingsStore::default());
    let agent = agent_with(
        ProviderRouter::new()
            .with_provider(openai.clone())
            .with_provider(claude.clone()),
        echo_registry(),
        settings.clone(),
        AgentConfig::default(),
    );

    let first = {
        let agent = agent.clone();
        tokio::spawn(async move { run(&agent, "one").await })
    };

    // classification done, answer stream parked on the gate
    while openai.models().len() < 2 {
        tokio::task::yield_now().await;
    }
    let patched = settings
        .patch(SettingsPatch {
            provider: Some("anthropic".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(patched.model, ProviderKind::Anthropic.default_model());
    gate.notify_one();

    let (result, events) = first.await.unwrap();
    assert_eq!(result.unwrap(), "from openai");
    assert_eq!(events.last(), Some(&StreamEvent::Done));
    assert_eq!(
        openai.models(),
        vec![ProviderKind::OpenAi.default_model().to_string(); 2]
    );
    assert!(claude.models().is_empty());

    let (result, _) = run(&agent, "two").await;
    assert_eq!(result.unwrap(), "from claude");
    assert_eq!(openai.models().len(), 2);
    assert!(!claude.models().is_empty());
    assert!(
        claude
            .models()
            .iter()
            .all(|m| m == ProviderKind::Anthropic.default_model())
    );
}

#[tokio::test]
async fn test_slash_command_runs_tool_without_provider() {
    let provider = Arc::new(Scripted::new(ProviderKind::OpenAi).unconfigured());
    let agent = agent(provider.clone());

    let (result, events) = run(&agent, r#"/echo {"text": "hi"}"#).await;
    assert_eq!(result.unwrap(), "hi");
    assert_eq!(
        events,
        vec![
            StreamEvent::Tool {
                tool: "echo".into(),
                payload: json!({"text": "hi"}),
                result: json!("hi"),
                success: true,
            },
            StreamEvent::token("hi"),
            StreamEvent::Done,
        ]
    );

    let (result, _) = run(&agent, "/echo plain words").await;
    assert_eq!(result.unwrap(), "plain words");
    assert!(provider.models().is_empty());

    let history = agent.history().await;
    let roles: Vec<Role> = history.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
        ]
    );
}

#[tokio::test]
async fn test_slash_command_failure_and_unknown_name() {
    let provider = Arc::new(Scripted::new(ProviderKind::OpenAi).stream(vec![text("classified")]));
    let agent = agent(provider.clone());

    let (result, events) = run(&agent, r#"/echo {"text": 5}"#).await;
    assert!(matches!(result, Err(AgentError::Validation(_))));
    assert!(matches!(
        events.as_slice(),
        [
            StreamEvent::Tool { success: false, .. },
            StreamEvent::Error { kind: ErrorKind::Validation, .. }
        ]
    ));
    assert_single_terminal_last(&events);

    // not a registered tool: classified and answered as usual
    let (result, events) = run(&agent, "/etc/hosts is missing").await;
    assert_eq!(result.unwrap(), "classified");
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Tool { .. })));
    assert_eq!(provider.models().len(), 2);
}

/// Textual backend: classifies by parsing its own reply
struct Textual {
    reply: String,
}

#[async_trait]
impl LlmProvider for Textual {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        _messages: &[Message],
        tools: &[ToolSpec],
        _options: &GenerationOptions,
    ) -> agent_core::Result<Completion> {
        Ok(intent::parse_tool_call(&self.reply, tools)
            .map_or_else(|| Completion::Answer(self.reply.clone()), Completion::ToolCall))
    }

    async fn complete_stream(
        &self,
        _messages: &[Message],
        _options: &GenerationOptions,
    ) -> agent_core::Result<CompletionStream> {
        Ok(Box::pin(futures::stream::iter(vec![text("answer")])))
    }
}

#[tokio::test]
async fn test_malformed_classifier_output_is_a_plain_answer() {
    let settings = Arc::new(SettingsStore::default());
    settings
        .patch(SettingsPatch {
            provider: Some("gemini".into()),
            ..Default::default()
        })
        .unwrap();
    let agent = agent_with(
        ProviderRouter::new().with_provider(Arc::new(Textual {
            reply: r#"{"tool": "echo", "args": "#.into(),
        })),
        echo_registry(),
        settings,
        AgentConfig::default(),
    );

    let (result, events) = run(&agent, "echo hi").await;
    assert_eq!(result.unwrap(), "answer");
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Tool { .. })));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
}

#[tokio::test]
async fn test_planning_adds_a_note_for_the_turn_only() {
    let provider = Arc::new(
        Scripted::new(ProviderKind::OpenAi)
            .classify(Completion::Answer("- greet\n- answer".into()))
            .classify(Completion::Answer(String::new()))
            .stream(vec![text("hi")]),
    );
    let agent = agent_with(
        ProviderRouter::new().with_provider(provider.clone()),
        echo_registry(),
        Arc::new(SettingsStore::default()),
        AgentConfig {
            planning: true,
            ..Default::default()
        },
    );

    let (result, _) = run(&agent, "hello").await;
    assert_eq!(result.unwrap(), "hi");

    let answering = provider.contexts.lock().unwrap().last().cloned().unwrap();
    assert_eq!(answering[1].role, Role::System);
    assert_eq!(answering[1].content, "Plan for this request:\n1. greet\n2. answer");

    let history = agent.history().await;
    assert!(!history.messages().iter().any(|m| m.content.starts_with("Plan for")));
}
