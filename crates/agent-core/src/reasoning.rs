//! Agent Turn Loop
//!
//! One prompt moves through `Classifying → (ToolExecuting → Classifying)* →
//! Answering`, or ends in `Failed`. Every prompt produces exactly one
//! terminal event (`done` or `error`) on the event channel.
//!
//! A prompt of the form `/tool {json}` naming a registered tool skips the
//! provider: the tool runs directly and its output is the answer.
//!
//! Only one turn runs per agent at a time: [`Agent::try_begin`] takes the
//! conversation lock without waiting, so a prompt arriving mid-turn is
//! rejected with `TurnInProgress`.

use futures::StreamExt;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};

use crate::error::{AgentError, Result};
use crate::event::StreamEvent;
use crate::intent;
use crate::message::{Conversation, Message};
use crate::planner;
use crate::provider::{Completion, GenerationOptions, LlmProvider, ProviderRouter};
use crate::session::{SessionId, SessionInfo};
use crate::settings::SettingsStore;
use crate::tool::{ToolCall, ToolRegistry, ToolResult};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System prompt template
    pub system_prompt: String,

    /// Tool calls allowed per turn before answering is forced
    pub max_tool_chain: usize,

    /// Whether to append tool descriptions to system prompt
    pub inject_tool_descriptions: bool,

    /// Ask the provider for a step list before classifying
    pub planning: bool,

    /// End the turn on the first failed tool call
    pub abort_on_tool_error: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_tool_chain: 3,
            inject_tool_descriptions: true,
            planning: false,
            abort_on_tool_error: false,
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant.

Tools may have been run on the user's behalf before you answer; their results
appear in the conversation as tool messages. Use them to answer, and say so
plainly when a tool failed.
Be concise and accurate."#;

#[derive(Clone, Copy, Debug)]
enum TurnState {
    Classifying,
    ToolExecuting,
    Answering,
    Failed,
}

/// The main Agent struct: one conversation, driven one turn at a time
pub struct Agent {
    id: SessionId,
    settings: Arc<SettingsStore>,
    router: Arc<ProviderRouter>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    conversation: Arc<Mutex<Conversation>>,
    info: RwLock<SessionInfo>,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        id: SessionId,
        settings: Arc<SettingsStore>,
        router: Arc<ProviderRouter>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self {
            info: RwLock::new(SessionInfo::new(id.clone())),
            id,
            settings,
            router,
            tools,
            config,
            conversation: Arc::new(Mutex::new(Conversation::new())),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Get configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Session summary as of the last finished turn
    pub fn info(&self) -> SessionInfo {
        let mut info = self
            .info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        info.busy = self.conversation.try_lock().is_err();
        info
    }

    /// Copy of the conversation; waits for a running turn to finish
    pub async fn history(&self) -> Conversation {
        self.conversation.lock().await.clone()
    }

    /// Build the full system prompt including tool descriptions
    fn build_system_prompt(&self) -> String {
        let mut prompt = self.config.system_prompt.clone();

        if self.config.inject_tool_descriptions && !self.tools.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.tools.generate_prompt_section());
        }

        prompt
    }

    /// Claim the conversation for one turn, or fail with `TurnInProgress`
    pub fn try_begin(&self) -> Result<Turn<'_>> {
        let conversation = self
            .conversation
            .clone()
            .try_lock_owned()
            .map_err(|_| AgentError::TurnInProgress)?;
        Ok(Turn {
            agent: self,
            conversation,
        })
    }

    /// Run one prompt, streaming events to `events`.
    ///
    /// Returns the full answer, or the error that ended the turn. Either way
    /// the matching terminal event has already been sent.
    pub async fn chat(&self, prompt: &str, events: &mpsc::Sender<StreamEvent>) -> Result<String> {
        match self.try_begin() {
            Ok(turn) => turn.run(prompt, events).await,
            Err(e) => {
                tracing::debug!(session = %self.id, "Rejected prompt, turn in progress");
                let _ = events.send(StreamEvent::error(&e)).await;
                Err(e)
            }
        }
    }
}

/// Exclusive access to an agent's conversation for the length of one turn
pub struct Turn<'a> {
    agent: &'a Agent,
    conversation: OwnedMutexGuard<Conversation>,
}

impl Turn<'_> {
    /// Drive the turn to its terminal event
    pub async fn run(mut self, prompt: &str, events: &mpsc::Sender<StreamEvent>) -> Result<String> {
        let outcome = self.drive(prompt, events).await;

        match &outcome {
            Ok(_) => {
                let _ = events.send(StreamEvent::Done).await;
            }
            Err(e) => {
                self.transition(TurnState::Failed);
                tracing::warn!(session = %self.agent.id, error = %e, kind = %e.kind(), "Turn failed");
                let _ = events.send(StreamEvent::error(e)).await;
            }
        }

        self.agent
            .info
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh(&self.conversation);
        outcome
    }

    async fn drive(&mut self, prompt: &str, events: &mpsc::Sender<StreamEvent>) -> Result<String> {
        let agent = self.agent;
        let settings = agent.settings.get();
        let options = settings.generation_options();

        if !self.conversation.has_system_prompt() {
            self.conversation.ensure_system_prompt(agent.build_system_prompt());
        }
        self.conversation.push(Message::user(prompt));

        if let Some(command) = intent::parse_slash_command(prompt, &agent.tools.schemas()) {
            return self.run_command(command?, events).await;
        }

        let provider = agent.router.select(settings.provider)?;
        tracing::debug!(
            session = %agent.id,
            provider = %settings.provider,
            model = %settings.model,
            "Turn started"
        );

        let plan = if agent.config.planning {
            self.plan(provider.as_ref(), prompt, &options).await?
        } else {
            None
        };

        self.classify(provider.as_ref(), plan.as_ref(), &options, events)
            .await?;
        self.answer(provider.as_ref(), plan.as_ref(), &options, events)
            .await
    }

    async fn plan(
        &self,
        provider: &dyn LlmProvider,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Option<Message>> {
        let completion = provider
            .complete(&planner::plan_messages(prompt), &[], options)
            .await?;
        let Completion::Answer(text) = completion else {
            return Ok(None);
        };
        let steps = planner::parse_plan(&text);
        tracing::debug!(session = %self.agent.id, steps = steps.len(), "Plan ready");
        Ok((!steps.is_empty()).then(|| planner::plan_note(&steps)))
    }

    /// Classify until the model answers or the chain bound is hit
    async fn classify(
        &mut self,
        provider: &dyn LlmProvider,
        plan: Option<&Message>,
        options: &GenerationOptions,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let max_chain = self.agent.config.max_tool_chain;
        let mut chain = 0;

        loop {
            let schemas = self.agent.tools.schemas();
            if schemas.is_empty() {
                return Ok(());
            }
            if chain >= max_chain {
                tracing::debug!(
                    session = %self.agent.id,
                    error = %AgentError::MaxToolChainExceeded(max_chain),
                    "Forcing answer"
                );
                return Ok(());
            }

            self.transition(TurnState::Classifying);
            let context = self.context(plan);
            let call = match provider.complete(&context, &schemas, options).await? {
                Completion::Answer(_) => return Ok(()),
                Completion::ToolCall(call) => call,
            };

            chain += 1;
            self.transition(TurnState::ToolExecuting);
            let (result, failure) = self.execute(call).await;
            let _ = events.send(StreamEvent::from(&result)).await;

            if let Some(err) = failure {
                if self.agent.config.abort_on_tool_error {
                    return Err(err);
                }
            }
        }
    }

    /// Invoke a tool and record the call and its result together
    async fn execute(&mut self, mut call: ToolCall) -> (ToolResult, Option<AgentError>) {
        let id = call
            .id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();

        let (result, failure) = match self
            .agent
            .tools
            .invoke(&call.name, call.arguments.clone())
            .await
        {
            Ok(result) => (result, None),
            Err(e) => {
                tracing::warn!(session = %self.agent.id, tool = %call.name, error = %e, "Tool call failed");
                (
                    ToolResult::failure(&call.name, call.arguments.clone(), e.to_string()),
                    Some(e),
                )
            }
        };
        let result = result.with_id(Some(id.clone()));

        let content = result.to_context();
        let name = call.name.clone();
        self.conversation.push(Message::assistant_tool_call(call));
        self.conversation.push(Message::tool(content, name, Some(id)));

        (result, failure)
    }

    /// Run a tool the user named; its output is the answer
    async fn run_command(&mut self, call: ToolCall, events: &mpsc::Sender<StreamEvent>) -> Result<String> {
        tracing::debug!(session = %self.agent.id, tool = %call.name, "Direct tool command");
        self.transition(TurnState::ToolExecuting);
        let (result, failure) = self.execute(call).await;
        let _ = events.send(StreamEvent::from(&result)).await;
        if let Some(err) = failure {
            return Err(err);
        }

        self.transition(TurnState::Answering);
        let answer = match &result.output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        if !answer.is_empty() {
            let _ = events.send(StreamEvent::token(answer.clone())).await;
        }
        self.conversation.push(Message::assistant(answer.clone()));
        Ok(answer)
    }

    async fn answer(
        &mut self,
        provider: &dyn LlmProvider,
        plan: Option<&Message>,
        options: &GenerationOptions,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<String> {
        self.transition(TurnState::Answering);
        let context = self.context(plan);
        let mut stream = provider.complete_stream(&context, options).await?;

        let mut answer = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) if chunk.delta.is_empty() => {}
                Ok(chunk) => {
                    answer.push_str(&chunk.delta);
                    let _ = events.send(StreamEvent::token(chunk.delta)).await;
                }
                Err(e) => {
                    if !answer.is_empty() {
                        self.conversation
                            .push(Message::assistant(answer).into_incomplete());
                    }
                    return Err(e);
                }
            }
        }

        self.conversation.push(Message::assistant(answer.clone()));
        Ok(answer)
    }

    /// Conversation as sent to the provider, with the plan note after the
    /// system prompt
    fn context(&self, plan: Option<&Message>) -> Vec<Message> {
        let mut messages = self.conversation.messages().to_vec();
        if let Some(note) = plan {
            let at = usize::from(self.conversation.has_system_prompt());
            messages.insert(at, note.clone());
        }
        messages
    }

    fn transition(&self, state: TurnState) {
        tracing::debug!(session = %self.agent.id, state = ?state, "Turn state");
    }
}
