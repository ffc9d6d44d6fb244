//! Coordinator
//!
//! Owns the shared pieces (settings, providers, tools, bus) and the set of
//! live agents, one per session. Each agent also listens on its bus inbox
//! (`agent:{id}:in`) and answers tool calls from other agents on its outbox
//! (`agent:{id}:out`).

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;

use crate::bus::{BusMessage, McpMessage, MessageBus, inbox_topic, outbox_topic};
use crate::provider::ProviderRouter;
use crate::reasoning::{Agent, AgentConfig};
use crate::session::{SessionId, SessionInfo};
use crate::settings::SettingsStore;
use crate::tool::{ToolRegistry, ToolResult};

struct AgentHandle {
    agent: Arc<Agent>,
    inbox: JoinHandle<()>,
}

/// Creates and tracks agents
pub struct Coordinator {
    settings: Arc<SettingsStore>,
    router: Arc<ProviderRouter>,
    tools: Arc<ToolRegistry>,
    bus: Arc<MessageBus>,
    config: AgentConfig,
    agents: RwLock<HashMap<SessionId, AgentHandle>>,
}

impl Coordinator {
    pub fn new(
        settings: Arc<SettingsStore>,
        router: Arc<ProviderRouter>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self {
            settings,
            router,
            tools,
            bus: Arc::new(MessageBus::default()),
            config,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Start a new agent with a fresh session id
    pub fn create_agent(&self) -> Arc<Agent> {
        self.spawn_agent(SessionId::new())
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Agent>> {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        agents.get(id).map(|h| h.agent.clone())
    }

    /// Agent for `id`, created on first use; a new session when `id` is absent
    pub fn get_or_create(&self, id: Option<&str>) -> Arc<Agent> {
        match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => {
                let id = SessionId::from_string(raw);
                self.get(&id).unwrap_or_else(|| self.spawn_agent(id))
            }
            None => self.create_agent(),
        }
    }

    /// Stop an agent; its conversation and bus topics are discarded
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = {
            let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
            agents.remove(id)
        };
        let Some(handle) = removed else {
            return false;
        };
        handle.inbox.abort();
        self.bus.close(&inbox_topic(id.as_str()));
        self.bus.prune();
        tracing::info!(session = %id, "Agent removed");
        true
    }

    pub fn list_agents(&self) -> Vec<SessionInfo> {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<SessionInfo> = agents.values().map(|h| h.agent.info()).collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Publish to every agent's inbox; returns total deliveries
    pub fn broadcast(&self, payload: McpMessage) -> usize {
        let ids: Vec<SessionId> = {
            let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
            agents.keys().cloned().collect()
        };
        ids.iter()
            .map(|id| {
                self.bus.publish(BusMessage::new(
                    "coordinator",
                    inbox_topic(id.as_str()),
                    payload.clone(),
                ))
            })
            .sum()
    }

    /// Publish to one agent's inbox
    pub fn send(&self, from: &str, to: &SessionId, payload: McpMessage) -> usize {
        self.bus
            .publish(BusMessage::new(from, inbox_topic(to.as_str()), payload))
    }

    fn spawn_agent(&self, id: SessionId) -> Arc<Agent> {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        // lost a creation race: keep the first
        if let Some(existing) = agents.get(&id) {
            return existing.agent.clone();
        }

        let agent = Arc::new(Agent::new(
            id.clone(),
            self.settings.clone(),
            self.router.clone(),
            self.tools.clone(),
            self.config.clone(),
        ));
        let inbox = self.spawn_inbox(&id);
        agents.insert(
            id.clone(),
            AgentHandle {
                agent: agent.clone(),
                inbox,
            },
        );
        tracing::info!(session = %id, "Agent created");
        agent
    }

    fn spawn_inbox(&self, id: &SessionId) -> JoinHandle<()> {
        // subscribe before returning so nothing sent after creation is missed
        let mut inbox = self.bus.subscribe(&inbox_topic(id.as_str()));
        let outbox = outbox_topic(id.as_str());
        let bus = self.bus.clone();
        let tools = self.tools.clone();
        let agent_id = id.to_string();

        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let Some(reply) = handle_mcp_message(&tools, message.payload).await else {
                    continue;
                };
                bus.publish(BusMessage::new(agent_id.clone(), outbox.clone(), reply));
            }
        })
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let agents = self.agents.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in agents.values() {
            handle.inbox.abort();
        }
    }
}

/// Answer a bus message: run tool calls, echo text, ignore responses
async fn handle_mcp_message(tools: &ToolRegistry, payload: McpMessage) -> Option<McpMessage> {
    match payload {
        McpMessage::ToolCall { call } => {
            let result = match tools.invoke(&call.name, call.arguments.clone()).await {
                Ok(result) => result,
                Err(e) => ToolResult::failure(&call.name, call.arguments.clone(), e.to_string()),
            };
            Some(McpMessage::ToolResponse {
                result: result.with_id(call.id),
            })
        }
        McpMessage::Text { content } => Some(McpMessage::Text {
            content: format!("Echo: {content}"),
        }),
        McpMessage::ToolResponse { .. } => None,
    }
}
