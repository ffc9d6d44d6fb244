//! Message Bus
//!
//! In-process topic pub/sub between agents. Each topic is a bounded
//! broadcast channel: delivery is best-effort and at-most-once, messages
//! published before a subscription are not replayed, and a subscriber that
//! falls behind skips what it missed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

use crate::tool::{ToolCall, ToolResult};

/// Default per-topic buffer
pub const DEFAULT_CAPACITY: usize = 64;

/// Topic an agent listens on
pub fn inbox_topic(agent_id: &str) -> String {
    format!("agent:{agent_id}:in")
}

/// Topic an agent answers on
pub fn outbox_topic(agent_id: &str) -> String {
    format!("agent:{agent_id}:out")
}

/// Payload exchanged between agents
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpMessage {
    Text { content: String },
    ToolCall { call: ToolCall },
    ToolResponse { result: ToolResult },
}

/// Envelope carried on a topic
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: String,
    pub from: String,
    pub topic: String,
    pub payload: McpMessage,
    pub sent_at: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(from: impl Into<String>, topic: impl Into<String>, payload: McpMessage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            topic: topic.into(),
            payload,
            sent_at: Utc::now(),
        }
    }
}

/// Topic-keyed broadcast channels
pub struct MessageBus {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Listen on a topic from now on
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Subscription {
            topic: topic.to_string(),
            rx: sender.subscribe(),
        }
    }

    /// Deliver to current subscribers of the message's topic.
    /// Returns how many received it; no subscribers is not an error.
    pub fn publish(&self, message: BusMessage) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = topics.get(&message.topic) else {
            tracing::debug!(topic = %message.topic, "Published to topic with no subscribers");
            return 0;
        };
        sender.send(message).unwrap_or(0)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).map_or(0, broadcast::Sender::receiver_count)
    }

    /// Number of topics with a live channel
    pub fn topic_count(&self) -> usize {
        self.topics.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Remove a topic; its subscribers see the end of the stream once drained
    pub fn close(&self, topic: &str) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics.remove(topic).is_some()
    }

    /// Drop topics nobody listens to anymore
    pub fn prune(&self) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        topics.retain(|_, sender| sender.receiver_count() > 0);
    }
}

/// Receiving end of one topic
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message; `None` once the bus side is gone
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
