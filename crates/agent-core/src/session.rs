//! Session identity and summaries
//!
//! A session is one agent with its conversation; it lives as long as the
//! coordinator keeps the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Conversation, Role};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a session for listings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub title: String,
    pub message_count: usize,
    /// A turn is running
    pub busy: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            title: default_title(&id),
            id,
            message_count: 0,
            busy: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh counters and title after a turn
    pub fn refresh(&mut self, conversation: &Conversation) {
        self.message_count = conversation.len();
        self.title = title_for(conversation).unwrap_or_else(|| default_title(&self.id));
        self.updated_at = Utc::now();
    }
}

fn default_title(id: &SessionId) -> String {
    let short: String = id.as_str().chars().take(8).collect();
    format!("Session {short}")
}

/// Title generated from the first user message
fn title_for(conversation: &Conversation) -> Option<String> {
    conversation
        .messages()
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| {
            let preview: String = m.content.chars().take(50).collect();
            if m.content.chars().count() > 50 {
                format!("{preview}...")
            } else {
                preview
            }
        })
}
