//! # agent-core
//!
//! Core agent logic: provider-agnostic LLM abstraction, a runtime tool
//! registry, live settings, and the turn loop that streams answers back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Coordinator                             │
//! │   SettingsStore   ProviderRouter   ToolRegistry   MessageBus     │
//! │        │                │               │             │          │
//! │  ┌─────▼────────────────▼───────────────▼─────┐  agent:{id}:in   │
//! │  │ Agent (one per session)                    │◄─────────────────│
//! │  │  Classifying → ToolExecuting → Answering   │  agent:{id}:out  │
//! │  └──────────────────┬─────────────────────────┘─────────────────►│
//! └─────────────────────┼────────────────────────────────────────────┘
//!                       ▼
//!            StreamEvent: token* / tool* → done | error
//! ```
//!
//! The `LlmProvider` trait lets OpenAI, Anthropic, Gemini and DeepSeek be
//! swapped per turn without changing agent logic.

pub mod bus;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod intent;
pub mod message;
pub mod planner;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod settings;
pub mod tool;

pub use coordinator::Coordinator;
pub use error::{AgentError, ErrorKind, Result};
pub use event::StreamEvent;
pub use message::{Conversation, Message, Role};
pub use provider::{Completion, GenerationOptions, LlmProvider, ProviderKind, ProviderRouter};
pub use reasoning::{Agent, AgentConfig};
pub use session::{SessionId, SessionInfo};
pub use settings::{RuntimeSettings, SettingsPatch, SettingsStore};
pub use tool::{ToolBackend, ToolCall, ToolHandler, ToolRegistry, ToolResult, ToolSpec};
