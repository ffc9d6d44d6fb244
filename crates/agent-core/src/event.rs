//! Stream events sent to the client during a turn

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, ErrorKind};
use crate::tool::ToolResult;

/// One incremental event of a turn.
///
/// Every `Token` precedes the single terminal event (`Done` or `Error`);
/// `Tool` events may come before or between tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        text: String,
    },
    Tool {
        tool: String,
        payload: Value,
        result: Value,
        success: bool,
    },
    Done,
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        StreamEvent::Token { text: text.into() }
    }

    pub fn error(err: &AgentError) -> Self {
        StreamEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

impl From<&ToolResult> for StreamEvent {
    fn from(result: &ToolResult) -> Self {
        StreamEvent::Tool {
            tool: result.name.clone(),
            payload: result.arguments.clone(),
            result: result.output.clone(),
            success: result.success,
        }
    }
}
