//! Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// A tool with this name is already registered
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// Tool not found in registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool arguments do not satisfy the declared schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tool handler failed
    #[error("Tool '{tool}' failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    /// No credential configured for the selected provider
    #[error("Provider '{0}' has no credential configured")]
    ProviderAuth(String),

    /// Transport-level failure talking to the upstream API
    #[error("Provider request failed: {0}")]
    ProviderRequest(String),

    /// Unrecognized provider name
    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    /// Value outside its recognized range
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Model not in the provider's catalog
    #[error("Model '{model}' is not offered by provider '{provider}'")]
    InvalidModel { provider: String, model: String },

    /// A turn is already running for this session
    #[error("A turn is already in progress for this session")]
    TurnInProgress,

    /// Tool chain bound reached (absorbed by the turn loop)
    #[error("Maximum tool chain length ({0}) reached")]
    MaxToolChainExceeded(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

/// Machine-readable error kind, carried by `error` stream events and HTTP
/// error bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "DuplicateToolError")]
    DuplicateTool,
    #[serde(rename = "UnknownToolError")]
    UnknownTool,
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "ToolExecutionError")]
    ToolExecution,
    #[serde(rename = "ProviderAuthError")]
    ProviderAuth,
    #[serde(rename = "ProviderRequestError")]
    ProviderRequest,
    #[serde(rename = "InvalidProviderError")]
    InvalidProvider,
    #[serde(rename = "InvalidRangeError")]
    InvalidRange,
    #[serde(rename = "InvalidModelError")]
    InvalidModel,
    #[serde(rename = "TurnInProgressError")]
    TurnInProgress,
    #[serde(rename = "MaxToolChainExceeded")]
    MaxToolChainExceeded,
    #[serde(rename = "InternalError")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DuplicateTool => "DuplicateToolError",
            ErrorKind::UnknownTool => "UnknownToolError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::ToolExecution => "ToolExecutionError",
            ErrorKind::ProviderAuth => "ProviderAuthError",
            ErrorKind::ProviderRequest => "ProviderRequestError",
            ErrorKind::InvalidProvider => "InvalidProviderError",
            ErrorKind::InvalidRange => "InvalidRangeError",
            ErrorKind::InvalidModel => "InvalidModelError",
            ErrorKind::TurnInProgress => "TurnInProgressError",
            ErrorKind::MaxToolChainExceeded => "MaxToolChainExceeded",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AgentError {
    /// Wrap a handler failure for `tool`
    pub fn tool_execution(tool: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        AgentError::ToolExecution {
            tool: tool.into(),
            source: source.into(),
        }
    }

    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::DuplicateTool(_) => ErrorKind::DuplicateTool,
            AgentError::UnknownTool(_) => ErrorKind::UnknownTool,
            AgentError::Validation(_) => ErrorKind::Validation,
            AgentError::ToolExecution { .. } => ErrorKind::ToolExecution,
            AgentError::ProviderAuth(_) => ErrorKind::ProviderAuth,
            AgentError::ProviderRequest(_) => ErrorKind::ProviderRequest,
            AgentError::InvalidProvider(_) => ErrorKind::InvalidProvider,
            AgentError::InvalidRange(_) => ErrorKind::InvalidRange,
            AgentError::InvalidModel { .. } => ErrorKind::InvalidModel,
            AgentError::TurnInProgress => ErrorKind::TurnInProgress,
            AgentError::MaxToolChainExceeded(_) => ErrorKind::MaxToolChainExceeded,
            AgentError::Config(_) | AgentError::Json(_) | AgentError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderRequest(_) | AgentError::TurnInProgress
        )
    }

    /// Settings validation failures (reported as request errors, not turn errors)
    pub fn is_settings_error(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidProvider(_)
                | AgentError::InvalidRange(_)
                | AgentError::InvalidModel { .. }
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::ProviderRequest(msg) => {
                format!("The AI service could not be reached: {}", msg)
            }
            AgentError::ProviderAuth(provider) => format!(
                "No API key is configured for '{}'. Pick another provider or set its key.",
                provider
            ),
            AgentError::UnknownTool(name) => format!("The tool '{}' is not available.", name),
            AgentError::Validation(msg) => format!("Invalid input: {}", msg),
            AgentError::ToolExecution { tool, source } => format!("Tool '{}' error: {}", tool, source),
            AgentError::TurnInProgress => {
                "Still working on the previous message. Please wait for it to finish.".into()
            }
            AgentError::InvalidProvider(_)
            | AgentError::InvalidRange(_)
            | AgentError::InvalidModel { .. } => self.to_string(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}
