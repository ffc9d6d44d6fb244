//! Error Types for Tool Collaborators

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolsError>;

#[derive(Error, Debug)]
pub enum ToolsError {
    #[error("{0} env variable is not set")]
    MissingKey(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{connector} request failed: {message}")]
    Request { connector: String, message: String },

    #[error("{connector} returned {status}: {body}")]
    Status {
        connector: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected {connector} response: {message}")]
    Decode { connector: String, message: String },

    #[error("Unsupported DB action '{0}'; choose add/delete/update/list")]
    UnsupportedAction(String),

    #[error("Unsupported table action '{0}'")]
    UnsupportedTableAction(String),

    #[error("Unsupported column type '{0}'; allowed: integer, text, float, boolean, timestamp, date")]
    UnsupportedType(String),

    #[error("Table '{0}' does not exist")]
    NoSuchTable(String),

    #[error("Column '{column}' does not exist in '{table}'")]
    NoSuchColumn { table: String, column: String },

    #[error("Invalid value for '{column}': {message}")]
    InvalidValue { column: String, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}
