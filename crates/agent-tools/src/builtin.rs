//! Built-in tools

use agent_core::error::Result;
use agent_core::tool::{ParamType, ParameterSchema, ToolRegistry, ToolSpec, handler_fn};
use serde_json::Value;

pub const ECHO_TOOL: &str = "echo";

pub fn echo_spec() -> ToolSpec {
    ToolSpec::new(ECHO_TOOL, "Repeat the given text back verbatim.").param(
        ParameterSchema::required("text", ParamType::String, "Text to echo"),
    )
}

/// Register `echo`: returns its `text` argument unchanged
pub fn register_echo(registry: &ToolRegistry) -> Result<()> {
    registry.register(
        echo_spec(),
        handler_fn(|args: Value| async move {
            Ok(args.get("text").cloned().unwrap_or(Value::Null))
        }),
    )
}
