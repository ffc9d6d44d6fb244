//! Textual intent classification
//!
//! Backends without native function calling are asked to reply with a small
//! JSON object naming a tool. This module builds that request and is the one
//! place its reply gets parsed. Parsing never fails: anything that is not a
//! clean call to a known tool means "answer directly".
//!
//! Users can also skip classification and name a tool themselves with a
//! slash command, `/name {json}`.

use serde_json::{Map, Value};

use crate::error::{AgentError, Result};
use crate::message::{Message, Role};
use crate::tool::{ParamType, ToolCall, ToolSpec};

pub const CLASSIFIER_PROMPT: &str = "You are an intent classifier. Return ONLY valid JSON with keys \
'tool' and 'args'. If no tool applies, use {\"tool\": \"none\", \"args\": {}}.";

/// Messages asking the model to pick a tool for the latest user request
pub fn classification_messages(conversation: &[Message], tools: &[ToolSpec]) -> Vec<Message> {
    let tool_list = tools
        .iter()
        .map(|t| {
            let params: Vec<&str> = t.parameters.iter().map(|p| p.name.as_str()).collect();
            format!("- {}: {} params={:?}", t.name, t.description, params)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let transcript = conversation
        .iter()
        .filter(|m| m.role != Role::System && !m.content.is_empty())
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    vec![
        Message::system(CLASSIFIER_PROMPT),
        Message::user(format!(
            "TOOLS AVAILABLE:\n{tool_list}\n\nConversation so far:\n{transcript}\n\n\
             Pick a tool only if the last user request still needs one. Respond with JSON only."
        )),
    ]
}

/// Parse a classifier reply into a call to one of `tools`
pub fn parse_tool_call(content: &str, tools: &[ToolSpec]) -> Option<ToolCall> {
    let value = extract_json(content)?;
    let obj = value.as_object()?;

    let name = obj
        .get("tool")
        .or_else(|| obj.get("name"))
        .and_then(Value::as_str)?
        .trim();
    if name.is_empty() || name.eq_ignore_ascii_case("none") {
        return None;
    }
    let Some(spec) = tools.iter().find(|t| t.name == name) else {
        tracing::debug!(tool = name, "Classifier named an unknown tool");
        return None;
    };

    let arguments = match obj.get("args").or_else(|| obj.get("arguments")) {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(args @ Value::Object(_)) => args.clone(),
        Some(_) => return None,
    };
    if let Err(e) = spec.validate(&arguments) {
        tracing::debug!(tool = name, error = %e, "Classifier arguments rejected");
        return None;
    }

    Some(ToolCall::new(name, arguments).with_id(uuid::Uuid::new_v4().to_string()))
}

/// Parse `/name {json}` or `/name some text` into a direct call.
///
/// `None` unless the prompt starts with `/` and a registered tool name, so
/// other prompts starting with a slash are classified as usual. Plain text
/// fills the tool's only required string parameter; otherwise arguments
/// must be a JSON object.
pub fn parse_slash_command(prompt: &str, tools: &[ToolSpec]) -> Option<Result<ToolCall>> {
    let rest = prompt.trim_start().strip_prefix('/')?;
    let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let spec = tools.iter().find(|t| t.name == name)?;

    let args = args.trim();
    let arguments = if args.is_empty() {
        Value::Object(Map::new())
    } else {
        match (serde_json::from_str::<Value>(args), single_text_param(spec)) {
            (Ok(value @ Value::Object(_)), _) => value,
            (_, Some(param)) => {
                let mut map = Map::new();
                map.insert(param.to_string(), Value::String(args.to_string()));
                Value::Object(map)
            }
            (_, None) => {
                return Some(Err(AgentError::Validation(format!(
                    "arguments for /{name} must be a JSON object"
                ))));
            }
        }
    };
    Some(Ok(ToolCall::new(name, arguments)))
}

fn single_text_param(spec: &ToolSpec) -> Option<&str> {
    let mut required = spec.parameters.iter().filter(|p| p.required);
    match (required.next(), required.next()) {
        (Some(param), None) if param.param_type == ParamType::String => Some(param.name.as_str()),
        _ => None,
    }
}

fn extract_json(content: &str) -> Option<Value> {
    // fenced block first: ```json / ```tool / ```
    if let Some(start_idx) = content.find("```") {
        let after_marker = &content[start_idx + 3..];
        let body_start = after_marker.find('\n').unwrap_or(0);
        let body = &after_marker[body_start..];
        if let Some(end_idx) = body.find("```") {
            if let Ok(value) = serde_json::from_str(body[..end_idx].trim()) {
                return Some(value);
            }
        }
    }

    if let Ok(value) = serde_json::from_str(content.trim()) {
        return Some(value);
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}
