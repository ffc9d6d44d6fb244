//! Tool System
//!
//! Tools are declared once as a [`ToolSpec`] and registered with a handler.
//! The same spec produces the function-calling schema handed to the model
//! and validates the arguments the model sends back. Tools are registered at
//! runtime (also while agents are running) and invoked by the turn loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::error::{AgentError, Result};

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    pub name: String,

    /// Arguments (a JSON object when well-formed)
    #[serde(default = "empty_object")]
    pub arguments: Value,

    /// Optional call ID for tracking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Result from tool execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was called
    pub name: String,

    /// Call ID (if provided in request)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Arguments the tool was called with
    pub arguments: Value,

    /// Whether execution succeeded
    pub success: bool,

    /// Result payload, or a description of the error
    pub output: Value,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, arguments: Value, output: Value) -> Self {
        Self {
            name: name.into(),
            id: None,
            arguments,
            success: true,
            output,
        }
    }

    pub fn failure(name: impl Into<String>, arguments: Value, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            arguments,
            success: false,
            output: json!({ "error": error.into() }),
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    /// Text appended to the conversation as the tool turn
    pub fn to_context(&self) -> String {
        if self.success {
            format!("[Tool '{}' returned]\n{}", self.name, render_output(&self.output))
        } else {
            format!("[Tool '{}' failed]\n{}", self.name, render_output(&self.output))
        }
    }
}

/// JSON type of a tool parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    /// Lenient parse of a JSON Schema type name; unknown names map to string
    pub fn from_schema_name(name: &str) -> Self {
        match name {
            "integer" | "int" => ParamType::Integer,
            "number" | "float" => ParamType::Number,
            "boolean" | "bool" => ParamType::Boolean,
            "object" => ParamType::Object,
            "array" => ParamType::Array,
            _ => ParamType::String,
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON type
    #[serde(rename = "type")]
    pub param_type: ParamType,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Tool definition (name unique within a registry)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    #[serde(default)]
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParameterSchema) -> Self {
        self.parameters.push(param);
        self
    }

    /// Build a spec from a JSON Schema object (`properties` + `required`)
    pub fn from_json_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: &Value,
    ) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let parameters = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(key, prop)| ParameterSchema {
                        name: key.clone(),
                        param_type: ParamType::from_schema_name(
                            prop.get("type").and_then(Value::as_str).unwrap_or("string"),
                        ),
                        description: prop
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        required: required.contains(&key.as_str()),
                        default: prop.get("default").cloned(),
                        enum_values: prop.get("enum").and_then(Value::as_array).cloned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// JSON Schema for the function-calling payload
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.param_type.as_str()));
            if !param.description.is_empty() {
                prop.insert("description".into(), json!(param.description));
            }
            if param.param_type == ParamType::Array {
                prop.insert("items".into(), json!({}));
            }
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), Value::Array(values.clone()));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(json!(param.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check arguments against the declared parameters
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        let Some(args) = arguments.as_object() else {
            return Err(AgentError::Validation(format!(
                "arguments for '{}' must be a JSON object",
                self.name
            )));
        };

        for param in &self.parameters {
            match args.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(AgentError::Validation(format!(
                        "missing required parameter '{}' for '{}'",
                        param.name, self.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.param_type.matches(value) => {
                    return Err(AgentError::Validation(format!(
                        "parameter '{}' of '{}' must be of type {}",
                        param.name,
                        self.name,
                        param.param_type.as_str()
                    )));
                }
                Some(value) => {
                    if let Some(allowed) = &param.enum_values {
                        if !allowed.contains(value) {
                            return Err(AgentError::Validation(format!(
                                "parameter '{}' of '{}' must be one of {}",
                                param.name,
                                self.name,
                                Value::Array(allowed.clone())
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Invocation contract of a registered tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with already-validated arguments
    async fn call(&self, arguments: &Value) -> anyhow::Result<Value>;
}

/// Handler backed by an async closure
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn call(&self, arguments: &Value) -> anyhow::Result<Value> {
        (self.0)(arguments.clone()).await
    }
}

/// Wrap an async closure as a tool handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// External collaborator exposing a set of tools (record store, automation
/// connectors). The registry treats every backend the same way.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Backend name, used in logs
    fn name(&self) -> &str;

    /// Tools this backend offers, named as they should be registered
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSpec>>;

    /// Invoke one of the listed tools
    async fn call_tool(&self, name: &str, arguments: &Value) -> anyhow::Result<Value>;
}

struct BackendHandler {
    backend: Arc<dyn ToolBackend>,
    tool: String,
}

#[async_trait]
impl ToolHandler for BackendHandler {
    async fn call(&self, arguments: &Value) -> anyhow::Result<Value> {
        self.backend.call_tool(&self.tool, arguments).await
    }
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
struct RegistryInner {
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
}

/// Registry for available tools
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a tool; fails if the name is taken
    pub fn register(&self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.tools.contains_key(&spec.name) {
            return Err(AgentError::DuplicateTool(spec.name));
        }
        tracing::info!(tool = %spec.name, "Registering tool");
        inner.order.push(spec.name.clone());
        inner
            .tools
            .insert(spec.name.clone(), RegisteredTool { spec, handler });
        Ok(())
    }

    /// Register every tool a backend lists. All-or-nothing: a name clash
    /// leaves the registry untouched.
    pub async fn register_backend(&self, backend: Arc<dyn ToolBackend>) -> Result<usize> {
        let specs = backend.list_tools().await.map_err(|e| {
            AgentError::Config(format!("backend '{}' failed to list tools: {}", backend.name(), e))
        })?;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut seen = std::collections::HashSet::new();
        for spec in &specs {
            if inner.tools.contains_key(&spec.name) || !seen.insert(spec.name.as_str()) {
                return Err(AgentError::DuplicateTool(spec.name.clone()));
            }
        }

        let count = specs.len();
        for spec in specs {
            tracing::info!(tool = %spec.name, backend = backend.name(), "Registering tool");
            let handler = Arc::new(BackendHandler {
                backend: backend.clone(),
                tool: spec.name.clone(),
            });
            inner.order.push(spec.name.clone());
            inner
                .tools
                .insert(spec.name.clone(), RegisteredTool { spec, handler });
        }
        Ok(count)
    }

    /// Spec of a registered tool
    pub fn spec(&self, name: &str) -> Option<ToolSpec> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.tools.get(name).map(|t| t.spec.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.tools.contains_key(name)
    }

    /// All tool specs, in registration order
    pub fn schemas(&self) -> Vec<ToolSpec> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|name| inner.tools.get(name))
            .map(|t| t.spec.clone())
            .collect()
    }

    /// Get tool names, in registration order
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.order.clone()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.order.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate and run a tool
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let (spec, handler) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let tool = inner
                .tools
                .get(name)
                .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
            (tool.spec.clone(), tool.handler.clone())
        };

        spec.validate(&arguments)?;

        let start = Instant::now();
        match handler.call(&arguments).await {
            Ok(output) => {
                tracing::info!(
                    tool = name,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool executed successfully"
                );
                Ok(ToolResult::success(name, arguments, output))
            }
            Err(e) => {
                tracing::error!(
                    tool = name,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool execution failed"
                );
                Err(AgentError::tool_execution(name, e))
            }
        }
    }

    /// Generate system prompt section describing available tools
    pub fn generate_prompt_section(&self) -> String {
        let mut prompt = String::from("## Available Tools\n\n");

        for schema in self.schemas() {
            prompt.push_str(&format!("### {}\n", schema.name));
            prompt.push_str(&format!("{}\n", schema.description));

            if !schema.parameters.is_empty() {
                prompt.push_str("**Parameters:**\n");
                for param in &schema.parameters {
                    let required = if param.required { " (required)" } else { "" };
                    prompt.push_str(&format!(
                        "- `{}` ({}){}: {}\n",
                        param.name,
                        param.param_type.as_str(),
                        required,
                        param.description
                    ));
                }
            }
            prompt.push('\n');
        }

        prompt
    }
}

/// Render a tool output as readable markdown: maps become bullet lists,
/// lists of maps become tables, other lists become bullets.
pub fn render_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("- **{}**: {}", k, scalar(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            // column order follows the first row
            let keys: Vec<&String> = items[0].as_object().map(|m| m.keys().collect()).unwrap_or_default();
            let mut lines = vec![
                keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(" | "),
                vec!["---"; keys.len()].join(" | "),
            ];
            for item in items {
                let row = keys
                    .iter()
                    .map(|k| item.get(k.as_str()).map(scalar).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(" | ");
                lines.push(row);
            }
            lines.join("\n")
        }
        Value::Array(items) => items
            .iter()
            .map(|v| format!("- {}", scalar(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_spec() -> ToolSpec {
        ToolSpec::new("echo", "Returns the text it receives").param(ParameterSchema::required(
            "text",
            ParamType::String,
            "Text to echo",
        ))
    }

    fn echo_handler() -> Arc<dyn ToolHandler> {
        handler_fn(|args: Value| async move { Ok(args["text"].clone()) })
    }

    #[test]
    fn test_schema_order_matches_registration() {
        let registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register(ToolSpec::new(name, "test"), echo_handler())
                .unwrap();
        }

        let names: Vec<String> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_duplicate_registration_leaves_registry_unchanged() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec(), echo_handler()).unwrap();

        let other = ToolSpec::new("echo", "a different echo");
        let err = registry.register(other, echo_handler()).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(ref n) if n == "echo"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.spec("echo").unwrap(), echo_spec());
    }

    #[tokio::test]
    async fn test_invoke_echo() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec(), echo_handler()).unwrap();

        let result = registry.invoke("echo", json!({"text": "hi"})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, json!("hi"));
        assert_eq!(result.arguments, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn test_missing_required_field_never_reaches_handler() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = ToolRegistry::new();
        registry
            .register(
                echo_spec(),
                handler_fn(move |_args: Value| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async { Ok(Value::Null) }
                }),
            )
            .unwrap();

        let err = registry.invoke("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        let err = registry.invoke("echo", json!({"text": 5})).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        let err = registry.invoke("echo", json!("hi")).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_handler_failure() {
        let registry = ToolRegistry::new();
        registry
            .register(
                ToolSpec::new("boom", "always fails"),
                handler_fn(|_args: Value| async { Err(anyhow::anyhow!("kaput")) }),
            )
            .unwrap();

        let err = registry.invoke("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(_)));

        let err = registry.invoke("boom", json!({})).await.unwrap_err();
        match err {
            AgentError::ToolExecution { tool, source } => {
                assert_eq!(tool, "boom");
                assert_eq!(source.to_string(), "kaput");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_enum_and_integer_validation() {
        let spec = ToolSpec::new("db", "records")
            .param(
                ParameterSchema::required("action", ParamType::String, "what to do")
                    .with_enum(vec![json!("add"), json!("list")]),
            )
            .param(ParameterSchema::optional("id", ParamType::Integer, "row id"));

        assert!(spec.validate(&json!({"action": "add"})).is_ok());
        assert!(spec.validate(&json!({"action": "drop"})).is_err());
        assert!(spec.validate(&json!({"action": "list", "id": 1.5})).is_err());
        assert!(spec.validate(&json!({"action": "list", "id": null})).is_ok());
    }

    #[test]
    fn test_json_schema_roundtrips_through_from_json_schema() {
        let schema = echo_spec().json_schema();
        assert_eq!(schema["required"], json!(["text"]));
        assert_eq!(schema["properties"]["text"]["type"], "string");

        let parsed = ToolSpec::from_json_schema("echo", "Returns the text it receives", &schema);
        assert_eq!(parsed, echo_spec());
    }

    #[test]
    fn test_render_output() {
        assert_eq!(render_output(&json!("plain")), "plain");
        assert_eq!(render_output(&json!({"id": 1})), "- **id**: 1");
        assert_eq!(
            render_output(&json!([{"id": 1, "data": "a"}, {"id": 2, "data": "b"}])),
            "data | id\n--- | ---\na | 1\nb | 2"
        );
        assert_eq!(render_output(&json!([1, "x"])), "- 1\n- x");
    }
}
