//! Zapier and n8n connectors
//!
//! Both platforms expose remote actions over the same shape of REST API:
//! list them, then invoke one by name with `{"input": args}`. They differ in
//! paths and authentication only, so one [`HttpConnector`] serves both.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use agent_core::tool::{ToolBackend, ToolSpec};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::{Value, json};

use crate::error::{Result, ToolsError};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Supported automation platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorKind {
    Zapier,
    N8n,
}

impl ConnectorKind {
    pub const ALL: [ConnectorKind; 2] = [ConnectorKind::Zapier, ConnectorKind::N8n];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zapier => "zapier",
            Self::N8n => "n8n",
        }
    }

    pub fn key_var(&self) -> &'static str {
        match self {
            Self::Zapier => "ZAPIER_API_KEY",
            Self::N8n => "N8N_API_KEY",
        }
    }

    fn base_url_var(&self) -> &'static str {
        match self {
            Self::Zapier => "ZAPIER_BASE_URL",
            Self::N8n => "N8N_BASE_URL",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Zapier => "https://nla.zapier.com/api/v1/mcp",
            Self::N8n => "https://api.n8n.cloud/mcp",
        }
    }

    /// Path segment holding the remote actions
    fn collection(&self) -> &'static str {
        match self {
            Self::Zapier => "tools",
            Self::N8n => "workflows",
        }
    }

    fn authorize(&self, request: RequestBuilder, key: &str) -> RequestBuilder {
        match self {
            Self::Zapier => request.bearer_auth(key),
            Self::N8n => request.header("X-API-KEY", key),
        }
    }
}

impl std::fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connector configuration
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl ConnectorConfig {
    pub fn new(kind: ConnectorKind) -> Self {
        Self {
            api_key: None,
            base_url: kind.default_base_url().to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_env(kind: ConnectorKind) -> Self {
        Self::from_lookup(kind, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(kind: ConnectorKind, get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new(kind);
        config.api_key = get(kind.key_var()).filter(|k| !k.trim().is_empty());
        if let Some(url) = get(kind.base_url_var()).filter(|u| !u.trim().is_empty()) {
            config = config.with_base_url(url.trim());
        }
        if let Some(raw) = get("CONNECTOR_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %raw, "Invalid CONNECTOR_TIMEOUT_SECS, using default"),
            }
        }
        config
    }
}

/// Remote action as listed by the platform
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl RemoteTool {
    /// Accepts `name` (or `id`), `description` and a JSON Schema under
    /// `input_schema`, `inputSchema`, `parameters` or `params`
    fn from_value(value: &Value) -> Option<Self> {
        let name = value
            .get("name")
            .or_else(|| value.get("id"))
            .and_then(|n| match n {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|n| !n.trim().is_empty())?;

        let schema = ["input_schema", "inputSchema", "parameters", "params"]
            .iter()
            .find_map(|key| value.get(*key).filter(|s| s.is_object()))
            .cloned()
            .unwrap_or_else(|| json!({}));

        Some(Self {
            name,
            description: value
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            schema,
        })
    }
}

/// Tool name exposed to the model: `{connector}_{remote}` with anything
/// outside `[A-Za-z0-9_-]` replaced by `_`
pub fn exposed_name(kind: ConnectorKind, remote: &str) -> String {
    let remote: String = remote
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{}_{}", kind.as_str(), remote)
}

/// Connector to a Zapier or n8n account
pub struct HttpConnector {
    kind: ConnectorKind,
    config: ConnectorConfig,
    client: Client,
    /// exposed name -> remote name, filled by `list_tools`
    names: RwLock<HashMap<String, String>>,
}

impl HttpConnector {
    pub fn new(kind: ConnectorKind, config: ConnectorConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(connector = %kind, error = %e, "Falling back to default HTTP client");
                Client::new()
            });
        Self {
            kind,
            config,
            client,
            names: RwLock::new(HashMap::new()),
        }
    }

    pub fn zapier(config: ConnectorConfig) -> Self {
        Self::new(ConnectorKind::Zapier, config)
    }

    pub fn n8n(config: ConnectorConfig) -> Self {
        Self::new(ConnectorKind::N8n, config)
    }

    pub fn from_env(kind: ConnectorKind) -> Self {
        Self::new(kind, ConnectorConfig::from_env(kind))
    }

    pub fn kind(&self) -> ConnectorKind {
        self.kind
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| ToolsError::Config(format!("invalid {} base URL: {e}", self.kind)))?;
        url.path_segments_mut()
            .map_err(|()| ToolsError::Config(format!("invalid {} base URL", self.kind)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(ToolsError::MissingKey(self.kind.key_var()))?;
        Ok(self.kind.authorize(request, key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = self.authorized(request)?.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            };
            ToolsError::Request {
                connector: self.kind.to_string(),
                message,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolsError::Status {
                connector: self.kind.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| ToolsError::Decode {
            connector: self.kind.to_string(),
            message: e.to_string(),
        })
    }

    /// Actions available on the account
    pub async fn list_remote(&self) -> Result<Vec<RemoteTool>> {
        let url = self.endpoint(&[self.kind.collection()])?;
        tracing::debug!(connector = %self.kind, %url, "Listing remote tools");
        let body = self.send(self.client.get(url)).await?;

        // bare array or wrapped in a collection key
        let items = match &body {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => [self.kind.collection(), "data", "results"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array))
                .map(Vec::as_slice)
                .ok_or_else(|| ToolsError::Decode {
                    connector: self.kind.to_string(),
                    message: "expected a list of tools".to_string(),
                })?,
            _ => {
                return Err(ToolsError::Decode {
                    connector: self.kind.to_string(),
                    message: "expected a list of tools".to_string(),
                });
            }
        };

        Ok(items.iter().filter_map(RemoteTool::from_value).collect())
    }

    /// Invoke a remote action by its platform name
    pub async fn invoke(&self, remote: &str, input: &Value) -> Result<Value> {
        let url = self.endpoint(&[self.kind.collection(), remote, "invoke"])?;
        tracing::info!(connector = %self.kind, tool = remote, "Invoking remote tool");
        self.send(self.client.post(url).json(&json!({ "input": input })))
            .await
    }

    fn remote_name(&self, exposed: &str) -> Result<String> {
        let names = self.names.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(remote) = names.get(exposed) {
            return Ok(remote.clone());
        }
        exposed
            .strip_prefix(self.kind.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .filter(|rest| !rest.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ToolsError::UnknownTool(exposed.to_string()))
    }
}

#[async_trait]
impl ToolBackend for HttpConnector {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSpec>> {
        let remote = self.list_remote().await?;

        let mut names = self.names.write().unwrap_or_else(PoisonError::into_inner);
        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(remote.len());
        for tool in remote {
            let exposed = exposed_name(self.kind, &tool.name);
            if !seen.insert(exposed.clone()) {
                tracing::warn!(
                    connector = %self.kind,
                    remote = %tool.name,
                    exposed = %exposed,
                    "Skipping remote tool whose name collides after sanitizing"
                );
                continue;
            }
            names.insert(exposed.clone(), tool.name);
            specs.push(ToolSpec::from_json_schema(exposed, tool.description, &tool.schema));
        }
        Ok(specs)
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> anyhow::Result<Value> {
        let remote = self.remote_name(name)?;
        Ok(self.invoke(&remote, arguments).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::{ParamType, ToolRegistry};
    use std::sync::Arc;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connector(kind: ConnectorKind, server: &MockServer) -> HttpConnector {
        HttpConnector::new(
            kind,
            ConnectorConfig::new(kind)
                .with_api_key("secret")
                .with_base_url(format!("{}/mcp/", server.uri())),
        )
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ConnectorConfig::from_lookup(ConnectorKind::N8n, |key| match key {
            "N8N_API_KEY" => Some("k".into()),
            "N8N_BASE_URL" => Some("http://localhost:5678/mcp/".into()),
            "CONNECTOR_TIMEOUT_SECS" => Some("nope".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.base_url, "http://localhost:5678/mcp");
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        let config = ConnectorConfig::from_lookup(ConnectorKind::Zapier, |_| None);
        assert!(config.api_key.is_none());
        assert_eq!(config.base_url, ConnectorKind::Zapier.default_base_url());
    }

    #[test]
    fn test_exposed_name() {
        assert_eq!(exposed_name(ConnectorKind::Zapier, "gmail_send"), "zapier_gmail_send");
        assert_eq!(exposed_name(ConnectorKind::N8n, "Sync CRM/leads"), "n8n_Sync_CRM_leads");
    }

    #[tokio::test]
    async fn test_zapier_list_and_invoke() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mcp/tools"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "name": "slack_post",
                "description": "Post to Slack",
                "input_schema": {
                    "type": "object",
                    "properties": {
                        "channel": {"type": "string"},
                        "text": {"type": "string", "description": "Message"}
                    },
                    "required": ["text"]
                }
            }])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp/tools/slack_post/invoke"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({"input": {"text": "hi"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let registry = ToolRegistry::new();
        let count = registry
            .register_backend(Arc::new(connector(ConnectorKind::Zapier, &server)))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let spec = registry.spec("zapier_slack_post").unwrap();
        let text = spec.parameters.iter().find(|p| p.name == "text").unwrap();
        assert!(text.required);
        assert_eq!(text.param_type, ParamType::String);

        let result = registry
            .invoke("zapier_slack_post", json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.output, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_n8n_wrapped_listing_and_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mcp/workflows"))
            .and(header("X-API-KEY", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "lead-sync", "description": "Sync leads"}, {"description": "nameless"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp/workflows/lead-sync/invoke"))
            .and(header("X-API-KEY", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "queued"})))
            .mount(&server)
            .await;

        let n8n = connector(ConnectorKind::N8n, &server);
        let specs = n8n.list_tools().await.unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "n8n_lead-sync");
        assert!(specs[0].parameters.is_empty());

        let output = n8n.call_tool("n8n_lead-sync", &json!({})).await.unwrap();
        assert_eq!(output["status"], "queued");
    }

    #[tokio::test]
    async fn test_colliding_names_keep_the_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mcp/tools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "a.b", "description": "first"},
                {"name": "a_b", "description": "second"},
                {"name": "c", "description": "third"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp/tools/a.b/invoke"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"from": "first"})))
            .expect(1)
            .mount(&server)
            .await;

        let registry = ToolRegistry::new();
        let count = registry
            .register_backend(Arc::new(connector(ConnectorKind::Zapier, &server)))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(registry.spec("zapier_a_b").unwrap().description, "first");
        assert!(registry.spec("zapier_c").is_some());

        let result = registry.invoke("zapier_a_b", json!({})).await.unwrap();
        assert_eq!(result.output, json!({"from": "first"}));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp/tools/broken/invoke"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = connector(ConnectorKind::Zapier, &server)
            .invoke("broken", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::Status { status: 502, ref body, .. } if body == "upstream down"));
    }

    #[tokio::test]
    async fn test_missing_key_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let zapier = HttpConnector::zapier(
            ConnectorConfig::new(ConnectorKind::Zapier).with_base_url(server.uri()),
        );
        assert!(!zapier.is_configured());
        let err = zapier.list_remote().await.unwrap_err();
        assert_eq!(err.to_string(), "ZAPIER_API_KEY env variable is not set");

        let registry = ToolRegistry::new();
        assert!(registry.register_backend(Arc::new(zapier)).await.is_err());
        assert!(registry.is_empty());
    }
}
