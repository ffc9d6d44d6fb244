//! Server configuration from the environment

use agent_core::AgentConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_STATIC_DIR: &str = "static";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub static_dir: String,
    pub agent: AgentConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            static_dir: DEFAULT_STATIC_DIR.into(),
            agent: AgentConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or invalid values keep their defaults
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(dir) = get("STATIC_DIR") {
            config.static_dir = dir;
        }
        if let Some(raw) = get("MAX_TOOL_CHAIN") {
            match raw.parse::<usize>() {
                Ok(n) => config.agent.max_tool_chain = n,
                Err(_) => tracing::warn!(value = %raw, "Invalid MAX_TOOL_CHAIN, using default"),
            }
        }
        if let Some(raw) = get("AGENT_PLANNING") {
            match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.agent.planning = true,
                "0" | "false" | "no" | "off" => config.agent.planning = false,
                _ => tracing::warn!(value = %raw, "Invalid AGENT_PLANNING, using default"),
            }
        }
        config
    }
}
