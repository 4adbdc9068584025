/// Configuration management for the agentflow engine
///
/// Handles server configuration and the runtime knobs the execution engine
/// reads (workflow display name, HTTP action timeout, Lua sandbox limits).

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Execution engine configuration
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Name exposed to expressions as `$vars.workflow.name`
    pub workflow_name: String,
    /// Timeout applied to `http-request` action nodes
    pub http_timeout_secs: u64,
    /// Memory ceiling for a single `code` node's Lua state
    pub max_lua_memory_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workflow_name: std::env::var("AGENTFLOW_WORKFLOW_NAME")
                .unwrap_or_else(|_| "Workflow".to_string()),
            http_timeout_secs: std::env::var("AGENTFLOW_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            max_lua_memory_bytes: std::env::var("AGENTFLOW_LUA_MEMORY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(16 * 1024 * 1024),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("AGENTFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("AGENTFLOW_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            engine: EngineConfig::default(),
        }
    }
}
