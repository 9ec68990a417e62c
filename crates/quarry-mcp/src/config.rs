//! MCP server configuration
//!
//! Supports the standard `mcpServers` configuration format from JSON or
//! YAML files, with environment-variable overrides and multi-level
//! loading. Configuration is resolved once at startup into immutable
//! descriptors; nothing re-reads the environment after load.

use quarry_core::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Default per-call timeout when neither the server nor the global
/// settings provide one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Upper bound for configured timeouts. Larger values are clamped at
/// load time, not rejected.
pub const MAX_TIMEOUT_MS: u64 = 600_000;

/// Top-level MCP configuration container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// Map of server name to configuration
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, ServerConfig>,

    /// Global settings shared by all servers
    #[serde(default)]
    pub settings: Settings,
}

/// Global settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Default per-call timeout in milliseconds
    pub timeout: u64,

    /// Connection-establishment retry attempts per server
    pub retry_count: u32,

    /// Verbose protocol logging
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_MS,
            retry_count: 0,
            debug: false,
        }
    }
}

/// Transport kind for one configured server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
    Websocket,
    Http,
}

impl TransportKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "websocket" | "ws" => Ok(Self::Websocket),
            "http" => Ok(Self::Http),
            other => Err(QuarryError::ConfigError(format!(
                "Unknown transport kind '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Websocket => "websocket",
            Self::Http => "http",
        }
    }
}

/// Individual MCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Command to execute for stdio servers (e.g. "npx", "/path/to/binary")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables for the spawned process
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Endpoint URL for sse / websocket / http servers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// HTTP headers for url-based transports
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Explicit transport kind; inferred from the URL when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,

    /// Whether this server participates in initialization
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Per-server timeout in milliseconds. Kept signed so that invalid
    /// negative values survive parsing and can be rejected per server
    /// instead of failing the whole file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,

    /// Wildcard patterns of permitted method names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_methods: Option<Vec<String>>,

    /// Wildcard patterns of excluded method names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_methods: Option<Vec<String>>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            transport: None,
            enabled: true,
            timeout: None,
            allowed_methods: None,
            blocked_methods: None,
        }
    }
}

impl ServerConfig {
    /// Resolve the transport kind, either explicit or inferred from the
    /// shape of the configuration. Fails on unknown kinds and on missing
    /// required fields, before any connection attempt.
    pub fn transport_kind(&self) -> Result<TransportKind> {
        let kind = match &self.transport {
            Some(explicit) => TransportKind::parse(explicit)?,
            None => match &self.url {
                Some(url) => infer_from_url(url),
                None => TransportKind::Stdio,
            },
        };

        match kind {
            TransportKind::Stdio => {
                if self.command.is_none() {
                    return Err(QuarryError::ConfigError(
                        "stdio server requires a 'command'".into(),
                    ));
                }
            }
            TransportKind::Sse | TransportKind::Websocket | TransportKind::Http => {
                if self.url.is_none() {
                    return Err(QuarryError::ConfigError(format!(
                        "{} server requires a 'url'",
                        kind.as_str()
                    )));
                }
            }
        }

        Ok(kind)
    }

    /// Validate and resolve the effective timeout for this server.
    /// Zero or negative values are configuration errors that skip the
    /// whole server; values above [`MAX_TIMEOUT_MS`] are clamped with a
    /// warning.
    pub fn effective_timeout(&self, name: &str, settings: &Settings) -> Result<u64> {
        let configured = match self.timeout {
            Some(ms) => {
                if ms <= 0 {
                    return Err(QuarryError::ConfigError(format!(
                        "Server '{name}' has invalid timeout {ms}ms"
                    )));
                }
                ms as u64
            }
            None => {
                if settings.timeout > 0 {
                    settings.timeout
                } else {
                    DEFAULT_TIMEOUT_MS
                }
            }
        };

        if configured > MAX_TIMEOUT_MS {
            warn!(
                "Server '{}' timeout {}ms exceeds maximum, clamping to {}ms",
                name, configured, MAX_TIMEOUT_MS
            );
            Ok(MAX_TIMEOUT_MS)
        } else {
            Ok(configured)
        }
    }
}

/// Infer the transport from a URL: `ws://`/`wss://` means websocket, a
/// path containing `/sse` means SSE, anything else is plain HTTP.
fn infer_from_url(url: &str) -> TransportKind {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        TransportKind::Websocket
    } else if url.contains("/sse") {
        TransportKind::Sse
    } else {
        TransportKind::Http
    }
}

impl McpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON or YAML file, dispatching on the
    /// file extension.
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading MCP configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            QuarryError::ConfigError(format!(
                "Failed to read MCP config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let config: McpConfig = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| {
                QuarryError::ConfigError(format!(
                    "Failed to parse MCP config YAML from {}: {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                QuarryError::ConfigError(format!(
                    "Failed to parse MCP config JSON from {}: {}",
                    path.display(),
                    e
                ))
            })?
        };

        Ok(config)
    }

    /// Load all JSON/YAML files from a directory, in name order.
    pub async fn load_from_directory<P: AsRef<Path>>(dir: P) -> Result<Vec<Self>> {
        let dir = dir.as_ref();
        let mut configs = Vec::new();

        if !dir.exists() {
            return Ok(configs);
        }

        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            QuarryError::ConfigError(format!("Failed to read directory {}: {}", dir.display(), e))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if matches!(ext, "json" | "yaml" | "yml") {
                    paths.push(path);
                }
            }
        }
        paths.sort();

        for path in paths {
            match Self::load_from_file(&path).await {
                Ok(config) => {
                    info!("Loaded MCP config from: {}", path.display());
                    configs.push(config);
                }
                Err(e) => {
                    warn!("Failed to load MCP config from {}: {}", path.display(), e);
                }
            }
        }

        Ok(configs)
    }

    /// Merge another configuration into this one; the other side wins.
    pub fn merge(&mut self, other: McpConfig) {
        for (name, config) in other.mcp_servers {
            self.mcp_servers.insert(name, config);
        }
        self.settings = other.settings;
    }

    /// Apply `MCP_SERVERS_<NAME>_<FIELD>` environment overrides on top of
    /// the file-based configuration. One-shot: callers invoke this during
    /// load and never consult the environment again.
    pub fn apply_env_overrides(&mut self) {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        self.apply_overrides_from(vars);
    }

    fn apply_overrides_from(&mut self, vars: Vec<(String, String)>) {
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix("MCP_SERVERS_") else {
                continue;
            };
            let Some((name_part, field)) = rest.rsplit_once('_') else {
                continue;
            };
            if name_part.is_empty() {
                continue;
            }

            const FIELDS: &[&str] = &[
                "COMMAND",
                "ARGS",
                "TRANSPORT",
                "URL",
                "ENABLED",
                "ENV",
                "TIMEOUT",
                "ALLOWLIST",
                "BLOCKLIST",
            ];
            if !FIELDS.contains(&field) {
                continue;
            }

            let server_key = self.resolve_server_key(name_part);
            let server = self.mcp_servers.entry(server_key.clone()).or_default();

            match field {
                "COMMAND" => server.command = Some(value),
                "ARGS" => server.args = split_csv(&value),
                "TRANSPORT" => server.transport = Some(value.to_lowercase()),
                "URL" => server.url = Some(value),
                "ENABLED" => {
                    server.enabled = matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
                }
                "ENV" => {
                    for pair in split_csv(&value) {
                        if let Some((k, v)) = pair.split_once('=') {
                            server.env.insert(k.to_string(), v.to_string());
                        }
                    }
                }
                "TIMEOUT" => match value.parse::<i64>() {
                    Ok(ms) => server.timeout = Some(ms),
                    Err(_) => warn!(
                        "Ignoring unparsable timeout override for server '{}': {}",
                        server_key, value
                    ),
                },
                "ALLOWLIST" => server.allowed_methods = Some(split_csv(&value)),
                "BLOCKLIST" => server.blocked_methods = Some(split_csv(&value)),
                _ => unreachable!(),
            }

            info!(
                "Applied environment override {} for MCP server '{}'",
                field, server_key
            );
        }
    }

    /// Map the uppercase env-var name segment back to a configured server
    /// name, creating a lowercase entry when no server matches.
    fn resolve_server_key(&self, name_part: &str) -> String {
        for existing in self.mcp_servers.keys() {
            let canonical = existing.to_uppercase().replace('-', "_");
            if canonical == name_part {
                return existing.clone();
            }
        }
        name_part.to_lowercase()
    }

    /// Servers participating in initialization.
    pub fn enabled_servers(&self) -> Vec<(String, ServerConfig)> {
        let mut servers: Vec<(String, ServerConfig)> = self
            .mcp_servers
            .iter()
            .filter(|(_, config)| config.enabled)
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect();
        servers.sort_by(|a, b| a.0.cmp(&b.0));
        servers
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
