//! MCP manager for handling multiple MCP servers
//!
//! Connects every enabled configured server concurrently, isolates
//! per-server failures, filters and qualifies discovered methods, and
//! routes tool calls to the owning connection.

use futures::future::join_all;
use quarry_core::{QuarryError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::client::McpClient;
use crate::config::{McpConfig, ServerConfig, Settings};
use crate::filter::MethodFilter;
use crate::tool_adapter::McpToolAdapter;
use crate::types::{ContentItem, McpTool};

/// Initialization outcome: how many servers connected out of how many
/// were configured, and the qualified names that became callable.
#[derive(Debug, Clone)]
pub struct InitSummary {
    pub connected: usize,
    pub total: usize,
    pub tool_names: Vec<String>,
}

/// One registered remote tool
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Name prefixed with the owning server, unique across the registry
    pub qualified_name: String,

    /// Owning server name
    pub server: String,

    pub description: String,

    /// JSON Schema for the tool arguments
    pub input_schema: Value,
}

struct RegisteredTool {
    server: String,
    tool: McpTool,
}

/// Handle to a running MCP server connection
struct ServerHandle {
    client: Arc<RwLock<McpClient>>,
}

pub struct McpManager {
    /// Live connections indexed by server name
    servers: Arc<RwLock<HashMap<String, ServerHandle>>>,

    /// Registered tools indexed by qualified name
    tools: Arc<RwLock<HashMap<String, RegisteredTool>>>,

    /// Global settings captured at initialize time
    settings: Arc<RwLock<Settings>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            tools: Arc::new(RwLock::new(HashMap::new())),
            settings: Arc::new(RwLock::new(Settings::default())),
        }
    }

    /// Connect every enabled server concurrently. Each attempt settles
    /// independently: a spawn failure, handshake timeout or malformed
    /// catalog on one server is logged and excluded without aborting the
    /// others.
    pub async fn initialize(&self, config: McpConfig) -> Result<InitSummary> {
        *self.settings.write().await = config.settings.clone();

        let enabled = config.enabled_servers();
        let total = enabled.len();

        if total == 0 {
            info!("No enabled MCP servers to start");
            return Ok(InitSummary {
                connected: 0,
                total: 0,
                tool_names: Vec::new(),
            });
        }

        info!("Starting {} MCP servers", total);
        if config.settings.debug {
            for (name, server) in &enabled {
                debug!(
                    "MCP server '{}': transport={:?} timeout={:?}",
                    name,
                    server.transport_kind().map(|k| k.as_str()),
                    server.timeout
                );
            }
        }

        let settings = config.settings.clone();
        let attempts = enabled.into_iter().map(|(name, server_config)| {
            let settings = settings.clone();
            async move {
                let result = connect_server(&name, &server_config, &settings).await;
                (name, server_config, result)
            }
        });

        let mut connected = 0;
        let mut tool_names = Vec::new();

        for (name, server_config, result) in join_all(attempts).await {
            match result {
                Ok((client, discovered)) => {
                    connected += 1;
                    let registered = self
                        .register_server(&name, &server_config, client, discovered)
                        .await;
                    tool_names.extend(registered);
                }
                Err(e) => {
                    error!("Failed to start MCP server '{}': {}", name, e);
                }
            }
        }

        tool_names.sort();

        info!(
            "MCP server startup complete: {} connected, {} failed",
            connected,
            total - connected
        );

        Ok(InitSummary {
            connected,
            total,
            tool_names,
        })
    }

    /// Filter, qualify and register the tools of one freshly connected
    /// server; returns the qualified names that were registered.
    async fn register_server(
        &self,
        name: &str,
        config: &ServerConfig,
        client: McpClient,
        discovered: Vec<McpTool>,
    ) -> Vec<String> {
        let filter = MethodFilter::new(
            name,
            config.allowed_methods.clone(),
            config.blocked_methods.clone(),
        );

        let live_methods: Vec<String> = discovered.iter().map(|t| t.name.clone()).collect();
        filter.warn_unmatched(name, &live_methods);

        let client_arc = Arc::new(RwLock::new(client));
        let mut registered = Vec::new();

        {
            let mut tools = self.tools.write().await;
            for tool in discovered {
                if !filter.is_allowed(&tool.name) {
                    debug!("Method '{}' from server '{}' filtered out", tool.name, name);
                    continue;
                }

                let qualified = qualify(name, &tool.name);
                if tools.contains_key(&qualified) {
                    warn!(
                        "Qualified tool name '{}' already registered, skipping duplicate",
                        qualified
                    );
                    continue;
                }

                debug!("Registered MCP tool: {} from server {}", qualified, name);
                registered.push(qualified.clone());
                tools.insert(
                    qualified,
                    RegisteredTool {
                        server: name.to_string(),
                        tool,
                    },
                );
            }
        }

        self.servers.write().await.insert(
            name.to_string(),
            ServerHandle { client: client_arc },
        );

        registered
    }

    /// Invoke a registered tool by qualified name. The per-call timeout
    /// was resolved and validated when the owning server connected; the
    /// call races it inside the client.
    pub async fn call_tool(&self, qualified_name: &str, args: Value) -> Result<Vec<ContentItem>> {
        let (server, original_name) = {
            let tools = self.tools.read().await;
            let entry = tools.get(qualified_name).ok_or_else(|| {
                QuarryError::McpError(format!("Unknown MCP tool '{qualified_name}'"))
            })?;
            (entry.server.clone(), entry.tool.name.clone())
        };

        let client = {
            let servers = self.servers.read().await;
            let handle = servers.get(&server).ok_or_else(|| {
                QuarryError::McpError(format!(
                    "MCP server '{server}' owning tool '{qualified_name}' is not connected"
                ))
            })?;
            handle.client.clone()
        };

        let mut client = client.write().await;
        client.call_tool(&original_name, args).await
    }

    /// Read-only snapshot of the registered tool descriptors.
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        let tools = self.tools.read().await;
        let mut descriptors: Vec<ToolDescriptor> = tools
            .iter()
            .map(|(qualified, entry)| ToolDescriptor {
                qualified_name: qualified.clone(),
                server: entry.server.clone(),
                description: entry.tool.description.clone(),
                input_schema: entry.tool.input_schema.clone(),
            })
            .collect();
        descriptors.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        descriptors
    }

    /// Snapshot of every registered tool as an executable adapter for a
    /// tool-calling runtime.
    pub async fn callable_tools(&self) -> Vec<Arc<dyn quarry_tools::Tool>> {
        let tools = self.tools.read().await;
        let servers = self.servers.read().await;

        let mut adapters: Vec<(String, Arc<dyn quarry_tools::Tool>)> = tools
            .iter()
            .filter_map(|(qualified, entry)| {
                let handle = servers.get(&entry.server)?;
                let adapter: Arc<dyn quarry_tools::Tool> = Arc::new(McpToolAdapter::new(
                    qualified.clone(),
                    entry.tool.clone(),
                    handle.client.clone(),
                    entry.server.clone(),
                ));
                Some((qualified.clone(), adapter))
            })
            .collect();
        adapters.sort_by(|a, b| a.0.cmp(&b.0));
        adapters.into_iter().map(|(_, adapter)| adapter).collect()
    }

    /// Qualified names of every registered tool.
    pub async fn tool_names(&self) -> Vec<String> {
        let tools = self.tools.read().await;
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tear down every connection. Idempotent and non-throwing: safe to
    /// call repeatedly and before any successful connect.
    pub async fn disconnect(&self) {
        let handles: Vec<(String, ServerHandle)> =
            self.servers.write().await.drain().collect();

        for (name, handle) in handles {
            let mut client = handle.client.write().await;
            if let Err(e) = client.close().await {
                warn!("Error closing MCP client '{}': {}", name, e);
            }
        }

        self.tools.write().await.clear();
        debug!("MCP manager disconnected");
    }

    /// Settings captured at the last `initialize`.
    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Names of currently connected servers.
    pub async fn connected_servers(&self) -> Vec<String> {
        let servers = self.servers.read().await;
        let mut names: Vec<String> = servers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Qualified name: server name plus method name, collision-proofed by
/// prefixing.
pub fn qualify(server: &str, method: &str) -> String {
    format!("{server}_{method}")
}

/// Split a qualified name back into server and method, given the known
/// server name.
pub fn unqualify<'a>(server: &str, qualified: &'a str) -> &'a str {
    let prefix = format!("{server}_");
    qualified.strip_prefix(&prefix).unwrap_or(qualified)
}

/// Establish one server connection with optional retries, returning the
/// initialized client and its discovered catalog.
async fn connect_server(
    name: &str,
    config: &ServerConfig,
    settings: &Settings,
) -> Result<(McpClient, Vec<McpTool>)> {
    // Timeout validation happens before any connection attempt; an
    // invalid value skips the whole server.
    let timeout_ms = config.effective_timeout(name, settings)?;

    let mut attempt = 0;
    let mut delay = std::time::Duration::from_millis(500);

    loop {
        match try_connect(name, config, timeout_ms).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= settings.retry_count {
                    return Err(e);
                }
                attempt += 1;
                warn!(
                    "Failed to start MCP server '{}', retrying in {:?} (attempt {}/{}): {}",
                    name, delay, attempt, settings.retry_count, e
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(std::time::Duration::from_secs(5));
            }
        }
    }
}

async fn try_connect(
    name: &str,
    config: &ServerConfig,
    timeout_ms: u64,
) -> Result<(McpClient, Vec<McpTool>)> {
    let mut client = McpClient::connect(name.to_string(), config, timeout_ms).await?;
    client.initialize().await?;
    let tools = client.list_tools().await?;
    Ok((client, tools))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify_and_unqualify() {
        assert_eq!(qualify("search", "find_symbol"), "search_find_symbol");
        assert_eq!(unqualify("search", "search_find_symbol"), "find_symbol");
        // Unprefixed names pass through untouched
        assert_eq!(unqualify("search", "find_symbol"), "find_symbol");
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_a_no_op() {
        let manager = McpManager::new();
        manager.disconnect().await;
        manager.disconnect().await;
        assert!(manager.connected_servers().await.is_empty());
    }

    #[tokio::test]
    async fn initialize_with_empty_config() {
        let manager = McpManager::new();
        let summary = manager.initialize(McpConfig::new()).await.unwrap();
        assert_eq!(summary.connected, 0);
        assert_eq!(summary.total, 0);
        assert!(summary.tool_names.is_empty());
    }
}
