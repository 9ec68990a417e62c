//! MCP client implementation

use quarry_core::{QuarryError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::transport::{Transport, TransportConfig};
use crate::types::{
    ClientCapabilities, ClientInfo, ContentItem, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool,
    ToolCallParams, ToolCallResult,
};

/// MCP client for communicating with one MCP server
pub struct McpClient {
    /// Server name for identification
    name: String,

    /// Transport for communication
    transport: Arc<RwLock<Box<dyn Transport>>>,

    /// Request ID counter
    request_id: Arc<AtomicU64>,

    /// Server capabilities (set after initialization)
    capabilities: Option<InitializeResult>,

    /// Cached tools from the server
    tools_cache: Vec<McpTool>,

    /// Timeout duration for requests (in milliseconds)
    timeout_ms: u64,
}

impl McpClient {
    /// Create a client by building the transport described by the server
    /// configuration. `timeout_ms` is the already-validated effective
    /// timeout for this server.
    pub async fn connect(name: String, config: &ServerConfig, timeout_ms: u64) -> Result<Self> {
        let transport_config = TransportConfig::from_server(config, timeout_ms)?;
        let transport = transport_config.create_transport().await?;

        Ok(Self::with_transport(name, transport, timeout_ms))
    }

    /// Wrap an existing transport. Used by tests to inject mocks.
    pub fn with_transport(name: String, transport: Box<dyn Transport>, timeout_ms: u64) -> Self {
        Self {
            name,
            transport: Arc::new(RwLock::new(transport)),
            request_id: Arc::new(AtomicU64::new(1)),
            capabilities: None,
            tools_cache: Vec::new(),
            timeout_ms,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn next_request_id(&self) -> String {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        format!("{id}")
    }

    /// Initialize the MCP connection
    pub async fn initialize(&mut self) -> Result<InitializeResult> {
        info!("Initializing MCP client: {}", self.name);

        let params = InitializeParams {
            protocol_version: "2024-11-05".to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo::default(),
        };

        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "initialize".to_string(),
            Some(serde_json::to_value(params)?),
        );

        let response = self.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(QuarryError::McpError(format!(
                "Failed to initialize MCP connection: {}",
                error.message
            )));
        }

        let result: InitializeResult = serde_json::from_value(response.result.ok_or_else(
            || QuarryError::McpError("Initialize response missing result".into()),
        )?)?;

        info!(
            "MCP client '{}' initialized with protocol version: {}",
            self.name, result.protocol_version
        );

        if let Some(ref server_info) = result.server_info {
            info!(
                "Connected to MCP server: {} v{}",
                server_info.name, server_info.version
            );
        }

        // Some servers will not answer further requests until they see this
        let notification =
            JsonRpcNotification::new("notifications/initialized".to_string(), Some(serde_json::json!({})));
        {
            let mut transport = self.transport.write().await;
            transport.send_notification(notification).await?;
        }

        // Allow the server a moment to become ready after the handshake
        tokio::time::sleep(Duration::from_millis(100)).await;

        self.capabilities = Some(result.clone());
        Ok(result)
    }

    /// Capabilities reported by the server, once initialized.
    pub fn server_capabilities(&self) -> Option<&InitializeResult> {
        self.capabilities.as_ref()
    }

    /// Get cached tools (populated by `list_tools`)
    pub fn cached_tools(&self) -> &[McpTool] {
        &self.tools_cache
    }

    /// List available tools from the MCP server
    pub async fn list_tools(&mut self) -> Result<Vec<McpTool>> {
        debug!("Listing tools from MCP server: {}", self.name);

        let request = JsonRpcRequest::new(self.next_request_id(), "tools/list".to_string(), None);

        let response = self.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(QuarryError::McpError(format!(
                "Failed to list tools: {}",
                error.message
            )));
        }

        let result: ListToolsResult = serde_json::from_value(response.result.ok_or_else(
            || QuarryError::McpError("List tools response missing result".into()),
        )?)?;

        info!(
            "Discovered {} tools from MCP server '{}'",
            result.tools.len(),
            self.name
        );

        self.tools_cache = result.tools.clone();

        Ok(result.tools)
    }

    /// Call a tool on the MCP server
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<Vec<ContentItem>> {
        debug!("Calling MCP tool '{}' on server '{}'", name, self.name);

        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };

        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "tools/call".to_string(),
            Some(serde_json::to_value(params)?),
        );

        let response = self.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(QuarryError::McpError(format!(
                "Tool '{}' execution failed: {}",
                name, error.message
            )));
        }

        let result: ToolCallResult = serde_json::from_value(response.result.ok_or_else(
            || QuarryError::McpError(format!("Tool '{name}' response missing result")),
        )?)?;

        if result.is_error.unwrap_or(false) {
            let detail = result
                .content
                .iter()
                .filter_map(|item| match item {
                    ContentItem::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            return Err(QuarryError::McpError(format!(
                "Tool '{name}' returned an error: {detail}"
            )));
        }

        Ok(result.content)
    }

    /// Send a request and race the correlated response against the
    /// configured timeout. The losing side of the race is abandoned, not
    /// cancelled: a timed-out remote call may still complete on the
    /// server.
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let request_id = request.id.clone();

        {
            let mut transport = self.transport.write().await;
            transport.send_request(request).await?;
        }

        let timeout_duration = Duration::from_millis(self.timeout_ms);

        timeout(timeout_duration, self.wait_for_response(request_id))
            .await
            .map_err(|_| QuarryError::TimeoutError(self.timeout_ms))?
    }

    /// Wait for a specific response by ID
    async fn wait_for_response(&self, request_id: String) -> Result<JsonRpcResponse> {
        loop {
            {
                let mut transport = self.transport.write().await;
                if let Some(response) = transport.receive_response().await? {
                    if response.id == request_id {
                        return Ok(response);
                    }
                    // Out-of-order response for a request we no longer wait on
                    warn!(
                        "Received response for different request: {} (expected: {})",
                        response.id, request_id
                    );
                }
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Check if the client is connected
    pub async fn is_connected(&self) -> bool {
        let transport = self.transport.read().await;
        transport.is_connected().await
    }

    /// Close the client connection
    pub async fn close(&mut self) -> Result<()> {
        debug!("Closing MCP client: {}", self.name);

        let mut transport = self.transport.write().await;
        transport.close().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted transport: answers every request from a queue of canned
    /// responses, re-keyed to the request id it is answering.
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        results: Mutex<VecDeque<Value>>,
        ready: Mutex<VecDeque<JsonRpcResponse>>,
        connected: bool,
    }

    impl ScriptedTransport {
        fn new(results: Vec<Value>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                ready: Mutex::new(VecDeque::new()),
                connected: true,
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send_request(&mut self, request: JsonRpcRequest) -> Result<()> {
            if let Some(result) = self.results.lock().unwrap().pop_front() {
                self.ready.lock().unwrap().push_back(JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    id: request.id,
                    result: Some(result),
                    error: None,
                });
            }
            Ok(())
        }

        async fn send_notification(&mut self, _notification: JsonRpcNotification) -> Result<()> {
            Ok(())
        }

        async fn receive_response(&mut self) -> Result<Option<JsonRpcResponse>> {
            Ok(self.ready.lock().unwrap().pop_front())
        }

        async fn is_connected(&self) -> bool {
            self.connected
        }

        async fn close(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }
    }

    fn handshake_result() -> Value {
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "serverInfo": { "name": "scripted", "version": "1.0.0" }
        })
    }

    #[tokio::test]
    async fn initialize_and_list_tools() {
        let transport = ScriptedTransport::new(vec![
            handshake_result(),
            serde_json::json!({
                "tools": [
                    {
                        "name": "echo",
                        "description": "Echo back the input",
                        "inputSchema": { "type": "object" }
                    }
                ]
            }),
        ]);

        let mut client =
            McpClient::with_transport("scripted".to_string(), Box::new(transport), 5_000);

        let init = client.initialize().await.unwrap();
        assert_eq!(init.protocol_version, "2024-11-05");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(client.cached_tools().len(), 1);
    }

    #[tokio::test]
    async fn call_tool_surfaces_is_error_payloads() {
        let transport = ScriptedTransport::new(vec![serde_json::json!({
            "content": [ { "type": "text", "text": "disk on fire" } ],
            "isError": true
        })]);

        let mut client =
            McpClient::with_transport("scripted".to_string(), Box::new(transport), 5_000);

        let err = client
            .call_tool("burn", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk on fire"));
    }

    #[tokio::test]
    async fn request_times_out_when_no_response_arrives() {
        // No scripted results: the transport never answers
        let transport = ScriptedTransport::new(vec![]);
        let mut client =
            McpClient::with_transport("silent".to_string(), Box::new(transport), 50);

        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, QuarryError::TimeoutError(50)));
    }
}
