//! Adapter exposing remote MCP tools through the host `Tool` trait

use async_trait::async_trait;
use quarry_core::Result;
use quarry_tools::Tool;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::client::McpClient;
use crate::types::{content_to_value, McpTool};

/// Wraps one remote tool so a tool-calling runtime can execute it like
/// any host tool. The adapter carries the qualified name; the original
/// method name travels on the wire.
pub struct McpToolAdapter {
    qualified_name: String,
    tool_def: McpTool,
    client: Arc<RwLock<McpClient>>,
    server_name: String,
}

impl McpToolAdapter {
    pub fn new(
        qualified_name: String,
        tool_def: McpTool,
        client: Arc<RwLock<McpClient>>,
        server_name: String,
    ) -> Self {
        Self {
            qualified_name,
            tool_def,
            client,
            server_name,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        &self.tool_def.description
    }

    fn schema(&self) -> Value {
        self.tool_def.input_schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        debug!(
            "Executing MCP tool '{}' from server '{}'",
            self.tool_def.name, self.server_name
        );

        let mut client = self.client.write().await;
        match client.call_tool(&self.tool_def.name, args).await {
            Ok(content) => {
                let mut response = content_to_value(content);
                if let Value::Object(ref mut map) = response {
                    map.insert("server".to_string(), json!(self.server_name));
                    map.insert("tool".to_string(), json!(self.tool_def.name));
                }
                Ok(response)
            }
            Err(e) => {
                error!("MCP tool execution failed: {}", e);

                // Surface failures as structured payloads so the calling
                // runtime can feed them back to the model
                Ok(json!({
                    "error": e.to_string(),
                    "success": false,
                    "server": self.server_name,
                    "tool": self.tool_def.name
                }))
            }
        }
    }
}
