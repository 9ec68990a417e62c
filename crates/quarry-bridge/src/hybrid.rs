//! Hybrid resolution between native host tools and MCP tools
//!
//! The model addresses both kinds with the same XML dialect; the bridge
//! resolves which registry owns the call. Native tools are tried first
//! and win naming conflicts.

use quarry_mcp::types::content_to_value;
use quarry_mcp::McpManager;
use quarry_tools::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::parse::{parse_call, parse_call_with_recovery, strip_thinking};
use crate::template::tool_to_template;

/// Which registry resolved the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallKind {
    Native,
    Mcp,
}

/// A resolved tool invocation
#[derive(Debug, Clone)]
pub struct HybridCall {
    pub kind: ToolCallKind,
    pub tool_name: String,
    pub params: Value,
}

/// Outcome of resolving and executing one model tool call. Execution
/// errors are captured here, never propagated as exceptions.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub tool_name: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

pub struct HybridBridge {
    native: Arc<ToolRegistry>,
    manager: Arc<McpManager>,
}

impl HybridBridge {
    pub fn new(native: Arc<ToolRegistry>, manager: Arc<McpManager>) -> Self {
        Self { native, manager }
    }

    /// Render every known tool into the invocation templates included in
    /// the model's instructions. Native tools lead, MCP tools follow
    /// under their qualified names.
    pub async fn render_catalog(&self) -> String {
        let mut sections = Vec::new();

        let mut native = self.native.get_all();
        native.sort_by(|a, b| a.name().cmp(b.name()));
        for tool in native {
            sections.push(tool_to_template(
                tool.name(),
                tool.description(),
                &tool.schema(),
            ));
        }

        for descriptor in self.manager.tools().await {
            sections.push(tool_to_template(
                &descriptor.qualified_name,
                &descriptor.description,
                &descriptor.input_schema,
            ));
        }

        sections.join("\n")
    }

    /// Resolve a tool call out of raw model output. Native names are
    /// tried first (with the truncated-output recovery path); MCP names
    /// only match complete tag pairs. Returns `None` when nothing in the
    /// text looks like a tool call.
    pub async fn hybrid_parse(&self, text: &str) -> Option<HybridCall> {
        let cleaned = strip_thinking(text);

        let mut native_names = self.native.list();
        native_names.sort();
        if let Some(call) = parse_call_with_recovery(&cleaned, &native_names) {
            debug!("Resolved native tool call: {}", call.tool_name);
            return Some(HybridCall {
                kind: ToolCallKind::Native,
                tool_name: call.tool_name,
                params: call.params,
            });
        }

        let mcp_names = self.manager.tool_names().await;
        if let Some(call) = parse_call(&cleaned, &mcp_names) {
            debug!("Resolved MCP tool call: {}", call.tool_name);
            return Some(HybridCall {
                kind: ToolCallKind::Mcp,
                tool_name: call.tool_name,
                params: call.params,
            });
        }

        None
    }

    /// Resolve and execute in one step.
    pub async fn execute_from_xml(&self, text: &str) -> ExecutionOutcome {
        let Some(call) = self.hybrid_parse(text).await else {
            return ExecutionOutcome {
                success: false,
                tool_name: None,
                result: None,
                error: Some("No tool invocation recognized in model output".to_string()),
            };
        };

        match call.kind {
            ToolCallKind::Native => {
                let Some(tool) = self.native.get(&call.tool_name) else {
                    return failure(&call.tool_name, "Native tool disappeared from the registry");
                };
                match tool.execute(call.params).await {
                    Ok(result) => success(&call.tool_name, result),
                    Err(e) => {
                        warn!("Native tool '{}' failed: {}", call.tool_name, e);
                        failure(&call.tool_name, &e.to_string())
                    }
                }
            }
            ToolCallKind::Mcp => {
                match self.manager.call_tool(&call.tool_name, call.params).await {
                    Ok(content) => success(&call.tool_name, content_to_value(content)),
                    Err(e) => {
                        warn!("MCP tool '{}' failed: {}", call.tool_name, e);
                        failure(&call.tool_name, &e.to_string())
                    }
                }
            }
        }
    }
}

fn success(tool_name: &str, result: Value) -> ExecutionOutcome {
    ExecutionOutcome {
        success: true,
        tool_name: Some(tool_name.to_string()),
        result: Some(result),
        error: None,
    }
}

fn failure(tool_name: &str, message: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        success: false,
        tool_name: Some(tool_name.to_string()),
        result: None,
        error: Some(message.to_string()),
    }
}
