//! Hybrid bridge tests across a native registry and a scripted MCP
//! server, covering precedence, execution and error capture.

use async_trait::async_trait;
use quarry_bridge::{HybridBridge, ToolCallKind};
use quarry_core::Result;
use quarry_mcp::{McpConfig, McpManager, ServerConfig};
use quarry_tools::{Tool, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;

/// Scripted stdio MCP server named "web" exposing a single method
/// "search", which qualifies to "web_search" — the same name as the
/// native tool below.
const FAKE_SERVER_SCRIPT: &str = concat!(
    r#"printf '%s\n' "#,
    r#"'{"jsonrpc":"2.0","id":"1","result":{"protocolVersion":"2024-11-05","capabilities":{}}}' "#,
    r#"'{"jsonrpc":"2.0","id":"2","result":{"tools":[{"name":"search","description":"Remote search","inputSchema":{"type":"object","properties":{"query":{"type":"string"}},"required":["query"]}}]}}'"#,
    "; sleep 2"
);

struct NativeSearch;

#[async_trait]
impl Tool for NativeSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Native search over the local index"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search terms" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
        Ok(json!({ "matches": [format!("native match for {query}")] }))
    }
}

async fn build_bridge(with_mcp: bool) -> (HybridBridge, Arc<McpManager>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("quarry_bridge=debug,quarry_mcp=debug")
        .with_test_writer()
        .try_init();

    let registry = Arc::new(ToolRegistry::new());
    registry.register(NativeSearch).unwrap();

    let manager = Arc::new(McpManager::new());
    if with_mcp {
        let mut config = McpConfig::new();
        config.mcp_servers.insert(
            "web".to_string(),
            ServerConfig {
                command: Some("sh".to_string()),
                args: vec!["-c".to_string(), FAKE_SERVER_SCRIPT.to_string()],
                timeout: Some(300),
                ..Default::default()
            },
        );
        let summary = manager.initialize(config).await.unwrap();
        assert_eq!(summary.connected, 1);
        assert_eq!(summary.tool_names, vec!["web_search"]);
    }

    (HybridBridge::new(registry, manager.clone()), manager)
}

#[tokio::test]
async fn native_tool_wins_naming_conflicts() {
    let (bridge, manager) = build_bridge(true).await;

    let text = r#"<web_search><params>{"query": "tokenizer"}</params></web_search>"#;
    let call = bridge.hybrid_parse(text).await.unwrap();

    assert_eq!(call.kind, ToolCallKind::Native);
    assert_eq!(call.tool_name, "web_search");
    assert_eq!(call.params["query"], "tokenizer");

    manager.disconnect().await;
}

#[tokio::test]
async fn native_execution_flows_through_execute_from_xml() {
    let (bridge, _manager) = build_bridge(false).await;

    let text = r#"<web_search><params>{"query": "tokenizer"}</params></web_search>"#;
    let outcome = bridge.execute_from_xml(text).await;

    assert!(outcome.success);
    assert_eq!(outcome.tool_name.as_deref(), Some("web_search"));
    assert_eq!(
        outcome.result.unwrap()["matches"][0],
        "native match for tokenizer"
    );
}

#[tokio::test]
async fn mcp_execution_errors_are_captured_not_thrown() {
    let (_native_bridge, manager) = build_bridge(true).await;

    // Only the MCP side knows this qualified name; the scripted server
    // never answers tools/call, so the call times out.
    let registry = Arc::new(ToolRegistry::new());
    let bridge = HybridBridge::new(registry, manager.clone());

    let text = r#"<web_search><params>{"query": "x"}</params></web_search>"#;
    let call = bridge.hybrid_parse(text).await.unwrap();
    assert_eq!(call.kind, ToolCallKind::Mcp);

    let outcome = bridge.execute_from_xml(text).await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("timed out"));

    manager.disconnect().await;
}

#[tokio::test]
async fn unrecognized_output_reports_no_match() {
    let (bridge, _manager) = build_bridge(false).await;

    let outcome = bridge.execute_from_xml("Just prose, no tool call.").await;
    assert!(!outcome.success);
    assert!(outcome.tool_name.is_none());
    assert!(outcome
        .error
        .unwrap()
        .contains("No tool invocation recognized"));
}

#[tokio::test]
async fn thinking_wrapper_does_not_hide_the_call() {
    let (bridge, _manager) = build_bridge(false).await;

    let text = "<thinking>search locally first</thinking>\
                <web_search><params>{\"query\": \"lexer\"}</params></web_search>";
    let call = bridge.hybrid_parse(text).await.unwrap();
    assert_eq!(call.kind, ToolCallKind::Native);
    assert_eq!(call.params["query"], "lexer");
}

#[tokio::test]
async fn catalog_renders_native_and_mcp_tools() {
    let (bridge, manager) = build_bridge(true).await;

    let catalog = bridge.render_catalog().await;
    assert!(catalog.contains("## web_search"));
    assert!(catalog.contains("Native search over the local index"));

    manager.disconnect().await;
}
