//! End-to-end manager tests against a scripted stdio MCP server.
//!
//! The fake server is a shell one-liner that prints canned JSON-RPC
//! responses for the `initialize` and `tools/list` requests (ids 1 and
//! 2) and then idles, which is enough to exercise connection, discovery,
//! filtering, qualification and teardown without a real MCP binary.

use quarry_core::QuarryError;
use quarry_mcp::{McpConfig, McpManager, ServerConfig};

const FAKE_SERVER_SCRIPT: &str = concat!(
    r#"printf '%s\n' "#,
    r#"'{"jsonrpc":"2.0","id":"1","result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0.0.1"}}}' "#,
    r#"'{"jsonrpc":"2.0","id":"2","result":{"tools":[{"name":"foo","description":"First","inputSchema":{"type":"object"}},{"name":"bar_x","description":"Second","inputSchema":{"type":"object"}},{"name":"baz","description":"Third","inputSchema":{"type":"object"}}]}}'"#,
    "; sleep 2"
);

fn fake_server() -> ServerConfig {
    ServerConfig {
        command: Some("sh".to_string()),
        args: vec!["-c".to_string(), FAKE_SERVER_SCRIPT.to_string()],
        timeout: Some(2_000),
        ..Default::default()
    }
}

fn broken_server() -> ServerConfig {
    ServerConfig {
        command: Some("/nonexistent/quarry-no-such-binary".to_string()),
        ..Default::default()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("quarry_mcp=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn failed_servers_are_isolated_from_healthy_ones() {
    init_tracing();

    let mut config = McpConfig::new();
    config.mcp_servers.insert("good".to_string(), fake_server());
    config
        .mcp_servers
        .insert("bad".to_string(), broken_server());

    let manager = McpManager::new();
    let summary = manager.initialize(config).await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.connected, 1);
    assert_eq!(
        summary.tool_names,
        vec!["good_bar_x", "good_baz", "good_foo"]
    );

    // Nothing from the failed server leaked into the registry
    assert!(summary.tool_names.iter().all(|n| n.starts_with("good_")));
    assert_eq!(manager.connected_servers().await, vec!["good"]);

    manager.disconnect().await;
}

#[tokio::test]
async fn allowed_methods_restrict_the_catalog() {
    init_tracing();

    let mut server = fake_server();
    server.allowed_methods = Some(vec!["foo".to_string(), "bar_*".to_string()]);

    let mut config = McpConfig::new();
    config.mcp_servers.insert("lens".to_string(), server);

    let manager = McpManager::new();
    let summary = manager.initialize(config).await.unwrap();

    assert_eq!(summary.connected, 1);
    assert_eq!(summary.tool_names, vec!["lens_bar_x", "lens_foo"]);

    manager.disconnect().await;
}

#[tokio::test]
async fn invalid_timeout_skips_the_owning_server() {
    init_tracing();

    let mut server = fake_server();
    server.timeout = Some(-5);

    let mut config = McpConfig::new();
    config.mcp_servers.insert("invalid".to_string(), server);

    let manager = McpManager::new();
    let summary = manager.initialize(config).await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.connected, 0);
    assert!(summary.tool_names.is_empty());
}

#[tokio::test]
async fn call_against_a_silent_server_times_out() {
    init_tracing();

    let mut server = fake_server();
    // Short enough to expire quickly; the fake never answers tools/call
    server.timeout = Some(300);

    let mut config = McpConfig::new();
    config.mcp_servers.insert("mute".to_string(), server);

    let manager = McpManager::new();
    let summary = manager.initialize(config).await.unwrap();
    assert_eq!(summary.connected, 1);

    let err = manager
        .call_tool("mute_foo", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::TimeoutError(300)));

    manager.disconnect().await;
}

#[tokio::test]
async fn unknown_tool_is_rejected() {
    let manager = McpManager::new();
    let err = manager
        .call_tool("nowhere_nothing", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Unknown MCP tool"));
}

#[tokio::test]
async fn disconnect_is_idempotent_after_connect() {
    init_tracing();

    let mut config = McpConfig::new();
    config.mcp_servers.insert("good".to_string(), fake_server());

    let manager = McpManager::new();
    let summary = manager.initialize(config).await.unwrap();
    assert_eq!(summary.connected, 1);

    manager.disconnect().await;
    manager.disconnect().await;

    assert!(manager.connected_servers().await.is_empty());
    assert!(manager.tool_names().await.is_empty());
}
