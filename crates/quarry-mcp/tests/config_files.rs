//! Configuration file loading tests

use quarry_mcp::McpConfig;
use std::io::Write;

#[tokio::test]
async fn loads_json_config() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{
            "mcpServers": {{
                "search": {{ "command": "quarry-search-server", "args": ["--stdio"] }}
            }},
            "settings": {{ "timeout": 10000 }}
        }}"#
    )
    .unwrap();

    let config = McpConfig::load_from_file(file.path()).await.unwrap();
    assert_eq!(config.mcp_servers.len(), 1);
    assert_eq!(config.settings.timeout, 10_000);
    assert_eq!(
        config.mcp_servers["search"].command.as_deref(),
        Some("quarry-search-server")
    );
}

#[tokio::test]
async fn loads_yaml_config() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
        file,
        r#"
mcpServers:
  docs:
    url: https://docs.example/sse
settings:
  retryCount: 1
"#
    )
    .unwrap();

    let config = McpConfig::load_from_file(file.path()).await.unwrap();
    assert_eq!(config.settings.retry_count, 1);
    assert_eq!(
        config.mcp_servers["docs"].url.as_deref(),
        Some("https://docs.example/sse")
    );
}

#[tokio::test]
async fn malformed_json_is_a_config_error() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, "{{ not json").unwrap();

    let err = McpConfig::load_from_file(file.path()).await.unwrap_err();
    assert!(err.to_string().contains("Failed to parse MCP config JSON"));
}

#[tokio::test]
async fn directory_load_merges_in_name_order() {
    let dir = tempfile::tempdir().unwrap();

    std::fs::write(
        dir.path().join("10-base.json"),
        r#"{ "mcpServers": { "a": { "command": "first" } } }"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("20-override.json"),
        r#"{ "mcpServers": { "a": { "command": "second" }, "b": { "command": "extra" } } }"#,
    )
    .unwrap();
    // Non-config files are ignored
    std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

    let configs = McpConfig::load_from_directory(dir.path()).await.unwrap();
    assert_eq!(configs.len(), 2);

    let mut merged = McpConfig::new();
    for config in configs {
        merged.merge(config);
    }

    assert_eq!(merged.mcp_servers.len(), 2);
    assert_eq!(merged.mcp_servers["a"].command.as_deref(), Some("second"));
}

#[tokio::test]
async fn missing_directory_is_empty_not_an_error() {
    let configs = McpConfig::load_from_directory("/nonexistent/quarry-config-dir")
        .await
        .unwrap();
    assert!(configs.is_empty());
}
