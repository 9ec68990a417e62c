//! Connect to the servers configured in an mcp.json file and print the
//! discovered tool catalog.
//!
//! Usage: cargo run --example discover -- [path/to/mcp.json]

use anyhow::Result;
use quarry_mcp::{McpConfig, McpManager};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("quarry_mcp=info").init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "mcp.json".to_string());

    let mut config = McpConfig::load_from_file(&path).await?;
    config.apply_env_overrides();

    let manager = McpManager::new();
    let summary = manager.initialize(config).await?;

    println!(
        "Connected {}/{} servers, {} tools",
        summary.connected,
        summary.total,
        summary.tool_names.len()
    );
    for tool in manager.tools().await {
        println!("  {} [{}] {}", tool.qualified_name, tool.server, tool.description);
    }

    manager.disconnect().await;
    Ok(())
}
