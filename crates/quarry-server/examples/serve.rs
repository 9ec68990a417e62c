//! Serve a demo tool registry over the in-process HTTP surface.
//!
//! Usage: cargo run --example serve -- [port]
//! Then: curl http://127.0.0.1:<port>/health

use anyhow::Result;
use async_trait::async_trait;
use quarry_server::InProcessServer;
use quarry_tools::{CapabilityGate, Tool, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;

struct UppercaseTool;

#[async_trait]
impl Tool for UppercaseTool {
    fn name(&self) -> &str {
        "uppercase"
    }

    fn description(&self) -> &str {
        "Uppercase the given text"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to transform" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> quarry_core::Result<Value> {
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
        Ok(Value::String(text.to_uppercase()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("quarry_server=debug")
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);

    let registry = Arc::new(ToolRegistry::new());
    registry.register(UppercaseTool)?;

    let server = InProcessServer::new("quarry", registry, CapabilityGate::allow_all());
    let addr = server.start("127.0.0.1", port).await?;
    println!("listening on http://{addr} (GET /health, /sse; POST /rpc, /mcp)");

    tokio::signal::ctrl_c().await?;
    server.stop().await;
    Ok(())
}
