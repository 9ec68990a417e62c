//! MCP (Model Context Protocol) integration for Quarry
//!
//! Connects the agent to external tool servers over stdio, SSE,
//! WebSocket and plain HTTP transports, with per-server method
//! filtering and a unified, qualified tool registry.

pub mod client;
pub mod config;
pub mod filter;
pub mod manager;
pub mod tool_adapter;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use config::{McpConfig, ServerConfig, Settings, TransportKind};
pub use filter::{wildcard_matches, MethodFilter};
pub use manager::{InitSummary, McpManager, ToolDescriptor};
pub use tool_adapter::McpToolAdapter;
pub use transport::{Transport, TransportConfig};
pub use types::{ContentItem, McpTool};
