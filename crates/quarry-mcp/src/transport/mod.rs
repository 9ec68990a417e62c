//! Transport layer for MCP communication
//!
//! Provides transport abstractions for MCP communication with support for:
//! - Stdio (process-based) transport
//! - SSE (Server-Sent Events) transport
//! - WebSocket transport
//! - Plain HTTP request/response transport

use async_trait::async_trait;
use quarry_core::Result;
use std::collections::HashMap;
use std::fmt::Debug;

use crate::config::{ServerConfig, TransportKind};
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

pub mod http;
pub mod sse;
pub mod stdio;
pub mod websocket;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use websocket::WebSocketTransport;

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send a JSON-RPC request
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<()>;

    /// Send a JSON-RPC notification (no response expected)
    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()>;

    /// Receive a JSON-RPC response, if one is pending
    async fn receive_response(&mut self) -> Result<Option<JsonRpcResponse>>;

    /// Check if transport is connected
    async fn is_connected(&self) -> bool;

    /// Close the transport connection
    async fn close(&mut self) -> Result<()>;
}

/// Resolved transport configuration for one server. Construction
/// validates required fields; `create_transport` performs the actual
/// connection establishment.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        timeout: u64,
    },
    Sse {
        url: String,
        headers: HashMap<String, String>,
        timeout: u64,
    },
    WebSocket {
        url: String,
        timeout: u64,
    },
    Http {
        url: String,
        headers: HashMap<String, String>,
        timeout: u64,
    },
}

impl TransportConfig {
    /// Build a validated transport configuration from a server entry.
    /// Unknown kinds and missing URL/command fail here, synchronously,
    /// before any network or spawn attempt.
    pub fn from_server(config: &ServerConfig, timeout: u64) -> Result<Self> {
        let kind = config.transport_kind()?;

        Ok(match kind {
            TransportKind::Stdio => TransportConfig::Stdio {
                // transport_kind() guarantees command presence
                command: config.command.clone().unwrap_or_default(),
                args: config.args.clone(),
                env: config.env.clone(),
                timeout,
            },
            TransportKind::Sse => TransportConfig::Sse {
                url: config.url.clone().unwrap_or_default(),
                headers: config.headers.clone(),
                timeout,
            },
            TransportKind::Websocket => TransportConfig::WebSocket {
                url: config.url.clone().unwrap_or_default(),
                timeout,
            },
            TransportKind::Http => TransportConfig::Http {
                url: config.url.clone().unwrap_or_default(),
                headers: config.headers.clone(),
                timeout,
            },
        })
    }

    /// Create a transport instance from configuration
    pub async fn create_transport(&self) -> Result<Box<dyn Transport>> {
        match self {
            TransportConfig::Stdio {
                command,
                args,
                env,
                timeout,
            } => {
                let transport =
                    StdioTransport::new(command.clone(), args.clone(), env.clone(), *timeout)
                        .await?;
                Ok(Box::new(transport))
            }
            TransportConfig::Sse {
                url,
                headers,
                timeout,
            } => {
                let transport = SseTransport::new(url.clone(), headers.clone(), *timeout).await?;
                Ok(Box::new(transport))
            }
            TransportConfig::WebSocket { url, timeout } => {
                let transport = WebSocketTransport::new(url.clone(), *timeout).await?;
                Ok(Box::new(transport))
            }
            TransportConfig::Http {
                url,
                headers,
                timeout,
            } => {
                let transport = HttpTransport::new(url.clone(), headers.clone(), *timeout).await?;
                Ok(Box::new(transport))
            }
        }
    }

    /// Get transport type as string
    pub fn transport_type(&self) -> &str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Sse { .. } => "sse",
            TransportConfig::WebSocket { .. } => "websocket",
            TransportConfig::Http { .. } => "http",
        }
    }
}

/// Resolve `${VAR}` and `${VAR:-default}` patterns in configured values.
pub(crate) fn resolve_env_value(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let inner = &value[2..value.len() - 1];

        if let Some((var_name, default)) = inner.split_once(":-") {
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        } else {
            std::env::var(inner).unwrap_or_else(|_| value.to_string())
        }
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_server_validates_missing_command() {
        let config = ServerConfig::default();
        assert!(TransportConfig::from_server(&config, 30_000).is_err());
    }

    #[test]
    fn test_from_server_resolves_websocket() {
        let config = ServerConfig {
            url: Some("wss://example.com/mcp".to_string()),
            ..Default::default()
        };
        let transport = TransportConfig::from_server(&config, 30_000).unwrap();
        assert_eq!(transport.transport_type(), "websocket");
    }

    #[test]
    fn test_resolve_env_value() {
        std::env::set_var("QUARRY_TRANSPORT_TEST_VAR", "resolved");
        assert_eq!(
            resolve_env_value("${QUARRY_TRANSPORT_TEST_VAR}"),
            "resolved"
        );
        assert_eq!(resolve_env_value("${QUARRY_NO_SUCH_VAR:-fallback}"), "fallback");
        assert_eq!(resolve_env_value("plain"), "plain");
    }
}
