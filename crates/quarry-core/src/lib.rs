//! Core error types shared across the Quarry workspace.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("MCP communication error: {0}")]
    McpError(String),

    #[error("Tool execution failed for '{tool}': {message}")]
    ToolError { tool: String, message: String },

    #[error("Request timed out after {0}ms")]
    TimeoutError(u64),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, QuarryError>;
