//! Stdio transport implementation for process-based MCP servers

use async_trait::async_trait;
use quarry_core::{QuarryError, Result};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info};

use super::{resolve_env_value, Transport};
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Stdio transport for process-based MCP servers. Messages are
/// line-delimited JSON over the child's standard streams.
pub struct StdioTransport {
    /// Child process handle
    process: Arc<Mutex<Option<Child>>>,

    /// Process stdin for sending data
    stdin: Arc<Mutex<Option<tokio::process::ChildStdin>>>,

    /// Channel for receiving responses
    response_rx: Arc<Mutex<mpsc::Receiver<JsonRpcResponse>>>,

    /// Process metadata
    command: String,
    args: Vec<String>,

    /// Connection state
    connected: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command", &self.command)
            .field("args", &self.args)
            .finish()
    }
}

impl StdioTransport {
    /// Spawn the server process with the configured environment merged
    /// over the ambient one.
    pub async fn new(
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        _timeout: u64,
    ) -> Result<Self> {
        info!("Starting MCP server via stdio: {} {:?}", command, args);

        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &env {
            cmd.env(key, resolve_env_value(value));
        }

        let mut child = cmd.spawn().map_err(|e| {
            QuarryError::McpError(format!("Failed to spawn MCP server process: {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| QuarryError::McpError("Failed to get process stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| QuarryError::McpError("Failed to get process stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| QuarryError::McpError("Failed to get process stderr".into()))?;

        let (response_tx, response_rx) = mpsc::channel::<JsonRpcResponse>(100);
        let connected = Arc::new(RwLock::new(true));

        // stdout reader: one JSON-RPC message per line
        let connected_reader = connected.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        info!("MCP server process stdout closed");
                        *connected_reader.write().await = false;
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        debug!("Received from MCP server: {}", trimmed);

                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(response) => {
                                if let Err(e) = response_tx.send(response).await {
                                    error!("Failed to send response through channel: {}", e);
                                }
                            }
                            Err(e) => {
                                debug!("Non-JSON-RPC message from server: {} - {}", trimmed, e);
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error reading from MCP server stdout: {}", e);
                        *connected_reader.write().await = false;
                        break;
                    }
                }
            }
        });

        // stderr reader, drained to the log
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            debug!("MCP server stderr: {}", trimmed);
                        }
                    }
                    Err(e) => {
                        error!("Error reading from MCP server stderr: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            process: Arc::new(Mutex::new(Some(child))),
            stdin: Arc::new(Mutex::new(Some(stdin))),
            response_rx: Arc::new(Mutex::new(response_rx)),
            command,
            args,
            connected,
        })
    }

    async fn write_line(&self, json: String) -> Result<()> {
        let mut stdin_guard = self.stdin.lock().await;
        let Some(stdin) = stdin_guard.as_mut() else {
            return Err(QuarryError::McpError("Process stdin not available".into()));
        };

        debug!("Sending to MCP server: {}", json);
        stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| QuarryError::McpError(format!("Failed to write to stdin: {e}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| QuarryError::McpError(format!("Failed to write newline: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| QuarryError::McpError(format!("Failed to flush stdin: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<()> {
        let json = serde_json::to_string(&request)?;
        self.write_line(json).await
    }

    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()> {
        let json = serde_json::to_string(&notification)?;
        self.write_line(json).await
    }

    async fn receive_response(&mut self) -> Result<Option<JsonRpcResponse>> {
        let mut rx_guard = self.response_rx.lock().await;

        match rx_guard.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(QuarryError::McpError("Response channel disconnected".into()))
            }
        }
    }

    async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    async fn close(&mut self) -> Result<()> {
        info!("Closing stdio transport");

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }

        if let Some(mut child) = self.process.lock().await.take() {
            match child.kill().await {
                Ok(_) => info!("MCP server process terminated"),
                Err(e) => error!("Failed to kill MCP server process: {}", e),
            }
        }

        *self.connected.write().await = false;
        Ok(())
    }
}
