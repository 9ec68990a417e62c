//! WebSocket transport implementation for network MCP servers

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use quarry_core::{QuarryError, Result};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info};

use super::Transport;
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket transport: a persistent socket whose text frames carry
/// JSON-RPC messages in both directions.
pub struct WebSocketTransport {
    url: String,

    /// Write half of the socket
    sink: Arc<Mutex<Option<WsSink>>>,

    /// Channel for receiving responses
    response_rx: Arc<Mutex<mpsc::Receiver<JsonRpcResponse>>>,

    /// Connection state
    connected: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url)
            .field("connected", &self.connected)
            .finish()
    }
}

impl WebSocketTransport {
    pub async fn new(url: String, timeout: u64) -> Result<Self> {
        info!("Connecting to MCP server via WebSocket: {}", url);

        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(QuarryError::ConfigError(
                "WebSocket URL must start with ws:// or wss://".into(),
            ));
        }

        let connect = connect_async(url.as_str());
        let (ws_stream, _) = tokio::time::timeout(
            std::time::Duration::from_millis(timeout),
            connect,
        )
        .await
        .map_err(|_| QuarryError::TimeoutError(timeout))?
        .map_err(|e| QuarryError::McpError(format!("WebSocket connect failed: {e}")))?;

        let (sink, mut read) = ws_stream.split();
        let (response_tx, response_rx) = mpsc::channel::<JsonRpcResponse>(100);
        let connected = Arc::new(RwLock::new(true));

        let connected_reader = connected.clone();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        debug!("Received from MCP server: {}", text);
                        match serde_json::from_str::<JsonRpcResponse>(&text) {
                            Ok(response) => {
                                if let Err(e) = response_tx.send(response).await {
                                    error!("Failed to send response through channel: {}", e);
                                }
                            }
                            Err(e) => {
                                debug!("Non-JSON-RPC frame from server: {} - {}", text, e);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket closed by server");
                        break;
                    }
                    Ok(_) => {} // ping/pong/binary frames, nothing to do
                    Err(e) => {
                        error!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }

            *connected_reader.write().await = false;
        });

        Ok(Self {
            url,
            sink: Arc::new(Mutex::new(Some(sink))),
            response_rx: Arc::new(Mutex::new(response_rx)),
            connected,
        })
    }

    async fn send_text(&self, json: String) -> Result<()> {
        let mut sink_guard = self.sink.lock().await;
        let Some(sink) = sink_guard.as_mut() else {
            return Err(QuarryError::McpError("WebSocket already closed".into()));
        };

        debug!("Sending to MCP server: {}", json);
        sink.send(Message::Text(json))
            .await
            .map_err(|e| QuarryError::McpError(format!("WebSocket send failed: {e}")))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<()> {
        let json = serde_json::to_string(&request)?;
        self.send_text(json).await
    }

    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()> {
        let json = serde_json::to_string(&notification)?;
        self.send_text(json).await
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
        info!("Closing WebSocket transport");

        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }

        *self.connected.write().await = false;
        Ok(())
    }
}
