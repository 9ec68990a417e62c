//! SSE (Server-Sent Events) transport implementation for HTTP-based MCP servers

use async_trait::async_trait;
use futures::StreamExt;
use quarry_core::{QuarryError, Result};
use reqwest_eventsource::{Event, EventSource};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info};

use super::{resolve_env_value, Transport};
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// SSE transport: a persistent event stream carries responses while
/// requests are POSTed to a messages endpoint the server announces via
/// an `endpoint` event.
pub struct SseTransport {
    /// Base URL for the SSE endpoint
    url: String,

    /// HTTP headers to include in requests
    headers: HashMap<String, String>,

    /// HTTP client for sending requests
    client: reqwest::Client,

    /// Channel for receiving responses
    response_rx: Arc<Mutex<mpsc::Receiver<JsonRpcResponse>>>,

    /// Connection state
    connected: Arc<RwLock<bool>>,

    /// Discovered messages URL from SSE endpoint event
    messages_url: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("url", &self.url)
            .field("connected", &self.connected)
            .finish()
    }
}

impl SseTransport {
    pub async fn new(
        url: String,
        headers: HashMap<String, String>,
        timeout: u64,
    ) -> Result<Self> {
        info!("Connecting to MCP server via SSE: {}", url);

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(QuarryError::ConfigError(
                "SSE URL must start with http:// or https://".into(),
            ));
        }

        let mut default_headers = reqwest::header::HeaderMap::new();
        for (key, value) in &headers {
            let resolved_value = resolve_env_value(value);

            let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| QuarryError::ConfigError(format!("Invalid header name '{key}': {e}")))?;
            let header_value = reqwest::header::HeaderValue::from_str(&resolved_value)
                .map_err(|e| {
                    QuarryError::ConfigError(format!("Invalid header value for '{key}': {e}"))
                })?;
            default_headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout))
            .default_headers(default_headers)
            .build()
            .map_err(|e| QuarryError::McpError(format!("Failed to build HTTP client: {e}")))?;

        let (response_tx, response_rx) = mpsc::channel::<JsonRpcResponse>(100);

        let sse_url = if url.ends_with("/sse") {
            url.clone()
        } else {
            format!("{}/sse", url.trim_end_matches('/'))
        };

        let request_builder = client.get(&sse_url);

        let connected = Arc::new(RwLock::new(false));
        let connected_listener = connected.clone();
        let messages_url = Arc::new(RwLock::new(None::<String>));
        let messages_url_listener = messages_url.clone();
        let base_url = url.clone();

        tokio::spawn(async move {
            info!("Starting SSE event listener for {}", sse_url);

            let mut stream = match EventSource::new(request_builder) {
                Ok(es) => es,
                Err(e) => {
                    error!("Failed to create EventSource: {}", e);
                    return;
                }
            };

            while let Some(event) = stream.next().await {
                match event {
                    Ok(Event::Open) => {
                        info!("SSE connection opened");
                        *connected_listener.write().await = true;
                    }
                    Ok(Event::Message(msg)) => {
                        debug!("SSE event '{}': {}", msg.event, msg.data);

                        if msg.event == "endpoint" {
                            // Endpoint discovery: the payload is the path of
                            // the messages endpoint
                            let endpoint_url =
                                format!("{}{}", base_url.trim_end_matches('/'), msg.data);
                            info!("Discovered messages endpoint: {}", endpoint_url);
                            *messages_url_listener.write().await = Some(endpoint_url);
                        } else if msg.event == "message" || msg.event.is_empty() {
                            match serde_json::from_str::<JsonRpcResponse>(&msg.data) {
                                Ok(response) => {
                                    if let Err(e) = response_tx.send(response).await {
                                        error!("Failed to send response through channel: {}", e);
                                    }
                                }
                                Err(e) => {
                                    debug!(
                                        "Failed to parse message as JSON-RPC response: {} - {}",
                                        msg.data, e
                                    );
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("SSE stream error: {:?}", e);
                        *connected_listener.write().await = false;
                        break;
                    }
                }
            }

            info!("SSE event listener ended");
            *connected_listener.write().await = false;
        });

        // Allow the stream a beat to open before the first request
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

        Ok(Self {
            url,
            headers,
            client,
            response_rx: Arc::new(Mutex::new(response_rx)),
            connected,
            messages_url,
        })
    }

    /// Send a message via HTTP POST to the messages endpoint
    async fn send_message(&self, json: String) -> Result<()> {
        let messages_url = {
            let url_guard = self.messages_url.read().await;
            match url_guard.as_ref() {
                Some(url) => url.clone(),
                None => format!("{}/messages", self.url.trim_end_matches('/')),
            }
        };

        debug!("Sending message to {}: {}", messages_url, json);

        let mut request = self
            .client
            .post(&messages_url)
            .header("Content-Type", "application/json");

        for (key, value) in &self.headers {
            request = request.header(key, resolve_env_value(value));
        }

        let response = request
            .body(json)
            .send()
            .await
            .map_err(|e| QuarryError::McpError(format!("Failed to send HTTP request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QuarryError::McpError(format!(
                "HTTP request failed with status {status}: {body}"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<()> {
        let json = serde_json::to_string(&request)?;
        self.send_message(json).await
    }

    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()> {
        let json = serde_json::to_string(&notification)?;
        self.send_message(json).await
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
        info!("Closing SSE transport");
        *self.connected.write().await = false;
        Ok(())
    }
}
