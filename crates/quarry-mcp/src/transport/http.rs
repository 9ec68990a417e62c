//! Plain HTTP request/response transport
//!
//! No persistent connection: each send is an independent POST to the
//! server's message endpoint, and the HTTP response body carries the
//! JSON-RPC response. Construction calls the initialize endpoint once.

use async_trait::async_trait;
use quarry_core::{QuarryError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::{resolve_env_value, Transport};
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

pub struct HttpTransport {
    /// Base URL of the server
    url: String,

    /// HTTP headers to include in requests
    headers: HashMap<String, String>,

    client: reqwest::Client,

    /// Responses parsed out of POST bodies, in arrival order
    pending: Arc<Mutex<VecDeque<JsonRpcResponse>>>,

    connected: Arc<RwLock<bool>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .field("connected", &self.connected)
            .finish()
    }
}

impl HttpTransport {
    pub async fn new(
        url: String,
        headers: HashMap<String, String>,
        timeout: u64,
    ) -> Result<Self> {
        info!("Connecting to MCP server via HTTP: {}", url);

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(QuarryError::ConfigError(
                "HTTP URL must start with http:// or https://".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout))
            .build()
            .map_err(|e| QuarryError::McpError(format!("Failed to build HTTP client: {e}")))?;

        let transport = Self {
            url,
            headers,
            client,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            connected: Arc::new(RwLock::new(false)),
        };

        // One-shot session establishment; no stream is kept open.
        transport.post("initialize", "{}".to_string()).await?;
        *transport.connected.write().await = true;

        Ok(transport)
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), name)
    }

    /// POST a body to an endpoint; a non-empty response body is parsed
    /// as a JSON-RPC response and queued for `receive_response`.
    async fn post(&self, endpoint: &str, json: String) -> Result<()> {
        let url = self.endpoint(endpoint);
        debug!("POST {}: {}", url, json);

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        for (key, value) in &self.headers {
            request = request.header(key, resolve_env_value(value));
        }

        let response = request
            .body(json)
            .send()
            .await
            .map_err(|e| QuarryError::McpError(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QuarryError::McpError(format!(
                "HTTP request failed with status {status}: {body}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| QuarryError::McpError(format!("Failed to read HTTP body: {e}")))?;

        if !body.trim().is_empty() {
            match serde_json::from_str::<JsonRpcResponse>(&body) {
                Ok(parsed) => self.pending.lock().await.push_back(parsed),
                Err(e) => debug!("Non-JSON-RPC body from server: {} - {}", body, e),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<()> {
        let json = serde_json::to_string(&request)?;
        self.post("message", json).await
    }

    async fn send_notification(&mut self, notification: JsonRpcNotification) -> Result<()> {
        let json = serde_json::to_string(&notification)?;
        self.post("message", json).await
    }

    async fn receive_response(&mut self) -> Result<Option<JsonRpcResponse>> {
        Ok(self.pending.lock().await.pop_front())
    }

    async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    async fn close(&mut self) -> Result<()> {
        info!("Closing HTTP transport");
        *self.connected.write().await = false;
        Ok(())
    }
}
