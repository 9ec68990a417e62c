//! In-process MCP tool server
//!
//! Exposes the host's own tools to protocol clients over a small HTTP
//! surface, without spawning a subprocess:
//!
//! - `GET /sse` — event stream with a `connected` hello, then broadcasts
//! - `POST /rpc` — JSON-RPC 2.0 envelope (`tools/list`, `tools/call`)
//! - `POST /mcp` — protocol-native request/response, no envelope
//! - `GET /health` — status and gated tool count
//!
//! All responses carry permissive CORS headers; `OPTIONS` answers 204.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::stream::StreamExt;
use quarry_core::{QuarryError, Result};
use quarry_tools::{CapabilityGate, ToolRegistry};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Message fanned out to every open SSE subscriber
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub event: String,
    pub data: Value,
}

#[derive(Clone)]
struct AppState {
    name: String,
    instance_id: Uuid,
    registry: Arc<ToolRegistry>,
    gate: CapabilityGate,
    events: broadcast::Sender<BroadcastMessage>,
    shutdown: watch::Receiver<bool>,
}

struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// HTTP listener serving the host's tool registry to MCP clients.
pub struct InProcessServer {
    name: String,
    instance_id: Uuid,
    registry: Arc<ToolRegistry>,
    gate: CapabilityGate,
    events: broadcast::Sender<BroadcastMessage>,
    running: Mutex<Option<RunningServer>>,
}

impl InProcessServer {
    pub fn new(name: impl Into<String>, registry: Arc<ToolRegistry>, gate: CapabilityGate) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            name: name.into(),
            instance_id: Uuid::new_v4(),
            registry,
            gate,
            events,
            running: Mutex::new(None),
        }
    }

    /// Bind the listener and start serving. Port 0 requests an
    /// OS-assigned ephemeral port; the returned address carries the port
    /// actually bound. Calling `start` while already listening returns
    /// the existing address.
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;

        if let Some(server) = running.as_ref() {
            warn!("In-process server already listening on {}", server.addr);
            return Ok(server.addr);
        }

        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            QuarryError::ServerError(format!("Failed to bind {host}:{port}: {e}"))
        })?;
        let addr = listener
            .local_addr()
            .map_err(|e| QuarryError::ServerError(format!("Failed to read bound address: {e}")))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = AppState {
            name: self.name.clone(),
            instance_id: self.instance_id,
            registry: self.registry.clone(),
            gate: self.gate.clone(),
            events: self.events.clone(),
            shutdown: shutdown_rx.clone(),
        };

        let app = Router::new()
            .route("/sse", get(sse_handler))
            .route("/rpc", post(rpc_handler))
            .route("/mcp", post(mcp_handler))
            .route("/health", get(health_handler))
            .layer(middleware::from_fn(cors_middleware))
            .with_state(state);

        let mut shutdown_wait = shutdown_rx;
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_wait.changed().await;
            });
            if let Err(e) = serve.await {
                error!("In-process server error: {}", e);
            }
        });

        info!("In-process MCP server '{}' listening on {}", self.name, addr);

        *running = Some(RunningServer {
            addr,
            shutdown_tx,
            task,
        });

        Ok(addr)
    }

    /// Address currently bound, if listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|s| s.addr)
    }

    /// Fan a message out to every open SSE subscriber. Returns the
    /// number of subscribers that received it.
    pub fn broadcast(&self, event: &str, data: Value) -> usize {
        let message = BroadcastMessage {
            event: event.to_string(),
            data,
        };
        match self.events.send(message) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Broadcast '{}' had no subscribers", event);
                0
            }
        }
    }

    /// Close every subscriber connection, then the listener. Safe to
    /// call when never started or already stopped.
    pub async fn stop(&self) {
        let Some(server) = self.running.lock().await.take() else {
            debug!("In-process server already stopped");
            return;
        };

        info!("Stopping in-process MCP server '{}'", self.name);
        let _ = server.shutdown_tx.send(true);

        let abort = server.task.abort_handle();
        if tokio::time::timeout(std::time::Duration::from_secs(2), server.task)
            .await
            .is_err()
        {
            warn!("In-process server did not shut down in time, aborting");
            abort.abort();
        }
    }
}

async fn cors_middleware(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let mut shutdown = state.shutdown.clone();

    let hello = json!({
        "server": state.name,
        "instance": state.instance_id,
    });
    let connected = futures::stream::once(async move {
        Ok(Event::default().event("connected").data(hello.to_string()))
    });

    let updates = BroadcastStream::new(rx).filter_map(|message| async move {
        match message {
            Ok(m) => Some(Ok(Event::default().event(m.event).data(m.data.to_string()))),
            // Lagged subscriber: skip the gap, keep streaming
            Err(_) => None,
        }
    });

    let stream = connected.chain(updates).take_until(Box::pin(async move {
        let _ = shutdown.changed().await;
    }));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn rpc_handler(State(state): State<AppState>, body: String) -> Response {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!("Malformed JSON-RPC request: {}", e);
            return Json(json!({
                "jsonrpc": "2.0",
                "error": { "code": -32700, "message": "Parse error" },
                "id": null
            }))
            .into_response();
        }
    };

    let id = parsed.get("id").cloned().unwrap_or(Value::Null);
    let method = parsed
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = parsed.get("params").cloned().unwrap_or(Value::Null);

    match dispatch(&state, &method, params).await {
        Ok(result) => Json(json!({ "jsonrpc": "2.0", "result": result, "id": id })).into_response(),
        Err(rpc_error) => Json(json!({
            "jsonrpc": "2.0",
            "error": { "code": rpc_error.code, "message": rpc_error.message },
            "id": id
        }))
        .into_response(),
    }
}

async fn mcp_handler(State(state): State<AppState>, body: String) -> Response {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!("Malformed MCP request: {}", e);
            return Json(json!({ "error": { "message": "Parse error" } })).into_response();
        }
    };

    let method = parsed
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = parsed.get("params").cloned().unwrap_or(Value::Null);

    match dispatch(&state, &method, params).await {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(rpc_error) => {
            Json(json!({ "error": { "message": rpc_error.message } })).into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let tools = state
        .registry
        .get_all()
        .iter()
        .filter(|t| state.gate.permits(t.name()))
        .count();

    Json(json!({
        "status": "ok",
        "server": state.name,
        "tools": tools,
        "timestamp": chrono::Utc::now(),
    }))
}

struct RpcError {
    code: i32,
    message: String,
}

async fn dispatch(state: &AppState, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
    match method {
        "tools/list" => {
            let mut tools: Vec<Value> = state
                .registry
                .get_all()
                .into_iter()
                .filter(|t| state.gate.permits(t.name()))
                .map(|t| {
                    json!({
                        "name": t.name(),
                        "description": t.description(),
                        "inputSchema": t.schema(),
                    })
                })
                .collect();
            tools.sort_by(|a, b| {
                a["name"]
                    .as_str()
                    .unwrap_or_default()
                    .cmp(b["name"].as_str().unwrap_or_default())
            });
            Ok(json!({ "tools": tools }))
        }
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Err(RpcError {
                    code: -32602,
                    message: "Missing tool name".to_string(),
                });
            };
            let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

            let unqualified = strip_server_prefix(&state.name, name);

            if !state.gate.permits(unqualified) {
                return Ok(error_payload(format!("Tool '{unqualified}' is not enabled")));
            }

            let Some(tool) = state.registry.get(unqualified) else {
                return Ok(error_payload(format!("Unknown tool '{unqualified}'")));
            };

            debug!("Executing host tool '{}'", unqualified);
            match tool.execute(args).await {
                Ok(value) => {
                    let text = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    Ok(json!({
                        "content": [ { "type": "text", "text": text } ],
                        "isError": false
                    }))
                }
                // Execution failures become protocol payloads, never a
                // crashed listener
                Err(e) => Ok(error_payload(e.to_string())),
            }
        }
        other => Err(RpcError {
            code: -32601,
            message: format!("Method not found: {other}"),
        }),
    }
}

fn error_payload(message: String) -> Value {
    json!({
        "content": [ { "type": "text", "text": message } ],
        "isError": true
    })
}

/// Callers may address host tools by a `<server>_<tool>` qualified name;
/// strip our own prefix when present.
fn strip_server_prefix<'a>(server: &str, name: &'a str) -> &'a str {
    let prefix = format!("{server}_");
    name.strip_prefix(&prefix).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_server_prefix() {
        assert_eq!(strip_server_prefix("quarry", "quarry_search"), "search");
        assert_eq!(strip_server_prefix("quarry", "search"), "search");
        // Only our own prefix is stripped
        assert_eq!(strip_server_prefix("quarry", "other_search"), "other_search");
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let server = InProcessServer::new(
            "quarry",
            Arc::new(ToolRegistry::new()),
            CapabilityGate::allow_all(),
        );
        server.stop().await;
        server.stop().await;
        assert!(server.local_addr().await.is_none());
    }

    #[test]
    fn broadcast_without_subscribers_reports_zero() {
        let server = InProcessServer::new(
            "quarry",
            Arc::new(ToolRegistry::new()),
            CapabilityGate::allow_all(),
        );
        assert_eq!(server.broadcast("tick", json!({"n": 1})), 0);
    }
}
