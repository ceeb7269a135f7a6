//! Minimal MCP stdio client: spawns a subprocess, speaks newline-delimited
//! JSON-RPC over its stdin/stdout, and correlates our outbound requests with
//! their responses.
//!
//! Grounded on two idioms from the upstream Codex workspace:
//! - the stdin-reader / processor / stdout-writer task split in
//!   `mcp-server/src/lib.rs` (here collapsed to reader + writer, since there
//!   is no separate "process" stage on the client side — incoming requests
//!   go straight to a registered handler);
//! - the atomic-id correlation map with oneshot callbacks from
//!   `mcp-server/src/outgoing_message.rs`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mcp_types::CallToolRequestParams;
use mcp_types::CallToolResult;
use mcp_types::ClientCapabilities;
use mcp_types::Implementation;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::JSONRPC_VERSION;
use mcp_types::ListToolsResult;
use mcp_types::MCP_PROTOCOL_VERSION;
use mcp_types::RequestId;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::timeout as tokio_timeout;
use tracing::debug;
use tracing::error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum McpClientError {
    #[error("failed to spawn `{program}`: {source}. Is it installed and on PATH?")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request `{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("request canceled")]
    Aborted,
    #[error("disconnected transport")]
    Disconnected,
    #[error("peer returned an error: {0:?}")]
    PeerError(JSONRPCErrorError),
    #[error("malformed response: {0}")]
    Malformed(String),
}

type PendingMap = Mutex<HashMap<RequestId, oneshot::Sender<Result<serde_json::Value, McpClientError>>>>;

/// A handler the client registers for requests the *peer* initiates against
/// us (elicitation is the only one this hub needs, but the surface is
/// general).
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, method: &str, params: Option<serde_json::Value>) -> Result<serde_json::Value, JSONRPCErrorError>;
}

pub struct McpClient {
    child: Mutex<Child>,
    stdin_tx: mpsc::Sender<JSONRPCMessage>,
    next_id: AtomicI64,
    pending: Arc<PendingMap>,
    disconnected: Arc<std::sync::atomic::AtomicBool>,
    handler: Arc<Mutex<Option<Arc<dyn RequestHandler>>>>,
    notification_handler: Arc<Mutex<Option<Arc<dyn Fn(JSONRPCNotification) + Send + Sync>>>>,
}

impl McpClient {
    pub async fn new_stdio_client(
        program: String,
        args: Vec<String>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, McpClientError> {
        let mut cmd = Command::new(&program);
        cmd.args(&args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        if let Some(env) = env {
            cmd.env_clear();
            cmd.envs(env);
        }

        let mut child = cmd.spawn().map_err(|source| McpClientError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| McpClientError::Malformed("no stdout pipe".into()))?;
        let mut stdin = child.stdin.take().ok_or_else(|| McpClientError::Malformed("no stdin pipe".into()))?;

        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let disconnected = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let handler: Arc<Mutex<Option<Arc<dyn RequestHandler>>>> = Arc::new(Mutex::new(None));
        let notification_handler: Arc<Mutex<Option<Arc<dyn Fn(JSONRPCNotification) + Send + Sync>>>> =
            Arc::new(Mutex::new(None));

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<JSONRPCMessage>(128);

        // Writer task: serialize outgoing messages one line at a time.
        tokio::spawn(async move {
            while let Some(msg) = stdin_rx.recv().await {
                let line = match serde_json::to_string(&msg) {
                    Ok(l) => l,
                    Err(e) => {
                        error!("failed to serialize outgoing message: {e}");
                        continue;
                    }
                };
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    debug!("mcp client stdin closed");
                    break;
                }
            }
        });

        // Reader task: parse frames, dispatch responses to pending map or
        // incoming requests/notifications to the registered handlers.
        let pending_for_reader = pending.clone();
        let disconnected_for_reader = disconnected.clone();
        let handler_for_reader = handler.clone();
        let notification_handler_for_reader = notification_handler.clone();
        let reply_tx = stdin_tx.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(l)) => l,
                    Ok(None) => break,
                    Err(e) => {
                        error!("mcp client stdout read error: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let msg: JSONRPCMessage = match serde_json::from_str(&line) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("dropping unparseable line from agent: {e}");
                        continue;
                    }
                };
                match msg {
                    JSONRPCMessage::Response(JSONRPCResponse { id, result, .. }) => {
                        resolve_pending(&pending_for_reader, id, Ok(result)).await;
                    }
                    JSONRPCMessage::Error(JSONRPCError { id, error, .. }) => {
                        resolve_pending(&pending_for_reader, id, Err(McpClientError::PeerError(error))).await;
                    }
                    JSONRPCMessage::Notification(n) => {
                        if let Some(h) = notification_handler_for_reader.lock().await.clone() {
                            h(n);
                        }
                    }
                    JSONRPCMessage::Request(req) => {
                        let handler = handler_for_reader.lock().await.clone();
                        let reply_tx = reply_tx.clone();
                        tokio::spawn(async move {
                            let reply = match handler {
                                Some(h) => match h.handle(&req.method, req.params).await {
                                    Ok(result) => JSONRPCMessage::Response(JSONRPCResponse {
                                        jsonrpc: JSONRPC_VERSION.to_string(),
                                        id: req.id,
                                        result,
                                    }),
                                    Err(error) => JSONRPCMessage::Error(JSONRPCError {
                                        jsonrpc: JSONRPC_VERSION.to_string(),
                                        id: req.id,
                                        error,
                                    }),
                                },
                                None => JSONRPCMessage::Error(JSONRPCError {
                                    jsonrpc: JSONRPC_VERSION.to_string(),
                                    id: req.id,
                                    error: JSONRPCErrorError::method_not_found(&req.method),
                                }),
                            };
                            let _ = reply_tx.send(reply).await;
                        });
                    }
                }
            }
            disconnected_for_reader.store(true, Ordering::SeqCst);
            let mut pending = pending_for_reader.lock().await;
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(McpClientError::Disconnected));
            }
        });

        Ok(Self {
            child: Mutex::new(child),
            stdin_tx,
            next_id: AtomicI64::new(0),
            pending,
            disconnected,
            handler,
            notification_handler,
        })
    }

    pub async fn register_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.handler.lock().await = Some(handler);
    }

    pub async fn set_notification_handler<F>(&self, handler: F)
    where
        F: Fn(JSONRPCNotification) + Send + Sync + 'static,
    {
        *self.notification_handler.lock().await = Some(Arc::new(handler));
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    async fn send_request_raw(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpClientError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(McpClientError::Disconnected);
        }
        let id = RequestId::Integer(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let request = JSONRPCMessage::Request(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        });
        if self.stdin_tx.send(request).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(McpClientError::Disconnected);
        }

        match tokio_timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpClientError::Aborted),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpClientError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    pub async fn initialize(
        &self,
        client_info: Implementation,
        timeout: Duration,
    ) -> Result<InitializeResult, McpClientError> {
        let params = InitializeRequestParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            client_info,
            capabilities: ClientCapabilities {
                elicitation: Some(serde_json::json!({})),
            },
        };
        let value = self
            .send_request_raw("initialize", Some(serde_json::to_value(params).map_err(|e| McpClientError::Malformed(e.to_string()))?), timeout)
            .await?;
        serde_json::from_value(value).map_err(|e| McpClientError::Malformed(e.to_string()))
    }

    pub async fn list_tools(&self, timeout: Duration) -> Result<ListToolsResult, McpClientError> {
        let value = self.send_request_raw("tools/list", None, timeout).await?;
        serde_json::from_value(value).map_err(|e| McpClientError::Malformed(e.to_string()))
    }

    pub async fn call_tool(
        &self,
        name: String,
        arguments: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<CallToolResult, McpClientError> {
        let params = CallToolRequestParams { name, arguments };
        let value = self
            .send_request_raw("tools/call", Some(serde_json::to_value(params).map_err(|e| McpClientError::Malformed(e.to_string()))?), timeout)
            .await?;
        serde_json::from_value(value).map_err(|e| McpClientError::Malformed(e.to_string()))
    }

    /// Send an arbitrary request (used by the hub transport layer for
    /// protocol extensions not modeled above, e.g. custom `thread/*`
    /// methods tunneled over MCP).
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpClientError> {
        self.send_request_raw(method, params, timeout).await
    }

    pub async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
    }
}

async fn resolve_pending(
    pending: &PendingMap,
    id: RequestId,
    result: Result<serde_json::Value, McpClientError>,
) {
    let sender = pending.lock().await.remove(&id);
    match sender {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => {
            warn!("dropping response for unknown request id {id:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[tokio::test]
    async fn spawn_failure_names_missing_program() {
        let err = McpClient::new_stdio_client(
            "definitely-not-a-real-binary-xyz".to_string(),
            vec![],
            None,
        )
        .await
        .expect_err("spawn should fail");
        assert!(matches!(err, McpClientError::Spawn { .. }));
        assert!(err.to_string().contains("PATH"));
    }

    #[tokio::test]
    async fn echo_server_round_trips_tools_list() {
        // `cat` echoes each stdin line back on stdout, which is not a valid
        // JSON-RPC peer, so we only assert that a request that never gets a
        // reply times out cleanly rather than hanging forever.
        let client = McpClient::new_stdio_client("cat".to_string(), vec![], None)
            .await
            .expect("cat should spawn");
        let err = client
            .list_tools(Duration::from_millis(50))
            .await
            .expect_err("cat will not reply with a JSON-RPC response");
        assert!(matches!(err, McpClientError::Timeout { .. }));
        client.disconnect().await;
    }
}
