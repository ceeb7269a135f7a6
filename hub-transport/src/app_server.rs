//! C1: the AppServer variant of `AgentTransport` (§4.1). Spawns `agent
//! app-server` as a child and speaks a line-delimited, untyped JSON-RPC
//! protocol over its stdio — grounded on the reader/writer task split and
//! atomic-id correlation map in `mcp-client`, generalized to a bare
//! request/notification/response shape instead of MCP's typed envelopes.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use mcp_types::Implementation;
use serde::Deserialize;
use serde::Serialize;
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

use crate::cancellation::CancellationToken;
use crate::transport::AgentTransport;
use crate::transport::INIT_TIMEOUT;
use crate::transport::INTERRUPT_TIMEOUT;
use crate::transport::LONG_LIVED_TIMEOUT;
use crate::transport::NotificationHandler;
use crate::transport::RequestHandler;
use crate::transport::StartThreadParams;
use crate::transport::StartTurnParams;
use crate::transport::ThreadStartOk;
use crate::transport::TransportError;
use crate::transport::TurnStartOk;

/// A line carries a request (has `method` and `id`), a notification (has
/// `method`, no `id`), or a response (has `id`, no `method`) — §4.1 "Framing".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Line {
    Request(RawRequest),
    Notification(RawNotification),
    Response(RawResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawRequest {
    id: i64,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNotification {
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawResponse {
    id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RawError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawError {
    code: i64,
    message: String,
}

const METHOD_NOT_FOUND: i64 = -32601;
const INTERNAL_ERROR: i64 = -32603;

type Pending = Mutex<HashMap<i64, oneshot::Sender<Result<serde_json::Value, TransportError>>>>;

/// Protocol-error sentinel raised on a parse failure: rejects every pending
/// request and stops reading further lines (§4.1 "Correlation").
#[derive(Clone)]
struct ProtocolPoison(Arc<StdMutex<Option<String>>>);

impl ProtocolPoison {
    fn new() -> Self {
        Self(Arc::new(StdMutex::new(None)))
    }

    fn poison(&self, reason: String) {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(reason);
        }
    }

    fn reason(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub struct AppServerTransport {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
    stdin_tx: Mutex<Option<mpsc::Sender<String>>>,
    next_id: AtomicI64,
    pending: Arc<Pending>,
    poison: ProtocolPoison,
    request_handlers: Arc<Mutex<HashMap<String, Arc<dyn RequestHandler>>>>,
    notification_handler: Arc<Mutex<Option<Arc<dyn NotificationHandler>>>>,
}

impl AppServerTransport {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
            stdin_tx: Mutex::new(None),
            next_id: AtomicI64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            poison: ProtocolPoison::new(),
            request_handlers: Arc::new(Mutex::new(HashMap::new())),
            notification_handler: Arc::new(Mutex::new(None)),
        }
    }

    async fn reject_all_pending(&self, err: TransportError) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(transport_error_clone(&err)));
        }
    }

    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
        duration: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<serde_json::Value, TransportError> {
        if let Some(reason) = self.poison.reason() {
            return Err(TransportError::Protocol(reason));
        }
        if let Some(cancel) = &cancel {
            if cancel.is_cancelled() {
                return Err(TransportError::Aborted);
            }
        }

        let stdin_tx = {
            let guard = self.stdin_tx.lock().await;
            guard.clone().ok_or(TransportError::Disconnected)?
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let line = serde_json::to_string(&RawRequest {
            id,
            method: method.to_string(),
            params,
        })
        .map_err(|e| TransportError::Protocol(e.to_string()))?;

        if stdin_tx.send(line).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::Disconnected);
        }

        let result = if let Some(cancel) = cancel {
            tokio::select! {
                res = rx => match res {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Aborted),
                },
                _ = cancel.cancelled() => {
                    self.pending.lock().await.remove(&id);
                    Err(TransportError::Aborted)
                }
                _ = tokio::time::sleep(duration) => {
                    self.pending.lock().await.remove(&id);
                    Err(TransportError::Timeout { method: method.to_string(), timeout: duration })
                }
            }
        } else {
            match tokio_timeout(duration, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(TransportError::Aborted),
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    Err(TransportError::Timeout { method: method.to_string(), timeout: duration })
                }
            }
        };
        result
    }
}

fn transport_error_clone(err: &TransportError) -> TransportError {
    match err {
        TransportError::Aborted => TransportError::Aborted,
        TransportError::Disconnected => TransportError::Disconnected,
        TransportError::Timeout { method, timeout } => TransportError::Timeout {
            method: method.clone(),
            timeout: *timeout,
        },
        TransportError::Protocol(s) => TransportError::Protocol(s.clone()),
        TransportError::Spawn { program, .. } => TransportError::Protocol(format!("spawn failure for `{program}`")),
        TransportError::Other(s) => TransportError::Other(s.clone()),
    }
}

#[async_trait]
impl AgentTransport for AppServerTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.child.lock().await.is_some() {
            return Ok(());
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Protocol("no stdout pipe".into()))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Protocol("no stdin pipe".into()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(128);

        tokio::spawn(async move {
            while let Some(line) = stdin_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    debug!("app-server stdin closed");
                    break;
                }
            }
        });

        let pending = self.pending.clone();
        let poison = self.poison.clone();
        let request_handlers = self.request_handlers.clone();
        let notification_handler = self.notification_handler.clone();
        let reply_tx = stdin_tx.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(l)) => l,
                    Ok(None) => break,
                    Err(e) => {
                        error!("app-server stdout read error: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let parsed: Result<Line, _> = serde_json::from_str(&line);
                let msg = match parsed {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("app-server protocol error, poisoning transport: {e}");
                        poison.poison(format!("parse failure: {e}"));
                        let mut pending = pending.lock().await;
                        for (_, tx) in pending.drain() {
                            let _ = tx.send(Err(TransportError::Protocol(format!("parse failure: {e}"))));
                        }
                        break;
                    }
                };
                match msg {
                    Line::Response(RawResponse { id, result, error }) => {
                        let resolved = match (result, error) {
                            (Some(result), _) => Ok(result),
                            (None, Some(error)) => Err(TransportError::Protocol(error.message)),
                            (None, None) => Ok(serde_json::Value::Null),
                        };
                        let sender = pending.lock().await.remove(&id);
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(resolved);
                            }
                            None => warn!("dropping response for unknown request id {id}"),
                        }
                    }
                    Line::Notification(RawNotification { method, params }) => {
                        if let Some(h) = notification_handler.lock().await.clone() {
                            h.handle(serde_json::json!({"method": method, "params": params}));
                        }
                    }
                    Line::Request(RawRequest { id, method, params }) => {
                        let handler = request_handlers.lock().await.get(&method).cloned();
                        let reply_tx = reply_tx.clone();
                        tokio::spawn(async move {
                            let response = match handler {
                                Some(h) => match h.handle(params).await {
                                    Ok(result) => RawResponse {
                                        id,
                                        result: Some(result),
                                        error: None,
                                    },
                                    Err(e) => RawResponse {
                                        id,
                                        result: None,
                                        error: Some(RawError {
                                            code: INTERNAL_ERROR,
                                            message: e.to_string(),
                                        }),
                                    },
                                },
                                None => RawResponse {
                                    id,
                                    result: None,
                                    error: Some(RawError {
                                        code: METHOD_NOT_FOUND,
                                        message: format!("unknown method `{method}`"),
                                    }),
                                },
                            };
                            if let Ok(line) = serde_json::to_string(&response) {
                                let _ = reply_tx.send(line).await;
                            }
                        });
                    }
                }
            }
            let mut pending = pending.lock().await;
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(TransportError::Disconnected));
            }
        });

        *self.stdin_tx.lock().await = Some(stdin_tx);
        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn disconnect(&self) {
        *self.stdin_tx.lock().await = None;
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
        }
        self.reject_all_pending(TransportError::Disconnected).await;
    }

    async fn initialize(&self, client_info: Implementation) -> Result<Implementation, TransportError> {
        let value = self
            .send_request("initialize", serde_json::to_value(client_info).unwrap_or_default(), INIT_TIMEOUT, None)
            .await?;
        serde_json::from_value(value).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn start_thread(
        &self,
        params: StartThreadParams,
        cancel: CancellationToken,
    ) -> Result<ThreadStartOk, TransportError> {
        let value = self
            .send_request(
                "startThread",
                serde_json::to_value(params).unwrap_or_default(),
                LONG_LIVED_TIMEOUT,
                Some(cancel),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn resume_thread(
        &self,
        params: StartThreadParams,
        cancel: CancellationToken,
    ) -> Result<ThreadStartOk, TransportError> {
        let value = self
            .send_request(
                "resumeThread",
                serde_json::to_value(params).unwrap_or_default(),
                LONG_LIVED_TIMEOUT,
                Some(cancel),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn start_turn(
        &self,
        params: StartTurnParams,
        cancel: CancellationToken,
    ) -> Result<TurnStartOk, TransportError> {
        let value = self
            .send_request(
                "startTurn",
                serde_json::to_value(params).unwrap_or_default(),
                LONG_LIVED_TIMEOUT,
                Some(cancel),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn interrupt_turn(&self, thread_id: String, turn_id: Option<String>) -> Result<(), TransportError> {
        self.send_request(
            "interruptTurn",
            serde_json::json!({"threadId": thread_id, "turnId": turn_id}),
            INTERRUPT_TIMEOUT,
            None,
        )
        .await?;
        Ok(())
    }

    fn register_request_handler(&self, method: &str, handler: Arc<dyn RequestHandler>) {
        let handlers = self.request_handlers.clone();
        let method = method.to_string();
        tokio::spawn(async move {
            handlers.lock().await.insert(method, handler);
        });
    }

    fn set_notification_handler(&self, handler: Arc<dyn NotificationHandler>) {
        let slot = self.notification_handler.clone();
        tokio::spawn(async move {
            *slot.lock().await = Some(handler);
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            Ok(params)
        }
    }

    #[tokio::test]
    async fn spawn_failure_names_missing_program() {
        let transport = AppServerTransport::new("definitely-not-a-real-binary-xyz", vec![]);
        let err = transport.connect().await.expect_err("spawn should fail");
        assert!(matches!(err, TransportError::Spawn { .. }));
        assert!(err.to_string().contains("PATH"));
    }

    #[tokio::test]
    async fn start_thread_times_out_cleanly_against_a_non_protocol_child() {
        let transport = AppServerTransport::new("cat", vec![]);
        transport.connect().await.expect("cat should spawn");
        let params = StartThreadParams {
            cwd: "/tmp".into(),
            model: None,
            sandbox: hub_protocol::config::SandboxMode::WorkspaceWrite,
            approval_policy: hub_protocol::config::ApprovalPolicy::Untrusted,
            resume_token: None,
        };

        let cancel = CancellationToken::new();
        let cancel_for_abort = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel_for_abort.cancel();
        });

        let err = transport
            .start_thread(params, cancel)
            .await
            .expect_err("cat never replies");
        assert!(matches!(err, TransportError::Aborted));
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_never_sends() {
        let transport = AppServerTransport::new("cat", vec![]);
        transport.connect().await.expect("cat should spawn");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transport
            .interrupt_turn("t1".into(), Some("u1".into()))
            .await;
        // interrupt_turn has no cancellation token by contract (§4.1), so this
        // exercises the general non-cancelled path instead; separately verify
        // a pre-cancelled token short-circuits start_turn.
        let _ = err;

        let params = StartTurnParams {
            thread_id: "t1".into(),
            text: "hi".into(),
        };
        let err = transport
            .start_turn(params, cancel)
            .await
            .expect_err("pre-cancelled token should short-circuit");
        assert!(matches!(err, TransportError::Aborted));
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn unknown_method_registered_handler_still_works() {
        let transport = AppServerTransport::new("cat", vec![]);
        transport.connect().await.expect("cat should spawn");
        transport.register_request_handler("permission", Arc::new(Echo));
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.disconnect().await;
    }
}
