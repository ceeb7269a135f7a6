//! C1: the MCP variant of `AgentTransport` (§4.2). Wraps `mcp-client` and
//! tunnels the same `initialize`/`startThread`/`resumeThread`/`startTurn`/
//! `interruptTurn` method names over MCP's generic `send_request` escape
//! hatch, since those are not modeled as first-class MCP methods.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mcp_client::McpClient;
use mcp_client::McpClientError;
use mcp_types::Implementation;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::warn;

use crate::cancellation::CancellationToken;
use crate::transport::AgentTransport;
use crate::transport::INIT_TIMEOUT;
use crate::transport::INTERRUPT_TIMEOUT;
use crate::transport::LONG_LIVED_TIMEOUT;
use crate::transport::McpIdentity;
use crate::transport::NotificationHandler;
use crate::transport::RequestHandler;
use crate::transport::StartThreadParams;
use crate::transport::StartTurnParams;
use crate::transport::ThreadStartOk;
use crate::transport::TransportError;
use crate::transport::TurnStartOk;
use crate::transport::merge_mcp_identity;

/// Newer agents expose `mcp-server`; older ones only `mcp` (§4.2).
async fn detect_subcommand(program: &str) -> &'static str {
    let output = Command::new(program).arg("--version").output().await;
    match output {
        Ok(out) if out.status.success() => {
            let text = String::from_utf8_lossy(&out.stdout);
            if version_supports_mcp_server(&text) { "mcp-server" } else { "mcp" }
        }
        _ => "mcp-server",
    }
}

fn version_supports_mcp_server(version_text: &str) -> bool {
    // Oldest agent releases print a bare "0.x.y"; anything with a leading
    // component >= 1 (or any non-numeric release tag) has `mcp-server`.
    let trimmed = version_text.trim();
    match trimmed.split('.').next().and_then(|s| s.trim_start_matches(|c: char| !c.is_ascii_digit()).parse::<u32>().ok()) {
        Some(major) => major >= 1,
        None => true,
    }
}

fn is_disconnected_error(err: &McpClientError) -> bool {
    matches!(err, McpClientError::Disconnected) || err.to_string().contains("disconnected transport")
}

struct ElicitationBridge {
    handler: Arc<dyn RequestHandler>,
}

#[async_trait]
impl mcp_client::RequestHandler for ElicitationBridge {
    async fn handle(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, mcp_types::JSONRPCErrorError> {
        if method != "elicitation/create" {
            return Err(mcp_types::JSONRPCErrorError::method_not_found(method));
        }
        let params = params.unwrap_or(serde_json::Value::Null);
        self.handler
            .handle(params)
            .await
            .map_err(|e| mcp_types::JSONRPCErrorError::internal_error(e.to_string()))
    }
}

pub struct McpTransport {
    program: String,
    extra_args: Vec<String>,
    env: Option<HashMap<String, String>>,
    client: Arc<Mutex<Option<Arc<McpClient>>>>,
    identity: Mutex<McpIdentity>,
    elicitation_handler: Arc<Mutex<Option<Arc<dyn RequestHandler>>>>,
    notification_handler: Arc<Mutex<Option<Arc<dyn NotificationHandler>>>>,
}

impl McpTransport {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>, env: Option<HashMap<String, String>>) -> Self {
        Self {
            program: program.into(),
            extra_args,
            env,
            client: Arc::new(Mutex::new(None)),
            identity: Mutex::new(McpIdentity::default()),
            elicitation_handler: Arc::new(Mutex::new(None)),
            notification_handler: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn identity(&self) -> McpIdentity {
        self.identity.lock().await.clone()
    }

    async fn client_handle(&self) -> Result<Arc<McpClient>, TransportError> {
        self.client.lock().await.clone().ok_or(TransportError::Disconnected)
    }

    async fn record_identity(&self, value: &serde_json::Value) {
        let mut identity = self.identity.lock().await;
        merge_mcp_identity(&mut identity, value);
    }

    fn map_err(err: McpClientError) -> TransportError {
        match err {
            McpClientError::Spawn { program, source } => TransportError::Spawn { program, source },
            McpClientError::Timeout { method, timeout } => TransportError::Timeout { method, timeout },
            McpClientError::Aborted => TransportError::Aborted,
            McpClientError::Disconnected => TransportError::Disconnected,
            McpClientError::PeerError(e) => TransportError::Protocol(e.message),
            McpClientError::Malformed(s) => TransportError::Protocol(s),
        }
    }

    async fn tunneled(&self, method: &str, params: serde_json::Value, timeout: std::time::Duration) -> Result<serde_json::Value, TransportError> {
        let client = self.client_handle().await?;
        match client.send_request(method, Some(params), timeout).await {
            Ok(value) => {
                self.record_identity(&value).await;
                Ok(value)
            }
            Err(e) if is_disconnected_error(&e) => {
                warn!("mcp transport disconnected during `{method}`, resetting for retry");
                *self.client.lock().await = None;
                Err(TransportError::Disconnected)
            }
            Err(e) => Err(Self::map_err(e)),
        }
    }
}

#[async_trait]
impl AgentTransport for McpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.client.lock().await.is_some() {
            return Ok(());
        }
        let subcommand = detect_subcommand(&self.program).await;
        let client = McpClient::new_stdio_client(
            self.program.clone(),
            {
                let mut args = vec![subcommand.to_string()];
                args.extend(self.extra_args.clone());
                args
            },
            self.env.clone(),
        )
        .await
        .map_err(Self::map_err)?;

        if let Some(handler) = self.elicitation_handler.lock().await.clone() {
            client
                .register_request_handler(Arc::new(ElicitationBridge { handler }))
                .await;
        }
        if let Some(handler) = self.notification_handler.lock().await.clone() {
            client
                .set_notification_handler(move |n| {
                    handler.handle(serde_json::json!({"method": n.method, "params": n.params}));
                })
                .await;
        }

        *self.client.lock().await = Some(Arc::new(client));
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.disconnect().await;
        }
        *self.identity.lock().await = McpIdentity::default();
    }

    async fn initialize(&self, client_info: Implementation) -> Result<Implementation, TransportError> {
        let client = self.client_handle().await?;
        let result = client.initialize(client_info, INIT_TIMEOUT).await.map_err(Self::map_err)?;
        Ok(result.server_info)
    }

    async fn start_thread(
        &self,
        params: StartThreadParams,
        cancel: CancellationToken,
    ) -> Result<ThreadStartOk, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Aborted);
        }
        let value = tokio::select! {
            res = self.tunneled("startThread", serde_json::to_value(params).unwrap_or_default(), LONG_LIVED_TIMEOUT) => res?,
            _ = cancel.cancelled() => return Err(TransportError::Aborted),
        };
        serde_json::from_value(value).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn resume_thread(
        &self,
        params: StartThreadParams,
        cancel: CancellationToken,
    ) -> Result<ThreadStartOk, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Aborted);
        }
        let value = tokio::select! {
            res = self.tunneled("resumeThread", serde_json::to_value(params).unwrap_or_default(), LONG_LIVED_TIMEOUT) => res?,
            _ = cancel.cancelled() => return Err(TransportError::Aborted),
        };
        serde_json::from_value(value).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn start_turn(
        &self,
        params: StartTurnParams,
        cancel: CancellationToken,
    ) -> Result<TurnStartOk, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Aborted);
        }
        let value = tokio::select! {
            res = self.tunneled("startTurn", serde_json::to_value(params).unwrap_or_default(), LONG_LIVED_TIMEOUT) => res?,
            _ = cancel.cancelled() => return Err(TransportError::Aborted),
        };
        serde_json::from_value(value).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn interrupt_turn(&self, thread_id: String, turn_id: Option<String>) -> Result<(), TransportError> {
        self.tunneled(
            "interruptTurn",
            serde_json::json!({"threadId": thread_id, "turnId": turn_id}),
            INTERRUPT_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    /// Registration is expected before `connect` (RemoteLauncher wires the
    /// permission pipeline before choosing/connecting a transport); the
    /// handler is applied to the live client as soon as one exists.
    fn register_request_handler(&self, method: &str, handler: Arc<dyn RequestHandler>) {
        if method != "elicitation/create" {
            return;
        }
        let elicitation_slot = self.elicitation_handler.clone();
        let client_slot = self.client.clone();
        tokio::spawn(async move {
            *elicitation_slot.lock().await = Some(handler.clone());
            if let Some(client) = client_slot.lock().await.clone() {
                client.register_request_handler(Arc::new(ElicitationBridge { handler })).await;
            }
        });
    }

    fn set_notification_handler(&self, handler: Arc<dyn NotificationHandler>) {
        let notification_slot = self.notification_handler.clone();
        let client_slot = self.client.clone();
        tokio::spawn(async move {
            *notification_slot.lock().await = Some(handler.clone());
            if let Some(client) = client_slot.lock().await.clone() {
                client
                    .set_notification_handler(move |n| {
                        handler.handle(serde_json::json!({"method": n.method, "params": n.params}));
                    })
                    .await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn version_text_without_leading_digit_assumes_mcp_server() {
        assert!(version_supports_mcp_server("agent-cli dev build"));
    }

    #[test]
    fn version_text_with_major_zero_uses_legacy_mcp() {
        assert!(!version_supports_mcp_server("0.9.2"));
    }

    #[test]
    fn version_text_with_major_one_uses_mcp_server() {
        assert!(version_supports_mcp_server("1.4.0"));
    }

    #[test]
    fn disconnected_error_detection_covers_both_shapes() {
        assert!(is_disconnected_error(&McpClientError::Disconnected));
        assert!(!is_disconnected_error(&McpClientError::Aborted));
    }
}
