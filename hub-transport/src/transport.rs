//! C1: `AgentTransport` (§4.1, §4.2) — the shared contract both the
//! app-server and MCP variants implement.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mcp_types::Implementation;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::cancellation::CancellationToken;

pub const INIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const INTERRUPT_TIMEOUT: Duration = Duration::from_secs(30);
pub const LONG_LIVED_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 14);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("aborted")]
    Aborted,
    #[error("disconnected transport")]
    Disconnected,
    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("failed to spawn `{program}`: {source}. Is it installed and on PATH?")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartThreadParams {
    pub cwd: String,
    pub model: Option<String>,
    pub sandbox: hub_protocol::config::SandboxMode,
    pub approval_policy: hub_protocol::config::ApprovalPolicy,
    pub resume_token: Option<String>,
}

impl StartThreadParams {
    pub fn new(cwd: impl Into<String>, cfg: &hub_protocol::config::HubConfig) -> Self {
        Self {
            cwd: cwd.into(),
            model: cfg.model.clone(),
            sandbox: cfg.sandbox,
            approval_policy: cfg.approval_policy,
            resume_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartTurnParams {
    pub thread_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStartOk {
    pub thread_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnStartOk {
    pub turn_id: Option<String>,
}

#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handler returns a result or throws; the transport wraps throws as
    /// error responses with code -32603, unknown methods as -32601 (§4.1).
    async fn handle(&self, params: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

pub trait NotificationHandler: Send + Sync {
    fn handle(&self, raw: serde_json::Value);
}

/// C1. Speaks a line-delimited request/notification protocol with a spawned
/// agent child; parses framed messages; correlates requests to responses;
/// routes incoming requests to registered handlers (§4.1).
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Idempotent (§4.1 "Lifecycle").
    async fn connect(&self) -> Result<(), TransportError>;
    async fn disconnect(&self);

    async fn initialize(&self, client_info: Implementation) -> Result<Implementation, TransportError>;

    async fn start_thread(
        &self,
        params: StartThreadParams,
        cancel: CancellationToken,
    ) -> Result<ThreadStartOk, TransportError>;

    async fn resume_thread(
        &self,
        params: StartThreadParams,
        cancel: CancellationToken,
    ) -> Result<ThreadStartOk, TransportError>;

    async fn start_turn(
        &self,
        params: StartTurnParams,
        cancel: CancellationToken,
    ) -> Result<TurnStartOk, TransportError>;

    async fn interrupt_turn(&self, thread_id: String, turn_id: Option<String>) -> Result<(), TransportError>;

    fn register_request_handler(&self, method: &str, handler: std::sync::Arc<dyn RequestHandler>);
    fn set_notification_handler(&self, handler: std::sync::Arc<dyn NotificationHandler>);
}

/// Extension the MCP variant exposes for drifted ids (§4.2).
#[derive(Debug, Clone, Default)]
pub struct McpIdentity {
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub thread_id: Option<String>,
}

/// Scans an arbitrary JSON value for `session_id|conversation_id|thread_id`
/// keys, first-set-wins per id kind within this value, last-seen-wins across
/// updates (§4.2): a later call to `merge_mcp_identity` overwrites an
/// earlier one's result, but within a single call only the first occurrence
/// of each kind is kept.
pub fn merge_mcp_identity(identity: &mut McpIdentity, value: &serde_json::Value) {
    let mut found = McpIdentity::default();
    scan(value, &mut found);
    if found.session_id.is_some() {
        identity.session_id = found.session_id;
    }
    if found.conversation_id.is_some() {
        identity.conversation_id = found.conversation_id;
    }
    if found.thread_id.is_some() {
        identity.thread_id = found.thread_id;
    }
}

fn scan(value: &serde_json::Value, found: &mut McpIdentity) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                match k.as_str() {
                    "session_id" | "sessionId" => {
                        if found.session_id.is_none() {
                            if let Some(s) = v.as_str() {
                                found.session_id = Some(s.to_string());
                            }
                        }
                    }
                    "conversation_id" | "conversationId" => {
                        if found.conversation_id.is_none() {
                            if let Some(s) = v.as_str() {
                                found.conversation_id = Some(s.to_string());
                            }
                        }
                    }
                    "thread_id" | "threadId" => {
                        if found.thread_id.is_none() {
                            if let Some(s) = v.as_str() {
                                found.thread_id = Some(s.to_string());
                            }
                        }
                    }
                    _ => {}
                }
                scan(v, found);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                scan(item, found);
            }
        }
        _ => {}
    }
}

/// Candidate keys scanned, in order, for a tool-call id (§4.3). A small,
/// data-driven extractor rather than reflection (§9).
pub const CALL_ID_KEYS: &[&str] = &["call_id", "callId", "tool_call_id", "toolCallId", "id"];

pub fn extract_call_id(value: &serde_json::Value) -> Option<String> {
    let obj = value.as_object()?;
    for key in CALL_ID_KEYS {
        if let Some(s) = obj.get(*key).and_then(|v| v.as_str()) {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportEnvVars(pub HashMap<String, String>);

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn merge_identity_first_set_wins_per_kind_last_seen_across_updates() {
        let mut identity = McpIdentity::default();
        merge_mcp_identity(&mut identity, &serde_json::json!({"session_id": "s1"}));
        assert_eq!(identity.session_id.as_deref(), Some("s1"));

        merge_mcp_identity(&mut identity, &serde_json::json!({"session_id": "s2"}));
        assert_eq!(identity.session_id.as_deref(), Some("s2"), "last-seen-wins across updates");
    }

    #[test]
    fn merge_identity_keeps_first_occurrence_within_a_single_value() {
        // serde_json's default map type iterates keys in sorted order, so
        // "session_id" is visited before "zzz_nested".
        let mut identity = McpIdentity::default();
        let value = serde_json::json!({
            "session_id": "outer",
            "zzz_nested": {"session_id": "inner"}
        });
        merge_mcp_identity(&mut identity, &value);
        assert_eq!(identity.session_id.as_deref(), Some("outer"));
    }

    #[test]
    fn merge_identity_recurses_into_nested_content() {
        let mut identity = McpIdentity::default();
        let value = serde_json::json!({
            "structuredContent": {"thread_id": "t1"},
            "content": [{"type": "text", "meta": {"conversation_id": "c1"}}]
        });
        merge_mcp_identity(&mut identity, &value);
        assert_eq!(identity.thread_id.as_deref(), Some("t1"));
        assert_eq!(identity.conversation_id.as_deref(), Some("c1"));
    }

    #[test]
    fn extract_call_id_scans_fixed_ordered_keys() {
        assert_eq!(extract_call_id(&serde_json::json!({"callId": "a"})), Some("a".into()));
        assert_eq!(extract_call_id(&serde_json::json!({"call_id": "a", "id": "b"})), Some("a".into()));
        assert_eq!(extract_call_id(&serde_json::json!({"id": "only"})), Some("only".into()));
        assert_eq!(extract_call_id(&serde_json::json!({"other": "x"})), None);
        assert_eq!(extract_call_id(&serde_json::json!({"id": ""})), None, "empty string is not a valid id");
    }
}
