//! C? PermissionPipeline (§4.4): elicit, decide, reply.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;

use hub_protocol::config::CollaborationMode;
use hub_protocol::config::PermissionMode;
use hub_protocol::event::AgentEvent;
use hub_protocol::permission::CompletedRequest;
use hub_protocol::permission::CompletionStatus;
use hub_protocol::permission::Decision;
use hub_protocol::permission::PermissionDecision;
use hub_protocol::permission::PermissionKind;
use hub_protocol::permission::PermissionRequest;
use tokio::sync::oneshot;

/// The hub's own title-change tool, in either transport's naming (§4.4
/// "Decide", rule 3).
fn is_title_change_tool(name: &str) -> bool {
    name == "change_title" || name == "happy__change_title"
}

/// Override hints may extend the read-only mode's allow/write lists per
/// call (§4.4 "Decide", rule 2 final bullet).
#[derive(Debug, Clone, Default)]
pub struct OverrideHints {
    pub extra_allow: HashSet<String>,
    pub extra_write: HashSet<String>,
}

const DEFAULT_READ_ONLY_ALLOWLIST: &[&str] = &["read_file", "list_dir", "grep", "glob", "search"];
const DEFAULT_READ_ONLY_WRITELIST: &[&str] = &["shell", "apply_patch", "write_file", "exec"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoDecision {
    Approved,
    ApprovedForSession,
    Blocked,
    NoRule,
}

/// Auto-approval rules, evaluated when no pending client handler exists and
/// the transport prompts synchronously (§4.4 "Decide", rule 2).
pub fn auto_approval(
    permission_mode: PermissionMode,
    kind: PermissionKind,
    tool_name: &str,
    hints: &OverrideHints,
) -> AutoDecision {
    if is_title_change_tool(tool_name) {
        return match permission_mode {
            PermissionMode::Yolo => AutoDecision::ApprovedForSession,
            PermissionMode::SafeYolo => AutoDecision::Approved,
            _ => AutoDecision::NoRule,
        };
    }

    match permission_mode {
        PermissionMode::Yolo => AutoDecision::ApprovedForSession,
        PermissionMode::SafeYolo => AutoDecision::Approved,
        PermissionMode::ReadOnly => {
            let _ = kind;
            if hints.extra_allow.contains(tool_name) || DEFAULT_READ_ONLY_ALLOWLIST.contains(&tool_name) {
                AutoDecision::Approved
            } else if hints.extra_write.contains(tool_name) || DEFAULT_READ_ONLY_WRITELIST.contains(&tool_name) {
                AutoDecision::Blocked
            } else {
                AutoDecision::NoRule
            }
        }
        PermissionMode::Default => AutoDecision::NoRule,
    }
}

/// Decision source recorded for observability, not part of the wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    ClientResponse,
    AutoApproval,
}

struct Pending {
    request: PermissionRequest,
    resolver: oneshot::Sender<Result<PermissionDecision, String>>,
}

/// Transport-native reply shapes (§4.4 "Reply").
#[derive(Debug, Clone, PartialEq)]
pub enum AppServerReply {
    Accept,
    AcceptForSession,
    Decline,
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct McpElicitReply {
    pub action: &'static str,
    pub content: Option<serde_json::Value>,
}

pub fn decision_to_app_server_reply(decision: &PermissionDecision) -> AppServerReply {
    match decision.decision {
        Decision::Approved => AppServerReply::Accept,
        Decision::ApprovedForSession => AppServerReply::AcceptForSession,
        Decision::Denied => AppServerReply::Decline,
        Decision::Abort => AppServerReply::Cancel,
    }
}

/// Synthesizes MCP elicitation `content` by inspecting the requested
/// schema's declared properties (§4.4 "Reply"). If the schema declares no
/// properties, only `action` is returned.
pub fn decision_to_mcp_elicit_reply(decision: &PermissionDecision, schema_properties: &[&str]) -> McpElicitReply {
    let action = match decision.decision {
        Decision::Approved | Decision::ApprovedForSession => "accept",
        Decision::Denied => "decline",
        Decision::Abort => "cancel",
    };

    if schema_properties.is_empty() {
        return McpElicitReply { action, content: None };
    }

    let mut content = serde_json::Map::new();
    for prop in schema_properties {
        match *prop {
            "decision" => {
                let raw = serde_json::to_value(decision.decision).unwrap_or(serde_json::Value::Null);
                content.insert("decision".into(), raw);
            }
            "approved" => {
                content.insert("approved".into(), serde_json::Value::Bool(decision.is_approval()));
            }
            "allow" => {
                content.insert("allow".into(), serde_json::Value::Bool(decision.is_approval()));
            }
            "reason" => {
                if let Some(reason) = &decision.reason {
                    content.insert("reason".into(), serde_json::Value::String(reason.clone()));
                }
            }
            _ => {}
        }
    }
    McpElicitReply {
        action,
        content: Some(serde_json::Value::Object(content)),
    }
}

/// Owns in-flight permission requests for one session. Elicit registers a
/// pending promise; decide resolves it (from a client response or an
/// auto-approval rule); finalize moves it into `completedRequests`.
#[derive(Default)]
pub struct PermissionPipeline {
    pending: Mutex<HashMap<String, Pending>>,
}

impl PermissionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthesizes the request, emits the outbound `tool-call` the caller
    /// should publish, and returns a receiver that resolves once `decide`
    /// or `reset` settles it (§4.4 "Elicit").
    pub fn elicit(
        &self,
        id: Option<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        kind: PermissionKind,
    ) -> (PermissionRequest, AgentEvent, oneshot::Receiver<Result<PermissionDecision, String>>) {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let request = PermissionRequest::new(id.clone(), tool_name, input.clone(), kind);
        let event = AgentEvent::ToolCall {
            name: request.display_tool_name(),
            call_id: id.clone(),
            input,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id,
            Pending {
                request: request.clone(),
                resolver: tx,
            },
        );
        (request, event, rx)
    }

    /// Attempts to auto-approve a just-elicited request when no client
    /// handler is registered and the transport prompted synchronously.
    /// Returns `true` if a decision was applied.
    pub fn try_auto_approve(
        &self,
        id: &str,
        permission_mode: PermissionMode,
        _collaboration_mode: CollaborationMode,
        hints: &OverrideHints,
    ) -> bool {
        let kind_and_name = {
            let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.get(id).map(|p| (p.request.kind, p.request.tool_name.clone()))
        };
        let Some((kind, tool_name)) = kind_and_name else {
            return false;
        };

        let decision = match auto_approval(permission_mode, kind, &tool_name, hints) {
            AutoDecision::Approved => PermissionDecision {
                decision: Decision::Approved,
                reason: None,
                answers: None,
            },
            AutoDecision::ApprovedForSession => PermissionDecision {
                decision: Decision::ApprovedForSession,
                reason: None,
                answers: None,
            },
            AutoDecision::Blocked | AutoDecision::NoRule => return false,
        };

        self.resolve(id, Ok(decision)).is_ok()
    }

    /// A client response via the `permission` RPC handler carrying
    /// `{id, approved, decision?}` (§4.4 "Decide", rule 1).
    pub fn on_client_response(&self, id: &str, decision: PermissionDecision) -> Result<(), &'static str> {
        self.resolve(id, Ok(decision))
    }

    fn resolve(&self, id: &str, outcome: Result<PermissionDecision, String>) -> Result<(), &'static str> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        match pending {
            Some(p) => {
                let _ = p.resolver.send(outcome);
                Ok(())
            }
            None => Err("unknown or already-resolved request id"),
        }
    }

    /// Finalizes a resolved request into a `CompletedRequest` record
    /// (§4.4 "Finalization").
    pub fn finalize(request: PermissionRequest, decision: &PermissionDecision) -> CompletedRequest {
        let status = match decision.decision {
            Decision::Approved | Decision::ApprovedForSession => CompletionStatus::Approved,
            Decision::Denied => CompletionStatus::Denied,
            Decision::Abort => CompletionStatus::Canceled,
        };
        CompletedRequest {
            request,
            completed_at: chrono::Utc::now(),
            status,
            decision: decision.decision,
            reason: decision.reason.clone(),
        }
    }

    /// On session reset, every pending request is canceled with
    /// `reason: "Session reset"` (§4.4 "Finalization").
    pub fn reset(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for (_, p) in pending.drain() {
            let _ = p.resolver.send(Err("Session reset".to_string()));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn yolo_mode_approves_any_tool_for_session() {
        let hints = OverrideHints::default();
        assert_eq!(
            auto_approval(PermissionMode::Yolo, PermissionKind::Exec, "shell", &hints),
            AutoDecision::ApprovedForSession
        );
    }

    #[test]
    fn safe_yolo_mode_approves_any_tool_once() {
        let hints = OverrideHints::default();
        assert_eq!(
            auto_approval(PermissionMode::SafeYolo, PermissionKind::FileChange, "apply_patch", &hints),
            AutoDecision::Approved
        );
    }

    #[test]
    fn read_only_mode_allows_reads_and_blocks_writes() {
        let hints = OverrideHints::default();
        assert_eq!(
            auto_approval(PermissionMode::ReadOnly, PermissionKind::Exec, "read_file", &hints),
            AutoDecision::Approved
        );
        assert_eq!(
            auto_approval(PermissionMode::ReadOnly, PermissionKind::Exec, "shell", &hints),
            AutoDecision::Blocked
        );
        assert_eq!(
            auto_approval(PermissionMode::ReadOnly, PermissionKind::DynamicTool, "unknown_tool", &hints),
            AutoDecision::NoRule
        );
    }

    #[test]
    fn read_only_override_hints_extend_lists() {
        let mut hints = OverrideHints::default();
        hints.extra_allow.insert("custom_read".to_string());
        assert_eq!(
            auto_approval(PermissionMode::ReadOnly, PermissionKind::DynamicTool, "custom_read", &hints),
            AutoDecision::Approved
        );
    }

    #[test]
    fn title_change_tool_rule_overrides_generic_rules_in_both_yolo_modes() {
        let hints = OverrideHints::default();
        assert_eq!(
            auto_approval(PermissionMode::Yolo, PermissionKind::DynamicTool, "happy__change_title", &hints),
            AutoDecision::ApprovedForSession
        );
        assert_eq!(
            auto_approval(PermissionMode::SafeYolo, PermissionKind::DynamicTool, "change_title", &hints),
            AutoDecision::Approved
        );
        assert_eq!(
            auto_approval(PermissionMode::Default, PermissionKind::DynamicTool, "change_title", &hints),
            AutoDecision::NoRule
        );
    }

    #[test]
    fn default_mode_never_auto_decides() {
        let hints = OverrideHints::default();
        assert_eq!(
            auto_approval(PermissionMode::Default, PermissionKind::Exec, "shell", &hints),
            AutoDecision::NoRule
        );
    }

    #[tokio::test]
    async fn elicit_then_client_response_resolves_the_awaiting_receiver() {
        let pipeline = PermissionPipeline::new();
        let (request, event, rx) = pipeline.elicit(None, "shell", serde_json::json!({}), PermissionKind::Exec);
        assert!(matches!(event, AgentEvent::ToolCall { name, .. } if name == "CodexBash"));

        pipeline
            .on_client_response(&request.id, PermissionDecision::approved())
            .expect("pending request should resolve");

        let decision = rx.await.expect("channel should not be dropped").expect("approved");
        assert!(decision.is_approval());
    }

    #[tokio::test]
    async fn reset_cancels_all_pending_with_session_reset_reason() {
        let pipeline = PermissionPipeline::new();
        let (_, _, rx) = pipeline.elicit(None, "shell", serde_json::json!({}), PermissionKind::Exec);
        pipeline.reset();
        let err = rx.await.expect("channel should not be dropped").expect_err("should be canceled");
        assert_eq!(err, "Session reset");
    }

    #[test]
    fn mcp_reply_with_no_declared_properties_only_carries_action() {
        let reply = decision_to_mcp_elicit_reply(&PermissionDecision::approved(), &[]);
        assert_eq!(reply.action, "accept");
        assert!(reply.content.is_none());
    }

    #[test]
    fn mcp_reply_populates_only_declared_properties() {
        let decision = PermissionDecision::denied("not today");
        let reply = decision_to_mcp_elicit_reply(&decision, &["decision", "reason"]);
        let content = reply.content.unwrap();
        assert_eq!(content["decision"], "denied");
        assert_eq!(content["reason"], "not today");
        assert!(content.get("approved").is_none());
    }

    /// §8 scenario 6: reply schema synthesis for a `{approved, reason}`
    /// elicitation, denied with reason "no".
    #[test]
    fn mcp_reply_schema_synthesis_matches_approved_reason_scenario() {
        let decision = PermissionDecision::denied("no");
        let reply = decision_to_mcp_elicit_reply(&decision, &["approved", "reason"]);
        assert_eq!(reply.action, "decline");
        let content = reply.content.unwrap();
        assert_eq!(content["approved"], false);
        assert_eq!(content["reason"], "no");
        assert!(content.get("decision").is_none());
    }

    #[test]
    fn app_server_reply_maps_each_decision_variant() {
        assert_eq!(decision_to_app_server_reply(&PermissionDecision::approved()), AppServerReply::Accept);
        assert_eq!(
            decision_to_app_server_reply(&PermissionDecision {
                decision: Decision::ApprovedForSession,
                reason: None,
                answers: None
            }),
            AppServerReply::AcceptForSession
        );
        assert_eq!(decision_to_app_server_reply(&PermissionDecision::denied("no")), AppServerReply::Decline);
        assert_eq!(
            decision_to_app_server_reply(&PermissionDecision {
                decision: Decision::Abort,
                reason: None,
                answers: None
            }),
            AppServerReply::Cancel
        );
    }
}
