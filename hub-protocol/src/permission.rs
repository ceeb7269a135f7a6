//! Permission elicitation data model (§3, §4.4).

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKind {
    Exec,
    FileChange,
    UserInput,
    DynamicTool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub kind: PermissionKind,
}

impl PermissionRequest {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        kind: PermissionKind,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            input,
            created_at: Utc::now(),
            kind,
        }
    }

    /// The outbound tool-call name a client should render for this request
    /// (§4.4 "Elicit", step 1).
    pub fn display_tool_name(&self) -> String {
        match self.kind {
            PermissionKind::Exec => "CodexBash".to_string(),
            PermissionKind::FileChange => "CodexPatch".to_string(),
            PermissionKind::UserInput => self.tool_name.clone(),
            PermissionKind::DynamicTool => "CodexPermission".to_string(),
        }
    }
}

/// An ordered list of string answers per question id, used only for
/// `userInput` kind requests.
pub type AnswerMap = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    ApprovedForSession,
    Denied,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<AnswerMap>,
}

impl PermissionDecision {
    pub fn approved() -> Self {
        Self {
            decision: Decision::Approved,
            reason: None,
            answers: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Denied,
            reason: Some(reason.into()),
            answers: None,
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(self.decision, Decision::Approved | Decision::ApprovedForSession)
    }
}

/// Terminal status a `PermissionRequest` moves to in
/// `agent_state.completedRequests` (§4.4 "Finalization").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Approved,
    Denied,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRequest {
    pub request: PermissionRequest,
    pub completed_at: DateTime<Utc>,
    pub status: CompletionStatus,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn display_tool_name_maps_by_kind() {
        let exec = PermissionRequest::new("1", "shell", serde_json::json!({}), PermissionKind::Exec);
        assert_eq!(exec.display_tool_name(), "CodexBash");

        let patch = PermissionRequest::new("2", "apply_patch", serde_json::json!({}), PermissionKind::FileChange);
        assert_eq!(patch.display_tool_name(), "CodexPatch");

        let user_input =
            PermissionRequest::new("3", "ask_user", serde_json::json!({}), PermissionKind::UserInput);
        assert_eq!(user_input.display_tool_name(), "ask_user");

        let dynamic = PermissionRequest::new("4", "weird_tool", serde_json::json!({}), PermissionKind::DynamicTool);
        assert_eq!(dynamic.display_tool_name(), "CodexPermission");
    }

    #[test]
    fn is_approval_covers_both_approve_variants() {
        assert!(PermissionDecision::approved().is_approval());
        assert!(
            PermissionDecision {
                decision: Decision::ApprovedForSession,
                reason: None,
                answers: None,
            }
            .is_approval()
        );
        assert!(!PermissionDecision::denied("no").is_approval());
    }
}
