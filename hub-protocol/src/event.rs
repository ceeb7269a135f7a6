//! The uniform event union emitted by [`crate`] consumers (§3, §4.3).
//!
//! Mirrors the tagged-union idiom the upstream Codex `EventMsg` enum uses
//! (`#[serde(tag = "type", rename_all = "snake_case")]`): every branch of
//! the closed set below is what `EventConverter` produces from either raw
//! agent-event shape, and every branch the outbound encoder knows how to
//! render to clients. New, unrecognized raw variants are dropped with a
//! debug log rather than added here unreviewed (see §9, "union-typed
//! messages").

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// One user message -> agent-response cycle; see GLOSSARY "Turn".
pub type TurnId = String;
pub type ThreadId = String;
pub type CallId = String;

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentEvent {
    Message {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ReasoningSectionBreak,

    ToolCall {
        name: String,
        call_id: CallId,
        input: serde_json::Value,
    },
    ToolCallResult {
        call_id: CallId,
        output: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },

    TaskStarted {
        turn_id: TurnId,
    },
    TaskComplete,
    TurnAborted,
    TaskFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    PatchBegin {
        call_id: CallId,
        changes: HashMap<String, FileChange>,
    },
    PatchEnd {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        success: bool,
    },

    ExecBegin {
        call_id: CallId,
        command: Vec<String>,
    },
    ExecEnd {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    TurnDiff {
        unified_diff: String,
    },
    PlanUpdated {
        entries: Vec<PlanEntry>,
    },
    TokenCount {
        info: TokenCountInfo,
    },
    ThreadStarted {
        thread_id: ThreadId,
    },
    McpStartupUpdate,
    McpStartupComplete,
    ContextCompacted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileChange {
    Add { content: String },
    Delete,
    Update { unified_diff: String, move_path: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub step: String,
    pub status: PlanStepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenCountInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Late-bound thread/session identity (§3).
///
/// Set on first successful start, cleared on reset. The two transport
/// variants disagree on vocabulary (`threadId`/`turnId` for app-server vs
/// `sessionId`/`conversationId`/`threadId` for MCP), so this carries both
/// shapes rather than forcing a lossy projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<TurnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ThreadIdentity {
    pub fn is_empty(&self) -> bool {
        self.thread_id.is_none()
            && self.turn_id.is_none()
            && self.session_id.is_none()
            && self.conversation_id.is_none()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn message_round_trips_with_kebab_tag() {
        let ev = AgentEvent::Message { text: "hi".into() };
        let json = serde_json::to_value(&ev).expect("serialize");
        assert_eq!(json["type"], "message");
        assert_eq!(json["text"], "hi");
        let back: AgentEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, ev);
    }

    #[test]
    fn thread_identity_starts_empty_and_clears() {
        let mut id = ThreadIdentity {
            thread_id: Some("t1".into()),
            ..Default::default()
        };
        assert!(!id.is_empty());
        id.clear();
        assert!(id.is_empty());
    }
}
