//! C3: the diff stream processor (§4.5 "Diff processor").
//!
//! Stores the last observed unified diff. Each `turn_diff` that differs
//! from what's stored publishes a `CodexDiff` tool-call immediately
//! followed by its completed result. Reset on terminal turn events.

use hub_protocol::event::AgentEvent;

#[derive(Debug, Default)]
pub struct DiffProcessor {
    last_diff: Option<String>,
}

impl DiffProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `[ToolCall, ToolCallResult]` when `unified_diff` is new;
    /// `None` when it matches what's already stored.
    pub fn on_turn_diff(&mut self, unified_diff: &str) -> Option<[AgentEvent; 2]> {
        if self.last_diff.as_deref() == Some(unified_diff) {
            return None;
        }
        self.last_diff = Some(unified_diff.to_string());
        let call_id = uuid::Uuid::new_v4().to_string();
        Some([
            AgentEvent::ToolCall {
                name: "CodexDiff".to_string(),
                call_id: call_id.clone(),
                input: serde_json::json!({ "unifiedDiff": unified_diff }),
            },
            AgentEvent::ToolCallResult {
                call_id,
                output: serde_json::Value::String(unified_diff.to_string()),
                is_error: Some(false),
            },
        ])
    }

    pub fn reset(&mut self) {
        self.last_diff = None;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn identical_diff_is_not_republished() {
        let mut p = DiffProcessor::new();
        assert!(p.on_turn_diff("diff a").is_some());
        assert!(p.on_turn_diff("diff a").is_none());
    }

    #[test]
    fn changed_diff_republishes() {
        let mut p = DiffProcessor::new();
        assert!(p.on_turn_diff("diff a").is_some());
        assert!(p.on_turn_diff("diff b").is_some());
    }

    #[test]
    fn reset_allows_the_same_diff_to_republish() {
        let mut p = DiffProcessor::new();
        p.on_turn_diff("diff a");
        p.reset();
        assert!(p.on_turn_diff("diff a").is_some());
    }
}
