//! C2: pure, deterministic conversion of raw agent events into the uniform
//! `AgentEvent` union (§4.3). No I/O — grounded on the Submission/Event queue
//! shapes in `core/src/protocol.rs`, generalized to the two wire shapes the
//! hub actually receives (app-server notifications, MCP journal envelopes).

use std::collections::HashMap;

use hub_protocol::event::AgentEvent;
use hub_protocol::event::FileChange;
use hub_protocol::event::PlanEntry;
use hub_protocol::event::TokenCountInfo;
use serde::Deserialize;
use serde_json::Value;

use crate::transport::extract_call_id;

/// Decoder state carried across calls so notifications that omit
/// `threadId`/`turnId` (most do, after the first) still populate those
/// fields on the produced event (§4.3).
#[derive(Debug, Clone, Default)]
pub struct DecoderState {
    pub thread_id: Option<String>,
    pub turn_id: Option<String>,
}

impl DecoderState {
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&mut self, value: &Value) {
        if let Some(id) = field(value, &["threadId", "thread_id"]) {
            self.thread_id = Some(id);
        }
        if let Some(id) = field(value, &["turnId", "turn_id"]) {
            self.turn_id = Some(id);
        }
    }
}

fn field(value: &Value, keys: &[&str]) -> Option<String> {
    let obj = value.as_object()?;
    for key in keys {
        if let Some(s) = obj.get(*key).and_then(Value::as_str) {
            return Some(s.to_string());
        }
    }
    None
}

fn words(value: &Value, keys: &[&str]) -> Option<Vec<String>> {
    let obj = value.as_object()?;
    for key in keys {
        if let Some(arr) = obj.get(*key).and_then(Value::as_array) {
            return Some(arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());
        }
    }
    None
}

/// Converts an app-server notification's `{method, params}` body into an
/// `AgentEvent`. Field names are normalized snake/camel before matching.
pub fn convert_app_server_notification(state: &mut DecoderState, method: &str, params: &Value) -> Option<AgentEvent> {
    state.observe(params);

    match method {
        "agentMessage" | "agent_message" => Some(AgentEvent::Message {
            text: field(params, &["text", "message"])?,
        }),
        "agentReasoning" | "agent_reasoning" => Some(AgentEvent::Reasoning {
            text: field(params, &["text"])?,
        }),
        "agentReasoningDelta" | "agent_reasoning_delta" => Some(AgentEvent::ReasoningDelta {
            text: field(params, &["text", "delta"])?,
        }),
        "agentReasoningSectionBreak" | "agent_reasoning_section_break" => Some(AgentEvent::ReasoningSectionBreak),
        "taskStarted" | "task_started" => Some(AgentEvent::TaskStarted {
            turn_id: state.turn_id.clone().unwrap_or_default(),
        }),
        "taskComplete" | "task_complete" => Some(AgentEvent::TaskComplete),
        "turnAborted" | "turn_aborted" => Some(AgentEvent::TurnAborted),
        "taskFailed" | "task_failed" => Some(AgentEvent::TaskFailed {
            error: field(params, &["message", "error"]),
        }),
        "patchBegin" | "patch_begin" => Some(AgentEvent::PatchBegin {
            call_id: extract_call_id(params).unwrap_or_default(),
            changes: params
                .get("changes")
                .cloned()
                .and_then(|v| serde_json::from_value::<HashMap<String, FileChange>>(v).ok())
                .unwrap_or_default(),
        }),
        "patchEnd" | "patch_end" => Some(AgentEvent::PatchEnd {
            call_id: extract_call_id(params).unwrap_or_default(),
            stdout: field(params, &["stdout"]),
            stderr: field(params, &["stderr"]),
            success: params.get("success").and_then(Value::as_bool).unwrap_or(false),
        }),
        "execBegin" | "exec_begin" => Some(AgentEvent::ExecBegin {
            call_id: extract_call_id(params).unwrap_or_default(),
            command: words(params, &["command"]).unwrap_or_default(),
        }),
        "execEnd" | "exec_end" => Some(AgentEvent::ExecEnd {
            call_id: extract_call_id(params).unwrap_or_default(),
            output: field(params, &["output", "stdout"]),
            error: field(params, &["error", "stderr"]),
        }),
        "turnDiff" | "turn_diff" => Some(AgentEvent::TurnDiff {
            unified_diff: field(params, &["unifiedDiff", "unified_diff"])?,
        }),
        "planUpdated" | "plan_updated" => {
            let entries: Vec<PlanEntry> = params
                .get("plan")
                .or_else(|| params.get("entries"))
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            Some(AgentEvent::PlanUpdated { entries })
        }
        "tokenCount" | "token_count" => {
            let info: TokenCountInfo = serde_json::from_value(params.clone()).ok()?;
            Some(AgentEvent::TokenCount { info })
        }
        "threadStarted" | "thread_started" => Some(AgentEvent::ThreadStarted {
            thread_id: state.thread_id.clone().or_else(|| field(params, &["threadId", "thread_id"])).unwrap_or_default(),
        }),
        "mcpStartupUpdate" | "mcp_startup_update" => Some(AgentEvent::McpStartupUpdate),
        "mcpStartupComplete" | "mcp_startup_complete" => Some(AgentEvent::McpStartupComplete),
        "contextCompacted" | "context_compacted" => Some(AgentEvent::ContextCompacted),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct JournalEnvelope {
    #[serde(rename = "type")]
    kind: String,
    payload: Value,
}

/// Converts a single MCP journal line (`{type, payload}`) into zero or one
/// `AgentEvent`s. Unknown envelope types return nothing (§4.3).
pub fn convert_mcp_journal_line(state: &mut DecoderState, line: &Value) -> Option<AgentEvent> {
    let envelope: JournalEnvelope = serde_json::from_value(line.clone()).ok()?;
    state.observe(&envelope.payload);

    match envelope.kind.as_str() {
        "session_meta" => {
            let session_id = field(&envelope.payload, &["sessionId", "session_id"])?;
            Some(AgentEvent::ThreadStarted { thread_id: session_id })
        }
        "event_msg" => convert_event_msg(&envelope.payload),
        "response_item" => convert_response_item(&envelope.payload),
        _ => None,
    }
}

fn convert_event_msg(payload: &Value) -> Option<AgentEvent> {
    let kind = payload.get("type").and_then(Value::as_str)?;
    match kind {
        "agent_message" => Some(AgentEvent::Message {
            text: field(payload, &["message", "text"])?,
        }),
        "agent_reasoning" => Some(AgentEvent::Reasoning {
            text: field(payload, &["text"])?,
        }),
        "agent_reasoning_delta" => Some(AgentEvent::ReasoningDelta {
            text: field(payload, &["delta", "text"])?,
        }),
        "token_count" => {
            let info: TokenCountInfo = serde_json::from_value(payload.clone()).ok()?;
            Some(AgentEvent::TokenCount { info })
        }
        _ => None,
    }
}

fn convert_response_item(payload: &Value) -> Option<AgentEvent> {
    let kind = payload.get("type").and_then(Value::as_str)?;
    match kind {
        "function_call" => {
            let call_id = extract_call_id(payload)?;
            let name = field(payload, &["name"]).unwrap_or_default();
            let input = payload
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_str::<Value>(s).ok())
                .unwrap_or(Value::Null);
            Some(AgentEvent::ToolCall { name, call_id, input })
        }
        "function_call_output" => {
            let call_id = extract_call_id(payload)?;
            let output = field(payload, &["output"]).map(Value::String).unwrap_or(Value::Null);
            Some(AgentEvent::ToolCallResult {
                call_id,
                output,
                is_error: payload.get("success").and_then(Value::as_bool).map(|ok| !ok),
            })
        }
        _ => None,
    }
}
