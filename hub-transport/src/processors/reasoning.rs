//! C3: the reasoning stream processor (§4.5 "Reasoning processor").
//!
//! Deltas accumulate. A leading `**...**` marks a titled block: it opens a
//! `CodexReasoning` tool-call on close of the marker and buffers subsequent
//! deltas as that call's content until a section break, `complete`, or
//! `abort` closes it with a `tool-call-result`. Untitled reasoning instead
//! collapses to a single `Reasoning` event on completion.

use hub_protocol::event::AgentEvent;

#[derive(Debug, Default)]
enum Mode {
    #[default]
    Empty,
    CapturingTitle,
    Titled {
        call_id: String,
    },
    Plain,
}

#[derive(Debug, Default)]
pub struct ReasoningProcessor {
    mode: Mode,
    buffer: String,
    content: String,
}

impl ReasoningProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_delta(&mut self, delta: &str) -> Option<AgentEvent> {
        match self.mode {
            Mode::Empty => {
                self.buffer.push_str(delta);
                if self.buffer.len() < 2 && "**".starts_with(self.buffer.as_str()) {
                    // Not enough characters yet to know whether this opens a
                    // titled block; wait for the next delta.
                    None
                } else if self.buffer.starts_with("**") {
                    self.mode = Mode::CapturingTitle;
                    self.try_close_title()
                } else {
                    self.mode = Mode::Plain;
                    let text = std::mem::take(&mut self.buffer);
                    self.content.push_str(&text);
                    None
                }
            }
            Mode::CapturingTitle => {
                self.buffer.push_str(delta);
                self.try_close_title()
            }
            Mode::Titled { .. } | Mode::Plain => {
                self.content.push_str(delta);
                None
            }
        }
    }

    fn try_close_title(&mut self) -> Option<AgentEvent> {
        let rest = &self.buffer[2..];
        let end = rest.find("**")?;
        let title = rest[..end].to_string();
        let trailing = rest[end + 2..].to_string();
        let call_id = uuid::Uuid::new_v4().to_string();
        self.content = trailing;
        self.buffer.clear();
        self.mode = Mode::Titled { call_id: call_id.clone() };
        Some(AgentEvent::ToolCall {
            name: "CodexReasoning".to_string(),
            call_id,
            input: serde_json::json!({ "title": title }),
        })
    }

    /// A section break closes a titled block with `completed`; untitled
    /// reasoning has nothing to close at a section boundary.
    pub fn on_section_break(&mut self) -> Option<AgentEvent> {
        self.close(false)
    }

    /// `complete(text)` closes a titled block as `completed`, or — for
    /// untitled reasoning — publishes the single accumulated `Reasoning`
    /// event.
    pub fn on_complete(&mut self) -> Option<AgentEvent> {
        match std::mem::take(&mut self.mode) {
            Mode::Plain => {
                let text = std::mem::take(&mut self.content);
                self.reset();
                if text.is_empty() { None } else { Some(AgentEvent::Reasoning { text }) }
            }
            Mode::Titled { call_id } => self.finish(call_id, false),
            _ => {
                self.reset();
                None
            }
        }
    }

    pub fn on_abort(&mut self) -> Option<AgentEvent> {
        self.close(true)
    }

    fn close(&mut self, aborted: bool) -> Option<AgentEvent> {
        match std::mem::take(&mut self.mode) {
            Mode::Titled { call_id } => self.finish(call_id, aborted),
            _ => {
                self.reset();
                None
            }
        }
    }

    fn finish(&mut self, call_id: String, aborted: bool) -> Option<AgentEvent> {
        let content = std::mem::take(&mut self.content);
        self.reset();
        Some(AgentEvent::ToolCallResult {
            call_id,
            output: serde_json::Value::String(content),
            is_error: Some(aborted),
        })
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.content.clear();
        self.mode = Mode::Empty;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn untitled_reasoning_collapses_to_one_event_on_complete() {
        let mut p = ReasoningProcessor::new();
        assert!(p.on_delta("thinking about ").is_none());
        assert!(p.on_delta("the problem").is_none());
        let event = p.on_complete().unwrap();
        assert!(matches!(event, AgentEvent::Reasoning { text } if text == "thinking about the problem"));
    }

    #[test]
    fn titled_reasoning_opens_tool_call_and_closes_on_complete() {
        let mut p = ReasoningProcessor::new();
        let opened = p.on_delta("**Plan**body text").unwrap();
        let call_id = match opened {
            AgentEvent::ToolCall { name, call_id, input } => {
                assert_eq!(name, "CodexReasoning");
                assert_eq!(input["title"], "Plan");
                call_id
            }
            other => panic!("unexpected: {other:?}"),
        };
        assert!(p.on_delta(" more").is_none());
        let closed = p.on_complete().unwrap();
        match closed {
            AgentEvent::ToolCallResult { call_id: closed_id, output, is_error } => {
                assert_eq!(closed_id, call_id);
                assert_eq!(output, serde_json::json!("body text more"));
                assert_eq!(is_error, Some(false));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn abort_marks_titled_result_as_error() {
        let mut p = ReasoningProcessor::new();
        p.on_delta("**Step**doing it").unwrap();
        let closed = p.on_abort().unwrap();
        assert!(matches!(closed, AgentEvent::ToolCallResult { is_error: Some(true), .. }));
    }

    #[test]
    fn title_split_across_multiple_deltas_still_detected() {
        let mut p = ReasoningProcessor::new();
        assert!(p.on_delta("*").is_none());
        assert!(p.on_delta("*Ti").is_none());
        let opened = p.on_delta("tle**rest").unwrap();
        assert!(matches!(opened, AgentEvent::ToolCall { .. }));
    }
}
