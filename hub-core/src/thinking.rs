//! C4: the idle finalizer / `thinking` state machine (§4.9).
//!
//! The essential invariant: the finalizer must never clear `thinking` while
//! `ThinkingState::InFlight` — a stale `ready` must not fire mid-turn.

use hub_protocol::store::SessionEvent;
use hub_protocol::store::SessionEventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingState {
    Idle,
    Pending,
    InFlight,
}

pub struct ThinkingFsm {
    state: ThinkingState,
    thinking: bool,
}

impl Default for ThinkingFsm {
    fn default() -> Self {
        Self {
            state: ThinkingState::Idle,
            thinking: false,
        }
    }
}

impl ThinkingFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ThinkingState {
        self.state
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking
    }

    pub fn on_user_message_accepted(&mut self) {
        self.thinking = true;
        self.state = ThinkingState::Pending;
    }

    pub fn on_turn_started(&mut self) {
        self.state = ThinkingState::InFlight;
        self.thinking = true;
    }

    pub fn on_turn_terminal(&mut self) {
        self.thinking = false;
        self.state = ThinkingState::Idle;
    }

    pub fn on_abort(&mut self) {
        self.thinking = false;
        self.state = ThinkingState::Idle;
    }

    pub fn on_isolated_command(&mut self) {
        self.thinking = false;
        self.state = ThinkingState::Idle;
    }

    /// Runs after each loop-body `finally`. Never clears `thinking` while
    /// `InFlight`; emits `ready` only when nothing further is staged, the
    /// queue is empty, and shutdown hasn't been requested.
    pub fn finalize(&mut self, queue_empty: bool, has_staged_message: bool, shutdown_requested: bool, sink: &dyn SessionEventSink) {
        if self.state == ThinkingState::InFlight {
            return;
        }
        self.thinking = false;
        if queue_empty && !has_staged_message && !shutdown_requested {
            sink.emit(SessionEvent::Ready);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Arc<Mutex<Vec<SessionEvent>>>,
    }

    impl SessionEventSink for RecordingSink {
        fn emit(&self, event: SessionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn finalizer_never_clears_thinking_while_in_flight() {
        let mut fsm = ThinkingFsm::new();
        fsm.on_user_message_accepted();
        fsm.on_turn_started();
        let sink = RecordingSink::default();
        fsm.finalize(true, false, false, &sink);
        assert!(fsm.is_thinking(), "thinking must stay true while a turn is in flight");
        assert!(sink.events.lock().unwrap().is_empty(), "ready must not fire mid-turn");
    }

    #[test]
    fn finalizer_emits_ready_when_idle_and_queue_empty() {
        let mut fsm = ThinkingFsm::new();
        fsm.on_user_message_accepted();
        fsm.on_turn_started();
        fsm.on_turn_terminal();
        let sink = RecordingSink::default();
        fsm.finalize(true, false, false, &sink);
        assert!(!fsm.is_thinking());
        assert_eq!(*sink.events.lock().unwrap(), vec![SessionEvent::Ready]);
    }

    #[test]
    fn finalizer_withholds_ready_when_queue_nonempty_or_staged_or_shutting_down() {
        let sink = RecordingSink::default();

        let mut fsm = ThinkingFsm::new();
        fsm.on_turn_terminal();
        fsm.finalize(false, false, false, &sink);
        assert!(sink.events.lock().unwrap().is_empty(), "nonempty queue withholds ready");

        fsm.finalize(true, true, false, &sink);
        assert!(sink.events.lock().unwrap().is_empty(), "staged message withholds ready");

        fsm.finalize(true, false, true, &sink);
        assert!(sink.events.lock().unwrap().is_empty(), "shutdown withholds ready");
    }

    #[test]
    fn abort_and_isolated_command_clear_thinking_and_return_to_idle() {
        let mut fsm = ThinkingFsm::new();
        fsm.on_user_message_accepted();
        fsm.on_abort();
        assert!(!fsm.is_thinking());
        assert_eq!(fsm.state(), ThinkingState::Idle);

        fsm.on_user_message_accepted();
        fsm.on_isolated_command();
        assert!(!fsm.is_thinking());
        assert_eq!(fsm.state(), ThinkingState::Idle);
    }
}
