//! C6 LocalLauncher (§4.7): runs the agent child in interactive mode.

use std::process::Stdio;
use std::sync::Arc;

use hub_protocol::session::IsolateCommand;
use hub_protocol::store::SessionEvent;
use hub_protocol::store::SessionEventSink;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::queue::MessageQueue;
use crate::scanner::SessionScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalLoopOutcome {
    /// A non-reset message arrived while the child was running; hand off
    /// to `RemoteLauncher`.
    Switch,
    Exit,
}

/// Intercepts `/new` and `/clear` ahead of the shared queue, recording a
/// `resetCommand` flag rather than forwarding them to the child (§4.7).
pub struct ResetInterceptor {
    reset_command: Mutex<Option<IsolateCommand>>,
}

impl Default for ResetInterceptor {
    fn default() -> Self {
        Self {
            reset_command: Mutex::new(None),
        }
    }
}

impl ResetInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the message was consumed as a reset command
    /// (`/new` or `/clear`) and should not reach the queue's normal
    /// consumer.
    pub async fn intercept(&self, text: &str) -> bool {
        match IsolateCommand::classify(text) {
            Some(cmd @ (IsolateCommand::New | IsolateCommand::Clear)) => {
                *self.reset_command.lock().await = Some(cmd);
                true
            }
            _ => false,
        }
    }

    pub async fn take(&self) -> Option<IsolateCommand> {
        self.reset_command.lock().await.take()
    }
}

/// Spawns and owns the interactive child process (§4.7).
pub struct LocalLauncher {
    program: String,
    args: Vec<String>,
    cwd: String,
    child: Mutex<Option<Child>>,
    interceptor: Arc<ResetInterceptor>,
    scanner: Mutex<Option<Arc<SessionScanner>>>,
}

impl LocalLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            child: Mutex::new(None),
            interceptor: Arc::new(ResetInterceptor::new()),
            scanner: Mutex::new(None),
        }
    }

    pub fn interceptor(&self) -> Arc<ResetInterceptor> {
        self.interceptor.clone()
    }

    /// Spawns the child with inherited stdio (interactive mode).
    pub async fn spawn(&self) -> std::io::Result<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        *self.child.lock().await = Some(child);
        Ok(())
    }

    pub async fn attach_scanner(&self, scanner: Arc<SessionScanner>) {
        *self.scanner.lock().await = Some(scanner);
    }

    async fn teardown_scanner(&self) {
        self.scanner.lock().await.take();
    }

    async fn abort_child(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    /// The per-iteration loop body (§4.7). Any non-reset message queued at
    /// top-of-loop causes an immediate switch to `RemoteLauncher`.
    pub async fn run_loop(&self, queue: &MessageQueue, sink: &dyn SessionEventSink) -> LocalLoopOutcome {
        loop {
            if let Some(msg) = queue.peek_front() {
                if !is_reset_command(&msg) {
                    return LocalLoopOutcome::Switch;
                }
            }

            self.spawn().await.ok();

            let exit_reason = self.wait_for_child_or_reset(queue).await;

            if let Some(reset) = self.interceptor.take().await {
                sink.emit(SessionEvent::Message(reset.status_message().to_string()));
                self.teardown_scanner().await;
                continue;
            }

            match exit_reason {
                ChildExitReason::Switch => return LocalLoopOutcome::Switch,
                ChildExitReason::Exit => return LocalLoopOutcome::Exit,
            }
        }
    }

    async fn wait_for_child_or_reset(&self, queue: &MessageQueue) -> ChildExitReason {
        loop {
            if let Some(msg) = queue.peek_front() {
                if is_reset_command(&msg) {
                    let consumed = self.interceptor.intercept(&msg.text).await;
                    if consumed {
                        queue.pop_front();
                        self.abort_child().await;
                        return ChildExitReason::Exit;
                    }
                } else {
                    return ChildExitReason::Switch;
                }
            }

            let mut guard = self.child.lock().await;
            let Some(child) = guard.as_mut() else {
                return ChildExitReason::Exit;
            };
            match child.try_wait() {
                Ok(Some(_status)) => return ChildExitReason::Exit,
                Ok(None) => {
                    drop(guard);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
                Err(_) => return ChildExitReason::Exit,
            }
        }
    }
}

enum ChildExitReason {
    Switch,
    Exit,
}

/// Only `/new` and `/clear` are reset commands here; `/model` (and
/// everything else) falls through to an immediate switch (§4.7).
fn is_reset_command(msg: &hub_protocol::session::QueuedMessage) -> bool {
    matches!(msg.isolate, Some(IsolateCommand::New) | Some(IsolateCommand::Clear))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use hub_protocol::config::CollaborationMode;
    use hub_protocol::config::PermissionMode;
    use hub_protocol::session::QueuedMessage;
    use hub_protocol::session::TurnMode;

    fn mode() -> TurnMode {
        TurnMode {
            permission_mode: PermissionMode::Default,
            model: None,
            collaboration_mode: CollaborationMode::Default,
        }
    }

    #[tokio::test]
    async fn interceptor_consumes_new_and_clear_but_not_other_text() {
        let interceptor = ResetInterceptor::new();
        assert!(interceptor.intercept("/new").await);
        assert_eq!(interceptor.take().await, Some(IsolateCommand::New));

        assert!(interceptor.intercept("/clear").await);
        assert_eq!(interceptor.take().await, Some(IsolateCommand::Clear));

        assert!(!interceptor.intercept("/model gpt-5").await);
        assert!(!interceptor.intercept("hello").await);
        assert_eq!(interceptor.take().await, None);
    }

    #[tokio::test]
    async fn non_reset_message_at_top_of_queue_triggers_immediate_switch() {
        let launcher = LocalLauncher::new("true", vec![], ".");
        let queue = MessageQueue::new();
        queue.push(None, QueuedMessage::new("hello", mode()));

        struct NoopSink;
        impl SessionEventSink for NoopSink {
            fn emit(&self, _event: SessionEvent) {}
        }

        let outcome = launcher.run_loop(&queue, &NoopSink).await;
        assert_eq!(outcome, LocalLoopOutcome::Switch);
    }
}
