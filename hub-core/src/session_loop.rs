//! C8 SessionLoop: the top-level per-session coordinator. Owns the message
//! queue and alternates between `LocalLauncher` and `RemoteLauncher`
//! (§4.7, §4.8, §5 "single-writer per session").

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use hub_protocol::store::SessionEvent;
use hub_protocol::store::SessionEventSink;
use tokio::sync::Mutex;

use crate::launcher::local::LocalLauncher;
use crate::launcher::local::LocalLoopOutcome;
use crate::launcher::remote::LoopOutcome;
use crate::launcher::remote::RemoteLauncher;
use crate::queue::MessageQueue;
use crate::thinking::ThinkingFsm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    Local,
    Remote,
}

/// One session's coordinator task. A single instance never runs two turns
/// concurrently; parallelism exists only across distinct `SessionLoop`s
/// (§5).
pub struct SessionLoop {
    queue: Arc<MessageQueue>,
    local: Arc<LocalLauncher>,
    remote: Arc<RemoteLauncher>,
    fsm: Mutex<ThinkingFsm>,
    sink: Arc<dyn SessionEventSink>,
    shutdown: AtomicBool,
    switch_requested: AtomicBool,
    remote_started: AtomicBool,
    remote_events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl SessionLoop {
    pub fn new(
        queue: Arc<MessageQueue>,
        local: Arc<LocalLauncher>,
        remote: Arc<RemoteLauncher>,
        sink: Arc<dyn SessionEventSink>,
    ) -> Self {
        Self {
            queue,
            local,
            remote,
            fsm: Mutex::new(ThinkingFsm::new()),
            sink,
            shutdown: AtomicBool::new(false),
            switch_requested: AtomicBool::new(false),
            remote_started: AtomicBool::new(false),
            remote_events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Connects the remote launcher's transport and wires its permission
    /// handlers on first entry into remote mode (§4.8 startup). Idempotent
    /// across repeated switches into remote mode within the same session.
    async fn ensure_remote_started(&self) -> bool {
        if self.remote_started.load(Ordering::SeqCst) {
            return true;
        }
        match self.remote.startup(self.remote_events.clone()).await {
            Ok(()) => {
                self.remote_started.store(true, Ordering::SeqCst);
                true
            }
            Err(err) => {
                self.sink.emit(SessionEvent::Message(format!("Failed to start remote agent: {err}")));
                false
            }
        }
    }

    /// Forwards events the permission handler buffered during the last
    /// `handle_message` call (e.g. elicitation prompts) to the real sink.
    async fn drain_remote_events(&self) {
        let mut events = self.remote_events.lock().await;
        for event in events.drain(..) {
            self.sink.emit(event);
        }
    }

    /// UI-initiated exit (Ctrl-C) or the `abort` RPC handler's terminal
    /// path; also honored mid-run by the remote loop at each message
    /// boundary.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// UI-initiated switch (double-space) or the `switch` RPC handler.
    pub fn request_switch(&self) {
        self.switch_requested.store(true, Ordering::SeqCst);
    }

    pub async fn abort_current_turn(&self) {
        self.remote.abort().await;
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs until shutdown is requested or a launcher reports `exit`.
    /// Starts in local (interactive) mode, matching the hub CLI's default
    /// of launching the agent attached to the operator's terminal.
    pub async fn run(&self) {
        let mut active = Active::Local;

        loop {
            if self.is_shutting_down() {
                break;
            }

            match active {
                Active::Local => match self.local.run_loop(&self.queue, self.sink.as_ref()).await {
                    LocalLoopOutcome::Switch => active = Active::Remote,
                    LocalLoopOutcome::Exit => break,
                },
                Active::Remote => match self.run_remote().await {
                    LoopOutcome::Continue => active = Active::Local,
                    LoopOutcome::Switch => active = Active::Local,
                    LoopOutcome::Exit => break,
                },
            }
        }
    }

    /// Drives the remote launcher until the queue drains (finalizing via
    /// the idle finalizer each iteration) or a switch/exit is reported.
    async fn run_remote(&self) -> LoopOutcome {
        if !self.ensure_remote_started().await {
            return LoopOutcome::Continue;
        }

        loop {
            if self.switch_requested.swap(false, Ordering::SeqCst) {
                return self.remote.switch().await;
            }
            if self.is_shutting_down() {
                return self.remote.exit().await;
            }

            let Some(msg) = self.queue.pop_front() else {
                let mut fsm = self.fsm.lock().await;
                fsm.finalize(true, false, self.is_shutting_down(), self.sink.as_ref());
                return LoopOutcome::Continue;
            };

            let mut fsm = self.fsm.lock().await;
            let outcome = self
                .remote
                .handle_message(msg, &self.queue, self.sink.as_ref(), &mut fsm)
                .await;
            fsm.finalize(
                self.queue.is_empty(),
                !self.queue.is_empty(),
                self.is_shutting_down(),
                self.sink.as_ref(),
            );
            drop(fsm);
            self.drain_remote_events().await;

            match outcome {
                LoopOutcome::Continue => continue,
                other => return other,
            }
        }
    }
}
