//! C7 RemoteLauncher (§4.8): owns the dual transport, runs turns, and
//! reconciles abort/switch/exit.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use hub_protocol::config::CliOverrides;
use hub_protocol::config::HubConfig;
use hub_protocol::config::ModeHash;
use hub_protocol::permission::PermissionKind;
use hub_protocol::session::IsolateCommand;
use hub_protocol::session::QueuedMessage;
use hub_protocol::store::SessionEvent;
use hub_protocol::store::SessionEventSink;
use hub_transport::AgentTransport;
use hub_transport::CancellationToken;
use hub_transport::RequestHandler as TransportRequestHandler;
use hub_transport::StartThreadParams;
use hub_transport::StartTurnParams;
use hub_transport::TransportError;
use mcp_types::Implementation;
use tokio::sync::Mutex;

use crate::permission::PermissionPipeline;
use crate::queue::MessageQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportKind {
    AppServer,
    Mcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    Continue,
    Switch,
    Exit,
}

enum TurnError {
    Aborted,
    Disconnected,
    Other(String),
}

fn classify_transport_err(err: TransportError) -> TurnError {
    match err {
        TransportError::Aborted => TurnError::Aborted,
        TransportError::Disconnected => TurnError::Disconnected,
        other => TurnError::Other(other.to_string()),
    }
}

/// Dispatches an agent-originated approval request through the pipeline and
/// builds the reply in the caller's native shape (§4.4). One instance is
/// shared across both transport variants; `mcp_mode` controls which reply
/// shape `reply_for` produces.
struct PermissionRequestHandler {
    pipeline: Arc<PermissionPipeline>,
    permission_mode_hint: Arc<Mutex<hub_protocol::config::PermissionMode>>,
    sink_events: Arc<Mutex<Vec<SessionEvent>>>,
    mcp_mode: bool,
}

fn classify_kind(method_or_tool: &str) -> PermissionKind {
    if method_or_tool.contains("patch") || method_or_tool.contains("apply") {
        PermissionKind::FileChange
    } else if method_or_tool.contains("exec") || method_or_tool.contains("command") || method_or_tool.contains("shell") {
        PermissionKind::Exec
    } else if method_or_tool.contains("input") || method_or_tool.contains("ask") {
        PermissionKind::UserInput
    } else {
        PermissionKind::DynamicTool
    }
}

#[async_trait]
impl TransportRequestHandler for PermissionRequestHandler {
    async fn handle(&self, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let id = params
            .get("id")
            .or_else(|| params.get("callId"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let tool_name = params
            .get("toolName")
            .or_else(|| params.get("tool_name"))
            .or_else(|| params.get("command"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let kind = classify_kind(&tool_name);

        let (request, event, rx) = self.pipeline.elicit(id.clone(), tool_name.clone(), params.clone(), kind);
        self.sink_events
            .lock()
            .await
            .push(SessionEvent::Message(serde_json::to_string(&event).unwrap_or_default()));

        let mode = *self.permission_mode_hint.lock().await;
        let hints = crate::permission::OverrideHints::default();
        let auto_applied = self.pipeline.try_auto_approve(
            &request.id,
            mode,
            hub_protocol::config::CollaborationMode::Default,
            &hints,
        );
        let _ = auto_applied;

        let decision = rx
            .await
            .map_err(|_| anyhow::anyhow!("permission channel dropped"))?
            .map_err(|reason| anyhow::anyhow!(reason))?;

        let completed = crate::permission::PermissionPipeline::finalize(request, &decision);
        self.sink_events
            .lock()
            .await
            .push(SessionEvent::Message(serde_json::to_string(&completed).unwrap_or_default()));

        if self.mcp_mode {
            let schema_properties: Vec<&str> = params
                .get("requestedSchema")
                .and_then(|s| s.get("properties"))
                .and_then(|p| p.as_object())
                .map(|obj| obj.keys().map(String::as_str).collect())
                .unwrap_or_default();
            let reply = crate::permission::decision_to_mcp_elicit_reply(&decision, &schema_properties);
            let mut value = serde_json::json!({"action": reply.action});
            if let Some(content) = reply.content {
                value["content"] = content;
            }
            Ok(value)
        } else {
            let reply = crate::permission::decision_to_app_server_reply(&decision);
            let decision_str = match reply {
                crate::permission::AppServerReply::Accept => "accept",
                crate::permission::AppServerReply::AcceptForSession => "acceptForSession",
                crate::permission::AppServerReply::Decline => "decline",
                crate::permission::AppServerReply::Cancel => "cancel",
            };
            Ok(serde_json::json!({"decision": decision_str}))
        }
    }
}

pub struct RemoteLauncher {
    app_server: Arc<dyn AgentTransport>,
    mcp: Arc<dyn AgentTransport>,
    force_mcp: bool,
    client_info: Implementation,
    cwd: String,
    permission_pipeline: Arc<PermissionPipeline>,
    permission_mode_hint: Arc<Mutex<hub_protocol::config::PermissionMode>>,
    active: Mutex<Option<TransportKind>>,
    thread_id: Mutex<Option<String>>,
    turn_id: Mutex<Option<String>>,
    resume_token: Mutex<Option<String>>,
    previous_thread_id: Mutex<Option<String>>,
    force_fresh: AtomicBool,
    current_mode_hash: Mutex<Option<ModeHash>>,
    abort: Mutex<CancellationToken>,
    reasoning: Mutex<hub_transport::ReasoningProcessor>,
    diff: Mutex<hub_transport::DiffProcessor>,
}

impl RemoteLauncher {
    pub fn new(
        app_server: Arc<dyn AgentTransport>,
        mcp: Arc<dyn AgentTransport>,
        force_mcp: bool,
        client_info: Implementation,
        cwd: impl Into<String>,
        permission_pipeline: Arc<PermissionPipeline>,
    ) -> Self {
        Self {
            app_server,
            mcp,
            force_mcp,
            client_info,
            cwd: cwd.into(),
            permission_pipeline,
            permission_mode_hint: Arc::new(Mutex::new(hub_protocol::config::PermissionMode::default())),
            active: Mutex::new(None),
            thread_id: Mutex::new(None),
            turn_id: Mutex::new(None),
            resume_token: Mutex::new(None),
            previous_thread_id: Mutex::new(None),
            force_fresh: AtomicBool::new(false),
            current_mode_hash: Mutex::new(None),
            abort: Mutex::new(CancellationToken::new()),
            reasoning: Mutex::new(hub_transport::ReasoningProcessor::default()),
            diff: Mutex::new(hub_transport::DiffProcessor::default()),
        }
    }

    async fn current(&self) -> Arc<dyn AgentTransport> {
        match *self.active.lock().await {
            Some(TransportKind::AppServer) => self.app_server.clone(),
            _ => self.mcp.clone(),
        }
    }

    /// §4.8 startup: app-server preferred unless forced; falls back to MCP
    /// on init failure.
    pub async fn startup(&self, sink_events: Arc<Mutex<Vec<SessionEvent>>>) -> Result<(), crate::error::HubError> {
        if !self.force_mcp
            && self.app_server.connect().await.is_ok()
            && self.app_server.initialize(self.client_info.clone()).await.is_ok()
        {
            *self.active.lock().await = Some(TransportKind::AppServer);
            self.attach_handlers(&self.app_server, false, sink_events).await;
            return Ok(());
        }

        self.mcp.connect().await?;
        self.mcp.initialize(self.client_info.clone()).await?;
        *self.active.lock().await = Some(TransportKind::Mcp);
        self.attach_handlers(&self.mcp, true, sink_events).await;
        Ok(())
    }

    async fn attach_handlers(&self, transport: &Arc<dyn AgentTransport>, mcp_mode: bool, sink_events: Arc<Mutex<Vec<SessionEvent>>>) {
        let handler = Arc::new(PermissionRequestHandler {
            pipeline: self.permission_pipeline.clone(),
            permission_mode_hint: self.permission_mode_hint.clone(),
            sink_events,
            mcp_mode,
        });
        transport.register_request_handler("permission", handler.clone());
        transport.register_request_handler("elicitation/create", handler);
    }

    pub fn set_permission_mode_hint(&self, mode: hub_protocol::config::PermissionMode) {
        let slot = self.permission_mode_hint.clone();
        tokio::spawn(async move {
            *slot.lock().await = mode;
        });
    }

    /// §4.8 step 1: isolated command reset.
    async fn reset(&self, isolate: IsolateCommand, sink: &dyn SessionEventSink) {
        let previous = self.thread_id.lock().await.take();
        *self.previous_thread_id.lock().await = previous;
        *self.turn_id.lock().await = None;
        self.force_fresh.store(true, Ordering::SeqCst);

        if isolate == IsolateCommand::New {
            let transport = self.current().await;
            transport.disconnect().await;
            let _ = transport.connect().await;
            let _ = transport.initialize(self.client_info.clone()).await;
        }

        self.permission_pipeline.reset();
        *self.reasoning.lock().await = hub_transport::ReasoningProcessor::default();
        *self.diff.lock().await = hub_transport::DiffProcessor::default();
        sink.emit(SessionEvent::Message(isolate.status_message().to_string()));
    }

    async fn establish_thread(
        &self,
        transport: &Arc<dyn AgentTransport>,
        cfg: &HubConfig,
        cancel: CancellationToken,
    ) -> Result<String, TurnError> {
        let mut params = StartThreadParams::new(self.cwd.clone(), cfg);
        let resume = self.resume_token.lock().await.clone();
        let force_fresh = self.force_fresh.load(Ordering::SeqCst);

        let result = match resume {
            Some(token) if !force_fresh => {
                params.resume_token = Some(token);
                transport.resume_thread(params, cancel).await
            }
            _ => transport.start_thread(params, cancel).await,
        };
        let ok = result.map_err(classify_transport_err)?;
        *self.thread_id.lock().await = Some(ok.thread_id.clone());
        Ok(ok.thread_id)
    }

    async fn run_turn(&self, msg: &QueuedMessage, cancel: CancellationToken) -> Result<(), TurnError> {
        let transport = self.current().await;
        let cfg = HubConfig::derive(
            msg.mode.permission_mode,
            msg.mode.model.clone(),
            msg.mode.collaboration_mode,
            &CliOverrides::default(),
        );

        let existing = self.thread_id.lock().await.clone();
        let thread_id = match existing {
            Some(id) => id,
            None => {
                let id = self.establish_thread(&transport, &cfg, cancel.clone()).await?;
                if self.force_fresh.swap(false, Ordering::SeqCst) {
                    let previous = self.previous_thread_id.lock().await.take();
                    if previous.as_deref() == Some(id.as_str()) {
                        transport.disconnect().await;
                        transport.connect().await.map_err(classify_transport_err)?;
                        transport
                            .initialize(self.client_info.clone())
                            .await
                            .map_err(classify_transport_err)?;
                        self.establish_thread(&transport, &cfg, cancel.clone()).await?
                    } else {
                        id
                    }
                } else {
                    id
                }
            }
        };

        let turn_result = transport
            .start_turn(
                StartTurnParams {
                    thread_id,
                    text: msg.text.clone(),
                },
                cancel,
            )
            .await
            .map_err(classify_transport_err)?;
        *self.turn_id.lock().await = turn_result.turn_id;
        Ok(())
    }

    /// §4.8 main loop body for one queued message; §4.9 finalizer runs in
    /// the caller (`SessionLoop`) after this returns.
    pub async fn handle_message(
        &self,
        msg: QueuedMessage,
        queue: &MessageQueue,
        sink: &dyn SessionEventSink,
        fsm: &mut crate::thinking::ThinkingFsm,
    ) -> LoopOutcome {
        if let Some(isolate) = msg.isolate {
            self.reset(isolate, sink).await;
            fsm.on_isolated_command();
            return LoopOutcome::Continue;
        }

        let established = self.thread_id.lock().await.is_some();
        let current_hash = *self.current_mode_hash.lock().await;
        if established && current_hash.is_some_and(|h| h != msg.hash) {
            queue.push(None, msg);
            *self.thread_id.lock().await = None;
            *self.turn_id.lock().await = None;
            self.force_fresh.store(true, Ordering::SeqCst);
            return LoopOutcome::Continue;
        }

        fsm.on_user_message_accepted();
        *self.current_mode_hash.lock().await = Some(msg.hash);

        let cancel = self.abort.lock().await.clone();
        fsm.on_turn_started();
        let result = self.run_turn(&msg, cancel).await;

        match result {
            Ok(()) => {
                fsm.on_turn_terminal();
            }
            Err(TurnError::Aborted) => {
                sink.emit(SessionEvent::Message("Turn aborted".to_string()));
                fsm.on_abort();
            }
            Err(TurnError::Disconnected) => {
                let transport = self.current().await;
                let _ = transport.connect().await;
                let retry_ok = transport.initialize(self.client_info.clone()).await.is_ok()
                    && self.run_turn(&msg, CancellationToken::new()).await.is_ok();
                if !retry_ok {
                    *self.thread_id.lock().await = None;
                    sink.emit(SessionEvent::Message(
                        "Codex transport disconnected. Please resend your message.".to_string(),
                    ));
                }
                fsm.on_turn_terminal();
            }
            Err(TurnError::Other(message)) => {
                sink.emit(SessionEvent::Message(format!("Turn failed: {message}")));
                *self.thread_id.lock().await = None;
                fsm.on_turn_terminal();
            }
        }

        *self.reasoning.lock().await = hub_transport::ReasoningProcessor::default();
        *self.diff.lock().await = hub_transport::DiffProcessor::default();
        LoopOutcome::Continue
    }

    /// Best-effort `interruptTurn`; resets the abort token for the next
    /// turn (§4.8 "Abort handling").
    pub async fn abort(&self) {
        let cancel = self.abort.lock().await.clone();
        cancel.cancel();

        let thread_id = self.thread_id.lock().await.clone();
        let turn_id = self.turn_id.lock().await.clone();
        if let Some(thread_id) = thread_id {
            let transport = self.current().await;
            let _ = transport.interrupt_turn(thread_id, turn_id).await;
        }
        *self.abort.lock().await = CancellationToken::new();
    }

    /// Tears down the transport and reports `switch` (§4.8 "Exit vs
    /// switch").
    pub async fn switch(&self) -> LoopOutcome {
        self.current().await.disconnect().await;
        LoopOutcome::Switch
    }

    pub async fn exit(&self) -> LoopOutcome {
        self.current().await.disconnect().await;
        LoopOutcome::Exit
    }
}
