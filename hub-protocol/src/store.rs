//! Store contract consumed by the core (§6, out of scope to implement here —
//! the database, encryption-at-rest, and HTTP layer are external
//! collaborators; this module only names the shape the core depends on).

use async_trait::async_trait;

use crate::session::Message;
use crate::session::Session;
use crate::session::SessionId;

/// Every store mutation returns one of these three outcomes (§6).
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<T> {
    Success { version: u64, value: T },
    VersionMismatch { version: u64, value: T },
    Error(String),
}

impl<T> UpdateOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub path: Option<String>,
    pub flavor: Option<String>,
    pub resume_token: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_or_create_session(&self, id: SessionId) -> anyhow::Result<Session>;

    async fn update_session_metadata(
        &self,
        id: &SessionId,
        expected_version: u64,
        options: MetadataUpdate,
    ) -> anyhow::Result<UpdateOutcome<Session>>;

    async fn update_session_agent_state(
        &self,
        id: &SessionId,
        expected_version: u64,
        mutate: Box<dyn FnOnce(&mut crate::session::AgentState) + Send>,
    ) -> anyhow::Result<UpdateOutcome<Session>>;

    async fn set_session_todos(
        &self,
        id: &SessionId,
        todos: crate::session::SessionTodos,
    ) -> anyhow::Result<()>;

    async fn add_message(
        &self,
        id: &SessionId,
        content: serde_json::Value,
        local_id: Option<String>,
    ) -> anyhow::Result<Message>;

    async fn get_messages(
        &self,
        id: &SessionId,
        limit: usize,
        before_seq: Option<u64>,
    ) -> anyhow::Result<Vec<Message>>;

    async fn merge_session_messages(
        &self,
        from: &SessionId,
        to: &SessionId,
    ) -> anyhow::Result<()>;
}

/// RPC registry contract consumed by the core (§6). Methods are registered
/// under `${sessionId}:${method}` or `${machineId}:${method}` keys; the
/// registry itself is an external collaborator, not implemented here.
pub trait RpcRegistry: Send + Sync {
    fn register(&self, key: String, handler: Box<dyn RpcHandler>);
    /// Replace a handler with a no-op; the registry owns the key and is not
    /// unregistered from (§5 "Resources").
    fn deactivate(&self, key: &str);
}

#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, params: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// `{type: 'message' | 'ready', message?}` (§6 "Session event sink").
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Message(String),
    Ready,
}

pub trait SessionEventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}
