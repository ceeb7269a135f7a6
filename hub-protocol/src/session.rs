//! Session, Message and QueuedMessage (§3).

use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::config::ModeHash;
use crate::event::ThreadIdentity;
use crate::permission::CompletedRequest;
use crate::permission::PermissionRequest;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub id: String,
    pub namespace: String,
}

/// Free-form metadata bag. Always carries at least `path`, `flavor`, and a
/// resume token under an agent-specific key (e.g. `codexSessionId`); callers
/// may stash additional fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub path: String,
    pub flavor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTodos {
    pub items: Vec<TodoItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub requests: HashMap<String, PermissionRequest>,
    pub completed_requests: HashMap<String, CompletedRequest>,
    #[serde(default)]
    pub thread_identity: ThreadIdentity,
}

/// The hub's persistent identity for a conversation across restarts.
///
/// Ownership: exclusively owned by one `SessionLoop` for its lifetime;
/// published to collaborators by identity only (§3 Invariants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub metadata: SessionMetadata,
    pub metadata_version: u64,
    pub agent_state: AgentState,
    pub agent_state_version: u64,
    pub active: bool,
    pub todos: SessionTodos,
}

impl Session {
    pub fn new(id: SessionId, metadata: SessionMetadata) -> Self {
        Self {
            id,
            metadata,
            metadata_version: 0,
            agent_state: AgentState::default(),
            agent_state_version: 0,
            active: true,
            todos: SessionTodos::default(),
        }
    }
}

/// Immutable once admitted (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub content: serde_json::Value,
}

/// Permission policy + model selection carried alongside a queued user
/// message (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMode {
    pub permission_mode: crate::config::PermissionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub collaboration_mode: crate::config::CollaborationMode,
}

/// `/new`, `/clear`, `/model` — the closed set of isolated commands
/// (GLOSSARY). Anything else is forwarded verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolateCommand {
    New,
    Clear,
    Model,
}

impl IsolateCommand {
    /// Classify a raw queued message's text. `/model` matches only the bare
    /// command, not its arguments (e.g. `/model o3` is still isolated, but
    /// this only inspects the leading token).
    pub fn classify(text: &str) -> Option<Self> {
        let first_token = text.trim().split_whitespace().next()?;
        match first_token {
            "/new" => Some(Self::New),
            "/clear" => Some(Self::Clear),
            "/model" => Some(Self::Model),
            _ => None,
        }
    }

    pub fn status_message(self) -> &'static str {
        match self {
            Self::New => "Started a new conversation",
            Self::Clear => "Cleared the conversation",
            Self::Model => "Switched model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub text: String,
    pub mode: TurnMode,
    pub isolate: Option<IsolateCommand>,
    pub hash: ModeHash,
}

impl QueuedMessage {
    pub fn new(text: impl Into<String>, mode: TurnMode) -> Self {
        let text = text.into();
        let isolate = IsolateCommand::classify(&text);
        let hash = ModeHash::compute(&mode);
        Self {
            text,
            mode,
            isolate,
            hash,
        }
    }

    pub fn is_isolated(&self) -> bool {
        self.isolate.is_some()
    }
}
