//! Shared data model for the agent orchestration hub.
//!
//! Mirrors the role `codex-protocol` plays in the upstream Codex workspace:
//! a dependency-light crate of wire/domain types that both the transport
//! layer and the orchestration core can depend on without pulling in
//! process-spawning or I/O code.

pub mod config;
pub mod event;
pub mod permission;
pub mod session;
pub mod store;

pub use config::ApprovalPolicy;
pub use config::CollaborationMode;
pub use config::HubConfig;
pub use config::ModeHash;
pub use config::PermissionMode;
pub use config::SandboxMode;
pub use event::AgentEvent;
pub use event::ThreadIdentity;
pub use permission::PermissionDecision;
pub use permission::PermissionKind;
pub use permission::PermissionRequest;
pub use session::IsolateCommand;
pub use session::Message;
pub use session::QueuedMessage;
pub use session::Session;
pub use session::SessionId;
pub use session::TurnMode;
pub use store::RpcHandler;
pub use store::SessionEvent;
pub use store::SessionEventSink;
pub use store::Store;
pub use store::UpdateOutcome;
