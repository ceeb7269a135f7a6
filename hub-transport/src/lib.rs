//! C1 `AgentTransport` (two variants), C2 `EventConverter`, C3
//! `StreamProcessors` (§4.1-§4.3, §4.5).

pub mod app_server;
pub mod cancellation;
pub mod event_converter;
pub mod mcp_transport;
pub mod processors;
pub mod transport;

pub use app_server::AppServerTransport;
pub use cancellation::CancellationToken;
pub use event_converter::convert_app_server_notification;
pub use event_converter::convert_mcp_journal_line;
pub use event_converter::DecoderState;
pub use mcp_transport::McpTransport;
pub use processors::DiffProcessor;
pub use processors::ReasoningProcessor;
pub use transport::AgentTransport;
pub use transport::McpIdentity;
pub use transport::NotificationHandler;
pub use transport::RequestHandler;
pub use transport::StartThreadParams;
pub use transport::StartTurnParams;
pub use transport::ThreadStartOk;
pub use transport::TransportError;
pub use transport::TurnStartOk;
