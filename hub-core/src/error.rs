//! Typed orchestration errors (§7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("aborted")]
    Aborted,

    #[error("disconnected transport")]
    TransportDisconnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("version conflict updating session {session_id}: expected {expected}, found {found}")]
    VersionConflict {
        session_id: String,
        expected: u64,
        found: u64,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: std::time::Duration,
    },

    #[error(transparent)]
    Transport(#[from] hub_transport::TransportError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HubError {
    /// JSON-RPC error code an `HubError` maps to when surfaced over a
    /// transport that itself speaks JSON-RPC (§4.1 "unknown methods as
    /// -32601").
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            HubError::Protocol(_) => mcp_types::JSONRPCErrorError::METHOD_NOT_FOUND,
            _ => mcp_types::JSONRPCErrorError::INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn protocol_errors_map_to_method_not_found() {
        let err = HubError::Protocol("bad shape".into());
        assert_eq!(err.json_rpc_code(), mcp_types::JSONRPCErrorError::METHOD_NOT_FOUND);
    }

    #[test]
    fn other_errors_map_to_internal_error() {
        let err = HubError::Aborted;
        assert_eq!(err.json_rpc_code(), mcp_types::JSONRPCErrorError::INTERNAL_ERROR);
    }
}
