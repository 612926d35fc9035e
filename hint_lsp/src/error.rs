//! Error types for the transport and the oracle session.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the JSON-RPC transport.
///
/// Cloneable so one failure can be delivered to every pending waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport closed: {0}")]
    Closed(String),
    #[error("server returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("request `{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Json(err.to_string())
    }
}

/// Errors raised by [`crate::OracleSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no diagnostics for version {version} within {timeout:?}")]
    DiagnosticsTimeout { version: i32, timeout: Duration },
    #[error("no document is open")]
    NoDocument,
    #[error("operation `{operation}` not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: crate::session::SessionState,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cannot build a file URI for {0}")]
    Uri(String),
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// True when the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Transport(TransportError::Timeout { .. }) => false,
            SessionError::Transport(_) | SessionError::Spawn { .. } => true,
            _ => false,
        }
    }
}
