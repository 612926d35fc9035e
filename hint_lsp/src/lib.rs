//! LSP client for typehint.
//!
//! A blocking facade over an async JSON-RPC transport. The driver thread
//! issues requests and waits on per-request channels while a reader task
//! on a small tokio runtime owns the server's output stream and routes
//! responses and notifications.

pub mod client;
pub mod diagnostics;
pub mod error;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{LanguageClient, ServerConfig};
pub use diagnostics::{evaluate, DiagnosticPolicy, Verdict};
pub use error::{SessionError, TransportError};
pub use session::{OracleSession, SessionConfig, SessionState};
pub use transport::Transport;
pub use types::{
    path_to_uri, Diagnostic, DiagnosticSeverity, Position, PublishedDiagnostics, Range,
    TextChange,
};
