//! Batch error types.

use crate::prediction::PredictionError;
use std::path::PathBuf;
use thiserror::Error;
use typehint_core::{SearchError, SyntaxError};
use typehint_lsp::SessionError;

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Errors raised while annotating a project.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("type checker session failed: {0}")]
    Session(#[from] SessionError),
    #[error("search aborted: {0}")]
    Search(#[from] SearchError),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error("source does not parse: {0}")]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BatchError {
    /// True when the batch cannot continue with the next file.
    pub fn is_fatal(&self) -> bool {
        match self {
            BatchError::Session(e) => e.is_fatal(),
            BatchError::Search(_) | BatchError::Config(_) => true,
            _ => false,
        }
    }
}
