//! Batch configuration, loaded from a TOML file and overridden by CLI flags.
//!
//! ```toml
//! project-path = "projects/example"
//! venv-path = "projects/example/.venv"
//! top-k = 3
//! pyright-stubs-dir = "typings"
//! search-timeout-secs = 600
//! checker-command = "pyright-langserver"
//! checker-args = ["--stdio"]
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use typehint_core::SearchConfig;
use typehint_lsp::diagnostics::{DEFAULT_ALLOWED_PATTERNS, DEFAULT_ERROR_PATTERNS};
use typehint_lsp::{DiagnosticPolicy, ServerConfig, SessionConfig};

pub const DEFAULT_TOP_K: usize = 3;
pub const MAX_TOP_K: usize = 5;
pub const DEFAULT_MAX_SLOTS: usize = 100;
pub const DEFAULT_PREDICTION_ENDPOINT: &str = "http://localhost:5001/api/predict?tc=0";

/// Settings for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BatchConfig {
    /// Project to annotate.
    pub project_path: PathBuf,
    /// Virtual environment whose packages provide importable classes.
    pub venv_path: Option<PathBuf>,
    /// Where `.pyi` stubs are written, mirroring the project layout.
    pub output_dir: PathBuf,
    /// Where annotated sources are written, if at all.
    pub sources_dir: Option<PathBuf>,
    /// CSV evaluation report.
    pub report_path: PathBuf,
    /// Candidates tried per slot, before the sentinel.
    pub top_k: usize,
    /// Files with this many slots or more are skipped.
    pub max_slots: usize,
    pub search_timeout_secs: u64,
    pub diagnostics_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub prediction_timeout_secs: u64,
    /// Oracle timeouts tolerated per file before it is abandoned.
    pub max_oracle_timeouts: usize,
    pub checker_command: String,
    pub checker_args: Vec<String>,
    /// Send range edits when the checker supports them.
    pub incremental_sync: bool,
    pub prediction_endpoint: String,
    /// Diagnostic messages that reject a candidate.
    pub error_patterns: Vec<String>,
    /// Diagnostic messages that never reject a candidate.
    pub allowed_patterns: Vec<String>,
    /// Write `pyrightconfig.json` into the project for the run.
    pub write_pyright_config: bool,
    /// Output of `pyright --createstub`. When the directory exists, the
    /// return types pyright inferred are written before the search.
    pub pyright_stubs_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let server = ServerConfig::pyright();
        Self {
            project_path: PathBuf::from("."),
            venv_path: None,
            output_dir: PathBuf::from("type-annotated"),
            sources_dir: None,
            report_path: PathBuf::from("evaluation-statistics.csv"),
            top_k: DEFAULT_TOP_K,
            max_slots: DEFAULT_MAX_SLOTS,
            search_timeout_secs: 600,
            diagnostics_timeout_secs: 30,
            request_timeout_secs: 60,
            prediction_timeout_secs: 120,
            max_oracle_timeouts: 3,
            checker_command: server.command,
            checker_args: server.args,
            incremental_sync: false,
            prediction_endpoint: DEFAULT_PREDICTION_ENDPOINT.to_string(),
            error_patterns: DEFAULT_ERROR_PATTERNS.iter().map(|p| p.to_string()).collect(),
            allowed_patterns: DEFAULT_ALLOWED_PATTERNS.iter().map(|p| p.to_string()).collect(),
            write_pyright_config: true,
            pyright_stubs_dir: PathBuf::from("typings"),
        }
    }
}

impl BatchConfig {
    /// Loads a config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Checks value ranges and that the project exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(ConfigError::Invalid {
                field: "top-k",
                message: format!("{} is not in 1..={}", self.top_k, MAX_TOP_K),
            });
        }
        if self.max_slots == 0 {
            return Err(ConfigError::Invalid {
                field: "max-slots",
                message: "must be at least 1".to_string(),
            });
        }
        if self.checker_command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "checker-command",
                message: "must not be empty".to_string(),
            });
        }
        if !self.project_path.is_dir() {
            return Err(ConfigError::Invalid {
                field: "project-path",
                message: format!("{} is not a directory", self.project_path.display()),
            });
        }
        if let Some(venv) = &self.venv_path {
            if !venv.is_dir() {
                return Err(ConfigError::Invalid {
                    field: "venv-path",
                    message: format!("{} is not a directory", venv.display()),
                });
            }
        }
        self.policy()?;
        Ok(())
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            timeout: Duration::from_secs(self.search_timeout_secs),
            max_oracle_timeouts: self.max_oracle_timeouts,
        }
    }

    pub fn prediction_timeout(&self) -> Duration {
        Duration::from_secs(self.prediction_timeout_secs)
    }

    pub fn policy(&self) -> Result<DiagnosticPolicy, ConfigError> {
        DiagnosticPolicy::new(
            self.error_patterns.as_slice(),
            self.allowed_patterns.as_slice(),
        )
        .map_err(|e| ConfigError::Invalid {
            field: "error-patterns",
            message: e.to_string(),
        })
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        Ok(SessionConfig {
            server: ServerConfig::new(self.checker_command.clone(), self.checker_args.clone()),
            language_id: "python".to_string(),
            diagnostics_timeout: Duration::from_secs(self.diagnostics_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            incremental_sync: self.incremental_sync,
            policy: self.policy()?,
        })
    }
}
