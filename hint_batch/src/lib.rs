//! Typehint Batch - annotates a whole project.
//!
//! Walks the project's Python files, writes the return types pyright
//! inferred, asks the prediction service for ranked candidates, runs the
//! backtracking search against a pyright oracle session and writes stubs
//! plus an evaluation report.

pub mod config;
pub mod error;
pub mod oracle;
pub mod pipeline;
pub mod prediction;
pub mod pyright;
pub mod report;

pub use config::BatchConfig;
pub use error::{BatchError, ConfigError};
pub use oracle::{CheckerSession, PyrightOracle};
pub use pipeline::{discover_python_files, BatchSummary, FileResult, Pipeline, SkipReason};
pub use prediction::{PredictionError, PredictionService, Type4PyClient};
pub use pyright::PyrightConfigGuard;
pub use report::{EvaluationReport, FileStatistics};

use typehint_core::ProjectImportResolver;
use typehint_lsp::OracleSession;

/// Annotates every Python file of the configured project.
pub fn run(config: &BatchConfig) -> Result<BatchSummary, BatchError> {
    config.validate()?;
    let project = std::fs::canonicalize(&config.project_path)?;
    let venv = config
        .venv_path
        .as_ref()
        .map(std::fs::canonicalize)
        .transpose()?;

    let _pyright_config = if config.write_pyright_config {
        Some(PyrightConfigGuard::install(&project, venv.as_deref())?)
    } else {
        None
    };

    log::info!("Gathering classes in {}", project.display());
    let mut resolver = ProjectImportResolver::new(&project);
    let mut classes = resolver.index_project();
    if let Some(venv) = &venv {
        log::info!("Gathering classes in virtual environment {}", venv.display());
        classes += resolver.index_virtualenv(venv);
    }
    log::info!("Indexed {} classes", classes);

    let predictor = Type4PyClient::new(&config.prediction_endpoint, config.prediction_timeout())?;
    let mut report = EvaluationReport::create(&config.report_path)?;

    let mut session = OracleSession::new(config.session_config()?);
    session.start(&project)?;

    let mut pipeline = Pipeline::new(config.clone(), project, venv, &mut session, &predictor, &resolver);
    let result = pipeline.run(&mut report);
    drop(pipeline);

    if let Err(e) = session.stop() {
        log::warn!("Type checker did not shut down cleanly: {}", e);
    }
    let summary = result?;
    log::info!(
        "Done: {} annotated, {} skipped, {} failed",
        summary.processed,
        summary.skipped,
        summary.failed
    );
    Ok(summary)
}
