//! typehint - Fill missing Python type annotations.
//!
//! Usage: typehint --project-path PROJECT [--venv-path VENV] [--top-k N]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use typehint_batch::config::MAX_TOP_K;
use typehint_batch::BatchConfig;

#[derive(Parser, Debug)]
#[command(name = "typehint")]
#[command(about = "Annotates a Python project, using pyright to reject wrong predictions")]
struct Args {
    /// TOML config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project to annotate
    #[arg(long)]
    project_path: Option<PathBuf>,

    /// Virtual environment of the project
    #[arg(long)]
    venv_path: Option<PathBuf>,

    /// Predictions tried per slot
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=MAX_TOP_K as i64))]
    top_k: Option<u8>,

    /// Where stubs are written
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Also write annotated sources here
    #[arg(long)]
    sources_dir: Option<PathBuf>,

    /// Output of `pyright --createstub`, for inferred return types
    #[arg(long)]
    pyright_stubs_dir: Option<PathBuf>,

    /// CSV evaluation report
    #[arg(long)]
    report: Option<PathBuf>,

    /// Search budget per file, in seconds
    #[arg(long)]
    search_timeout: Option<u64>,

    #[arg(long)]
    prediction_endpoint: Option<String>,

    /// Send incremental edits to the checker
    #[arg(long)]
    incremental_sync: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<BatchConfig> {
        let mut config = match &self.config {
            Some(path) => BatchConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BatchConfig::default(),
        };
        if let Some(path) = self.project_path {
            config.project_path = path;
        }
        if let Some(path) = self.venv_path {
            config.venv_path = Some(path);
        }
        if let Some(top_k) = self.top_k {
            config.top_k = usize::from(top_k);
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(dir) = self.sources_dir {
            config.sources_dir = Some(dir);
        }
        if let Some(dir) = self.pyright_stubs_dir {
            config.pyright_stubs_dir = dir;
        }
        if let Some(path) = self.report {
            config.report_path = path;
        }
        if let Some(secs) = self.search_timeout {
            config.search_timeout_secs = secs;
        }
        if let Some(endpoint) = self.prediction_endpoint {
            config.prediction_endpoint = endpoint;
        }
        if self.incremental_sync {
            config.incremental_sync = true;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = args.into_config()?;
    log::info!("Annotating {}", config.project_path.display());

    let summary = typehint_batch::run(&config)
        .with_context(|| format!("annotating {}", config.project_path.display()))?;
    if summary.failed > 0 {
        log::warn!("{} files failed, see the log above", summary.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "typehint",
            "--project-path",
            "proj",
            "--top-k",
            "2",
            "--incremental-sync",
            "--pyright-stubs-dir",
            "stubs",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.project_path, PathBuf::from("proj"));
        assert_eq!(config.top_k, 2);
        assert!(config.incremental_sync);
        assert_eq!(config.pyright_stubs_dir, PathBuf::from("stubs"));
        assert_eq!(config.max_slots, BatchConfig::default().max_slots);
    }

    #[test]
    fn test_top_k_range() {
        assert!(Args::try_parse_from(["typehint", "--top-k", "6"]).is_err());
        assert!(Args::try_parse_from(["typehint", "--top-k", "0"]).is_err());
    }
}
