//! Per-file annotation pipeline and the project walk.

use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::oracle::{CheckerSession, PyrightOracle};
use crate::prediction::PredictionService;
use crate::report::{AnnotationCounts, EvaluationReport, FileStatistics};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use typehint_core::syntax::{
    apply_inferred_returns, inferred_returns, is_incomplete_annotation, render_stub,
    strip_incomplete_annotations, InferredAnnotations, SKIPPED_DIRS,
};
use typehint_core::{
    ImportResolver, PythonAnnotator, PythonModule, SearchEngine, SearchOutcome, SearchTree, Slot,
    SyntaxError,
};
use walkdir::{DirEntry, WalkDir};

/// Why a file was not searched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    StubExists,
    Empty,
    NoSlots,
    TooManySlots(usize),
    PredictionFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::StubExists => write!(f, "already annotated"),
            SkipReason::Empty => write!(f, "empty file"),
            SkipReason::NoSlots => write!(f, "no type slots to fill"),
            SkipReason::TooManySlots(n) => write!(f, "too many type slots ({})", n),
            SkipReason::PredictionFailed(e) => write!(f, "no predictions: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileResult {
    Processed(FileStatistics),
    Skipped(SkipReason),
}

/// Counts for one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Lists the project's `.py` files in a stable order, skipping virtual
/// environments, caches, hidden directories and `excluded` directories.
pub fn discover_python_files(root: &Path, excluded: &[PathBuf]) -> Vec<PathBuf> {
    let keep = |entry: &DirEntry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !(SKIPPED_DIRS.contains(&name.as_ref())
            || name.starts_with('.')
            || excluded.iter().any(|dir| dir == entry.path()))
    };
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(keep)
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "py"))
        .map(DirEntry::into_path)
        .collect()
}

/// Slots of `source` with incomplete annotations counted as missing.
fn groundtruth_slots(source: &str) -> Result<Vec<(Slot, Option<String>)>, SyntaxError> {
    let module = PythonModule::parse(source)?;
    Ok(module
        .type_slots()
        .into_iter()
        .map(|(slot, annotation)| {
            let annotation = annotation.filter(|a| !is_incomplete_annotation(a));
            (slot, annotation)
        })
        .collect())
}

/// What the search contributes to a report row.
#[derive(Debug, Clone, Copy)]
struct SearchSummary {
    evaluated_slots: usize,
    elapsed: Duration,
    outcome: SearchOutcome,
    oracle_calls: usize,
}

impl Default for SearchSummary {
    fn default() -> Self {
        Self {
            evaluated_slots: 0,
            elapsed: Duration::ZERO,
            outcome: SearchOutcome::Success,
            oracle_calls: 0,
        }
    }
}

/// Annotates the files of one project against an open checker session.
pub struct Pipeline<'a, S: CheckerSession + ?Sized, P: PredictionService + ?Sized> {
    config: BatchConfig,
    project_root: PathBuf,
    venv: Option<PathBuf>,
    session: &'a mut S,
    predictor: &'a P,
    resolver: &'a dyn ImportResolver,
    annotator: PythonAnnotator,
}

impl<'a, S: CheckerSession + ?Sized, P: PredictionService + ?Sized> Pipeline<'a, S, P> {
    /// `project_root` and `venv` must be canonical paths.
    pub fn new(
        config: BatchConfig,
        project_root: PathBuf,
        venv: Option<PathBuf>,
        session: &'a mut S,
        predictor: &'a P,
        resolver: &'a dyn ImportResolver,
    ) -> Self {
        Self {
            config,
            project_root,
            venv,
            session,
            predictor,
            resolver,
            annotator: PythonAnnotator::new(),
        }
    }

    /// Processes every Python file of the project, appending a report row
    /// per searched file. Stops at the first fatal error.
    pub fn run<W: Write>(
        &mut self,
        report: &mut EvaluationReport<W>,
    ) -> Result<BatchSummary, BatchError> {
        let mut summary = BatchSummary::default();
        for path in discover_python_files(&self.project_root, &self.excluded_dirs()) {
            let name = self.relative(&path).display().to_string();
            match self.process_file(&path) {
                Ok(FileResult::Processed(statistics)) => {
                    log::info!(
                        "'{}' finished: {} ({} oracle calls)",
                        name,
                        statistics.outcome.as_str(),
                        statistics.oracle_calls
                    );
                    report.append(&statistics)?;
                    summary.processed += 1;
                }
                Ok(FileResult::Skipped(reason)) => {
                    log::info!("'{}' skipped: {}", name, reason);
                    summary.skipped += 1;
                }
                Err(e) if e.is_fatal() => {
                    log::error!("'{}' failed, stopping: {}", name, e);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("'{}' failed: {}", name, e);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Searches annotations for one file and writes its stub.
    pub fn process_file(&mut self, path: &Path) -> Result<FileResult, BatchError> {
        let started = Instant::now();
        let relative = self.relative(path).to_path_buf();
        let stub_path = self.config.output_dir.join(&relative).with_extension("pyi");
        if stub_path.exists() {
            return Ok(FileResult::Skipped(SkipReason::StubExists));
        }
        log::info!("Processing file: {}", relative.display());

        let text = match self.session.open_file(path) {
            Ok(text) => text,
            Err(e) => {
                // A timed-out open leaves the document open.
                if !e.is_fatal() {
                    let _ = self.session.close_file();
                }
                return Err(e.into());
            }
        };

        let result = self.annotate(path, &relative, &stub_path, text, started);
        let closed = self.session.close_file();
        match (result, closed) {
            (Ok(result), Ok(())) => Ok(result),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), _) => Err(e),
        }
    }

    fn annotate(
        &mut self,
        path: &Path,
        relative: &Path,
        stub_path: &Path,
        text: String,
        started: Instant,
    ) -> Result<FileResult, BatchError> {
        if text.is_empty() {
            return Ok(FileResult::Skipped(SkipReason::Empty));
        }
        let groundtruth = groundtruth_slots(&text)?;

        let stripped = strip_incomplete_annotations(&text)?;
        if stripped != text {
            log::debug!("Removed incomplete annotations from {}", relative.display());
        }
        let (source, after_pyright, pyright_added) =
            match self.with_pyright_returns(path, relative, &stripped)? {
                Some(inferred) => {
                    let slots = groundtruth_slots(&inferred.text)?;
                    (inferred.text, Some(slots), inferred.applied.len())
                }
                None => (stripped, None, 0),
            };
        if source != text {
            self.session.apply_change(&source, None)?;
            self.session.refresh_baseline()?;
        }

        let predictions = match self.predictor.predict(&source) {
            Ok(predictions) => predictions,
            Err(e) => return Ok(FileResult::Skipped(SkipReason::PredictionFailed(e.to_string()))),
        };
        let available = PythonModule::parse(&source)?.available_slots();
        let tree = SearchTree::build(predictions, &available, self.config.top_k);
        if tree.is_empty() {
            if pyright_added == 0 {
                return Ok(FileResult::Skipped(SkipReason::NoSlots));
            }
            log::info!("'{}' only gained pyright's return types", relative.display());
            let statistics = self.finish(
                relative,
                stub_path,
                &source,
                &groundtruth,
                after_pyright.as_deref(),
                SearchSummary::default(),
                started,
            )?;
            return Ok(FileResult::Processed(statistics));
        }
        if tree.len() >= self.config.max_slots {
            return Ok(FileResult::Skipped(SkipReason::TooManySlots(tree.len())));
        }
        log::debug!(
            "{} layers, {} candidates for {}",
            tree.len(),
            tree.candidate_count(),
            relative.display()
        );

        let search = {
            let mut oracle = PyrightOracle::new(&mut *self.session);
            let mut engine = SearchEngine::new(
                &mut oracle,
                &self.annotator,
                self.resolver,
                self.config.search_config(),
            );
            engine.run(&tree, &source, path)?
        };

        let statistics = self.finish(
            relative,
            stub_path,
            &search.artifact,
            &groundtruth,
            after_pyright.as_deref(),
            SearchSummary {
                evaluated_slots: tree.len(),
                elapsed: search.elapsed,
                outcome: search.outcome,
                oracle_calls: search.oracle_calls,
            },
            started,
        )?;
        Ok(FileResult::Processed(statistics))
    }

    /// Writes pyright's inferred return types into `source`. `None` when
    /// there is no pyright stub for the file.
    fn with_pyright_returns(
        &self,
        path: &Path,
        relative: &Path,
        source: &str,
    ) -> Result<Option<InferredAnnotations>, BatchError> {
        let Some(stub_path) = self.pyright_stub_path(relative) else {
            return Ok(None);
        };
        let stub = std::fs::read_to_string(&stub_path)?;
        let inferred = inferred_returns(&stub)?;
        let result =
            apply_inferred_returns(source, &inferred, &self.annotator, self.resolver, path)?;
        if !result.applied.is_empty() {
            log::info!(
                "Added {} return types inferred by pyright to {}",
                result.applied.len(),
                relative.display()
            );
        }
        for (slot, annotation) in &result.unresolved {
            log::debug!("no import for pyright's {} on {}", annotation, slot);
        }
        Ok(Some(result))
    }

    /// Stub written by `pyright --createstub` for `relative`, either
    /// directly under the stubs directory or under the project's name.
    fn pyright_stub_path(&self, relative: &Path) -> Option<PathBuf> {
        let dir = &self.config.pyright_stubs_dir;
        if !dir.is_dir() {
            return None;
        }
        let stub = relative.with_extension("pyi");
        let mut candidates = vec![dir.join(&stub)];
        if let Some(name) = self.project_root.file_name() {
            candidates.push(dir.join(name).join(&stub));
        }
        let found = candidates.into_iter().find(|candidate| candidate.is_file());
        if found.is_none() {
            log::warn!(
                "'{}' has no pyright stub in {}, recreate stubs with `pyright --createstub`",
                relative.display(),
                dir.display()
            );
        }
        found
    }

    /// Writes the stub (and the annotated source) and builds the report row.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        relative: &Path,
        stub_path: &Path,
        artifact: &str,
        groundtruth: &[(Slot, Option<String>)],
        after_pyright: Option<&[(Slot, Option<String>)]>,
        search: SearchSummary,
        started: Instant,
    ) -> Result<FileStatistics, BatchError> {
        let stub = render_stub(artifact)?;
        write_file(stub_path, &stub)?;
        if let Some(sources_dir) = &self.config.sources_dir {
            write_file(&sources_dir.join(relative), artifact)?;
        }

        let after = PythonModule::parse(artifact)?.type_slots();
        Ok(FileStatistics {
            file: relative.display().to_string(),
            counts: AnnotationCounts::compare(groundtruth, after_pyright, &after),
            evaluated_slots: search.evaluated_slots,
            search_time: search.elapsed,
            total_time: started.elapsed(),
            outcome: search.outcome,
            oracle_calls: search.oracle_calls,
        })
    }

    fn relative<'p>(&self, path: &'p Path) -> &'p Path {
        path.strip_prefix(&self.project_root).unwrap_or(path)
    }

    fn excluded_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.venv.iter().cloned().collect();
        let outputs = std::iter::once(&self.config.output_dir).chain(self.config.sources_dir.as_ref());
        dirs.extend(outputs.filter_map(|dir| std::fs::canonicalize(dir).ok()));
        dirs
    }
}

fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_discover_skips_environments() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for file in [
            "b.py",
            "a.py",
            "notes.txt",
            "stubs.pyi",
            "pkg/mod.py",
            ".venv/lib/site.py",
            "venv/lib/site.py",
            "__pycache__/a.py",
            ".hidden/x.py",
            "custom-env/lib/site.py",
            "out/pkg/mod.py",
        ] {
            touch(&root.join(file));
        }

        let files = discover_python_files(root, &[root.join("custom-env"), root.join("out")]);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.py", "b.py", "pkg/mod.py"]);
    }

    #[test]
    fn test_groundtruth_treats_incomplete_as_missing() {
        let slots = groundtruth_slots("def f(a: Incomplete, b: int) -> Unknown:\n    pass\n").unwrap();
        let annotated: Vec<_> = slots
            .iter()
            .map(|(slot, a)| (slot.to_string(), a.clone()))
            .collect();
        assert_eq!(
            annotated,
            vec![
                ("f.a".to_string(), None),
                ("f.b".to_string(), Some("int".to_string())),
                ("f.return".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::TooManySlots(120).to_string(), "too many type slots (120)");
    }
}
