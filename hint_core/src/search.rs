//! Chronological backtracking over the search tree.
//!
//! Layers are visited in order. Each layer tries its candidates best first;
//! an accepted candidate moves the search one layer down, a rejected one
//! moves to the next candidate, and an exhausted layer resets and returns
//! to the previous layer's next candidate. Every layer ends with the
//! sentinel, so a full path always exists unless the checker rejects the
//! unannotated text itself.

use crate::annotator::{with_imports, Annotator, ImportResolver};
use crate::candidate::normalize_annotation;
use crate::oracle::{Oracle, OracleFailure};
use crate::slot::Slot;
use crate::snapshots::SnapshotStack;
use crate::tree::SearchTree;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default wall-clock budget for one file.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(600);

/// Default number of oracle timeouts tolerated before giving up on a file.
pub const DEFAULT_MAX_ORACLE_TIMEOUTS: usize = 3;

/// Search limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    /// Wall-clock budget for the whole search.
    pub timeout: Duration,
    /// Oracle timeouts tolerated before the file is abandoned.
    pub max_oracle_timeouts: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SEARCH_TIMEOUT,
            max_oracle_timeouts: DEFAULT_MAX_ORACLE_TIMEOUTS,
        }
    }
}

/// How a search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchOutcome {
    /// Every layer has an accepted choice.
    Success,
    /// All combinations were rejected.
    Exhausted,
    /// The wall-clock budget ran out.
    TimedOut,
    /// The oracle timed out too often.
    Abandoned,
}

impl SearchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchOutcome::Success => "success",
            SearchOutcome::Exhausted => "exhausted",
            SearchOutcome::TimedOut => "timeout",
            SearchOutcome::Abandoned => "abandoned",
        }
    }
}

/// Errors that stop a search.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("oracle failed during search: {0}")]
    Oracle(String),
    #[error("no snapshot for layer {0}")]
    MissingSnapshot(usize),
}

/// Result of one search.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub outcome: SearchOutcome,
    /// Final artifact on success, the original otherwise.
    pub artifact: String,
    /// Accepted annotation per layer on success. Empty for the sentinel.
    pub choices: Vec<(Slot, String)>,
    /// Candidates sent to the oracle.
    pub oracle_calls: usize,
    /// Candidates rejected without asking the oracle.
    pub automatic_rejections: usize,
    pub oracle_timeouts: usize,
    pub elapsed: Duration,
}

impl SearchReport {
    pub fn is_success(&self) -> bool {
        self.outcome == SearchOutcome::Success
    }

    /// Number of slots that received a non-empty annotation.
    pub fn annotated_slots(&self) -> usize {
        self.choices.iter().filter(|(_, a)| !a.is_empty()).count()
    }
}

#[derive(Debug, Default)]
struct Counters {
    oracle_calls: usize,
    automatic_rejections: usize,
    oracle_timeouts: usize,
}

enum Attempt {
    Accepted(String),
    Rejected,
    Abandon,
}

/// Runs the backtracking search for one artifact.
pub struct SearchEngine<'a> {
    oracle: &'a mut dyn Oracle,
    annotator: &'a dyn Annotator,
    resolver: &'a dyn ImportResolver,
    config: SearchConfig,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        oracle: &'a mut dyn Oracle,
        annotator: &'a dyn Annotator,
        resolver: &'a dyn ImportResolver,
        config: SearchConfig,
    ) -> Self {
        Self {
            oracle,
            annotator,
            resolver,
            config,
        }
    }

    /// Searches for an accepted annotation per layer of `tree`, starting
    /// from `original`. `file` is where the artifact lives, for import
    /// resolution.
    pub fn run(
        &mut self,
        tree: &SearchTree,
        original: &str,
        file: &Path,
    ) -> Result<SearchReport, SearchError> {
        let started = Instant::now();
        let layers = tree.len();
        let mut counters = Counters::default();
        let mut pointers = vec![0usize; layers];
        let mut chosen: Vec<Option<String>> = vec![None; layers];
        let mut snapshots = SnapshotStack::new(original, layers);
        let mut layer = 0usize;

        let outcome = loop {
            if layer == layers {
                break SearchOutcome::Success;
            }
            if started.elapsed() >= self.config.timeout {
                log::warn!(
                    "search timed out after {:?} at layer {}",
                    started.elapsed(),
                    layer
                );
                break SearchOutcome::TimedOut;
            }

            let current = tree.layer(layer);
            let annotation = normalize_annotation(&current.candidates[pointers[layer]].annotation);
            let base = snapshots
                .get(layer)
                .ok_or(SearchError::MissingSnapshot(layer))?;
            log::debug!("{}: {} -> {:?}", layer, current.slot, annotation);

            match self.attempt(base, &current.slot, &annotation, file, &mut counters)? {
                Attempt::Accepted(text) => {
                    chosen[layer] = Some(annotation);
                    snapshots.commit(layer + 1, text);
                    layer += 1;
                }
                Attempt::Rejected => match backtrack(tree, &mut pointers, &mut chosen, layer) {
                    Some(next) => {
                        snapshots.invalidate_after(next);
                        layer = next;
                    }
                    None => break SearchOutcome::Exhausted,
                },
                Attempt::Abandon => break SearchOutcome::Abandoned,
            }
        };

        let success = outcome == SearchOutcome::Success;
        let artifact = match snapshots.get(layers) {
            Some(text) if success => text.to_string(),
            _ => snapshots.original().to_string(),
        };
        let choices = if success {
            tree.layers()
                .iter()
                .zip(chosen)
                .map(|(l, c)| (l.slot.clone(), c.unwrap_or_default()))
                .collect()
        } else {
            Vec::new()
        };

        Ok(SearchReport {
            outcome,
            artifact,
            choices,
            oracle_calls: counters.oracle_calls,
            automatic_rejections: counters.automatic_rejections,
            oracle_timeouts: counters.oracle_timeouts,
            elapsed: started.elapsed(),
        })
    }

    fn attempt(
        &mut self,
        base: &str,
        slot: &Slot,
        annotation: &str,
        file: &Path,
        counters: &mut Counters,
    ) -> Result<Attempt, SearchError> {
        let materialized = match self.annotator.materialize(base, slot, annotation) {
            Ok(m) => m,
            Err(err) => {
                log::debug!("rejecting {:?} for {}: {}", annotation, slot, err);
                counters.automatic_rejections += 1;
                return Ok(Attempt::Rejected);
            }
        };

        let resolved = with_imports(self.annotator, self.resolver, materialized, file);
        let materialized = match resolved {
            Some(m) => m,
            None => {
                counters.automatic_rejections += 1;
                return Ok(Attempt::Rejected);
            }
        };

        counters.oracle_calls += 1;
        match self.oracle.check(&materialized.text, materialized.modified) {
            Ok(verdict) if !verdict.new_error => Ok(Attempt::Accepted(materialized.text)),
            Ok(verdict) => {
                for diagnostic in &verdict.diagnostics {
                    log::trace!("{}: {}", slot, diagnostic.message);
                }
                Ok(Attempt::Rejected)
            }
            Err(OracleFailure::Timeout(waited)) => {
                counters.oracle_timeouts += 1;
                log::warn!(
                    "oracle gave no answer for {} within {:?} ({} so far)",
                    slot,
                    waited,
                    counters.oracle_timeouts
                );
                if counters.oracle_timeouts > self.config.max_oracle_timeouts {
                    Ok(Attempt::Abandon)
                } else {
                    Ok(Attempt::Rejected)
                }
            }
            Err(OracleFailure::Fatal(message)) => Err(SearchError::Oracle(message)),
        }
    }
}

/// Moves to the next untried candidate, unwinding exhausted layers.
/// Returns the layer to continue at, or `None` when the tree is exhausted.
fn backtrack(
    tree: &SearchTree,
    pointers: &mut [usize],
    chosen: &mut [Option<String>],
    mut layer: usize,
) -> Option<usize> {
    pointers[layer] += 1;
    while pointers[layer] >= tree.layer(layer).len() {
        pointers[layer] = 0;
        chosen[layer] = None;
        if layer == 0 {
            return None;
        }
        layer -= 1;
        chosen[layer] = None;
        pointers[layer] += 1;
    }
    Some(layer)
}
