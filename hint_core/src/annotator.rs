//! Seams between the search engine and the source language.

use crate::oracle::TextSpan;
use crate::slot::Slot;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

/// Errors raised while writing an annotation into an artifact.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnnotateError {
    #[error("slot {0} not found in source")]
    SlotNotFound(String),
    #[error("annotation `{0}` does not produce valid source")]
    InvalidAnnotation(String),
    #[error("source does not parse: {0}")]
    Parse(String),
}

/// An artifact with one annotation applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    /// The new artifact text.
    pub text: String,
    /// Names the annotation needs that are not bound in the artifact yet.
    pub required_imports: BTreeSet<String>,
    /// Region of the artifact affected by the edit.
    pub modified: Option<TextSpan>,
}

/// Writes annotations into artifacts.
pub trait Annotator {
    /// Applies `annotation` at `slot`. The empty annotation leaves the slot
    /// unannotated.
    fn materialize(
        &self,
        artifact: &str,
        slot: &Slot,
        annotation: &str,
    ) -> Result<Materialized, AnnotateError>;

    /// Adds import statements to a materialized artifact, keeping its
    /// modified region pointing at the same code.
    fn insert_imports(
        &self,
        materialized: Materialized,
        statements: &[String],
    ) -> Result<Materialized, AnnotateError>;
}

/// How a referenced name becomes available in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Already in scope (builtins, names defined in the file itself).
    Available,
    /// Needs the given import statement.
    Import(String),
}

/// Finds import statements for names used by annotations.
pub trait ImportResolver {
    /// Returns `None` when the name cannot be resolved.
    fn resolve(&self, name: &str, file: &Path) -> Option<Resolution>;
}

/// Resolves the names `materialized` requires and inserts their imports.
/// `None` means some name has no known source or the imports could not be
/// written.
pub fn with_imports(
    annotator: &dyn Annotator,
    resolver: &dyn ImportResolver,
    materialized: Materialized,
    file: &Path,
) -> Option<Materialized> {
    let mut statements = Vec::new();
    for name in &materialized.required_imports {
        match resolver.resolve(name, file) {
            Some(Resolution::Available) => {}
            Some(Resolution::Import(statement)) => {
                if !statements.contains(&statement) {
                    statements.push(statement);
                }
            }
            None => {
                log::debug!("no import found for {}", name);
                return None;
            }
        }
    }
    if statements.is_empty() {
        return Some(materialized);
    }
    match annotator.insert_imports(materialized, &statements) {
        Ok(m) => Some(m),
        Err(err) => {
            log::debug!("cannot insert imports {:?}: {}", statements, err);
            None
        }
    }
}
