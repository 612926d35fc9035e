//! Typehint Core - Annotation search without any checker or transport.
//!
//! This crate holds the slot model, the candidate search tree, the
//! chronological backtracking engine and the Python syntax bookkeeping
//! (slot discovery, annotation edits, import insertion, stubs). The type
//! checker is reached only through the [`Oracle`] trait.

pub mod annotator;
pub mod buffer;
pub mod candidate;
pub mod oracle;
pub mod search;
pub mod slot;
pub mod snapshots;
pub mod syntax;
pub mod tree;
pub mod type_expr;

pub use annotator::{
    with_imports, AnnotateError, Annotator, ImportResolver, Materialized, Resolution,
};
pub use buffer::SourceBuffer;
pub use candidate::{normalize_annotation, Candidate};
pub use oracle::{Oracle, OracleDiagnostic, OracleFailure, OracleVerdict, TextPosition, TextSpan};
pub use search::{SearchConfig, SearchEngine, SearchError, SearchOutcome, SearchReport};
pub use slot::{Slot, SlotTarget};
pub use snapshots::SnapshotStack;
pub use syntax::{
    FunctionSignature, Parameter, ParameterKind, ProjectImportResolver, PythonAnnotator,
    PythonModule, SyntaxError,
};
pub use tree::{SearchLayer, SearchTree, SlotPrediction};
pub use type_expr::TypeExpr;
