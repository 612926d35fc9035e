//! Python syntax support.
//!
//! Slot discovery, annotation edits, import resolution, stub rendering and
//! reading pyright's inferred return types, all built on tree-sitter.

mod annotate;
mod imports;
mod inferred;
mod python;
mod stub;

pub use annotate::PythonAnnotator;
pub use inferred::{apply_inferred_returns, inferred_returns, InferredAnnotations};
pub use imports::{is_python_file, module_name, ProjectImportResolver, SKIPPED_DIRS};
pub use python::{
    is_incomplete_annotation, parse_python, strip_incomplete_annotations, FunctionSignature,
    Parameter, ParameterKind, PythonModule, SyntaxError, INCOMPLETE_ANNOTATIONS,
};
pub use stub::render_stub;
