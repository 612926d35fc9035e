//! Return types inferred by pyright.
//!
//! `pyright --createstub` writes a stub per module. Declared return types
//! appear as `-> T`, inferred ones only as a trailing comment on the
//! definition line:
//!
//! ```python
//! def total(self, items): # -> int:
//!     ...
//! ```
//!
//! These are written into the open return slots of the source before the
//! search starts.

use super::python::{is_incomplete_annotation, PythonModule, SyntaxError};
use crate::annotator::{with_imports, Annotator, ImportResolver};
use crate::slot::Slot;
use crate::type_expr::TypeExpr;
use std::collections::HashSet;
use std::path::Path;
use tree_sitter::Node;

/// Return annotations found in a pyright stub, in source order. Unknown
/// and unparsable types are left out.
pub fn inferred_returns(stub: &str) -> Result<Vec<(Slot, String)>, SyntaxError> {
    let module = PythonModule::parse(stub)?;
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    module.each_function(|node, path, _| {
        let annotation = match node.child_by_field_name("return_type") {
            Some(declared) => Some(module.text(declared).trim().to_string()),
            None => header_comment_return(stub, node),
        };
        let Some(annotation) = annotation else {
            return;
        };
        if annotation.is_empty()
            || is_incomplete_annotation(&annotation)
            || TypeExpr::parse(&annotation).is_err()
        {
            return;
        }
        let slot = Slot::returns(path.iter().cloned());
        if seen.insert(slot.clone()) {
            found.push((slot, annotation));
        }
    });
    Ok(found)
}

/// The `T` of a `# -> T:` comment following the parameter list.
fn header_comment_return(stub: &str, function: Node) -> Option<String> {
    let params = function.child_by_field_name("parameters")?;
    let rest = &stub[params.end_byte()..];
    let line = rest.split('\n').next().unwrap_or_default();
    let comment = line[line.find('#')? + 1..].trim();
    let annotation = comment.strip_prefix("->")?.trim();
    let annotation = annotation.strip_suffix("...").unwrap_or(annotation).trim_end();
    let annotation = annotation.strip_suffix(':').unwrap_or(annotation).trim();
    Some(annotation.to_string())
}

/// Outcome of writing inferred return types into a source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferredAnnotations {
    /// The source with every applicable annotation written.
    pub text: String,
    pub applied: Vec<(Slot, String)>,
    /// Annotations naming something no import could be found for.
    pub unresolved: Vec<(Slot, String)>,
}

/// Writes `inferred` return types into the open return slots of `source`.
/// Slots the source already annotates are left alone.
pub fn apply_inferred_returns(
    source: &str,
    inferred: &[(Slot, String)],
    annotator: &dyn Annotator,
    resolver: &dyn ImportResolver,
    file: &Path,
) -> Result<InferredAnnotations, SyntaxError> {
    let open: HashSet<Slot> = PythonModule::parse(source)?
        .available_slots()
        .into_iter()
        .filter(Slot::is_return)
        .collect();

    let mut result = InferredAnnotations {
        text: source.to_string(),
        ..InferredAnnotations::default()
    };
    for (slot, annotation) in inferred {
        if !open.contains(slot) {
            continue;
        }
        let materialized = match annotator.materialize(&result.text, slot, annotation) {
            Ok(m) => m,
            Err(err) => {
                log::debug!("cannot write inferred {} for {}: {}", annotation, slot, err);
                continue;
            }
        };
        match with_imports(annotator, resolver, materialized, file) {
            Some(m) => {
                result.text = m.text;
                result.applied.push((slot.clone(), annotation.clone()));
            }
            None => result.unresolved.push((slot.clone(), annotation.clone())),
        }
    }
    Ok(result)
}
