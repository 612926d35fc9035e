//! Writing annotations into Python source.

use super::python::{parameter_parts, ParameterKind, PythonModule};
use crate::annotator::{AnnotateError, Annotator, Materialized};
use crate::buffer::{ByteEdit, SourceBuffer};
use crate::slot::{Slot, SlotTarget};
use crate::type_expr::TypeExpr;
use std::collections::{BTreeSet, HashSet};
use tree_sitter::Node;

/// Annotator for Python source files.
///
/// Parameters become `name: T` or `name: T = default`, returns become
/// `-> T`. The modified region is the whole function definition, since a
/// new annotation can surface errors anywhere in the body.
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonAnnotator;

impl PythonAnnotator {
    pub fn new() -> Self {
        Self
    }
}

impl Annotator for PythonAnnotator {
    fn materialize(
        &self,
        artifact: &str,
        slot: &Slot,
        annotation: &str,
    ) -> Result<Materialized, AnnotateError> {
        let expr = if annotation.is_empty() {
            None
        } else {
            Some(
                TypeExpr::parse(annotation)
                    .map_err(|_| AnnotateError::InvalidAnnotation(annotation.to_string()))?,
            )
        };

        // Every definition at the slot's path where the slot is still open.
        let (edits, targets, had_errors) = {
            let module =
                PythonModule::parse(artifact).map_err(|e| AnnotateError::Parse(e.to_string()))?;
            let mut edits = Vec::new();
            let mut targets = Vec::new();
            let mut had_errors = false;
            let functions = module.function_nodes(slot.function());
            for (ordinal, function) in functions.into_iter().enumerate() {
                let site = match slot.target() {
                    SlotTarget::Parameter(name) => {
                        parameter_site(&module, function, name, annotation)
                    }
                    SlotTarget::Return => return_site(function, annotation),
                };
                if let SlotSite::Open(edit) = site {
                    targets.push(ordinal);
                    had_errors |= function.has_error();
                    edits.extend(edit);
                }
            }
            (edits, targets, had_errors)
        };

        if targets.is_empty() {
            if annotation.is_empty() {
                return Ok(Materialized {
                    text: artifact.to_string(),
                    required_imports: BTreeSet::new(),
                    modified: None,
                });
            }
            return Err(AnnotateError::SlotNotFound(slot.to_string()));
        }

        let text = if edits.is_empty() {
            artifact.to_string()
        } else {
            let mut buffer = SourceBuffer::from_str(artifact);
            buffer.apply(edits);
            buffer.text()
        };

        let (modified, bound) = {
            let module =
                PythonModule::parse(&text).map_err(|e| AnnotateError::Parse(e.to_string()))?;
            let functions = module.function_nodes(slot.function());
            let edited: Vec<Node> = targets
                .iter()
                .filter_map(|ordinal| functions.get(*ordinal).copied())
                .collect();
            if edited.len() != targets.len() {
                return Err(AnnotateError::InvalidAnnotation(annotation.to_string()));
            }
            if !had_errors && edited.iter().any(|f| f.has_error()) {
                return Err(AnnotateError::InvalidAnnotation(annotation.to_string()));
            }
            let start = edited.iter().map(|f| f.start_byte()).min().unwrap_or(0);
            let end = edited.iter().map(|f| f.end_byte()).max().unwrap_or(start);
            let buffer = SourceBuffer::from_str(&text);
            (buffer.span_of(start, end), module.bound_names())
        };

        let required_imports: BTreeSet<String> = expr
            .map(|e| e.referenced_names())
            .unwrap_or_default()
            .into_iter()
            .filter(|name| !bound.contains(name))
            .collect();

        Ok(Materialized {
            text,
            required_imports,
            modified: Some(modified),
        })
    }

    fn insert_imports(
        &self,
        materialized: Materialized,
        statements: &[String],
    ) -> Result<Materialized, AnnotateError> {
        let existing: HashSet<&str> = materialized.text.lines().map(str::trim).collect();
        let mut missing: Vec<&str> = Vec::new();
        for statement in statements {
            let statement = statement.trim();
            if !existing.contains(statement) && !missing.contains(&statement) {
                missing.push(statement);
            }
        }
        if missing.is_empty() {
            return Ok(materialized);
        }

        let offset = {
            let module = PythonModule::parse(&materialized.text)
                .map_err(|e| AnnotateError::Parse(e.to_string()))?;
            import_offset(&module)
        };

        let mut buffer = SourceBuffer::from_str(&materialized.text);
        let line = buffer.position_at(offset).line;
        let mut block = missing.join("\n");
        block.push('\n');
        if offset == materialized.text.len() && !materialized.text.is_empty() && !materialized.text.ends_with('\n') {
            block.insert(0, '\n');
        }
        buffer.apply(vec![ByteEdit::insert(offset, block)]);

        let inserted = missing.len() as u32;
        let modified = materialized.modified.map(|span| {
            if span.start.line >= line {
                span.shifted(inserted)
            } else {
                span
            }
        });

        Ok(Materialized {
            text: buffer.text(),
            required_imports: materialized.required_imports,
            modified,
        })
    }
}

/// A slot position inside one function definition.
enum SlotSite {
    /// The function has no such parameter.
    Missing,
    /// Already annotated. Never touched.
    Annotated,
    /// Open, with the edit writing the annotation (none for the sentinel).
    Open(Option<ByteEdit>),
}

fn parameter_site(
    module: &PythonModule,
    function: Node,
    name: &str,
    annotation: &str,
) -> SlotSite {
    let Some(params) = function.child_by_field_name("parameters") else {
        return SlotSite::Missing;
    };
    let mut cursor = params.walk();
    let found = params
        .named_children(&mut cursor)
        .filter_map(|param| {
            parameter_parts(param)
                .map(|(n, kind, ty)| (n, kind, ty, param.child_by_field_name("value")))
        })
        .find(|(n, ..)| module.text(*n) == name);
    let Some((name_node, kind, existing, value)) = found else {
        return SlotSite::Missing;
    };
    if matches!(kind, ParameterKind::VarArgs | ParameterKind::KwArgs) {
        return SlotSite::Missing;
    }
    if existing.is_some() {
        return SlotSite::Annotated;
    }
    if annotation.is_empty() {
        return SlotSite::Open(None);
    }

    let name_end = name_node.end_byte();
    SlotSite::Open(Some(match value {
        None => ByteEdit::insert(name_end, format!(": {}", annotation)),
        Some(value) => {
            ByteEdit::replace(name_end, value.start_byte(), format!(": {} = ", annotation))
        }
    }))
}

fn return_site(function: Node, annotation: &str) -> SlotSite {
    let Some(params) = function.child_by_field_name("parameters") else {
        return SlotSite::Missing;
    };
    if function.child_by_field_name("return_type").is_some() {
        return SlotSite::Annotated;
    }
    if annotation.is_empty() {
        return SlotSite::Open(None);
    }
    SlotSite::Open(Some(ByteEdit::insert(
        params.end_byte(),
        format!(" -> {}", annotation),
    )))
}

/// Byte offset where new imports go: after comments, the module docstring
/// and `__future__` imports.
fn import_offset(module: &PythonModule) -> usize {
    let root = module.root();
    let buffer = SourceBuffer::from_str(module.source());
    let mut cursor = root.walk();
    let mut first_statement = true;
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "comment" => continue,
            "future_import_statement" => {}
            "expression_statement" if first_statement && is_docstring(child) => {}
            _ => return buffer.line_start_byte(child.start_position().row),
        }
        first_statement = false;
    }
    module.source().len()
}

fn is_docstring(statement: Node) -> bool {
    statement.named_child_count() == 1
        && statement.named_child(0).map(|n| n.kind() == "string").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{TextPosition, TextSpan};

    const SOURCE: &str = "\
\"\"\"Module docstring.\"\"\"
from __future__ import annotations
from typing import List

class Store:
    def put(self, key, value=None):
        return key
";

    fn put(name: &str) -> Slot {
        Slot::parameter(["Store", "put"], name)
    }

    #[test]
    fn test_annotate_plain_parameter() {
        let result = PythonAnnotator.materialize(SOURCE, &put("key"), "str").unwrap();
        assert!(result.text.contains("def put(self, key: str, value=None):"));
        assert_eq!(result.required_imports, BTreeSet::from(["str".to_string()]));
        assert_eq!(
            result.modified,
            Some(TextSpan::new(TextPosition::new(5, 4), TextPosition::new(6, 18)))
        );
    }

    #[test]
    fn test_annotate_default_parameter() {
        let result = PythonAnnotator
            .materialize(SOURCE, &put("value"), "Optional[bytes]")
            .unwrap();
        assert!(result
            .text
            .contains("def put(self, key, value: Optional[bytes] = None):"));
        assert!(result.required_imports.contains("Optional"));
    }

    #[test]
    fn test_annotate_return_skips_bound_names() {
        let slot = Slot::returns(["Store", "put"]);
        let result = PythonAnnotator.materialize(SOURCE, &slot, "List[Store]").unwrap();
        assert!(result.text.contains("def put(self, key, value=None) -> List[Store]:"));
        assert!(result.required_imports.is_empty());
    }

    #[test]
    fn test_sentinel_keeps_text() {
        let result = PythonAnnotator.materialize(SOURCE, &put("key"), "").unwrap();
        assert_eq!(result.text, SOURCE);
        assert!(result.required_imports.is_empty());
        assert!(result.modified.is_some());
    }

    #[test]
    fn test_annotated_slots_are_left_alone() {
        let source = "def f(a: int, b: str = 'x') -> bool:\n    return True\n";
        let annotator = PythonAnnotator::new();
        for slot in [
            Slot::parameter(["f"], "a"),
            Slot::parameter(["f"], "b"),
            Slot::returns(["f"]),
        ] {
            let sentinel = annotator.materialize(source, &slot, "").unwrap();
            assert_eq!(sentinel.text, source);
            assert!(matches!(
                annotator.materialize(source, &slot, "float"),
                Err(AnnotateError::SlotNotFound(_))
            ));
        }
    }

    #[test]
    fn test_property_setter_shares_path_with_getter() {
        let source = "\
class C:
    @property
    def x(self) -> int:
        return 1

    @x.setter
    def x(self, value):
        pass
";
        let annotator = PythonAnnotator::new();
        let ret = Slot::returns(["C", "x"]);

        let sentinel = annotator.materialize(source, &ret, "").unwrap();
        assert_eq!(sentinel.text, source);
        assert_eq!(
            sentinel.modified,
            Some(TextSpan::new(TextPosition::new(6, 4), TextPosition::new(7, 12)))
        );

        let annotated = annotator.materialize(source, &ret, "None").unwrap();
        assert!(annotated.text.contains("def x(self) -> int:"));
        assert!(annotated.text.contains("def x(self, value) -> None:"));

        let value = annotator
            .materialize(source, &Slot::parameter(["C", "x"], "value"), "int")
            .unwrap();
        assert!(value.text.contains("def x(self, value: int):"));
        assert!(value.text.contains("def x(self) -> int:"));
    }

    #[test]
    fn test_redefinitions_are_annotated_together() {
        let source = "\
try:
    def load(path):
        return open(path)
except ImportError:
    def load(path):
        return None
";
        let result = PythonAnnotator
            .materialize(source, &Slot::parameter(["load"], "path"), "str")
            .unwrap();
        assert_eq!(result.text.matches("def load(path: str):").count(), 2);
        assert_eq!(
            result.modified,
            Some(TextSpan::new(TextPosition::new(1, 4), TextPosition::new(5, 19)))
        );
    }

    #[test]
    fn test_unknown_slot_and_invalid_annotation() {
        let missing = PythonAnnotator.materialize(SOURCE, &put("nope"), "int");
        assert!(matches!(missing, Err(AnnotateError::SlotNotFound(_))));

        let no_function = PythonAnnotator.materialize(SOURCE, &Slot::returns(["ghost"]), "int");
        assert!(matches!(no_function, Err(AnnotateError::SlotNotFound(_))));

        let invalid = PythonAnnotator.materialize(SOURCE, &put("key"), "int):");
        assert!(matches!(invalid, Err(AnnotateError::InvalidAnnotation(_))));
    }

    #[test]
    fn test_insert_imports_after_docstring_and_future() {
        let result = PythonAnnotator
            .materialize(SOURCE, &put("value"), "Optional[Path]")
            .unwrap();
        let span = result.modified.unwrap();
        let result = PythonAnnotator
            .insert_imports(
                result,
                &[
                    "from typing import Optional".to_string(),
                    "from pathlib import Path".to_string(),
                ],
            )
            .unwrap();
        let lines: Vec<&str> = result.text.lines().collect();
        assert_eq!(lines[1], "from __future__ import annotations");
        assert_eq!(lines[2], "from typing import Optional");
        assert_eq!(lines[3], "from pathlib import Path");
        assert_eq!(lines[4], "from typing import List");
        assert_eq!(result.modified, Some(span.shifted(2)));
    }

    #[test]
    fn test_insert_imports_skips_present_statements() {
        let materialized = Materialized {
            text: SOURCE.to_string(),
            required_imports: BTreeSet::new(),
            modified: None,
        };
        let result = PythonAnnotator
            .insert_imports(materialized, &["from typing import List".to_string()])
            .unwrap();
        assert_eq!(result.text, SOURCE);
    }

    #[test]
    fn test_insert_imports_into_module_without_statements() {
        let materialized = Materialized {
            text: "# just a comment".to_string(),
            required_imports: BTreeSet::new(),
            modified: None,
        };
        let result = PythonAnnotator
            .insert_imports(materialized, &["import os".to_string()])
            .unwrap();
        assert_eq!(result.text, "# just a comment\nimport os\n");
    }
}
