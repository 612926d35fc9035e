//! Stub (`.pyi`) rendering.
//!
//! A stub keeps imports, classes and function signatures. Function bodies
//! become `...`; other module-level statements are dropped.

use super::python::{PythonModule, SyntaxError};
use tree_sitter::Node;

/// Renders the stub of a Python module.
pub fn render_stub(source: &str) -> Result<String, SyntaxError> {
    let module = PythonModule::parse(source)?;
    let root = module.root();
    let mut out = String::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                out.push_str(module.text(child));
                out.push('\n');
            }
            "function_definition" | "class_definition" | "decorated_definition" => {
                render_definition(&module, child, &mut out);
            }
            _ => {}
        }
    }
    Ok(out)
}

fn render_definition(module: &PythonModule, node: Node, out: &mut String) {
    let definition = if node.kind() == "decorated_definition" {
        node.child_by_field_name("definition")
    } else {
        Some(node)
    };
    let Some(definition) = definition else {
        return;
    };
    let Some(header_end) = header_end(definition) else {
        return;
    };

    out.push_str(indentation(module.source(), node));
    out.push_str(&module.source()[node.start_byte()..header_end]);

    if definition.kind() == "function_definition" {
        out.push_str(" ...\n");
        return;
    }

    let mut members = String::new();
    if let Some(body) = definition.child_by_field_name("body") {
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            if matches!(
                member.kind(),
                "function_definition" | "class_definition" | "decorated_definition"
            ) {
                render_definition(module, member, &mut members);
            }
        }
    }
    if members.is_empty() {
        out.push_str(" ...\n");
    } else {
        out.push('\n');
        out.push_str(&members);
    }
}

/// End of the `:` closing a definition header.
fn header_end(definition: Node) -> Option<usize> {
    let mut cursor = definition.walk();
    let colon = definition
        .children(&mut cursor)
        .find(|child| child.kind() == ":")
        .map(|colon| colon.end_byte());
    colon
}

/// Leading whitespace of the line `node` starts on, if only whitespace
/// precedes it.
fn indentation<'s>(source: &'s str, node: Node) -> &'s str {
    let start = node.start_byte();
    let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
    let prefix = &source[line_start..start];
    if prefix.trim().is_empty() {
        prefix
    } else {
        ""
    }
}
