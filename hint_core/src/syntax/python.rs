//! Python module model over tree-sitter.
//!
//! Walks class and function definitions to find signatures, parameters and
//! the names bound at module level.

use crate::buffer::{ByteEdit, SourceBuffer};
use crate::slot::Slot;
use crate::type_expr::TypeExpr;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use thiserror::Error;
use tree_sitter::{Node, Parser, Tree, TreeCursor};

/// Annotations that stand for "not known yet" in generated sources.
pub const INCOMPLETE_ANNOTATIONS: &[&str] =
    &["Incomplete", "Incomplete | None", "Optional[Incomplete]"];

/// Errors raised while parsing Python source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("failed to load the Python grammar: {0}")]
    Language(String),
    #[error("tree-sitter produced no tree")]
    NoTree,
}

/// Parses Python source into a tree-sitter tree.
pub fn parse_python(source: &str) -> Result<Tree, SyntaxError> {
    let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|e| SyntaxError::Language(e.to_string()))?;
    parser.parse(source, None).ok_or(SyntaxError::NoTree)
}

/// How a parameter is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// `x` or `x: T`
    Plain,
    /// `x=1` or `x: T = 1`
    Default,
    /// `*args`
    VarArgs,
    /// `**kwargs`
    KwArgs,
}

/// A parameter of a function definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    pub annotation: Option<String>,
}

/// A function definition with its scope path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    /// Enclosing classes and functions, ending in the function's own name.
    pub path: Vec<String>,
    /// Defined directly in a class body.
    pub is_method: bool,
    pub parameters: Vec<Parameter>,
    pub return_annotation: Option<String>,
    pub byte_range: Range<usize>,
}

impl FunctionSignature {
    /// Every annotatable slot with its current annotation.
    ///
    /// `self`/`cls` of methods and `*args`/`**kwargs` are not slots.
    pub fn slots(&self) -> Vec<(Slot, Option<String>)> {
        let mut slots = Vec::with_capacity(self.parameters.len() + 1);
        for (index, parameter) in self.parameters.iter().enumerate() {
            if matches!(parameter.kind, ParameterKind::VarArgs | ParameterKind::KwArgs) {
                continue;
            }
            if self.is_method && index == 0 && matches!(parameter.name.as_str(), "self" | "cls") {
                continue;
            }
            slots.push((
                Slot::parameter(self.path.iter().cloned(), parameter.name.clone()),
                parameter.annotation.clone(),
            ));
        }
        slots.push((
            Slot::returns(self.path.iter().cloned()),
            self.return_annotation.clone(),
        ));
        slots
    }
}

/// Returns true for annotations that only say the type is unknown.
pub fn is_incomplete_annotation(annotation: &str) -> bool {
    let annotation = annotation.trim();
    if INCOMPLETE_ANNOTATIONS.contains(&annotation) {
        return true;
    }
    TypeExpr::parse(annotation)
        .map(|expr| {
            let names = expr.referenced_names();
            names.contains("Incomplete") || names.contains("Unknown")
        })
        .unwrap_or(false)
}

/// A parsed Python module.
pub struct PythonModule<'s> {
    source: &'s str,
    tree: Tree,
}

impl<'s> PythonModule<'s> {
    pub fn parse(source: &'s str) -> Result<Self, SyntaxError> {
        Ok(Self {
            source,
            tree: parse_python(source)?,
        })
    }

    pub fn source(&self) -> &'s str {
        self.source
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// True if tree-sitter had to recover from syntax errors anywhere.
    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }

    /// Source text of a node.
    pub fn text(&self, node: Node) -> &'s str {
        &self.source[node.byte_range()]
    }

    /// Calls `visit` for every function definition, outermost first, with
    /// its scope path and whether it sits directly in a class body.
    pub fn each_function<'t>(&'t self, mut visit: impl FnMut(Node<'t>, &[String], bool)) {
        let mut cursor = self.tree.root_node().walk();
        let mut scope = Vec::new();
        if cursor.goto_first_child() {
            walk_definitions(&mut cursor, self.source, &mut scope, false, &mut visit);
        }
    }

    /// All function signatures in source order.
    pub fn functions(&self) -> Vec<FunctionSignature> {
        let mut functions = Vec::new();
        self.each_function(|node, path, is_method| {
            functions.push(self.signature(node, path, is_method));
        });
        functions
    }

    /// Definition nodes of every function at `path`, in source order.
    /// Property getters and setters, overloads and conditional
    /// redefinitions share one path.
    pub fn function_nodes(&self, path: &[String]) -> Vec<Node<'_>> {
        let mut found = Vec::new();
        self.each_function(|node, scope, _| {
            if scope == path {
                found.push(node);
            }
        });
        found
    }

    /// Every slot in the module with its current annotation, in source
    /// order. A slot shared by several definitions is open when any of
    /// them leaves it unannotated.
    pub fn type_slots(&self) -> Vec<(Slot, Option<String>)> {
        let mut slots: Vec<(Slot, Option<String>)> = Vec::new();
        let mut index: HashMap<Slot, usize> = HashMap::new();
        for (slot, annotation) in self.functions().iter().flat_map(FunctionSignature::slots) {
            match index.get(&slot) {
                Some(&i) => {
                    if annotation.is_none() {
                        slots[i].1 = None;
                    }
                }
                None => {
                    index.insert(slot.clone(), slots.len());
                    slots.push((slot, annotation));
                }
            }
        }
        slots
    }

    /// Slots without an annotation, in source order.
    pub fn available_slots(&self) -> Vec<Slot> {
        self.type_slots()
            .into_iter()
            .filter(|(_, annotation)| annotation.is_none())
            .map(|(slot, _)| slot)
            .collect()
    }

    fn signature(&self, node: Node, path: &[String], is_method: bool) -> FunctionSignature {
        let parameters = node
            .child_by_field_name("parameters")
            .map(|params| {
                let mut cursor = params.walk();
                params
                    .named_children(&mut cursor)
                    .filter_map(|child| self.parameter(child))
                    .collect()
            })
            .unwrap_or_default();
        FunctionSignature {
            path: path.to_vec(),
            is_method,
            parameters,
            return_annotation: node
                .child_by_field_name("return_type")
                .map(|n| self.text(n).to_string()),
            byte_range: node.byte_range(),
        }
    }

    fn parameter(&self, node: Node) -> Option<Parameter> {
        let (name, kind, annotation) = parameter_parts(node)?;
        Some(Parameter {
            name: self.text(name).to_string(),
            kind,
            annotation: annotation.map(|n| self.text(n).to_string()),
        })
    }

    /// Names bound at module level: imports, classes, functions and
    /// assignments, including those under top-level `if`/`try` blocks.
    pub fn bound_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_bindings(self.tree.root_node(), &mut names);
        names
    }

    fn collect_bindings(&self, node: Node, names: &mut BTreeSet<String>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "import_statement" | "import_from_statement" => {
                    let from = child.kind() == "import_from_statement";
                    let mut names_cursor = child.walk();
                    for imported in child.children_by_field_name("name", &mut names_cursor) {
                        if let Some(bound) = self.imported_binding(imported, from) {
                            names.insert(bound);
                        }
                    }
                }
                "class_definition" | "function_definition" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        names.insert(self.text(name).to_string());
                    }
                }
                "decorated_definition" => {
                    if let Some(name) = child
                        .child_by_field_name("definition")
                        .and_then(|d| d.child_by_field_name("name"))
                    {
                        names.insert(self.text(name).to_string());
                    }
                }
                "expression_statement" => {
                    let mut inner = child.walk();
                    for expr in child.named_children(&mut inner) {
                        if expr.kind() != "assignment" {
                            continue;
                        }
                        if let Some(left) = expr.child_by_field_name("left") {
                            if left.kind() == "identifier" {
                                names.insert(self.text(left).to_string());
                            }
                        }
                    }
                }
                "if_statement" | "try_statement" | "with_statement" | "block" | "else_clause"
                | "elif_clause" | "except_clause" | "finally_clause" => {
                    self.collect_bindings(child, names);
                }
                _ => {}
            }
        }
    }

    fn imported_binding(&self, node: Node, from: bool) -> Option<String> {
        match node.kind() {
            "aliased_import" => node
                .child_by_field_name("alias")
                .map(|alias| self.text(alias).to_string()),
            "dotted_name" => {
                let text = self.text(node);
                let bound = if from {
                    text.rsplit('.').next()
                } else {
                    text.split('.').next()
                };
                bound.map(|s| s.trim().to_string())
            }
            _ => None,
        }
    }

    /// Classes defined at module level and, recursively, inside their
    /// bodies. Nested classes are named by their qualified path, as in
    /// `Outer.Inner`.
    pub fn classes(&self) -> Vec<String> {
        let mut classes = Vec::new();
        self.collect_classes(self.tree.root_node(), "", &mut classes);
        classes
    }

    fn collect_classes(&self, scope: Node, prefix: &str, classes: &mut Vec<String>) {
        let mut cursor = scope.walk();
        for child in scope.named_children(&mut cursor) {
            let class = match child.kind() {
                "class_definition" => Some(child),
                "decorated_definition" => child
                    .child_by_field_name("definition")
                    .filter(|d| d.kind() == "class_definition"),
                _ => None,
            };
            let Some(class) = class else {
                continue;
            };
            let Some(name) = class.child_by_field_name("name") else {
                continue;
            };
            let qualified = if prefix.is_empty() {
                self.text(name).to_string()
            } else {
                format!("{}.{}", prefix, self.text(name))
            };
            classes.push(qualified.clone());
            if let Some(body) = class.child_by_field_name("body") {
                self.collect_classes(body, &qualified, classes);
            }
        }
    }
}

/// Splits a parameter node into its name node, kind and annotation node.
pub(crate) fn parameter_parts(node: Node) -> Option<(Node, ParameterKind, Option<Node>)> {
    let parts = match node.kind() {
        "identifier" => (node, ParameterKind::Plain, None),
        "default_parameter" => (node.child_by_field_name("name")?, ParameterKind::Default, None),
        "typed_parameter" => {
            let inner = node.named_child(0)?;
            let annotation = node.child_by_field_name("type");
            match inner.kind() {
                "list_splat_pattern" => (inner.named_child(0)?, ParameterKind::VarArgs, annotation),
                "dictionary_splat_pattern" => {
                    (inner.named_child(0)?, ParameterKind::KwArgs, annotation)
                }
                _ => (inner, ParameterKind::Plain, annotation),
            }
        }
        "typed_default_parameter" => (
            node.child_by_field_name("name")?,
            ParameterKind::Default,
            node.child_by_field_name("type"),
        ),
        "list_splat_pattern" => (node.named_child(0)?, ParameterKind::VarArgs, None),
        "dictionary_splat_pattern" => (node.named_child(0)?, ParameterKind::KwArgs, None),
        _ => return None,
    };
    Some(parts)
}

/// Recursively visits definitions below the cursor.
fn walk_definitions<'t>(
    cursor: &mut TreeCursor<'t>,
    source: &str,
    scope: &mut Vec<String>,
    in_class: bool,
    visit: &mut dyn FnMut(Node<'t>, &[String], bool),
) {
    loop {
        let node = cursor.node();
        let mut handled = false;

        if matches!(node.kind(), "function_definition" | "class_definition") {
            if let Some(name) = node.child_by_field_name("name") {
                let is_class = node.kind() == "class_definition";
                scope.push(source[name.byte_range()].to_string());
                if !is_class {
                    visit(node, scope, in_class);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    let mut inner = body.walk();
                    if inner.goto_first_child() {
                        walk_definitions(&mut inner, source, scope, is_class, visit);
                    }
                }
                scope.pop();
                handled = true;
            }
        }

        if !handled && cursor.goto_first_child() {
            walk_definitions(cursor, source, scope, in_class, visit);
            cursor.goto_parent();
        }

        if !cursor.goto_next_sibling() {
            break;
        }
    }
}

/// Removes annotations that only say "unknown" so their slots can be
/// searched again.
pub fn strip_incomplete_annotations(source: &str) -> Result<String, SyntaxError> {
    let module = PythonModule::parse(source)?;
    let mut edits = Vec::new();
    module.each_function(|function, _, _| {
        let Some(params) = function.child_by_field_name("parameters") else {
            return;
        };
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            let Some((name, _, Some(annotation))) = parameter_parts(param) else {
                continue;
            };
            if !is_incomplete_annotation(module.text(annotation)) {
                continue;
            }
            match param.child_by_field_name("value") {
                Some(value) => edits.push(ByteEdit::replace(name.end_byte(), value.start_byte(), "=")),
                None => edits.push(ByteEdit::replace(name.end_byte(), annotation.end_byte(), "")),
            }
        }
        if let Some(returns) = function.child_by_field_name("return_type") {
            if is_incomplete_annotation(module.text(returns)) {
                edits.push(ByteEdit::replace(params.end_byte(), returns.end_byte(), ""));
            }
        }
    });
    if edits.is_empty() {
        return Ok(source.to_string());
    }
    let mut buffer = SourceBuffer::from_str(source);
    buffer.apply(edits);
    Ok(buffer.text())
}
