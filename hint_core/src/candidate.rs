//! Candidate annotations.

use crate::type_expr::TypeExpr;

/// One predicted annotation for a slot with its ranking score.
///
/// The empty annotation is the sentinel meaning "leave the slot unannotated".
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub annotation: String,
    pub score: f64,
}

impl Candidate {
    pub fn new(annotation: impl Into<String>, score: f64) -> Self {
        Self {
            annotation: annotation.into(),
            score,
        }
    }

    /// The "no annotation" candidate appended to every layer.
    pub fn sentinel() -> Self {
        Self::new("", 0.0)
    }

    pub fn is_sentinel(&self) -> bool {
        self.annotation.is_empty()
    }
}

/// Brings a predicted annotation into the form written to source.
///
/// Surrounding quotes are stripped and the expression is normalized (see
/// [`TypeExpr::normalized`]). Text that does not parse as an annotation is
/// returned trimmed and unquoted; the annotator rejects it later.
pub fn normalize_annotation(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = strip_quotes(trimmed);
    if unquoted.is_empty() {
        return String::new();
    }
    match TypeExpr::parse(unquoted) {
        Ok(expr) => expr.normalized().to_string(),
        Err(_) => unquoted.to_string(),
    }
}

fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return text[1..text.len() - 1].trim();
        }
    }
    text
}
