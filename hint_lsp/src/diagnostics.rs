//! Deciding whether a set of diagnostics rejects an edit.

use crate::types::{Diagnostic, Range};
use regex::Regex;
use std::collections::HashSet;

/// Messages pyright reports for annotations that conflict with the code.
pub const DEFAULT_ERROR_PATTERNS: &[&str] = &[
    r"cannot be assigned to",
    r"is not defined",
    r#"Operator ".*" not supported for types ".*" and ".*""#,
];

/// Messages never treated as new errors.
pub const DEFAULT_ALLOWED_PATTERNS: &[&str] = &[r#""Unknown" is not defined"#];

/// Error and allow-list patterns applied to diagnostic messages.
#[derive(Debug, Clone)]
pub struct DiagnosticPolicy {
    errors: Vec<Regex>,
    allowed: Vec<Regex>,
}

impl DiagnosticPolicy {
    pub fn new<S: AsRef<str>>(errors: &[S], allowed: &[S]) -> Result<Self, regex::Error> {
        let compile = |patterns: &[S]| -> Result<Vec<Regex>, regex::Error> {
            patterns.iter().map(|p| Regex::new(p.as_ref())).collect()
        };
        Ok(Self {
            errors: compile(errors)?,
            allowed: compile(allowed)?,
        })
    }

    /// Whether `message` is an error this policy rejects edits for.
    pub fn is_error(&self, message: &str) -> bool {
        self.errors.iter().any(|re| re.is_match(message))
            && !self.allowed.iter().any(|re| re.is_match(message))
    }
}

impl Default for DiagnosticPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_PATTERNS, DEFAULT_ALLOWED_PATTERNS)
            .expect("built-in diagnostic patterns are valid")
    }
}

/// Outcome of one oracle check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// True when the edit introduced at least one new error.
    pub new_error: bool,
    /// Everything the checker reported for this version.
    pub diagnostics: Vec<Diagnostic>,
    /// The diagnostics counted as new errors.
    pub offending: Vec<Diagnostic>,
}

/// Classifies `diagnostics` against the baseline messages.
///
/// A diagnostic is a new error when the policy flags its message, the
/// message is not in `baseline`, and, if `modified` is given, its range
/// overlaps the modified region.
pub fn evaluate(
    diagnostics: &[Diagnostic],
    baseline: &HashSet<String>,
    modified: Option<Range>,
    policy: &DiagnosticPolicy,
) -> Verdict {
    let offending: Vec<Diagnostic> = diagnostics
        .iter()
        .filter(|d| policy.is_error(&d.message))
        .filter(|d| !baseline.contains(&d.message))
        .filter(|d| modified.map_or(true, |range| range.overlaps(&d.range)))
        .cloned()
        .collect();

    Verdict {
        new_error: !offending.is_empty(),
        diagnostics: diagnostics.to_vec(),
        offending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    fn diag(line: u32, message: &str) -> Diagnostic {
        Diagnostic::error(
            Range::new(Position::new(line, 0), Position::new(line, 5)),
            message,
        )
    }

    #[test]
    fn test_default_patterns() {
        let policy = DiagnosticPolicy::default();
        assert!(policy.is_error(
            "Type \"str\" is not assignable... Expression of type \"int\" cannot be assigned to parameter"
        ));
        assert!(policy.is_error("\"Path\" is not defined"));
        assert!(policy.is_error(
            "Operator \"+\" not supported for types \"int\" and \"str\""
        ));
        assert!(!policy.is_error("\"Unknown\" is not defined"));
        assert!(!policy.is_error("Import \"numpy\" could not be resolved"));
    }

    #[test]
    fn test_baseline_messages_are_suppressed() {
        let policy = DiagnosticPolicy::default();
        let baseline = HashSet::from(["\"foo\" is not defined".to_string()]);
        let diagnostics = vec![diag(3, "\"foo\" is not defined")];
        let verdict = evaluate(&diagnostics, &baseline, None, &policy);
        assert!(!verdict.new_error);
        assert_eq!(verdict.diagnostics.len(), 1);
    }

    #[test]
    fn test_modified_range_scopes_errors() {
        let policy = DiagnosticPolicy::default();
        let diagnostics = vec![diag(10, "\"Path\" is not defined")];
        let inside = Range::new(Position::new(8, 0), Position::new(12, 0));
        let outside = Range::new(Position::new(0, 0), Position::new(5, 0));

        let hit = evaluate(&diagnostics, &HashSet::new(), Some(inside), &policy);
        assert!(hit.new_error);
        assert_eq!(hit.offending, diagnostics);

        let miss = evaluate(&diagnostics, &HashSet::new(), Some(outside), &policy);
        assert!(!miss.new_error);

        let unscoped = evaluate(&diagnostics, &HashSet::new(), None, &policy);
        assert!(unscoped.new_error);
    }

    #[test]
    fn test_custom_policy() {
        let policy = DiagnosticPolicy::new(&["incompatible"], &["ignored"]).unwrap();
        assert!(policy.is_error("incompatible types"));
        assert!(!policy.is_error("incompatible but ignored"));
        assert!(!policy.is_error("is not defined"));
        assert!(DiagnosticPolicy::new(&["("], &[]).is_err());
    }
}
