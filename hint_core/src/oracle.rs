//! Oracle-facing types: positions, spans, verdicts.
//!
//! The search engine only ever talks to a type checker through [`Oracle`],
//! so these types carry no protocol dependency.

use std::time::Duration;
use thiserror::Error;

/// A position in a document: 0-indexed line and UTF-16 column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextPosition {
    pub line: u32,
    pub character: u32,
}

impl TextPosition {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A half-open range between two positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TextSpan {
    pub start: TextPosition,
    pub end: TextPosition,
}

impl TextSpan {
    pub fn new(start: TextPosition, end: TextPosition) -> Self {
        Self { start, end }
    }

    /// Returns true if the position lies inside the span.
    pub fn contains(&self, position: TextPosition) -> bool {
        self.start <= position && position <= self.end
    }

    /// Returns true if the two spans share at least one position.
    pub fn overlaps(&self, other: &TextSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Moves the span down by `lines` lines.
    pub fn shifted(&self, lines: u32) -> Self {
        Self {
            start: TextPosition::new(self.start.line + lines, self.start.character),
            end: TextPosition::new(self.end.line + lines, self.end.character),
        }
    }
}

/// A diagnostic as seen by the search engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleDiagnostic {
    pub span: TextSpan,
    pub message: String,
}

/// The checker's answer for one candidate text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleVerdict {
    /// True when the change introduced at least one new error.
    pub new_error: bool,
    /// Diagnostics reported for the candidate text.
    pub diagnostics: Vec<OracleDiagnostic>,
}

impl OracleVerdict {
    /// A verdict with no new error.
    pub fn accepted() -> Self {
        Self::default()
    }

    /// A verdict flagging a new error.
    pub fn rejected(diagnostics: Vec<OracleDiagnostic>) -> Self {
        Self {
            new_error: true,
            diagnostics,
        }
    }
}

/// Reasons an oracle could not produce a verdict.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleFailure {
    /// No diagnostics arrived in time. The candidate is treated as rejected.
    #[error("no diagnostics within {0:?}")]
    Timeout(Duration),
    /// The checker connection is gone. The search cannot continue.
    #[error("oracle failed: {0}")]
    Fatal(String),
}

/// Something that type-checks a candidate text.
///
/// `modified` is the region touched by the candidate edit. Errors outside
/// of it may be ignored by the implementation.
pub trait Oracle {
    fn check(
        &mut self,
        text: &str,
        modified: Option<TextSpan>,
    ) -> Result<OracleVerdict, OracleFailure>;
}

impl<F> Oracle for F
where
    F: FnMut(&str, Option<TextSpan>) -> Result<OracleVerdict, OracleFailure>,
{
    fn check(
        &mut self,
        text: &str,
        modified: Option<TextSpan>,
    ) -> Result<OracleVerdict, OracleFailure> {
        self(text, modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(l1: u32, c1: u32, l2: u32, c2: u32) -> TextSpan {
        TextSpan::new(TextPosition::new(l1, c1), TextPosition::new(l2, c2))
    }

    #[test]
    fn test_overlaps() {
        let function = span(3, 0, 6, 12);
        assert!(function.overlaps(&span(4, 2, 4, 9)));
        assert!(function.overlaps(&span(0, 0, 3, 0)));
        assert!(function.overlaps(&span(6, 12, 8, 0)));
        assert!(!function.overlaps(&span(0, 0, 2, 40)));
        assert!(!function.overlaps(&span(6, 13, 6, 20)));
    }

    #[test]
    fn test_contains() {
        let s = span(1, 4, 1, 10);
        assert!(s.contains(TextPosition::new(1, 4)));
        assert!(!s.contains(TextPosition::new(1, 11)));
        assert!(!s.contains(TextPosition::new(0, 5)));
    }

    #[test]
    fn test_shifted() {
        assert_eq!(span(2, 3, 4, 5).shifted(2), span(4, 3, 6, 5));
    }

    #[test]
    fn test_closure_oracle() {
        let mut calls = 0;
        let mut oracle = |text: &str, _: Option<TextSpan>| -> Result<OracleVerdict, OracleFailure> {
            calls += 1;
            if text.contains("bad") {
                Ok(OracleVerdict::rejected(Vec::new()))
            } else {
                Ok(OracleVerdict::accepted())
            }
        };
        assert!(!oracle.check("good", None).unwrap().new_error);
        assert!(oracle.check("bad", None).unwrap().new_error);
        assert_eq!(calls, 2);
    }
}
