//! Binds the LSP oracle session to the search engine's [`Oracle`] trait.

use std::path::Path;
use typehint_core::{Oracle, OracleDiagnostic, OracleFailure, OracleVerdict, TextPosition, TextSpan};
use typehint_lsp::{OracleSession, Position, Range, SessionError, Verdict};

/// The session operations the pipeline needs.
pub trait CheckerSession {
    /// Opens a file and records its baseline. Returns the text.
    fn open_file(&mut self, path: &Path) -> Result<String, SessionError>;
    fn apply_change(&mut self, text: &str, modified: Option<Range>) -> Result<Verdict, SessionError>;
    fn refresh_baseline(&mut self) -> Result<(), SessionError>;
    fn close_file(&mut self) -> Result<(), SessionError>;
}

impl CheckerSession for OracleSession {
    fn open_file(&mut self, path: &Path) -> Result<String, SessionError> {
        OracleSession::open_file(self, path)
    }

    fn apply_change(&mut self, text: &str, modified: Option<Range>) -> Result<Verdict, SessionError> {
        OracleSession::apply_change(self, text, modified)
    }

    fn refresh_baseline(&mut self) -> Result<(), SessionError> {
        OracleSession::refresh_baseline(self)
    }

    fn close_file(&mut self) -> Result<(), SessionError> {
        OracleSession::close_file(self)
    }
}

/// [`Oracle`] backed by the open document of a checker session.
pub struct PyrightOracle<'s, S: CheckerSession + ?Sized> {
    session: &'s mut S,
}

impl<'s, S: CheckerSession + ?Sized> PyrightOracle<'s, S> {
    pub fn new(session: &'s mut S) -> Self {
        Self { session }
    }
}

impl<S: CheckerSession + ?Sized> Oracle for PyrightOracle<'_, S> {
    fn check(
        &mut self,
        text: &str,
        modified: Option<TextSpan>,
    ) -> Result<OracleVerdict, OracleFailure> {
        match self.session.apply_change(text, modified.map(to_range)) {
            Ok(verdict) => Ok(OracleVerdict {
                new_error: verdict.new_error,
                diagnostics: verdict
                    .diagnostics
                    .into_iter()
                    .map(|d| OracleDiagnostic {
                        span: to_span(d.range),
                        message: d.message,
                    })
                    .collect(),
            }),
            Err(SessionError::DiagnosticsTimeout { timeout, .. }) => {
                Err(OracleFailure::Timeout(timeout))
            }
            Err(err) => Err(OracleFailure::Fatal(err.to_string())),
        }
    }
}

fn to_range(span: TextSpan) -> Range {
    Range::new(
        Position::new(span.start.line, span.start.character),
        Position::new(span.end.line, span.end.character),
    )
}

fn to_span(range: Range) -> TextSpan {
    TextSpan::new(
        TextPosition::new(range.start.line, range.start.character),
        TextPosition::new(range.end.line, range.end.character),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use typehint_lsp::{Diagnostic, TransportError};

    struct Scripted {
        replies: Vec<Result<Verdict, SessionError>>,
        seen: Vec<(String, Option<Range>)>,
    }

    impl CheckerSession for Scripted {
        fn open_file(&mut self, _: &Path) -> Result<String, SessionError> {
            Ok(String::new())
        }
        fn apply_change(&mut self, text: &str, modified: Option<Range>) -> Result<Verdict, SessionError> {
            self.seen.push((text.to_string(), modified));
            self.replies.remove(0)
        }
        fn refresh_baseline(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
        fn close_file(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[test]
    fn test_verdict_and_failures_are_translated() {
        let offending = Diagnostic::error(
            Range::new(Position::new(4, 2), Position::new(4, 9)),
            "\"Path\" is not defined",
        );
        let mut session = Scripted {
            replies: vec![
                Ok(Verdict {
                    new_error: true,
                    diagnostics: vec![offending.clone()],
                    offending: vec![offending],
                }),
                Err(SessionError::DiagnosticsTimeout {
                    version: 3,
                    timeout: Duration::from_secs(30),
                }),
                Err(SessionError::Transport(TransportError::Closed("eof".to_string()))),
            ],
            seen: Vec::new(),
        };
        let mut oracle = PyrightOracle::new(&mut session);

        let span = TextSpan::new(TextPosition::new(3, 0), TextPosition::new(5, 0));
        let verdict = oracle.check("a", Some(span)).unwrap();
        assert!(verdict.new_error);
        assert_eq!(
            verdict.diagnostics[0].span,
            TextSpan::new(TextPosition::new(4, 2), TextPosition::new(4, 9))
        );

        assert_eq!(
            oracle.check("b", None),
            Err(OracleFailure::Timeout(Duration::from_secs(30)))
        );
        assert!(matches!(oracle.check("c", None), Err(OracleFailure::Fatal(_))));

        assert_eq!(session.seen[0].1, Some(to_range(span)));
        assert_eq!(session.seen[1].0, "b");
    }
}
