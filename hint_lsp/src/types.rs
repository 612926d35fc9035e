//! Simplified LSP types used by the oracle session.

use crate::error::SessionError;
use lsp_types::Uri;
use ropey::Rope;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A position in a text document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Line number (0-indexed).
    pub line: u32,
    /// Column in UTF-16 code units.
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

impl From<lsp_types::Position> for Position {
    fn from(pos: lsp_types::Position) -> Self {
        Self {
            line: pos.line,
            character: pos.character,
        }
    }
}

impl From<Position> for lsp_types::Position {
    fn from(pos: Position) -> Self {
        Self {
            line: pos.line,
            character: pos.character,
        }
    }
}

/// A range in a text document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// True when the ranges share at least one position. Touching ends count.
    pub fn overlaps(&self, other: &Range) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl From<lsp_types::Range> for Range {
    fn from(range: lsp_types::Range) -> Self {
        Self {
            start: range.start.into(),
            end: range.end.into(),
        }
    }
}

impl From<Range> for lsp_types::Range {
    fn from(range: Range) -> Self {
        Self {
            start: range.start.into(),
            end: range.end.into(),
        }
    }
}

/// Diagnostic severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

impl From<lsp_types::DiagnosticSeverity> for DiagnosticSeverity {
    fn from(severity: lsp_types::DiagnosticSeverity) -> Self {
        match severity {
            lsp_types::DiagnosticSeverity::ERROR => DiagnosticSeverity::Error,
            lsp_types::DiagnosticSeverity::WARNING => DiagnosticSeverity::Warning,
            lsp_types::DiagnosticSeverity::INFORMATION => DiagnosticSeverity::Information,
            lsp_types::DiagnosticSeverity::HINT => DiagnosticSeverity::Hint,
            _ => DiagnosticSeverity::Error,
        }
    }
}

/// A diagnostic reported by the type checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: DiagnosticSeverity,
    pub message: String,
    pub source: Option<String>,
    pub code: Option<String>,
}

impl Diagnostic {
    pub fn error(range: Range, message: impl Into<String>) -> Self {
        Self {
            range,
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            source: None,
            code: None,
        }
    }
}

impl From<lsp_types::Diagnostic> for Diagnostic {
    fn from(diag: lsp_types::Diagnostic) -> Self {
        Self {
            range: diag.range.into(),
            severity: diag
                .severity
                .map(DiagnosticSeverity::from)
                .unwrap_or(DiagnosticSeverity::Error),
            message: diag.message,
            source: diag.source,
            code: diag.code.map(|c| match c {
                lsp_types::NumberOrString::Number(n) => n.to_string(),
                lsp_types::NumberOrString::String(s) => s,
            }),
        }
    }
}

/// One `textDocument/publishDiagnostics` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedDiagnostics {
    pub uri: String,
    pub version: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
}

impl From<lsp_types::PublishDiagnosticsParams> for PublishedDiagnostics {
    fn from(params: lsp_types::PublishDiagnosticsParams) -> Self {
        Self {
            uri: params.uri.as_str().to_string(),
            version: params.version,
            diagnostics: params.diagnostics.into_iter().map(Diagnostic::from).collect(),
        }
    }
}

/// The content of a `didChange` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextChange {
    /// Replace the whole document.
    Full(String),
    /// Replace `range` of the previous version with `text`.
    Range { range: Range, text: String },
}

impl From<TextChange> for lsp_types::TextDocumentContentChangeEvent {
    fn from(change: TextChange) -> Self {
        match change {
            TextChange::Full(text) => Self {
                range: None,
                range_length: None,
                text,
            },
            TextChange::Range { range, text } => Self {
                range: Some(range.into()),
                range_length: None,
                text,
            },
        }
    }
}

impl TextChange {
    /// Smallest single-range change turning `old` into `new`.
    pub fn diff(old: &str, new: &str) -> TextChange {
        let prefix: usize = old
            .chars()
            .zip(new.chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.len_utf8())
            .sum();

        let limit = old.len().min(new.len()) - prefix;
        let suffix: usize = old[prefix..]
            .chars()
            .rev()
            .zip(new[prefix..].chars().rev())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.len_utf8())
            .scan(0usize, |total, len| {
                *total += len;
                (*total <= limit).then_some(len)
            })
            .sum();

        let rope = Rope::from_str(old);
        TextChange::Range {
            range: Range::new(
                position_at(&rope, prefix),
                position_at(&rope, old.len() - suffix),
            ),
            text: new[prefix..new.len() - suffix].to_string(),
        }
    }

    /// Applies the change to `text`.
    pub fn apply(&self, text: &str) -> String {
        match self {
            TextChange::Full(new) => new.clone(),
            TextChange::Range { range, text: insert } => {
                let rope = Rope::from_str(text);
                let start = byte_at(&rope, range.start);
                let end = byte_at(&rope, range.end).max(start);
                let mut out = String::with_capacity(text.len() + insert.len());
                out.push_str(&text[..start]);
                out.push_str(insert);
                out.push_str(&text[end..]);
                out
            }
        }
    }
}

/// LSP position of byte offset `byte`.
fn position_at(rope: &Rope, byte: usize) -> Position {
    let char_idx = rope.byte_to_char(byte.min(rope.len_bytes()));
    let line = rope.char_to_line(char_idx);
    let line_start = rope.line_to_char(line);
    let character = rope.char_to_utf16_cu(char_idx) - rope.char_to_utf16_cu(line_start);
    Position::new(line as u32, character as u32)
}

/// Byte offset of `position`, clamped to the line end.
fn byte_at(rope: &Rope, position: Position) -> usize {
    let line = position.line as usize;
    if line >= rope.len_lines() {
        return rope.len_bytes();
    }
    let line_start = rope.line_to_char(line);
    let slice = rope.line(line);
    let mut len = slice.len_chars();
    while len > 0 && matches!(slice.char(len - 1), '\n' | '\r') {
        len -= 1;
    }
    let base = rope.char_to_utf16_cu(line_start);
    let limit = rope.char_to_utf16_cu(line_start + len);
    let target = (base + position.character as usize).min(limit);
    rope.char_to_byte(rope.utf16_cu_to_char(target))
}

/// Converts an absolute file path to a `file://` URI.
pub fn path_to_uri(path: &Path) -> Result<Uri, SessionError> {
    let url = url::Url::from_file_path(path)
        .map_err(|_| SessionError::Uri(path.display().to_string()))?;
    url.as_str()
        .parse()
        .map_err(|_| SessionError::Uri(path.display().to_string()))
}

/// Whether two URIs name the same document. Servers may re-encode
/// characters such as `:` in drive letters, so both sides are decoded.
pub fn same_document(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => match (a.to_file_path(), b.to_file_path()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}
