//! Source buffer implementation using ropey.
//!
//! Syntax trees report byte offsets while checker diagnostics are addressed
//! by line and UTF-16 column. [`SourceBuffer`] converts between the two and
//! applies byte-addressed edits.

use crate::oracle::{TextPosition, TextSpan};
use ropey::Rope;

/// A single replacement of a byte range with new text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteEdit {
    /// Start byte (inclusive).
    pub start: usize,
    /// End byte (exclusive).
    pub end: usize,
    /// Replacement text.
    pub text: String,
}

impl ByteEdit {
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            text: text.into(),
        }
    }

    pub fn replace(start: usize, end: usize, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// A source file backed by a rope.
#[derive(Debug, Clone, Default)]
pub struct SourceBuffer {
    rope: Rope,
}

impl SourceBuffer {
    /// Creates a buffer from a string.
    pub fn from_str(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
        }
    }

    /// Returns the total number of bytes in the buffer.
    pub fn len_bytes(&self) -> usize {
        self.rope.len_bytes()
    }

    /// Returns the total number of lines in the buffer.
    pub fn len_lines(&self) -> usize {
        self.rope.len_lines()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_bytes() == 0
    }

    /// Converts a byte offset to a line and UTF-16 column.
    pub fn position_at(&self, byte: usize) -> TextPosition {
        let byte = byte.min(self.len_bytes());
        let char_idx = self.rope.byte_to_char(byte);
        let line = self.rope.char_to_line(char_idx);
        let line_start = self.rope.line_to_char(line);
        let column =
            self.rope.char_to_utf16_cu(char_idx) - self.rope.char_to_utf16_cu(line_start);
        TextPosition::new(line as u32, column as u32)
    }

    /// Returns the span covering a byte range.
    pub fn span_of(&self, start: usize, end: usize) -> TextSpan {
        TextSpan::new(self.position_at(start), self.position_at(end))
    }

    /// Returns the byte offset of the start of a line.
    pub fn line_start_byte(&self, line: usize) -> usize {
        if line >= self.len_lines() {
            self.len_bytes()
        } else {
            self.rope.line_to_byte(line)
        }
    }

    /// Applies a set of non-overlapping edits. Offsets refer to the text
    /// before any of the edits.
    pub fn apply(&mut self, mut edits: Vec<ByteEdit>) {
        edits.sort_by(|a, b| b.start.cmp(&a.start));
        for edit in edits {
            let start = self.rope.byte_to_char(edit.start.min(self.len_bytes()));
            let end = self.rope.byte_to_char(edit.end.min(self.len_bytes()));
            if start < end {
                self.rope.remove(start..end);
            }
            if !edit.text.is_empty() {
                self.rope.insert(start, &edit.text);
            }
        }
    }

    /// Returns the entire buffer as a string.
    pub fn text(&self) -> String {
        self.rope.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_at_ascii() {
        let buf = SourceBuffer::from_str("def f(x):\n    return x\n");
        assert_eq!(buf.position_at(0), TextPosition::new(0, 0));
        assert_eq!(buf.position_at(6), TextPosition::new(0, 6));
        assert_eq!(buf.position_at(14), TextPosition::new(1, 4));
    }

    #[test]
    fn test_position_at_counts_utf16_units() {
        // 'é' is two bytes and one UTF-16 unit, the emoji is four bytes and two units.
        let buf = SourceBuffer::from_str("s = 'é😀'\nx = 1\n");
        let quote_end = "s = 'é😀".len();
        assert_eq!(buf.position_at(quote_end), TextPosition::new(0, 8));
        assert_eq!(
            buf.span_of(0, quote_end + 1),
            TextSpan::new(TextPosition::new(0, 0), TextPosition::new(0, 9))
        );
    }

    #[test]
    fn test_apply_edits_in_any_order() {
        let mut buf = SourceBuffer::from_str("def f(a, b=1):\n    pass\n");
        buf.apply(vec![
            ByteEdit::insert(7, ": int"),
            ByteEdit::replace(10, 11, ": str = "),
        ]);
        assert_eq!(buf.text(), "def f(a: int, b: str = 1):\n    pass\n");
    }

    #[test]
    fn test_line_start_byte() {
        let buf = SourceBuffer::from_str("a\nbb\nccc");
        assert_eq!(buf.line_start_byte(0), 0);
        assert_eq!(buf.line_start_byte(2), 5);
        assert_eq!(buf.line_start_byte(7), 8);
    }
}
