//! Character cursor for traversing source code.
//!
//! Maintains byte position plus line/column state while iterating through
//! the source. Lines and columns are 0-based, matching
//! [`rillc_util::Position`].

use rillc_util::Position;

/// A cursor over source text.
///
/// # Example
///
/// ```
/// use rillc_lex::cursor::Cursor;
///
/// let mut cursor = Cursor::new("var x");
/// assert_eq!(cursor.peek(), Some('v'));
/// cursor.advance();
/// assert_eq!(cursor.peek(), Some('a'));
/// ```
pub struct Cursor<'a> {
    source: &'a str,
    position: usize,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    /// Creates a new cursor at the start of `source`.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            position: 0,
            line: 0,
            column: 0,
        }
    }

    /// Returns the character at the cursor, or `None` at end of input.
    #[inline]
    pub fn peek(&self) -> Option<char> {
        self.source[self.position..].chars().next()
    }

    /// Returns true when the cursor is at end of input.
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.position >= self.source.len()
    }

    /// Current position as a [`Position`].
    #[inline]
    pub fn position(&self) -> Position {
        Position::new(self.position, self.line, self.column)
    }

    /// Consumes and returns the current character, tracking line/column.
    pub fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Advances past the current character if it equals `expected`.
    ///
    /// Returns whether it matched.
    pub fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_consume() {
        let cursor = Cursor::new("ab");
        assert_eq!(cursor.peek(), Some('a'));
        assert_eq!(cursor.peek(), Some('a'));
    }

    #[test]
    fn advance_walks_the_input() {
        let mut cursor = Cursor::new("ab");
        assert_eq!(cursor.advance(), Some('a'));
        assert_eq!(cursor.advance(), Some('b'));
        assert_eq!(cursor.advance(), None);
        assert!(cursor.is_eof());
    }

    #[test]
    fn newline_resets_column() {
        let mut cursor = Cursor::new("a\nb");
        cursor.advance();
        cursor.advance();
        let pos = cursor.position();
        assert_eq!(pos.line, 1);
        assert_eq!(pos.column, 0);
        cursor.advance();
        assert_eq!(cursor.position().column, 1);
    }

    #[test]
    fn match_char_consumes_only_on_match() {
        let mut cursor = Cursor::new("=>");
        assert!(!cursor.match_char('>'));
        assert!(cursor.match_char('='));
        assert!(cursor.match_char('>'));
    }
}
