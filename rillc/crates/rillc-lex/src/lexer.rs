//! Single-pass lexer producing spanned tokens.

use thiserror::Error;

use rillc_util::{Span, StringPool};

use crate::cursor::Cursor;
use crate::token::Token;
use crate::Lexeme;

/// Errors produced while lexing.
#[derive(Debug, Error)]
pub enum LexError {
    #[error("unrecognized character `{ch}`")]
    UnexpectedChar { ch: char, span: Span },

    #[error("unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("unknown escape sequence `\\{ch}`")]
    UnknownEscape { ch: char, span: Span },

    #[error("invalid character literal")]
    InvalidChar { span: Span },

    #[error("integer literal does not fit in 64 bits")]
    NumberOverflow { span: Span },
}

impl LexError {
    /// Source location of the error.
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { span, .. }
            | LexError::UnterminatedString { span }
            | LexError::UnknownEscape { span, .. }
            | LexError::InvalidChar { span }
            | LexError::NumberOverflow { span } => *span,
        }
    }
}

/// The lexer. Call [`Lexer::next_token`] until it yields [`Token::Eof`].
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
}

/// Lex an entire source string into a token vector (EOF token included).
///
/// # Example
///
/// ```
/// use rillc_lex::{tokenize, Token};
/// use rillc_util::StringPool;
///
/// let mut pool = StringPool::new();
/// let tokens = tokenize("write_int 42", &mut pool).unwrap();
/// assert!(matches!(tokens[0].token, Token::Ident(_)));
/// assert_eq!(tokens[1].token, Token::Number(42));
/// assert_eq!(tokens[2].token, Token::Eof);
/// ```
pub fn tokenize(source: &str, pool: &mut StringPool) -> Result<Vec<Lexeme>, LexError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let lexeme = lexer.next_token(pool)?;
        let done = lexeme.token == Token::Eof;
        tokens.push(lexeme);
        if done {
            return Ok(tokens);
        }
    }
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over `source`.
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
        }
    }

    /// Produce the next token.
    pub fn next_token(&mut self, pool: &mut StringPool) -> Result<Lexeme, LexError> {
        self.skip_trivia();

        let begin = self.cursor.position();
        let Some(c) = self.cursor.advance() else {
            return Ok(Lexeme {
                token: Token::Eof,
                span: Span::point(begin),
            });
        };

        let token = match c {
            '(' => Token::ParenOpen,
            ')' => Token::ParenClose,
            '[' => Token::BracketOpen,
            ']' => Token::BracketClose,
            ';' => Token::Semicolon,
            ':' => Token::Colon,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' => {
                if self.cursor.match_char('=') {
                    Token::EqEq
                } else {
                    Token::Eq
                }
            }
            '>' => {
                if self.cursor.match_char('=') {
                    Token::GreaterEq
                } else {
                    Token::Greater
                }
            }
            '<' => {
                if self.cursor.match_char('=') {
                    Token::LessEq
                } else {
                    Token::Less
                }
            }
            '"' => self.lex_string(begin, pool)?,
            '\'' => self.lex_char(begin)?,
            c if c.is_ascii_digit() => self.lex_number(c, begin)?,
            c if c.is_ascii_alphabetic() || c == '_' => self.lex_ident(c, pool),
            other => {
                return Err(LexError::UnexpectedChar {
                    ch: other,
                    span: Span::new(begin, self.cursor.position()),
                })
            }
        };

        Ok(Lexeme {
            token,
            span: Span::new(begin, self.cursor.position()),
        })
    }

    /// Skip whitespace and `#` line comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.cursor.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                    self.cursor.advance();
                }
                Some('#') => {
                    while let Some(c) = self.cursor.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.cursor.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn lex_number(&mut self, first: char, begin: rillc_util::Position) -> Result<Token, LexError> {
        let mut value = (first as u8 - b'0') as i64;
        while let Some(c) = self.cursor.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            self.cursor.advance();
            let digit = (c as u8 - b'0') as i64;
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit))
                .ok_or(LexError::NumberOverflow {
                    span: Span::new(begin, self.cursor.position()),
                })?;
        }
        Ok(Token::Number(value))
    }

    fn lex_ident(&mut self, first: char, pool: &mut StringPool) -> Token {
        let mut text = String::new();
        text.push(first);
        while let Some(c) = self.cursor.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            text.push(c);
            self.cursor.advance();
        }
        match Token::keyword(&text) {
            Some(kw) => kw,
            None => Token::Ident(pool.intern(&text)),
        }
    }

    fn lex_string(
        &mut self,
        begin: rillc_util::Position,
        pool: &mut StringPool,
    ) -> Result<Token, LexError> {
        let mut text = String::new();
        loop {
            let Some(c) = self.cursor.advance() else {
                return Err(LexError::UnterminatedString {
                    span: Span::new(begin, self.cursor.position()),
                });
            };
            match c {
                '"' => break,
                '\\' => text.push(self.lex_escape(begin)?),
                other => text.push(other),
            }
        }
        Ok(Token::Str(pool.intern(&text)))
    }

    fn lex_char(&mut self, begin: rillc_util::Position) -> Result<Token, LexError> {
        let Some(c) = self.cursor.advance() else {
            return Err(LexError::InvalidChar {
                span: Span::new(begin, self.cursor.position()),
            });
        };
        let value = if c == '\\' { self.lex_escape(begin)? } else { c };
        if !self.cursor.match_char('\'') {
            return Err(LexError::InvalidChar {
                span: Span::new(begin, self.cursor.position()),
            });
        }
        Ok(Token::Char(value as u8))
    }

    fn lex_escape(&mut self, begin: rillc_util::Position) -> Result<char, LexError> {
        match self.cursor.advance() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some(other) => Err(LexError::UnknownEscape {
                ch: other,
                span: Span::new(begin, self.cursor.position()),
            }),
            None => Err(LexError::UnterminatedString {
                span: Span::new(begin, self.cursor.position()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lex(source: &str) -> Vec<Token> {
        let mut pool = StringPool::new();
        tokenize(source, &mut pool)
            .unwrap()
            .into_iter()
            .map(|l| l.token)
            .collect()
    }

    #[test]
    fn lex_keywords_and_idents() {
        let mut pool = StringPool::new();
        let tokens = tokenize("let var x = fun", &mut pool).unwrap();
        assert_eq!(tokens[0].token, Token::Let);
        assert_eq!(tokens[1].token, Token::Var);
        assert_eq!(tokens[2].token, Token::Ident(pool.intern("x")));
        assert_eq!(tokens[3].token, Token::Eq);
        assert_eq!(tokens[4].token, Token::Fun);
        assert_eq!(tokens[5].token, Token::Eof);
    }

    #[test]
    fn lex_two_char_operators() {
        assert_eq!(
            lex("== >= <= > < ="),
            vec![
                Token::EqEq,
                Token::GreaterEq,
                Token::LessEq,
                Token::Greater,
                Token::Less,
                Token::Eq,
                Token::Eof
            ]
        );
    }

    #[test]
    fn lex_numbers() {
        assert_eq!(lex("0 42 1000"), vec![
            Token::Number(0),
            Token::Number(42),
            Token::Number(1000),
            Token::Eof
        ]);
    }

    #[test]
    fn number_overflow_is_an_error() {
        let mut pool = StringPool::new();
        let err = tokenize("99999999999999999999999", &mut pool).unwrap_err();
        assert!(matches!(err, LexError::NumberOverflow { .. }));
    }

    #[test]
    fn lex_string_with_escapes() {
        let mut pool = StringPool::new();
        let tokens = tokenize(r#""a\nb\tc""#, &mut pool).unwrap();
        match tokens[0].token {
            Token::Str(sym) => assert_eq!(pool.find(sym), "a\nb\tc"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut pool = StringPool::new();
        let err = tokenize("\"abc", &mut pool).unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { .. }));
    }

    #[test]
    fn lex_char_literals() {
        assert_eq!(lex("'a' '\\n'"), vec![
            Token::Char(b'a'),
            Token::Char(b'\n'),
            Token::Eof
        ]);
    }

    #[test]
    fn char_without_closing_quote_is_an_error() {
        let mut pool = StringPool::new();
        let err = tokenize("'ab'", &mut pool).unwrap_err();
        assert!(matches!(err, LexError::InvalidChar { .. }));
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            lex("1 # the rest is ignored == fun\n2"),
            vec![Token::Number(1), Token::Number(2), Token::Eof]
        );
    }

    #[test]
    fn unknown_character_is_an_error() {
        let mut pool = StringPool::new();
        let err = tokenize("@", &mut pool).unwrap_err();
        assert!(matches!(err, LexError::UnexpectedChar { ch: '@', .. }));
    }

    #[test]
    fn spans_track_lines_and_columns() {
        let mut pool = StringPool::new();
        let tokens = tokenize("a\n  b", &mut pool).unwrap();
        assert_eq!(tokens[0].span.begin.line, 0);
        assert_eq!(tokens[0].span.begin.column, 0);
        assert_eq!(tokens[1].span.begin.line, 1);
        assert_eq!(tokens[1].span.begin.column, 2);
    }

    #[test]
    fn same_identifier_interns_to_same_symbol() {
        let mut pool = StringPool::new();
        let tokens = tokenize("abc abc", &mut pool).unwrap();
        assert_eq!(tokens[0].token, tokens[1].token);
    }

    proptest! {
        #[test]
        fn any_u32_lexes_back_to_itself(n: u32) {
            let mut pool = StringPool::new();
            let tokens = tokenize(&n.to_string(), &mut pool).unwrap();
            prop_assert_eq!(tokens[0].token, Token::Number(n as i64));
        }

        #[test]
        fn identifiers_lex_as_single_token(s in "[a-z_][a-z0-9_]{0,10}") {
            let mut pool = StringPool::new();
            let tokens = tokenize(&s, &mut pool).unwrap();
            prop_assert_eq!(tokens.len(), 2);
            match tokens[0].token {
                Token::Ident(sym) => prop_assert_eq!(pool.find(sym), s.as_str()),
                // keywords are identifiers the language reserves
                _ => prop_assert!(Token::keyword(&s).is_some()),
            }
        }
    }
}
