//! rillc-lex - Lexer for the Rill language.
//!
//! Turns source text into a stream of [`Token`]s with [`Span`]s attached.
//! Identifiers and string literals are interned into the session's
//! [`rillc_util::StringPool`] as they are produced.
//!
//! The surface is deliberately small: keyword-heavy syntax, decimal integer
//! literals, `"..."` strings and `'c'` characters with `\n`/`\t`/`\r`
//! escapes, and `#` line comments.

pub mod cursor;
pub mod lexer;
pub mod token;

pub use lexer::{tokenize, LexError, Lexer};
pub use token::Token;

use rillc_util::Span;

/// A token paired with its source span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lexeme {
    pub token: Token,
    pub span: Span,
}
