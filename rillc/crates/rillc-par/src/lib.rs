//! rillc-par - AST arena and parser for the Rill language.
//!
//! The AST is an arena of nodes addressed by [`NodeId`]; see [`ast`] for
//! the node shapes and construction invariants. The [`parser`] module holds
//! the recursive-descent parser that turns a token stream into a populated
//! arena.

pub mod ast;
pub mod parser;

pub use ast::{Ast, Node, NodeId, NodeKind, Tag};
pub use parser::{parse, ParseError, Parser};
