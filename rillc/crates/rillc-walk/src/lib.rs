//! rillc-walk - The tree-walking reference interpreter.
//!
//! Evaluates the AST directly; it defines the language's observable
//! semantics, which the LIR backend must reproduce. Identifier lookups
//! yield shared cell handles, so assignment mutates through the same cell
//! every holder sees.

pub mod interp;
pub mod value;

pub use interp::{EvalError, Interpreter};
pub use value::{Builtin, Value, ValueCell};
