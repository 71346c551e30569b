//! rillc-sem - Type checking for the Rill language.
//!
//! Structural unification over a small type language: fixed-width integers,
//! booleans, nil, arrays, functions, references and type variables.
//! L-values are first-class: an identifier types as `Ref(t)` and every use
//! site r-value-coerces through unification, which auto-dereferences `Ref`
//! on either side.
//!
//! The checker walks the AST once, assigning a type to every node. Builtin
//! signatures are not baked in here; the driver enumerates them and seeds
//! the root scope.

pub mod check;
pub mod types;
pub mod unify;

pub use check::{check, Checker, TypeError, TypeInfo};
pub use types::{Sign, Type, TypeVarId};
pub use unify::Unifier;
