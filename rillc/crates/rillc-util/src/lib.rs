//! rillc-util - Foundation types for the Rill toolchain.
//!
//! This crate provides the infrastructure shared by every compiler phase:
//!
//! - [`StringPool`] and [`Symbol`]: session-owned string interning.
//! - [`Span`] and [`Position`]: source location tracking.
//! - [`IndexVec`] and [`Idx`]: vectors with typed indices.
//! - [`Env`]: scoped name-to-value environments.
//! - [`diagnostic`]: error reporting with source excerpts.
//!
//! All downstream crates (`rillc-lex`, `rillc-par`, `rillc-sem`,
//! `rillc-lir`, `rillc-vm`, `rillc-walk`) depend on this one and nothing
//! here depends on them.

pub mod diagnostic;
pub mod env;
pub mod index;
pub mod span;
pub mod symbol;

pub use diagnostic::{Diagnostic, Level};
pub use env::{Env, EntryId, ScopeId};
pub use index::{Idx, IndexVec};
pub use span::{Position, Span};
pub use symbol::{StringPool, Symbol};

// Re-export commonly used hash collections
pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;

/// Macro to define index types easily.
///
/// Expands to a `Copy` newtype over `u32` implementing [`Idx`].
///
/// # Example
///
/// ```
/// rillc_util::define_idx!(NodeId);
///
/// let id = <NodeId as rillc_util::Idx>::from_usize(3);
/// assert_eq!(rillc_util::Idx::index(id), 3);
/// ```
#[macro_export]
macro_rules! define_idx {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $crate::Idx for $name {
            fn from_usize(idx: usize) -> Self {
                assert!(idx <= u32::MAX as usize);
                $name(idx as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}
