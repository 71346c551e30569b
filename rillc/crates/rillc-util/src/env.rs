//! Scoped name-to-value environments.
//!
//! The checker, the LIR compiler and the walk interpreter each instantiate
//! [`Env`] over their own value type (type, operand, runtime cell). The
//! representation is a flat append-only vector of entries threaded by
//! back-pointers, plus a table of scope tails:
//!
//! - [`Env::create_child_scope`] makes a new scope whose chain starts at
//!   the parent's current tail.
//! - [`Env::insert`] appends an entry and moves that scope's tail.
//! - [`Env::find`] walks tail -> prev -> ... until a name matches.
//!
//! Lookup is therefore innermost-first, two scopes with the same parent
//! have independent tails, and entries are never removed.

use crate::define_idx;
use crate::index::IndexVec;
use crate::symbol::Symbol;

define_idx!(ScopeId);
define_idx!(EntryId);

struct Entry<V> {
    name: Symbol,
    value: V,
    prev: Option<EntryId>,
}

/// A scoped environment storing values of type `V`.
///
/// # Example
///
/// ```
/// use rillc_util::{Env, StringPool};
///
/// let mut pool = StringPool::new();
/// let x = pool.intern("x");
///
/// let mut env: Env<i32> = Env::new();
/// let root = env.root_scope();
/// env.insert(root, x, 1);
///
/// let inner = env.create_child_scope(root);
/// assert_eq!(env.find(inner, x), Some(&1));
///
/// env.insert(inner, x, 2);
/// assert_eq!(env.find(inner, x), Some(&2)); // shadows
/// assert_eq!(env.find(root, x), Some(&1));  // parent untouched
/// ```
pub struct Env<V> {
    entries: IndexVec<EntryId, Entry<V>>,
    /// Tail of each scope's lookup chain.
    tails: IndexVec<ScopeId, Option<EntryId>>,
}

impl<V> Env<V> {
    /// Create an environment with a single empty root scope.
    pub fn new() -> Self {
        let mut tails = IndexVec::new();
        tails.push(None);
        Self {
            entries: IndexVec::new(),
            tails,
        }
    }

    /// The root scope, always present.
    pub fn root_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Open a new scope nested in `parent`.
    pub fn create_child_scope(&mut self, parent: ScopeId) -> ScopeId {
        let tail = self.tails[parent];
        self.tails.push(tail)
    }

    /// Bind `name` to `value` in `scope`.
    ///
    /// Insert never replaces: a second insert of the same name shadows the
    /// first for lookups through this scope, and the returned [`EntryId`]
    /// can be used to overwrite the stored value in place.
    pub fn insert(&mut self, scope: ScopeId, name: Symbol, value: V) -> EntryId {
        let prev = self.tails[scope];
        let id = self.entries.push(Entry { name, value, prev });
        self.tails[scope] = Some(id);
        id
    }

    /// Look up `name` starting from the innermost binding visible in
    /// `scope`.
    pub fn find(&self, scope: ScopeId, name: Symbol) -> Option<&V> {
        let mut cur = self.tails[scope];
        while let Some(id) = cur {
            let entry = &self.entries[id];
            if entry.name == name {
                return Some(&entry.value);
            }
            cur = entry.prev;
        }
        None
    }

    /// Direct access to a previously inserted entry's value.
    pub fn value_mut(&mut self, id: EntryId) -> &mut V {
        &mut self.entries[id].value
    }
}

impl<V> Default for Env<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::StringPool;

    #[test]
    fn lookup_in_child_sees_parent() {
        let mut pool = StringPool::new();
        let n = pool.intern("n");

        let mut env: Env<i32> = Env::new();
        let root = env.root_scope();
        env.insert(root, n, 7);

        let child = env.create_child_scope(root);
        assert_eq!(env.find(child, n), Some(&7));
    }

    #[test]
    fn child_shadowing_does_not_affect_parent() {
        let mut pool = StringPool::new();
        let n = pool.intern("n");

        let mut env: Env<i32> = Env::new();
        let root = env.root_scope();
        env.insert(root, n, 1);

        let child = env.create_child_scope(root);
        env.insert(child, n, 2);

        assert_eq!(env.find(child, n), Some(&2));
        assert_eq!(env.find(root, n), Some(&1));
    }

    #[test]
    fn sibling_scopes_are_independent() {
        let mut pool = StringPool::new();
        let n = pool.intern("n");
        let m = pool.intern("m");

        let mut env: Env<i32> = Env::new();
        let root = env.root_scope();

        let a = env.create_child_scope(root);
        let b = env.create_child_scope(root);
        env.insert(a, n, 1);
        env.insert(b, m, 2);

        assert_eq!(env.find(a, n), Some(&1));
        assert_eq!(env.find(a, m), None);
        assert_eq!(env.find(b, m), Some(&2));
        assert_eq!(env.find(b, n), None);
    }

    #[test]
    fn missing_name_is_none() {
        let mut pool = StringPool::new();
        let ghost = pool.intern("ghost");

        let env: Env<i32> = Env::new();
        assert_eq!(env.find(env.root_scope(), ghost), None);
    }

    #[test]
    fn value_mut_overwrites_in_place() {
        let mut pool = StringPool::new();
        let f = pool.intern("f");

        let mut env: Env<i32> = Env::new();
        let root = env.root_scope();
        let id = env.insert(root, f, 0);
        *env.value_mut(id) = 99;

        assert_eq!(env.find(root, f), Some(&99));
    }

    #[test]
    fn innermost_binding_wins() {
        let mut pool = StringPool::new();
        let x = pool.intern("x");

        let mut env: Env<i32> = Env::new();
        let root = env.root_scope();
        env.insert(root, x, 1);
        env.insert(root, x, 2);

        assert_eq!(env.find(root, x), Some(&2));
    }
}
