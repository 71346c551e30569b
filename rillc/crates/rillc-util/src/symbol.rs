//! String interning for identifiers and literals.
//!
//! The pool owns every string that flows through a compilation session and
//! hands out small stable [`Symbol`] handles. Equal strings intern to equal
//! symbols, which makes name comparison an integer comparison everywhere
//! downstream (environments, builtin dispatch, AST printing).
//!
//! The pool is owned by the driver and borrowed read-only by the later
//! phases; nothing here is global or thread-shared.

use std::fmt;

use rustc_hash::FxHashMap;

/// A compact handle to an interned string.
///
/// `Symbol` is 4 bytes and cheap to copy. Two symbols are equal if and only
/// if the strings they were interned from are equal.
///
/// # Example
///
/// ```
/// use rillc_util::StringPool;
///
/// let mut pool = StringPool::new();
/// let a = pool.intern("make_array");
/// let b = pool.intern("make_array");
/// let c = pool.intern("write_int");
///
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// assert_eq!(pool.find(a), "make_array");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Symbol {
    /// Get the raw index value, useful for debugging output.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

/// An append-only interning table.
///
/// Strings are stored once; interning the same content twice returns the
/// same [`Symbol`]. Entries are never removed, so `find` borrows are valid
/// for as long as the pool lives.
#[derive(Default)]
pub struct StringPool {
    /// Maps string content to its slot in `strings`.
    index: FxHashMap<String, u32>,
    /// Storage for the interned strings, indexed by symbol.
    strings: Vec<String>,
}

impl StringPool {
    /// Create a new empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its symbol.
    ///
    /// Amortised O(1) via the hash index. Interning past `u32::MAX` entries
    /// is fatal; no real program gets anywhere near that.
    pub fn intern(&mut self, text: &str) -> Symbol {
        if let Some(&idx) = self.index.get(text) {
            return Symbol(idx);
        }
        assert!(
            self.strings.len() < u32::MAX as usize,
            "string pool capacity exhausted"
        );
        let idx = self.strings.len() as u32;
        self.strings.push(text.to_owned());
        self.index.insert(text.to_owned(), idx);
        Symbol(idx)
    }

    /// Look up the string for a symbol.
    ///
    /// # Panics
    ///
    /// Panics if `symbol` did not come from this pool.
    pub fn find(&self, symbol: Symbol) -> &str {
        &self.strings[symbol.0 as usize]
    }

    /// Number of distinct strings interned so far.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns true if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
