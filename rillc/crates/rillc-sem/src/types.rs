//! The type language.

use std::fmt;

use rillc_util::define_idx;

define_idx!(TypeVarId);

/// Integer signedness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sign {
    Signed,
    Unsigned,
}

/// A type in the Rill type system.
///
/// `Ref(t)` is the type of an l-value denoting a cell of `t`; it is a real
/// type, not a compiler-internal flag, so assignment and indexing unify
/// like everything else. `Var` is a unification metavariable whose binding
/// lives in the [`crate::Unifier`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Integer { bits: u8, sign: Sign },
    Bool,
    Nil,
    Void,
    Array(Box<Type>),
    Function(Vec<Type>, Box<Type>),
    Ref(Box<Type>),
    Var(TypeVarId),
}

impl Type {
    /// The default numeric type, `Int<64>`.
    pub const I64: Type = Type::Integer {
        bits: 64,
        sign: Sign::Signed,
    };

    /// The character/byte type, `UInt<8>`.
    pub const U8: Type = Type::Integer {
        bits: 8,
        sign: Sign::Unsigned,
    };

    /// Shorthand for `Array(elem)`.
    pub fn array(elem: Type) -> Type {
        Type::Array(Box::new(elem))
    }

    /// Shorthand for `Function(inputs, output)`.
    pub fn function(inputs: Vec<Type>, output: Type) -> Type {
        Type::Function(inputs, Box::new(output))
    }

    /// Shorthand for `Ref(inner)`.
    pub fn reference(inner: Type) -> Type {
        Type::Ref(Box::new(inner))
    }

    /// Returns true for `Integer` of any width and sign.
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Integer { .. })
    }

    /// Returns true for `Ref(_)`.
    pub fn is_ref(&self) -> bool {
        matches!(self, Type::Ref(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Integer {
                bits,
                sign: Sign::Signed,
            } => write!(f, "Int<{bits}>"),
            Type::Integer {
                bits,
                sign: Sign::Unsigned,
            } => write!(f, "UInt<{bits}>"),
            Type::Bool => write!(f, "Bool"),
            Type::Nil => write!(f, "Nil"),
            Type::Void => write!(f, "Void"),
            Type::Array(elem) => write!(f, "Array<{elem}>"),
            Type::Function(inputs, output) => {
                write!(f, "(")?;
                for (i, input) in inputs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{input}")?;
                }
                write!(f, ") -> {output}")
            }
            Type::Ref(inner) => write!(f, "&{inner}"),
            Type::Var(id) => write!(f, "t{}", id.0),
        }
    }
}
