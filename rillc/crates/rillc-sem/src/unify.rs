//! Structural unification with destructive type-variable binding.

use rillc_util::IndexVec;

use crate::types::{Type, TypeVarId};

/// Allocates type variables and holds their bindings.
///
/// Unification rules, applied in order:
///
/// 1. `Ref` on either side is dereferenced (an l-value stands wherever an
///    r-value of the underlying type is required).
/// 2. A bound variable is replaced by its target.
/// 3. An unbound variable binds to the other side.
/// 4. Functions unify if arities match and inputs/output pairwise unify.
/// 5. Arrays unify if their element types unify.
/// 6. Integers unify on exact width and sign.
/// 7. `Bool`/`Nil`/`Void` unify with themselves.
/// 8. Anything else fails.
///
/// There is no occurs check: `Ref` and `Array` are the only recursive
/// constructors and both require a concrete element, so the language cannot
/// build a cyclic type.
pub struct Unifier {
    bindings: IndexVec<TypeVarId, Option<Type>>,
}

impl Unifier {
    /// Create a unifier with no variables.
    pub fn new() -> Self {
        Self {
            bindings: IndexVec::new(),
        }
    }

    /// Allocate a fresh unbound variable.
    pub fn fresh_var(&mut self) -> Type {
        Type::Var(self.bindings.push(None))
    }

    /// Attempt to make `a` and `b` equal. Bindings established here persist
    /// even if a later unification fails.
    pub fn unify(&mut self, a: &Type, b: &Type) -> bool {
        if let Type::Ref(inner) = a {
            return self.unify(inner, b);
        }
        if let Type::Ref(inner) = b {
            return self.unify(a, inner);
        }

        if let Type::Var(id) = a {
            if let Some(target) = self.bindings[*id].clone() {
                return self.unify(&target, b);
            }
        }
        if let Type::Var(id) = b {
            if let Some(target) = self.bindings[*id].clone() {
                return self.unify(a, &target);
            }
        }

        // both unbound from here on; identical variables are already equal
        if let (Type::Var(x), Type::Var(y)) = (a, b) {
            if x == y {
                return true;
            }
        }
        if let Type::Var(id) = a {
            self.bindings[*id] = Some(b.clone());
            return true;
        }
        if let Type::Var(id) = b {
            self.bindings[*id] = Some(a.clone());
            return true;
        }

        match (a, b) {
            (Type::Function(in_a, out_a), Type::Function(in_b, out_b)) => {
                if in_a.len() != in_b.len() {
                    return false;
                }
                for (x, y) in in_a.iter().zip(in_b.iter()) {
                    if !self.unify(x, y) {
                        return false;
                    }
                }
                self.unify(out_a, out_b)
            }
            (Type::Array(elem_a), Type::Array(elem_b)) => self.unify(elem_a, elem_b),
            (
                Type::Integer { bits: ba, sign: sa },
                Type::Integer { bits: bb, sign: sb },
            ) => ba == bb && sa == sb,
            (Type::Bool, Type::Bool) => true,
            (Type::Nil, Type::Nil) => true,
            (Type::Void, Type::Void) => true,
            _ => false,
        }
    }

    /// Deeply substitute bound variables in `ty`.
    pub fn resolve(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(id) => match &self.bindings[*id] {
                Some(target) => self.resolve(target),
                None => ty.clone(),
            },
            Type::Array(elem) => Type::array(self.resolve(elem)),
            Type::Function(inputs, output) => Type::Function(
                inputs.iter().map(|t| self.resolve(t)).collect(),
                Box::new(self.resolve(output)),
            ),
            Type::Ref(inner) => Type::reference(self.resolve(inner)),
            _ => ty.clone(),
        }
    }

    /// Resolve and strip a leading `Ref`, yielding the r-value type.
    pub fn deref(&self, ty: &Type) -> Type {
        match self.resolve(ty) {
            Type::Ref(inner) => *inner,
            other => other,
        }
    }
}

impl Default for Unifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sign;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// Depth-bounded generator for arbitrary concrete-ish types.
    #[derive(Clone, Debug)]
    struct AnyType(Type);

    fn gen_type(g: &mut Gen, depth: usize) -> Type {
        let choices = if depth == 0 { 5 } else { 8 };
        match u8::arbitrary(g) % choices {
            0 => Type::I64,
            1 => Type::U8,
            2 => Type::Bool,
            3 => Type::Nil,
            4 => Type::Void,
            5 => Type::array(gen_type(g, depth - 1)),
            6 => Type::reference(gen_type(g, depth - 1)),
            _ => {
                let arity = usize::arbitrary(g) % 3;
                let inputs = (0..arity).map(|_| gen_type(g, depth - 1)).collect();
                Type::Function(inputs, Box::new(gen_type(g, depth - 1)))
            }
        }
    }

    impl Arbitrary for AnyType {
        fn arbitrary(g: &mut Gen) -> Self {
            AnyType(gen_type(g, 3))
        }
    }

    #[quickcheck]
    fn unify_is_reflexive(t: AnyType) -> bool {
        let mut unifier = Unifier::new();
        unifier.unify(&t.0, &t.0)
    }

    #[quickcheck]
    fn unify_is_symmetric(a: AnyType, b: AnyType) -> bool {
        let mut left = Unifier::new();
        let mut right = Unifier::new();
        left.unify(&a.0, &b.0) == right.unify(&b.0, &a.0)
    }

    #[quickcheck]
    fn fresh_var_unifies_with_anything(t: AnyType) -> bool {
        let mut unifier = Unifier::new();
        let var = unifier.fresh_var();
        unifier.unify(&var, &t.0)
    }

    #[test]
    fn binding_is_transitive() {
        let mut unifier = Unifier::new();
        let a = unifier.fresh_var();
        let b = unifier.fresh_var();
        assert!(unifier.unify(&a, &b));
        assert!(unifier.unify(&b, &Type::I64));
        assert_eq!(unifier.resolve(&a), Type::I64);
    }

    #[test]
    fn bindings_persist_across_failures() {
        let mut unifier = Unifier::new();
        let a = unifier.fresh_var();
        assert!(unifier.unify(&a, &Type::Bool));
        assert!(!unifier.unify(&a, &Type::I64));
        assert_eq!(unifier.resolve(&a), Type::Bool);
    }

    #[test]
    fn var_unifies_with_itself_without_binding() {
        let mut unifier = Unifier::new();
        let a = unifier.fresh_var();
        assert!(unifier.unify(&a, &a));
        // still unbound, still unifiable with a concrete type
        assert!(unifier.unify(&a, &Type::Nil));
    }

    #[test]
    fn ref_dereferences_on_either_side() {
        let mut unifier = Unifier::new();
        assert!(unifier.unify(&Type::reference(Type::I64), &Type::I64));
        assert!(unifier.unify(&Type::Bool, &Type::reference(Type::Bool)));
        assert!(unifier.unify(
            &Type::reference(Type::reference(Type::I64)),
            &Type::I64
        ));
    }

    #[test]
    fn integers_need_exact_width_and_sign() {
        let mut unifier = Unifier::new();
        assert!(unifier.unify(&Type::I64, &Type::I64));
        assert!(!unifier.unify(&Type::I64, &Type::U8));
        assert!(!unifier.unify(
            &Type::U8,
            &Type::Integer {
                bits: 8,
                sign: Sign::Signed
            }
        ));
    }

    #[test]
    fn functions_unify_componentwise() {
        let mut unifier = Unifier::new();
        let var = unifier.fresh_var();
        let general = Type::function(vec![Type::I64], var.clone());
        let concrete = Type::function(vec![Type::I64], Type::Nil);
        assert!(unifier.unify(&general, &concrete));
        assert_eq!(unifier.resolve(&var), Type::Nil);
    }

    #[test]
    fn function_arity_mismatch_fails() {
        let mut unifier = Unifier::new();
        let one = Type::function(vec![Type::I64], Type::Nil);
        let two = Type::function(vec![Type::I64, Type::I64], Type::Nil);
        assert!(!unifier.unify(&one, &two));
    }

    #[test]
    fn arrays_unify_elementwise() {
        let mut unifier = Unifier::new();
        let var = unifier.fresh_var();
        assert!(unifier.unify(&Type::array(var.clone()), &Type::array(Type::U8)));
        assert_eq!(unifier.resolve(&var), Type::U8);
        assert!(!unifier.unify(&Type::array(Type::U8), &Type::array(Type::I64)));
    }

    #[test]
    fn deref_strips_one_ref_after_resolving() {
        let mut unifier = Unifier::new();
        let var = unifier.fresh_var();
        assert!(unifier.unify(&var, &Type::reference(Type::I64)));
        assert_eq!(unifier.deref(&var), Type::I64);
        assert_eq!(unifier.deref(&Type::Bool), Type::Bool);
    }
}
