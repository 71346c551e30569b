//! The type checker.
//!
//! A single walk over the AST assigns a type to every visited node,
//! unifying as it goes. Scoping follows §3.4 environments: `let`, `for`
//! and function bodies open child scopes.
//!
//! The driver enumerates the builtin signatures and passes them in; the
//! checker itself knows nothing about `write_int` and friends.

use thiserror::Error;

use rillc_par::{Ast, NodeId, NodeKind, Tag};
use rillc_util::{Env, Idx, ScopeId, Span, StringPool, Symbol};

use crate::types::{Sign, Type};
use crate::unify::Unifier;

/// Errors produced while type checking. All fatal.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("{message}: expected {expected} but got {found} instead")]
    Mismatch {
        message: String,
        expected: String,
        found: String,
        span: Span,
    },

    #[error("variable `{name}` was not previously declared")]
    Undeclared { name: String, span: Span },

    #[error("{message}")]
    NotAReference { message: String, span: Span },

    #[error("can't cast a value of type {from} to {to}")]
    InvalidCast {
        from: String,
        to: String,
        span: Span,
    },
}

impl TypeError {
    /// Source location of the error.
    pub fn span(&self) -> Span {
        match self {
            TypeError::Mismatch { span, .. }
            | TypeError::Undeclared { span, .. }
            | TypeError::NotAReference { span, .. }
            | TypeError::InvalidCast { span, .. } => *span,
        }
    }
}

type Result<T> = std::result::Result<T, TypeError>;

/// Per-node types recorded by a successful check, fully resolved.
pub struct TypeInfo {
    types: Vec<Option<Type>>,
}

impl TypeInfo {
    /// The inferred type of a node, if the checker visited it.
    pub fn node_type(&self, id: NodeId) -> Option<&Type> {
        self.types[id.index()].as_ref()
    }
}

/// Type check a whole program.
///
/// `builtins` seeds the root scope; the returned [`TypeInfo`] maps every
/// visited node to its resolved type.
pub fn check(
    ast: &Ast,
    pool: &StringPool,
    builtins: &[(Symbol, Type)],
) -> Result<TypeInfo> {
    let mut checker = Checker::new(ast, pool);
    for (name, ty) in builtins {
        let root = checker.env.root_scope();
        checker.env.insert(root, *name, ty.clone());
    }
    let root_scope = checker.env.root_scope();
    checker.check_node(ast.root(), root_scope)?;
    Ok(checker.finish())
}

/// The checker state.
pub struct Checker<'a> {
    ast: &'a Ast,
    pool: &'a StringPool,
    unifier: Unifier,
    env: Env<Type>,
    node_types: Vec<Option<Type>>,
}

impl<'a> Checker<'a> {
    /// Create a checker for `ast`.
    pub fn new(ast: &'a Ast, pool: &'a StringPool) -> Self {
        Self {
            ast,
            pool,
            unifier: Unifier::new(),
            env: Env::new(),
            node_types: vec![None; ast.len()],
        }
    }

    fn finish(self) -> TypeInfo {
        let unifier = &self.unifier;
        TypeInfo {
            types: self
                .node_types
                .iter()
                .map(|slot| slot.as_ref().map(|t| unifier.resolve(t)))
                .collect(),
        }
    }

    fn assoc(&mut self, id: NodeId, ty: Type) -> Type {
        self.node_types[id.index()] = Some(ty.clone());
        ty
    }

    fn mismatch(
        &self,
        span: Span,
        message: &str,
        found: &Type,
        expected: &Type,
    ) -> TypeError {
        TypeError::Mismatch {
            message: message.to_string(),
            expected: self.unifier.resolve(expected).to_string(),
            found: self.unifier.resolve(found).to_string(),
            span,
        }
    }

    fn span(&self, id: NodeId) -> Span {
        self.ast.node(id).span
    }

    /// Infer and record the type of `id` within `scope`.
    pub fn check_node(&mut self, id: NodeId, scope: ScopeId) -> Result<Type> {
        let node = self.ast.node(id);
        match &node.kind {
            NodeKind::Num(_) => Ok(self.assoc(id, Type::I64)),
            NodeKind::Char(_) => Ok(self.assoc(id, Type::U8)),
            NodeKind::Str(_) => Ok(self.assoc(id, Type::array(Type::U8))),
            NodeKind::True | NodeKind::False => Ok(self.assoc(id, Type::Bool)),
            NodeKind::Nil => Ok(self.assoc(id, Type::Nil)),
            NodeKind::Empty => Ok(self.assoc(id, Type::Void)),
            NodeKind::Id(name) => {
                let Some(found) = self.env.find(scope, *name) else {
                    return Err(TypeError::Undeclared {
                        name: self.pool.find(*name).to_string(),
                        span: node.span,
                    });
                };
                let ty = Type::reference(found.clone());
                Ok(self.assoc(id, ty))
            }
            NodeKind::Branch { tag, .. } => self.check_branch(id, *tag, scope),
        }
    }

    fn check_branch(&mut self, id: NodeId, tag: Tag, scope: ScopeId) -> Result<Type> {
        match tag {
            Tag::Block => {
                let children = self.ast.children(id).to_vec();
                let mut last = Type::Nil;
                for child in children {
                    last = self.check_node(child, scope)?;
                }
                Ok(self.assoc(id, last))
            }

            Tag::If => {
                let cond = self.ast.child(id, 0);
                let cond_t = self.check_node(cond, scope)?;
                if !self.unifier.unify(&cond_t, &Type::Bool) {
                    return Err(self.mismatch(
                        self.span(cond),
                        "condition of `if` is not a boolean",
                        &cond_t,
                        &Type::Bool,
                    ));
                }
                let then_t = self.check_node(self.ast.child(id, 1), scope)?;
                let else_t = self.check_node(self.ast.child(id, 2), scope)?;
                if !self.unifier.unify(&then_t, &else_t) {
                    return Err(self.mismatch(
                        self.span(id),
                        "`then` and `else` branches have different types",
                        &else_t,
                        &then_t,
                    ));
                }
                Ok(self.assoc(id, then_t))
            }

            Tag::When => {
                let cond = self.ast.child(id, 0);
                let cond_t = self.check_node(cond, scope)?;
                if !self.unifier.unify(&cond_t, &Type::Bool) {
                    return Err(self.mismatch(
                        self.span(cond),
                        "condition of `when` is not a boolean",
                        &cond_t,
                        &Type::Bool,
                    ));
                }
                self.check_node(self.ast.child(id, 1), scope)?;
                Ok(self.assoc(id, Type::Nil))
            }

            Tag::For => {
                let inner = self.env.create_child_scope(scope);
                let decl_t = self.check_node(self.ast.child(id, 0), inner)?;
                let upto_t = self.check_node(self.ast.child(id, 1), inner)?;
                let step = self.ast.child(id, 2);
                let step_t = match self.ast.node(step).kind {
                    NodeKind::Empty => Type::I64,
                    _ => self.check_node(step, inner)?,
                };
                if !self.unifier.unify(&decl_t, &upto_t) {
                    return Err(self.mismatch(
                        self.span(id),
                        "`for` declaration and bound types don't match",
                        &decl_t,
                        &upto_t,
                    ));
                }
                if !self.unifier.unify(&upto_t, &step_t) {
                    return Err(self.mismatch(
                        self.span(id),
                        "`for` bound and step types don't match",
                        &upto_t,
                        &step_t,
                    ));
                }
                let body_t = self.check_node(self.ast.child(id, 3), inner)?;
                Ok(self.assoc(id, body_t))
            }

            Tag::While => {
                let cond = self.ast.child(id, 0);
                let cond_t = self.check_node(cond, scope)?;
                if !self.unifier.unify(&cond_t, &Type::Bool) {
                    return Err(self.mismatch(
                        self.span(cond),
                        "condition of `while` is not a boolean",
                        &cond_t,
                        &Type::Bool,
                    ));
                }
                let body_t = self.check_node(self.ast.child(id, 1), scope)?;
                Ok(self.assoc(id, body_t))
            }

            Tag::Break | Tag::Continue => {
                let value_t = self.check_node(self.ast.child(id, 0), scope)?;
                Ok(self.assoc(id, value_t))
            }

            Tag::Assign => {
                let lhs = self.ast.child(id, 0);
                let lhs_t = self.check_node(lhs, scope)?;
                let rhs_t = self.check_node(self.ast.child(id, 1), scope)?;
                if !self.unifier.unify(&lhs_t, &rhs_t) {
                    return Err(self.mismatch(
                        self.span(id),
                        "assignment with a value of the wrong type",
                        &rhs_t,
                        &lhs_t,
                    ));
                }
                if !self.unifier.resolve(&lhs_t).is_ref() {
                    return Err(TypeError::NotAReference {
                        message: "left side of assignment must be a reference".to_string(),
                        span: self.span(lhs),
                    });
                }
                Ok(self.assoc(id, rhs_t))
            }

            Tag::Or | Tag::And => {
                for i in 0..2 {
                    let side = self.ast.child(id, i);
                    let side_t = self.check_node(side, scope)?;
                    if !self.unifier.unify(&side_t, &Type::Bool) {
                        return Err(self.mismatch(
                            self.span(side),
                            "operand of logical combinator is not a boolean",
                            &side_t,
                            &Type::Bool,
                        ));
                    }
                }
                Ok(self.assoc(id, Type::Bool))
            }

            Tag::Not => {
                let operand = self.ast.child(id, 0);
                let operand_t = self.check_node(operand, scope)?;
                if !self.unifier.unify(&operand_t, &Type::Bool) {
                    return Err(self.mismatch(
                        self.span(operand),
                        "operand of `not` is not a boolean",
                        &operand_t,
                        &Type::Bool,
                    ));
                }
                Ok(self.assoc(id, Type::Bool))
            }

            Tag::Greater | Tag::Less | Tag::GreaterEq | Tag::LessEq => {
                for i in 0..2 {
                    let side = self.ast.child(id, i);
                    let side_t = self.check_node(side, scope)?;
                    if !self.unifier.unify(&side_t, &Type::I64) {
                        return Err(self.mismatch(
                            self.span(side),
                            "comparison operands must be numeric",
                            &side_t,
                            &Type::I64,
                        ));
                    }
                }
                Ok(self.assoc(id, Type::Bool))
            }

            Tag::Equal => {
                let left_t = self.check_node(self.ast.child(id, 0), scope)?;
                let right_t = self.check_node(self.ast.child(id, 1), scope)?;
                if !self.unifier.unify(&left_t, &right_t) {
                    return Err(self.mismatch(
                        self.span(id),
                        "equality comparison between different types is always false",
                        &right_t,
                        &left_t,
                    ));
                }
                Ok(self.assoc(id, Type::Bool))
            }

            Tag::Add | Tag::Sub | Tag::Mul | Tag::Div | Tag::Mod => {
                for i in 0..2 {
                    let side = self.ast.child(id, i);
                    let side_t = self.check_node(side, scope)?;
                    if !self.unifier.unify(&side_t, &Type::I64) {
                        return Err(self.mismatch(
                            self.span(side),
                            "arithmetic operands must be numeric",
                            &side_t,
                            &Type::I64,
                        ));
                    }
                }
                Ok(self.assoc(id, Type::I64))
            }

            Tag::At => {
                let base = self.ast.child(id, 0);
                let index = self.ast.child(id, 1);

                let elem = self.unifier.fresh_var();
                let expected = Type::reference(Type::array(elem));
                let base_t = self.check_node(base, scope)?;
                if !self.unifier.unify(&expected, &base_t) {
                    return Err(self.mismatch(
                        self.span(base),
                        "not an array",
                        &base_t,
                        &expected,
                    ));
                }
                if !self.unifier.resolve(&base_t).is_ref() {
                    return Err(TypeError::NotAReference {
                        message: "indexed expression is not a reference".to_string(),
                        span: self.span(base),
                    });
                }

                let index_t = self.check_node(index, scope)?;
                if !self.unifier.unify(&index_t, &Type::I64) {
                    return Err(self.mismatch(
                        self.span(index),
                        "index expression must be an integer",
                        &index_t,
                        &Type::I64,
                    ));
                }

                let item = match self.unifier.deref(&base_t) {
                    Type::Array(item) => *item,
                    other => {
                        return Err(self.mismatch(
                            self.span(base),
                            "not an array",
                            &other,
                            &expected,
                        ))
                    }
                };
                Ok(self.assoc(id, Type::reference(item)))
            }

            Tag::App => {
                let callee = self.ast.child(id, 0);
                let args = self.ast.child(id, 1);

                let mut inputs = Vec::new();
                for arg in self.ast.children(args).to_vec() {
                    inputs.push(self.check_node(arg, scope)?);
                }
                let output = self.unifier.fresh_var();
                let expected = Type::Function(inputs, Box::new(output));

                let callee_t = self.check_node(callee, scope)?;
                if !self.unifier.unify(&callee_t, &expected) {
                    return Err(self.mismatch(
                        self.span(id),
                        "function and arguments don't match",
                        &callee_t,
                        &expected,
                    ));
                }

                let result = match self.unifier.deref(&callee_t) {
                    Type::Function(_, output) => *output,
                    other => {
                        return Err(self.mismatch(
                            self.span(callee),
                            "called value is not a function",
                            &other,
                            &expected,
                        ))
                    }
                };
                Ok(self.assoc(id, result))
            }

            Tag::VarDecl => {
                let name = self.identifier(self.ast.child(id, 0));
                let annotation = self.ast.child(id, 1);
                let init = self.ast.child(id, 2);

                let init_t = self.check_node(init, scope)?;
                if !matches!(self.ast.node(annotation).kind, NodeKind::Empty) {
                    let annot_t = self.check_node(annotation, scope)?;
                    if !self.unifier.unify(&annot_t, &init_t) {
                        return Err(self.mismatch(
                            self.span(id),
                            "initializer does not have the annotated type",
                            &init_t,
                            &annot_t,
                        ));
                    }
                }
                // the variable holds the initializer's r-value; binding the
                // reference type of a path initializer would stack refs
                let bound = self.unifier.deref(&init_t);
                self.env.insert(scope, name, bound.clone());
                Ok(self.assoc(id, bound))
            }

            Tag::FunDecl => {
                let name = self.identifier(self.ast.child(id, 0));
                let params = self.ast.child(id, 1);
                let annotation = self.ast.child(id, 2);
                let body = self.ast.child(id, 3);
                let param_ids = self.ast.children(params).to_vec();

                // pre-bind the name so recursive calls can type
                let pre_inputs: Vec<Type> =
                    param_ids.iter().map(|_| self.unifier.fresh_var()).collect();
                let pre_output = match self.ast.node(annotation).kind {
                    NodeKind::Empty => self.unifier.fresh_var(),
                    _ => self.check_node(annotation, scope)?,
                };
                let pre_ty = Type::function(pre_inputs, pre_output);
                let entry = self.env.insert(scope, name, pre_ty.clone());
                self.assoc(id, pre_ty);

                let inner = self.env.create_child_scope(scope);
                let mut param_types = Vec::new();
                for param in param_ids {
                    let param_name = self.identifier(param);
                    let var = self.unifier.fresh_var();
                    param_types.push(var.clone());
                    self.env.insert(inner, param_name, var);
                }

                let body_t = self.check_node(body, inner)?;
                let output = match self.ast.node(annotation).kind {
                    NodeKind::Empty => body_t,
                    _ => {
                        let annot_t = self.check_node(annotation, inner)?;
                        if !self.unifier.unify(&body_t, &annot_t) {
                            return Err(self.mismatch(
                                self.span(id),
                                "function body does not have the annotated return type",
                                &body_t,
                                &annot_t,
                            ));
                        }
                        annot_t
                    }
                };

                let final_ty = Type::function(param_types, output);
                *self.env.value_mut(entry) = final_ty.clone();
                Ok(self.assoc(id, final_ty))
            }

            Tag::Let => {
                let decls = self.ast.child(id, 0);
                let body = self.ast.child(id, 1);

                let inner = self.env.create_child_scope(scope);
                for decl in self.ast.children(decls).to_vec() {
                    self.check_node(decl, inner)?;
                }
                let body_t = self.check_node(body, inner)?;
                Ok(self.assoc(id, body_t))
            }

            Tag::Path => {
                let inner_t = self.check_node(self.ast.child(id, 0), scope)?;
                Ok(self.assoc(id, inner_t))
            }

            Tag::As => {
                let expr = self.ast.child(id, 0);
                let expr_t = self.check_node(expr, scope)?;
                let target_t = self.check_node(self.ast.child(id, 1), scope)?;

                let value_t = self.unifier.deref(&expr_t);
                let permitted = (value_t.is_integer() && target_t.is_integer())
                    || (value_t == Type::Bool && target_t.is_integer())
                    || self.unifier.unify(&expr_t, &target_t);
                if !permitted {
                    return Err(TypeError::InvalidCast {
                        from: self.unifier.resolve(&expr_t).to_string(),
                        to: target_t.to_string(),
                        span: self.span(id),
                    });
                }
                Ok(self.assoc(id, target_t))
            }

            Tag::IntType => {
                let ty = Type::Integer {
                    bits: self.type_width(id, 64),
                    sign: Sign::Signed,
                };
                Ok(self.assoc(id, ty))
            }
            Tag::UintType => {
                let ty = Type::Integer {
                    bits: self.type_width(id, 8),
                    sign: Sign::Unsigned,
                };
                Ok(self.assoc(id, ty))
            }
            Tag::BoolType => Ok(self.assoc(id, Type::Bool)),
            Tag::NilType => Ok(self.assoc(id, Type::Nil)),
        }
    }

    fn type_width(&self, id: NodeId, default: u8) -> u8 {
        match self.ast.node(self.ast.child(id, 0)).kind {
            NodeKind::Num(n) => n as u8,
            _ => default,
        }
    }

    fn identifier(&self, id: NodeId) -> Symbol {
        match self.ast.node(id).kind {
            NodeKind::Id(sym) => sym,
            ref other => panic!("expected identifier node, got {other:?}"),
        }
    }
}
