//! The evaluator.
//!
//! `break` and `continue` set interpreter flags which the enclosing loop
//! reads and clears; a block stops evaluating its remaining statements as
//! soon as a flag is raised, so both constructs take effect immediately,
//! exactly as the compiled backend's jumps do. Each loop saves and
//! restores the `in_loop` flag, which keeps nested loops separate.

use std::io::{BufRead, Read, Write};
use std::rc::Rc;

use thiserror::Error;

use rillc_par::{Ast, NodeId, NodeKind, Tag};
use rillc_util::{Env, ScopeId, Span, StringPool, Symbol};

use crate::value::{cell, Builtin, UserFn, Value, ValueCell};

/// Runtime failures of the walk interpreter. All fatal except that
/// `Exit` is the `exit` builtin's terminal signal, which the driver
/// converts into the process exit status.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("variable `{name}` was not previously declared")]
    Undeclared { name: String, span: Span },

    #[error("`{name}` is not a function")]
    NotAFunction { name: String, span: Span },

    #[error("`{name}` called with the wrong number of arguments")]
    WrongArity { name: String, span: Span },

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
        span: Span,
    },

    #[error("index {index} is out of bounds for an array of {len}")]
    IndexOutOfBounds {
        index: i64,
        len: usize,
        span: Span,
    },

    #[error("can't {what} outside of a loop")]
    OutsideLoop { what: &'static str, span: Span },

    #[error("array length must not be negative")]
    NegativeArrayLength { span: Span },

    #[error("division by zero")]
    DivisionByZero { span: Span },

    #[error("can't compare values of this type")]
    CantCompare { span: Span },

    #[error("couldn't read input")]
    InputExhausted,

    #[error("couldn't parse `{0}` as an integer")]
    InputNotANumber(String),

    #[error("exit({0})")]
    Exit(i64),
}

impl EvalError {
    /// Source location of the error, when one exists.
    pub fn span(&self) -> Option<Span> {
        match self {
            EvalError::Undeclared { span, .. }
            | EvalError::NotAFunction { span, .. }
            | EvalError::WrongArity { span, .. }
            | EvalError::TypeMismatch { span, .. }
            | EvalError::IndexOutOfBounds { span, .. }
            | EvalError::OutsideLoop { span, .. }
            | EvalError::NegativeArrayLength { span }
            | EvalError::DivisionByZero { span }
            | EvalError::CantCompare { span } => Some(*span),
            EvalError::Io(_)
            | EvalError::InputExhausted
            | EvalError::InputNotANumber(_)
            | EvalError::Exit(_) => None,
        }
    }
}

type Result<T> = std::result::Result<T, EvalError>;

/// The interpreter state.
pub struct Interpreter<'a, R, W> {
    ast: &'a Ast,
    pool: &'a StringPool,
    env: Env<ValueCell>,
    in_loop: bool,
    should_break: bool,
    should_continue: bool,
    input: R,
    output: W,
}

impl<'a, R: BufRead, W: Write> Interpreter<'a, R, W> {
    /// Create an interpreter with the builtins bound in the root scope.
    ///
    /// Takes the pool mutably to intern the builtin names, then only reads
    /// from it.
    pub fn new(ast: &'a Ast, pool: &'a mut StringPool, input: R, output: W) -> Self {
        let mut env = Env::new();
        let root = env.root_scope();
        let builtins = [
            ("read_int", Builtin::ReadInt),
            ("read_char", Builtin::ReadChar),
            ("write_int", Builtin::WriteInt),
            ("write_char", Builtin::WriteChar),
            ("write_str", Builtin::WriteStr),
            ("make_array", Builtin::MakeArray),
            ("exit", Builtin::Exit),
        ];
        for (name, builtin) in builtins {
            let sym = pool.intern(name);
            env.insert(root, sym, cell(Value::Builtin(builtin)));
        }
        let pool: &'a StringPool = pool;
        Self {
            ast,
            pool,
            env,
            in_loop: false,
            should_break: false,
            should_continue: false,
            input,
            output,
        }
    }

    /// Evaluate the whole program, returning the final value cell.
    pub fn eval(&mut self) -> Result<ValueCell> {
        let root_scope = self.env.root_scope();
        self.eval_node(self.ast.root(), root_scope)
    }

    fn span(&self, id: NodeId) -> Span {
        self.ast.node(id).span
    }

    fn as_int(&self, value: &ValueCell, span: Span) -> Result<i64> {
        match &*value.borrow() {
            Value::Int(n) => Ok(*n),
            other => Err(EvalError::TypeMismatch {
                expected: "a number",
                found: other.kind(),
                span,
            }),
        }
    }

    fn as_bool(&self, value: &ValueCell, span: Span) -> Result<bool> {
        match &*value.borrow() {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::TypeMismatch {
                expected: "a boolean",
                found: other.kind(),
                span,
            }),
        }
    }

    fn eval_node(&mut self, id: NodeId, scope: ScopeId) -> Result<ValueCell> {
        let node = self.ast.node(id);
        match &node.kind {
            NodeKind::Num(n) => Ok(cell(Value::Int(*n))),
            NodeKind::Char(c) => Ok(cell(Value::Int(*c as i64))),
            NodeKind::Str(sym) => Ok(cell(Value::Str(self.pool.find(*sym).to_string()))),
            NodeKind::True => Ok(cell(Value::Bool(true))),
            NodeKind::False => Ok(cell(Value::Bool(false))),
            NodeKind::Nil | NodeKind::Empty => Ok(cell(Value::Nil)),
            NodeKind::Id(sym) => match self.env.find(scope, *sym) {
                Some(handle) => Ok(Rc::clone(handle)),
                None => Err(EvalError::Undeclared {
                    name: self.pool.find(*sym).to_string(),
                    span: node.span,
                }),
            },
            NodeKind::Branch { tag, .. } => self.eval_branch(id, *tag, scope),
        }
    }

    fn eval_branch(&mut self, id: NodeId, tag: Tag, scope: ScopeId) -> Result<ValueCell> {
        match tag {
            Tag::Block => {
                let inner = self.env.create_child_scope(scope);
                let mut value = cell(Value::Nil);
                for child in self.ast.children(id).to_vec() {
                    value = self.eval_node(child, inner)?;
                    // a raised break/continue abandons the rest of the block
                    if self.should_break || self.should_continue {
                        break;
                    }
                }
                Ok(value)
            }

            Tag::If => {
                let cond = self.eval_node(self.ast.child(id, 0), scope)?;
                if self.as_bool(&cond, self.span(self.ast.child(id, 0)))? {
                    self.eval_node(self.ast.child(id, 1), scope)
                } else {
                    self.eval_node(self.ast.child(id, 2), scope)
                }
            }

            Tag::When => {
                let cond = self.eval_node(self.ast.child(id, 0), scope)?;
                if self.as_bool(&cond, self.span(self.ast.child(id, 0)))? {
                    self.eval_node(self.ast.child(id, 1), scope)?;
                }
                Ok(cell(Value::Nil))
            }

            Tag::For => self.eval_for(id, scope),
            Tag::While => self.eval_while(id, scope),

            Tag::Break => {
                if !self.in_loop {
                    return Err(EvalError::OutsideLoop {
                        what: "break",
                        span: self.span(id),
                    });
                }
                let value = self.eval_node(self.ast.child(id, 0), scope)?;
                self.should_break = true;
                Ok(value)
            }

            Tag::Continue => {
                if !self.in_loop {
                    return Err(EvalError::OutsideLoop {
                        what: "continue",
                        span: self.span(id),
                    });
                }
                let value = self.eval_node(self.ast.child(id, 0), scope)?;
                self.should_continue = true;
                Ok(value)
            }

            Tag::Assign => {
                let target = self.eval_node(self.ast.child(id, 0), scope)?;
                let value = self.eval_node(self.ast.child(id, 1), scope)?;
                *target.borrow_mut() = value.borrow().clone();
                Ok(value)
            }

            Tag::Or => {
                let left_id = self.ast.child(id, 0);
                let left = self.eval_node(left_id, scope)?;
                if self.as_bool(&left, self.span(left_id))? {
                    return Ok(left);
                }
                self.eval_node(self.ast.child(id, 1), scope)
            }

            Tag::And => {
                let left_id = self.ast.child(id, 0);
                let left = self.eval_node(left_id, scope)?;
                if !self.as_bool(&left, self.span(left_id))? {
                    return Ok(left);
                }
                self.eval_node(self.ast.child(id, 1), scope)
            }

            Tag::Add | Tag::Sub | Tag::Mul | Tag::Div | Tag::Mod => {
                let (a, b) = self.eval_int_operands(id, scope)?;
                let result = match tag {
                    Tag::Add => a.wrapping_add(b),
                    Tag::Sub => a.wrapping_sub(b),
                    Tag::Mul => a.wrapping_mul(b),
                    Tag::Div | Tag::Mod => {
                        if b == 0 {
                            return Err(EvalError::DivisionByZero {
                                span: self.span(id),
                            });
                        }
                        if tag == Tag::Div {
                            a.wrapping_div(b)
                        } else {
                            a.wrapping_rem(b)
                        }
                    }
                    _ => unreachable!(),
                };
                Ok(cell(Value::Int(result)))
            }

            Tag::Greater | Tag::Less | Tag::GreaterEq | Tag::LessEq => {
                let (a, b) = self.eval_int_operands(id, scope)?;
                let result = match tag {
                    Tag::Greater => a > b,
                    Tag::Less => a < b,
                    Tag::GreaterEq => a >= b,
                    Tag::LessEq => a <= b,
                    _ => unreachable!(),
                };
                Ok(cell(Value::Bool(result)))
            }

            Tag::Equal => {
                let left = self.eval_node(self.ast.child(id, 0), scope)?;
                let right = self.eval_node(self.ast.child(id, 1), scope)?;
                let result = match (&*left.borrow(), &*right.borrow()) {
                    (Value::Nil, Value::Nil) => true,
                    (Value::Bool(a), Value::Bool(b)) => a == b,
                    (Value::Int(a), Value::Int(b)) => a == b,
                    _ => {
                        return Err(EvalError::CantCompare {
                            span: self.span(id),
                        })
                    }
                };
                Ok(cell(Value::Bool(result)))
            }

            Tag::Not => {
                let operand_id = self.ast.child(id, 0);
                let operand = self.eval_node(operand_id, scope)?;
                let b = self.as_bool(&operand, self.span(operand_id))?;
                Ok(cell(Value::Bool(!b)))
            }

            Tag::At => {
                let base_id = self.ast.child(id, 0);
                let index_id = self.ast.child(id, 1);
                let base = self.eval_node(base_id, scope)?;
                let index_cell = self.eval_node(index_id, scope)?;
                let index = self.as_int(&index_cell, self.span(index_id))?;

                let base_ref = base.borrow();
                let Value::Array(items) = &*base_ref else {
                    return Err(EvalError::TypeMismatch {
                        expected: "an array",
                        found: base_ref.kind(),
                        span: self.span(base_id),
                    });
                };
                let slot = usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .ok_or(EvalError::IndexOutOfBounds {
                        index,
                        len: items.len(),
                        span: self.span(index_id),
                    })?;
                Ok(Rc::clone(slot))
            }

            Tag::App => self.eval_app(id, scope),
            Tag::VarDecl => self.eval_var_decl(id, scope),
            Tag::FunDecl => self.eval_fun_decl(id, scope),

            Tag::Let => {
                let inner = self.env.create_child_scope(scope);
                for decl in self.ast.children(self.ast.child(id, 0)).to_vec() {
                    self.eval_node(decl, inner)?;
                }
                self.eval_node(self.ast.child(id, 1), inner)
            }

            Tag::Path | Tag::As => self.eval_node(self.ast.child(id, 0), scope),

            Tag::IntType | Tag::UintType | Tag::BoolType | Tag::NilType => {
                // type expressions are consumed by the checker only
                Ok(cell(Value::Nil))
            }
        }
    }

    fn eval_int_operands(&mut self, id: NodeId, scope: ScopeId) -> Result<(i64, i64)> {
        let left_id = self.ast.child(id, 0);
        let right_id = self.ast.child(id, 1);
        let left = self.eval_node(left_id, scope)?;
        let a = self.as_int(&left, self.span(left_id))?;
        let right = self.eval_node(right_id, scope)?;
        let b = self.as_int(&right, self.span(right_id))?;
        Ok((a, b))
    }

    fn eval_for(&mut self, id: NodeId, scope: ScopeId) -> Result<ValueCell> {
        let decl_id = self.ast.child(id, 0);
        let upto_id = self.ast.child(id, 1);
        let step_id = self.ast.child(id, 2);
        let body_id = self.ast.child(id, 3);

        let outer = self.env.create_child_scope(scope);
        let var = self.eval_var_decl(decl_id, outer)?;
        let upto_cell = self.eval_node(upto_id, outer)?;
        let upto = self.as_int(&upto_cell, self.span(upto_id))?;
        let step = match self.ast.node(step_id).kind {
            NodeKind::Empty => 1,
            _ => {
                let step_cell = self.eval_node(step_id, outer)?;
                self.as_int(&step_cell, self.span(step_id))?
            }
        };

        let inner = self.env.create_child_scope(outer);
        let saved_in_loop = self.in_loop;
        self.in_loop = true;

        let mut value = cell(Value::Nil);
        let mut i = self.as_int(&var, self.span(decl_id))?;
        while i != upto {
            *var.borrow_mut() = Value::Int(i);
            value = self.eval_node(body_id, inner)?;
            if self.should_break {
                self.should_break = false;
                break;
            }
            self.should_continue = false;
            i = i.wrapping_add(step);
        }

        self.in_loop = saved_in_loop;
        Ok(value)
    }

    fn eval_while(&mut self, id: NodeId, scope: ScopeId) -> Result<ValueCell> {
        let cond_id = self.ast.child(id, 0);
        let body_id = self.ast.child(id, 1);

        let saved_in_loop = self.in_loop;
        self.in_loop = true;

        let mut value = cell(Value::Nil);
        loop {
            let cond = self.eval_node(cond_id, scope)?;
            if !self.as_bool(&cond, self.span(cond_id))? {
                break;
            }
            value = self.eval_node(body_id, scope)?;
            if self.should_break {
                self.should_break = false;
                break;
            }
            self.should_continue = false;
        }

        self.in_loop = saved_in_loop;
        Ok(value)
    }

    fn eval_app(&mut self, id: NodeId, scope: ScopeId) -> Result<ValueCell> {
        let callee_id = self.ast.child(id, 0);
        let args_id = self.ast.child(id, 1);

        let NodeKind::Id(callee) = self.ast.node(callee_id).kind else {
            panic!("application callee is not an identifier");
        };
        let Some(target) = self.env.find(scope, callee) else {
            return Err(EvalError::Undeclared {
                name: self.pool.find(callee).to_string(),
                span: self.span(callee_id),
            });
        };
        let target = Rc::clone(target);

        let mut args = Vec::new();
        for arg_id in self.ast.children(args_id).to_vec() {
            args.push(self.eval_node(arg_id, scope)?);
        }

        let callee_value = target.borrow().clone();
        match callee_value {
            Value::Builtin(builtin) => self.call_builtin(builtin, callee, &args, id),
            Value::Function(function) => {
                if function.params.len() != args.len() {
                    return Err(EvalError::WrongArity {
                        name: self.pool.find(callee).to_string(),
                        span: self.span(id),
                    });
                }
                // parameters bind by value in a fresh child scope
                let call_scope = self.env.create_child_scope(scope);
                for (param_id, arg) in function.params.iter().zip(&args) {
                    let NodeKind::Id(param) = self.ast.node(*param_id).kind else {
                        panic!("function parameter is not an identifier");
                    };
                    let copied = cell(arg.borrow().clone());
                    self.env.insert(call_scope, param, copied);
                }
                self.eval_node(function.body, call_scope)
            }
            other => Err(EvalError::NotAFunction {
                name: format!("{} ({})", self.pool.find(callee), other.kind()),
                span: self.span(callee_id),
            }),
        }
    }

    fn call_builtin(
        &mut self,
        builtin: Builtin,
        name: Symbol,
        args: &[ValueCell],
        id: NodeId,
    ) -> Result<ValueCell> {
        let span = self.span(id);
        if args.len() != 1 {
            return Err(EvalError::WrongArity {
                name: self.pool.find(name).to_string(),
                span,
            });
        }
        let arg = &args[0];
        match builtin {
            Builtin::ReadInt => {
                let mut line = String::new();
                if self.input.read_line(&mut line)? == 0 {
                    return Err(EvalError::InputExhausted);
                }
                let trimmed = line.trim();
                let n = trimmed
                    .parse::<i64>()
                    .map_err(|_| EvalError::InputNotANumber(trimmed.to_string()))?;
                Ok(cell(Value::Int(n)))
            }
            Builtin::ReadChar => {
                let mut byte = [0u8; 1];
                let n = match self.input.read(&mut byte)? {
                    0 => -1,
                    _ => byte[0] as i64,
                };
                Ok(cell(Value::Int(n)))
            }
            Builtin::WriteInt => {
                let n = self.as_int(arg, span)?;
                write!(self.output, "{n}")?;
                Ok(cell(Value::Nil))
            }
            Builtin::WriteChar => {
                let n = self.as_int(arg, span)?;
                self.output.write_all(&[n as u8])?;
                Ok(cell(Value::Nil))
            }
            Builtin::WriteStr => {
                let borrowed = arg.borrow();
                let Value::Str(text) = &*borrowed else {
                    return Err(EvalError::TypeMismatch {
                        expected: "a string",
                        found: borrowed.kind(),
                        span,
                    });
                };
                self.output.write_all(text.as_bytes())?;
                Ok(cell(Value::Nil))
            }
            Builtin::MakeArray => {
                let len = self.as_int(arg, span)?;
                if len < 0 {
                    return Err(EvalError::NegativeArrayLength { span });
                }
                let items = (0..len).map(|_| cell(Value::Int(0))).collect();
                Ok(cell(Value::Array(items)))
            }
            Builtin::Exit => {
                let code = self.as_int(arg, span)?;
                Err(EvalError::Exit(code))
            }
        }
    }

    fn eval_var_decl(&mut self, id: NodeId, scope: ScopeId) -> Result<ValueCell> {
        let NodeKind::Id(name) = self.ast.node(self.ast.child(id, 0)).kind else {
            panic!("variable declaration without an identifier");
        };
        let value = self.eval_node(self.ast.child(id, 2), scope)?;
        // a fresh cell per variable: assigning to it later must not write
        // through the initializer's cell
        let fresh = cell(value.borrow().clone());
        self.env.insert(scope, name, Rc::clone(&fresh));
        Ok(fresh)
    }

    fn eval_fun_decl(&mut self, id: NodeId, scope: ScopeId) -> Result<ValueCell> {
        let NodeKind::Id(name) = self.ast.node(self.ast.child(id, 0)).kind else {
            panic!("function declaration without an identifier");
        };
        let params = self.ast.children(self.ast.child(id, 1)).to_vec();
        let body = self.ast.child(id, 3);

        let handle = cell(Value::Nil);
        self.env.insert(scope, name, Rc::clone(&handle));
        *handle.borrow_mut() = Value::Function(UserFn { params, body });
        Ok(handle)
    }
}
