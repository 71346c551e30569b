//! Lowering from the AST to LIR.
//!
//! Register allocation is a single dense counter shared by named registers
//! and temporaries. Register 0 always holds the address of the next free
//! heap cell; the preamble's `mov %0, <heap-top>` operand is back-patched
//! once compilation has accounted for every static allocation.
//!
//! `break expr` and `continue expr` contribute their value to the
//! enclosing loop's result register: each emits a `mov` with a placeholder
//! destination and records the instruction index; when the loop closes,
//! the placeholders are rewritten to the loop's result operand.
//!
//! Function declarations compile into their own chunks, which are
//! concatenated ahead of the main chunk so callees are defined before the
//! entry point jumps over them. (Collecting them instead of splicing each
//! one into the working chunk keeps pending back-patch indices stable.)
//!
//! Every activation of a function shares its statically allocated
//! registers, and the VM has a single return slot, so the emitted calling
//! convention isolates activations itself: the callee's prologue pops the
//! return address into a frame register, a call site inside a function
//! pushes the enclosing activation's registers before the arguments and
//! pops them back after the result, and the epilogue stages the saved
//! return address through `func` into the return slot immediately before
//! `ret`. Calls at the top level save nothing; the program body is not
//! reentrant.

use thiserror::Error;

use rillc_par::{Ast, NodeId, NodeKind, Tag};
use rillc_util::{Env, Span, StringPool, Symbol};

use crate::chunk::{Chunk, LabelId, Opcode, Operand, Register, CELL_COUNT, HEAP_TOP};

/// Errors produced while lowering. All fatal.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("variable `{name}` was not previously declared")]
    UnknownIdentifier { name: String, span: Span },

    #[error("`{name}` is not a function")]
    NotAFunction { name: String, span: Span },

    #[error("can't {what} outside of a loop")]
    OutsideLoop { what: &'static str, span: Span },

    #[error("{what} must be an lvalue")]
    NotAnLvalue { what: &'static str, span: Span },

    #[error("can't index a temporary value")]
    IndexedTemporary { span: Span },

    #[error("`{name}` expects {expected} argument(s)")]
    BuiltinArity {
        name: &'static str,
        expected: usize,
        span: Span,
    },

    #[error("static allocation exhausted the {CELL_COUNT}-cell heap arena")]
    HeapOverflow { span: Span },
}

impl CompileError {
    /// Source location of the error.
    pub fn span(&self) -> Span {
        match self {
            CompileError::UnknownIdentifier { span, .. }
            | CompileError::NotAFunction { span, .. }
            | CompileError::OutsideLoop { span, .. }
            | CompileError::NotAnLvalue { span, .. }
            | CompileError::IndexedTemporary { span }
            | CompileError::BuiltinArity { span, .. }
            | CompileError::HeapOverflow { span } => *span,
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

/// Lower a type-checked program to a single chunk.
pub fn compile(ast: &Ast, pool: &StringPool) -> Result<Chunk> {
    Compiler::new(ast, pool).compile_program()
}

/// The lowering state.
pub struct Compiler<'a> {
    ast: &'a Ast,
    pool: &'a StringPool,
    env: Env<Operand>,

    reg_count: usize,
    label_count: usize,
    /// Next free heap cell; static allocations decrement this at compile
    /// time and the preamble is patched to the final value.
    heap_next: i64,

    /// First register of the function frame being compiled; `None` at the
    /// top level.
    frame_start: Option<usize>,

    in_loop: bool,
    break_label: Option<LabelId>,
    continue_label: Option<LabelId>,
    /// Instruction indices of `mov` placeholders awaiting a destination.
    back_patch: Vec<usize>,
    /// Pending placeholder count per enclosing loop.
    back_patch_counts: Vec<usize>,

    /// Completed function chunks, concatenated ahead of the main chunk.
    functions: Vec<Chunk>,
    /// Lazily allocated target of the `exit` builtin.
    halt_label: Option<LabelId>,
}

impl<'a> Compiler<'a> {
    /// Create a compiler for `ast`.
    pub fn new(ast: &'a Ast, pool: &'a StringPool) -> Self {
        Self {
            ast,
            pool,
            env: Env::new(),
            reg_count: 0,
            label_count: 0,
            heap_next: HEAP_TOP,
            frame_start: None,
            in_loop: false,
            break_label: None,
            continue_label: None,
            back_patch: Vec::new(),
            back_patch_counts: Vec::new(),
            functions: Vec::new(),
            halt_label: None,
        }
    }

    /// Compile the whole program.
    pub fn compile_program(mut self) -> Result<Chunk> {
        let mut preamble = Chunk::new();
        let heap = self.make_register();
        preamble
            .emit(Opcode::Mov, &[heap, Operand::Nothing])
            .with_comment("address of the next free heap cell");

        let main = self.make_label();
        let mut main_chunk = Chunk::new();
        main_chunk.add_label(main);

        let root_scope = self.env.root_scope();
        let result = self.compile_node(self.ast.root(), root_scope, &mut main_chunk)?;
        main_chunk.result = Some(result);
        if let Some(halt) = self.halt_label {
            main_chunk.add_label(halt);
        }

        // every static allocation is known now
        preamble.instructions[0].operands[1] = Operand::Imm(self.heap_next);
        preamble.emit(Opcode::Jmp, &[Operand::Lab(main)]);

        let mut out = preamble;
        for function in std::mem::take(&mut self.functions) {
            out = out + function;
        }
        Ok(out + main_chunk)
    }

    fn make_temporary(&mut self) -> Operand {
        let index = self.reg_count;
        self.reg_count += 1;
        Operand::Tmp(Register::num(index))
    }

    fn make_register(&mut self) -> Operand {
        let index = self.reg_count;
        self.reg_count += 1;
        Operand::Reg(Register::num(index))
    }

    fn make_label(&mut self) -> LabelId {
        let id = LabelId(self.label_count as u32);
        self.label_count += 1;
        id
    }

    fn halt(&mut self) -> LabelId {
        match self.halt_label {
            Some(label) => label,
            None => {
                let label = self.make_label();
                self.halt_label = Some(label);
                label
            }
        }
    }

    /// Convert an address-tagged operand into a plain value by loading
    /// through it. Everything else passes through unchanged.
    fn to_rvalue(&mut self, chunk: &mut Chunk, operand: Operand) -> Operand {
        if operand.has_addr() {
            let tmp = self.make_temporary();
            chunk
                .emit(Opcode::Load, &[tmp, Operand::Imm(0), operand])
                .with_comment("casting to rvalue");
            tmp
        } else {
            operand
        }
    }

    fn record_back_patch(&mut self, index: usize) {
        if let Some(count) = self.back_patch_counts.last_mut() {
            *count += 1;
        }
        self.back_patch.push(index);
    }

    /// Rewrite the destinations of this loop's placeholder `mov`s.
    fn back_patch_jumps(&mut self, chunk: &mut Chunk, dest: Operand) {
        let to_patch = self.back_patch_counts.pop().unwrap_or(0);
        for _ in 0..to_patch {
            let index = self.back_patch.pop().expect("back-patch stack underflow");
            chunk.instructions[index].operands[0] = dest;
        }
    }

    fn span(&self, id: NodeId) -> Span {
        self.ast.node(id).span
    }

    fn identifier(&self, id: NodeId) -> Symbol {
        match self.ast.node(id).kind {
            NodeKind::Id(sym) => sym,
            ref other => panic!("expected identifier node, got {other:?}"),
        }
    }

    fn compile_node(
        &mut self,
        id: NodeId,
        scope: rillc_util::ScopeId,
        chunk: &mut Chunk,
    ) -> Result<Operand> {
        let node = self.ast.node(id);
        match &node.kind {
            NodeKind::Num(n) => Ok(Operand::Imm(*n)),
            NodeKind::Char(c) => Ok(Operand::Imm(*c as i64)),
            NodeKind::True => Ok(Operand::Imm(1)),
            NodeKind::False => Ok(Operand::Imm(0)),
            NodeKind::Nil => Ok(Operand::Nothing),
            NodeKind::Empty => Ok(Operand::Nothing),
            NodeKind::Str(sym) => self.compile_string(*sym, id, chunk),
            NodeKind::Id(sym) => match self.env.find(scope, *sym) {
                Some(operand) => Ok(*operand),
                None => Err(CompileError::UnknownIdentifier {
                    name: self.pool.find(*sym).to_string(),
                    span: node.span,
                }),
            },
            NodeKind::Branch { tag, .. } => self.compile_branch(id, *tag, scope, chunk),
        }
    }

    fn compile_branch(
        &mut self,
        id: NodeId,
        tag: Tag,
        scope: rillc_util::ScopeId,
        chunk: &mut Chunk,
    ) -> Result<Operand> {
        match tag {
            Tag::Block => {
                let inner = self.env.create_child_scope(scope);
                let mut value = Operand::Nothing;
                for child in self.ast.children(id).to_vec() {
                    value = self.compile_node(child, inner, chunk)?;
                }
                Ok(value)
            }

            Tag::If => {
                let else_label = self.make_label();
                let done_label = self.make_label();
                let result = self.make_temporary();

                let cond = self.compile_node(self.ast.child(id, 0), scope, chunk)?;
                let cond = self.to_rvalue(chunk, cond);
                chunk
                    .emit(Opcode::JmpFalse, &[cond, Operand::Lab(else_label)])
                    .with_comment("if branch");

                let then_value = self.compile_node(self.ast.child(id, 1), scope, chunk)?;
                chunk.emit(Opcode::Mov, &[result, then_value]);
                chunk.emit(Opcode::Jmp, &[Operand::Lab(done_label)]);
                chunk.add_label(else_label);

                let else_value = self.compile_node(self.ast.child(id, 2), scope, chunk)?;
                chunk.emit(Opcode::Mov, &[result, else_value]);
                chunk.add_label(done_label);

                Ok(result)
            }

            Tag::When => {
                let skip_label = self.make_label();
                let result = self.make_temporary();

                let cond = self.compile_node(self.ast.child(id, 0), scope, chunk)?;
                let cond = self.to_rvalue(chunk, cond);
                chunk
                    .emit(Opcode::Mov, &[result, Operand::Nothing])
                    .with_comment("when conditional");
                chunk.emit(Opcode::JmpFalse, &[cond, Operand::Lab(skip_label)]);

                let then_value = self.compile_node(self.ast.child(id, 1), scope, chunk)?;
                chunk.emit(Opcode::Mov, &[result, then_value]);
                chunk.add_label(skip_label);

                Ok(result)
            }

            Tag::For => self.compile_for(id, scope, chunk),
            Tag::While => self.compile_while(id, scope, chunk),

            Tag::Break => {
                if !self.in_loop {
                    return Err(CompileError::OutsideLoop {
                        what: "break",
                        span: self.span(id),
                    });
                }
                let value = self.compile_node(self.ast.child(id, 0), scope, chunk)?;
                let value = self.to_rvalue(chunk, value);
                let placeholder = chunk.len();
                chunk.emit(Opcode::Mov, &[Operand::Nothing, value]);
                self.record_back_patch(placeholder);
                let target = self.break_label.expect("loop without break label");
                chunk
                    .emit(Opcode::Jmp, &[Operand::Lab(target)])
                    .with_comment("break out of loop");
                Ok(Operand::Nothing)
            }

            Tag::Continue => {
                if !self.in_loop {
                    return Err(CompileError::OutsideLoop {
                        what: "continue",
                        span: self.span(id),
                    });
                }
                let value = self.compile_node(self.ast.child(id, 0), scope, chunk)?;
                let value = self.to_rvalue(chunk, value);
                let placeholder = chunk.len();
                chunk.emit(Opcode::Mov, &[Operand::Nothing, value]);
                self.record_back_patch(placeholder);
                let target = self.continue_label.expect("loop without continue label");
                chunk
                    .emit(Opcode::Jmp, &[Operand::Lab(target)])
                    .with_comment("continue to next iteration of loop");
                Ok(Operand::Nothing)
            }

            Tag::Assign => {
                let lhs = self.ast.child(id, 0);
                let cell = self.compile_node(lhs, scope, chunk)?;
                if !cell.is_register() {
                    return Err(CompileError::NotAnLvalue {
                        what: "left-hand side of assignment",
                        span: self.span(lhs),
                    });
                }
                let value = self.compile_node(self.ast.child(id, 1), scope, chunk)?;
                let value = self.to_rvalue(chunk, value);
                if cell.has_addr() {
                    chunk
                        .emit(Opcode::Store, &[value, Operand::Imm(0), cell])
                        .with_comment("assigning through reference");
                } else {
                    chunk
                        .emit(Opcode::Mov, &[cell, value])
                        .with_comment("assigning to variable");
                }
                Ok(value)
            }

            Tag::Or => self.compile_binary(id, Opcode::Or, scope, chunk),
            Tag::And => self.compile_binary(id, Opcode::And, scope, chunk),
            Tag::Greater => self.compile_binary(id, Opcode::Greater, scope, chunk),
            Tag::Less => self.compile_binary(id, Opcode::Less, scope, chunk),
            Tag::GreaterEq => self.compile_binary(id, Opcode::GreaterEq, scope, chunk),
            Tag::LessEq => self.compile_binary(id, Opcode::LessEq, scope, chunk),
            Tag::Equal => self.compile_binary(id, Opcode::Eq, scope, chunk),
            Tag::Add => self.compile_binary(id, Opcode::Add, scope, chunk),
            Tag::Sub => self.compile_binary(id, Opcode::Sub, scope, chunk),
            Tag::Mul => self.compile_binary(id, Opcode::Mul, scope, chunk),
            Tag::Div => self.compile_binary(id, Opcode::Div, scope, chunk),
            Tag::Mod => self.compile_binary(id, Opcode::Mod, scope, chunk),

            Tag::Not => {
                let operand = self.compile_node(self.ast.child(id, 0), scope, chunk)?;
                let operand = self.to_rvalue(chunk, operand);
                let result = self.make_temporary();
                chunk.emit(Opcode::Not, &[result, operand]);
                Ok(result)
            }

            Tag::At => {
                let base_id = self.ast.child(id, 0);
                let base = self.compile_node(base_id, scope, chunk)?;
                let offset = self.compile_node(self.ast.child(id, 1), scope, chunk)?;
                let offset = self.to_rvalue(chunk, offset);

                if !base.is_register() {
                    return Err(CompileError::NotAnLvalue {
                        what: "indexed expression",
                        span: self.span(base_id),
                    });
                }
                if matches!(base, Operand::Tmp(_)) {
                    return Err(CompileError::IndexedTemporary {
                        span: self.span(base_id),
                    });
                }

                let tmp = self.make_temporary();
                chunk
                    .emit(Opcode::Add, &[tmp, base, offset])
                    .with_comment("accessing allocated array");
                match tmp {
                    Operand::Tmp(reg) => Ok(Operand::Tmp(Register::addr(reg.index))),
                    _ => unreachable!(),
                }
            }

            Tag::App => self.compile_app(id, scope, chunk),
            Tag::VarDecl => self.compile_var_decl(id, scope, chunk),
            Tag::FunDecl => self.compile_fun_decl(id, scope),

            Tag::Let => {
                let inner = self.env.create_child_scope(scope);
                for decl in self.ast.children(self.ast.child(id, 0)).to_vec() {
                    self.compile_node(decl, inner, chunk)?;
                }
                self.compile_node(self.ast.child(id, 1), inner, chunk)
            }

            Tag::Path => self.compile_node(self.ast.child(id, 0), scope, chunk),
            Tag::As => self.compile_node(self.ast.child(id, 0), scope, chunk),

            Tag::IntType | Tag::UintType | Tag::BoolType | Tag::NilType => {
                // type expressions never reach the compiler as values
                Ok(Operand::Nothing)
            }
        }
    }

    fn compile_binary(
        &mut self,
        id: NodeId,
        opcode: Opcode,
        scope: rillc_util::ScopeId,
        chunk: &mut Chunk,
    ) -> Result<Operand> {
        let left = self.compile_node(self.ast.child(id, 0), scope, chunk)?;
        let left = self.to_rvalue(chunk, left);
        let right = self.compile_node(self.ast.child(id, 1), scope, chunk)?;
        let right = self.to_rvalue(chunk, right);
        let result = self.make_temporary();
        chunk.emit(opcode, &[result, left, right]);
        Ok(result)
    }

    fn compile_string(&mut self, sym: Symbol, id: NodeId, chunk: &mut Chunk) -> Result<Operand> {
        // allocate len+1 cells downward and write each byte plus the
        // terminating zero; the operand is the base address
        let text = self.pool.find(sym).as_bytes().to_vec();
        let len = text.len() as i64;
        self.heap_next -= len + 1;
        if self.heap_next < 0 {
            return Err(CompileError::HeapOverflow {
                span: self.span(id),
            });
        }

        let buffer = match self.make_temporary() {
            Operand::Tmp(reg) => Operand::Tmp(Register::addr(reg.index)),
            _ => unreachable!(),
        };
        chunk
            .emit(Opcode::Mov, &[buffer, Operand::Imm(self.heap_next)])
            .with_comment("string literal buffer");
        for (i, byte) in text.iter().chain(std::iter::once(&0u8)).enumerate() {
            let cell = Operand::Reg(Register::num((self.heap_next as usize) + i));
            chunk.emit(Opcode::Mov, &[cell, Operand::Imm(*byte as i64)]);
        }
        Ok(buffer)
    }

    fn compile_for(
        &mut self,
        id: NodeId,
        scope: rillc_util::ScopeId,
        chunk: &mut Chunk,
    ) -> Result<Operand> {
        let decl_id = self.ast.child(id, 0);
        let upto_id = self.ast.child(id, 1);
        let step_id = self.ast.child(id, 2);
        let body_id = self.ast.child(id, 3);

        let begin_label = self.make_label();
        let continue_label = self.make_label();
        let break_label = self.make_label();
        let compare = self.make_temporary();

        let step = match self.ast.node(step_id).kind {
            NodeKind::Empty => Operand::Imm(1),
            _ => {
                let step = self.compile_node(step_id, scope, chunk)?;
                self.to_rvalue(chunk, step)
            }
        };

        let inner = self.env.create_child_scope(scope);
        let var = self.compile_node(decl_id, inner, chunk)?;
        if !var.is_register() {
            return Err(CompileError::NotAnLvalue {
                what: "`for` loop declaration",
                span: self.span(decl_id),
            });
        }
        let upto = self.compile_node(upto_id, inner, chunk)?;
        let upto = self.to_rvalue(chunk, upto);

        let saved = self.enter_loop(break_label, continue_label);

        chunk.add_label(begin_label);
        chunk.emit(Opcode::Eq, &[compare, var, upto]);
        chunk.emit(Opcode::JmpTrue, &[compare, Operand::Lab(break_label)]);

        let mut value = self.compile_node(body_id, inner, chunk)?;
        value = self.loop_result(chunk, value);

        chunk.add_label(continue_label);
        chunk.emit(Opcode::Add, &[var, var, step]);
        chunk.emit(Opcode::Jmp, &[Operand::Lab(begin_label)]);
        chunk.add_label(break_label);

        self.back_patch_jumps(chunk, value);
        self.exit_loop(saved);

        Ok(value)
    }

    fn compile_while(
        &mut self,
        id: NodeId,
        scope: rillc_util::ScopeId,
        chunk: &mut Chunk,
    ) -> Result<Operand> {
        let begin_label = self.make_label();
        let break_label = self.make_label();

        let saved = self.enter_loop(break_label, begin_label);

        chunk.add_label(begin_label);
        let cond = self.compile_node(self.ast.child(id, 0), scope, chunk)?;
        let cond = self.to_rvalue(chunk, cond);
        chunk.emit(Opcode::JmpFalse, &[cond, Operand::Lab(break_label)]);

        let value = self.compile_node(self.ast.child(id, 1), scope, chunk)?;
        let value = self.to_rvalue(chunk, value);
        let value = self.loop_result(chunk, value);

        chunk.emit(Opcode::Jmp, &[Operand::Lab(begin_label)]);
        chunk.add_label(break_label);

        self.back_patch_jumps(chunk, value);
        self.exit_loop(saved);

        Ok(value)
    }

    /// Break/continue placeholders need a register destination; when the
    /// body's value is an immediate, route it through a temporary.
    fn loop_result(&mut self, chunk: &mut Chunk, value: Operand) -> Operand {
        let pending = self.back_patch_counts.last().copied().unwrap_or(0);
        if pending == 0 || value.is_register() {
            return value;
        }
        let tmp = self.make_temporary();
        chunk.emit(Opcode::Mov, &[tmp, value]);
        tmp
    }

    fn enter_loop(
        &mut self,
        break_label: LabelId,
        continue_label: LabelId,
    ) -> (bool, Option<LabelId>, Option<LabelId>) {
        let saved = (self.in_loop, self.break_label, self.continue_label);
        self.in_loop = true;
        self.break_label = Some(break_label);
        self.continue_label = Some(continue_label);
        self.back_patch_counts.push(0);
        saved
    }

    fn exit_loop(&mut self, saved: (bool, Option<LabelId>, Option<LabelId>)) {
        (self.in_loop, self.break_label, self.continue_label) = saved;
    }

    fn compile_app(
        &mut self,
        id: NodeId,
        scope: rillc_util::ScopeId,
        chunk: &mut Chunk,
    ) -> Result<Operand> {
        let callee_id = self.ast.child(id, 0);
        let args_id = self.ast.child(id, 1);
        let callee = self.identifier(callee_id);

        let arg_ids = self.ast.children(args_id).to_vec();
        let mut args = Vec::with_capacity(arg_ids.len());
        for &arg_id in &arg_ids {
            let mut operand = self.compile_node(arg_id, scope, chunk)?;
            // element references (address-tagged temporaries) load their
            // value; a named address register is a whole array, whose
            // address is the value being passed
            if matches!(
                self.ast.node(arg_id).kind,
                NodeKind::Branch { tag: Tag::Path, .. }
            ) && matches!(operand, Operand::Tmp(_))
            {
                operand = self.to_rvalue(chunk, operand);
            }
            args.push(operand);
        }

        if let Some(result) = self.compile_builtin(id, callee, &args, chunk)? {
            return Ok(result);
        }

        let Some(&target) = self.env.find(scope, callee) else {
            return Err(CompileError::UnknownIdentifier {
                name: self.pool.find(callee).to_string(),
                span: self.span(callee_id),
            });
        };
        let Operand::Lab(label) = target else {
            return Err(CompileError::NotAFunction {
                name: self.pool.find(callee).to_string(),
                span: self.span(callee_id),
            });
        };

        // a recursive activation would overwrite this activation's
        // registers; inside a function, save every frame register
        // allocated so far around the call
        let frame: Vec<usize> = match self.frame_start {
            Some(start) => (start..self.reg_count).collect(),
            None => Vec::new(),
        };
        for (i, &index) in frame.iter().enumerate() {
            chunk.emit(Opcode::Push, &[Operand::Reg(Register::num(index))]);
            if i == 0 {
                chunk.with_comment("save live registers");
            }
        }

        // push arguments in reverse declaration order; the callee pops
        // them first-to-last
        for &arg in args.iter().rev() {
            chunk.emit(Opcode::Push, &[arg]);
        }
        chunk.emit(Opcode::Call, &[Operand::Lab(label)]);
        // the result register postdates the frame snapshot, so the
        // restores below leave it alone
        let result = self.make_temporary();
        chunk.emit(Opcode::Pop, &[result]);

        for (i, &index) in frame.iter().rev().enumerate() {
            chunk.emit(Opcode::Pop, &[Operand::Reg(Register::num(index))]);
            if i == 0 {
                chunk.with_comment("restore live registers");
            }
        }
        Ok(result)
    }

    /// Emit a builtin call directly, or return `None` for user functions.
    fn compile_builtin(
        &mut self,
        id: NodeId,
        callee: Symbol,
        args: &[Operand],
        chunk: &mut Chunk,
    ) -> Result<Option<Operand>> {
        let span = self.span(id);
        let arity = |name, expected| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(CompileError::BuiltinArity {
                    name,
                    expected,
                    span,
                })
            }
        };

        let result = match self.pool.find(callee) {
            "read_int" => {
                arity("read_int", 1)?;
                let tmp = self.make_temporary();
                chunk.emit(Opcode::Readv, &[tmp]);
                tmp
            }
            "read_char" => {
                arity("read_char", 1)?;
                let tmp = self.make_temporary();
                chunk.emit(Opcode::Readc, &[tmp]);
                tmp
            }
            "write_int" => {
                arity("write_int", 1)?;
                debug_assert!(!args[0].has_addr());
                chunk.emit(Opcode::Printv, &[args[0]]);
                Operand::Nothing
            }
            "write_char" => {
                arity("write_char", 1)?;
                debug_assert!(!args[0].has_addr());
                chunk.emit(Opcode::Printc, &[args[0]]);
                Operand::Nothing
            }
            "write_str" => {
                arity("write_str", 1)?;
                debug_assert!(args[0].has_addr());
                chunk.emit(Opcode::Printf, &[args[0]]);
                Operand::Nothing
            }
            "make_array" => {
                arity("make_array", 1)?;
                self.compile_make_array(args[0], span, chunk)?
            }
            "exit" => {
                arity("exit", 1)?;
                let halt = self.halt();
                chunk
                    .emit(Opcode::Jmp, &[Operand::Lab(halt)])
                    .with_comment("exit program");
                Operand::Nothing
            }
            _ => return Ok(None),
        };
        Ok(Some(result))
    }

    fn compile_make_array(
        &mut self,
        size: Operand,
        span: Span,
        chunk: &mut Chunk,
    ) -> Result<Operand> {
        let address = match self.make_register() {
            Operand::Reg(reg) => Operand::Reg(Register::addr(reg.index)),
            _ => unreachable!(),
        };
        if let Operand::Imm(n) = size {
            // constant size: carve the cells out at compile time
            self.heap_next -= n;
            if self.heap_next < 0 || n < 0 {
                return Err(CompileError::HeapOverflow { span });
            }
            chunk
                .emit(Opcode::Mov, &[address, Operand::Imm(self.heap_next)])
                .with_comment("static array");
        } else {
            let heap = Operand::Reg(Register::num(0));
            chunk.emit(Opcode::Sub, &[heap, heap, size]);
            chunk
                .emit(Opcode::Mov, &[address, heap])
                .with_comment("allocating array");
        }
        Ok(address)
    }

    fn compile_var_decl(
        &mut self,
        id: NodeId,
        scope: rillc_util::ScopeId,
        chunk: &mut Chunk,
    ) -> Result<Operand> {
        let name = self.identifier(self.ast.child(id, 0));
        let init = self.compile_node(self.ast.child(id, 2), scope, chunk)?;

        // an address-tagged initializer (array, string buffer) is bound
        // directly; its register becomes the variable
        if init.has_addr() {
            let reg = init.register().expect("address operand without register");
            let named = Operand::Reg(reg);
            self.env.insert(scope, name, named);
            return Ok(named);
        }

        let value = self.to_rvalue(chunk, init);
        let var = self.make_register();
        self.env.insert(scope, name, var);
        chunk
            .emit(Opcode::Mov, &[var, value])
            .with_comment("creating variable");
        Ok(var)
    }

    fn compile_fun_decl(&mut self, id: NodeId, scope: rillc_util::ScopeId) -> Result<Operand> {
        let name = self.identifier(self.ast.child(id, 0));
        let params_id = self.ast.child(id, 1);
        let body_id = self.ast.child(id, 3);

        let label = self.make_label();
        self.env.insert(scope, name, Operand::Lab(label));

        let saved_frame = self.frame_start;
        self.frame_start = Some(self.reg_count);

        let inner = self.env.create_child_scope(scope);
        let mut function = Chunk::new();
        function.add_label(label);

        // the return address lives in a frame register, saved and
        // restored by call sites like any other; nested calls are free to
        // clobber the return slot
        let ret = self.make_register();
        function
            .emit(Opcode::Pop, &[ret])
            .with_comment("return address");

        for &param_id in self.ast.children(params_id) {
            let param = self.identifier(param_id);
            let reg = self.make_register();
            function.emit(Opcode::Pop, &[reg]);
            self.env.insert(inner, param, reg);
        }

        let value = self.compile_node(body_id, inner, &mut function)?;

        // stage this activation's return address back into the slot
        function.emit(Opcode::Push, &[ret]);
        function.emit(Opcode::Func, &[]);
        function.emit(Opcode::Push, &[value]);
        function.emit(Opcode::Ret, &[]);

        self.functions.push(function);
        self.frame_start = saved_frame;
        Ok(Operand::Lab(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rillc_lex::tokenize;
    use rillc_par::parse;

    fn compile_str(source: &str) -> (Chunk, StringPool) {
        let mut pool = StringPool::new();
        let tokens = tokenize(source, &mut pool).expect("lex failure");
        let ast = parse(&tokens).expect("parse failure");
        let chunk = compile(&ast, &pool).expect("compile failure");
        (chunk, pool)
    }

    fn compile_err(source: &str) -> CompileError {
        let mut pool = StringPool::new();
        let tokens = tokenize(source, &mut pool).expect("lex failure");
        let ast = parse(&tokens).expect("parse failure");
        compile(&ast, &pool).unwrap_err()
    }

    fn opcodes(chunk: &Chunk) -> Vec<Opcode> {
        chunk.instructions.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn preamble_sets_heap_register_and_jumps() {
        let (chunk, _) = compile_str("write_int 42");
        assert_eq!(chunk.instructions[0].opcode, Opcode::Mov);
        assert_eq!(
            chunk.instructions[0].operands[0],
            Operand::Reg(Register::num(0))
        );
        assert_eq!(chunk.instructions[0].operands[1], Operand::Imm(HEAP_TOP));
        assert_eq!(chunk.instructions[1].opcode, Opcode::Jmp);
    }

    #[test]
    fn write_int_lowers_to_printv() {
        let (chunk, _) = compile_str("write_int 42");
        assert!(opcodes(&chunk).contains(&Opcode::Printv));
    }

    #[test]
    fn arithmetic_lowers_to_three_address_ops() {
        let (chunk, _) = compile_str("write_int (1 + 2 * 3)");
        let ops = opcodes(&chunk);
        assert!(ops.contains(&Opcode::Add));
        assert!(ops.contains(&Opcode::Mul));
    }

    #[test]
    fn if_lowers_to_conditional_jumps() {
        let (chunk, _) = compile_str("if true then 1 else 2");
        let ops = opcodes(&chunk);
        assert!(ops.contains(&Opcode::JmpFalse));
        assert!(ops.contains(&Opcode::Jmp));
        // both branches move into the same result temporary
        let movs: Vec<_> = chunk
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::Mov && i.operands[0].is_register())
            .map(|i| i.operands[0])
            .collect();
        assert!(movs.windows(2).any(|w| w[0] == w[1]));
    }

    #[test]
    fn string_literal_writes_bytes_and_sentinel() {
        let (chunk, _) = compile_str("write_str \"hi\"");
        let byte_movs: Vec<i64> = chunk
            .instructions
            .iter()
            .filter(|i| {
                i.opcode == Opcode::Mov
                    && matches!(i.operands[0], Operand::Reg(r) if r.index >= (HEAP_TOP as usize) - 3)
            })
            .filter_map(|i| match i.operands[1] {
                Operand::Imm(n) => Some(n),
                _ => None,
            })
            .collect();
        assert!(byte_movs.contains(&(b'h' as i64)));
        assert!(byte_movs.contains(&(b'i' as i64)));
        assert!(byte_movs.contains(&0));
    }

    #[test]
    fn static_array_carves_cells_at_compile_time() {
        let (chunk, _) = compile_str("let var y = make_array 3 in y[0]");
        let static_mov = chunk
            .instructions
            .iter()
            .find(|i| i.comment.as_deref() == Some("static array"))
            .expect("static array mov missing");
        assert_eq!(static_mov.operands[1], Operand::Imm(HEAP_TOP - 3));
    }

    #[test]
    fn dynamic_array_subtracts_from_heap_register() {
        let (chunk, _) = compile_str("let var n = 3 in let var y = make_array n in y[0]");
        let ops = opcodes(&chunk);
        assert!(ops.contains(&Opcode::Sub));
    }

    #[test]
    fn indexing_adds_base_and_offset() {
        let (chunk, _) = compile_str("let var y = make_array 3 in y[2]");
        let add = chunk
            .instructions
            .iter()
            .find(|i| i.opcode == Opcode::Add)
            .expect("address add missing");
        assert_eq!(add.operands[2], Operand::Imm(2));
    }

    #[test]
    fn assignment_through_array_stores() {
        let (chunk, _) = compile_str("let var y = make_array 3 in y[0] = 10");
        assert!(opcodes(&chunk).contains(&Opcode::Store));
    }

    #[test]
    fn assignment_to_variable_moves() {
        let (chunk, _) = compile_str("let var x = 1 in x = 2");
        let assigns: Vec<_> = chunk
            .instructions
            .iter()
            .filter(|i| i.comment.as_deref() == Some("assigning to variable"))
            .collect();
        assert_eq!(assigns.len(), 1);
    }

    #[test]
    fn function_declaration_prepends_callee_chunk() {
        let (chunk, _) = compile_str("let fun f x = x + 1 in write_int (f 3)");
        let ops = opcodes(&chunk);
        let func_at = ops.iter().position(|&op| op == Opcode::Func).unwrap();
        let call_at = ops.iter().position(|&op| op == Opcode::Call).unwrap();
        assert!(func_at < call_at, "callee must be defined before use");
        assert!(ops.contains(&Opcode::Ret));
        assert!(ops.contains(&Opcode::Push));
        assert!(ops.contains(&Opcode::Pop));
    }

    #[test]
    fn call_pushes_arguments_in_reverse_order() {
        let (chunk, _) = compile_str("let fun f a b = a - b in f 1 2");
        let pushes: Vec<Operand> = chunk
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::Push)
            .map(|i| i.operands[0])
            .collect();
        // the callee's `push result` plus the two reversed argument pushes
        assert!(pushes.contains(&Operand::Imm(2)));
        assert!(pushes.contains(&Operand::Imm(1)));
        let two_at = pushes.iter().position(|&p| p == Operand::Imm(2)).unwrap();
        let one_at = pushes.iter().position(|&p| p == Operand::Imm(1)).unwrap();
        assert!(two_at < one_at, "arguments push right-to-left");
    }

    #[test]
    fn recursive_call_saves_the_caller_frame() {
        let (chunk, _) = compile_str(
            "let fun fact n = if n == 0 then 1 else n * fact (n - 1) in write_int (fact 6)",
        );
        let comments: Vec<&str> = chunk
            .instructions
            .iter()
            .filter_map(|i| i.comment.as_deref())
            .collect();
        assert!(comments.contains(&"return address"));
        assert!(comments.contains(&"save live registers"));
        assert!(comments.contains(&"restore live registers"));
    }

    #[test]
    fn top_level_calls_save_nothing() {
        let (chunk, _) = compile_str("let fun f x = x + 1 in write_int (f 3)");
        let comments: Vec<&str> = chunk
            .instructions
            .iter()
            .filter_map(|i| i.comment.as_deref())
            .collect();
        assert!(!comments.contains(&"save live registers"));
    }

    #[test]
    fn epilogue_stages_return_address_before_ret() {
        let (chunk, _) = compile_str("let fun f x = x + 1 in write_int (f 3)");
        let ops = opcodes(&chunk);
        let func_at = ops.iter().position(|&op| op == Opcode::Func).unwrap();
        let ret_at = ops.iter().position(|&op| op == Opcode::Ret).unwrap();
        assert!(func_at < ret_at);
        // the instruction before `func` re-pushes the saved return address
        assert_eq!(chunk.instructions[func_at - 1].opcode, Opcode::Push);
    }

    #[test]
    fn for_loop_shape() {
        let (chunk, _) = compile_str("for var i from 0 to 3 then write_int i");
        let ops = opcodes(&chunk);
        assert!(ops.contains(&Opcode::Eq));
        assert!(ops.contains(&Opcode::JmpTrue));
        assert!(ops.contains(&Opcode::Add));
        assert!(ops.contains(&Opcode::Jmp));
    }

    #[test]
    fn while_loop_shape() {
        let (chunk, _) = compile_str("let var x = 0 in while x < 3 then x = x + 1");
        let ops = opcodes(&chunk);
        assert!(ops.contains(&Opcode::Less));
        assert!(ops.contains(&Opcode::JmpFalse));
    }

    #[test]
    fn break_outside_loop_fails() {
        assert!(matches!(
            compile_err("break 1"),
            CompileError::OutsideLoop { what: "break", .. }
        ));
    }

    #[test]
    fn continue_outside_loop_fails() {
        assert!(matches!(
            compile_err("continue 1"),
            CompileError::OutsideLoop {
                what: "continue",
                ..
            }
        ));
    }

    #[test]
    fn unknown_identifier_fails() {
        assert!(matches!(
            compile_err("ghost + 1"),
            CompileError::UnknownIdentifier { .. }
        ));
    }

    #[test]
    fn calling_a_variable_fails() {
        assert!(matches!(
            compile_err("let var x = 1 in x 2"),
            CompileError::NotAFunction { .. }
        ));
    }

    #[test]
    fn indexing_a_temporary_fails() {
        assert!(matches!(
            compile_err("let var y = make_array 2 in y[0][1]"),
            CompileError::IndexedTemporary { .. }
        ));
    }

    #[test]
    fn oversized_static_array_fails() {
        assert!(matches!(
            compile_err("make_array 5000"),
            CompileError::HeapOverflow { .. }
        ));
    }

    #[test]
    fn break_placeholder_is_backpatched() {
        let (chunk, _) = compile_str("let var x = 0 in while true then break x");
        // the placeholder mov destination must have been rewritten to a
        // real register
        for inst in &chunk.instructions {
            if inst.opcode == Opcode::Mov {
                assert_ne!(
                    (inst.operands[0], inst.operands[1]),
                    (Operand::Nothing, Operand::Nothing),
                    "unpatched placeholder mov"
                );
            }
        }
        let jump_comments: Vec<_> = chunk
            .instructions
            .iter()
            .filter_map(|i| i.comment.as_deref())
            .collect();
        assert!(jump_comments.contains(&"break out of loop"));
    }

    #[test]
    fn every_referenced_label_is_present() {
        let (chunk, _) =
            compile_str("let fun f x = if x > 0 then f (x - 1) else 0 in write_int (f 3)");
        for inst in &chunk.instructions {
            for op in inst.operands {
                if let Operand::Lab(label) = op {
                    assert!(
                        chunk.label_indexes.contains_key(&label),
                        "label {label:?} not in table"
                    );
                }
            }
        }
    }

    #[test]
    fn exit_jumps_to_trailing_halt_label() {
        let (chunk, _) = compile_str("do write_int 1; exit 0; write_int 2 end");
        let exit_jump = chunk
            .instructions
            .iter()
            .find(|i| i.comment.as_deref() == Some("exit program"))
            .expect("exit jump missing");
        let Operand::Lab(halt) = exit_jump.operands[0] else {
            panic!("exit jump has no label")
        };
        assert_eq!(chunk.label_indexes[&halt], chunk.len());
    }

    #[test]
    fn chunk_records_result_operand() {
        let (chunk, _) = compile_str("1 + 2");
        assert!(chunk.result.is_some());
    }
}
