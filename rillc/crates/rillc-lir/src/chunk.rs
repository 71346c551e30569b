//! Instructions, operands and the chunk container.

use std::ops::Add;

use indexmap::IndexMap;

use rillc_util::define_idx;

/// Size of the VM cell array.
pub const CELL_COUNT: usize = 2048;

/// Address of the top heap cell; the arena grows downward from here.
pub const HEAP_TOP: i64 = (CELL_COUNT - 1) as i64;

define_idx!(LabelId);

/// LIR opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Printf,
    Printv,
    Printc,
    Readv,
    Readc,
    Mov,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Not,
    Or,
    And,
    Eq,
    Diff,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Load,
    Store,
    Jmp,
    JmpFalse,
    JmpTrue,
    Push,
    Pop,
    Call,
    Ret,
    Func,
}

impl Opcode {
    /// Number of operands the opcode carries.
    pub fn operand_count(self) -> usize {
        match self {
            Opcode::Ret | Opcode::Func => 0,
            Opcode::Printf
            | Opcode::Printv
            | Opcode::Printc
            | Opcode::Readv
            | Opcode::Readc
            | Opcode::Jmp
            | Opcode::Push
            | Opcode::Pop
            | Opcode::Call => 1,
            Opcode::Mov | Opcode::Not | Opcode::JmpFalse | Opcode::JmpTrue => 2,
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Or
            | Opcode::And
            | Opcode::Eq
            | Opcode::Diff
            | Opcode::Less
            | Opcode::LessEq
            | Opcode::Greater
            | Opcode::GreaterEq
            | Opcode::Load
            | Opcode::Store => 3,
        }
    }

    /// Textual mnemonic used by the pretty printer.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Printf => "printf",
            Opcode::Printv => "printv",
            Opcode::Printc => "printc",
            Opcode::Readv => "readv",
            Opcode::Readc => "readc",
            Opcode::Mov => "mov",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mult",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::Not => "not",
            Opcode::Or => "or",
            Opcode::And => "and",
            Opcode::Eq => "equal",
            Opcode::Diff => "diff",
            Opcode::Less => "less",
            Opcode::LessEq => "lesseq",
            Opcode::Greater => "greater",
            Opcode::GreaterEq => "greatereq",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Jmp => "jump",
            Opcode::JmpFalse => "jf",
            Opcode::JmpTrue => "jt",
            Opcode::Push => "push",
            Opcode::Pop => "pop",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Func => "func",
        }
    }
}

/// What a register holds, from the compiler's point of view.
///
/// The VM treats all cells uniformly as 64-bit integers; the tag exists so
/// the compiler can track which operands are l-value addresses and which
/// are plain numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegKind {
    /// Holds a plain number.
    Num,
    /// Holds the address of a cell.
    Addr,
}

/// A virtual register: a cell index plus the compiler's kind tag.
///
/// Indices are dense and monotonically allocated during compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Register {
    pub index: usize,
    pub kind: RegKind,
}

impl Register {
    /// A number-holding register.
    pub fn num(index: usize) -> Self {
        Self {
            index,
            kind: RegKind::Num,
        }
    }

    /// An address-holding register.
    pub fn addr(index: usize) -> Self {
        Self {
            index,
            kind: RegKind::Addr,
        }
    }

    /// Returns true if the register is address-tagged.
    pub fn has_addr(self) -> bool {
        self.kind == RegKind::Addr
    }
}

/// An instruction operand.
///
/// `Tmp` is a register holding an intermediate value; the distinction from
/// `Reg` (a named variable's register) matters only to the compiler, which
/// refuses to index a temporary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Operand {
    /// Absent operand; fetches as zero.
    #[default]
    Nothing,
    /// A named variable's register.
    Reg(Register),
    /// A compiler temporary.
    Tmp(Register),
    /// A label.
    Lab(LabelId),
    /// An immediate number.
    Imm(i64),
}

impl Operand {
    /// Returns true for `Reg` and `Tmp` operands.
    pub fn is_register(self) -> bool {
        matches!(self, Operand::Reg(_) | Operand::Tmp(_))
    }

    /// The underlying register of a `Reg`/`Tmp` operand.
    pub fn register(self) -> Option<Register> {
        match self {
            Operand::Reg(reg) | Operand::Tmp(reg) => Some(reg),
            _ => None,
        }
    }

    /// Returns true for an address-tagged register operand.
    pub fn has_addr(self) -> bool {
        self.register().map_or(false, Register::has_addr)
    }
}

/// A single instruction: opcode, up to three operands, optional comment.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: [Operand; 3],
    pub comment: Option<String>,
}

/// An instruction sequence plus its label table.
///
/// `result` records the operand holding the value of the program's
/// top-level expression, so the REPL can echo it after a run.
#[derive(Clone, Debug, Default)]
pub struct Chunk {
    pub instructions: Vec<Instruction>,
    /// Maps each label to the instruction index it points at.
    pub label_indexes: IndexMap<LabelId, usize>,
    pub result: Option<Operand>,
}

impl Chunk {
    /// Create an empty chunk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction. Missing operands default to `Nothing`.
    pub fn emit(&mut self, opcode: Opcode, operands: &[Operand]) -> &mut Self {
        debug_assert!(operands.len() <= 3);
        let mut fixed = [Operand::Nothing; 3];
        fixed[..operands.len()].copy_from_slice(operands);
        self.instructions.push(Instruction {
            opcode,
            operands: fixed,
            comment: None,
        });
        self
    }

    /// Attach a comment to the most recently emitted instruction.
    pub fn with_comment(&mut self, comment: impl Into<String>) -> &mut Self {
        if let Some(last) = self.instructions.last_mut() {
            last.comment = Some(comment.into());
        }
        self
    }

    /// Point `label` at the next instruction to be emitted.
    pub fn add_label(&mut self, label: LabelId) {
        self.label_indexes.insert(label, self.instructions.len());
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if no instruction has been emitted.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Concatenation. The right side's label indices shift by the left side's
/// length; the result operand is the right side's.
impl Add for Chunk {
    type Output = Chunk;

    fn add(self, other: Chunk) -> Chunk {
        let shift = self.instructions.len();
        let mut out = self;
        out.instructions.extend(other.instructions);
        for (label, index) in other.label_indexes {
            out.label_indexes.insert(label, index + shift);
        }
        out.result = other.result;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(i: usize) -> Operand {
        Operand::Reg(Register::num(i))
    }

    #[test]
    fn emit_pads_missing_operands() {
        let mut chunk = Chunk::new();
        chunk.emit(Opcode::Ret, &[]);
        chunk.emit(Opcode::Push, &[reg(0)]);
        assert_eq!(chunk.instructions[0].operands, [Operand::Nothing; 3]);
        assert_eq!(chunk.instructions[1].operands[1], Operand::Nothing);
    }

    #[test]
    fn with_comment_attaches_to_last() {
        let mut chunk = Chunk::new();
        chunk
            .emit(Opcode::Mov, &[reg(0), Operand::Imm(1)])
            .with_comment("init");
        assert_eq!(chunk.instructions[0].comment.as_deref(), Some("init"));
    }

    #[test]
    fn labels_point_at_next_instruction() {
        let mut chunk = Chunk::new();
        chunk.emit(Opcode::Mov, &[reg(0), Operand::Imm(1)]);
        let label = LabelId(0);
        chunk.add_label(label);
        chunk.emit(Opcode::Ret, &[]);
        assert_eq!(chunk.label_indexes[&label], 1);
    }

    #[test]
    fn concat_shifts_right_side_labels() {
        let mut a = Chunk::new();
        let la = LabelId(0);
        a.add_label(la);
        a.emit(Opcode::Mov, &[reg(0), Operand::Imm(1)]);
        a.emit(Opcode::Mov, &[reg(1), Operand::Imm(2)]);

        let mut b = Chunk::new();
        let lb = LabelId(1);
        b.emit(Opcode::Ret, &[]);
        b.add_label(lb);

        let joined = a.clone() + b.clone();
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.label_indexes[&la], a.label_indexes[&la]);
        assert_eq!(joined.label_indexes[&lb], b.label_indexes[&lb] + a.len());
    }

    #[test]
    fn concat_keeps_instruction_order() {
        let mut a = Chunk::new();
        a.emit(Opcode::Push, &[Operand::Imm(1)]);
        let mut b = Chunk::new();
        b.emit(Opcode::Pop, &[reg(0)]);

        let joined = a + b;
        assert_eq!(joined.instructions[0].opcode, Opcode::Push);
        assert_eq!(joined.instructions[1].opcode, Opcode::Pop);
    }

    #[test]
    fn concat_takes_right_result() {
        let mut a = Chunk::new();
        a.result = Some(reg(0));
        let mut b = Chunk::new();
        b.result = Some(reg(7));
        assert_eq!((a + b).result, Some(reg(7)));
    }

    #[test]
    fn operand_register_tags() {
        assert!(Operand::Reg(Register::addr(3)).has_addr());
        assert!(!Operand::Tmp(Register::num(3)).has_addr());
        assert!(!Operand::Imm(3).is_register());
        assert!(Operand::Tmp(Register::num(1)).is_register());
    }

    mod concat_properties {
        use super::*;
        use proptest::prelude::*;

        /// A chunk of `len` no-op movs with labels at the given positions.
        fn chunk_with_labels(len: usize, first_label: u32, at: &[usize]) -> Chunk {
            let mut chunk = Chunk::new();
            for _ in 0..len {
                chunk.emit(Opcode::Mov, &[reg(0), Operand::Imm(0)]);
            }
            for (i, &index) in at.iter().enumerate() {
                chunk
                    .label_indexes
                    .insert(LabelId(first_label + i as u32), index.min(len));
            }
            chunk
        }

        proptest! {
            // (A ++ B).labels[L] == A.labels[L] if L in A,
            // else B.labels[L] + |A|
            #[test]
            fn concat_resolves_all_labels(
                len_a in 0usize..12,
                len_b in 0usize..12,
                at_a in proptest::collection::vec(0usize..12, 0..4),
                at_b in proptest::collection::vec(0usize..12, 0..4),
            ) {
                let a = chunk_with_labels(len_a, 0, &at_a);
                let b = chunk_with_labels(len_b, 100, &at_b);
                let joined = a.clone() + b.clone();

                prop_assert_eq!(joined.len(), a.len() + b.len());
                for (label, &index) in &a.label_indexes {
                    prop_assert_eq!(joined.label_indexes[label], index);
                }
                for (label, &index) in &b.label_indexes {
                    prop_assert_eq!(joined.label_indexes[label], index + a.len());
                }
            }
        }
    }
}
