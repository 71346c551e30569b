//! Textual form of a chunk.
//!
//! One instruction per line, indented four spaces; labels print as
//! `L<ddd>:` at column zero. Registers print as `%<n>`, labels as
//! `L<ddd>`, immediates in decimal, `Nothing` as `0`. Loads and stores use
//! base+offset syntax: `load %dst, off(base)`. Comments align in a `; `
//! column after the widest instruction seen so far.

use std::fmt::Write as _;
use std::io::{self, Write};

use crate::chunk::{Chunk, Instruction, Opcode, Operand};

fn operand_repr(op: Operand) -> String {
    match op {
        Operand::Nothing => "0".to_string(),
        Operand::Reg(reg) | Operand::Tmp(reg) => format!("%{}", reg.index),
        Operand::Lab(label) => format!("L{:03}", label.0),
        Operand::Imm(n) => n.to_string(),
    }
}

fn instruction_repr(inst: &Instruction) -> String {
    let mut line = String::from("    ");
    line.push_str(inst.opcode.mnemonic());
    if matches!(inst.opcode, Opcode::Load | Opcode::Store) {
        // load %dst, off(base) / store %val, off(base)
        let _ = write!(
            line,
            " {}, {}({})",
            operand_repr(inst.operands[0]),
            operand_repr(inst.operands[1]),
            operand_repr(inst.operands[2]),
        );
        return line;
    }
    for i in 0..inst.opcode.operand_count() {
        let sep = if i == 0 { " " } else { ", " };
        let _ = write!(line, "{}{}", sep, operand_repr(inst.operands[i]));
    }
    line
}

/// Write the chunk's textual form.
pub fn write_chunk(chunk: &Chunk, out: &mut dyn Write) -> io::Result<()> {
    let mut widest = 0usize;
    for (index, inst) in chunk.instructions.iter().enumerate() {
        for (label, &at) in &chunk.label_indexes {
            if at == index {
                writeln!(out, "L{:03}:", label.0)?;
            }
        }
        let line = instruction_repr(inst);
        widest = widest.max(line.len());
        match &inst.comment {
            Some(comment) => {
                writeln!(out, "{line}{} ; {comment}", " ".repeat(widest - line.len()))?
            }
            None => writeln!(out, "{line}")?,
        }
    }
    // labels pointing one past the last instruction
    for (label, &at) in &chunk.label_indexes {
        if at == chunk.instructions.len() {
            writeln!(out, "L{:03}:", label.0)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{LabelId, Register};

    fn render(chunk: &Chunk) -> String {
        let mut buf = Vec::new();
        write_chunk(chunk, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn plain_instruction_format() {
        let mut chunk = Chunk::new();
        chunk.emit(
            Opcode::Add,
            &[
                Operand::Tmp(Register::num(2)),
                Operand::Reg(Register::num(0)),
                Operand::Imm(7),
            ],
        );
        assert_eq!(render(&chunk), "    add %2, %0, 7\n");
    }

    #[test]
    fn load_uses_indirect_syntax() {
        let mut chunk = Chunk::new();
        chunk.emit(
            Opcode::Load,
            &[
                Operand::Tmp(Register::num(1)),
                Operand::Imm(0),
                Operand::Reg(Register::addr(4)),
            ],
        );
        assert_eq!(render(&chunk), "    load %1, 0(%4)\n");
    }

    #[test]
    fn store_uses_indirect_syntax() {
        let mut chunk = Chunk::new();
        chunk.emit(
            Opcode::Store,
            &[
                Operand::Imm(9),
                Operand::Imm(2),
                Operand::Reg(Register::addr(3)),
            ],
        );
        assert_eq!(render(&chunk), "    store 9, 2(%3)\n");
    }

    #[test]
    fn labels_print_at_column_zero() {
        let mut chunk = Chunk::new();
        let label = LabelId(2);
        chunk.add_label(label);
        chunk.emit(Opcode::Jmp, &[Operand::Lab(label)]);
        assert_eq!(render(&chunk), "L002:\n    jump L002\n");
    }

    #[test]
    fn trailing_label_prints() {
        let mut chunk = Chunk::new();
        let label = LabelId(0);
        chunk.emit(Opcode::Ret, &[]);
        chunk.add_label(label);
        assert_eq!(render(&chunk), "    ret\nL000:\n");
    }

    #[test]
    fn comments_align_after_instruction() {
        let mut chunk = Chunk::new();
        chunk
            .emit(Opcode::Mov, &[Operand::Reg(Register::num(0)), Operand::Imm(1)])
            .with_comment("creating variable");
        let text = render(&chunk);
        assert_eq!(text, "    mov %0, 1 ; creating variable\n");
    }

    #[test]
    fn nothing_prints_as_zero() {
        let mut chunk = Chunk::new();
        chunk.emit(Opcode::Printv, &[Operand::Nothing]);
        assert_eq!(render(&chunk), "    printv 0\n");
    }
}
