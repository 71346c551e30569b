//! The execution engine.

use std::io::{BufRead, Read, Write};

use thiserror::Error;

use rillc_lir::{Chunk, Opcode, Operand, CELL_COUNT};

/// Runtime failures. All abort execution.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("couldn't read input")]
    InputExhausted,

    #[error("couldn't parse `{0}` as an integer")]
    InputNotANumber(String),

    #[error("cell index {0} is out of bounds")]
    CellOutOfBounds(i64),

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow in division")]
    DivisionOverflow,

    #[error("label L{0:03} is not present in the chunk")]
    UnknownLabel(u32),

    #[error("operand {0} cannot be used here")]
    InvalidOperand(&'static str),

    #[error("pop from an empty operand stack")]
    StackUnderflow,
}

/// The machine: cells, operand stack, program counter and return slot.
///
/// Generic over its input and output streams so tests can drive it with
/// in-memory buffers.
pub struct Vm<R, W> {
    cells: Vec<i64>,
    stack: Vec<i64>,
    return_slot: usize,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Vm<R, W> {
    /// Create a machine with zeroed cells.
    pub fn new(input: R, output: W) -> Self {
        Self {
            cells: vec![0; CELL_COUNT],
            stack: Vec::new(),
            return_slot: 0,
            input,
            output,
        }
    }

    /// The cell array, for inspection after a run.
    pub fn cells(&self) -> &[i64] {
        &self.cells
    }

    /// The value an operand denotes in the current machine state, if any.
    pub fn operand_value(&self, operand: Operand) -> Option<i64> {
        match operand {
            Operand::Reg(reg) | Operand::Tmp(reg) => self.cells.get(reg.index).copied(),
            Operand::Imm(n) => Some(n),
            Operand::Nothing => Some(0),
            Operand::Lab(_) => None,
        }
    }

    fn cell_index(&self, raw: i64) -> Result<usize, VmError> {
        usize::try_from(raw)
            .ok()
            .filter(|&i| i < self.cells.len())
            .ok_or(VmError::CellOutOfBounds(raw))
    }

    /// Fetch the integer value of an operand.
    fn fetch(&self, operand: Operand) -> Result<i64, VmError> {
        match operand {
            Operand::Reg(reg) | Operand::Tmp(reg) => {
                self.cells.get(reg.index).copied().ok_or_else(|| {
                    VmError::CellOutOfBounds(reg.index as i64)
                })
            }
            Operand::Imm(n) => Ok(n),
            Operand::Nothing => Ok(0),
            Operand::Lab(_) => Err(VmError::InvalidOperand("label")),
        }
    }

    /// The mutable cell an operand names; valid only for registers.
    fn deref(&mut self, operand: Operand) -> Result<&mut i64, VmError> {
        match operand {
            Operand::Reg(reg) | Operand::Tmp(reg) => self
                .cells
                .get_mut(reg.index)
                .ok_or(VmError::CellOutOfBounds(reg.index as i64)),
            Operand::Imm(_) => Err(VmError::InvalidOperand("immediate")),
            Operand::Nothing => Err(VmError::InvalidOperand("nothing")),
            Operand::Lab(_) => Err(VmError::InvalidOperand("label")),
        }
    }

    fn label_target(chunk: &Chunk, operand: Operand) -> Result<usize, VmError> {
        let Operand::Lab(label) = operand else {
            return Err(VmError::InvalidOperand("non-label jump target"));
        };
        chunk
            .label_indexes
            .get(&label)
            .copied()
            .ok_or(VmError::UnknownLabel(label.0))
    }

    fn read_int(&mut self) -> Result<i64, VmError> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(VmError::InputExhausted);
        }
        let trimmed = line.trim();
        trimmed
            .parse::<i64>()
            .map_err(|_| VmError::InputNotANumber(trimmed.to_string()))
    }

    fn read_char(&mut self) -> Result<i64, VmError> {
        let mut byte = [0u8; 1];
        match self.input.read(&mut byte)? {
            0 => Ok(-1),
            _ => Ok(byte[0] as i64),
        }
    }

    /// Execute `chunk` from its first instruction to the end.
    pub fn run(&mut self, chunk: &Chunk) -> Result<(), VmError> {
        let code = &chunk.instructions;
        let mut pc = 0usize;

        while pc < code.len() {
            let inst = &code[pc];
            let ops = inst.operands;
            match inst.opcode {
                Opcode::Printf => {
                    let base = self.fetch(ops[0])?;
                    let mut offset = 0i64;
                    loop {
                        let cell = self.cell_index(base.wrapping_add(offset))?;
                        let value = self.cells[cell];
                        if value == 0 {
                            break;
                        }
                        self.output.write_all(&[value as u8])?;
                        offset += 1;
                    }
                }
                Opcode::Printv => {
                    let value = self.fetch(ops[0])?;
                    write!(self.output, "{value}")?;
                }
                Opcode::Printc => {
                    let value = self.fetch(ops[0])?;
                    self.output.write_all(&[value as u8])?;
                }
                Opcode::Readv => {
                    let value = self.read_int()?;
                    *self.deref(ops[0])? = value;
                }
                Opcode::Readc => {
                    let value = self.read_char()?;
                    *self.deref(ops[0])? = value;
                }
                Opcode::Mov => {
                    let value = self.fetch(ops[1])?;
                    *self.deref(ops[0])? = value;
                }
                Opcode::Add => self.binary(ops, i64::wrapping_add)?,
                Opcode::Sub => self.binary(ops, i64::wrapping_sub)?,
                Opcode::Mul => self.binary(ops, i64::wrapping_mul)?,
                Opcode::Div => self.division(ops, i64::checked_div)?,
                Opcode::Mod => self.division(ops, i64::checked_rem)?,
                Opcode::Or => self.binary(ops, |a, b| (a != 0 || b != 0) as i64)?,
                Opcode::And => self.binary(ops, |a, b| (a != 0 && b != 0) as i64)?,
                Opcode::Eq => self.binary(ops, |a, b| (a == b) as i64)?,
                Opcode::Diff => self.binary(ops, |a, b| (a != b) as i64)?,
                Opcode::Less => self.binary(ops, |a, b| (a < b) as i64)?,
                Opcode::LessEq => self.binary(ops, |a, b| (a <= b) as i64)?,
                Opcode::Greater => self.binary(ops, |a, b| (a > b) as i64)?,
                Opcode::GreaterEq => self.binary(ops, |a, b| (a >= b) as i64)?,
                Opcode::Not => {
                    let value = self.fetch(ops[1])?;
                    *self.deref(ops[0])? = (value == 0) as i64;
                }
                Opcode::Load => {
                    let address = self.fetch(ops[2])?.wrapping_add(self.fetch(ops[1])?);
                    let cell = self.cell_index(address)?;
                    let value = self.cells[cell];
                    *self.deref(ops[0])? = value;
                }
                Opcode::Store => {
                    let address = self.fetch(ops[2])?.wrapping_add(self.fetch(ops[1])?);
                    let cell = self.cell_index(address)?;
                    self.cells[cell] = self.fetch(ops[0])?;
                }
                Opcode::Jmp => {
                    pc = Self::label_target(chunk, ops[0])?;
                    continue;
                }
                Opcode::JmpFalse => {
                    if self.fetch(ops[0])? == 0 {
                        pc = Self::label_target(chunk, ops[1])?;
                        continue;
                    }
                }
                Opcode::JmpTrue => {
                    if self.fetch(ops[0])? != 0 {
                        pc = Self::label_target(chunk, ops[1])?;
                        continue;
                    }
                }
                Opcode::Push => {
                    let value = self.fetch(ops[0])?;
                    self.stack.push(value);
                }
                Opcode::Pop => {
                    let value = self.stack.pop().ok_or(VmError::StackUnderflow)?;
                    *self.deref(ops[0])? = value;
                }
                Opcode::Call => {
                    // save the caller's pc; the callee pops it into a
                    // register and stages it through `func` before `ret`
                    self.stack.push(pc as i64);
                    pc = Self::label_target(chunk, ops[0])?;
                    continue;
                }
                Opcode::Func => {
                    let saved = self.stack.pop().ok_or(VmError::StackUnderflow)?;
                    self.return_slot = saved as usize;
                }
                Opcode::Ret => {
                    pc = self.return_slot;
                    // falls through to the increment, resuming after the call
                }
            }
            pc += 1;
        }
        Ok(())
    }

    fn binary(
        &mut self,
        ops: [Operand; 3],
        f: impl Fn(i64, i64) -> i64,
    ) -> Result<(), VmError> {
        let a = self.fetch(ops[1])?;
        let b = self.fetch(ops[2])?;
        *self.deref(ops[0])? = f(a, b);
        Ok(())
    }

    fn division(
        &mut self,
        ops: [Operand; 3],
        f: impl Fn(i64, i64) -> Option<i64>,
    ) -> Result<(), VmError> {
        let a = self.fetch(ops[1])?;
        let b = self.fetch(ops[2])?;
        if b == 0 {
            return Err(VmError::DivisionByZero);
        }
        *self.deref(ops[0])? = f(a, b).ok_or(VmError::DivisionOverflow)?;
        Ok(())
    }
}
