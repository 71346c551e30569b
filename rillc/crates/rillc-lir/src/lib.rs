//! rillc-lir - The low-level intermediate representation and its compiler.
//!
//! LIR is a three-address register/stack bytecode executed by `rillc-vm`.
//! A [`Chunk`] is a flat instruction sequence plus a table resolving
//! [`LabelId`]s to instruction indices; chunks concatenate with `+`, which
//! shifts the right-hand side's label indices.
//!
//! [`lower::Compiler`] lowers a type-checked AST into a chunk: registers
//! are allocated densely, the 2048-cell heap arena grows downward from the
//! top, and `break`/`continue` result moves are back-patched when the
//! enclosing loop closes.

pub mod chunk;
pub mod lower;
pub mod print;

pub use chunk::{
    Chunk, Instruction, LabelId, Opcode, Operand, RegKind, Register, CELL_COUNT, HEAP_TOP,
};
pub use lower::{compile, CompileError, Compiler};
pub use print::write_chunk;
