//! rillc-vm - The bytecode virtual machine.
//!
//! A stack+register machine over 2048 cells of 64-bit signed integers.
//! The VM does not validate types; it trusts the LIR compiler. It does
//! bounds-check every cell access and traps on division by zero and on
//! unparsable input, aborting with a diagnostic instead of corrupting
//! state.

pub mod vm;

pub use vm::{Vm, VmError};
