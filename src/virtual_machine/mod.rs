//! Register-based bytecode virtual machine.
//!
//! The VM executes raw bytecode images produced by the assembler.
//!
//! # Architecture
//!
//! - **Registers**: 8 general purpose 64-bit registers (`R0`..`R7`), all zero at start
//! - **Memory**: flat, byte-addressable, fixed capacity; the program is loaded at 0
//! - **Instruction format**: 1-byte opcode followed by fixed-width operands
//! - **Execution model**: fetch/decode/execute until HALT, end of code or a fault
//! - **I/O**: `PRINT` and the `TRAP` console calls (PUTC, GETC)
//!
//! # Modules
//!
//! - [`assembler`]: Assembly parsing, diagnostics, and bytecode generation
//! - [`errors`]: Load, assembly and execution error types
//! - [`isa`]: Instruction catalog and opcode mappings
//! - [`operand`]: Operand layouts and values
//! - [`program`]: Program loading, hex dumps and disassembly
//! - [`trap`]: Trap numbers and the console abstraction
//! - [`vm`]: Core virtual machine implementation

pub mod assembler;
pub mod errors;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod operand;
pub mod program;
mod terminal;
pub mod trap;
pub mod vm;
