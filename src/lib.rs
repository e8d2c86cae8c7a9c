//! rvm library.
//!
//! A register-based bytecode virtual machine with an assembler, a disassembler
//! and console traps.

pub mod utils;
pub mod virtual_machine;
