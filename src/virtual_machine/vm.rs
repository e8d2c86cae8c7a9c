//! Core virtual machine implementation.
//!
//! The VM executes bytecode using a register-based architecture with 8 general-purpose
//! 64-bit registers and a flat, bounds-checked memory. Arithmetic wraps modulo 2^64.
//!
//! Execution is a small state machine: [`Status::Running`] until either
//! [`Status::Halted`] (HALT or end of code) or [`Status::Faulted`]. Both are
//! terminal. Operand decoding and handler dispatch are generated from the
//! instruction catalog, so the bounds check performed before decoding always
//! matches what the handler consumes.

mod memory;
mod registers;

use crate::for_each_instruction;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{REGISTER_COUNT, WORD_SIZE, register_index};
use crate::virtual_machine::trap::{self, Console};
use crate::{error, trace};
use memory::Memory;
use registers::Registers;

/// Memory capacity used when none is configured.
pub const DEFAULT_MEMORY_SIZE: usize = 0xFFFF;

/// Construction parameters for a [`VM`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Total memory in bytes. Must be at least the program size.
    pub memory_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }
}

/// Execution state of a [`VM`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// More instructions may execute.
    Running,
    /// Stopped cleanly by HALT or by reaching the end of the code.
    Halted,
    /// Stopped by a fault; see [`VM::fault`].
    Faulted,
}

impl Status {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Status::Running)
    }
}

macro_rules! define_dispatch {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal [ $( $alias:literal ),* $(,)? ] => [
                $( $field:ident : $kind:ident ),* $(,)?
            ], $handler:ident
        ),* $(,)?
    ) => {
        impl VM {
            /// Decodes the operands of `instr` at the program counter and runs its handler.
            ///
            /// The caller has already verified that all operand bytes are in memory.
            fn exec<C: Console>(&mut self, instr: Instruction, console: &mut C) -> Result<(), VMError> {
                match instr {
                    $(
                        Instruction::$name => {
                            $( let $field = define_dispatch!(@read self, $kind)?; )*
                            self.$handler(console, $( $field ),*)
                        }
                    ),*
                }
            }
        }
    };

    // Decode a register index (1 byte, masked)
    (@read $vm:ident, Reg) => {{
        $vm.fetch_reg()
    }};

    // Decode an address/immediate word (little-endian, 8 bytes)
    (@read $vm:ident, Word) => {{
        $vm.fetch_word()
    }};
}

/// Bytecode virtual machine.
///
/// Owns its registers and memory for the whole run. Built once from a program
/// image, driven with [`VM::step`] or [`VM::run`], then discarded.
pub struct VM {
    /// Code and data memory.
    memory: Memory,
    /// Register file (8 registers).
    registers: Registers,
    /// Program counter (byte offset into memory).
    pc: usize,
    /// Offset of the opcode currently executing, for fault reporting.
    instr_offset: usize,
    /// Length of the loaded program image.
    code_size: usize,
    status: Status,
    fault: Option<VMError>,
    /// Number of instructions dispatched so far.
    steps: u64,
}

for_each_instruction!(define_dispatch);

impl VM {
    /// Creates a VM with `code` loaded at address 0 and `memory_size` bytes of memory.
    ///
    /// Fails with [`VMError::ProgramTooLarge`] if the code does not fit.
    pub fn new(code: &[u8], memory_size: usize) -> Result<Self, VMError> {
        Ok(Self {
            memory: Memory::new(code, memory_size)?,
            registers: Registers::new(),
            pc: 0,
            instr_offset: 0,
            code_size: code.len(),
            status: Status::Running,
            fault: None,
            steps: 0,
        })
    }

    /// Creates a VM from a [`VmConfig`].
    pub fn with_config(code: &[u8], config: &VmConfig) -> Result<Self, VMError> {
        Self::new(code, config.memory_size)
    }

    /// Executes instructions until the VM halts or faults.
    ///
    /// Returns the fault if the run ended in [`Status::Faulted`]. There is no
    /// instruction limit; use [`VM::run_for`] to bound execution.
    pub fn run<C: Console>(&mut self, console: &mut C) -> Result<(), VMError> {
        while self.status == Status::Running {
            self.step(console);
        }
        match &self.fault {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    /// Executes at most `max_steps` steps and returns the resulting status.
    pub fn run_for<C: Console>(&mut self, console: &mut C, max_steps: u64) -> Status {
        let mut remaining = max_steps;
        while self.status == Status::Running && remaining > 0 {
            self.step(console);
            remaining -= 1;
        }
        self.status
    }

    /// Executes a single instruction.
    ///
    /// On a fault the program counter is left at the faulting instruction.
    /// Does nothing once the VM is halted or faulted. Only blocks while a GETC
    /// trap waits for input.
    pub fn step<C: Console>(&mut self, console: &mut C) -> Status {
        if self.status.is_terminal() {
            return self.status;
        }

        match self.execute_next(console) {
            Ok(status) => self.status = status,
            Err(fault) => {
                error!("{fault}");
                self.pc = self.instr_offset;
                self.fault = Some(fault);
                self.status = Status::Faulted;
            }
        }
        self.status
    }

    /// Fetches, validates and executes the instruction at `pc`.
    fn execute_next<C: Console>(&mut self, console: &mut C) -> Result<Status, VMError> {
        if self.pc >= self.code_size {
            trace!("HALT: reached end of program");
            return Ok(Status::Halted);
        }

        let position = self.pc;
        self.instr_offset = position;
        let opcode = self.memory.read_byte(position)?;
        self.pc += 1;

        let instr = Instruction::try_from(opcode)
            .map_err(|_| VMError::UnknownOpcode { opcode, position })?;

        let fits = self
            .pc
            .checked_add(instr.operand_bytes())
            .is_some_and(|end| end <= self.memory.len());
        if !fits {
            return Err(VMError::TruncatedInstruction {
                mnemonic: instr.mnemonic(),
                position,
            });
        }

        self.steps += 1;
        self.exec(instr, console)?;

        Ok(if instr == Instruction::Halt {
            Status::Halted
        } else {
            Status::Running
        })
    }

    /// Reads a register operand and advances `pc`.
    #[inline(always)]
    fn fetch_reg(&mut self) -> Result<u8, VMError> {
        let raw = self.memory.read_byte(self.pc)?;
        self.pc += 1;
        Ok(register_index(raw))
    }

    /// Reads a word operand and advances `pc`.
    #[inline(always)]
    fn fetch_word(&mut self) -> Result<u64, VMError> {
        let bytes = self.memory.read_bytes(self.pc, WORD_SIZE)?;
        let mut buf = [0u8; WORD_SIZE];
        buf.copy_from_slice(bytes);
        self.pc += WORD_SIZE;
        Ok(u64::from_le_bytes(buf))
    }

    /// Moves the program counter to a register value.
    ///
    /// The target is not validated here: the next step either halts
    /// (`pc >= code_size`) or decodes from it like any other address.
    #[inline(always)]
    fn jump_to(&mut self, target: u64) {
        self.pc = usize::try_from(target).unwrap_or(usize::MAX);
    }

    // =========================
    // Accessors
    // =========================

    pub fn status(&self) -> Status {
        self.status
    }

    /// The fault that stopped the VM, if any.
    pub fn fault(&self) -> Option<&VMError> {
        self.fault.as_ref()
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }

    pub fn memory_size(&self) -> usize {
        self.memory.len()
    }

    /// Number of instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Returns the whole memory image (code followed by data).
    pub fn memory(&self) -> &[u8] {
        self.memory.as_slice()
    }

    /// Returns register `idx & 7`.
    pub fn read_register(&self, idx: u8) -> u64 {
        self.registers.get(idx)
    }

    /// Sets register `idx & 7`.
    pub fn write_register(&mut self, idx: u8, value: u64) {
        self.registers.set(idx, value);
    }

    /// Returns a copy of all registers.
    pub fn registers(&self) -> [u64; REGISTER_COUNT] {
        self.registers.snapshot()
    }

    /// Reads the little-endian word at `addr`.
    pub fn read_memory_word(&self, addr: u64) -> Result<u64, VMError> {
        self.memory.read_word(addr)
    }

    /// Writes a little-endian word at `addr`.
    pub fn write_memory_word(&mut self, addr: u64, value: u64) -> Result<(), VMError> {
        self.memory.write_word(addr, value)
    }

    // =========================
    // Handlers
    // =========================

    fn op_halt<C: Console>(&mut self, _console: &mut C) -> Result<(), VMError> {
        trace!("HALT: program terminated at {}", self.instr_offset);
        Ok(())
    }

    fn op_load<C: Console>(&mut self, _console: &mut C, rd: u8, imm: u64) -> Result<(), VMError> {
        self.registers.set(rd, imm);
        trace!("LOAD: R{rd} = {imm}");
        Ok(())
    }

    fn op_load_addr<C: Console>(
        &mut self,
        _console: &mut C,
        rd: u8,
        addr: u64,
    ) -> Result<(), VMError> {
        let v = self.memory.read_word(addr)?;
        self.registers.set(rd, v);
        trace!("LOAD_ADDR: R{rd} = [{addr:#x}] = {v}");
        Ok(())
    }

    fn op_store_addr<C: Console>(
        &mut self,
        _console: &mut C,
        rs: u8,
        addr: u64,
    ) -> Result<(), VMError> {
        let v = self.registers.get(rs);
        self.memory.write_word(addr, v)?;
        trace!("STORE_ADDR: [{addr:#x}] = R{rs} = {v}");
        Ok(())
    }

    fn op_move<C: Console>(&mut self, _console: &mut C, rd: u8, rs: u8) -> Result<(), VMError> {
        let v = self.registers.get(rs);
        self.registers.set(rd, v);
        trace!("MOVE: R{rd} = R{rs} = {v}");
        Ok(())
    }

    /// Shared body of the three-register instructions.
    #[inline(always)]
    fn binary(&mut self, rd: u8, a: u8, b: u8, f: impl FnOnce(u64, u64) -> u64) -> u64 {
        let v = f(self.registers.get(a), self.registers.get(b));
        self.registers.set(rd, v);
        v
    }

    fn op_add<C: Console>(&mut self, _console: &mut C, rd: u8, a: u8, b: u8) -> Result<(), VMError> {
        let v = self.binary(rd, a, b, u64::wrapping_add);
        trace!("ADD: R{rd} = R{a} + R{b} = {v}");
        Ok(())
    }

    fn op_sub<C: Console>(&mut self, _console: &mut C, rd: u8, a: u8, b: u8) -> Result<(), VMError> {
        let v = self.binary(rd, a, b, u64::wrapping_sub);
        trace!("SUB: R{rd} = R{a} - R{b} = {v}");
        Ok(())
    }

    fn op_mul<C: Console>(&mut self, _console: &mut C, rd: u8, a: u8, b: u8) -> Result<(), VMError> {
        let v = self.binary(rd, a, b, u64::wrapping_mul);
        trace!("MUL: R{rd} = R{a} * R{b} = {v}");
        Ok(())
    }

    fn op_div<C: Console>(&mut self, _console: &mut C, rd: u8, a: u8, b: u8) -> Result<(), VMError> {
        if self.registers.get(b) == 0 {
            return Err(VMError::DivisionByZero {
                position: self.instr_offset,
            });
        }
        let v = self.binary(rd, a, b, |x, y| x / y);
        trace!("DIV: R{rd} = R{a} / R{b} = {v}");
        Ok(())
    }

    fn op_inc<C: Console>(&mut self, _console: &mut C, rd: u8) -> Result<(), VMError> {
        let v = self.registers.get(rd).wrapping_add(1);
        self.registers.set(rd, v);
        trace!("INC: R{rd} = {v}");
        Ok(())
    }

    fn op_dec<C: Console>(&mut self, _console: &mut C, rd: u8) -> Result<(), VMError> {
        let v = self.registers.get(rd).wrapping_sub(1);
        self.registers.set(rd, v);
        trace!("DEC: R{rd} = {v}");
        Ok(())
    }

    fn op_and<C: Console>(&mut self, _console: &mut C, rd: u8, a: u8, b: u8) -> Result<(), VMError> {
        let v = self.binary(rd, a, b, |x, y| x & y);
        trace!("AND: R{rd} = R{a} & R{b} = {v}");
        Ok(())
    }

    fn op_not<C: Console>(&mut self, _console: &mut C, rd: u8) -> Result<(), VMError> {
        let v = (self.registers.get(rd) == 0) as u64;
        self.registers.set(rd, v);
        trace!("NOT: R{rd} = {v}");
        Ok(())
    }

    fn op_or<C: Console>(&mut self, _console: &mut C, rd: u8, a: u8, b: u8) -> Result<(), VMError> {
        let v = self.binary(rd, a, b, |x, y| x | y);
        trace!("OR: R{rd} = R{a} | R{b} = {v}");
        Ok(())
    }

    fn op_xor<C: Console>(&mut self, _console: &mut C, rd: u8, a: u8, b: u8) -> Result<(), VMError> {
        let v = self.binary(rd, a, b, |x, y| x ^ y);
        trace!("XOR: R{rd} = R{a} ^ R{b} = {v}");
        Ok(())
    }

    fn op_cmp<C: Console>(&mut self, _console: &mut C, rd: u8, a: u8, b: u8) -> Result<(), VMError> {
        let v = self.binary(rd, a, b, |x, y| (x == y) as u64);
        trace!("CMP: R{rd} = (R{a} == R{b}) = {v}");
        Ok(())
    }

    fn op_jump<C: Console>(&mut self, _console: &mut C, ra: u8) -> Result<(), VMError> {
        let target = self.registers.get(ra);
        self.jump_to(target);
        trace!("JUMP: R{ra} -> {target}");
        Ok(())
    }

    fn op_jump_if_nz<C: Console>(&mut self, _console: &mut C, rc: u8, ra: u8) -> Result<(), VMError> {
        if self.registers.get(rc) != 0 {
            let target = self.registers.get(ra);
            self.jump_to(target);
            trace!("JUMP_IF_NZ: R{rc} != 0 -> {target}");
        } else {
            trace!("JUMP_IF_NZ: R{rc} == 0, fall through");
        }
        Ok(())
    }

    fn op_jump_if_z<C: Console>(&mut self, _console: &mut C, rc: u8, ra: u8) -> Result<(), VMError> {
        if self.registers.get(rc) == 0 {
            let target = self.registers.get(ra);
            self.jump_to(target);
            trace!("JUMP_IF_Z: R{rc} == 0 -> {target}");
        } else {
            trace!("JUMP_IF_Z: R{rc} != 0, fall through");
        }
        Ok(())
    }

    fn op_loop<C: Console>(&mut self, _console: &mut C, rc: u8, ra: u8) -> Result<(), VMError> {
        let counter = self.registers.get(rc);
        if counter == 0 {
            trace!("LOOP: R{rc} == 0, fall through");
            return Ok(());
        }
        self.registers.set(rc, counter - 1);
        let target = self.registers.get(ra);
        self.jump_to(target);
        trace!("LOOP: R{rc} = {} -> {target}", counter - 1);
        Ok(())
    }

    fn op_trap<C: Console>(&mut self, console: &mut C, rn: u8, rd: u8) -> Result<(), VMError> {
        let number = self.registers.get(rn);
        let data = self.registers.get(rd);
        if let Some(v) = trap::dispatch(number, data, console)? {
            self.registers.set(rd, v);
            trace!("TRAP {number}: R{rd} = {v:#04x}");
        } else {
            trace!("TRAP {number}: R{rd} = {data}");
        }
        Ok(())
    }

    fn op_print<C: Console>(&mut self, console: &mut C, rs: u8) -> Result<(), VMError> {
        let v = self.registers.get(rs);
        console.print_word(v);
        trace!("PRINT: R{rs} = {v}");
        Ok(())
    }
}
