//! Bytecode program images.
//!
//! A program is a raw byte image with no header or version: the bytes are
//! loaded at address 0 and execution starts there. [`Program`] handles
//! loading from disk, hex dumps and catalog-driven disassembly.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{Operand, OperandKind, WORD_SIZE, register_index};
use std::fmt;
use std::fs;
use std::path::Path;

/// Bytes per hex dump line.
const HEX_DUMP_WIDTH: usize = 16;

/// Raw program image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    bytecode: Vec<u8>,
}

impl Program {
    pub fn new(bytecode: Vec<u8>) -> Self {
        Self { bytecode }
    }

    /// Reads a whole file as a program image.
    ///
    /// An empty file is rejected with [`VMError::EmptyProgram`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VMError> {
        let path_ref = path.as_ref();
        let bytecode = fs::read(path_ref).map_err(|e| VMError::IoError {
            path: path_ref.display().to_string(),
            source: e.to_string(),
        })?;
        if bytecode.is_empty() {
            return Err(VMError::EmptyProgram {
                path: path_ref.display().to_string(),
            });
        }
        Ok(Self { bytecode })
    }

    /// Writes the image to `path`, replacing any existing file.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), VMError> {
        let path_ref = path.as_ref();
        fs::write(path_ref, &self.bytecode).map_err(|e| VMError::IoError {
            path: path_ref.display().to_string(),
            source: e.to_string(),
        })
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }

    /// Lowercase hex, 16 space-separated bytes per line.
    pub fn hex_dump(&self) -> String {
        hex_dump(&self.bytecode)
    }

    /// Decodes the whole image into instructions.
    pub fn decode(&self) -> Result<Vec<DecodedInstruction>, VMError> {
        decode(&self.bytecode)
    }

    /// Renders the disassembly, one `offset: instruction` line per instruction.
    pub fn disassemble(&self) -> Result<String, VMError> {
        let mut out = String::new();
        for instr in self.decode()? {
            out.push_str(&format!("{:04x}: {instr}\n", instr.offset));
        }
        Ok(out)
    }
}

/// One instruction recovered from bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Byte offset of the opcode.
    pub offset: usize,
    pub instruction: Instruction,
    /// Operands in encoding order. Register indices are already masked.
    pub operands: Vec<Operand>,
}

/// Renders assembler-compatible text, e.g. `LOAD R0 5`.
impl fmt::Display for DecodedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instruction.mnemonic())?;
        for op in &self.operands {
            write!(f, " {op}")?;
        }
        Ok(())
    }
}

/// Formats `bytes` as lowercase hex, 16 space-separated bytes per line.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .chunks(HEX_DUMP_WIDTH)
        .map(|chunk| {
            chunk
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decodes `bytes` into instructions using the instruction catalog.
///
/// Fails on the first unknown opcode or on an instruction whose operands run
/// past the end of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Vec<DecodedInstruction>, VMError> {
    let mut out = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let opcode = bytes[offset];
        let instruction = Instruction::try_from(opcode).map_err(|_| VMError::UnknownOpcode {
            opcode,
            position: offset,
        })?;

        let end = offset + instruction.size();
        let Some(mut operand_bytes) = bytes.get(offset + 1..end) else {
            return Err(VMError::TruncatedInstruction {
                mnemonic: instruction.mnemonic(),
                position: offset,
            });
        };

        let mut operands = Vec::with_capacity(instruction.operands().len());
        for kind in instruction.operands() {
            let (head, rest) = operand_bytes.split_at(kind.size());
            operands.push(match kind {
                OperandKind::Reg => Operand::Reg(register_index(head[0])),
                OperandKind::Word => {
                    let mut buf = [0u8; WORD_SIZE];
                    buf.copy_from_slice(head);
                    Operand::Word(u64::from_le_bytes(buf))
                }
            });
            operand_bytes = rest;
        }

        out.push(DecodedInstruction {
            offset,
            instruction,
            operands,
        });
        offset = end;
    }

    Ok(out)
}
