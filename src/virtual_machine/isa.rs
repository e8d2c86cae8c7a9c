//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical instruction table and invokes a callback macro for code
//! generation. Everything that depends on the encoding (the [`Instruction`]
//! enum, opcode decoding, mnemonic lookup in the assembler, operand layouts
//! and the VM's dispatch) is generated from that one table, so the assembler
//! and the VM cannot drift apart.
//!
//! # Bytecode Format
//!
//! Raw program image, no header. Each instruction is:
//! - Opcode: 1 byte
//! - Register operand: 1 byte (masked to `0..8` at execution)
//! - Word operand (address or immediate): 8 bytes, little-endian, unsigned

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::operand::OperandKind;

/// Invokes a callback macro with the complete instruction definition list.
///
/// Entry format:
/// `Variant = opcode, "MNEMONIC" [aliases] => [operand: Kind, ...], handler,`
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Control
            // =========================
            /// HALT ; stop execution
            Halt = 0, "HALT" ["HLT"] => [], op_halt,
            // =========================
            // Load / Store / Move
            // =========================
            /// LOAD rd, imm64 ; rd = imm64
            Load = 1, "LOAD" ["LD"] => [rd: Reg, imm: Word], op_load,
            /// LOAD_ADDR rd, addr64 ; rd = memory[addr..addr+8]
            LoadAddr = 2, "LOAD_ADDR" ["LA"] => [rd: Reg, addr: Word], op_load_addr,
            /// STORE_ADDR rs, addr64 ; memory[addr..addr+8] = rs
            StoreAddr = 3, "STORE_ADDR" ["SA"] => [rs: Reg, addr: Word], op_store_addr,
            /// MOVE rd, rs ; rd = rs
            Move = 4, "MOVE" ["MOV"] => [rd: Reg, rs: Reg], op_move,
            // =========================
            // Integer arithmetic
            // =========================
            /// ADD rd, rs1, rs2 ; rd = rs1 + rs2 (wrapping)
            Add = 5, "ADD" [] => [rd: Reg, rs1: Reg, rs2: Reg], op_add,
            /// SUB rd, rs1, rs2 ; rd = rs1 - rs2 (wrapping)
            Sub = 6, "SUB" [] => [rd: Reg, rs1: Reg, rs2: Reg], op_sub,
            /// MUL rd, rs1, rs2 ; rd = rs1 * rs2 (wrapping)
            Mul = 7, "MUL" [] => [rd: Reg, rs1: Reg, rs2: Reg], op_mul,
            /// DIV rd, rs1, rs2 ; rd = rs1 / rs2 (fault on division by zero)
            Div = 8, "DIV" [] => [rd: Reg, rs1: Reg, rs2: Reg], op_div,
            /// INC rd ; rd = rd + 1
            Inc = 9, "INC" [] => [rd: Reg], op_inc,
            /// DEC rd ; rd = rd - 1
            Dec = 10, "DEC" [] => [rd: Reg], op_dec,
            // =========================
            // Logic / comparison
            // =========================
            /// AND rd, rs1, rs2 ; rd = rs1 & rs2
            And = 11, "AND" [] => [rd: Reg, rs1: Reg, rs2: Reg], op_and,
            /// NOT rd ; rd = (rd == 0) as 1 or 0
            Not = 12, "NOT" [] => [rd: Reg], op_not,
            /// OR rd, rs1, rs2 ; rd = rs1 | rs2
            Or = 13, "OR" [] => [rd: Reg, rs1: Reg, rs2: Reg], op_or,
            /// XOR rd, rs1, rs2 ; rd = rs1 ^ rs2
            Xor = 14, "XOR" [] => [rd: Reg, rs1: Reg, rs2: Reg], op_xor,
            /// CMP rd, rs1, rs2 ; rd = (rs1 == rs2) as 1 or 0
            Cmp = 15, "CMP" [] => [rd: Reg, rs1: Reg, rs2: Reg], op_cmp,
            // =========================
            // Control flow
            // =========================
            /// JUMP ra ; pc = ra
            Jump = 16, "JUMP" ["JMP"] => [ra: Reg], op_jump,
            /// JUMP_IF_NZ rc, ra ; if rc != 0 then pc = ra
            JumpIfNz = 17, "JUMP_IF_NZ" ["JNZ"] => [rc: Reg, ra: Reg], op_jump_if_nz,
            /// JUMP_IF_Z rc, ra ; if rc == 0 then pc = ra
            JumpIfZ = 18, "JUMP_IF_Z" ["JZ"] => [rc: Reg, ra: Reg], op_jump_if_z,
            /// LOOP rc, ra ; if rc != 0 then rc -= 1, pc = ra
            Loop = 19, "LOOP" [] => [rc: Reg, ra: Reg], op_loop,
            // =========================
            // I/O
            // =========================
            /// TRAP rn, rd ; invoke trap number rn with data register rd
            Trap = 20, "TRAP" [] => [rn: Reg, rd: Reg], op_trap,
            /// PRINT rs ; write rs as a decimal line to the output sink
            Print = 21, "PRINT" ["PRT"] => [rs: Reg], op_print,
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal [ $( $alias:literal ),* $(,)? ] => [
                $( $field:ident : $kind:ident ),* $(,)?
            ], $handler:ident
        ),* $(,)?
    ) => {
        /// VM instruction, one variant per catalog entry.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        #[repr(u8)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::UnknownOpcode {
                        opcode: value,
                        position: 0,
                    }),
                }
            }
        }

        impl Instruction {
            /// Every instruction, in opcode order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name, )* ];

            /// Returns the canonical assembly mnemonic.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Returns the alternative mnemonics accepted by the assembler.
            pub const fn aliases(&self) -> &'static [&'static str] {
                match self {
                    $( Instruction::$name => &[ $( $alias ),* ], )*
                }
            }

            /// Returns the operand layout, in encoding order.
            pub const fn operands(&self) -> &'static [OperandKind] {
                match self {
                    $( Instruction::$name => &[ $( OperandKind::$kind ),* ], )*
                }
            }

            /// Looks up an instruction by mnemonic or alias, ignoring ASCII case.
            pub fn from_mnemonic(name: &str) -> Result<Self, VMError> {
                match name.to_ascii_uppercase().as_str() {
                    $( $mnemonic $( | $alias )* => Ok(Instruction::$name), )*
                    _ => Err(VMError::UnknownMnemonic {
                        name: name.to_string(),
                    }),
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

impl Instruction {
    /// Returns the opcode byte.
    pub const fn opcode(&self) -> u8 {
        *self as u8
    }

    /// Total encoded size of the operands in bytes.
    pub const fn operand_bytes(&self) -> usize {
        let operands = self.operands();
        let mut total = 0;
        let mut i = 0;
        while i < operands.len() {
            total += operands[i].size();
            i += 1;
        }
        total
    }

    /// Total encoded size of the instruction (opcode + operands).
    pub const fn size(&self) -> usize {
        1 + self.operand_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_try_from_invalid() {
        for opcode in 22..=255u8 {
            assert!(matches!(
                Instruction::try_from(opcode),
                Err(VMError::UnknownOpcode { opcode: o, .. }) if o == opcode
            ));
        }
    }

    #[test]
    fn opcodes_are_dense_and_ordered() {
        for (i, instr) in Instruction::ALL.iter().enumerate() {
            assert_eq!(instr.opcode() as usize, i);
            assert_eq!(Instruction::try_from(i as u8).unwrap(), *instr);
        }
        assert_eq!(Instruction::ALL.len(), 22);
    }

    #[test]
    fn operand_layouts() {
        assert_eq!(Instruction::Halt.size(), 1);
        assert_eq!(Instruction::Load.size(), 10);
        assert_eq!(Instruction::LoadAddr.size(), 10);
        assert_eq!(Instruction::StoreAddr.size(), 10);
        assert_eq!(Instruction::Move.size(), 3);
        assert_eq!(Instruction::Add.size(), 4);
        assert_eq!(Instruction::Inc.size(), 2);
        assert_eq!(Instruction::Jump.size(), 2);
        assert_eq!(Instruction::Loop.size(), 3);
        assert_eq!(Instruction::Trap.size(), 3);
        assert_eq!(Instruction::Print.size(), 2);
        assert_eq!(
            Instruction::Load.operands(),
            &[OperandKind::Reg, OperandKind::Word]
        );
    }

    #[test]
    fn from_mnemonic_is_case_insensitive() {
        assert_eq!(Instruction::from_mnemonic("add").unwrap(), Instruction::Add);
        assert_eq!(
            Instruction::from_mnemonic("Jump_If_Nz").unwrap(),
            Instruction::JumpIfNz
        );
    }

    #[test]
    fn from_mnemonic_accepts_aliases() {
        assert_eq!(Instruction::from_mnemonic("hlt").unwrap(), Instruction::Halt);
        assert_eq!(Instruction::from_mnemonic("LD").unwrap(), Instruction::Load);
        assert_eq!(Instruction::from_mnemonic("prt").unwrap(), Instruction::Print);
        for instr in Instruction::ALL {
            for alias in instr.aliases() {
                assert_eq!(Instruction::from_mnemonic(alias).unwrap(), *instr);
            }
        }
    }

    #[test]
    fn from_mnemonic_unknown() {
        assert!(matches!(
            Instruction::from_mnemonic("FOO"),
            Err(VMError::UnknownMnemonic { name }) if name == "FOO"
        ));
    }

    #[test]
    fn mnemonics_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for instr in Instruction::ALL {
            assert!(seen.insert(instr.mnemonic()));
            for alias in instr.aliases() {
                assert!(seen.insert(alias));
            }
        }
    }
}
