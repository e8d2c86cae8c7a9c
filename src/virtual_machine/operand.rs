//! Operand layouts and decoded operand values.

use std::fmt;

/// Number of general purpose registers.
pub const REGISTER_COUNT: usize = 8;

/// Mask applied to every register operand byte before use.
pub const REGISTER_MASK: u8 = (REGISTER_COUNT - 1) as u8;

/// Width in bytes of an address/immediate word operand.
pub const WORD_SIZE: usize = 8;

/// Encoded layout of a single operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandKind {
    /// Register index, 1 byte.
    Reg,
    /// Address or immediate, 8 bytes little-endian.
    Word,
}

impl OperandKind {
    /// Encoded size in bytes.
    pub const fn size(self) -> usize {
        match self {
            OperandKind::Reg => 1,
            OperandKind::Word => WORD_SIZE,
        }
    }
}

/// A decoded operand value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    /// Register index, already reduced to `0..REGISTER_COUNT`.
    Reg(u8),
    /// Address or immediate word.
    Word(u64),
}

impl Operand {
    pub const fn kind(&self) -> OperandKind {
        match self {
            Operand::Reg(_) => OperandKind::Reg,
            Operand::Word(_) => OperandKind::Word,
        }
    }

    /// Appends the encoded operand to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Operand::Reg(r) => out.push(*r),
            Operand::Word(w) => out.extend_from_slice(&w.to_le_bytes()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "R{r}"),
            Operand::Word(w) => write!(f, "{w}"),
        }
    }
}

/// Reduces a raw register operand byte to a valid register index.
#[inline(always)]
pub const fn register_index(raw: u8) -> u8 {
    raw & REGISTER_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_kind_size() {
        assert_eq!(OperandKind::Reg.size(), 1);
        assert_eq!(OperandKind::Word.size(), 8);
    }

    #[test]
    fn register_index_wraps_every_byte() {
        for raw in 0..=255u8 {
            assert!((register_index(raw) as usize) < REGISTER_COUNT);
        }
        assert_eq!(register_index(9), 1);
        assert_eq!(register_index(0xFF), 7);
    }

    #[test]
    fn operand_encode() {
        let mut out = Vec::new();
        Operand::Reg(3).encode(&mut out);
        Operand::Word(0x0102).encode(&mut out);
        assert_eq!(out, vec![3, 0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn operand_display() {
        assert_eq!(Operand::Reg(5).to_string(), "R5");
        assert_eq!(Operand::Word(42).to_string(), "42");
    }
}
