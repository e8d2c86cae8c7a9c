use crate::virtual_machine::operand::{REGISTER_COUNT, register_index};

/// Register file holding the VM's general purpose registers.
///
/// Provides [`REGISTER_COUNT`] 64-bit registers, all zero at creation. Every
/// index is masked into range before use, so register access never fails.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(super) struct Registers {
    regs: [u64; REGISTER_COUNT],
}

impl Registers {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Returns the value of register `idx & 7`.
    #[inline(always)]
    pub(super) fn get(&self, idx: u8) -> u64 {
        self.regs[register_index(idx) as usize]
    }

    /// Stores `v` into register `idx & 7`.
    #[inline(always)]
    pub(super) fn set(&mut self, idx: u8, v: u64) {
        self.regs[register_index(idx) as usize] = v;
    }

    /// Returns a copy of every register.
    pub(super) fn snapshot(&self) -> [u64; REGISTER_COUNT] {
        self.regs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_initialized() {
        assert_eq!(Registers::new().snapshot(), [0; REGISTER_COUNT]);
    }

    #[test]
    fn set_then_get() {
        let mut regs = Registers::new();
        regs.set(3, 99);
        assert_eq!(regs.get(3), 99);
        assert_eq!(regs.get(2), 0);
    }

    #[test]
    fn out_of_range_index_is_masked() {
        let mut regs = Registers::new();
        regs.set(0xFA, 7); // 0xFA & 7 == 2
        assert_eq!(regs.get(2), 7);
        assert_eq!(regs.get(10), 7);
    }
}
