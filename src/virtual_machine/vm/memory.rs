use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::operand::WORD_SIZE;

/// Flat, fixed-capacity memory owned by a single VM.
///
/// Memory layout: `[code region][data region]`
/// - **Code region**: the loaded program image, `code_size` bytes.
/// - **Data region**: zero-initialized scratch space up to `memory_size`.
///
/// Both regions are addressable and protected identically. Every access goes
/// through a bounds-checked accessor; no offset `>= memory_size` is touched.
pub(super) struct Memory {
    bytes: Box<[u8]>,
}

impl Memory {
    /// Creates `memory_size` bytes of memory with `code` copied to offset 0.
    pub(super) fn new(code: &[u8], memory_size: usize) -> Result<Self, VMError> {
        if code.len() > memory_size {
            return Err(VMError::ProgramTooLarge {
                code_size: code.len(),
                memory_size,
            });
        }
        let mut bytes = vec![0u8; memory_size].into_boxed_slice();
        bytes[..code.len()].copy_from_slice(code);
        Ok(Self { bytes })
    }

    /// Total capacity in bytes.
    #[inline(always)]
    pub(super) fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns the full memory image.
    pub(super) fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns `len` bytes starting at `addr`, or `OutOfBoundsAccess` unless all of them are in range.
    #[inline]
    pub(super) fn read_bytes(&self, addr: usize, len: usize) -> Result<&[u8], VMError> {
        addr.checked_add(len)
            .and_then(|end| self.bytes.get(addr..end))
            .ok_or(VMError::OutOfBoundsAccess {
                addr: addr as u64,
                memory_size: self.bytes.len(),
            })
    }

    /// Returns the byte at `addr`.
    #[inline]
    pub(super) fn read_byte(&self, addr: usize) -> Result<u8, VMError> {
        Ok(self.read_bytes(addr, 1)?[0])
    }

    /// Reads a little-endian word at `addr`. The whole word must be in bounds.
    pub(super) fn read_word(&self, addr: u64) -> Result<u64, VMError> {
        let start = self.word_start(addr)?;
        let mut buf = [0u8; WORD_SIZE];
        buf.copy_from_slice(&self.bytes[start..start + WORD_SIZE]);
        Ok(u64::from_le_bytes(buf))
    }

    /// Writes `value` as a little-endian word at `addr`. The whole word must be in bounds.
    pub(super) fn write_word(&mut self, addr: u64, value: u64) -> Result<(), VMError> {
        let start = self.word_start(addr)?;
        self.bytes[start..start + WORD_SIZE].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Validates that `[addr, addr + WORD_SIZE)` lies inside memory.
    fn word_start(&self, addr: u64) -> Result<usize, VMError> {
        usize::try_from(addr)
            .ok()
            .filter(|start| {
                start
                    .checked_add(WORD_SIZE)
                    .is_some_and(|end| end <= self.bytes.len())
            })
            .ok_or(VMError::OutOfBoundsAccess {
                addr,
                memory_size: self.bytes.len(),
            })
    }
}
