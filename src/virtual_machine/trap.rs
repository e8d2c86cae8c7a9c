//! TRAP instruction handling and the console it talks to.
//!
//! `TRAP rn, rd` reads the trap number from `rn`. The data register `rd`
//! holds the byte to write (PUTC) or receives the byte read (GETC). Unknown
//! trap numbers are logged and skipped; they never fault the VM.
//!
//! GETC at end of input, or on a read error, faults the VM with
//! [`VMError::ConsoleInput`] instead of storing an EOF marker in `rd`.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::terminal;
use crate::{error, warn};
use std::collections::VecDeque;
use std::io::{self, Write};

/// Trap numbers understood by the VM.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapCode {
    /// Write the low byte of the data register to the output sink.
    Putc = 0,
    /// Read one byte (blocking, unbuffered, no echo) into the data register.
    Getc = 1,
}

impl TryFrom<u64> for TrapCode {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TrapCode::Putc),
            1 => Ok(TrapCode::Getc),
            other => Err(other),
        }
    }
}

/// Console I/O used by TRAP and PRINT.
pub trait Console {
    /// Emits one byte to the output sink.
    fn put_byte(&mut self, byte: u8);

    /// Blocks until one input byte is available.
    fn get_byte(&mut self) -> io::Result<u8>;

    /// Emits `value` in decimal followed by a newline.
    fn print_word(&mut self, value: u64);
}

/// Console bound to the process's stdout and raw stdin.
#[derive(Debug, Default)]
pub struct StdConsole;

impl StdConsole {
    pub fn new() -> Self {
        Self
    }
}

impl Console for StdConsole {
    fn put_byte(&mut self, byte: u8) {
        let mut out = io::stdout().lock();
        // flushed per byte so prompts show up before a following GETC blocks
        if let Err(e) = out.write_all(&[byte]).and_then(|_| out.flush()) {
            error!("PUTC: failed to write to stdout: {e}");
        }
    }

    fn get_byte(&mut self) -> io::Result<u8> {
        terminal::read_raw_byte()
    }

    fn print_word(&mut self, value: u64) {
        let mut out = io::stdout().lock();
        if let Err(e) = writeln!(out, "{value}").and_then(|_| out.flush()) {
            error!("PRINT: failed to write to stdout: {e}");
        }
    }
}

/// In-memory console: input is served from a queue, output is collected.
#[derive(Debug, Default, Clone)]
pub struct BufferConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a console whose GETC reads return `input` in order.
    pub fn with_input(input: impl AsRef<[u8]>) -> Self {
        Self {
            input: input.as_ref().iter().copied().collect(),
            output: Vec::new(),
        }
    }

    /// Everything written so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Output decoded as UTF-8, lossily.
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Console for BufferConsole {
    fn put_byte(&mut self, byte: u8) {
        self.output.push(byte);
    }

    fn get_byte(&mut self) -> io::Result<u8> {
        self.input
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))
    }

    fn print_word(&mut self, value: u64) {
        self.output.extend_from_slice(value.to_string().as_bytes());
        self.output.push(b'\n');
    }
}

/// Executes trap `number` with the current value of the data register.
///
/// Returns the new value for the data register, if the trap produces one.
pub(crate) fn dispatch<C: Console>(
    number: u64,
    data: u64,
    console: &mut C,
) -> Result<Option<u64>, VMError> {
    match TrapCode::try_from(number) {
        Ok(TrapCode::Putc) => {
            console.put_byte(data as u8);
            Ok(None)
        }
        Ok(TrapCode::Getc) => {
            let byte = console.get_byte().map_err(|e| VMError::ConsoleInput {
                reason: e.to_string(),
            })?;
            Ok(Some(byte as u64))
        }
        Err(unknown) => {
            warn!("TRAP: unknown trap number {unknown}, ignored");
            Ok(None)
        }
    }
}
