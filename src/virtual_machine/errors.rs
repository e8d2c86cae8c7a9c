use rvm_derive::Error;

/// Errors raised while loading, assembling or executing a program.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum VMError {
    // =========================
    // Execution faults
    // =========================
    /// Opcode byte with no catalog entry.
    #[error("unknown opcode 0x{opcode:02x} at position {position}")]
    UnknownOpcode { opcode: u8, position: usize },
    /// Operands of the instruction would run past the end of memory.
    #[error("truncated {mnemonic} instruction at position {position}")]
    TruncatedInstruction {
        mnemonic: &'static str,
        position: usize,
    },
    /// Word access not fully inside `[0, memory_size)`.
    #[error("out of bounds memory access at address {addr} (memory size {memory_size})")]
    OutOfBoundsAccess { addr: u64, memory_size: usize },
    /// DIV with a zero divisor.
    #[error("division by zero at position {position}")]
    DivisionByZero { position: usize },
    /// GETC could not read a byte.
    #[error("console input failed: {reason}")]
    ConsoleInput { reason: String },
    /// Program image does not fit in the configured memory.
    #[error("program of {code_size} bytes does not fit in {memory_size} bytes of memory")]
    ProgramTooLarge { code_size: usize, memory_size: usize },

    // =========================
    // Loading
    // =========================
    /// File could not be opened or read.
    #[error("{path}: {source}")]
    IoError { path: String, source: String },
    /// File exists but holds no bytecode.
    #[error("{path}: empty program")]
    EmptyProgram { path: String },

    // =========================
    // Assembly
    // =========================
    /// Mnemonic not present in the instruction catalog.
    #[error("unknown instruction '{name}'")]
    UnknownMnemonic { name: String },
    /// Operand count differs from the catalog entry.
    #[error("operand count mismatch: {instruction} expects {expected}, got {actual}")]
    ArityMismatch {
        instruction: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Token is not a register name, or names a register outside `R0`..`R7`.
    #[error("invalid register '{token}'")]
    InvalidRegister { token: String },
    /// Token is neither a number nor a known label.
    #[error("invalid immediate '{token}'")]
    InvalidImmediate { token: String },
    /// Register given where an address or immediate word is expected.
    #[error("expected an immediate or label, got register '{token}'")]
    ExpectedImmediate { token: String },
    /// Label referenced but never defined.
    #[error("undefined label '{label}'")]
    UndefinedLabel { label: String },
    /// Label defined more than once.
    #[error("duplicate label '{label}'")]
    DuplicateLabel { label: String },
    /// Label definition whose name is not an identifier.
    #[error("invalid label name '{label}'")]
    InvalidLabel { label: String },
    /// Error with source location context.
    #[error("line {line}: {source}")]
    AssemblyError {
        line: usize,
        offset: usize,
        source: String,
    },
}

impl VMError {
    /// Returns true for assembly errors that abort the whole pass rather than a single line.
    pub fn is_fatal_assembly_error(&self) -> bool {
        matches!(self, VMError::InvalidRegister { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = VMError::UnknownOpcode {
            opcode: 0xFF,
            position: 3,
        };
        assert_eq!(err.to_string(), "unknown opcode 0xff at position 3");

        let err = VMError::ArityMismatch {
            instruction: "ADD",
            expected: 3,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "operand count mismatch: ADD expects 3, got 1"
        );
    }

    #[test]
    fn assembly_error_wraps_source_message() {
        let inner = VMError::UnknownMnemonic {
            name: "FOO".to_string(),
        };
        let err = VMError::AssemblyError {
            line: 4,
            offset: 1,
            source: inner.to_string(),
        };
        assert_eq!(err.to_string(), "line 4: unknown instruction 'FOO'");
    }

    #[test]
    fn only_register_errors_are_fatal() {
        assert!(
            VMError::InvalidRegister {
                token: "R9".to_string()
            }
            .is_fatal_assembly_error()
        );
        assert!(
            !VMError::UndefinedLabel {
                label: "x".to_string()
            }
            .is_fatal_assembly_error()
        );
    }
}
