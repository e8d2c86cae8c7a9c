//! Assembly language parser and bytecode compiler.
//!
//! Converts human-readable assembly source into executable bytecode. Mnemonic
//! lookup and operand layouts come from the instruction catalog
//! ([`for_each_instruction!`](crate::for_each_instruction)), so the assembler
//! always emits exactly what the VM decodes.
//!
//! # Syntax
//!
//! ```text
//! label:                         ; optional, may share a line with an instruction
//! INSTRUCTION operand1, operand2 # optional comment
//! ```
//!
//! - Mnemonics are case-insensitive; aliases (`LD`, `JNZ`, ...) are accepted
//! - Registers are `R0`..`R7`, case-insensitive
//! - Words are decimal (`42`, `-1`), hex (`0x2A`) or binary (`0b101010`)
//! - A label name used as a word resolves to the label's absolute byte offset
//! - `;` and `#` start comments; commas between operands are optional
//!
//! # Errors
//!
//! An unknown mnemonic, a wrong operand count, a bad word, an undefined label
//! and a bad or duplicate label definition are reported and the offending
//! line is skipped. An invalid register aborts the whole assembly.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{Operand, OperandKind, REGISTER_COUNT};
use crate::{error, warn};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::fs;
use std::path::Path;

const COMMENT_CHARS: [char; 2] = [';', '#'];
const LABEL_SUFFIX: char = ':';
const REGISTER_PREFIX: [char; 2] = ['R', 'r'];

/// Result of assembling a source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembly {
    /// Encoded program image.
    pub bytecode: Vec<u8>,
    /// Recoverable errors, one per skipped line, as [`VMError::AssemblyError`].
    pub diagnostics: Vec<VMError>,
}

/// Formats a compiler-style diagnostic for assembly failures.
pub(crate) fn render_assembly_diagnostic(
    file: &str,
    source: &str,
    line: usize,
    offset: usize,
    message: &str,
) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "{message}");
    let _ = writeln!(diag, " --> {file}:{line}:{offset}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(offset.saturating_sub(1));
        let _ = writeln!(diag, "     |");
        let _ = writeln!(diag, "{line:>4} | {line_text}");
        let _ = write!(diag, "     | {underline}^");
    }

    diag
}

/// An error tied to a position in the source.
#[derive(Debug, Clone)]
struct Diagnostic {
    line: usize,
    offset: usize,
    error: VMError,
}

impl Diagnostic {
    fn new(line: usize, token: &Token, error: VMError) -> Self {
        Self {
            line,
            offset: token.offset,
            error,
        }
    }

    fn render(&self, file: &str, source: &str) -> String {
        render_assembly_diagnostic(
            file,
            source,
            self.line,
            self.offset,
            &self.error.to_string(),
        )
    }

    fn into_error(self) -> VMError {
        VMError::AssemblyError {
            line: self.line,
            offset: self.offset,
            source: self.error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Token<'a> {
    text: &'a str,
    /// 1-based column offset in the line.
    offset: usize,
}

/// Tokenize a single line of assembly.
///
/// Rules:
/// - `;` or `#` starts a comment
/// - commas are separators
/// - whitespace-separated tokens
fn tokenize(line: &str) -> Vec<Token<'_>> {
    let code = line.find(COMMENT_CHARS).map_or(line, |end| &line[..end]);
    let mut out = Vec::with_capacity(4);
    let mut start: Option<usize> = None;

    for (i, c) in code.char_indices() {
        if c == ',' || c.is_whitespace() {
            if let Some(s) = start.take() {
                out.push(Token {
                    text: &code[s..i],
                    offset: s + 1,
                });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }

    if let Some(s) = start {
        out.push(Token {
            text: &code[s..],
            offset: s + 1,
        });
    }

    out
}

/// Parse a register token like `R0`, `r7`
pub(crate) fn parse_reg(tok: &str) -> Result<u8, VMError> {
    let invalid = || VMError::InvalidRegister {
        token: tok.to_string(),
    };
    let digits = tok.strip_prefix(REGISTER_PREFIX).ok_or_else(invalid)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match digits.parse::<u8>() {
        Ok(idx) if (idx as usize) < REGISTER_COUNT => Ok(idx),
        _ => Err(invalid()),
    }
}

/// Parse a numeric word: decimal, `0x` hex, `0b` binary or negative decimal.
///
/// Negative values are stored as their two's complement.
pub(crate) fn parse_number(tok: &str) -> Option<u64> {
    if tok.starts_with('-') {
        return tok.parse::<i64>().ok().map(|v| v as u64);
    }
    let (digits, radix) = if let Some(hex) = tok.strip_prefix("0x").or(tok.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = tok.strip_prefix("0b").or(tok.strip_prefix("0B")) {
        (bin, 2)
    } else {
        (tok, 10)
    };
    if digits.is_empty() || digits.starts_with('+') {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Returns true if `name` can be used as a label.
fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Checks if a token is a label definition (ends with `:`)
fn is_label_def(tok: &str) -> bool {
    tok.ends_with(LABEL_SUFFIX) && tok.len() > 1
}

/// Extracts the label name from a label definition token.
fn label_name(tok: &str) -> &str {
    &tok[..tok.len() - 1]
}

/// Operand as written in the source, before label resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AsmOperand<'a> {
    Value(Operand),
    Label(Token<'a>),
}

/// One instruction line after parsing.
#[derive(Debug, Clone)]
struct AsmInstr<'a> {
    line: usize,
    instr: Instruction,
    operands: Vec<AsmOperand<'a>>,
}

impl AsmInstr<'_> {
    /// First label reference that does not appear in `defined`.
    fn undefined_label<'s>(&'s self, defined: &HashSet<&str>) -> Option<&'s Token<'s>> {
        self.operands.iter().find_map(|op| match op {
            AsmOperand::Label(tok) if !defined.contains(tok.text) => Some(tok),
            _ => None,
        })
    }

    /// Encodes the instruction, resolving labels against `labels`.
    fn assemble(&self, labels: &HashMap<&str, usize>, out: &mut Vec<u8>) -> Result<(), VMError> {
        out.push(self.instr.opcode());
        for op in &self.operands {
            match op {
                AsmOperand::Value(v) => v.encode(out),
                AsmOperand::Label(tok) => {
                    let target = labels.get(tok.text).ok_or_else(|| VMError::UndefinedLabel {
                        label: tok.text.to_string(),
                    })?;
                    Operand::Word(*target as u64).encode(out);
                }
            }
        }
        Ok(())
    }
}

/// Parses one word operand: a number or a label reference.
fn parse_word<'a>(tok: &Token<'a>) -> Result<AsmOperand<'a>, VMError> {
    if parse_reg(tok.text).is_ok() {
        return Err(VMError::ExpectedImmediate {
            token: tok.text.to_string(),
        });
    }
    if let Some(v) = parse_number(tok.text) {
        return Ok(AsmOperand::Value(Operand::Word(v)));
    }
    if is_label_name(tok.text) {
        return Ok(AsmOperand::Label(*tok));
    }
    Err(VMError::InvalidImmediate {
        token: tok.text.to_string(),
    })
}

/// Parse one instruction from tokens into [`AsmInstr`].
///
/// `tokens` starts with the mnemonic. On failure, returns the error together
/// with the token it applies to.
fn parse_instruction<'a>(
    line: usize,
    tokens: &[Token<'a>],
) -> Result<AsmInstr<'a>, Diagnostic> {
    let Some((mnemonic, args)) = tokens.split_first() else {
        return Err(Diagnostic {
            line,
            offset: 1,
            error: VMError::UnknownMnemonic {
                name: String::new(),
            },
        });
    };

    let instr =
        Instruction::from_mnemonic(mnemonic.text).map_err(|e| Diagnostic::new(line, mnemonic, e))?;

    let kinds = instr.operands();
    if args.len() != kinds.len() {
        return Err(Diagnostic::new(
            line,
            mnemonic,
            VMError::ArityMismatch {
                instruction: instr.mnemonic(),
                expected: kinds.len(),
                actual: args.len(),
            },
        ));
    }

    let mut operands = Vec::with_capacity(kinds.len());
    for (kind, tok) in kinds.iter().zip(args) {
        let op = match kind {
            OperandKind::Reg => parse_reg(tok.text).map(|r| AsmOperand::Value(Operand::Reg(r))),
            OperandKind::Word => parse_word(tok),
        };
        operands.push(op.map_err(|e| Diagnostic::new(line, tok, e))?);
    }

    Ok(AsmInstr {
        line,
        instr,
        operands,
    })
}

/// Logs every diagnostic, compiler style.
fn log_diagnostics(file: &str, source: &str, diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        warn!("{}", diag.render(file, source));
    }
}

/// Performs two-pass assembly.
///
/// Pass 1: tokenizes all lines, parses instructions and collects label
/// definitions. Lines referencing undefined labels are dropped before layout,
/// so skipped lines never shift label offsets.
///
/// Pass 2: assigns byte offsets to labels and emits bytecode.
fn assemble_source_with_name(source: &str, source_name: &str) -> Result<Assembly, VMError> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    // (label, line) in definition order
    let mut definitions: Vec<(Token, usize)> = Vec::new();
    // per source line: label definitions and the parsed instruction
    let mut lines: Vec<(Vec<Token>, Option<AsmInstr>)> = Vec::new();

    // First pass: tokenize, split labels from instructions, parse operands
    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let tokens = tokenize(raw);
        let split = tokens
            .iter()
            .position(|t| !is_label_def(t.text))
            .unwrap_or(tokens.len());
        let (label_toks, rest) = tokens.split_at(split);

        let mut labels = Vec::with_capacity(label_toks.len());
        for tok in label_toks {
            let name = label_name(tok.text);
            if !is_label_name(name) {
                diagnostics.push(Diagnostic::new(
                    line_no,
                    tok,
                    VMError::InvalidLabel {
                        label: name.to_string(),
                    },
                ));
                continue;
            }
            let label = Token {
                text: name,
                offset: tok.offset,
            };
            definitions.push((label, line_no));
            labels.push(label);
        }

        let instr = if rest.is_empty() {
            None
        } else {
            match parse_instruction(line_no, rest) {
                Ok(instr) => Some(instr),
                Err(diag) if diag.error.is_fatal_assembly_error() => {
                    log_diagnostics(source_name, source, &diagnostics);
                    error!("{}", diag.render(source_name, source));
                    return Err(diag.into_error());
                }
                Err(diag) => {
                    diagnostics.push(diag);
                    None
                }
            }
        };

        lines.push((labels, instr));
    }

    // Duplicate definitions: the first one wins
    let mut defined: HashSet<&str> = HashSet::new();
    for (label, line_no) in &definitions {
        if !defined.insert(label.text) {
            diagnostics.push(Diagnostic::new(
                *line_no,
                label,
                VMError::DuplicateLabel {
                    label: label.text.to_string(),
                },
            ));
        }
    }

    // Drop instructions that reference undefined labels
    for (_, slot) in lines.iter_mut() {
        if let Some(instr) = slot
            && let Some(tok) = instr.undefined_label(&defined)
        {
            diagnostics.push(Diagnostic::new(
                instr.line,
                tok,
                VMError::UndefinedLabel {
                    label: tok.text.to_string(),
                },
            ));
            *slot = None;
        }
    }

    // Second pass: layout, then emission
    let mut offsets: HashMap<&str, usize> = HashMap::new();
    let mut offset = 0usize;
    for (labels, instr) in &lines {
        for label in labels {
            offsets.entry(label.text).or_insert(offset);
        }
        if let Some(instr) = instr {
            offset += instr.instr.size();
        }
    }

    let mut bytecode = Vec::with_capacity(offset);
    for instr in lines.iter().filter_map(|(_, instr)| instr.as_ref()) {
        instr.assemble(&offsets, &mut bytecode)?;
    }

    diagnostics.sort_by_key(|d| (d.line, d.offset));
    log_diagnostics(source_name, source, &diagnostics);

    Ok(Assembly {
        bytecode,
        diagnostics: diagnostics.into_iter().map(Diagnostic::into_error).collect(),
    })
}

/// Assemble a full source string into bytecode.
///
/// Returns `Err` only on a fatal error (invalid register). Recoverable
/// errors are collected in [`Assembly::diagnostics`].
pub fn assemble_source(source: &str) -> Result<Assembly, VMError> {
    assemble_source_with_name(source, "<source>")
}

/// Convenience: assemble directly from file path
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<Assembly, VMError> {
    let path_ref = path.as_ref();
    let source = fs::read_to_string(path_ref).map_err(|e| VMError::IoError {
        path: path_ref.display().to_string(),
        source: e.to_string(),
    })?;
    assemble_source_with_name(&source, &path_ref.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn texts<'a>(tokens: &[Token<'a>]) -> Vec<&'a str> {
        tokens.iter().map(|t| t.text).collect()
    }

    fn assemble_clean(source: &str) -> Vec<u8> {
        let assembly = assemble_source(source).unwrap();
        assert!(assembly.diagnostics.is_empty(), "{:?}", assembly.diagnostics);
        assembly.bytecode
    }

    fn load(reg: u8, value: u64) -> Vec<u8> {
        let mut out = vec![Instruction::Load.opcode(), reg];
        out.extend_from_slice(&value.to_le_bytes());
        out
    }

    // ==================== Tokenizer ====================

    #[test]
    fn tokenize_splits_on_whitespace_and_commas() {
        let tokens = tokenize("  ADD R2,R0 ,  R1");
        assert_eq!(texts(&tokens), ["ADD", "R2", "R0", "R1"]);
        assert_eq!(tokens[0].offset, 3);
        assert_eq!(tokens[1].offset, 7);
        assert_eq!(tokens[2].offset, 10);
    }

    #[test]
    fn tokenize_strips_both_comment_styles() {
        assert_eq!(texts(&tokenize("INC R0 ; bump")), ["INC", "R0"]);
        assert_eq!(texts(&tokenize("INC R0 # bump")), ["INC", "R0"]);
        assert_eq!(texts(&tokenize("INC R0;bump")), ["INC", "R0"]);
        assert!(tokenize("; only a comment").is_empty());
        assert!(tokenize("   \t ").is_empty());
    }

    // ==================== Operands ====================

    #[test]
    fn parse_reg_valid() {
        assert_eq!(parse_reg("R0").unwrap(), 0);
        assert_eq!(parse_reg("r7").unwrap(), 7);
        assert_eq!(parse_reg("R05").unwrap(), 5);
    }

    #[test]
    fn parse_reg_invalid() {
        for tok in ["R8", "R", "X1", "R-1", "R+1", "5", "R256", "loop"] {
            assert!(
                matches!(parse_reg(tok), Err(VMError::InvalidRegister { token }) if token == tok),
                "{tok}"
            );
        }
    }

    #[test]
    fn parse_number_formats() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("0x2A"), Some(42));
        assert_eq!(parse_number("0X2a"), Some(42));
        assert_eq!(parse_number("0b101010"), Some(42));
        assert_eq!(parse_number("-1"), Some(u64::MAX));
        assert_eq!(parse_number("-9223372036854775808"), Some(1 << 63));
        assert_eq!(parse_number("18446744073709551615"), Some(u64::MAX));
    }

    #[test]
    fn parse_number_rejects_garbage() {
        for tok in ["", "0x", "0b2", "abc", "+5", "0x+5", "18446744073709551616", "-0x1", "1.5"] {
            assert_eq!(parse_number(tok), None, "{tok}");
        }
    }

    #[test]
    fn label_names() {
        assert!(is_label_name("loop"));
        assert!(is_label_name("_start2"));
        assert!(!is_label_name("2nd"));
        assert!(!is_label_name("a-b"));
        assert!(!is_label_name(""));
        assert!(is_label_def("loop:"));
        assert!(!is_label_def(":"));
        assert!(!is_label_def("loop"));
    }

    // ==================== Encoding ====================

    #[test]
    fn assemble_empty_source() {
        assert_eq!(assemble_source("").unwrap(), Assembly::default());
        assert!(assemble_clean("\n  ; comment\n# another\n\n").is_empty());
    }

    #[test]
    fn assemble_load() {
        assert_eq!(assemble_clean("LOAD R0, 5"), load(0, 5));
    }

    #[test]
    fn assemble_three_register() {
        assert_eq!(assemble_clean("ADD R2, R0, R1"), [5, 2, 0, 1]);
        assert_eq!(assemble_clean("add r2 r0 r1"), [5, 2, 0, 1]);
    }

    #[test]
    fn assemble_aliases() {
        assert_eq!(assemble_clean("LD R1, 1"), assemble_clean("LOAD R1, 1"));
        assert_eq!(assemble_clean("JNZ R0 R1"), assemble_clean("JUMP_IF_NZ R0, R1"));
        assert_eq!(assemble_clean("hlt"), [0]);
    }

    #[test]
    fn assemble_word_operands() {
        assert_eq!(
            assemble_clean("STORE_ADDR R3, 0x100"),
            [3, 3, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(assemble_clean("LOAD R0, -1"), load(0, u64::MAX));
    }

    #[test]
    fn assemble_every_instruction_size() {
        for instr in Instruction::ALL {
            let mut line = instr.mnemonic().to_string();
            for kind in instr.operands() {
                line.push_str(match kind {
                    OperandKind::Reg => " R1",
                    OperandKind::Word => " 7",
                });
            }
            let bytes = assemble_clean(&line);
            assert_eq!(bytes.len(), instr.size(), "{line}");
            assert_eq!(bytes[0], instr.opcode());
        }
    }

    // ==================== Labels ====================

    #[test]
    fn labels_resolve_to_absolute_offsets() {
        let bytes = assemble_clean(
            "start:
             LOAD R1, end
             INC R0
             LOAD R2, start
             end:",
        );
        let mut expected = load(1, 22);
        expected.extend_from_slice(&[9, 0]);
        expected.extend(load(2, 0));
        assert_eq!(bytes, expected);
    }

    #[test]
    fn label_shares_line_with_instruction() {
        let bytes = assemble_clean("INC R0\nbody: INC R1\nLOAD R2, body");
        assert_eq!(&bytes[..4], &[9, 0, 9, 1]);
        assert_eq!(&bytes[4..], load(2, 2).as_slice());
    }

    #[test]
    fn labels_are_case_sensitive() {
        let assembly = assemble_source("Top:\nLOAD R0, top").unwrap();
        assert!(assembly.bytecode.is_empty());
        assert_eq!(assembly.diagnostics.len(), 1);
    }

    // ==================== Diagnostics ====================

    #[test]
    fn unknown_mnemonic_skips_line() {
        let assembly = assemble_source("FOO R1\nINC R0").unwrap();
        assert_eq!(assembly.bytecode, [9, 0]);
        assert_eq!(
            assembly.diagnostics,
            [VMError::AssemblyError {
                line: 1,
                offset: 1,
                source: "unknown instruction 'FOO'".to_string(),
            }]
        );
    }

    #[test]
    fn arity_mismatch_skips_line() {
        let assembly = assemble_source("ADD R0, R1\nINC R0").unwrap();
        assert_eq!(assembly.bytecode, [9, 0]);
        assert!(matches!(
            &assembly.diagnostics[..],
            [VMError::AssemblyError { line: 1, source, .. }]
                if source == "operand count mismatch: ADD expects 3, got 2"
        ));
    }

    #[test]
    fn bad_immediate_skips_line() {
        let assembly = assemble_source("LOAD R0, 12abc\nLOAD R1, R2\nINC R0").unwrap();
        assert_eq!(assembly.bytecode, [9, 0]);
        assert_eq!(assembly.diagnostics.len(), 2);
        assert!(matches!(
            &assembly.diagnostics[1],
            VMError::AssemblyError { line: 2, offset: 10, source }
                if source.contains("got register 'R2'")
        ));
    }

    #[test]
    fn undefined_label_does_not_shift_layout() {
        let assembly = assemble_source(
            "LOAD R0, nowhere
             end:
             LOAD R1, end",
        )
        .unwrap();
        assert_eq!(assembly.bytecode, load(1, 0));
        assert!(matches!(
            &assembly.diagnostics[..],
            [VMError::AssemblyError { line: 1, source, .. }]
                if source == "undefined label 'nowhere'"
        ));
    }

    #[test]
    fn duplicate_label_keeps_first() {
        let assembly = assemble_source("a:\nINC R0\na:\nLOAD R1, a").unwrap();
        assert_eq!(&assembly.bytecode[2..], load(1, 0).as_slice());
        assert!(matches!(
            &assembly.diagnostics[..],
            [VMError::AssemblyError { line: 3, source, .. }] if source == "duplicate label 'a'"
        ));
    }

    #[test]
    fn invalid_label_definition() {
        let assembly = assemble_source("9lives: INC R0").unwrap();
        assert_eq!(assembly.bytecode, [9, 0]);
        assert_eq!(assembly.diagnostics.len(), 1);
    }

    #[test]
    fn invalid_register_is_fatal() {
        let err = assemble_source("INC R0\nINC R8\nINC R1").unwrap_err();
        assert_eq!(
            err,
            VMError::AssemblyError {
                line: 2,
                offset: 5,
                source: "invalid register 'R8'".to_string(),
            }
        );
    }

    #[test]
    fn non_register_where_register_expected_is_fatal() {
        assert!(matches!(
            assemble_source("MOVE R0, 5"),
            Err(VMError::AssemblyError { line: 1, offset: 10, .. })
        ));
    }

    #[test]
    fn render_diagnostic() {
        let source = "INC R0\nFOO R1\n";
        let rendered = render_assembly_diagnostic("prog.asm", source, 2, 1, "unknown instruction 'FOO'");
        assert_eq!(
            rendered,
            "unknown instruction 'FOO'\n --> prog.asm:2:1\n     |\n   2 | FOO R1\n     | ^"
        );
    }

    // ==================== Files ====================

    #[test]
    fn assemble_file_reads_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "LOAD R0, 5\nPRINT R0").unwrap();
        let assembly = assemble_file(file.path()).unwrap();
        let mut expected = load(0, 5);
        expected.extend_from_slice(&[Instruction::Print.opcode(), 0]);
        assert_eq!(assembly.bytecode, expected);
    }

    #[test]
    fn assemble_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.asm");
        assert!(matches!(
            assemble_file(&path),
            Err(VMError::IoError { .. })
        ));
    }
}
