//! Bytecode runner.
//!
//! Loads a program image, runs it on a fresh VM and reports how it ended.
//!
//! # Usage
//! ```text
//! rvm <program.bin> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `program.bin`: Bytecode image produced by the assembler
//!
//! # Options
//! - `--memory <bytes>`: Memory capacity (defaults to `0xFFFF`)
//! - `--max-steps <n>`: Stop after `n` instructions
//! - `--trace`: Log every executed instruction
//! - `--hex`: Print a hex dump of the program before running it
//! - `--dump-memory <file>`: Write the final memory image to `file`
//!
//! Without arguments the usage text is printed and the exit code is 0.

use rvm::utils::log::{self, Level};
use rvm::virtual_machine::program::Program;
use rvm::virtual_machine::trap::StdConsole;
use rvm::virtual_machine::vm::{Status, VM, VmConfig};
use rvm::{error, info, warn};
use std::env;
use std::fs;
use std::process;
use std::time::Instant;

fn main() {
    let args: Vec<String> = env::args().collect();
    let program_name = args.first().map(String::as_str).unwrap_or("rvm");

    if wants_usage(&args) {
        print_usage(program_name);
        process::exit(0);
    }

    let input_path = &args[1];
    let mut config = VmConfig::default();
    let mut max_steps: Option<u64> = None;
    let mut hex = false;
    let mut dump_path: Option<String> = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--memory" | "--max-steps" | "--dump-memory") => {
                i += 1;
                let Some(value) = args.get(i) else {
                    error!("{k} requires an argument");
                    process::exit(1);
                };
                match k {
                    "--memory" => {
                        config.memory_size = parse_memory_size(value).unwrap_or_else(|| {
                            error!("Invalid memory size: '{value}'");
                            process::exit(1);
                        });
                    }
                    "--max-steps" => {
                        max_steps = Some(parse_number(value).unwrap_or_else(|| {
                            error!("Invalid step count: '{value}'");
                            process::exit(1);
                        }));
                    }
                    _ => dump_path = Some(value.clone()),
                }
                i += 1;
            }
            "--trace" => {
                log::set_max_level(Level::Trace);
                i += 1;
            }
            "--hex" => {
                hex = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {other}\n");
                print_usage(program_name);
                process::exit(1);
            }
        }
    }

    let program = Program::from_file(input_path).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(1);
    });
    info!("File size: {} bytes", program.len());

    if hex {
        println!("Hex dump:\n{}", program.hex_dump());
    }

    let mut vm = VM::with_config(program.bytecode(), &config).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(1);
    });
    let mut console = StdConsole::new();

    let start = Instant::now();
    let status = match max_steps {
        Some(limit) => vm.run_for(&mut console, limit),
        None => {
            // the fault is kept on the VM and reported below
            let _ = vm.run(&mut console);
            vm.status()
        }
    };
    let elapsed = start.elapsed();

    match status {
        Status::Halted => info!("Program halted after {} steps", vm.steps()),
        Status::Faulted => match vm.fault() {
            Some(fault) => error!("Program faulted after {} steps: {fault}", vm.steps()),
            None => error!("Program faulted after {} steps", vm.steps()),
        },
        Status::Running => warn!("Step limit reached after {} steps (pc = {})", vm.steps(), vm.pc()),
    }

    if let Some(path) = dump_path {
        if let Err(e) = fs::write(&path, vm.memory()) {
            error!("Failed to write memory dump {path}: {e}");
            process::exit(1);
        }
        info!("Wrote {} bytes of memory to {path}", vm.memory_size());
    }

    info!("Total time: {:.6} seconds", elapsed.as_secs_f64());
}

/// True when there is no input file or help was asked for.
fn wants_usage(args: &[String]) -> bool {
    args.len() < 2 || args[1] == "--help" || args[1] == "-h"
}

/// Parses a decimal or `0x` hexadecimal count.
fn parse_number(value: &str) -> Option<u64> {
    match value.strip_prefix("0x").or(value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Parses a memory capacity, rejecting values that do not fit in `usize`.
fn parse_memory_size(value: &str) -> Option<usize> {
    parse_number(value).and_then(|n| usize::try_from(n).ok())
}

const USAGE: &str = "\
Bytecode Runner

USAGE:
    {program} <program.bin> [OPTIONS]

ARGS:
    <program.bin>    Bytecode image to execute

OPTIONS:
    --memory <bytes>        Memory capacity in bytes (defaults to 0xFFFF)
    --max-steps <n>         Stop after n instructions
    --trace                 Log every executed instruction
    --hex                   Print a hex dump of the program before running
    --dump-memory <file>    Write the final memory image to file
    -h, --help              Print this help message

EXAMPLES:
    # Run a program
    {program} program.bin

    # Run with 1 KiB of memory and instruction tracing
    {program} program.bin --memory 1024 --trace
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn usage_without_input() {
        assert!(wants_usage(&args(&["rvm"])));
        assert!(wants_usage(&args(&["rvm", "-h"])));
        assert!(wants_usage(&args(&["rvm", "--help"])));
        assert!(!wants_usage(&args(&["rvm", "prog.bin"])));
    }

    #[test]
    fn parse_number_formats() {
        assert_eq!(parse_number("1024"), Some(1024));
        assert_eq!(parse_number("0xFFFF"), Some(0xFFFF));
        assert_eq!(parse_number("0X10"), Some(16));
        assert_eq!(parse_number("-1"), None);
        assert_eq!(parse_number("ten"), None);
    }

    #[test]
    fn memory_size_fits_usize() {
        assert_eq!(parse_memory_size("0x100"), Some(256));
        assert_eq!(parse_memory_size("0x"), None);
        assert_eq!(
            parse_memory_size(&u64::MAX.to_string()),
            usize::try_from(u64::MAX).ok()
        );
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn memory_size_beyond_address_space() {
        assert_eq!(parse_memory_size("0x100000000"), None);
    }
}
