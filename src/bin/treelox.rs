//! Lox interpreter command-line.
//!
//! When called without argument it drops into an interactive read-evaluate-print loop.
//!
//! When called with arguments, it interprets the corresponding files in a single interpreter
//! session (so code and data sharing is possible).
//!
//! Setting `RUST_LOG` (for instance `RUST_LOG=treelox=debug`) traces the interpreter stages on
//! stderr.

use std::env;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::process::ExitCode;

use anyhow::{self, Context};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use treelox::{Interpreter, LoxError};

/// Exit statuses, following the BSD `sysexits.h` conventions.
const EX_DATAERR: u8 = 65;
const EX_NOINPUT: u8 = 66;
const EX_SOFTWARE: u8 = 70;

fn main() -> ExitCode {
    init_tracing();

    let args = env::args().skip(1).collect::<Vec<_>>();
    let result = if args.is_empty() {
        run_prompt().map(|()| ExitCode::SUCCESS)
    } else {
        run_all_files(&args)
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EX_NOINPUT)
        }
    }
}

/// Log to stderr when `RUST_LOG` is set.
fn init_tracing() {
    if env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_level(true),
            )
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run_all_files(paths: &[String]) -> Result<ExitCode, anyhow::Error> {
    let mut interp_stdout = io::stdout();
    let mut interp = Interpreter::new(&mut interp_stdout);

    for p in paths {
        let source = fs::read_to_string(p).with_context(|| format!("failed to read {}", p))?;
        if let Err(e) = interp.eval(&source) {
            report(&e);
            return Ok(exit_code(&e));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn run_prompt() -> Result<(), anyhow::Error> {
    let stdin = io::stdin();
    let mut repl_stdout = io::stdout();
    let mut interp_stdout = io::stdout();

    let mut interp = Interpreter::new(&mut interp_stdout);

    let mut input = String::new();
    loop {
        repl_stdout.write_all(b"> ")?;
        repl_stdout.flush()?;

        input.clear();
        let nbytes = stdin
            .read_line(&mut input)
            .context("failed to read from stdin")?;
        if nbytes == 0 {
            break;
        }

        if let Err(e) = interp.eval(&input) {
            report(&e);
        }
    }

    Ok(())
}

fn report(e: &LoxError) {
    eprintln!("{}", e);
}

fn exit_code(e: &LoxError) -> ExitCode {
    match e {
        LoxError::Static(_) => ExitCode::from(EX_DATAERR),
        LoxError::Runtime(_) => ExitCode::from(EX_SOFTWARE),
    }
}
