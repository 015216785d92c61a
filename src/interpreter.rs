//! API to control the interpreter.

use std::io::prelude::*;
use std::rc::Rc;

use thiserror::Error;

use crate::ctx::Context;
use crate::diag::Diagnostics;
use crate::eval::{Evaluator, RuntimeError};
use crate::parser::parse;
use crate::resolver::resolve;
use crate::scanner::scan;

/// Tree-walk interpreter.
///
/// Each call to [`Interpreter::eval`] scans, parses, resolves and runs one source text.  Global
/// definitions persist from one call to the next.
///
/// # Example
///
/// Invoke the interpreter a first time to define a function then additional times to call this
/// function:
///
/// ```
/// # use treelox::interpreter::{Interpreter, LoxError};
///
/// let mut output: Vec<u8> = Vec::new();
/// let mut interp = Interpreter::new(&mut output);
///
/// let func_def = r#"
///     fun max(x, y) {
///         if (x > y) {
///             return x;
///         } else {
///             return y;
///         }
///     }
/// "#;
/// interp.eval(func_def)?;
///
/// interp.eval("print(max(10, 20));").expect("interpreter error");
/// interp.eval("print(max(5, 4));").expect("interpreter error");
///
/// assert_eq!(output, b"20\n5\n");
/// # Ok::<(), LoxError>(())
/// ```
#[derive(Debug)]
pub struct Interpreter<'t, W: Write> {
    ctx: Rc<Context>,
    evaluator: Evaluator<'t, W>,
}

/// Errors the interpreter can raise.
#[derive(Debug, Error)]
pub enum LoxError {
    /// Lexical, syntax or resolution errors.  The program did not run.
    #[error("{0}")]
    Static(Diagnostics),

    /// Error occurring during evaluation.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl<'t, W: Write> Interpreter<'t, W> {
    /// Create a new interpreter that writes the output of `print` into `output`.
    pub fn new(output: &'t mut W) -> Interpreter<'t, W> {
        let ctx = Context::new();
        Interpreter {
            ctx: ctx.clone(),
            evaluator: Evaluator::new(output, ctx),
        }
    }

    /// Run the program `source`.
    ///
    /// Nothing runs if any static error is found.
    pub fn eval(&mut self, source: &str) -> Result<(), LoxError> {
        let mut diags = Diagnostics::new();

        let tokens = scan(source, &self.ctx, &mut diags);
        if diags.has_errors() {
            return Err(LoxError::Static(diags));
        }

        let program = match parse(&tokens, &self.ctx, &mut diags) {
            Some(program) if !diags.has_errors() => program,
            _ => return Err(LoxError::Static(diags)),
        };

        let resolutions = resolve(&program, &self.ctx, &mut diags);
        if diags.has_errors() {
            return Err(LoxError::Static(diags));
        }

        self.evaluator.interpret(&program, resolutions)?;
        Ok(())
    }
}
