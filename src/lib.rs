//! A tree-walking interpreter for a dialect of the Lox language.
//!
//! See [Crafting Interpreters](https://craftinginterpreters.com/).  On top of the book's Lox
//! the dialect has lists, lambdas, getters, class methods, the comma, ternary and postfix
//! `++`/`--` operators, `break`, and `print` as a function.
//!
//! # Examples
//!
//! See [`crate::interpreter::Interpreter`].
//!
//! The stages can also be driven one at a time:
//!
//! ```
//! use treelox::{parse, resolve, scan, Context, Diagnostics, Evaluator};
//!
//! let ctx = Context::new();
//! let mut diags = Diagnostics::new();
//! let tokens = scan("print(1 + 2);", &ctx, &mut diags);
//! let program = parse(&tokens, &ctx, &mut diags).unwrap_or_default();
//! let resolutions = resolve(&program, &ctx, &mut diags);
//! assert!(diags.is_empty());
//!
//! let mut output: Vec<u8> = Vec::new();
//! let mut evaluator = Evaluator::new(&mut output, ctx);
//! evaluator.interpret(&program, resolutions)?;
//! assert_eq!(output, b"3\n");
//! # Ok::<(), treelox::RuntimeError>(())
//! ```
//!
//! # Limitations
//!
//! - The parser does not attempt any error recovery.  It bails out on the first structural
//! error.
//! - Memory allocated by a program is only reclaimed when its interpreter is dropped.

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod interpreter;

pub mod ast;
pub mod ctx;
pub mod diag;
pub mod eval;
pub mod heap;
pub mod interner;
mod natives;
pub mod parser;
pub mod resolver;
pub mod scanner;
mod stack;
pub mod token;
pub mod value;

pub use crate::ctx::Context;
pub use crate::diag::Diagnostics;
pub use crate::eval::{Evaluator, RuntimeError};
pub use crate::interpreter::{Interpreter, LoxError};
pub use crate::parser::parse;
pub use crate::resolver::{resolve, Resolutions};
pub use crate::scanner::scan;
