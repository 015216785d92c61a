//! Static diagnostics: lexical, syntax and resolution errors.
//!
//! Each front-end stage pushes into a [`Diagnostics`] collector instead of bailing out, and the
//! host inspects the collector after the stage to decide whether the program may run.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::token::Token;

/// Line number (starting at one).
pub type Position = u32;

#[derive(Debug, PartialEq, Clone, Error)]
pub enum StaticError {
    // Scanner
    #[error("Unexpected character.")]
    BadChar(char),
    #[error("Unterminated string.")]
    UnterminatedString,
    #[error("Unterminated block comment.")]
    UnterminatedComment,
    #[error("Numeric literal cannot abut an identifier character.")]
    NumberAbutsIdentifier,
    #[error("A '.' in a numeric literal must be followed by a digit.")]
    DanglingDecimalPoint,

    // Parser
    #[error("{0}")]
    Expected(&'static str),
    #[error("Expect expression.")]
    ExpectedExpression,
    #[error("Invalid assignment target.")]
    InvalidAssignmentTarget,
    #[error("Can only increment variables, fields, and list elements.")]
    InvalidIncrementTarget,
    #[error("Can't have more than 255 parameters.")]
    TooManyParameters,
    #[error("Can't have more than 255 arguments.")]
    TooManyArguments,
    #[error("Can't have multiple parameters with the same name.")]
    DuplicateParameter,
    #[error("Can't have more than one method with the same name.")]
    DuplicateMethod,
    #[error("Unary '{0}' expressions are not supported.")]
    UnsupportedUnary(String),
    #[error("Expect variable declaration, expression or ';' after '('.")]
    BadForInitializer,

    // Resolver
    #[error("Already a variable with this name in this scope.")]
    Redeclaration,
    #[error("Can't read local variable in its own initializer.")]
    SelfInitializer,
    #[error("Can't return from top-level code.")]
    ReturnOutsideFunction,
    #[error("Can't return a value from an initializer.")]
    ReturnValueFromInit,
    #[error("Can't use 'this' outside of a class.")]
    ThisOutsideClass,
    #[error("Can't use 'super' outside of a class.")]
    SuperOutsideClass,
    #[error("Can't use 'super' in a class with no superclass.")]
    SuperWithoutSuperclass,
    #[error("Can't use 'super' in a class method.")]
    SuperInClassMethod,
    #[error("A class can't inherit from itself.")]
    SelfInheritance,
    #[error("Local variable '{0}' is never read.")]
    UnusedVariable(String),
}

/// Where on its line a diagnostic points.
#[derive(Debug, PartialEq, Clone)]
pub enum Location {
    /// Scanner errors have no token to point at.
    Line,
    AtEnd,
    At(Rc<str>),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Line => Ok(()),
            Location::AtEnd => write!(f, " at end"),
            Location::At(lexeme) => write!(f, " at '{}'", lexeme),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Diagnostic {
    pub line: Position,
    pub location: Location,
    pub error: StaticError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error{}: {}", self.line, self.location, self.error)
    }
}

/// Collector threaded through scanning, parsing and resolution.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    /// Report an error that is only known by line (scanner errors).
    pub fn error_at_line(&mut self, line: Position, error: StaticError) {
        tracing::trace!(line, %error, "static error");
        self.items.push(Diagnostic {
            line,
            location: Location::Line,
            error,
        });
    }

    /// Report an error pointing at `token`.
    pub fn error_at(&mut self, token: &Token, error: StaticError) {
        tracing::trace!(line = token.line, %error, "static error");
        let location = if token.is_eof() {
            Location::AtEnd
        } else {
            Location::At(token.lexeme.clone())
        };
        self.items.push(Diagnostic {
            line: token.line,
            location,
            error,
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Just the error kinds, in report order.
    pub fn errors(&self) -> Vec<StaticError> {
        self.items.iter().map(|d| d.error.clone()).collect()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.items.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}
