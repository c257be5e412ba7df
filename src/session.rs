//! Front-end driver: scan → parse → resolve → interpret.
//!
//! A [`Session`] owns one interpreter, so globals survive across successive
//! [`Session::run`] calls (the REPL runs each line this way).  Static
//! diagnostics from every phase are gathered in a [`Diagnostics`] value owned
//! by the run; evaluation starts only if it stays empty.

use std::fmt;
use std::io::Write;

use log::{debug, info};

use crate::ast::{Expr, Stmt};
use crate::error::{Diagnostics, LoxError};
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::resolver::{DistanceTable, Resolver};
use crate::scanner::Scanner;
use crate::value::Value;

/// Command-line usage error.
pub const EXIT_USAGE: i32 = 64;
/// Lexical, syntax, or resolution errors.
pub const EXIT_STATIC: i32 = 65;
/// Runtime error.
pub const EXIT_RUNTIME: i32 = 70;

/// Why a run did not complete.
#[derive(Debug)]
pub enum RunError {
    /// Errors found before evaluation.  Nothing was executed.
    Static(Vec<LoxError>),
    /// The first runtime error.  Statements before it have taken effect.
    Runtime(LoxError),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Static(_) => EXIT_STATIC,
            RunError::Runtime(_) => EXIT_RUNTIME,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Static(errors) => {
                for (i, error) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", error)?;
                }
                Ok(())
            }
            RunError::Runtime(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for RunError {}

impl From<Diagnostics> for RunError {
    fn from(diagnostics: Diagnostics) -> Self {
        RunError::Static(diagnostics.into_vec())
    }
}

pub struct Session {
    interpreter: Interpreter,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A session printing to stdout.
    pub fn new() -> Self {
        Self {
            interpreter: Interpreter::new(),
        }
    }

    /// A session printing to `out`.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        Self {
            interpreter: Interpreter::with_output(out),
        }
    }

    /// Scan, parse and resolve `source` without running it.
    pub fn check(source: &str) -> Result<(Vec<Stmt>, DistanceTable), RunError> {
        let mut diagnostics = Diagnostics::new();
        let statements = parse_program(source, &mut diagnostics);

        if diagnostics.has_errors() {
            info!(
                "Stopping before resolution: {} static error(s)",
                diagnostics.len()
            );
            for error in diagnostics.iter() {
                debug!("Static error: {}", error);
            }
            return Err(diagnostics.into());
        }

        let table = Resolver::new()
            .resolve(&statements)
            .map_err(RunError::Static)?;

        Ok((statements, table))
    }

    /// Run a whole program against this session's interpreter.
    pub fn run(&mut self, source: &str) -> Result<(), RunError> {
        info!("Running program of {} bytes", source.len());

        let (statements, table) = Self::check(source)?;

        self.interpreter.load_distances(table);
        self.interpreter
            .interpret(&statements)
            .map_err(RunError::Runtime)
    }

    /// Evaluate a single expression.
    pub fn evaluate(&mut self, source: &str) -> Result<Value, RunError> {
        let mut diagnostics = Diagnostics::new();
        let tokens = Scanner::new(source).scan_all(&mut diagnostics);
        let expr = Parser::new(&tokens).parse_expression(&mut diagnostics);

        let expr: Expr = match expr {
            Some(expr) if !diagnostics.has_errors() => expr,
            _ => return Err(diagnostics.into()),
        };

        let table = Resolver::new()
            .resolve_expression(&expr)
            .map_err(RunError::Static)?;
        self.interpreter.load_distances(table);

        debug!("Evaluating standalone expression");
        self.interpreter
            .evaluate(&expr)
            .map_err(RunError::Runtime)
    }
}

/// Check that raw file contents are UTF-8 before scanning them.
pub fn decode_source(bytes: &[u8]) -> crate::error::Result<&str> {
    Ok(std::str::from_utf8(bytes)?)
}

/// Scan and parse `source`, pushing every lexical and syntax error.
pub fn parse_program(source: &str, diagnostics: &mut Diagnostics) -> Vec<Stmt> {
    let tokens = Scanner::new(source).scan_all(diagnostics);
    Parser::new(&tokens).parse(diagnostics)
}
