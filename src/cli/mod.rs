//! CLI support for tsl-lang
//!
//! Provides programmatic access to the compile driver for embedding in
//! other tools and for the `tsl` binary.

mod check;

pub use check::{execute_check, CheckOptions, CheckResult, Dialect};

use std::io;

/// Errors that can occur during CLI operations
#[derive(Debug)]
pub enum CliError {
    /// Compilation error (parser or generator)
    Compile(crate::Error),
    /// IO error
    Io(io::Error),
    /// No query provided
    NoInput,
    /// Unknown target dialect
    UnknownDialect(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Compile(e) => write!(f, "Compile error: {}", e),
            CliError::Io(e) => write!(f, "IO error: {}", e),
            CliError::NoInput => {
                write!(f, "No query provided. Pass one as argument or pipe it to stdin.")
            }
            CliError::UnknownDialect(d) => {
                write!(
                    f,
                    "Unknown dialect: '{}'\nExpected 'warp10' or 'prometheus'.",
                    d
                )
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Compile(e) => Some(e),
            CliError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<crate::Error> for CliError {
    fn from(e: crate::Error) -> Self {
        CliError::Compile(e)
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e)
    }
}
