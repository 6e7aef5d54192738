use crate::ast::Pos;

/// Positional compilation error shared by the parser and both generators.
///
/// Line numbers are reported one-based and shifted by the caller-supplied
/// `line_start` so errors align with the host's larger document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub message: String,
}

impl Error {
    /// Error raised while parsing the TSL source.
    pub fn parse(message: impl AsRef<str>, pos: Pos, line_start: i64) -> Self {
        Error {
            message: format!(
                "Cannot parse query: {} at line {}, char {}",
                message.as_ref(),
                pos.line as i64 + 1 - line_start,
                pos.character + 1
            ),
        }
    }

    /// Error raised while lowering to a back-end dialect.
    pub fn backend(name: &str, message: impl AsRef<str>, pos: Pos, line_start: i64) -> Self {
        Error {
            message: format!(
                "Cannot execute query on {} back-end: {} at line {}, char {}",
                name,
                message.as_ref(),
                pos.line as i64 + 1 - line_start,
                pos.character + 1
            ),
        }
    }

    /// Error without a source position (entry-point validation).
    pub fn raw(message: impl Into<String>) -> Self {
        Error {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}
