//! Compile TSL queries to a native back-end dialect

use super::CliError;
use crate::promql::{PromQlGenerator, Ql};
use crate::warpscript::WarpScriptGenerator;
use crate::Parser;

/// Target back-end dialect of a compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Warp10,
    Prometheus,
}

impl Dialect {
    pub fn parse(value: &str) -> Result<Dialect, CliError> {
        match value {
            "warp10" => Ok(Dialect::Warp10),
            "prometheus" | "prom" => Ok(Dialect::Prometheus),
            other => Err(CliError::UnknownDialect(other.to_string())),
        }
    }
}

/// Options for the check command
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// The TSL document to compile
    pub query: String,
    /// Target dialect
    pub dialect: Dialect,
    /// Opaque back-end token
    pub token: String,
    /// Document-relative line offset used in diagnostics
    pub line_start: i64,
    /// Optional default time range ("1h" or "start[,end]")
    pub query_range: String,
    /// Optional implicit bucket count for sample()
    pub samplers: String,
    /// Native variable names the caller pre-binds
    pub variables: Vec<String>,
    /// Emit the stack authentication preamble
    pub authenticate: bool,
}

/// Result of a check operation
#[derive(Debug)]
pub enum CheckResult {
    /// One newline-separated stack program for the whole document
    WarpScript(String),
    /// One range query per instruction, in source order
    PromQl(Vec<Ql>),
}

/// Compiles a TSL document to the requested dialect.
pub fn execute_check(options: &CheckOptions) -> Result<CheckResult, CliError> {
    let mut parser = Parser::new(
        &options.query,
        "",
        &options.token,
        options.line_start,
        &options.query_range,
        &options.samplers,
        &options.variables,
    )?;

    let query = parser.parse()?;

    match options.dialect {
        Dialect::Warp10 => {
            let generator = WarpScriptGenerator::new(options.line_start);
            let warpscript = generator.generate(&query.instructions, options.authenticate)?;
            Ok(CheckResult::WarpScript(warpscript))
        }
        Dialect::Prometheus => {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let generator = PromQlGenerator::new(options.line_start);
            let mut queries = Vec::with_capacity(query.instructions.len());
            for instruction in &query.instructions {
                queries.push(generator.generate(instruction, now_ms)?);
            }
            Ok(CheckResult::PromQl(queries))
        }
    }
}
