pub mod ast;
pub mod cli;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod promql;
pub mod warpscript;

pub use ast::{Instruction, InstructionKind, Query, Token};
pub use error::Error;
pub use lexer::Lexer;
pub use parser::Parser;
pub use promql::{PromQlGenerator, Ql};
pub use warpscript::WarpScriptGenerator;
