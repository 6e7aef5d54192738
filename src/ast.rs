//! # TSL - Abstract Syntax Tree
//!
//! This module defines the typed intermediate representation shared by the
//! parser and both code generators.
//!
//! ## Architecture Overview
//!
//! The AST module is organized into focused submodules:
//!
//! - **[tokens]** - Lexical tokens, the keyword table and source positions
//! - **[fields]** - Typed method parameters, prefixes, matchers and policies
//! - **[statements]** - Select, connect, create, framework and operator nodes
//! - **[query]** - The discriminated `Instruction` and the `Query` root
//!
//! ## Core Concepts
//!
//! ### Method chains
//!
//! Every TSL instruction is a chain of method calls joined by `.`:
//!
//! ```text
//! select("sys.cpu").where("host=web01").last(1h).sampleBy(1m, "mean")
//! ```
//!
//! The parser resolves each call into a [`statements::FrameworkStatement`]
//! appended, in order, to the enclosing [`statements::SelectStatement`].
//!
//! ### Instructions
//!
//! An [`query::Instruction`] is one of: a data select, a catalogue (meta)
//! query, a synthetic series creation, or a recursive multi-series operator
//! combining sub-instructions. Each carries the ambient connect binding that
//! names its back-end.
//!
//! ### Typed parameters
//!
//! Method arguments are positional or named (`span=1m`). Both forms resolve
//! to [`fields::InternalField`] values whose token kind was checked against
//! the method's per-position type specification.

pub mod fields;
pub mod query;
pub mod statements;
pub mod tokens;

pub use fields::{AttributePolicy, FillPolicy, InternalField, MatchType, Prefix, WhereField};
pub use query::{Instruction, InstructionKind, Query};
pub use statements::{
    ConnectStatement, CreateSeries, CreateStatement, DataPoint, FrameworkStatement,
    FromStatement, GlobalOperator, LastStatement, SelectStatement, Variable, VariableKind,
};
pub use tokens::{lookup, tokstr, Pos, Token};
