use std::collections::HashMap;

use crate::ast::fields::{AttributePolicy, InternalField, Prefix, WhereField};
use crate::ast::query::Instruction;
use crate::ast::tokens::{Pos, Token};

/// Ambient back-end binding installed by `connect(...)`.
///
/// The most recent connect is inherited by every following instruction until
/// replaced. The token is opaque and passed through to the generators.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectStatement {
    pub connect_type: String,
    pub api: String,
    pub token: String,
    pub pos: Pos,
}

/// Time bound of the form `last(1h)` or `last(100)`.
///
/// `options` holds the optional `shift`/`timestamp`/`date` refinements keyed
/// by their prefix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LastStatement {
    pub last: String,
    pub is_duration: bool,
    /// Token kind of the main value, used for native-variable bounds.
    pub last_type: Token,
    pub options: HashMap<Prefix, InternalField>,
    pub pos: Pos,
}

/// Time bound of the form `from(start[, end])`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FromStatement {
    pub from: InternalField,
    pub to: Option<InternalField>,
    pub pos: Pos,
}

/// One chained method call on a select, e.g. `rate(1s)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameworkStatement {
    pub operator: Token,
    pub attributes: HashMap<Prefix, InternalField>,
    pub unnamed: Vec<InternalField>,
    pub pos: Pos,
}

impl FrameworkStatement {
    pub fn new(operator: Token, pos: Pos) -> Self {
        FrameworkStatement {
            operator,
            pos,
            ..Default::default()
        }
    }
}

/// A `select(...)` and everything chained onto it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    pub metric: String,
    /// Token kind of the metric name (`Str`, `NativeVariable`).
    pub metric_type: Token,
    pub select_all: bool,
    pub where_clauses: Vec<WhereField>,
    pub last: Option<LastStatement>,
    pub from: Option<FromStatement>,
    /// Set once a time bound was parsed; a second `from`/`last` is rejected.
    pub time_set: bool,
    pub frameworks: Vec<FrameworkStatement>,
    pub has_rate: bool,
    pub attribute_policy: AttributePolicy,
    pub pos: Pos,
}

/// Synthetic series construction: `create(series(...), ...)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateStatement {
    pub series: Vec<CreateSeries>,
    pub pos: Pos,
}

/// One synthetic series with its labels and data points.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateSeries {
    pub metric: String,
    pub select_all: bool,
    pub where_clauses: Vec<WhereField>,
    pub values: Vec<DataPoint>,
    /// Optional end tick the point ticks are relative to (`now` allowed).
    pub end: Option<InternalField>,
}

/// One `[tick, value]` pair of a created series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataPoint {
    pub tick: InternalField,
    pub value: InternalField,
}

/// Recursive combinator over several instructions, e.g.
/// `add(select(...), select(...)).on("host")`.
///
/// `labels` (from `on`) and `ignoring` are mutually exclusive; a group
/// direction requires one of them and its labels must not overlap the `on`
/// set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GlobalOperator {
    pub operator: Token,
    pub instructions: Vec<Instruction>,
    pub labels: Vec<String>,
    pub ignoring: Vec<String>,
    pub is_on: bool,
    pub is_ignoring: bool,
    pub group: Option<InternalField>,
    pub group_labels: Vec<String>,
    pub pos: Pos,
}

/// Named binding produced by `name = <expr>` at the top level.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
}

/// Payload of a variable binding.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableKind {
    /// Scalar literal: string, number, duration or boolean.
    Scalar { tok: Token, lit: String },
    /// Bracketed list literal, composable with `.add(...)`/`.remove(...)`.
    List(Vec<InternalField>),
    /// Captured bare select (no frameworks yet).
    Select(Box<Instruction>),
    /// Captured select carrying frameworks.
    GtsList(Box<Instruction>),
    /// Captured global operator expression.
    Operator(Box<Instruction>),
}

impl Variable {
    /// Token tag used when matching the variable against a field type.
    pub fn type_token(&self) -> Token {
        match &self.kind {
            VariableKind::Scalar { tok, .. } => *tok,
            VariableKind::List(_) => Token::InternalList,
            VariableKind::Select(_) => Token::Select,
            VariableKind::GtsList(_) => Token::GtsList,
            VariableKind::Operator(_) => Token::MultipleSeriesOperator,
        }
    }

    /// Literal payload for scalar variables, empty otherwise.
    pub fn lit(&self) -> &str {
        match &self.kind {
            VariableKind::Scalar { lit, .. } => lit,
            _ => "",
        }
    }
}
