use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ast::{
    fields::{AttributePolicy, FillPolicy, InternalField, MatchType, Prefix, WhereField},
    query::{Instruction, InstructionKind, Query},
    statements::{
        ConnectStatement, CreateSeries, CreateStatement, DataPoint, FrameworkStatement,
        FromStatement, GlobalOperator, LastStatement, SelectStatement, Variable, VariableKind,
    },
    tokens::{tokstr, Pos, Token},
};
use crate::error::Error;
use crate::lexer::{Lexer, Scanned};

/// Default implicit bucket count used by `sample(...)`.
const DEFAULT_SAMPLERS_COUNT: &str = "100";

/// Pre-seeded default time range parsed from the caller's query-range input.
#[derive(Debug, Clone, Default)]
pub struct QueryRange {
    is_last: bool,
    last_duration: String,
    from_start: Option<InternalField>,
    from_to: Option<InternalField>,
}

impl QueryRange {
    /// Parses a comma-splittable range: a single duration (default `last`)
    /// or a start and optional end, each an epoch number or RFC3339 date.
    fn parse(query_range: &str) -> Result<QueryRange, Error> {
        let mut range = QueryRange::default();

        let items: Vec<&str> = if query_range.contains(',') {
            query_range.split(',').collect()
        } else {
            vec![query_range]
        };

        for (index, item) in items.iter().enumerate() {
            let item = item.trim();
            let mut lexer = Lexer::new(item);
            let scanned = lexer.scan();

            if index == 0 && scanned.tok == Token::Duration {
                range.is_last = true;
                range.last_duration = scanned.lit;
                continue;
            }

            let field = if matches!(scanned.tok, Token::Integer | Token::Number)
                && scanned.lit == *item
            {
                let prefix = if index == 0 { Prefix::From } else { Prefix::To };
                InternalField::with_prefix(scanned.tok, item, prefix)
            } else {
                if chrono::DateTime::parse_from_rfc3339(item).is_err() {
                    return Err(Error::raw(format!(
                        "invalid query range {:?}, expects a duration, an epoch number or a valid RFC3339 date",
                        item
                    )));
                }
                let prefix = if index == 0 { Prefix::From } else { Prefix::To };
                InternalField::with_prefix(Token::Str, item, prefix)
            };

            if index == 0 {
                range.from_start = Some(field);
            } else if index == 1 {
                range.from_to = Some(field);
            }
        }
        Ok(range)
    }
}

/// Recursive-descent parser over the TSL method-chain grammar.
///
/// One parser instance compiles one document; variables and the ambient
/// connect binding live only for that compilation.
pub struct Parser {
    lexer: Lexer,
    variables: HashMap<String, Variable>,
    natives: HashSet<String>,
    line_start: i64,
    default_uri: String,
    default_token: String,
    samplers_count: String,
    query_range: Option<QueryRange>,
}

impl Parser {
    /// Creates a parser over `source`.
    ///
    /// `line_start` shifts reported line numbers so errors align with the
    /// host document. `query_range` optionally pre-seeds a default time
    /// bound, `samplers_count` overrides the implicit `sample(...)` bucket
    /// count, and `variables` lists the native names the caller pre-binds.
    pub fn new(
        source: &str,
        default_uri: &str,
        default_token: &str,
        line_start: i64,
        query_range: &str,
        samplers_count: &str,
        variables: &[String],
    ) -> Result<Parser, Error> {
        let query_range = if query_range.is_empty() {
            None
        } else {
            Some(QueryRange::parse(query_range)?)
        };

        let samplers_count = if samplers_count.is_empty() {
            DEFAULT_SAMPLERS_COUNT.to_string()
        } else {
            let mut lexer = Lexer::new(samplers_count);
            let scanned = lexer.scan();
            if scanned.tok != Token::Integer {
                return Err(Error::raw(format!(
                    "invalid samplers count {:?}, expects an integer number",
                    samplers_count
                )));
            }
            scanned.lit
        };

        Ok(Parser {
            lexer: Lexer::new(source),
            variables: HashMap::new(),
            natives: variables
                .iter()
                .filter(|name| !name.is_empty())
                .cloned()
                .collect(),
            line_start,
            default_uri: default_uri.to_string(),
            default_token: default_token.to_string(),
            samplers_count,
            query_range,
        })
    }

    fn scan(&mut self) -> Scanned {
        self.lexer.scan()
    }

    fn scan_ignore_whitespace(&mut self) -> Scanned {
        loop {
            let scanned = self.lexer.scan();
            if matches!(scanned.tok, Token::Ws | Token::Comment) {
                continue;
            }
            return scanned;
        }
    }

    fn scan_ignore_dot(&mut self) -> Scanned {
        loop {
            let scanned = self.lexer.scan();
            if scanned.tok == Token::Dot {
                continue;
            }
            return scanned;
        }
    }

    fn unscan(&mut self) {
        self.lexer.unscan();
    }

    fn tsl_error(&self, message: impl AsRef<str>, pos: Pos) -> Error {
        Error::parse(message, pos, self.line_start)
    }

    //
    // Instruction parsing
    //

    /// Parses the whole document into a [`Query`].
    pub fn parse(&mut self) -> Result<Query, Error> {
        debug!("parsing TSL document");
        let mut instructions = Vec::new();
        let mut connect = ConnectStatement {
            connect_type: String::new(),
            api: self.default_uri.clone(),
            token: self.default_token.clone(),
            pos: Pos::default(),
        };

        loop {
            let scanned = self.scan_ignore_whitespace();
            if scanned.tok == Token::Eof {
                return Ok(Query { instructions });
            }
            self.unscan();

            let (instruction, new_connect) = self.parse_statement(&connect, false, false)?;
            connect = new_connect;
            if let Some(instruction) = instruction {
                instructions.push(instruction);
            }
        }
    }

    /// Parses one instruction. Returns the parsed instruction (None when the
    /// statement only updated the ambient connect or declared a variable)
    /// and the connect binding to carry forward.
    fn parse_statement(
        &mut self,
        old_connect: &ConnectStatement,
        intern_call: bool,
        load_variable: bool,
    ) -> Result<(Option<Instruction>, ConnectStatement), Error> {
        let mut connect = old_connect.clone();
        let mut new_connect = old_connect.clone();
        let mut instruction: Option<Instruction> = None;

        loop {
            let scanned = self.scan_ignore_dot();

            match scanned.tok {
                Token::Create => {
                    let mut instr = self.parse_create(scanned.pos, &connect)?;
                    self.parse_frameworks(&mut instr, intern_call)?;
                    instruction = Some(instr);
                    break;
                }

                Token::Select => {
                    let select = self.parse_select(scanned.pos)?;
                    let mut instr = Instruction::new(
                        connect.clone(),
                        InstructionKind::Select(select),
                        scanned.pos,
                    );
                    self.parse_post_select(&mut instr, intern_call)?;
                    instruction = Some(instr);
                    break;
                }

                Token::Connect => {
                    if load_variable {
                        return Err(self.tsl_error(
                            format!(
                                "Function {:?} isn't allowed when declaring a variable",
                                Token::Connect.as_str()
                            ),
                            scanned.pos,
                        ));
                    }
                    if intern_call {
                        return Err(self.tsl_error(
                            format!(
                                "Function {:?} isn't allowed in an operator",
                                Token::Connect.as_str()
                            ),
                            scanned.pos,
                        ));
                    }
                    connect = self.parse_connect(scanned.pos)?;
                    new_connect = connect.clone();
                }

                Token::AddSeries
                | Token::AndL
                | Token::DivSeries
                | Token::Equal
                | Token::GreaterOrEqual
                | Token::GreaterThan
                | Token::LessOrEqual
                | Token::LessThan
                | Token::MulSeries
                | Token::NotEqual
                | Token::OrL
                | Token::SubSeries => {
                    let mut instr =
                        self.parse_global_series_op(scanned.tok, scanned.pos, &connect, -1, load_variable)?;
                    self.parse_post_operator(&mut instr, intern_call)?;
                    instruction = Some(instr);
                    break;
                }

                Token::Mask | Token::NegMask => {
                    let mut instr =
                        self.parse_global_series_op(scanned.tok, scanned.pos, &connect, 2, load_variable)?;
                    self.parse_post_operator(&mut instr, intern_call)?;
                    instruction = Some(instr);
                    break;
                }

                // An identifier starts either a variable declaration or a
                // reference to a previously declared one.
                Token::Ident => {
                    let next = self.scan_ignore_whitespace();

                    if next.tok != Token::Eq {
                        self.unscan();
                        let instr =
                            self.parse_post_variables(scanned.pos, &scanned.lit, &connect, false)?;
                        instruction = Some(instr);
                        break;
                    }

                    if load_variable {
                        return Err(self.tsl_error(
                            "A variable cannot be declared inside a variable",
                            scanned.pos,
                        ));
                    }
                    if intern_call {
                        return Err(self.tsl_error(
                            "Cannot declare a variable inside an operator",
                            scanned.pos,
                        ));
                    }

                    let next = self.scan_ignore_whitespace();
                    let variable =
                        self.parse_variable_dec(next.tok, next.pos, &next.lit, &scanned.lit)?;
                    self.variables.insert(scanned.lit.clone(), variable);
                    break;
                }

                // Stay in the instruction as long as the next word starts
                // with a DOT.
                Token::Ws | Token::Comment => {
                    let next = self.scan_ignore_whitespace();
                    if next.tok != Token::Dot {
                        self.unscan();
                        break;
                    }
                }

                Token::Eof => break,

                Token::Comma | Token::RParen => {
                    if intern_call {
                        self.unscan();
                        break;
                    }
                    return Err(self.tsl_error(
                        "Unexpected reserved keyword to start instruction",
                        scanned.pos,
                    ));
                }

                _ => {
                    debug!(token = %scanned.tok, lit = %scanned.lit, "unexpected instruction head");
                    return Err(self.tsl_error(
                        "Unexpected reserved keyword to start instruction",
                        scanned.pos,
                    ));
                }
            }
        }

        Ok((instruction, new_connect))
    }

    /// Splices a referenced variable into the current statement, inheriting
    /// the ambient connect, and keeps parsing its post-methods.
    fn parse_post_variables(
        &mut self,
        pos: Pos,
        lit: &str,
        connect: &ConnectStatement,
        intern_call: bool,
    ) -> Result<Instruction, Error> {
        let Some(variable) = self.variables.get(lit) else {
            return Err(self.tsl_error(format!("Variable {:?} doesn't exists", lit), pos));
        };

        let mut instruction = match &variable.kind {
            VariableKind::Select(instr)
            | VariableKind::GtsList(instr)
            | VariableKind::Operator(instr) => instr.as_ref().clone(),
            VariableKind::Scalar { .. } | VariableKind::List(_) => {
                return Err(self.tsl_error(
                    format!("Variable {:?} cannot be used as an instruction", lit),
                    pos,
                ));
            }
        };
        let kind = variable.type_token();

        instruction.set_connect(connect);

        let next = self.scan_ignore_whitespace();
        self.unscan();

        if next.tok == Token::Dot {
            match kind {
                Token::Select => self.parse_post_select(&mut instruction, intern_call)?,
                Token::GtsList => self.parse_frameworks(&mut instruction, intern_call)?,
                Token::MultipleSeriesOperator => {
                    self.parse_post_operator(&mut instruction, intern_call)?
                }
                _ => {}
            }
        }

        Ok(instruction)
    }

    /// Parses the right-hand side of a `name = <expr>` declaration.
    fn parse_variable_dec(
        &mut self,
        tok: Token,
        pos: Pos,
        lit: &str,
        name: &str,
    ) -> Result<Variable, Error> {
        match tok {
            Token::LBracket => {
                let field_list = self.parse_internal_field_list(&format!("Variable {}", name))?;
                Ok(Variable {
                    name: name.to_string(),
                    kind: VariableKind::List(field_list),
                })
            }
            Token::Str
            | Token::Integer
            | Token::Number
            | Token::Duration
            | Token::True
            | Token::False
            | Token::NegInteger
            | Token::NegNumber => Ok(Variable {
                name: name.to_string(),
                kind: VariableKind::Scalar {
                    tok,
                    lit: lit.to_string(),
                },
            }),
            _ => {
                self.unscan();
                let (instruction, _) =
                    self.parse_statement(&ConnectStatement::default(), true, true)?;

                let Some(instruction) = instruction else {
                    return Err(self.tsl_error("Unvalid variable type", pos));
                };

                let kind = match &instruction.kind {
                    InstructionKind::Select(select) | InstructionKind::Meta(select) => {
                        if select.frameworks.is_empty() {
                            VariableKind::Select(Box::new(instruction))
                        } else {
                            VariableKind::GtsList(Box::new(instruction))
                        }
                    }
                    InstructionKind::Create { .. } => {
                        VariableKind::GtsList(Box::new(instruction))
                    }
                    InstructionKind::Operator { .. } => {
                        VariableKind::Operator(Box::new(instruction))
                    }
                };

                Ok(Variable {
                    name: name.to_string(),
                    kind,
                })
            }
        }
    }

    //
    // Post-instruction clause loops
    //

    /// Parses the clauses following a global operator: `on`, `ignoring`,
    /// `groupLeft`/`groupRight`, then the framework chain.
    fn parse_post_operator(
        &mut self,
        instruction: &mut Instruction,
        internal_call: bool,
    ) -> Result<(), Error> {
        loop {
            let scanned = self.scan_ignore_dot();

            match scanned.tok {
                Token::Ws | Token::Comment => {
                    let next = self.scan_ignore_whitespace();
                    if next.tok != Token::Dot {
                        self.unscan();
                        break;
                    }
                }

                Token::On => {
                    let operator = instruction.operator_mut().expect("operator instruction");
                    if operator.is_ignoring {
                        return Err(self.tsl_error(
                            format!(
                                "Conflict with function {:?}, can't be applied with ignoring function",
                                scanned.tok.as_str()
                            ),
                            scanned.pos,
                        ));
                    }
                    self.parse_on_labels(scanned.tok, scanned.pos, instruction)?;
                }

                Token::Ignoring => {
                    let operator = instruction.operator_mut().expect("operator instruction");
                    if operator.is_on {
                        return Err(self.tsl_error(
                            format!(
                                "Conflict with function {:?}, can't be applied with on function",
                                scanned.tok.as_str()
                            ),
                            scanned.pos,
                        ));
                    }
                    self.parse_ignoring_labels(scanned.tok, scanned.pos, instruction)?;
                }

                Token::GroupLeft | Token::GroupRight => {
                    let operator = instruction.operator_mut().expect("operator instruction");
                    if operator.labels.is_empty() && operator.ignoring.is_empty() {
                        return Err(self.tsl_error(
                            format!(
                                "Found function {:?}, this function expects to find on or ignoring function before on current operator",
                                scanned.tok.as_str()
                            ),
                            scanned.pos,
                        ));
                    }
                    if operator.group.is_some() {
                        return Err(self.tsl_error(
                            format!(
                                "Found function {:?}, or a group method was already defined for this operator",
                                scanned.tok.as_str()
                            ),
                            scanned.pos,
                        ));
                    }

                    let lit = if scanned.tok == Token::GroupLeft {
                        "group_left"
                    } else {
                        "group_right"
                    };
                    operator.group = Some(InternalField::new(scanned.tok, lit));
                    self.parse_groups_labels(scanned.tok, scanned.pos, instruction)?;
                }

                Token::Eof => break,

                Token::Comma | Token::RParen => {
                    if internal_call {
                        self.unscan();
                        break;
                    }
                }

                _ => {
                    self.unscan();
                    self.parse_frameworks(instruction, internal_call)?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Parses the clauses following a select: `where`, `attributePolicy`,
    /// one time bound, meta terminators, then the framework chain.
    fn parse_post_select(
        &mut self,
        instruction: &mut Instruction,
        internal_call: bool,
    ) -> Result<(), Error> {
        // In case of select variable use, a time bound may already be set.
        let mut time_set = instruction.select().time_set;

        loop {
            let scanned = self.scan_ignore_dot();

            match scanned.tok {
                Token::Names | Token::Labels | Token::Selectors | Token::Attributes => {
                    if internal_call || instruction.select().time_set {
                        return Err(self.tsl_error(
                            format!(
                                "Function {:?}, expects to stand on a single select statement",
                                scanned.tok.as_str()
                            ),
                            scanned.pos,
                        ));
                    }
                    self.parse_select_meta(scanned.tok, scanned.pos, instruction)?;

                    let next = self.scan_ignore_whitespace();
                    if next.tok == Token::RParen || next.tok == Token::Eof {
                        break;
                    } else if next.tok != Token::Dot {
                        self.unscan();
                        break;
                    }
                    return Err(self.tsl_error(
                        format!(
                            "Function {:?}, expects to stand on a single select statement",
                            scanned.tok.as_str()
                        ),
                        scanned.pos,
                    ));
                }

                Token::Where => {
                    let where_clauses = self.parse_where(scanned.tok, scanned.pos)?;
                    instruction
                        .select_mut()
                        .where_clauses
                        .extend(where_clauses);
                }

                Token::AttributePolicy => {
                    self.parse_attribute_policy(scanned.tok, scanned.pos, instruction)?;
                }

                Token::From => {
                    if time_set {
                        return Err(self.tsl_error(
                            format!(
                                "Found {:?} function or a time function is already set",
                                scanned.tok.as_str()
                            ),
                            scanned.pos,
                        ));
                    }
                    time_set = true;
                    self.parse_from(scanned.tok, scanned.pos, instruction)?;
                }

                Token::Last => {
                    if time_set {
                        return Err(self.tsl_error(
                            format!(
                                "Found {:?} function or a time function is already set",
                                scanned.tok.as_str()
                            ),
                            scanned.pos,
                        ));
                    }
                    time_set = true;
                    self.parse_last(scanned.tok, scanned.pos, instruction)?;
                }

                Token::Ws | Token::Comment => {
                    let next = self.scan_ignore_whitespace();
                    if next.tok != Token::Dot {
                        self.unscan();
                        break;
                    }
                }

                Token::Eof => break,

                Token::Comma | Token::RParen => {
                    if internal_call {
                        self.unscan();
                        break;
                    }
                }

                _ => {
                    self.unscan();
                    self.parse_frameworks(instruction, internal_call)?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Parses the ordered framework chain of a select or operator.
    fn parse_frameworks(
        &mut self,
        instruction: &mut Instruction,
        internal_call: bool,
    ) -> Result<(), Error> {
        let mut has_sampling = instruction
            .select()
            .frameworks
            .iter()
            .any(|op| matches!(op.operator, Token::Sample | Token::SampleBy));

        loop {
            let scanned = self.scan_ignore_dot();

            match scanned.tok {
                Token::SampleBy | Token::Sample => {
                    self.parse_sample_by(scanned.tok, scanned.pos, instruction)?;
                    has_sampling = true;
                }

                Token::AddSeries
                | Token::SubSeries
                | Token::MulSeries
                | Token::DivSeries
                | Token::Equal
                | Token::MaxWith
                | Token::MinWith
                | Token::NotEqual
                | Token::GreaterThan
                | Token::GreaterOrEqual
                | Token::LessThan
                | Token::LessOrEqual
                | Token::LogN
                | Token::Shrink
                | Token::KeepFirstValues
                | Token::KeepLastValues
                | Token::Timescale => {
                    self.parse_single_numeric_operator(scanned.tok, scanned.pos, instruction)?;
                }

                Token::TimeClip | Token::TimeModulo | Token::TimeSplit | Token::Quantize => {
                    self.parse_operators(scanned.tok, scanned.pos, instruction)?;
                }

                Token::AndL | Token::OrL => {
                    self.parse_boolean_operator(scanned.tok, scanned.pos, instruction)?;
                }

                Token::Shift | Token::Rate => {
                    self.parse_time_operator(scanned.tok, scanned.pos, instruction)?;
                }

                Token::Delta
                | Token::Mean
                | Token::Median
                | Token::Min
                | Token::Max
                | Token::Count
                | Token::Stddev
                | Token::Stdvar
                | Token::Sum
                | Token::Join
                | Token::Percentile
                | Token::Finite => {
                    self.parse_window_operator(scanned.tok, scanned.pos, instruction, has_sampling)?;
                }

                Token::AddNamePrefix
                | Token::AddNameSuffix
                | Token::Rename
                | Token::RenameBy
                | Token::Store
                | Token::FilterByName
                | Token::FilterByLastValue
                | Token::RenameTemplate => {
                    self.parse_n_string_operator(scanned.tok, scanned.pos, 1, instruction)?;
                }

                Token::RemoveLabels | Token::FilterByLabels | Token::FilterWithoutLabels => {
                    self.parse_n_string_operator(scanned.tok, scanned.pos, -1, instruction)?;
                }

                Token::RenameLabelKey => {
                    self.parse_n_string_operator(scanned.tok, scanned.pos, 2, instruction)?;
                }

                Token::SetLabelFromName => {
                    self.parse_set_label_from_name(scanned.tok, scanned.pos, instruction)?;
                }

                Token::RenameLabelValue => {
                    self.parse_rename_label_value(scanned.tok, scanned.pos, instruction)?;
                }

                Token::Abs
                | Token::Ceil
                | Token::CumulativeSum
                | Token::Day
                | Token::Floor
                | Token::Hour
                | Token::Ln
                | Token::Log2
                | Token::Log10
                | Token::Minute
                | Token::Month
                | Token::Round
                | Token::Resets
                | Token::Sqrt
                | Token::Timestamp
                | Token::ToBoolean
                | Token::ToDouble
                | Token::ToLong
                | Token::ToString
                | Token::Weekday
                | Token::Year => {
                    self.parse_no_operator(scanned.tok, scanned.pos, instruction)?;
                }

                Token::Cumulative | Token::Window => {
                    self.parse_aggregator_function(scanned.tok, scanned.pos, instruction)?;
                }

                Token::Sort | Token::SortDesc | Token::SortBy | Token::SortDescBy => {
                    self.parse_operator_by(scanned.tok, scanned.pos, instruction, false)?;
                }

                Token::BottomN | Token::TopN | Token::BottomNBy | Token::TopNBy => {
                    self.parse_operator_by(scanned.tok, scanned.pos, instruction, true)?;
                }

                Token::Group | Token::GroupBy | Token::GroupWithout => {
                    self.parse_group_by(scanned.tok, scanned.pos, instruction, has_sampling)?;
                    has_sampling = true;
                }

                Token::Ws | Token::Comment => {
                    let next = self.scan_ignore_whitespace();
                    if next.tok != Token::Dot {
                        self.unscan();
                        break;
                    }
                }

                Token::Ident => {
                    // A native variable in chain position pushes its value.
                    if self.natives.contains(&scanned.lit) {
                        let mut op = FrameworkStatement::new(Token::NativeVariable, scanned.pos);
                        op.unnamed
                            .push(InternalField::new(Token::NativeVariable, scanned.lit.clone()));
                        instruction.select_mut().frameworks.push(op);
                    } else {
                        self.unscan();
                        break;
                    }
                }

                Token::Eof => break,

                Token::Comma | Token::RParen => {
                    if internal_call {
                        self.unscan();
                        break;
                    }
                    return Err(self.tsl_error(
                        format!(
                            "Unvalid method found {:?}, a time series method or end of statement is expected",
                            tokstr(scanned.tok, &scanned.lit)
                        ),
                        scanned.pos,
                    ));
                }

                _ => {
                    return Err(self.tsl_error(
                        format!(
                            "Unvalid method found {:?}, a time series method or end of statement is expected",
                            tokstr(scanned.tok, &scanned.lit)
                        ),
                        scanned.pos,
                    ));
                }
            }
        }
        Ok(())
    }

    //
    // Individual method parsers
    //

    fn parse_connect(&mut self, pos: Pos) -> Result<ConnectStatement, Error> {
        let mut connect = ConnectStatement {
            pos,
            ..Default::default()
        };

        // Connect accepts: (kind, url, token) or (kind, url) or
        // (kind, url, user, password).
        let fields = self.parse_fields(Token::Connect.as_str(), &HashMap::new(), 4)?;

        if fields.is_empty() {
            return Err(self.tsl_error(
                format!(
                    "Function {:?} expects at least a back-end type",
                    Token::Connect.as_str()
                ),
                pos,
            ));
        }

        connect.connect_type = fields[0].lit.clone();

        if connect.connect_type == Token::Warp.as_str() {
            if fields.len() != 3 {
                return Err(self.tsl_error(
                    format!(
                        "Function {:?} with a {:?} back-end expects an endpoint and a token",
                        Token::Connect.as_str(),
                        Token::Warp.as_str()
                    ),
                    pos,
                ));
            }
            connect.api = fields[1].lit.clone();
            connect.token = fields[2].lit.clone();
        } else if connect.connect_type == Token::Prom.as_str()
            || connect.connect_type == Token::Prometheus.as_str()
        {
            if fields.len() == 2 {
                connect.api = fields[1].lit.clone();
            } else if fields.len() == 4 {
                connect.api = fields[1].lit.clone();
                connect.token = basic_auth(&fields[2].lit, &fields[3].lit);
            } else {
                return Err(self.tsl_error(
                    format!(
                        "Function {:?} with a {:?} back-end expects an endpoint and optionally a user and a password",
                        Token::Connect.as_str(),
                        connect.connect_type
                    ),
                    pos,
                ));
            }
        }

        Ok(connect)
    }

    fn parse_create(
        &mut self,
        pos: Pos,
        connect: &ConnectStatement,
    ) -> Result<Instruction, Error> {
        let mut create = CreateStatement {
            pos,
            ..Default::default()
        };
        let mut select = SelectStatement {
            pos,
            ..Default::default()
        };

        let next = self.scan_ignore_dot();
        if next.tok != Token::LParen {
            return Err(self.tsl_error(
                format!(
                    "Expect a ( at Create statement, got {:?}",
                    tokstr(next.tok, &next.lit)
                ),
                pos,
            ));
        }

        loop {
            let scanned = self.scan_ignore_whitespace();
            match scanned.tok {
                Token::Comma => continue,
                Token::Series => {
                    self.parse_create_series(scanned.pos, &mut create, &mut select)?;
                }
                Token::RParen => break,
                _ => {
                    return Err(self.tsl_error(
                        format!(
                            "Unvalid method found {:?}, expect a creation method as series or a closing )",
                            tokstr(scanned.tok, &scanned.lit)
                        ),
                        scanned.pos,
                    ));
                }
            }
        }

        Ok(Instruction::new(
            connect.clone(),
            InstructionKind::Create { create, select },
            pos,
        ))
    }

    fn parse_create_series(
        &mut self,
        pos: Pos,
        create: &mut CreateStatement,
        select: &mut SelectStatement,
    ) -> Result<(), Error> {
        let mut series = CreateSeries::default();

        let zero_fields = vec![
            spec(Token::Ident),
            spec(Token::Asterisk),
            spec(Token::Str),
        ];
        let specs = HashMap::from([(0usize, zero_fields)]);
        let fields = self.parse_fields(Token::Series.as_str(), &specs, 1)?;

        if fields.is_empty() {
            return Err(self.tsl_error(
                format!("Function {:?} expects a series name", Token::Series.as_str()),
                pos,
            ));
        }
        if fields[0].tok == Token::Str {
            series.metric = fields[0].lit.clone();
        } else if fields[0].tok == Token::Asterisk {
            series.select_all = true;
        }

        loop {
            let scanned = self.scan_ignore_dot();
            match scanned.tok {
                Token::SetLabels => {
                    let where_clauses = self.parse_where(scanned.tok, scanned.pos)?;
                    series.where_clauses.extend(where_clauses);
                }
                Token::SetValues => {
                    self.parse_create_set_values(scanned.pos, &mut series)?;
                }
                Token::RParen | Token::Comma => {
                    self.unscan();
                    if !series.values.is_empty() {
                        select.from = Some(FromStatement {
                            from: InternalField::new(Token::Ident, "$minCreateTick"),
                            to: Some(InternalField::new(Token::Ident, "$maxCreateTick")),
                            pos,
                        });
                        select.last = None;
                        select.time_set = true;
                    }
                    create.series.push(series);
                    return Ok(());
                }
                Token::Ws | Token::Comment => continue,
                _ => {
                    return Err(self.tsl_error(
                        format!(
                            "Unvalid method found {:?} in series, expect setLabels or setValues",
                            tokstr(scanned.tok, &scanned.lit)
                        ),
                        scanned.pos,
                    ));
                }
            }
        }
    }

    fn parse_create_set_values(
        &mut self,
        pos: Pos,
        series: &mut CreateSeries,
    ) -> Result<(), Error> {
        let next = self.scan();
        if next.tok != Token::LParen {
            return Err(self.tsl_error(
                format!(
                    "Expect a ( at SetValues statement, got {:?}",
                    tokstr(next.tok, &next.lit)
                ),
                pos,
            ));
        }

        let mut has_end = false;

        loop {
            let scanned = self.scan_ignore_whitespace();
            match scanned.tok {
                Token::Number
                | Token::Integer
                | Token::Duration
                | Token::NegInteger
                | Token::NegNumber => {
                    if has_end {
                        return Err(self.tsl_error(
                            format!(
                                "single end date value was previously set in setValues, found {:?}",
                                tokstr(scanned.tok, &scanned.lit)
                            ),
                            scanned.pos,
                        ));
                    }
                    has_end = true;
                    series.end = Some(InternalField::new(scanned.tok, scanned.lit.clone()));
                    self.expect_set_values_separator()?;
                }

                Token::Str => {
                    if scanned.lit != "now" {
                        return Err(self.tsl_error(
                            format!(
                                "Unvalid param found in setValues expect or a lastTick long, or now string, or a set of values, found {:?}",
                                tokstr(scanned.tok, &scanned.lit)
                            ),
                            scanned.pos,
                        ));
                    }
                    if has_end {
                        return Err(self.tsl_error(
                            format!(
                                "single end date value was previously set in setValues, found {:?}",
                                tokstr(scanned.tok, &scanned.lit)
                            ),
                            scanned.pos,
                        ));
                    }
                    has_end = true;
                    series.end = Some(InternalField::new(scanned.tok, scanned.lit.clone()));
                    self.expect_set_values_separator()?;
                }

                Token::LBracket => {
                    let tick = self.scan_ignore_whitespace();
                    if !matches!(
                        tick.tok,
                        Token::Number
                            | Token::Duration
                            | Token::Integer
                            | Token::NegInteger
                            | Token::NegNumber
                    ) {
                        return Err(self.tsl_error(
                            format!(
                                "Unvalid param found in setValues expect a tick as Number or duration, found {:?}",
                                tokstr(tick.tok, &tick.lit)
                            ),
                            tick.pos,
                        ));
                    }

                    let sep = self.scan_ignore_whitespace();
                    if sep.tok != Token::Comma {
                        return Err(self.tsl_error(
                            format!(
                                "Expect a , at SetValues statement between tick and value, got {:?}",
                                tokstr(sep.tok, &sep.lit)
                            ),
                            sep.pos,
                        ));
                    }

                    let value = self.scan_ignore_whitespace();
                    if !matches!(
                        value.tok,
                        Token::Number
                            | Token::Duration
                            | Token::Integer
                            | Token::Str
                            | Token::NegInteger
                            | Token::NegNumber
                            | Token::True
                            | Token::False
                    ) {
                        return Err(self.tsl_error(
                            format!(
                                "Unvalid param found in setValues expect a native type value, found {:?}",
                                tokstr(value.tok, &value.lit)
                            ),
                            value.pos,
                        ));
                    }

                    series.values.push(DataPoint {
                        tick: InternalField::new(tick.tok, tick.lit),
                        value: InternalField::new(value.tok, value.lit),
                    });

                    let end = self.scan_ignore_whitespace();
                    if end.tok != Token::RBracket {
                        return Err(self.tsl_error(
                            format!(
                                "Expect a closing ] in setValues, got {:?}",
                                tokstr(end.tok, &end.lit)
                            ),
                            end.pos,
                        ));
                    }
                    self.expect_set_values_separator()?;
                }

                Token::RParen => break,

                _ => {
                    return Err(self.tsl_error(
                        format!(
                            "Unvalid param found in setValues expect or a lastTick long, or now string, or a set of values, found {:?}",
                            tokstr(scanned.tok, &scanned.lit)
                        ),
                        scanned.pos,
                    ));
                }
            }
        }
        Ok(())
    }

    fn expect_set_values_separator(&mut self) -> Result<(), Error> {
        let sep = self.scan_ignore_whitespace();
        if sep.tok == Token::RParen {
            self.unscan();
        } else if sep.tok != Token::Comma {
            return Err(self.tsl_error(
                format!(
                    "Expect a , at SetValues statement, got {:?}",
                    tokstr(sep.tok, &sep.lit)
                ),
                sep.pos,
            ));
        }
        Ok(())
    }

    fn parse_select(&mut self, pos: Pos) -> Result<SelectStatement, Error> {
        let mut select = SelectStatement {
            pos,
            ..Default::default()
        };

        // A query-range default pre-seeds exactly one time bound. It leaves
        // `time_set` false so an explicit from/last in the chain replaces it
        // (parse_from and parse_last clear the opposite bound).
        if let Some(query_range) = self.query_range.clone() {
            if query_range.is_last {
                select.last = Some(LastStatement {
                    last: query_range.last_duration,
                    is_duration: true,
                    ..Default::default()
                });
                select.from = None;
            } else if let Some(from_start) = query_range.from_start {
                select.from = Some(FromStatement {
                    from: from_start,
                    to: query_range.from_to,
                    pos: Pos::default(),
                });
                select.last = None;
            }
        }

        let zero_fields = vec![
            spec(Token::Ident),
            spec(Token::Asterisk),
            spec(Token::Str),
        ];
        let specs = HashMap::from([(0usize, zero_fields)]);
        let fields = self.parse_fields(Token::Select.as_str(), &specs, 1)?;

        if fields.is_empty() {
            return Err(self.tsl_error(
                format!(
                    "Function {:?} expects a metric name or a *",
                    Token::Select.as_str()
                ),
                pos,
            ));
        }
        match fields[0].tok {
            Token::Str => {
                select.metric = fields[0].lit.clone();
                select.metric_type = Token::Str;
            }
            Token::Asterisk => select.select_all = true,
            Token::NativeVariable => {
                select.metric = fields[0].lit.clone();
                select.metric_type = Token::NativeVariable;
            }
            _ => {}
        }

        Ok(select)
    }

    fn parse_select_meta(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let mut op = FrameworkStatement::new(tok, pos);

        let operator_count = if tok == Token::Labels || tok == Token::Attributes {
            1
        } else {
            0
        };

        let fields = self.parse_fields(tok.as_str(), &HashMap::new(), operator_count)?;
        op.unnamed = fields;

        instruction.set_meta();
        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    fn parse_attribute_policy(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let fields = self.parse_fields(tok.as_str(), &HashMap::new(), 1)?;

        if fields.is_empty() {
            return Err(self.tsl_error(
                format!(
                    "The {:?} function expects at least 1 {:?} parameter(s)",
                    tok.as_str(),
                    Token::Str.as_str()
                ),
                pos,
            ));
        }

        instruction.select_mut().attribute_policy = match fields[0].lit.as_str() {
            "merge" => AttributePolicy::Merge,
            "split" => AttributePolicy::Split,
            "remove" => AttributePolicy::Remove,
            _ => {
                return Err(self.tsl_error(
                    format!(
                        "In {:?} function expects parameter must be one of \"merge\", \"split\" or \"remove\"",
                        tok.as_str()
                    ),
                    pos,
                ));
            }
        };
        Ok(())
    }

    fn parse_where(&mut self, tok: Token, pos: Pos) -> Result<Vec<WhereField>, Error> {
        let zero_fields = vec![spec(Token::Str), spec(Token::InternalList)];
        let specs = HashMap::from([(0usize, zero_fields)]);
        let fields = self.parse_fields(tok.as_str(), &specs, -1)?;

        if fields.is_empty() {
            return Err(self.tsl_error(
                format!(
                    "Function {:?}, expects at least one string parameter or a string list",
                    tok.as_str()
                ),
                pos,
            ));
        }

        if fields[0].tok == Token::InternalList && fields.len() > 1 {
            return Err(self.tsl_error(
                format!(
                    "Function {:?}, got both a string list and a string parameter",
                    tok.as_str()
                ),
                pos,
            ));
        }

        let mut where_clauses = Vec::new();

        if fields[0].tok == Token::InternalList {
            for item in &fields[0].field_list {
                if item.tok != Token::Str {
                    return Err(self.tsl_error(
                        format!(
                            "Function {:?} expects only strings as fields clauses",
                            tok.as_str()
                        ),
                        pos,
                    ));
                }
                where_clauses.push(self.get_where_field(&item.lit, pos, item.tok, tok)?);
            }
        } else {
            for field in &fields {
                where_clauses.push(self.get_where_field(&field.lit, pos, field.tok, tok)?);
            }
        }

        Ok(where_clauses)
    }

    /// Splits a `key<op>value` matcher string on its earliest operator.
    fn get_where_field(
        &self,
        lit: &str,
        pos: Pos,
        tok: Token,
        function: Token,
    ) -> Result<WhereField, Error> {
        if tok == Token::NativeVariable {
            return Ok(WhereField {
                key: lit.to_string(),
                where_type: Token::NativeVariable,
                ..Default::default()
            });
        }

        let ops = [
            MatchType::Equal,
            MatchType::Regex,
            MatchType::NotEqual,
            MatchType::RegexNoMatch,
        ];

        let mut best: Option<(usize, MatchType)> = None;
        for op in ops {
            if let Some(index) = lit.find(op.as_str()) {
                match best {
                    Some((best_index, _)) if index > best_index => {}
                    _ => best = Some((index, op)),
                }
            }
        }

        let Some((index, op)) = best else {
            return Err(self.tsl_error(
                format!(
                    "Error when parsing field {:?} in {:?} function",
                    lit,
                    function.as_str()
                ),
                pos,
            ));
        };

        Ok(WhereField {
            key: lit[..index].to_string(),
            value: lit[index + op.as_str().len()..].to_string(),
            op,
            where_type: tok,
        })
    }

    fn parse_on_labels(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let labels = self.parse_label_list(tok, pos)?;
        let operator = instruction.operator_mut().expect("operator instruction");
        operator.labels.extend(labels);
        operator.is_on = true;
        Ok(())
    }

    fn parse_ignoring_labels(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let labels = self.parse_label_list(tok, pos)?;
        let operator = instruction.operator_mut().expect("operator instruction");
        operator.ignoring.extend(labels);
        operator.is_ignoring = true;
        Ok(())
    }

    /// Parses the label arguments of `on`/`ignoring`: strings or one list.
    fn parse_label_list(&mut self, tok: Token, pos: Pos) -> Result<Vec<String>, Error> {
        let zero_fields = vec![spec(Token::InternalList), spec(Token::Str)];
        let specs = HashMap::from([(0usize, zero_fields)]);
        let fields = self.parse_fields(tok.as_str(), &specs, -1)?;

        if fields.len() == 1 && fields[0].tok == Token::InternalList {
            let mut labels = Vec::new();
            for item in &fields[0].field_list {
                if item.tok != Token::Str {
                    return Err(self.tsl_error(
                        format!(
                            "When encounters {:?} keyword, expects only labels key as {:?}",
                            tok.as_str(),
                            Token::Str.as_str()
                        ),
                        pos,
                    ));
                }
                labels.push(item.lit.clone());
            }
            return Ok(labels);
        }

        let mut labels = Vec::new();
        for field in &fields {
            if field.tok != Token::Str {
                return Err(self.tsl_error(
                    format!(
                        "When encounters {:?} keyword, expects only labels key as {:?}",
                        tok.as_str(),
                        Token::Str.as_str()
                    ),
                    pos,
                ));
            }
            labels.push(field.lit.clone());
        }
        Ok(labels)
    }

    fn parse_groups_labels(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let fields = self.parse_fields(tok.as_str(), &HashMap::new(), -1)?;

        let operator = instruction.operator_mut().expect("operator instruction");
        let on_labels: HashSet<&String> = operator.labels.iter().collect();

        let mut group_labels = Vec::new();
        for field in &fields {
            if field.tok != Token::Str {
                return Err(self.tsl_error(
                    format!(
                        "When encounters {:?} keyword, expects only labels key as {:?}",
                        tok.as_str(),
                        Token::Str.as_str()
                    ),
                    pos,
                ));
            }
            if on_labels.contains(&field.lit) {
                return Err(self.tsl_error(
                    format!(
                        "In function {:?} keyword, label {:?} must not occur in ON and GROUP clause at once",
                        tok.as_str(),
                        field.lit
                    ),
                    pos,
                ));
            }
            group_labels.push(field.lit.clone());
        }

        operator.group_labels.extend(group_labels);
        Ok(())
    }

    fn parse_from(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let zero_fields = vec![
            spec(Token::Str),
            spec(Token::Number),
            spec(Token::Integer),
            spec_pref(Token::Str, Prefix::From),
            spec_pref(Token::Number, Prefix::From),
            spec_pref(Token::Integer, Prefix::From),
        ];
        let one_fields = vec![
            spec(Token::Str),
            spec(Token::Number),
            spec(Token::Integer),
            spec_pref(Token::Str, Prefix::To),
            spec_pref(Token::Number, Prefix::To),
            spec_pref(Token::Integer, Prefix::To),
        ];
        let specs = HashMap::from([(0usize, zero_fields), (1usize, one_fields)]);
        let fields = self.parse_fields(tok.as_str(), &specs, 2)?;

        if fields.is_empty() {
            return Err(self.tsl_error(
                format!("Function {:?} expects at least one parameter", tok.as_str()),
                pos,
            ));
        }

        let mut from = FromStatement {
            from: fields[0].clone(),
            to: None,
            pos,
        };
        if fields.len() == 2 {
            from.to = Some(fields[1].clone());
        }

        let select = instruction.select_mut();
        select.from = Some(from);
        select.last = None;
        select.time_set = true;
        Ok(())
    }

    fn parse_last(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let zero_fields = vec![spec(Token::Integer), spec(Token::Duration)];
        let alternative_fields = vec![
            spec(Token::Duration),
            spec(Token::Integer),
            spec(Token::Number),
            spec(Token::Str),
            spec_pref(Token::Duration, Prefix::Shift),
            spec_pref(Token::Integer, Prefix::Timestamp),
            spec_pref(Token::Number, Prefix::Timestamp),
            spec_pref(Token::Str, Prefix::Date),
        ];
        let specs = HashMap::from([
            (0usize, zero_fields),
            (1usize, alternative_fields.clone()),
            (2usize, alternative_fields),
        ]);
        let fields = self.parse_fields(Token::Last.as_str(), &specs, 3)?;

        if fields.is_empty() {
            return Err(self.tsl_error(
                format!(
                    "Function {:?} expects its first parameter to be an INTEGER or a DURATIONVAL",
                    tok.as_str()
                ),
                pos,
            ));
        }

        let mut last = LastStatement {
            pos,
            ..Default::default()
        };

        match fields[0].tok {
            Token::Integer => last.last = fields[0].lit.clone(),
            Token::Duration => {
                last.last = fields[0].lit.clone();
                last.is_duration = true;
            }
            Token::NativeVariable => {
                last.last = fields[0].lit.clone();
                last.last_type = Token::NativeVariable;
            }
            _ => {
                return Err(self.tsl_error(
                    format!(
                        "Function {:?} expects its first parameter to be an INTEGER or a DURATIONVAL, got {:?}",
                        tok.as_str(),
                        fields[0].lit
                    ),
                    pos,
                ));
            }
        }

        for field in fields.iter().skip(1) {
            self.verify_last_field(field, &mut last, pos)?;
        }

        let select = instruction.select_mut();
        select.last = Some(last);
        select.from = None;
        select.time_set = true;
        Ok(())
    }

    fn verify_last_field(
        &self,
        field: &InternalField,
        last: &mut LastStatement,
        pos: Pos,
    ) -> Result<(), Error> {
        if let Some(prefix) = field.prefix {
            match prefix {
                Prefix::Shift | Prefix::Timestamp | Prefix::Date => {
                    last.options.insert(prefix, field.clone());
                    return Ok(());
                }
                _ => {
                    return Err(self.tsl_error(
                        format!(
                            "Function {:?} expects its second parameter to shift, timestamp or a date, got {:?}",
                            Token::Last.as_str(),
                            field.lit
                        ),
                        pos,
                    ));
                }
            }
        }
        let prefix = match field.tok {
            Token::Integer => Prefix::Timestamp,
            Token::Duration => Prefix::Shift,
            Token::Str => Prefix::Date,
            Token::NativeVariable => Prefix::Unknown,
            _ => {
                return Err(self.tsl_error(
                    format!(
                        "Function {:?} expects its second parameter to be a DURATIONVAL shift, an INTEGER timestamp or a STRING date, got {:?}",
                        Token::Last.as_str(),
                        field.lit
                    ),
                    pos,
                ));
            }
        };
        let mut field = field.clone();
        field.prefix = Some(prefix);
        last.options.insert(prefix, field);
        Ok(())
    }

    fn parse_global_series_op(
        &mut self,
        tok: Token,
        pos: Pos,
        connect: &ConnectStatement,
        max_length: i64,
        load_variable: bool,
    ) -> Result<Instruction, Error> {
        let mut operator = GlobalOperator {
            operator: tok,
            pos,
            ..Default::default()
        };

        let first = self.scan_ignore_whitespace();
        if first.tok != Token::LParen {
            return Err(self.tsl_error(
                format!("Operator {:?} expects parameters", tok.as_str()),
                pos,
            ));
        }

        let mut index: i64 = 0;
        loop {
            let scanned = self.scan_ignore_whitespace();

            if scanned.tok == Token::Ident && !self.natives.contains(&scanned.lit) {
                let child =
                    self.parse_post_variables(scanned.pos, &scanned.lit, connect, true)?;
                operator.instructions.push(child);
            } else if !(scanned.tok == Token::Comma || scanned.tok == Token::RParen) {
                self.unscan();
                let (child, _) = self.parse_statement(connect, true, load_variable)?;
                if let Some(child) = child {
                    operator.instructions.push(child);
                }
            }

            let next = self.scan_ignore_whitespace();
            if !(next.tok == Token::Comma || next.tok == Token::RParen) {
                return Err(self.tsl_error(
                    format!(
                        "Expect a , or closing fields with a ), got {:?}",
                        next.tok.as_str()
                    ),
                    next.pos,
                ));
            }

            index += 1;
            if max_length > -1 && index > max_length {
                return Err(self.tsl_error(
                    format!(
                        "Operator {:?} expects at most {} parameters",
                        tok.as_str(),
                        max_length
                    ),
                    pos,
                ));
            }

            if next.tok == Token::RParen {
                break;
            }
        }

        if operator.instructions.len() < 2 {
            return Err(self.tsl_error(
                format!("Operator {:?} expects at least 2 parameters", tok.as_str()),
                pos,
            ));
        }

        Ok(Instruction::new(
            connect.clone(),
            InstructionKind::Operator {
                operator,
                select: SelectStatement::default(),
            },
            pos,
        ))
    }

    fn parse_sample_by(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        // Sampling must open the framework chain.
        if !instruction.select().frameworks.is_empty() {
            return Err(self.tsl_error(
                format!(
                    "Function {:?} must be the first method applied on a select statement",
                    tok.as_str()
                ),
                pos,
            ));
        }

        let mut sampler = FrameworkStatement::new(tok, pos);

        let span_count_fields = vec![
            spec_pref(Token::Duration, Prefix::Span),
            spec_pref(Token::Integer, Prefix::Count),
        ];

        let span_aggregator = vec![
            spec(Token::Mean),
            spec(Token::Max),
            spec(Token::First),
            spec(Token::Last),
            spec(Token::Min),
            spec(Token::Sum),
            spec(Token::Join),
            spec(Token::Median),
            spec(Token::Count),
            spec(Token::AndL),
            spec(Token::OrL),
            spec(Token::Percentile),
            spec_pref(Token::Str, Prefix::Aggregator),
        ];

        let optional_parameter = vec![
            spec(Token::Fill),
            spec(Token::Str),
            spec(Token::InternalList),
            spec(Token::True),
            spec(Token::False),
            spec(Token::Number),
            spec(Token::Integer),
            spec_pref(Token::Duration, Prefix::Span),
            spec_pref(Token::True, Prefix::Relative),
            spec_pref(Token::False, Prefix::Relative),
            spec_pref(Token::Str, Prefix::Fill),
            spec_pref(Token::Fill, Prefix::Fill),
            spec_pref(Token::InternalList, Prefix::Fill),
            spec_pref(Token::Integer, Prefix::Count),
        ];

        let (min_field, specs) = if tok == Token::Sample {
            (
                1,
                HashMap::from([
                    (0usize, span_aggregator.clone()),
                    (1usize, optional_parameter.clone()),
                    (2usize, optional_parameter.clone()),
                    (3usize, optional_parameter.clone()),
                    (4usize, optional_parameter.clone()),
                ]),
            )
        } else {
            (
                2,
                HashMap::from([
                    (0usize, span_count_fields),
                    (1usize, span_aggregator.clone()),
                    (2usize, optional_parameter.clone()),
                    (3usize, optional_parameter.clone()),
                    (4usize, optional_parameter.clone()),
                    (5usize, optional_parameter.clone()),
                ]),
            )
        };

        let max_len = specs.len() as i64;
        let mut fields = self.parse_fields(tok.as_str(), &specs, max_len)?;

        if fields.len() < min_field {
            let message = if tok == Token::Sample {
                format!(
                    "The {:?} method expects at least one parameter an aggregator",
                    tok.as_str()
                )
            } else {
                format!(
                    "The {:?} method expects at least two parameters: a {:?} or a {:?} and a {:?}",
                    tok.as_str(),
                    Prefix::Span.as_str(),
                    Prefix::Count.as_str(),
                    Prefix::Aggregator.as_str()
                )
            };
            return Err(self.tsl_error(message, pos));
        }

        let aggregator_index = if tok == Token::Sample { 0 } else { 1 };
        let mut skipped: HashSet<usize> = HashSet::new();

        for index in 0..fields.len() {
            if skipped.contains(&index) {
                continue;
            }
            let mut field = fields[index].clone();

            // The aggregator position: normalise keyword aggregators and
            // consume the value parameter of join/percentile.
            if index == aggregator_index && field.prefix != Some(Prefix::Span)
                && field.prefix != Some(Prefix::Count)
            {
                normalize_aggregator(&mut field);
                if !matches!(field.tok, Token::Str | Token::Number | Token::Integer) {
                    field.prefix = Some(Prefix::Aggregator);
                    field.lit = field.tok.as_str().to_string();
                }
                if field.tok == Token::Join || field.tok == Token::Percentile {
                    self.manage_value_aggregator(
                        &mut sampler,
                        pos,
                        tok,
                        &field,
                        &mut fields,
                        index,
                        &mut skipped,
                    )?;
                }
                if field.prefix.is_none() {
                    field.prefix = Some(Prefix::Aggregator);
                }
                sampler
                    .attributes
                    .insert(field.prefix.expect("aggregator prefix"), field);
                continue;
            }

            if let Some(prefix) = field.prefix {
                let prefix = if field.tok == Token::Fill {
                    Prefix::FillValue
                } else {
                    prefix
                };
                let mut field = field;
                field.prefix = Some(prefix);
                if field.tok == Token::InternalList {
                    self.validate_fill_list(&field, tok, pos)?;
                }
                sampler.attributes.insert(prefix, field);
                continue;
            }

            // Untagged optional parameters resolve by their token kind.
            let prefix = match field.tok {
                Token::Duration => Prefix::Span,
                Token::Fill => Prefix::FillValue,
                Token::Str => Prefix::Fill,
                Token::InternalList => {
                    self.validate_fill_list(&field, tok, pos)?;
                    Prefix::Fill
                }
                Token::Integer => Prefix::Count,
                Token::True | Token::False => {
                    field.lit = field.tok.as_str().to_string();
                    Prefix::Relative
                }
                _ => {
                    return Err(self.tsl_error(
                        format!(
                            "Unexpected field {:?} in function {:?}",
                            tokstr(field.tok, &field.lit),
                            tok.as_str()
                        ),
                        pos,
                    ));
                }
            };
            field.prefix = Some(prefix);
            sampler.attributes.insert(prefix, field);
        }

        let has_span = sampler.attributes.contains_key(&Prefix::Span);
        let has_count = sampler.attributes.contains_key(&Prefix::Count);

        // A span-only sampler needs a duration-bounded select.
        if has_span && !has_count {
            let select = instruction.select();
            let counted_last = select
                .last
                .as_ref()
                .is_some_and(|last| !last.is_duration && last.last_type != Token::NativeVariable);
            if select.from.is_none() && (select.last.is_none() || counted_last) {
                return Err(self.tsl_error(
                    format!(
                        "In {:?} function, got a span when select was done on a counted item. Use also an integer number as sample count in that case",
                        tok.as_str()
                    ),
                    pos,
                ));
            }
        }

        if tok == Token::Sample {
            if has_span || has_count {
                return Err(self.tsl_error(
                    format!("In {:?} function, no span or count can be set", tok.as_str()),
                    pos,
                ));
            }
            if instruction
                .select()
                .last
                .as_ref()
                .is_some_and(|last| !last.is_duration && last.last_type != Token::NativeVariable)
            {
                return Err(self.tsl_error(
                    format!("In {:?} function, cannot work on Integer last values", tok.as_str()),
                    pos,
                ));
            }
            sampler.attributes.insert(
                Prefix::Count,
                InternalField::with_prefix(Token::Integer, self.samplers_count.clone(), Prefix::Count),
            );
        }

        instruction.select_mut().frameworks.push(sampler);
        Ok(())
    }

    fn validate_fill_list(
        &self,
        field: &InternalField,
        tok: Token,
        pos: Pos,
    ) -> Result<(), Error> {
        for item in &field.field_list {
            if item.tok != Token::Str {
                return Err(self.tsl_error(
                    format!(
                        "Expect a valid field string for {:?} in function {:?}",
                        Prefix::Fill.as_str(),
                        tok.as_str()
                    ),
                    pos,
                ));
            }
            if !matches!(
                item.lit.as_str(),
                "previous" | "next" | "interpolate"
            ) {
                return Err(self.tsl_error(
                    format!(
                        "Unvalid string {:?} in function {:?}, expects one of {:?}, {:?} or {:?}",
                        item.lit,
                        tok.as_str(),
                        FillPolicy::Previous.as_str(),
                        FillPolicy::Next.as_str(),
                        FillPolicy::Interpolate.as_str()
                    ),
                    pos,
                ));
            }
        }
        Ok(())
    }

    /// Consumes the value parameter following a `join` or `percentile`
    /// aggregator and stores it at positional index 0.
    #[allow(clippy::too_many_arguments)]
    fn manage_value_aggregator(
        &self,
        op: &mut FrameworkStatement,
        pos: Pos,
        tok: Token,
        field: &InternalField,
        fields: &mut [InternalField],
        index: usize,
        skipped: &mut HashSet<usize>,
    ) -> Result<(), Error> {
        let expected = if field.tok == Token::Join {
            "string"
        } else {
            "a decimal number or an integer number"
        };

        let Some(next_field) = fields.get_mut(index + 1) else {
            return Err(self.tsl_error(
                format!(
                    "In {:?} method, {:?} expects one {:?} parameter",
                    tok.as_str(),
                    field.tok.as_str(),
                    expected
                ),
                pos,
            ));
        };

        let type_ok = if field.tok == Token::Join {
            next_field.tok == Token::Str
        } else {
            matches!(next_field.tok, Token::Number | Token::Integer)
        };
        if !type_ok {
            return Err(self.tsl_error(
                format!(
                    "In {:?} method, {:?} expects one {:?} parameter",
                    tok.as_str(),
                    field.tok.as_str(),
                    expected
                ),
                pos,
            ));
        }

        if field.tok == Token::Percentile {
            if next_field.tok == Token::Number {
                let value: f64 = next_field.lit.parse().unwrap_or(-1.0);
                if !(0.0..100.0).contains(&value) {
                    return Err(self.tsl_error(
                        format!(
                            "In {:?} method, {:?} expects percentile parameter to be included in [0.0, 100.0[",
                            tok.as_str(),
                            field.tok.as_str()
                        ),
                        pos,
                    ));
                }
            }
            if next_field.tok == Token::Integer {
                let value: i64 = next_field.lit.parse().unwrap_or(-1);
                if !(0..100).contains(&value) {
                    return Err(self.tsl_error(
                        format!(
                            "In {:?} method, {:?} expects percentile parameter to be included in [0, 100[",
                            tok.as_str(),
                            field.tok.as_str()
                        ),
                        pos,
                    ));
                }
                next_field.lit.push_str(".0");
                next_field.tok = Token::Number;
            }
        }

        op.unnamed.insert(0, next_field.clone());
        skipped.insert(index + 1);
        Ok(())
    }

    fn parse_operator_by(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
        has_arg: bool,
    ) -> Result<(), Error> {
        let mut op_by = FrameworkStatement::new(tok, pos);

        let aggregator_fields = vec![
            spec(Token::Mean),
            spec(Token::Max),
            spec(Token::Last),
            spec(Token::First),
            spec(Token::Min),
            spec(Token::Sum),
            spec(Token::Median),
            spec(Token::Count),
            spec(Token::AndL),
            spec(Token::OrL),
            spec(Token::Percentile),
            spec(Token::Names),
            spec(Token::Selectors),
            spec(Token::Labels),
            spec(Token::Attributes),
            spec(Token::Integer),
            spec_pref(Token::Str, Prefix::Aggregator),
        ];

        let param_fields = vec![
            spec(Token::Integer),
            spec(Token::Number),
            spec(Token::Str),
            spec(Token::InternalList),
        ];

        let mut skipped: HashSet<usize> = HashSet::new();

        if !has_arg {
            let specs = HashMap::from([
                (0usize, aggregator_fields),
                (1usize, param_fields.clone()),
            ]);
            let mut fields = self.parse_fields(tok.as_str(), &specs, 2)?;

            if !fields.is_empty() {
                let mut field = fields[0].clone();
                normalize_aggregator(&mut field);
                if field.tok != Token::Integer && field.tok != Token::Str {
                    field.lit = field.tok.as_str().to_string();
                }

                match field.tok {
                    Token::Percentile => {
                        self.manage_value_aggregator(
                            &mut op_by,
                            pos,
                            tok,
                            &field,
                            &mut fields,
                            0,
                            &mut skipped,
                        )?;
                    }
                    Token::Labels | Token::Attributes => {
                        let Some(param) = fields.get(1) else {
                            return Err(self.tsl_error(
                                format!(
                                    "In {:?} method, {:?} expects a label key parameter",
                                    tok.as_str(),
                                    field.tok.as_str()
                                ),
                                pos,
                            ));
                        };
                        op_by.unnamed.push(param.clone());
                        skipped.insert(1);
                    }
                    _ => {
                        if fields.len() > 1 {
                            return Err(self.tsl_error(
                                format!("{:?} expects at most 1 field(s)", tok.as_str()),
                                pos,
                            ));
                        }
                    }
                }
                op_by.attributes.insert(Prefix::Aggregator, field);
            }
        } else {
            let specs = HashMap::from([
                (0usize, vec![spec(Token::Integer)]),
                (1usize, aggregator_fields),
                (2usize, param_fields),
            ]);
            let mut fields = self.parse_fields(tok.as_str(), &specs, 3)?;

            if fields.is_empty() {
                return Err(self.tsl_error(
                    format!(
                        "The {:?} function expects at least a parameter: the n value number",
                        tok.as_str()
                    ),
                    pos,
                ));
            }

            for index in 0..fields.len() {
                if skipped.contains(&index) {
                    continue;
                }
                let mut field = fields[index].clone();

                if index == 0 && field.tok == Token::Integer {
                    if is_zero_only(&field.lit) {
                        return Err(self.tsl_error(
                            format!(
                                "The {:?} function cannot work with {:?} param, expect a value > 0",
                                tok.as_str(),
                                field.lit
                            ),
                            pos,
                        ));
                    }
                    field.prefix = Some(Prefix::NValue);
                    op_by.attributes.insert(Prefix::NValue, field);
                } else if index == 1 {
                    normalize_aggregator(&mut field);
                    if field.tok != Token::Str {
                        field.lit = field.tok.as_str().to_string();
                    }
                    match field.tok {
                        Token::Percentile => {
                            self.manage_value_aggregator(
                                &mut op_by,
                                pos,
                                tok,
                                &field,
                                &mut fields,
                                index,
                                &mut skipped,
                            )?;
                        }
                        Token::Labels | Token::Attributes => {
                            let Some(param) = fields.get(2) else {
                                return Err(self.tsl_error(
                                    format!(
                                        "In {:?} method, {:?} expects a label key parameter",
                                        tok.as_str(),
                                        field.tok.as_str()
                                    ),
                                    pos,
                                ));
                            };
                            op_by.unnamed.push(param.clone());
                            skipped.insert(2);
                        }
                        _ => {
                            if fields.len() > 2 {
                                return Err(self.tsl_error(
                                    format!("{:?} expects at most 2 field(s)", tok.as_str()),
                                    pos,
                                ));
                            }
                        }
                    }
                    op_by.attributes.insert(Prefix::Aggregator, field);
                } else {
                    return Err(self.tsl_error(
                        format!(
                            "The {:?} function encountered an error when parsing its parameter",
                            tok.as_str()
                        ),
                        pos,
                    ));
                }
            }
        }

        instruction.select_mut().frameworks.push(op_by);
        Ok(())
    }

    fn parse_group_by(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
        has_sampling: bool,
    ) -> Result<(), Error> {
        let mut group_by = FrameworkStatement::new(tok, pos);

        let aggregators_fields = vec![
            spec(Token::Mean),
            spec(Token::Max),
            spec(Token::Min),
            spec(Token::Sum),
            spec(Token::Join),
            spec(Token::Median),
            spec(Token::Count),
            spec(Token::AndL),
            spec(Token::OrL),
            spec(Token::Percentile),
            spec_pref(Token::Str, Prefix::Aggregator),
        ];

        let labels_fields = vec![spec(Token::InternalList), spec(Token::Str)];

        let optional_params = vec![
            spec(Token::Str),
            spec(Token::Number),
            spec(Token::Integer),
            spec(Token::False),
            spec(Token::True),
            spec_pref(Token::False, Prefix::KeepDistinct),
            spec_pref(Token::True, Prefix::KeepDistinct),
        ];

        let mut fields = if tok == Token::Group {
            let specs = HashMap::from([
                (0usize, aggregators_fields),
                (1usize, optional_params.clone()),
                (2usize, optional_params),
            ]);
            let fields = self.parse_fields(tok.as_str(), &specs, 3)?;
            if fields.is_empty() {
                return Err(self.tsl_error(
                    format!(
                        "The {:?} function expects at least one parameter an aggregator",
                        tok.as_str()
                    ),
                    pos,
                ));
            }
            fields
        } else {
            let specs = HashMap::from([
                (0usize, labels_fields),
                (1usize, aggregators_fields),
                (2usize, optional_params.clone()),
                (3usize, optional_params),
            ]);
            let fields = self.parse_fields(tok.as_str(), &specs, -1)?;
            if fields.len() < 2 {
                return Err(self.tsl_error(
                    format!(
                        "The {:?} function expects at least two parameters an aggregator and a label key string or a list of labels key string",
                        tok.as_str()
                    ),
                    pos,
                ));
            }
            fields
        };

        let mut skipped: HashSet<usize> = HashSet::new();
        let mut labels: Vec<InternalField> = Vec::new();
        let mut aggregator_param: Option<InternalField> = None;

        for index in 0..fields.len() {
            if skipped.contains(&index) {
                continue;
            }
            let mut field = fields[index].clone();

            if field.tok == Token::InternalList {
                for item in &field.field_list {
                    if item.tok != Token::Str {
                        return Err(self.tsl_error(
                            format!(
                                "The {:?} function expects only label key string",
                                tok.as_str()
                            ),
                            pos,
                        ));
                    }
                    labels.push(item.clone());
                }
            } else if field.prefix == Some(Prefix::Aggregator)
                || !matches!(field.tok, Token::Str | Token::True | Token::False)
            {
                normalize_aggregator(&mut field);
                if !matches!(field.tok, Token::Str | Token::Number | Token::Integer) {
                    field.lit = field.tok.as_str().to_string();
                }
                if field.tok == Token::Join || field.tok == Token::Percentile {
                    self.manage_value_aggregator(
                        &mut group_by,
                        pos,
                        tok,
                        &field,
                        &mut fields,
                        index,
                        &mut skipped,
                    )?;
                    aggregator_param = group_by.unnamed.pop();
                }
                group_by.attributes.insert(Prefix::Aggregator, field);
            } else if field.tok == Token::Str {
                labels.push(field);
            } else if field.tok == Token::True || field.tok == Token::False {
                field.prefix = Some(Prefix::KeepDistinct);
                group_by.attributes.insert(Prefix::KeepDistinct, field);
            } else {
                return Err(self.tsl_error(
                    format!(
                        "The {:?} function found an unexpected field {:?} {:?}",
                        tok.as_str(),
                        field.tok.as_str(),
                        field.lit
                    ),
                    pos,
                ));
            }
        }

        // The generators read an aggregator value parameter at index 0,
        // label keys after it.
        if let Some(param) = aggregator_param {
            group_by.unnamed.push(param);
        }
        group_by.unnamed.extend(labels);

        if !has_sampling {
            instruction
                .select_mut()
                .frameworks
                .push(default_sampler(pos));
        }

        instruction.select_mut().frameworks.push(group_by);
        Ok(())
    }

    fn parse_n_string_operator(
        &mut self,
        tok: Token,
        pos: Pos,
        operator_count: i64,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let mut op = FrameworkStatement::new(tok, pos);

        let parse_count = if tok == Token::RenameBy { -1 } else { operator_count };
        let fields = self.parse_fields(tok.as_str(), &HashMap::new(), parse_count)?;

        let min_count = match tok {
            Token::RenameBy => 1,
            Token::RemoveLabels => 0,
            Token::FilterByLabels | Token::FilterWithoutLabels => 1,
            _ => operator_count,
        };

        if (fields.len() as i64) < min_count {
            return Err(self.tsl_error(
                format!(
                    "The {:?} function expects at least {} {:?} parameter(s)",
                    tok.as_str(),
                    min_count,
                    Token::Str.as_str()
                ),
                pos,
            ));
        }

        op.unnamed = fields;
        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    fn parse_set_label_from_name(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let mut op = FrameworkStatement::new(tok, pos);
        let fields = self.parse_fields(tok.as_str(), &HashMap::new(), 2)?;

        if fields.is_empty() {
            return Err(self.tsl_error(
                format!(
                    "The {:?} function expects at least 1 {:?} parameter(s)",
                    tok.as_str(),
                    Token::Str.as_str()
                ),
                pos,
            ));
        }

        op.unnamed = fields;
        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    fn parse_rename_label_value(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let mut op = FrameworkStatement::new(tok, pos);
        let fields = self.parse_fields(tok.as_str(), &HashMap::new(), 3)?;

        if fields.len() < 2 {
            return Err(self.tsl_error(
                format!(
                    "The {:?} function expects at least 2 {:?} parameter(s)",
                    tok.as_str(),
                    Token::Str.as_str()
                ),
                pos,
            ));
        }

        // Two parameters default the regular expression to match-all.
        if fields.len() == 2 {
            op.unnamed.push(fields[0].clone());
            op.unnamed.push(InternalField::new(Token::Str, ".*"));
            op.unnamed.push(fields[1].clone());
        } else {
            op.unnamed = fields;
        }

        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    fn parse_single_numeric_operator(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let mut op = FrameworkStatement::new(tok, pos);

        let expected = if tok == Token::KeepFirstValues || tok == Token::KeepLastValues {
            0
        } else {
            1
        };

        let zero_fields = if tok == Token::Shrink {
            vec![spec(Token::Integer)]
        } else {
            vec![
                spec(Token::Integer),
                spec(Token::NegInteger),
                spec(Token::Number),
                spec(Token::NegNumber),
            ]
        };
        let specs = HashMap::from([(0usize, zero_fields)]);
        let fields = self.parse_fields(tok.as_str(), &specs, 1)?;

        if fields.len() < expected {
            return Err(self.tsl_error(
                format!(
                    "The {:?} function expects at least one {:?} parameter",
                    tok.as_str(),
                    Token::Number.as_str()
                ),
                pos,
            ));
        }

        for field in fields {
            let mut field = field;
            if field.prefix.is_none() {
                field.prefix = Some(Prefix::MapperValue);
            }
            op.attributes.insert(field.prefix.expect("prefix"), field);
        }

        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    fn parse_operators(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let mut op = FrameworkStatement::new(tok, pos);

        let mut specs: HashMap<usize, Vec<InternalField>> = HashMap::new();
        let mut max_len: i64 = -1;
        let mut min_len = 0;

        match tok {
            Token::TimeClip => {
                specs.insert(0, vec![spec(Token::Integer), spec(Token::Number)]);
                specs.insert(1, vec![spec(Token::Integer), spec(Token::Number)]);
                max_len = 2;
                min_len = 2;
            }
            Token::TimeModulo => {
                specs.insert(0, vec![spec(Token::Integer)]);
                specs.insert(1, vec![spec(Token::Str)]);
                max_len = 2;
                min_len = 2;
            }
            Token::TimeSplit => {
                specs.insert(0, vec![spec(Token::Integer), spec(Token::Duration)]);
                specs.insert(1, vec![spec(Token::Integer)]);
                specs.insert(2, vec![spec(Token::Str)]);
                max_len = 3;
                min_len = 3;
            }
            Token::Quantize => {
                specs.insert(0, vec![spec(Token::Str)]);
                specs.insert(
                    1,
                    vec![
                        spec(Token::Integer),
                        spec(Token::Number),
                        spec(Token::InternalList),
                    ],
                );
                specs.insert(
                    2,
                    vec![
                        spec(Token::Integer),
                        spec(Token::Number),
                        spec(Token::Duration),
                    ],
                );
                max_len = 3;
                min_len = 2;
            }
            _ => {}
        }

        let fields = self.parse_fields(tok.as_str(), &specs, max_len)?;

        if (fields.len() as i64) < min_len as i64 {
            return Err(self.tsl_error(
                format!(
                    "The {:?} function expects at least {} parameter(s)",
                    tok.as_str(),
                    min_len
                ),
                pos,
            ));
        }

        op.unnamed = fields;
        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    fn parse_boolean_operator(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let mut op = FrameworkStatement::new(tok, pos);

        let zero_fields = vec![spec(Token::True), spec(Token::False)];
        let specs = HashMap::from([(0usize, zero_fields)]);
        let fields = self.parse_fields(tok.as_str(), &specs, 1)?;

        if fields.is_empty() {
            return Err(self.tsl_error(
                format!(
                    "The {:?} function expects at least one boolean parameter",
                    tok.as_str()
                ),
                pos,
            ));
        }

        for field in fields {
            let mut field = field;
            if field.prefix.is_none() {
                field.prefix = Some(Prefix::MapperValue);
                field.lit = field.tok.as_str().to_string();
            }
            op.attributes.insert(field.prefix.expect("prefix"), field);
        }

        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    fn parse_time_operator(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let mut op = FrameworkStatement::new(tok, pos);

        let min_size = if tok == Token::Rate { 0 } else { 1 };

        let zero_fields = vec![spec(Token::Duration)];
        let specs = HashMap::from([(0usize, zero_fields)]);
        let fields = self.parse_fields(tok.as_str(), &specs, 1)?;

        if fields.len() < min_size {
            return Err(self.tsl_error(
                format!(
                    "The {:?} function expects at least one {:?} parameter",
                    tok.as_str(),
                    Token::Duration.as_str()
                ),
                pos,
            ));
        }

        for field in fields {
            let mut field = field;
            if field.prefix.is_none() {
                field.prefix = Some(Prefix::MapperValue);
            }
            op.attributes.insert(field.prefix.expect("prefix"), field);
        }

        if tok == Token::Rate {
            instruction.select_mut().has_rate = true;
        }

        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    fn parse_window_operator(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
        has_sampling: bool,
    ) -> Result<(), Error> {
        let mut op = FrameworkStatement::new(tok, pos);

        let mut specs: HashMap<usize, Vec<InternalField>> = HashMap::new();
        let mut index = 0usize;

        if tok == Token::Join {
            specs.insert(index, vec![spec(Token::Str)]);
            index += 1;
        }
        if tok == Token::Percentile {
            specs.insert(index, vec![spec(Token::Integer), spec(Token::Number)]);
            index += 1;
        }

        let added_params = index;

        let zero_fields = vec![
            spec(Token::Integer),
            spec(Token::Duration),
            spec_pref(Token::Integer, Prefix::Pre),
            spec_pref(Token::Duration, Prefix::Pre),
            spec_pref(Token::Duration, Prefix::Sampler),
            spec_pref(Token::Integer, Prefix::Occurrences),
        ];
        specs.insert(index, zero_fields);
        index += 1;

        let one_fields = vec![
            spec(Token::Integer),
            spec(Token::Duration),
            spec_pref(Token::Integer, Prefix::Post),
            spec_pref(Token::Duration, Prefix::Post),
            spec_pref(Token::Integer, Prefix::Occurrences),
        ];
        specs.insert(index, one_fields);

        let max_len = specs.len() as i64;
        let mut fields = self.parse_fields(tok.as_str(), &specs, max_len)?;

        // Validate the leading join/percentile parameter.
        if added_params == 1 {
            let Some(first) = fields.first_mut() else {
                return Err(self.tsl_error(
                    format!(
                        "The {:?} function expects a leading value parameter",
                        tok.as_str()
                    ),
                    pos,
                ));
            };
            if tok == Token::Percentile {
                if first.tok == Token::Number {
                    let value: f64 = first.lit.parse().unwrap_or(-1.0);
                    if !(0.0..100.0).contains(&value) {
                        return Err(self.tsl_error(
                            format!(
                                "In {:?} method expects percentile parameter to be included in [0.0, 100.0[",
                                tok.as_str()
                            ),
                            pos,
                        ));
                    }
                }
                if first.tok == Token::Integer {
                    let value: i64 = first.lit.parse().unwrap_or(-1);
                    if !(0..100).contains(&value) {
                        return Err(self.tsl_error(
                            format!(
                                "In {:?} method expects percentile parameter to be included in [0, 100[",
                                tok.as_str()
                            ),
                            pos,
                        ));
                    }
                    first.lit.push_str(".0");
                    first.tok = Token::Number;
                }
            }
            let mut first = first.clone();
            first.prefix = Some(Prefix::MapperValue);
            op.attributes.insert(Prefix::MapperValue, first);
        }

        if fields.len() == added_params {
            let lit_pre = if tok == Token::Finite { "0" } else { "1" };
            op.attributes.insert(
                Prefix::Pre,
                InternalField::with_prefix(Token::Integer, lit_pre, Prefix::Pre),
            );
        }

        let mut is_duration = false;

        // A single trailing duration is the mapper sampling window.
        if fields.len() == added_params + 1 {
            let field = &fields[added_params];
            if field.prefix.is_none() && field.tok != Token::Duration {
                return Err(self.tsl_error(
                    format!(
                        "The {:?} function expects one a sampler (duration) parameter or two a {:?} and a {:?} parameters",
                        tok.as_str(),
                        Prefix::Pre.as_str(),
                        Prefix::Post.as_str()
                    ),
                    pos,
                ));
            }
        }

        for (field_index, field) in fields.iter().enumerate().skip(added_params) {
            let mut field = field.clone();
            if field.tok == Token::Duration {
                is_duration = true;
            }
            if field.prefix.is_none() {
                if field_index == added_params {
                    if fields.len() == added_params + 1 && field.tok == Token::Duration {
                        field.prefix = Some(Prefix::Sampler);
                    } else {
                        field.prefix = Some(Prefix::Pre);
                    }
                } else {
                    field.prefix = Some(Prefix::Post);
                }
            }
            op.attributes.insert(field.prefix.expect("prefix"), field);
        }

        // A duration window needs aligned buckets; insert the default
        // sampler when the chain has none.
        if is_duration && !has_sampling {
            instruction
                .select_mut()
                .frameworks
                .push(default_sampler(pos));
        }

        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    fn parse_no_operator(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let op = FrameworkStatement::new(tok, pos);

        let fields = self.parse_fields(tok.as_str(), &HashMap::new(), 0)?;
        if !fields.is_empty() {
            return Err(self.tsl_error(
                format!("The {:?} function expects no parameter", tok.as_str()),
                pos,
            ));
        }

        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    fn parse_aggregator_function(
        &mut self,
        tok: Token,
        pos: Pos,
        instruction: &mut Instruction,
    ) -> Result<(), Error> {
        let mut op = FrameworkStatement::new(tok, pos);

        let zero_fields = vec![
            spec(Token::Sum),
            spec(Token::Delta),
            spec(Token::Mean),
            spec(Token::Median),
            spec(Token::Min),
            spec(Token::Max),
            spec(Token::Count),
            spec(Token::Stddev),
            spec(Token::Stdvar),
            spec(Token::First),
            spec(Token::Join),
            spec(Token::AndL),
            spec(Token::OrL),
            spec(Token::Percentile),
            spec(Token::Last),
            spec_pref(Token::Str, Prefix::Aggregator),
        ];

        let mut specs = HashMap::from([(0usize, zero_fields)]);
        let mut max_field: i64 = 1;

        if tok == Token::Window {
            let pre_fields = vec![
                spec(Token::Integer),
                spec(Token::Str),
                spec(Token::Duration),
                spec_pref(Token::Integer, Prefix::Pre),
                spec_pref(Token::Duration, Prefix::Pre),
                spec_pref(Token::Duration, Prefix::Sampler),
                spec_pref(Token::Integer, Prefix::Post),
                spec_pref(Token::Duration, Prefix::Post),
                spec_pref(Token::Integer, Prefix::Occurrences),
            ];
            specs.insert(1, pre_fields.clone());
            specs.insert(2, pre_fields.clone());
            specs.insert(3, pre_fields);
            max_field = 4;
        }

        let mut fields = self.parse_fields(tok.as_str(), &specs, max_field)?;

        if fields.is_empty() {
            return Err(self.tsl_error(
                format!("The {:?} function expects at least 1 parameter", tok.as_str()),
                pos,
            ));
        }

        if tok == Token::Cumulative {
            op.attributes.insert(
                Prefix::Pre,
                InternalField::with_prefix(Token::Integer, "max.tick.sliding.window", Prefix::Pre),
            );
        } else {
            op.attributes.insert(
                Prefix::Pre,
                InternalField::with_prefix(Token::Integer, "0", Prefix::Pre),
            );
        }
        op.attributes.insert(
            Prefix::Post,
            InternalField::with_prefix(Token::Integer, "0", Prefix::Post),
        );

        let mut skipped: HashSet<usize> = HashSet::new();
        let mut add_index = 0usize;

        for index in 0..fields.len() {
            if skipped.contains(&index) {
                continue;
            }
            add_index += 1;
            let mut field = fields[index].clone();

            if index == 0 {
                normalize_aggregator(&mut field);
                if !matches!(field.tok, Token::Str | Token::NativeVariable) {
                    field.lit = field.tok.as_str().to_string();
                }
                if field.tok == Token::Join || field.tok == Token::Percentile {
                    self.manage_value_aggregator(
                        &mut op,
                        pos,
                        tok,
                        &field,
                        &mut fields,
                        index,
                        &mut skipped,
                    )?;
                }
                field.prefix = Some(Prefix::Aggregator);
                op.attributes.insert(Prefix::Aggregator, field);
                continue;
            }

            if let Some(prefix) = field.prefix {
                op.attributes.insert(prefix, field);
                continue;
            }

            if add_index == 2 {
                field.prefix = Some(Prefix::Pre);
                op.attributes.insert(Prefix::Pre, field);
            } else if add_index == 3 {
                field.prefix = Some(Prefix::Post);
                op.attributes.insert(Prefix::Post, field);
            }
        }

        instruction.select_mut().frameworks.push(op);
        Ok(())
    }

    //
    // Global field loader
    //

    /// Loads the comma-delimited argument list of one method call.
    ///
    /// `specs` gives the allowed field types per position; a position with
    /// no entry accepts a string. A positional value matches the first
    /// compatible entry, preferring unprefixed ones; a named value
    /// (`prefix=value`) must match an entry carrying that prefix. Stops at
    /// the closing paren, or fails once `expected_len` (when not -1) is
    /// exceeded.
    fn parse_fields(
        &mut self,
        function: &str,
        specs: &HashMap<usize, Vec<InternalField>>,
        expected_len: i64,
    ) -> Result<Vec<InternalField>, Error> {
        let scanned = self.scan();
        if scanned.tok != Token::LParen {
            return Err(self.tsl_error(
                format!("Expect a (, got {:?}", tokstr(scanned.tok, &scanned.lit)),
                scanned.pos,
            ));
        }

        let mut res = Vec::new();
        let mut index = 0usize;

        loop {
            let mut scanned = self.scan_ignore_whitespace();
            if scanned.tok == Token::RParen {
                break;
            }

            let default_spec = vec![spec(Token::Str)];
            let spec_list = specs.get(&index).unwrap_or(&default_spec);

            // Recognise a named parameter: an allowed prefix followed by =.
            let prefix_matches: Vec<&InternalField> = spec_list
                .iter()
                .filter(|field| {
                    field.prefix.is_some_and(|prefix| {
                        !prefix.as_str().is_empty()
                            && (scanned.lit == prefix.as_str()
                                || scanned.tok.as_str() == prefix.as_str())
                    })
                })
                .collect();

            let peeked = self.scan_ignore_whitespace();
            self.unscan();

            let mut consumed_prefix: Option<Prefix> = None;
            let candidates: Vec<InternalField> =
                if !prefix_matches.is_empty() && peeked.tok == Token::Eq {
                    let eq = self.scan_ignore_whitespace();
                    if eq.tok != Token::Eq {
                        return Err(self.tsl_error(
                            format!(
                                "found {:?}, a prefix for {:?} expects to be followed by an = sign",
                                scanned.lit, function
                            ),
                            scanned.pos,
                        ));
                    }
                    consumed_prefix = prefix_matches[0].prefix;
                    let named: Vec<InternalField> =
                        prefix_matches.into_iter().cloned().collect();
                    scanned = self.scan_ignore_whitespace();
                    named
                } else {
                    // Positional: unprefixed entries first, prefixed as
                    // fallback so their type is still reachable.
                    let mut ordered: Vec<InternalField> = spec_list
                        .iter()
                        .filter(|field| field.prefix.is_none())
                        .cloned()
                        .collect();
                    ordered.extend(
                        spec_list
                            .iter()
                            .filter(|field| field.prefix.is_some())
                            .cloned(),
                    );
                    ordered
                };

            let field = self.match_field(function, &scanned, &candidates)?;
            let mut field = field;
            if consumed_prefix.is_some() {
                field.prefix = consumed_prefix;
            }
            res.push(field);

            let sep = self.scan_ignore_whitespace();
            if !(sep.tok == Token::Comma || sep.tok == Token::RParen) {
                return Err(self.tsl_error(
                    format!(
                        "Expect a , or closing fields with a ), got {:?}",
                        tokstr(sep.tok, &sep.lit)
                    ),
                    sep.pos,
                ));
            }

            index += 1;
            if expected_len > -1 && index as i64 > expected_len {
                return Err(self.tsl_error(
                    format!("{:?} expects at most {} field(s)", function, expected_len),
                    sep.pos,
                ));
            }

            if sep.tok == Token::RParen {
                break;
            }
        }
        Ok(res)
    }

    /// Matches one scanned argument against the candidate field types.
    fn match_field(
        &mut self,
        function: &str,
        scanned: &Scanned,
        candidates: &[InternalField],
    ) -> Result<InternalField, Error> {
        for candidate in candidates {
            if scanned.tok == Token::Ident {
                if self.natives.contains(&scanned.lit) {
                    let mut field = candidate.clone();
                    field.tok = Token::NativeVariable;
                    field.lit = scanned.lit.clone();
                    return Ok(field);
                }

                let Some(variable) = self.variables.get(&scanned.lit) else {
                    return Err(self.tsl_error(
                        format!(
                            "Error when parsing {:?} in {:?} function, this variable isn't declared",
                            scanned.lit, function
                        ),
                        scanned.pos,
                    ));
                };

                if variable.type_token() == candidate.tok {
                    let mut field = candidate.clone();
                    field.lit = variable.lit().to_string();
                    if let VariableKind::List(items) = &variable.kind {
                        field.field_list = items.clone();
                        let next = self.scan_ignore_whitespace();
                        if next.tok == Token::Dot {
                            field.field_list =
                                self.parse_post_list(function, field.field_list)?;
                        } else {
                            self.unscan();
                        }
                    }
                    return Ok(field);
                }
            } else if scanned.tok == Token::LBracket && candidate.tok == Token::InternalList {
                let mut field = candidate.clone();
                field.field_list = self.parse_internal_field_list(function)?;
                return Ok(field);
            } else if scanned.tok == Token::Fill && candidate.tok == Token::Fill {
                let mut field = candidate.clone();
                field.lit = self.parse_fill_value()?;
                return Ok(field);
            } else if scanned.tok == candidate.tok {
                let mut field = candidate.clone();
                field.lit = scanned.lit.clone();
                return Ok(field);
            }
        }

        Err(self.tsl_error(
            format!(
                "Found {:?}, {:?} does not expect a field with type {:?}",
                scanned.lit,
                function,
                scanned.tok.as_str()
            ),
            scanned.pos,
        ))
    }

    /// Parses the `fill(value)` constructor body, returning the emitted
    /// literal (strings are pre-quoted).
    fn parse_fill_value(&mut self) -> Result<String, Error> {
        let open = self.scan_ignore_whitespace();
        if open.tok != Token::LParen {
            return Err(self.tsl_error(
                format!(
                    "'fill()' method expected an opening '(', got {:?}",
                    tokstr(open.tok, &open.lit)
                ),
                open.pos,
            ));
        }

        let value = self.scan_ignore_whitespace();
        let lit = match value.tok {
            Token::Str => format!("'{}'", value.lit),
            Token::Number | Token::Integer | Token::NegNumber | Token::NegInteger => {
                value.lit.clone()
            }
            Token::True | Token::False => value.tok.as_str().to_string(),
            _ => {
                return Err(self.tsl_error(
                    format!(
                        "Unexpected type of field for the 'fill()' method. Expect a native type, got {:?}",
                        tokstr(value.tok, &value.lit)
                    ),
                    value.pos,
                ));
            }
        };

        let close = self.scan_ignore_whitespace();
        if close.tok != Token::RParen {
            return Err(self.tsl_error(
                format!(
                    "'fill()' method expected a closing ')', got {:?}",
                    tokstr(close.tok, &close.lit)
                ),
                close.pos,
            ));
        }
        Ok(lit)
    }

    /// Parses a bracketed list literal (the `[` was already consumed) and
    /// any `.add(...)`/`.remove(...)` composition after it.
    fn parse_internal_field_list(
        &mut self,
        function: &str,
    ) -> Result<Vec<InternalField>, Error> {
        let mut field_list = Vec::new();

        loop {
            let scanned = self.scan_ignore_whitespace();
            if scanned.tok == Token::RBracket {
                break;
            }
            field_list.push(InternalField::new(scanned.tok, scanned.lit));

            let sep = self.scan_ignore_whitespace();
            if !(sep.tok == Token::Comma || sep.tok == Token::RBracket) {
                return Err(self.tsl_error(
                    format!(
                        "Expect a , or closing list fields with a ], got {:?}",
                        tokstr(sep.tok, &sep.lit)
                    ),
                    sep.pos,
                ));
            }
            if sep.tok == Token::RBracket {
                break;
            }
        }

        let next = self.scan_ignore_whitespace();
        if next.tok == Token::Dot {
            field_list = self.parse_post_list(function, field_list)?;
        } else {
            self.unscan();
        }
        Ok(field_list)
    }

    /// Applies chained `.add('x')`/`.remove('x')` calls to a list value.
    fn parse_post_list(
        &mut self,
        function: &str,
        mut field_list: Vec<InternalField>,
    ) -> Result<Vec<InternalField>, Error> {
        loop {
            let scanned = self.scan_ignore_whitespace();

            match scanned.tok {
                Token::AddSeries => {
                    let specs = HashMap::from([(0usize, vec![spec(Token::Str)])]);
                    let fields = self.parse_fields(Token::AddSeries.as_str(), &specs, 1)?;
                    if let Some(field) = fields.into_iter().next() {
                        field_list.push(field);
                    }
                }
                Token::Remove => {
                    let specs = HashMap::from([(0usize, vec![spec(Token::Str)])]);
                    let fields = self.parse_fields(Token::Remove.as_str(), &specs, 1)?;
                    if let Some(field) = fields.into_iter().next() {
                        if let Some(found) =
                            field_list.iter().position(|item| item.lit == field.lit)
                        {
                            field_list.remove(found);
                        }
                    }
                }
                _ => {
                    return Err(self.tsl_error(
                        format!(
                            "Unvalid method {:?} on a list in {:?}, expect add or remove",
                            tokstr(scanned.tok, &scanned.lit),
                            function
                        ),
                        scanned.pos,
                    ));
                }
            }

            let next = self.scan_ignore_whitespace();
            if next.tok != Token::Dot {
                self.unscan();
                break;
            }
        }
        Ok(field_list)
    }
}

/// The sampler inserted before a grouping or duration-window method when the
/// chain declares none: one `last` value per minute.
fn default_sampler(pos: Pos) -> FrameworkStatement {
    let mut sampler = FrameworkStatement::new(Token::SampleBy, pos);
    sampler.attributes.insert(
        Prefix::Aggregator,
        InternalField::with_prefix(Token::Last, "last", Prefix::Aggregator),
    );
    sampler.attributes.insert(
        Prefix::Span,
        InternalField::with_prefix(Token::Duration, "1m", Prefix::Span),
    );
    sampler
}

/// Quoted `"percentile"` and `"join"` aggregators behave exactly like the
/// bare keywords, including their trailing value parameter.
fn normalize_aggregator(field: &mut InternalField) {
    if field.tok == Token::Str {
        match field.lit.as_str() {
            "percentile" => field.tok = Token::Percentile,
            "join" => field.tok = Token::Join,
            _ => {}
        }
    }
}

fn spec(tok: Token) -> InternalField {
    InternalField::new(tok, "")
}

fn spec_pref(tok: Token, prefix: Prefix) -> InternalField {
    InternalField::with_prefix(tok, "", prefix)
}

fn is_zero_only(lit: &str) -> bool {
    let trimmed = lit.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '0')
}

/// Encodes `user:password` for HTTP basic authentication.
fn basic_auth(username: &str, password: &str) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let input = format!("{}:{}", username, password);
    let bytes = input.as_bytes();
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);

    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;

        out.push(ALPHABET[(triple >> 18) as usize & 0x3f] as char);
        out.push(ALPHABET[(triple >> 12) as usize & 0x3f] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(triple >> 6) as usize & 0x3f] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[triple as usize & 0x3f] as char
        } else {
            '='
        });
    }
    out
}
