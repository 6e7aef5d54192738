/// Lexical token of the TSL language.
///
/// Tokens partition into special markers, literals, punctuation and the
/// method-name keywords. Keyword lookup is case-insensitive, so `SELECT`,
/// `Select` and `select` all resolve to [`Token::Select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Token {
    /// Unrecognised input byte
    #[default]
    Illegal,
    /// End of the source document
    Eof,
    /// Run of spaces, tabs and newlines
    Ws,
    /// `// line` or `/* block */` comment
    Comment,

    // Literals
    /// Bare identifier (variable reference or prefix name)
    ///
    /// # Examples
    /// ```text
    /// cpuSeries
    /// span
    /// ```
    Ident,
    /// Decimal number with a fractional part
    ///
    /// # Examples
    /// ```text
    /// 12.5
    /// .5
    /// ```
    Number,
    /// Decimal integer
    Integer,
    /// Negative decimal number (`-` adjacent to the digits)
    NegNumber,
    /// Negative decimal integer
    NegInteger,
    /// Duration literal: digits and a unit suffix
    ///
    /// Units are `ps ns us ms s m h d w` plus `M` for calendar months.
    ///
    /// # Examples
    /// ```text
    /// 15ms
    /// 1h
    /// 3M
    /// ```
    Duration,
    /// String literal in single or double quotes
    Str,
    /// Unterminated string literal
    BadString,
    /// String literal containing an unknown escape sequence
    BadEscape,
    /// Boolean `true`
    True,
    /// Boolean `false`
    False,
    /// Back-tick delimited regular expression
    Regex,
    /// Unterminated regular expression
    BadRegex,
    /// `*` (select-all marker)
    Asterisk,
    /// `=` (named-parameter separator)
    Eq,
    /// `/` when not opening a comment
    Div,

    // Internal type tags, never produced by the lexer. They classify
    // variables and composed fields during parsing.
    /// Variable bound to a select with frameworks
    GtsList,
    /// Variable bound to a global operator expression
    MultipleSeriesOperator,
    /// Bracketed list literal or list-typed variable
    InternalList,
    /// Caller-supplied native variable reference
    NativeVariable,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semicolon,
    Dot,

    // Keywords: every TSL method name
    Abs,
    AddNamePrefix,
    AddNameSuffix,
    AddSeries,
    AndL,
    AttributePolicy,
    Attributes,
    BottomN,
    BottomNBy,
    Ceil,
    Connect,
    Count,
    Create,
    Cumulative,
    CumulativeSum,
    Day,
    Delta,
    DivSeries,
    Equal,
    Fill,
    FilterByLabels,
    FilterByLastValue,
    FilterByName,
    FilterWithoutLabels,
    Finite,
    First,
    Floor,
    From,
    GreaterOrEqual,
    GreaterThan,
    Group,
    GroupBy,
    GroupLeft,
    GroupRight,
    GroupWithout,
    Hour,
    Ignoring,
    Join,
    KeepFirstValues,
    KeepLastValues,
    Labels,
    Last,
    LessOrEqual,
    LessThan,
    Ln,
    Log2,
    Log10,
    LogN,
    Mask,
    Max,
    MaxWith,
    Mean,
    Median,
    Min,
    MinWith,
    Minute,
    Month,
    MulSeries,
    Names,
    NegMask,
    NotEqual,
    On,
    OrL,
    Percentile,
    Prom,
    Prometheus,
    Quantize,
    Rate,
    Remove,
    RemoveLabels,
    Rename,
    RenameBy,
    RenameLabelKey,
    RenameLabelValue,
    RenameTemplate,
    Resets,
    Round,
    Sample,
    SampleBy,
    Select,
    Selectors,
    Series,
    SetLabelFromName,
    SetLabels,
    SetValues,
    Shift,
    Shrink,
    Sort,
    SortBy,
    SortDesc,
    SortDescBy,
    Sqrt,
    Stddev,
    Stdvar,
    Store,
    SubSeries,
    Sum,
    TimeClip,
    TimeModulo,
    Timescale,
    TimeSplit,
    Timestamp,
    ToBoolean,
    ToDouble,
    ToLong,
    ToString,
    TopN,
    TopNBy,
    Warp,
    Weekday,
    Where,
    Window,
    Year,
}

impl Token {
    /// Returns the canonical source spelling of the token.
    ///
    /// Keywords return their TSL method name; literal categories return an
    /// upper-case tag used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Illegal => "ILLEGAL",
            Token::Eof => "EOF",
            Token::Ws => "WS",
            Token::Comment => "COMMENT",
            Token::Ident => "IDENT",
            Token::Number => "NUMBER",
            Token::Integer => "INTEGER",
            Token::NegNumber => "NEGNUMBER",
            Token::NegInteger => "NEGINTEGER",
            Token::Duration => "DURATIONVAL",
            Token::Str => "STRING",
            Token::BadString => "BADSTRING",
            Token::BadEscape => "BADESCAPE",
            Token::True => "true",
            Token::False => "false",
            Token::Regex => "REGEX",
            Token::BadRegex => "BADREGEX",
            Token::Asterisk => "*",
            Token::Eq => "=",
            Token::Div => "/",
            Token::GtsList => "GTSLIST",
            Token::MultipleSeriesOperator => "MULTIPLESERIESOPERATOR",
            Token::InternalList => "LIST",
            Token::NativeVariable => "NATIVEVARIABLE",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Dot => ".",
            Token::Abs => "abs",
            Token::AddNamePrefix => "addPrefix",
            Token::AddNameSuffix => "addSuffix",
            Token::AddSeries => "add",
            Token::AndL => "and",
            Token::AttributePolicy => "attributePolicy",
            Token::Attributes => "attributes",
            Token::BottomN => "bottomN",
            Token::BottomNBy => "bottomNBy",
            Token::Ceil => "ceil",
            Token::Connect => "connect",
            Token::Count => "count",
            Token::Create => "create",
            Token::Cumulative => "cumulative",
            Token::CumulativeSum => "cumulativeSum",
            Token::Day => "day",
            Token::Delta => "delta",
            Token::DivSeries => "div",
            Token::Equal => "equal",
            Token::Fill => "fill",
            Token::FilterByLabels => "filterByLabels",
            Token::FilterByLastValue => "filterByLastValue",
            Token::FilterByName => "filterByName",
            Token::FilterWithoutLabels => "filterWithoutLabels",
            Token::Finite => "finite",
            Token::First => "first",
            Token::Floor => "floor",
            Token::From => "from",
            Token::GreaterOrEqual => "greaterOrEqual",
            Token::GreaterThan => "greaterThan",
            Token::Group => "group",
            Token::GroupBy => "groupBy",
            Token::GroupLeft => "groupLeft",
            Token::GroupRight => "groupRight",
            Token::GroupWithout => "groupWithout",
            Token::Hour => "hour",
            Token::Ignoring => "ignoring",
            Token::Join => "join",
            Token::KeepFirstValues => "keepFirstValues",
            Token::KeepLastValues => "keepLastValues",
            Token::Labels => "labels",
            Token::Last => "last",
            Token::LessOrEqual => "lessOrEqual",
            Token::LessThan => "lessThan",
            Token::Ln => "ln",
            Token::Log2 => "log2",
            Token::Log10 => "log10",
            Token::LogN => "logN",
            Token::Mask => "mask",
            Token::Max => "max",
            Token::MaxWith => "maxWith",
            Token::Mean => "mean",
            Token::Median => "median",
            Token::Min => "min",
            Token::MinWith => "minWith",
            Token::Minute => "minute",
            Token::Month => "month",
            Token::MulSeries => "mul",
            Token::Names => "names",
            Token::NegMask => "negmask",
            Token::NotEqual => "notEqual",
            Token::On => "on",
            Token::OrL => "or",
            Token::Percentile => "percentile",
            Token::Prom => "prom",
            Token::Prometheus => "prometheus",
            Token::Quantize => "quantize",
            Token::Rate => "rate",
            Token::Remove => "remove",
            Token::RemoveLabels => "removeLabels",
            Token::Rename => "rename",
            Token::RenameBy => "renameBy",
            Token::RenameLabelKey => "renameLabelKey",
            Token::RenameLabelValue => "renameLabelValue",
            Token::RenameTemplate => "renameTemplate",
            Token::Resets => "resets",
            Token::Round => "round",
            Token::Sample => "sample",
            Token::SampleBy => "sampleBy",
            Token::Select => "select",
            Token::Selectors => "selectors",
            Token::Series => "series",
            Token::SetLabelFromName => "setLabelFromName",
            Token::SetLabels => "setLabels",
            Token::SetValues => "setValues",
            Token::Shift => "shift",
            Token::Shrink => "shrink",
            Token::Sort => "sort",
            Token::SortBy => "sortBy",
            Token::SortDesc => "sortDesc",
            Token::SortDescBy => "sortDescBy",
            Token::Sqrt => "sqrt",
            Token::Stddev => "stddev",
            Token::Stdvar => "stdvar",
            Token::Store => "store",
            Token::SubSeries => "sub",
            Token::Sum => "sum",
            Token::TimeClip => "timeclip",
            Token::TimeModulo => "timemodulo",
            Token::Timescale => "timescale",
            Token::TimeSplit => "timesplit",
            Token::Timestamp => "timestamp",
            Token::ToBoolean => "toboolean",
            Token::ToDouble => "todouble",
            Token::ToLong => "tolong",
            Token::ToString => "tostring",
            Token::TopN => "topN",
            Token::TopNBy => "topNBy",
            Token::Warp => "warp10",
            Token::Weekday => "weekday",
            Token::Where => "where",
            Token::Window => "window",
            Token::Year => "year",
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves an identifier to its keyword token, case-insensitively.
///
/// Returns [`Token::Ident`] when the identifier is not a keyword. The
/// literals `true` and `false` resolve to their boolean kinds.
pub fn lookup(ident: &str) -> Token {
    match ident.to_ascii_lowercase().as_str() {
        "abs" => Token::Abs,
        "addprefix" => Token::AddNamePrefix,
        "addsuffix" => Token::AddNameSuffix,
        "add" => Token::AddSeries,
        "and" => Token::AndL,
        "attributepolicy" => Token::AttributePolicy,
        "attributes" => Token::Attributes,
        "bottomn" => Token::BottomN,
        "bottomnby" => Token::BottomNBy,
        "ceil" => Token::Ceil,
        "connect" => Token::Connect,
        "count" => Token::Count,
        "create" => Token::Create,
        "cumulative" => Token::Cumulative,
        "cumulativesum" => Token::CumulativeSum,
        "day" => Token::Day,
        "delta" => Token::Delta,
        "div" => Token::DivSeries,
        "equal" => Token::Equal,
        "false" => Token::False,
        "fill" => Token::Fill,
        "filterbylabels" => Token::FilterByLabels,
        "filterbylastvalue" => Token::FilterByLastValue,
        "filterbyname" => Token::FilterByName,
        "filterwithoutlabels" => Token::FilterWithoutLabels,
        "finite" => Token::Finite,
        "first" => Token::First,
        "floor" => Token::Floor,
        "from" => Token::From,
        "greaterorequal" => Token::GreaterOrEqual,
        "greaterthan" => Token::GreaterThan,
        "group" => Token::Group,
        "groupby" => Token::GroupBy,
        "groupleft" => Token::GroupLeft,
        "groupright" => Token::GroupRight,
        "groupwithout" => Token::GroupWithout,
        "hour" => Token::Hour,
        "ignoring" => Token::Ignoring,
        "join" => Token::Join,
        "keepfirstvalues" => Token::KeepFirstValues,
        "keeplastvalues" => Token::KeepLastValues,
        "labels" => Token::Labels,
        "last" => Token::Last,
        "lessorequal" => Token::LessOrEqual,
        "lessthan" => Token::LessThan,
        "ln" => Token::Ln,
        "log2" => Token::Log2,
        "log10" => Token::Log10,
        "logn" => Token::LogN,
        "mask" => Token::Mask,
        "max" => Token::Max,
        "maxwith" => Token::MaxWith,
        "mean" => Token::Mean,
        "median" => Token::Median,
        "min" => Token::Min,
        "minwith" => Token::MinWith,
        "minute" => Token::Minute,
        "month" => Token::Month,
        "mul" => Token::MulSeries,
        "names" => Token::Names,
        "negmask" => Token::NegMask,
        "notequal" => Token::NotEqual,
        "on" => Token::On,
        "or" => Token::OrL,
        "percentile" => Token::Percentile,
        "prom" => Token::Prom,
        "prometheus" => Token::Prometheus,
        "quantize" => Token::Quantize,
        "rate" => Token::Rate,
        "remove" => Token::Remove,
        "removelabels" => Token::RemoveLabels,
        "rename" => Token::Rename,
        "renameby" => Token::RenameBy,
        "renamelabelkey" => Token::RenameLabelKey,
        "renamelabelvalue" => Token::RenameLabelValue,
        "renametemplate" => Token::RenameTemplate,
        "resets" => Token::Resets,
        "round" => Token::Round,
        "sample" => Token::Sample,
        "sampleby" => Token::SampleBy,
        "select" => Token::Select,
        "selectors" => Token::Selectors,
        "series" => Token::Series,
        "setlabelfromname" => Token::SetLabelFromName,
        "setlabels" => Token::SetLabels,
        "setvalues" => Token::SetValues,
        "shift" => Token::Shift,
        "shrink" => Token::Shrink,
        "sort" => Token::Sort,
        "sortby" => Token::SortBy,
        "sortdesc" => Token::SortDesc,
        "sortdescby" => Token::SortDescBy,
        "sqrt" => Token::Sqrt,
        "stddev" => Token::Stddev,
        "stdvar" => Token::Stdvar,
        "store" => Token::Store,
        "sub" => Token::SubSeries,
        "sum" => Token::Sum,
        "timeclip" => Token::TimeClip,
        "timemodulo" => Token::TimeModulo,
        "timescale" => Token::Timescale,
        "timesplit" => Token::TimeSplit,
        "timestamp" => Token::Timestamp,
        "toboolean" => Token::ToBoolean,
        "todouble" => Token::ToDouble,
        "tolong" => Token::ToLong,
        "tostring" => Token::ToString,
        "topn" => Token::TopN,
        "topnby" => Token::TopNBy,
        "true" => Token::True,
        "warp10" => Token::Warp,
        "weekday" => Token::Weekday,
        "where" => Token::Where,
        "window" => Token::Window,
        "year" => Token::Year,
        _ => Token::Ident,
    }
}

/// Returns the literal if provided, otherwise the token's own spelling.
pub fn tokstr(tok: Token, lit: &str) -> String {
    if lit.is_empty() {
        tok.as_str().to_string()
    } else {
        lit.to_string()
    }
}

/// Line and character position of a token.
///
/// Both indexes are zero-based; diagnostics report `line + 1` adjusted by
/// the caller-supplied line offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub character: usize,
}

impl Pos {
    pub fn new(line: usize, character: usize) -> Self {
        Pos { line, character }
    }
}
