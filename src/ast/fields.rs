use crate::ast::tokens::Token;

/// Named-parameter prefix accepted inside TSL method calls.
///
/// A parameter written `span=1m` carries the [`Prefix::Span`] prefix; the
/// same value passed positionally carries none. The set is closed: a method
/// only accepts the prefixes its field specification lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    From,
    To,
    Shift,
    Timestamp,
    Date,
    Relative,
    Fill,
    /// Fill with an explicit value via the `fill(v)` constructor. Assigned
    /// internally, never written by name.
    FillValue,
    Count,
    Aggregator,
    Span,
    MapperValue,
    Pre,
    Post,
    Sampler,
    Occurrences,
    NValue,
    KeepDistinct,
    /// Untyped refinement carried by a native variable.
    Unknown,
}

impl Prefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prefix::From => "from",
            Prefix::To => "to",
            Prefix::Shift => "shift",
            Prefix::Timestamp => "timestamp",
            Prefix::Date => "date",
            Prefix::Relative => "relative",
            Prefix::Fill => "fill",
            Prefix::FillValue => "",
            Prefix::Count => "count",
            Prefix::Aggregator => "aggregator",
            Prefix::Span => "span",
            Prefix::MapperValue => "mapperValue",
            Prefix::Pre => "pre",
            Prefix::Post => "post",
            Prefix::Sampler => "sampler",
            Prefix::Occurrences => "occurrences",
            Prefix::NValue => "n",
            Prefix::KeepDistinct => "keepDistinct",
            Prefix::Unknown => "",
        }
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed parameter value collected while parsing a method call.
///
/// Invariant: a field constructed from a named parameter carries its prefix;
/// a positional field carries `None`. Bracketed list literals keep their
/// elements in `field_list`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InternalField {
    pub tok: Token,
    pub prefix: Option<Prefix>,
    pub lit: String,
    pub field_list: Vec<InternalField>,
}

impl InternalField {
    pub fn new(tok: Token, lit: impl Into<String>) -> Self {
        InternalField {
            tok,
            prefix: None,
            lit: lit.into(),
            field_list: Vec::new(),
        }
    }

    pub fn with_prefix(tok: Token, lit: impl Into<String>, prefix: Prefix) -> Self {
        InternalField {
            tok,
            prefix: Some(prefix),
            lit: lit.into(),
            field_list: Vec::new(),
        }
    }
}

/// Label matcher inside a `where` clause or a label filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WhereField {
    pub key: String,
    pub value: String,
    pub op: MatchType,
    /// Token kind the matcher came from; `NativeVariable` matchers splice a
    /// caller-pushed value at generation time.
    pub where_type: Token,
}

/// Label matching operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchType {
    #[default]
    Equal,
    NotEqual,
    Regex,
    RegexNoMatch,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::Regex => "~",
            MatchType::RegexNoMatch => "!~",
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket fill policy of a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    Next,
    Previous,
    Interpolate,
    None,
    Auto,
}

impl FillPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillPolicy::Next => "next",
            FillPolicy::Previous => "previous",
            FillPolicy::Interpolate => "interpolate",
            FillPolicy::None => "none",
            FillPolicy::Auto => "auto",
        }
    }
}

/// How a select treats series attributes relative to labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributePolicy {
    /// Attributes are copied into the label set (default).
    #[default]
    Merge,
    /// Attributes and labels stay distinct.
    Split,
    /// Attributes are cleared.
    Remove,
}

impl AttributePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributePolicy::Merge => "merge",
            AttributePolicy::Split => "split",
            AttributePolicy::Remove => "remove",
        }
    }
}
