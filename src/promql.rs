use crate::ast::{
    fields::{InternalField, MatchType, Prefix},
    query::{Instruction, InstructionKind},
    statements::FrameworkStatement,
    tokens::{Pos, Token},
};
use crate::error::Error;

const DIALECT: &str = "prometheus";

/// One generated range-query: the expression plus its time parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ql {
    pub api: String,
    pub token: String,
    pub query: String,
    pub instant_query: bool,
    pub start: String,
    pub end: String,
    pub step: String,
}

impl Ql {
    /// Renders the query as its HTTP API path. Instant queries (a trailing
    /// `keepLastValues()`) hit the `query` endpoint, everything else
    /// `query_range`.
    pub fn to_url(&self) -> String {
        let query_type = if self.instant_query {
            "query"
        } else {
            "query_range"
        };
        format!(
            "/api/v1/{}?query={}&start={}&end={}&step={}",
            query_type,
            query_escape(&self.query),
            query_escape(&self.start),
            query_escape(&self.end),
            query_escape(&self.step)
        )
    }
}

/// Lowers one instruction to a [`Ql`] record.
pub struct PromQlGenerator {
    line_start: i64,
}

impl PromQlGenerator {
    pub fn new(line_start: i64) -> Self {
        PromQlGenerator { line_start }
    }

    fn proto_error(&self, message: impl AsRef<str>, pos: Pos) -> Error {
        Error::backend(DIALECT, message, pos, self.line_start)
    }

    /// Generates the query for one instruction. `now_ms` is the shared
    /// evaluation instant in epoch milliseconds.
    pub fn generate(&self, instruction: &Instruction, now_ms: i64) -> Result<Ql, Error> {
        match &instruction.kind {
            InstructionKind::Select(_) => self.select_query(instruction, now_ms),
            InstructionKind::Meta(select) => Err(self.proto_error(
                "catalogue queries are not supported in TSL for prometheus",
                select.pos,
            )),
            InstructionKind::Create { create, .. } => Err(self.proto_error(
                "create series statements are not supported in TSL for prometheus",
                create.pos,
            )),
            InstructionKind::Operator { operator, select } => {
                let joiner_op = to_promql_operator(operator.operator);
                let mut joiner = format!(" {}", joiner_op);

                // Prometheus matches on all labels by default; emit the
                // explicit set-matching clause only when one was written.
                if !operator.ignoring.is_empty() {
                    joiner.push_str(&format!(
                        " {}",
                        on_labels(
                            &operator.ignoring,
                            Token::Ignoring.as_str(),
                            &operator.group,
                            &operator.group_labels
                        )
                    ));
                } else if !operator.labels.is_empty() {
                    joiner.push_str(&format!(
                        " {}",
                        on_labels(
                            &operator.labels,
                            Token::On.as_str(),
                            &operator.group,
                            &operator.group_labels
                        )
                    ));
                }
                joiner.push(' ');

                let mut promql = Ql::default();
                for (index, child) in operator.instructions.iter().enumerate() {
                    let internal = self.generate(child, now_ms)?;
                    if index == 0 {
                        promql = internal;
                    } else {
                        if !(promql.step == internal.step
                            && promql.start == internal.start
                            && promql.end == internal.end)
                        {
                            let message = format!(
                                "expects same time properties for each metrics selector of an operator at method {}",
                                operator.operator.as_str()
                            );
                            return Err(self.proto_error(message, operator.pos));
                        }
                        promql.query = format!("{}{}{}", promql.query, joiner, internal.query);
                    }
                }

                if !select.frameworks.is_empty() {
                    let (query, instant) =
                        self.frameworks_op(&select.frameworks, &promql, true)?;
                    promql.query = query;
                    promql.instant_query = instant;
                }

                Ok(promql)
            }
        }
    }

    fn select_query(&self, instruction: &Instruction, now_ms: i64) -> Result<Ql, Error> {
        let select = instruction.select();
        let mut promql = Ql::default();

        if select.select_all {
            return Err(self.proto_error("select all metrics not supported", select.pos));
        }
        if select.metric_type == Token::NativeVariable {
            return Err(self.proto_error(
                "native variables are not supported in TSL for prometheus",
                select.pos,
            ));
        }

        promql.query = select.metric.clone();
        promql.token = instruction.connect.token.clone();

        // Default window: the last hour sampled every 30 seconds.
        promql.end = format_epoch_seconds(now_ms);
        promql.start = format_epoch_seconds(now_ms - 3_600_000);
        promql.step = "30s".to_string();

        // The bounds are mutually exclusive; a set `from` always wins so a
        // pre-seeded default can never override an explicit chain bound.
        if let Some(from) = &select.from {
            promql.start = from.from.lit.clone();
            if let Some(to) = &from.to {
                promql.end = to.lit.clone();
            }
        } else if let Some(last) = &select.last {
            if !last.is_duration {
                return Err(self.proto_error(
                    "last supports only duration values in select statement",
                    select.pos,
                ));
            }
            let duration_ms = duration_to_millis(&last.last).ok_or_else(|| {
                self.proto_error(
                    format!("invalid duration {:?} in last statement", last.last),
                    select.pos,
                )
            })?;
            promql.start = format_epoch_seconds(now_ms - duration_ms);
        }

        // Every select needs a leading sampler: its span becomes the step.
        let mut find_sample = false;
        if let Some(first) = select.frameworks.first() {
            if matches!(first.operator, Token::SampleBy | Token::Sample) {
                find_sample = true;
                promql.step = self.prom_sample_by(first)?;
            }
        }
        if !find_sample {
            return Err(self.proto_error(
                "expects a default sample for each select statement",
                select.pos,
            ));
        }

        if !select.where_clauses.is_empty() {
            promql.query = format!(
                "{}{}",
                promql.query,
                where_fields(&select.where_clauses)
            );
        }

        // A percentile sampler aggregator lowers to quantile_over_time.
        if let Some(first) = select.frameworks.first() {
            if let Some(quantile) = self.percentile_sampler(first)? {
                promql.query = format!(
                    "quantile_over_time({}, {}[{}])",
                    quantile, promql.query, promql.step
                );
            }
        }

        if !select.frameworks.is_empty() {
            let (query, instant) = self.frameworks_op(&select.frameworks, &promql, false)?;
            promql.query = query;
            promql.instant_query = instant;
        }

        Ok(promql)
    }

    fn prom_sample_by(&self, sample_by: &FrameworkStatement) -> Result<String, Error> {
        let Some(span) = sample_by.attributes.get(&Prefix::Span) else {
            return Err(self.proto_error(
                "sampling expects a sample span as duration value (1m) as first parameter",
                sample_by.pos,
            ));
        };
        Ok(span.lit.clone())
    }

    /// Returns the quantile value when the sampler aggregates by
    /// percentile.
    fn percentile_sampler(
        &self,
        sample_by: &FrameworkStatement,
    ) -> Result<Option<String>, Error> {
        let Some(aggregator) = sample_by.attributes.get(&Prefix::Aggregator) else {
            return Ok(None);
        };
        let is_percentile = aggregator.tok == Token::Percentile
            || (aggregator.tok == Token::Str && aggregator.lit == "percentile");
        if !is_percentile {
            return Ok(None);
        }
        let Some(param) = sample_by.unnamed.first() else {
            return Ok(None);
        };
        let value: f64 = param.lit.parse().map_err(|_| {
            self.proto_error(
                "over_time function return an error when parsing percentile parameter",
                sample_by.pos,
            )
        })?;
        Ok(Some(format_float(value / 100.0)))
    }

    /// Translates the framework chain, returning the final expression and
    /// whether it must run as an instant query.
    fn frameworks_op(
        &self,
        frameworks: &[FrameworkStatement],
        promql: &Ql,
        skip_sample: bool,
    ) -> Result<(String, bool), Error> {
        let mut has_window_mapper = false;
        let mut has_offset = false;
        let mut offset = String::new();
        let mut buffer = String::new();
        let mut prefix: Vec<String> = Vec::new();
        let mut suffix = String::new();
        let mut has_keep_last_value = false;

        for (index, framework) in frameworks.iter().enumerate() {
            // Skip the leading sampler: it only provided the step.
            if index == 0 && matches!(framework.operator, Token::Sample | Token::SampleBy) {
                continue;
            }

            if has_keep_last_value {
                return Err(self.proto_error(
                    "keepLastValues need to be the last method call on a Prometheus query",
                    framework.pos,
                ));
            }

            match framework.operator {
                Token::Shift => {
                    if has_offset {
                        return Err(
                            self.proto_error("shift can be done only once", framework.pos)
                        );
                    }
                    has_offset = true;
                    offset = framework
                        .attributes
                        .get(&Prefix::MapperValue)
                        .map(|attribute| attribute.lit.clone())
                        .unwrap_or_default();
                }

                Token::SampleBy | Token::Sample => {
                    if skip_sample {
                        continue;
                    }
                    return Err(self.proto_error(
                        "sampling must be the first operation set",
                        framework.pos,
                    ));
                }

                Token::AddSeries
                | Token::AndL
                | Token::SubSeries
                | Token::MulSeries
                | Token::DivSeries
                | Token::Equal
                | Token::GreaterOrEqual
                | Token::GreaterThan
                | Token::NotEqual
                | Token::LessOrEqual
                | Token::LessThan
                | Token::OrL => {
                    suffix.push_str(&self.arithmetic_operator(framework)?);
                }

                Token::KeepLastValues => {
                    has_keep_last_value = true;
                    if let Some(value) = framework.attributes.get(&Prefix::MapperValue) {
                        let count: i64 = value.lit.parse().unwrap_or(i64::MAX);
                        if count > 1 {
                            return Err(self.proto_error(
                                "keepLastValues can't be applied with an argument as it call instant values query in Prometheus",
                                framework.pos,
                            ));
                        }
                    }
                }

                Token::Mean
                | Token::Min
                | Token::Max
                | Token::Sum
                | Token::Count
                | Token::Stddev
                | Token::Stdvar
                | Token::Rate
                | Token::Delta
                | Token::Percentile
                | Token::Window => {
                    if has_window_mapper {
                        return Err(self.proto_error(
                            format!(
                                "over_time {} methods can be done only once per query",
                                framework.operator.as_str()
                            ),
                            framework.pos,
                        ));
                    }
                    buffer.push_str(&self.over_time(
                        &promql.query,
                        framework,
                        has_offset,
                        &offset,
                        &promql.step,
                    )?);
                    has_window_mapper = true;
                }

                Token::GroupBy | Token::Group | Token::GroupWithout => {
                    let (group_prefix, group_suffix) = self.group(framework)?;
                    suffix.push_str(&group_suffix);
                    prefix.push(group_prefix);
                }

                Token::Abs
                | Token::Day
                | Token::Ln
                | Token::Log2
                | Token::Log10
                | Token::Ceil
                | Token::Floor
                | Token::Round
                | Token::Hour
                | Token::MaxWith
                | Token::Minute
                | Token::MinWith
                | Token::Month
                | Token::Sqrt
                | Token::Resets
                | Token::Timestamp
                | Token::Year
                | Token::Weekday
                | Token::Sort
                | Token::SortDesc
                | Token::TopN
                | Token::BottomN => {
                    let (op_prefix, op_suffix) = self.operator(framework);
                    suffix.push_str(&op_suffix);
                    prefix.push(op_prefix);
                }

                _ => {
                    return Err(self.proto_error(
                        format!(
                            "operator {} not supported in TSL for {}",
                            framework.operator.as_str(),
                            DIALECT
                        ),
                        framework.pos,
                    ));
                }
            }
        }

        // Wrapping functions apply innermost-first.
        prefix.reverse();

        if has_window_mapper {
            return Ok((
                format!("{}{}{}", prefix.join(""), buffer, suffix),
                has_keep_last_value,
            ));
        }

        if has_offset {
            buffer.push_str(&format!("{} offset {}", promql.query, offset));
            return Ok((
                format!("{}{}{}", prefix.join(""), buffer, suffix),
                has_keep_last_value,
            ));
        }

        Ok((
            format!("{}{}{}", prefix.join(""), promql.query, suffix),
            has_keep_last_value,
        ))
    }

    fn arithmetic_operator(&self, framework: &FrameworkStatement) -> Result<String, Error> {
        let operator_string = format!(" {}", to_promql_operator(framework.operator));

        let mut value = String::new();
        if let Some(attribute) = framework.attributes.get(&Prefix::MapperValue) {
            if framework.operator == Token::AndL || framework.operator == Token::OrL {
                if attribute.tok != Token::True && attribute.tok != Token::False {
                    return Err(self.proto_error(
                        "and or or operation works only using a boolean value",
                        framework.pos,
                    ));
                }
            } else if !matches!(
                attribute.tok,
                Token::Integer | Token::Number | Token::NegInteger | Token::NegNumber
            ) {
                return Err(self.proto_error(
                    "arithmetic operation works only on integer or number values",
                    framework.pos,
                ));
            }
            value = format!(" {}", attribute.lit);
        }
        Ok(format!("{}{}", operator_string, value))
    }

    /// Simple wrapping functions: `abs(...)`, `topk(n, ...)` and friends.
    fn operator(&self, framework: &FrameworkStatement) -> (String, String) {
        let mut operator = framework.operator.as_str().to_string();
        let mut suffix = ")".to_string();
        let mut prefix = "(".to_string();

        match framework.operator {
            Token::Day | Token::Weekday | Token::SortDesc => {
                operator = to_promql_operator(framework.operator).to_string();
            }
            Token::MaxWith | Token::MinWith => {
                operator = to_promql_operator(framework.operator).to_string();
                let value = framework
                    .attributes
                    .get(&Prefix::MapperValue)
                    .map(|attribute| attribute.lit.clone())
                    .unwrap_or_default();
                suffix = format!(",{})", value);
            }
            Token::TopN | Token::BottomN => {
                operator = to_promql_operator(framework.operator).to_string();
                let n_value = framework
                    .attributes
                    .get(&Prefix::NValue)
                    .map(|attribute| attribute.lit.clone())
                    .unwrap_or_default();
                prefix = format!("({},", n_value);
            }
            _ => {}
        }

        if !framework.unnamed.is_empty() {
            suffix.push_str(&labels_string("by", &framework.unnamed));
        }
        (format!("{}{}", operator, prefix), suffix)
    }

    /// Aggregation wrapper: `sum(...) by (labels)`.
    fn group(&self, framework: &FrameworkStatement) -> Result<(String, String), Error> {
        let aggregator = framework
            .attributes
            .get(&Prefix::Aggregator)
            .cloned()
            .unwrap_or_default();

        let mut operator = aggregator.lit.clone();
        match aggregator.tok {
            Token::Str => {
                if aggregator.lit == "mean" {
                    operator = "avg".to_string();
                } else if aggregator.lit == "percentile" {
                    operator = "quantile".to_string();
                } else if !matches!(
                    aggregator.lit.as_str(),
                    "sum" | "min" | "max" | "stddev" | "stdvar" | "count"
                ) {
                    return Err(self.proto_error(
                        format!("aggregator {:?} isn't valid", aggregator.lit),
                        framework.pos,
                    ));
                }
            }
            Token::Sum | Token::Min | Token::Max | Token::Stddev | Token::Stdvar
            | Token::Count => {}
            Token::Mean => operator = "avg".to_string(),
            Token::Percentile => operator = "quantile".to_string(),
            _ => {
                return Err(self.proto_error(
                    format!("aggregator {} isn't valid", aggregator.tok.as_str()),
                    framework.pos,
                ));
            }
        }

        let mut labels = framework.unnamed.clone();
        let mut param = String::new();

        if operator == "quantile" {
            if labels.is_empty() {
                return Err(self.proto_error(
                    "over_time function return an error when parsing percentile parameter",
                    framework.pos,
                ));
            }
            let quantile_param = labels.remove(0);
            let value: f64 = quantile_param.lit.parse().map_err(|_| {
                self.proto_error(
                    "over_time function return an error when parsing percentile parameter",
                    framework.pos,
                )
            })?;
            param = format!("{},", format_float(value / 100.0));
        }

        let group_op = if framework.operator == Token::GroupWithout {
            "without"
        } else {
            "by"
        };

        let mut suffix = ")".to_string();
        if !labels.is_empty() {
            suffix.push_str(&labels_string(group_op, &labels));
        }
        Ok((format!("{}({}", operator, param), suffix))
    }

    /// Windowed reduction: `<agg>_over_time(metric[span]) [offset d]`.
    fn over_time(
        &self,
        query: &str,
        framework: &FrameworkStatement,
        has_shift: bool,
        offset: &str,
        step: &str,
    ) -> Result<String, Error> {
        let mut span = step.to_string();

        let aggregator = match framework.operator {
            Token::Mean => "avg".to_string(),
            Token::Percentile => "quantile".to_string(),
            Token::Window => {
                let window_aggregator = framework
                    .attributes
                    .get(&Prefix::Aggregator)
                    .map(|attribute| attribute.lit.clone())
                    .unwrap_or_default();
                match window_aggregator.as_str() {
                    "mean" => "avg".to_string(),
                    "percentile" => "quantile".to_string(),
                    other => other.to_string(),
                }
            }
            other => other.as_str().to_string(),
        };

        let mut param = String::new();
        if aggregator == "quantile" {
            let value_field = framework
                .attributes
                .get(&Prefix::MapperValue)
                .or_else(|| framework.unnamed.first());
            let Some(value_field) = value_field else {
                return Err(self.proto_error(
                    "over_time function return an error when parsing percentile parameter",
                    framework.pos,
                ));
            };
            let value: f64 = value_field.lit.parse().map_err(|_| {
                self.proto_error(
                    "over_time function return an error when parsing percentile parameter",
                    framework.pos,
                )
            })?;
            param = format!("{},", format_float(value / 100.0));
        }

        let mut function_name = format!("{}_over_time({}", aggregator, param);
        if framework.operator == Token::Rate {
            function_name = format!("{}(", framework.operator.as_str());
        }

        let sampler = if framework.operator == Token::Window {
            framework.attributes.get(&Prefix::Pre)
        } else {
            framework.attributes.get(&Prefix::Sampler)
        };

        match sampler {
            Some(sampling) => span = sampling.lit.clone(),
            None => {
                // A bare rate() falls back to the query step.
                if framework.operator != Token::Rate
                    && framework.unnamed.is_empty()
                    && !framework.attributes.contains_key(&Prefix::MapperValue)
                {
                    return Err(self.proto_error(
                        format!(
                            "over_time function expects one mapper sampling for {}",
                            framework.operator.as_str()
                        ),
                        framework.pos,
                    ));
                }
            }
        }

        function_name.push_str(&format!("{}[{}]", query, span));

        if has_shift {
            function_name.push_str(&format!(" offset {})", offset));
        } else {
            function_name.push(')');
        }

        Ok(function_name)
    }
}

/// Renders the `on(...)`/`ignoring(...)` clause with its optional group
/// direction.
fn on_labels(
    labels: &[String],
    operator: &str,
    group: &Option<InternalField>,
    group_labels: &[String],
) -> String {
    let mut buffer = format!("{}({})", operator, labels.join(","));

    if let Some(group) = group {
        buffer.push_str(&format!(" {}", group.lit));
        if !group_labels.is_empty() {
            buffer.push_str(&format!("({})", group_labels.join(",")));
        }
    }
    buffer
}

/// Renders the `{k="v",...}` matcher set appended to a metric name.
fn where_fields(fields: &[crate::ast::WhereField]) -> String {
    let mut buffer = "{".to_string();
    let mut separator = "";
    for label in fields {
        buffer.push_str(&format!(
            "{}{}{}\"{}\"",
            separator,
            label.key,
            match_op(label.op),
            label.value
        ));
        separator = ",";
    }
    buffer.push('}');
    buffer
}

fn labels_string(group: &str, fields: &[InternalField]) -> String {
    let labels: Vec<String> = fields.iter().map(|label| label.lit.clone()).collect();
    format!(" {} ({})", group, labels.join(", "))
}

fn match_op(op: MatchType) -> &'static str {
    match op {
        MatchType::Equal => "=",
        MatchType::NotEqual => "!=",
        MatchType::Regex => "=~",
        MatchType::RegexNoMatch => "!~",
    }
}

fn to_promql_operator(tok: Token) -> &'static str {
    match tok {
        Token::Mean => "avg",
        Token::AddSeries => "+",
        Token::AndL => "and",
        Token::OrL => "or",
        Token::SubSeries => "-",
        Token::MulSeries => "*",
        Token::DivSeries => "/",
        Token::Equal => "==",
        Token::NotEqual => "!=",
        Token::Percentile => "quantile",
        Token::GreaterOrEqual => ">=",
        Token::GreaterThan => ">",
        Token::LessOrEqual => "<=",
        Token::LessThan => "<",
        Token::Weekday => "day_of_week",
        Token::Day => "day_of_month",
        Token::MaxWith => "clamp_min",
        Token::MinWith => "clamp_max",
        Token::SortDesc => "sort_desc",
        Token::TopN => "topk",
        Token::BottomN => "bottomk",
        _ => "",
    }
}

/// Formats epoch milliseconds as fractional seconds, trimming trailing
/// zeros the way the back-end expects.
fn format_epoch_seconds(ms: i64) -> String {
    let seconds = ms / 1000;
    let fraction = (ms % 1000).abs();
    if fraction == 0 {
        return seconds.to_string();
    }
    let mut out = format!("{}.{:03}", seconds, fraction);
    while out.ends_with('0') {
        out.pop();
    }
    out
}

fn format_float(value: f64) -> String {
    format!("{}", value)
}

/// Converts a TSL duration literal to milliseconds. Unlike the usual
/// wall-clock parsers this accepts the day and week units the language
/// defines.
fn duration_to_millis(value: &str) -> Option<i64> {
    let units: [(&str, f64); 9] = [
        ("ps", 1e-9),
        ("ns", 1e-6),
        ("us", 1e-3),
        ("ms", 1.0),
        ("s", 1_000.0),
        ("m", 60_000.0),
        ("h", 3_600_000.0),
        ("d", 86_400_000.0),
        ("w", 604_800_000.0),
    ];

    for (unit, factor) in units {
        if let Some(digits) = value.strip_suffix(unit) {
            // A bare `m` suffix must not swallow `ms`-style values.
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let amount: f64 = digits.parse().ok()?;
            return Some((amount * factor) as i64);
        }
    }
    None
}

/// Percent-encodes a query parameter, keeping unreserved characters and
/// mapping spaces to `+`.
fn query_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
