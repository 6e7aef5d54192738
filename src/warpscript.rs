use tracing::debug;

use crate::ast::{
    fields::{AttributePolicy, FillPolicy, InternalField, MatchType, Prefix, WhereField},
    query::{Instruction, InstructionKind},
    statements::{CreateStatement, FrameworkStatement, GlobalOperator, SelectStatement},
    tokens::Token,
};
use crate::error::Error;

const DIALECT: &str = "warp 10";

const DEFAULT_AGGREGATOR: &str = "mean";
const DEFAULT_COUNT: &str = "30";
const ZERO_SPAN: &str = "0";

/// Hidden label used to keep distinct series apart inside a reducer.
const DISTINCT_LABEL: &str = "hash_945fa9bc3027d7025e3";

/// Lowers a parsed query to the stack dialect, one newline-separated
/// program for all instructions.
pub struct WarpScriptGenerator {
    line_start: i64,
}

impl WarpScriptGenerator {
    pub fn new(line_start: i64) -> Self {
        WarpScriptGenerator { line_start }
    }

    fn proto_error(&self, message: impl AsRef<str>, pos: crate::ast::Pos) -> Error {
        Error::backend(DIALECT, message, pos, self.line_start)
    }

    /// Generates the complete program for an instruction list.
    pub fn generate(
        &self,
        instructions: &[Instruction],
        allow_authenticate: bool,
    ) -> Result<String, Error> {
        let mut buffer = String::new();

        buffer.push_str("NOW 'now' STORE\n\n");

        // Authenticate the stack on the first token found, raising the hard
        // operation and fetch limits when present.
        if allow_authenticate {
            for instruction in instructions {
                if matches!(instruction.kind, InstructionKind::Operator { .. }) {
                    continue;
                }
                if instruction.connect.token.is_empty() {
                    continue;
                }
                buffer.push_str(&format!("'{}' AUTHENTICATE\n", instruction.connect.token));
                buffer.push_str(
                    "'stack.maxops.hard' STACKATTRIBUTE DUP <% ISNULL ! %> <% MAXOPS %> <% DROP %> IFTE\n",
                );
                buffer.push_str(
                    "'fetch.limit.hard' STACKATTRIBUTE DUP <% ISNULL ! %> <% LIMIT %> <% DROP %> IFTE\n",
                );
                break;
            }
        }

        for instruction in instructions {
            debug!(line = instruction.pos.line, "generating warpscript instruction");
            let warpscript = self.process_instruction(instruction, "")?;
            buffer.push_str(&warpscript);
            buffer.push('\n');
        }
        Ok(buffer)
    }

    fn process_instruction(
        &self,
        instruction: &Instruction,
        prefix: &str,
    ) -> Result<String, Error> {
        let mut buffer = String::new();

        match &instruction.kind {
            InstructionKind::Meta(select) => {
                return self.get_meta(select, &instruction.connect.token);
            }
            InstructionKind::Create { create, select } => {
                buffer.push_str(prefix);
                buffer.push_str(&self.get_create_series(create, prefix)?);
                buffer.push('\n');
                buffer.push_str(&self.get_frameworks_op(select, prefix)?);
            }
            InstructionKind::Select(select) => {
                buffer.push_str(prefix);
                buffer.push_str(&self.get_fetch(select, &instruction.connect.token, prefix)?);
                buffer.push('\n');
                buffer.push_str(&self.get_frameworks_op(select, prefix)?);
            }
            InstructionKind::Operator { operator, select } => {
                buffer.push_str(&self.write_global_operators(operator, prefix, select)?);
            }
        }
        Ok(buffer)
    }

    /// Emits a recursive operator: children in a list, the resolved label
    /// equivalence class, then the `op.<kind>` macro applied to the set.
    fn write_global_operators(
        &self,
        operator: &GlobalOperator,
        prefix: &str,
        select: &SelectStatement,
    ) -> Result<String, Error> {
        let mut buffer = String::new();

        buffer.push_str(prefix);

        if let Some(group) = &operator.group {
            let message = format!("TSL doesn't allow {} methods", group.tok.as_str());
            return Err(self.proto_error(message, operator.pos));
        }

        // With ignoring, collect every label key observed on the children to
        // build the equivalence class by difference.
        if operator.is_ignoring {
            buffer.push_str("[] 'operatorLabels' STORE\n");
            buffer.push_str(prefix);
        }

        buffer.push_str("[ \n");

        for child in &operator.instructions {
            let warpscript = self.process_instruction(child, &format!("{}  ", prefix))?;
            buffer.push_str(&warpscript);

            if operator.is_ignoring {
                buffer.push_str(&format!("{}  ", prefix));
                buffer.push_str(
                    "DUP  <% DROP LABELS KEYLIST %> LMAP $operatorLabels APPEND 'operatorLabels' STORE\n",
                );
            }
        }

        if operator.is_ignoring {
            buffer.push_str(&format!("{}  ", prefix));
            buffer.push_str("$operatorLabels FLATTEN UNIQUE \n");
            if !operator.ignoring.is_empty() {
                let ignored = get_labels_list_string(&operator.ignoring);
                buffer.push_str(&format!("{}  ", prefix));
                buffer.push_str(&format!("->SET {} ->SET DIFFERENCE SET-> \n", ignored));
            }
        } else {
            buffer.push_str(&format!("{}  ", prefix));
            buffer.push_str(&format!("{} \n", get_labels_list_string(&operator.labels)));
        }

        buffer.push_str(&format!("{}  ", prefix));

        let operator_name = match operator.operator {
            Token::Equal
            | Token::GreaterOrEqual
            | Token::GreaterThan
            | Token::LessOrEqual
            | Token::LessThan
            | Token::NotEqual => format!("op.{}", comparator_name(operator.operator)),
            _ => format!("op.{}", operator.operator.as_str()),
        };
        buffer.push_str(&format!("{} \n", operator_name));
        buffer.push_str(prefix);
        buffer.push_str("] \n");
        buffer.push_str(prefix);
        buffer.push_str("APPLY \n");

        buffer.push_str(&self.get_frameworks_op(select, prefix)?);
        Ok(buffer)
    }

    /// Translates the framework chain in order, threading the sample span
    /// to downstream mappers.
    fn get_frameworks_op(
        &self,
        select: &SelectStatement,
        prefix: &str,
    ) -> Result<String, Error> {
        let mut buffer = String::new();
        let mut sample_span = String::new();

        for framework in &select.frameworks {
            buffer.push_str(prefix);
            match framework.operator {
                Token::SampleBy | Token::Sample => {
                    let (bucketize, span) = self.get_bucketize(select, framework, prefix)?;
                    sample_span = span;
                    buffer.push_str(&bucketize);
                    buffer.push('\n');
                }

                Token::Abs
                | Token::AddSeries
                | Token::AndL
                | Token::Ceil
                | Token::Count
                | Token::Day
                | Token::Delta
                | Token::DivSeries
                | Token::Equal
                | Token::Floor
                | Token::GreaterThan
                | Token::GreaterOrEqual
                | Token::LessThan
                | Token::LessOrEqual
                | Token::Ln
                | Token::Log2
                | Token::Log10
                | Token::LogN
                | Token::Hour
                | Token::Max
                | Token::MaxWith
                | Token::Mean
                | Token::Median
                | Token::Min
                | Token::MinWith
                | Token::Minute
                | Token::Month
                | Token::MulSeries
                | Token::NotEqual
                | Token::OrL
                | Token::Rate
                | Token::Stddev
                | Token::Stdvar
                | Token::SubSeries
                | Token::Round
                | Token::Sqrt
                | Token::Sum
                | Token::Timestamp
                | Token::ToBoolean
                | Token::ToDouble
                | Token::ToLong
                | Token::ToString
                | Token::Weekday
                | Token::Year
                | Token::Join
                | Token::Percentile
                | Token::Cumulative
                | Token::Window
                | Token::Finite => {
                    buffer.push_str(&self.get_mapper(framework, &sample_span));
                    buffer.push('\n');
                }

                Token::NativeVariable => {
                    buffer.push_str(&self.pop_variable_call(framework)?);
                    buffer.push('\n');
                }

                Token::Quantize => {
                    buffer.push_str(&self.quantize(framework, prefix)?);
                    buffer.push('\n');
                }

                Token::Shift
                | Token::Resets
                | Token::Timescale
                | Token::TimeClip
                | Token::TimeModulo
                | Token::TimeSplit
                | Token::Shrink => {
                    buffer.push_str(&self.operators(framework));
                    buffer.push('\n');
                }

                Token::KeepLastValues | Token::KeepFirstValues => {
                    buffer.push_str(&self.keep_values(framework));
                    buffer.push('\n');
                }

                Token::Rename | Token::Store => {
                    buffer.push_str(&self.n_values_operators(framework));
                    buffer.push('\n');
                }

                Token::RenameTemplate => {
                    buffer.push_str(&self.rename_template(framework)?);
                    buffer.push('\n');
                }

                Token::FilterByLabels | Token::FilterByName | Token::FilterByLastValue => {
                    buffer.push_str(&self.filter(framework)?);
                    buffer.push('\n');
                }

                Token::FilterWithoutLabels => {
                    buffer.push_str(&self.filter_without_labels(framework));
                    buffer.push('\n');
                }

                Token::AddNameSuffix => {
                    // A leading + on the new name appends it as a suffix.
                    let mut renamed = framework.clone();
                    renamed.operator = Token::Rename;
                    if let Some(value) = renamed.unnamed.first_mut() {
                        if value.tok == Token::NativeVariable {
                            value.lit = format!("{} '%2B' SWAP + ", value.lit);
                        } else {
                            value.lit = format!("%2B{}", value.lit);
                        }
                    }
                    buffer.push_str(&self.n_values_operators(&renamed));
                    buffer.push('\n');
                }

                Token::AddNamePrefix => {
                    buffer.push_str(&self.add_name_prefix(framework)?);
                    buffer.push('\n');
                }

                Token::SetLabelFromName => {
                    buffer.push_str(&self.set_label_from_name(framework));
                    buffer.push('\n');
                }

                Token::RenameBy => {
                    buffer.push_str(&self.rename_by(framework));
                    buffer.push('\n');
                }

                Token::RemoveLabels => {
                    buffer.push_str(&self.remove_labels(framework)?);
                    buffer.push('\n');
                }

                Token::RenameLabelKey => {
                    buffer.push_str(&self.rename_label_key(framework)?);
                    buffer.push('\n');
                }

                Token::RenameLabelValue => {
                    buffer.push_str(&self.rename_label_value(framework)?);
                    buffer.push('\n');
                }

                Token::CumulativeSum => {
                    let mut summed = framework.clone();
                    summed.attributes.insert(
                        Prefix::Pre,
                        InternalField::new(Token::Integer, "max.tick.sliding.window"),
                    );
                    summed
                        .attributes
                        .insert(Prefix::Post, InternalField::new(Token::Integer, "0"));
                    summed.operator = Token::Sum;
                    buffer.push_str(&self.get_mapper(&summed, &sample_span));
                    buffer.push('\n');
                }

                Token::BottomNBy
                | Token::SortBy
                | Token::SortDescBy
                | Token::TopNBy
                | Token::BottomN
                | Token::Sort
                | Token::SortDesc
                | Token::TopN => {
                    buffer.push_str(&self.operator_by(framework)?);
                    buffer.push('\n');
                }

                Token::GroupBy | Token::Group | Token::GroupWithout => {
                    buffer.push_str(&self.get_reducer(framework, prefix));
                    buffer.push('\n');
                }

                Token::Names | Token::Selectors | Token::Labels | Token::Attributes => {
                    // Meta terminators are emitted by get_meta.
                }

                _ => {
                    return Err(self.proto_error(
                        format!(
                            "unsupported method {} in the framework chain",
                            framework.operator.as_str()
                        ),
                        framework.pos,
                    ));
                }
            }
        }
        Ok(buffer)
    }

    /// A native variable in chain position pushes the caller value.
    fn pop_variable_call(&self, framework: &FrameworkStatement) -> Result<String, Error> {
        if framework.unnamed.len() != 1 {
            return Err(self.proto_error("Unexpected error in function pop", framework.pos));
        }
        Ok(format!("${}", framework.unnamed[0].lit))
    }

    /// Emits a catalogue query: FIND the matching series, project the
    /// requested attribute on each and de-duplicate.
    fn get_meta(&self, select: &SelectStatement, token: &str) -> Result<String, Error> {
        for framework in &select.frameworks {
            let op = match framework.operator {
                Token::Names => "NAME",
                Token::Selectors => "TOSELECTOR",
                Token::Labels => "LABELS",
                Token::Attributes => "ATTRIBUTES",
                _ => continue,
            };

            let metric = self.metric_selector(select);

            let mut projection = op.to_string();
            if matches!(framework.operator, Token::Labels | Token::Attributes)
                && !framework.unnamed.is_empty()
            {
                projection = format!(
                    "{} {} GET",
                    op,
                    self.get_lit(&framework.unnamed[0])
                );
            }

            let find = format!(
                "[ '{}' {} {} ] FIND\n<% DROP {} %> LMAP UNIQUE",
                token,
                metric,
                self.get_fetch_labels(&select.where_clauses),
                projection
            );
            return Ok(find);
        }

        Err(self.proto_error("unvalid meta operators in select statement", select.pos))
    }

    fn metric_selector(&self, select: &SelectStatement) -> String {
        if select.metric_type == Token::NativeVariable {
            format!("${}", select.metric)
        } else if select.select_all {
            "~.*".to_string()
        } else {
            self.get_string_value(&select.metric)
        }
    }

    /// Emits the synthetic series of a create statement, tracking the
    /// minimum and maximum ticks for the implicit time bounds.
    fn get_create_series(
        &self,
        create: &CreateStatement,
        prefix: &str,
    ) -> Result<String, Error> {
        let mut buffer = String::new();

        buffer.push_str("MAXLONG -1 * 'maxCreateTick' STORE\n");
        buffer.push_str(&format!("{}MAXLONG 'minCreateTick' STORE\n", prefix));
        buffer.push_str(&format!("{}[\n", prefix));

        for series in &create.series {
            buffer.push_str(&format!(
                "{}    NEWGTS {} RENAME {} RELABEL\n",
                prefix,
                self.get_string_value(&series.metric),
                self.get_fetch_labels(&series.where_clauses)
            ));

            for value in &series.values {
                let mut tick = self.get_lit(&value.tick);

                if let Some(end) = &series.end {
                    let end_lit = if end.tok == Token::Str && end.lit == "now" {
                        "NOW".to_string()
                    } else {
                        self.get_lit(end)
                    };
                    tick = format!("{} {} +", end_lit, tick);
                }

                buffer.push_str(&format!(
                    "{}$maxCreateTick {} MAX 'maxCreateTick' STORE\n",
                    prefix, tick
                ));
                buffer.push_str(&format!(
                    "{}$minCreateTick {} MIN 'minCreateTick' STORE\n",
                    prefix, tick
                ));
                buffer.push_str(&format!(
                    "{}    {} NaN NaN NaN {} ADDVALUE\n",
                    prefix,
                    tick,
                    self.get_lit(&value.value)
                ));
            }
        }

        buffer.push_str(&format!("{}]\n", prefix));
        Ok(buffer)
    }

    /// Emits the FIND or FETCH opening a select, with the attribute-policy
    /// projection appended.
    fn get_fetch(
        &self,
        select: &SelectStatement,
        token: &str,
        prefix: &str,
    ) -> Result<String, Error> {
        let last_tick = self.get_last_tick(select)?;
        let from = self.get_from(select);
        let metric = self.metric_selector(select);
        let labels = self.get_fetch_labels(&select.where_clauses);
        let att_policy = attribute_policy_string(select.attribute_policy, prefix);

        // With no time bound the select is a plain catalogue find.
        if select.from.is_none() && select.last.is_none() {
            return Ok(format!(
                "[ '{}' {} {} ] FIND{}",
                token, metric, labels, att_policy
            ));
        }

        if select.from.is_some() {
            return Ok(format!(
                "[ '{}' {} {} {} {} ] FETCH{}",
                token, metric, labels, from, last_tick, att_policy
            ));
        }

        Ok(format!(
            "[ '{}' {} {} {} {} ] FETCH{}",
            token, metric, labels, last_tick, from, att_policy
        ))
    }

    /// Emits the BUCKETIZE of a sampler, returning the emission and the
    /// sample span threaded to downstream mappers.
    fn get_bucketize(
        &self,
        select: &SelectStatement,
        framework: &FrameworkStatement,
        prefix: &str,
    ) -> Result<(String, String), Error> {
        let mut aggregator = DEFAULT_AGGREGATOR.to_string();
        let mut bucketizer_params = String::new();

        if let Some(attribute) = framework.attributes.get(&Prefix::Aggregator) {
            aggregator = attribute.lit.clone();
            if matches!(attribute.tok, Token::Join | Token::Percentile) {
                if let Some(param) = framework.unnamed.first() {
                    bucketizer_params = format!("{} ", self.get_lit(param));
                }
            }
        }
        let bucketizer = format!("{}bucketizer.{}", bucketizer_params, aggregator);

        let mut shift_span = match framework.attributes.get(&Prefix::Span) {
            Some(attribute) => {
                if attribute.tok == Token::Duration && attribute.lit.ends_with('M') {
                    attribute.lit.clone()
                } else {
                    self.get_lit(attribute)
                }
            }
            None => ZERO_SPAN.to_string(),
        };

        let mut auto = DEFAULT_COUNT.to_string();
        let mut has_count = false;
        if let Some(attribute) = framework.attributes.get(&Prefix::Count) {
            auto = self.get_lit(attribute);
            has_count = true;
        }

        if framework.operator == Token::Sample {
            let last_duration = select.last.as_ref().is_some_and(|last| last.is_duration);
            if last_duration {
                shift_span = format!("{} {} /", self.get_from(select), auto);
            } else if let Some(from) = &select.from {
                if from
                    .to
                    .as_ref()
                    .is_some_and(|to| to.lit == from.from.lit)
                {
                    return Ok((String::new(), ZERO_SPAN.to_string()));
                }
                let last = self.get_last_timestamp(select)?;
                let (_, from_sampling) = self.get_from_sampling(select);
                shift_span = format!("{} {} - {} /", last, from_sampling, auto);
            } else {
                return Err(self.proto_error(
                    "unexpected dates when parsing sample function",
                    framework.pos,
                ));
            }
        }

        if has_count && shift_span == ZERO_SPAN && auto == ZERO_SPAN {
            return Err(self.proto_error(
                "sampling expects at least a span or a count not equals to zero",
                framework.pos,
            ));
        }

        let last_tick = self.get_last_timestamp(select)?;

        let relative = framework
            .attributes
            .get(&Prefix::Relative)
            .map_or(true, |attribute| attribute.tok == Token::True);

        let mut relative_last_bucket = String::new();
        let mut last_bucket = last_tick.clone();
        let mut bucketize_prefix = "'raw' STORE ".to_string();

        // Relative sampling first clips the raw series to the aligned
        // window and falls back to the previous window when empty.
        if relative && shift_span != ZERO_SPAN {
            let relative_span = if shift_span.ends_with('M') {
                format!("{} 30 d *", shift_span.trim_end_matches('M'))
            } else {
                shift_span.clone()
            };

            bucketize_prefix.push_str(&format!(
                "$raw {} {} {} {} / {} * - TIMECLIP NONEMPTY \n{}<% SIZE 0 > %>\n",
                last_tick, last_tick, last_tick, relative_span, relative_span, prefix
            ));

            if relative_span != ZERO_SPAN {
                relative_last_bucket =
                    format!("{} {} / {} *", last_tick, relative_span, relative_span);
                last_bucket = format!(
                    "{} {} / {} * {} +",
                    last_tick, relative_span, relative_span, relative_span
                );
            }
        }

        // Month spans clip bucket by bucket with an ADDMONTHS walk.
        if shift_span.ends_with('M') {
            let bucket_span = shift_span.trim_end_matches('M');
            let bucketize = format!(
                "<% \n{last_bucket} TSELEMENTS 1 2 SET 0 3 SET 0 4 SET 0 5 SET 0 6 SET TSELEMENTS-> 1 ADDMONTHS 'endBucketizeMonth' STORE
$raw
<%
    DROP
    DUP FIRSTTICK 'firstTickBucketizeMonth' STORE
    $endBucketizeMonth 'tickBucketizeMonth' STORE
    [] 'clipTicks' STORE
    <% $tickBucketizeMonth $firstTickBucketizeMonth > %>
    <%
    $clipTicks
    [
        $tickBucketizeMonth
        $tickBucketizeMonth
        -1 {bucket_span} * ADDMONTHS
    ]
    + 'clipTicks' STORE
    $tickBucketizeMonth -1 {bucket_span} * ADDMONTHS 'tickBucketizeMonth' STORE
    %>
    WHILE
    $clipTicks
    CLIP FLATTEN NONEMPTY
    [ SWAP bucketizer.last 0 0 1 ] BUCKETIZE
    <%
        DROP
        DUP
        CLONEEMPTY
        SWAP
        DUP
        FIRSTTICK 'firstTickBucketized' STORE
        $firstTickBucketized TSELEMENTS
        1 2 SET 0 3 SET 0 4 SET 0 5 SET 0 6 SET TSELEMENTS->
        SWAP
        $firstTickBucketized ATTICK
        4 GET 'valueBucketized' STORE
        NaN NaN NaN $valueBucketized
        ADDVALUE
    %>
    LMAP
    MERGE
%>
LMAP
%> IFT
"
            );
            return Ok((format!("{}{}", bucketize_prefix, bucketize), shift_span));
        }

        // Resolve the fill policy text.
        let mut fill_text;
        if let Some(attribute) = framework.attributes.get(&Prefix::Fill) {
            if attribute.tok == Token::InternalList {
                let mut parts = Vec::new();
                for item in &attribute.field_list {
                    parts.push(get_policy(&item.lit));
                }
                fill_text = parts.join(" ");
            } else {
                fill_text = get_policy(&attribute.lit).to_string();
            }
        } else if has_count && auto == "1" {
            fill_text = get_policy(FillPolicy::None.as_str()).to_string();
        } else {
            fill_text = get_policy(FillPolicy::Auto.as_str()).to_string();
        }

        if let Some(fill_value) = framework.attributes.get(&Prefix::FillValue) {
            fill_text = format!("[ NaN NaN NaN {} ] FILLVALUE", fill_value.lit);
        }

        let mut auto = auto;
        if !has_count {
            let (is_from, mut sampling) = self.get_from_sampling(select);
            if is_from {
                let last_timestamp = self.get_last_timestamp(select)?;
                sampling = format!("{} {} -", last_timestamp, sampling);
            }
            auto = sampling;
            if auto != "0" {
                auto = format!("{} {} /", auto, shift_span);
            }
        }

        let mut bucketize = format!(
            "[ $raw {} {} {} {} ] BUCKETIZE {} UNBUCKETIZE",
            bucketizer, last_bucket, shift_span, auto, fill_text
        );

        if relative && shift_span != ZERO_SPAN {
            // When a rate follows, linearly extrapolate the last bucket from
            // the two previous ones.
            if select.has_rate {
                let mut rated = format!(
                    "[ $raw {} {} {} {} ] BUCKETIZE \n",
                    bucketizer, last_bucket, shift_span, auto
                );
                rated.push_str(&format!("{}     <% DROP 'series' STORE\n", prefix));
                rated.push_str(&format!(
                    "{}     $series DUP LASTBUCKET $series BUCKETSPAN - ATTICK DUP 0 GET 't0' STORE 4 GET 'v0' STORE\n",
                    prefix
                ));
                rated.push_str(&format!(
                    "{}     $series DUP LASTBUCKET $series BUCKETSPAN 2 * - ATTICK DUP 0 GET 't1' STORE 4 GET 'v1' STORE\n",
                    prefix
                ));
                rated.push_str(&format!(
                    "{}       <% $series SIZE 2 > $v0 ISNULL ! $v1 ISNULL ! && && %>\n",
                    prefix
                ));
                rated.push_str(&format!(
                    "{}       <%  $v0 DUP $v1 - TODOUBLE  $t0 $t1 - TODOUBLE / {} DUP {} / {} * - * + 'value' STORE\n",
                    prefix, last_tick, shift_span, shift_span
                ));
                rated.push_str(&format!(
                    "{}           $series DUP  LASTBUCKET NaN NaN NaN $value SETVALUE %>\n",
                    prefix
                ));
                rated.push_str(&format!(
                    "{}       <% $series %> IFTE %> LMAP {} UNBUCKETIZE",
                    prefix, fill_text
                ));
                bucketize = rated;
            }

            bucketize = format!("  <% {} %> \n", bucketize);
            bucketize.push_str(&format!(
                "{}  <% [ $raw {} {} {} {} ] BUCKETIZE {} UNBUCKETIZE %> IFTE\n",
                prefix, bucketizer, relative_last_bucket, shift_span, auto, fill_text
            ));
            bucketize.push_str(&format!(
                "{}<% DROP DUP DUP LASTTICK 'tick' STORE <% SIZE 0 > $tick {} > && %> <%  DUP $tick ATTICK 4 GET 'value' STORE DUP SIZE 1 - SHRINK {} NaN NaN NaN $value SETVALUE %> IFT %> LMAP",
                prefix, last_tick, last_tick
            ));
        }

        Ok((format!("{}{}", bucketize_prefix, bucketize), shift_span))
    }

    /// Emits a REDUCE over the grouped label keys.
    fn get_reducer(&self, framework: &FrameworkStatement, prefix: &str) -> String {
        let aggregator = framework
            .attributes
            .get(&Prefix::Aggregator)
            .map(|attribute| attribute.lit.clone())
            .unwrap_or_default();

        let keep_distinct = framework
            .attributes
            .get(&Prefix::KeepDistinct)
            .is_some_and(|attribute| attribute.tok == Token::True);

        let aggregator_tok = framework
            .attributes
            .get(&Prefix::Aggregator)
            .map(|attribute| attribute.tok)
            .unwrap_or_default();

        let mut labels_fields: Vec<InternalField> = framework.unnamed.clone();
        let mut reducer_params = String::new();
        if matches!(aggregator_tok, Token::Join | Token::Percentile) && !labels_fields.is_empty()
        {
            reducer_params = format!("{} ", self.get_lit(&labels_fields.remove(0)));
        }
        let operator = format!("{}reducer.{}", reducer_params, aggregator);

        if keep_distinct {
            labels_fields.push(InternalField::new(Token::Str, DISTINCT_LABEL));
        }
        let labels_string = self.get_labels_string(&labels_fields);

        if framework.operator == Token::GroupWithout {
            return format!(
                "[ SWAP DUP  <% DROP LABELS KEYLIST %> LMAP FLATTEN UNIQUE ->SET {} ->SET DIFFERENCE SET-> {} ] REDUCE ",
                labels_string, operator
            );
        }

        let reducer = format!("[ SWAP {} {} ] REDUCE ", labels_string, operator);
        if keep_distinct {
            let mut distinct = format!(
                "<% DROP DUP {{ '{}' ROT NAME }} RELABEL %> LMAP\n{}{}",
                DISTINCT_LABEL, prefix, reducer
            );
            distinct.push_str(&format!(
                "\n<% DROP {{ '{}' '' }} RELABEL %> LMAP",
                DISTINCT_LABEL
            ));
            return distinct;
        }

        reducer
    }

    /// Emits a MAP statement for a windowed or arithmetic mapper.
    fn get_mapper(&self, framework: &FrameworkStatement, sample_span: &str) -> String {
        if framework.operator == Token::Rate {
            let mut mapper = "[ SWAP mapper.rate 1 1 0 ] MAP ".to_string();
            if let Some(attribute) = framework.attributes.get(&Prefix::MapperValue) {
                let value = self.get_lit(attribute);
                mapper.push_str(&format!("[ SWAP {} 1 s / mapper.mul 0 0 0 ] MAP ", value));
            }
            return mapper;
        }

        let mut mapper = match framework.operator {
            Token::Stddev => "TRUE mapper.sd".to_string(),
            Token::Stdvar => "TRUE mapper.var".to_string(),
            Token::Ln => "e mapper.log".to_string(),
            Token::Log2 => "2 mapper.log".to_string(),
            Token::Log10 => "10 mapper.log".to_string(),
            Token::LogN => "mapper.log".to_string(),
            Token::Day => "'UTC' mapper.day".to_string(),
            Token::Minute => "'UTC' mapper.minute".to_string(),
            Token::Hour => "'UTC' mapper.hour".to_string(),
            Token::Month => "'UTC' mapper.month".to_string(),
            Token::Weekday => "'UTC' mapper.weekday".to_string(),
            Token::Year => "'UTC' mapper.year".to_string(),
            Token::MaxWith => "mapper.max.x".to_string(),
            Token::MinWith => "mapper.min.x".to_string(),
            Token::Timestamp => "mapper.tick".to_string(),
            Token::Equal
            | Token::GreaterOrEqual
            | Token::GreaterThan
            | Token::LessOrEqual
            | Token::LessThan
            | Token::NotEqual => format!("mapper.{}", comparator_name(framework.operator)),
            Token::Cumulative | Token::Window => {
                let aggregator = framework
                    .attributes
                    .get(&Prefix::Aggregator)
                    .cloned()
                    .unwrap_or_default();

                let mut param_value = String::new();
                if framework.unnamed.len() == 1 {
                    param_value = format!("{} ", self.get_lit(&framework.unnamed[0]));
                }
                match aggregator.tok {
                    Token::Stddev => "TRUE mapper.sd".to_string(),
                    Token::Stdvar => "TRUE mapper.var".to_string(),
                    _ => format!("{}mapper.{}", param_value, aggregator.lit),
                }
            }
            Token::DivSeries => "mapper.mul".to_string(),
            Token::SubSeries => "-1 * mapper.add".to_string(),
            _ => format!("mapper.{}", framework.operator.as_str()),
        };

        // The leading parameter of join/percentile windows.
        if matches!(framework.operator, Token::Join | Token::Percentile) {
            if let Some(attribute) = framework.attributes.get(&Prefix::MapperValue) {
                mapper = format!("{} {}", self.get_lit(attribute), mapper);
            }
        }

        let mut value = String::new();
        if !matches!(framework.operator, Token::Join | Token::Percentile) {
            if let Some(attribute) = framework.attributes.get(&Prefix::MapperValue) {
                value = match attribute.tok {
                    Token::Str => format!("'{}'", attribute.lit),
                    Token::Number if attribute.lit.starts_with('.') => {
                        format!("0{}", attribute.lit)
                    }
                    Token::NegNumber if attribute.lit.starts_with("-.") => {
                        format!("-0{}", attribute.lit.trim_start_matches('-'))
                    }
                    Token::NativeVariable => {
                        let native = format!("${}", attribute.lit);
                        if framework.operator == Token::DivSeries {
                            format!("1.0 {} /", native)
                        } else {
                            native
                        }
                    }
                    _ => {
                        let mut lit = attribute.lit.clone();
                        if matches!(attribute.tok, Token::Number | Token::Integer)
                            && matches!(
                                framework.operator,
                                Token::AddSeries
                                    | Token::SubSeries
                                    | Token::MulSeries
                                    | Token::DivSeries
                            )
                        {
                            lit = format!("{} TODOUBLE", lit);
                        }
                        if framework.operator == Token::DivSeries {
                            lit = format!("1.0 {} /", lit);
                        }
                        lit
                    }
                };
                value.push(' ');
            }
        }

        let mut pre = "0".to_string();
        let mut post = "0".to_string();

        if let Some(attribute) = framework.attributes.get(&Prefix::Sampler) {
            pre = format!("{} {} / ROUND", self.get_lit(attribute), sample_span);
        }

        if let Some(attribute) = framework.attributes.get(&Prefix::Pre) {
            pre = match attribute.tok {
                Token::Integer => attribute.lit.clone(),
                Token::Duration => format!("-{}", parse_shift(&attribute.lit)),
                Token::NativeVariable => format!("${}", attribute.lit),
                _ => pre,
            };
        }

        if let Some(attribute) = framework.attributes.get(&Prefix::Post) {
            post = match attribute.tok {
                Token::Integer => attribute.lit.clone(),
                Token::Duration => format!("-{}", parse_shift(&attribute.lit)),
                Token::NativeVariable => format!("${}", attribute.lit),
                _ => post,
            };
        }

        let mut occurrences = "0".to_string();
        if let Some(attribute) = framework.attributes.get(&Prefix::Occurrences) {
            occurrences = self.get_lit(attribute);
        }

        format!(
            "[ SWAP {}{} {} {} {} ] MAP ",
            value, mapper, pre, post, occurrences
        )
    }

    /// Emits the sort / top-k family over a computed sort key.
    fn operator_by(&self, framework: &FrameworkStatement) -> Result<String, Error> {
        let mut operator = framework.operator;

        let attribute = framework.attributes.get(&Prefix::Aggregator).cloned();
        let aggregator = attribute
            .as_ref()
            .map(|attribute| attribute.lit.clone())
            .unwrap_or_else(|| DEFAULT_AGGREGATOR.to_string());

        let mut value = String::new();
        if let Some(n_value) = framework.attributes.get(&Prefix::NValue) {
            value = format!(" [ 0 {} 1 - ] SUBLIST", n_value.lit);
        }

        // A bare top/bottom keeps the current order and just slices.
        if attribute.is_none() && matches!(operator, Token::TopN | Token::BottomN) {
            let reverse = if operator == Token::TopN { " REVERSE" } else { "" };
            return Ok(format!("{}{}", reverse, value));
        }

        let mut param_value = String::new();
        if framework.unnamed.len() == 1 {
            param_value = self.get_lit(&framework.unnamed[0]);
        }

        let bucketizer = format!("{}bucketizer.{}", param_value, aggregator);

        let attribute_tok = attribute.map(|attribute| attribute.tok).unwrap_or_default();
        let by_macro = match attribute_tok {
            Token::Names => {
                operator = flip_sort_direction(operator);
                "<% NAME %> ".to_string()
            }
            Token::Selectors => {
                operator = flip_sort_direction(operator);
                "<% TOSELECTOR %> ".to_string()
            }
            Token::Labels | Token::Attributes => {
                operator = flip_sort_direction(operator);
                let source = if attribute_tok == Token::Labels {
                    "LABELS"
                } else {
                    "ATTRIBUTES"
                };
                let mut by_macro = format!(" <% {} 'sbLabels' STORE ", source);
                if framework
                    .unnamed
                    .first()
                    .is_some_and(|field| field.tok == Token::InternalList)
                {
                    by_macro.push_str("[ ");
                    for label in &framework.unnamed[0].field_list {
                        by_macro.push_str(&format!(
                            "$sbLabels {} GET <% DUP ISNULL %> <% DROP '' %> IFT ",
                            self.get_lit(label)
                        ));
                    }
                    by_macro.push_str(" ] '' JOIN ");
                } else if let Some(label) = framework.unnamed.first() {
                    by_macro.push_str(&format!(
                        "$sbLabels {} GET <% DUP ISNULL %> <% DROP '' %> IFT ",
                        self.get_lit(label)
                    ));
                }
                by_macro.push_str("%> ");
                by_macro
            }
            _ => format!(
                "<% [ SWAP {} 0 0 1 ] BUCKETIZE VALUES 0 GET 0 GET %> ",
                bucketizer
            ),
        };

        Ok(format!("{}{}{}", by_macro, sort_operator(operator), value))
    }

    /// Emits the QUANTIZE machinery: explicit or computed step boundaries,
    /// a value histogram per bucket, then a sum-reduce on the label key.
    fn quantize(&self, framework: &FrameworkStatement, prefix: &str) -> Result<String, Error> {
        let mut buffer = String::new();
        let has_chunk = framework.unnamed.len() > 2;

        for (key, attribute) in framework.unnamed.iter().enumerate() {
            let mut param_value = self.get_lit(attribute);
            if attribute.tok == Token::InternalList {
                if attribute.field_list.is_empty() {
                    return Err(self.proto_error(
                        "Error in function quantize, expects at least a value in step list",
                        framework.pos,
                    ));
                }
                let mut list_value = "[ ".to_string();
                for item in &attribute.field_list {
                    if item.tok == Token::NativeVariable {
                        list_value.push_str(&format!("${} ", item.lit));
                        continue;
                    }
                    if !matches!(item.tok, Token::Number | Token::Integer) {
                        return Err(self.proto_error(
                            "Error in function quantize, expects only integer or number values in step list",
                            framework.pos,
                        ));
                    }
                    list_value.push_str(&format!("{} ", item.lit));
                }
                list_value.push_str("] ");
                param_value = list_value;
            }
            buffer.push_str(&param_value);

            match key {
                0 => buffer.push_str(&format!(" {}'labelKey' STORE\n", prefix)),
                1 => buffer.push_str(&format!(" {}'step' STORE\n", prefix)),
                2 => buffer.push_str(&format!(" {}'duration' STORE\n", prefix)),
                _ => {}
            }
        }
        buffer.push('\n');

        if has_chunk {
            buffer.push_str(&format!("{}0 $duration 0 0 '.chunkid' false CHUNK\n", prefix));
            buffer.push_str(&format!("{}<%\n", prefix));
            buffer.push_str(&format!("{}    DROP \n", prefix));
        }

        buffer.push_str(
            "[
SWAP
<%
    DUP 'series' STORE
    <% $step TYPEOF 'LIST' == %>
    <% $step %>
    <%
    [ $series mapper.min MAXLONG 0 -1 ] MAP 0 GET VALUES 0 GET 'min' STORE
    [ $series mapper.max MAXLONG 0 -1 ] MAP 0 GET VALUES 0 GET 'max' STORE
    $min $step / ROUND $step *  'incrementalStep' STORE
    [
        $incrementalStep
        $incrementalStep $step + DUP 'incrementalStep' STORE
        <% $incrementalStep $max < %>
        <%
            $incrementalStep $step + 'incrementalStep' STORE
            $incrementalStep
        %>
        WHILE
    ]
    %>
    IFTE
    DUP
    DUP SIZE 'length' STORE
    DUP $length 1 - GET 'last' STORE
    <%
        SWAP 'current' STORE
        <% 1 >= %>
        <%
            $previous TOSTRING '<' + 'v<=' + $current TOSTRING +
        %>
        <%
            '<=' $current TOSTRING +
        %>
        IFTE
        $current 'previous' STORE
    %>
    LMAP
    '>' $last TOSTRING + +
    QUANTIZE
    VALUEHISTOGRAM
    [
    SWAP
    <%
        'value' STORE
        'labelValue' STORE
        $series CLONEEMPTY
",
        );

        if has_chunk {
            buffer.push_str("        DUP LABELS '.chunkid' GET TOLONG\n");
        } else {
            buffer.push_str("        $series LASTTICK\n");
        }

        buffer.push_str(
            "        NaN NaN NaN
        $value
        ADDVALUE
        {
            '.chunkid' ''
            $labelKey $labelValue
        }
        RELABEL
    %>
    FOREACH
    ]
 %>
 FOREACH
 ]
 FLATTEN
[ SWAP [ $labelKey ] reducer.sum ] REDUCE FLATTEN
",
        );

        if has_chunk {
            buffer.push_str("%>\nLMAP\nFLATTEN\n");
        }
        Ok(buffer)
    }

    /// Emits the fixed-shape time operators (shift, clips, splits).
    fn operators(&self, framework: &FrameworkStatement) -> String {
        let operator_string = match framework.operator {
            Token::Shift => "TIMESHIFT",
            Token::Shrink => "SHRINK",
            Token::Timescale => "TIMESCALE",
            Token::TimeClip => "TIMECLIP",
            Token::TimeModulo => "TIMEMODULO FLATTEN",
            Token::TimeSplit => "TIMESPLIT FLATTEN",
            Token::Resets => "FALSE RESETS",
            _ => "",
        };

        let mut value = String::new();
        if let Some(attribute) = framework.attributes.get(&Prefix::MapperValue) {
            value = format!("{} ", self.get_lit(attribute));
        } else if !framework.unnamed.is_empty() {
            let params: Vec<String> = framework
                .unnamed
                .iter()
                .map(|attribute| self.get_lit(attribute))
                .collect();
            value = format!("{} ", params.join(" "));
        }

        if framework.operator == Token::Shrink {
            return format!("<% DROP {}{} %> LMAP", value, operator_string);
        }

        format!("{}{}", value, operator_string)
    }

    fn filter_without_labels(&self, framework: &FrameworkStatement) -> String {
        let mut buffer = String::new();

        buffer.push_str(
            "<%
DUP
0 GET
SWAP FILTER
->SET
SWAP ->SET
SWAP 2 DUPN DIFFERENCE
SET-> SWAP SET->
ROT DROP
%>
'neg-filter' CSTORE
",
        );

        for label_key in &framework.unnamed {
            if label_key.tok == Token::NativeVariable {
                buffer.push_str(&format!(
                    "[ SWAP [] {{ ${} '~.*' }} filter.bylabels ] @neg-filter\n",
                    label_key.lit
                ));
            } else {
                buffer.push_str(&format!(
                    "[ SWAP [] {{ '{}' '~.*' }} filter.bylabels ] @neg-filter\n",
                    label_key.lit
                ));
            }
            buffer.push_str(" DROP \n");
        }

        buffer
    }

    /// Emits a FILTER over labels, name or last value.
    fn filter(&self, framework: &FrameworkStatement) -> Result<String, Error> {
        let mut value = "[ SWAP [] ".to_string();
        let mut params = framework.unnamed.clone();
        let mut filter_type = String::new();

        match framework.operator {
            Token::FilterByLastValue => {
                if params.len() != 1 {
                    let message =
                        format!("{} expects only one value", Token::FilterByLastValue.as_str());
                    return Err(self.proto_error(message, framework.pos));
                }

                if params[0].tok == Token::NativeVariable {
                    // The operator is only known at runtime: dispatch on the
                    // pushed string's comparison prefix.
                    let name = params[0].lit.clone();
                    params[0].lit = format!(
                        "
'filter.last.' 'prefixFilterOperator' STORE
${}
<% DUP 0 2 SUBSTRING \">=\" == %>
<%
    2 SUBSTRING EVAL
    $prefixFilterOperator 'ge' + EVAL
%>
<% DUP 0 2 SUBSTRING \"<=\" == %>
<%
    2 SUBSTRING EVAL
    $prefixFilterOperator 'le' + EVAL
%>
<% DUP 0 2 SUBSTRING \"!=\" == %>
<%
    2 SUBSTRING EVAL
    $prefixFilterOperator 'ne' + EVAL
%>
<% DUP 0 1 SUBSTRING \"=\" == %>
<%
    1 SUBSTRING EVAL
    $prefixFilterOperator 'eq' + EVAL
%>
<% DUP 0 1 SUBSTRING \"<\" == %>
<%
    1 SUBSTRING EVAL
    $prefixFilterOperator 'lt' + EVAL
%>
<% DUP 0 1 SUBSTRING \">\" == %>
<%
    1 SUBSTRING EVAL
    $prefixFilterOperator 'gt' + EVAL
%>
<% 'Unkown operator in filterbyvalue function' MSGFAIL  %>
6
SWITCH
",
                        name
                    );
                } else {
                    let lit = params[0].lit.clone();
                    let (op, rest) = if let Some(rest) = lit.strip_prefix("<=") {
                        ("le", rest)
                    } else if let Some(rest) = lit.strip_prefix("<") {
                        ("lt", rest)
                    } else if let Some(rest) = lit.strip_prefix("!=") {
                        ("ne", rest)
                    } else if let Some(rest) = lit.strip_prefix(">=") {
                        ("ge", rest)
                    } else if let Some(rest) = lit.strip_prefix(">") {
                        ("gt", rest)
                    } else if let Some(rest) = lit.strip_prefix("=") {
                        ("eq", rest)
                    } else {
                        let message =
                            "last value first caracter must be one a lower, geater, equal or not sign";
                        return Err(self.proto_error(message, framework.pos));
                    };
                    filter_type = format!("last.{}", op);
                    params[0].lit = rest.to_string();
                }
            }

            Token::FilterByLabels => {
                filter_type = "bylabels".to_string();
                let mut filters = Vec::new();
                for label in &params {
                    filters.push(self.generator_where_field(
                        &label.lit,
                        framework.pos,
                        label.tok,
                        framework.operator,
                    )?);
                }
                value.push_str(&self.get_fetch_labels(&filters));
            }

            Token::FilterByName => {
                if params.len() != 1 {
                    let message =
                        format!("{} expects only one value", Token::FilterByName.as_str());
                    return Err(self.proto_error(message, framework.pos));
                }
                filter_type = "byclass".to_string();
                if params[0].tok == Token::NativeVariable {
                    params[0].lit = format!("${}", params[0].lit);
                } else {
                    let where_item = self.generator_where_field(
                        &params[0].lit,
                        framework.pos,
                        params[0].tok,
                        framework.operator,
                    )?;
                    params[0].lit = self.get_where_value_string(&where_item);
                }
            }

            _ => {}
        }

        if framework.operator != Token::FilterByLabels {
            let param_lits: Vec<String> =
                params.iter().map(|attribute| attribute.lit.clone()).collect();
            value.push_str(&param_lits.join(" "));
        }

        if params
            .first()
            .is_some_and(|param| param.tok == Token::NativeVariable)
            && framework.operator == Token::FilterByLastValue
        {
            return Ok(format!("{} ] FILTER", value));
        }
        Ok(format!("{} filter.{} ] FILTER", value, filter_type))
    }

    /// Matcher parsing shared with filters, where the value may also be a
    /// bare regex name filter.
    fn generator_where_field(
        &self,
        lit: &str,
        pos: crate::ast::Pos,
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
            return Err(self.proto_error(
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

    /// Emits the value list of a rename or store.
    fn n_values_operators(&self, framework: &FrameworkStatement) -> String {
        let operator_string = match framework.operator {
            Token::Rename => "RENAME",
            Token::Store => "UPDATE",
            _ => "",
        };

        let mut value = String::new();
        for attribute in &framework.unnamed {
            value.push_str(&format!("{} ", self.get_lit(attribute)));
        }

        format!("{}{}", value, operator_string)
    }

    fn add_name_prefix(&self, framework: &FrameworkStatement) -> Result<String, Error> {
        let Some(attribute) = framework.unnamed.first() else {
            return Ok(String::new());
        };
        if attribute.tok != Token::Str && attribute.tok != Token::NativeVariable {
            let message = "to add a prefix name expects a label name as STRING";
            return Err(self.proto_error(message, framework.pos));
        }
        Ok(format!(
            "<% DROP DUP NAME {} SWAP + RENAME %> LMAP ",
            self.get_lit(attribute)
        ))
    }

    fn remove_labels(&self, framework: &FrameworkStatement) -> Result<String, Error> {
        // Without arguments every label is cleared.
        if framework.unnamed.is_empty() {
            return Ok("<% DROP DUP LABELS { SWAP <% DROP '' %> FOREACH } RELABEL %> LMAP".to_string());
        }

        let mut value = "<% DROP { ".to_string();
        for attribute in &framework.unnamed {
            if attribute.tok != Token::Str && attribute.tok != Token::NativeVariable {
                let message = "remove a label expects a labels name as STRING";
                return Err(self.proto_error(message, framework.pos));
            }
            value.push_str(&format!("{} '' ", self.get_lit(attribute)));
        }
        value.push_str("} RELABEL %> LMAP ");
        Ok(value)
    }

    /// Expands a rename template: `${this.name}` and `${this.labels.k}`
    /// splice the current series name and labels into the new name.
    fn rename_template(&self, framework: &FrameworkStatement) -> Result<String, Error> {
        let Some(attribute) = framework.unnamed.first() else {
            return Ok(String::new());
        };
        if attribute.tok != Token::Str && attribute.tok != Token::NativeVariable {
            let message = "Rename template expects its parameter to be a STRING";
            return Err(self.proto_error(message, framework.pos));
        }

        let mut value = format!(
            "<% DROP DUP 'series' STORE [ {} ]",
            self.get_lit(attribute)
        );

        if value.contains("${this.name}") {
            value = value.replace("${this.name}", "' $series NAME '");
        }

        while let Some(start) = value.find("${this.labels.") {
            let after = &value[start + "${this.labels.".len()..];
            let Some(end) = after.find('}') else {
                let message = format!(
                    "expect a }} to end current label template: {}}}",
                    after
                );
                return Err(self.proto_error(message, framework.pos));
            };
            let label_key = after[..end].to_string();
            value = value.replacen(
                &format!("${{this.labels.{}}}", label_key),
                &format!("' $series LABELS '{}' GET '", label_key),
                1,
            );
        }

        value.push_str(" '' JOIN RENAME %> LMAP");
        Ok(value)
    }

    fn set_label_from_name(&self, framework: &FrameworkStatement) -> String {
        let label = framework
            .unnamed
            .first()
            .map(|field| self.get_lit(field))
            .unwrap_or_default();

        let mut matcher = String::new();
        if framework.unnamed.len() == 2 {
            let regex = self.get_lit(&framework.unnamed[1]);
            matcher = format!(
                "{} MATCH DUP SIZE 0 > <% '' 0 SET %> IFT '' JOIN ",
                regex
            );
        }

        format!(
            "<% DROP DUP {{ {} ROT NAME {}}} RELABEL %> LMAP",
            label, matcher
        )
    }

    /// Renames each series by concatenating the values of the given label
    /// keys.
    fn rename_by(&self, framework: &FrameworkStatement) -> String {
        if framework.unnamed.is_empty() {
            return String::new();
        }

        let mut value =
            "<% DROP DUP LABELS 'labels' STORE '' 'prefix' STORE false 'toRename' STORE '' "
                .to_string();

        for attribute in &framework.unnamed {
            let lit = self.get_lit(attribute);
            value.push_str(&format!(
                "<% $labels {} CONTAINSKEY %> <% $prefix SWAP {} GET + + '-' 'prefix' STORE true 'toRename' STORE %> <% DROP %> IFTE ",
                lit, lit
            ));
        }

        value.push_str(" <% $toRename %> <% RENAME %> <% DROP %> IFTE %> LMAP");
        value
    }

    fn rename_label_key(&self, framework: &FrameworkStatement) -> Result<String, Error> {
        if framework.unnamed.len() < 2 {
            let message = "renameLabelKey expects labels name as STRING";
            return Err(self.proto_error(message, framework.pos));
        }
        let old = &framework.unnamed[0];
        let new = &framework.unnamed[1];

        if (old.tok != Token::Str && old.tok != Token::NativeVariable)
            || (new.tok != Token::Str && new.tok != Token::NativeVariable)
        {
            let message = "renameLabelKey expects labels name as STRING";
            return Err(self.proto_error(message, framework.pos));
        }

        let old_lit = self.get_lit(old);
        let new_lit = self.get_lit(new);

        Ok(format!(
            "<% DROP DUP LABELS {} GET {{ {} ROT {} '' }} RELABEL %> LMAP ",
            old_lit, new_lit, old_lit
        ))
    }

    fn rename_label_value(&self, framework: &FrameworkStatement) -> Result<String, Error> {
        if framework.unnamed.len() < 3 {
            let message = "renameLabelValue expects labels name as STRING";
            return Err(self.proto_error(message, framework.pos));
        }
        let label_key = &framework.unnamed[0];
        let reg_exp = &framework.unnamed[1];
        let new_value = &framework.unnamed[2];

        for field in [label_key, reg_exp, new_value] {
            if field.tok != Token::Str && field.tok != Token::NativeVariable {
                let message = "renameLabelValue expects labels name as STRING";
                return Err(self.proto_error(message, framework.pos));
            }
        }

        Ok(format!(
            "<% DROP DUP LABELS {} GET {} MATCHER MATCH <% SIZE 0 > %> <% {{ {} {} }} RELABEL %> IFT %> LMAP ",
            self.get_lit(label_key),
            self.get_lit(reg_exp),
            self.get_lit(label_key),
            self.get_lit(new_value)
        ))
    }

    /// Keeps only the first or last N values of each series.
    fn keep_values(&self, framework: &FrameworkStatement) -> String {
        let value = framework
            .attributes
            .get(&Prefix::MapperValue)
            .map(|attribute| self.get_lit(attribute))
            .unwrap_or_else(|| "1".to_string());

        // The kept count is clamped to each series size.
        let mut buffer = format!("<% DROP {} SWAP DUP SIZE ROT MIN", value);
        if framework.operator == Token::KeepLastValues {
            buffer.push_str(" -1 * ");
        }
        buffer.push_str(" SHRINK %> LMAP");
        buffer
    }

    //
    // Emission utilities
    //

    /// Resolves the select end bound as a timestamp expression.
    fn get_last_timestamp(&self, select: &SelectStatement) -> Result<String, Error> {
        if let Some(from) = &select.from {
            if let Some(to) = &from.to {
                let value = self.get_lit(to);
                return match to.tok {
                    Token::NativeVariable => Ok(format!(
                        "{} DUP TYPEOF <% 'STRING' == %> <% TOTIMESTAMP %> IFT",
                        value
                    )),
                    Token::Ident => Ok(value),
                    Token::Str => Ok(format!("{} TOTIMESTAMP", value)),
                    Token::Integer | Token::Number => Ok(value),
                    _ => Err(self.proto_error(
                        "dates can only be an INTEGER or STRINGS",
                        select.pos,
                    )),
                };
            }
        } else if select.last.is_some() {
            return self.get_last_tick(select);
        }
        Ok("$now".to_string())
    }

    /// Resolves the select end bound for a FETCH (ISO8601 for from-bounds,
    /// shifted timestamp for last-bounds).
    fn get_last_tick(&self, select: &SelectStatement) -> Result<String, Error> {
        if let Some(from) = &select.from {
            if let Some(to) = &from.to {
                let value = self.get_lit(to);
                return match to.tok {
                    Token::NativeVariable => Ok(format!(
                        "{} DUP TYPEOF <% 'STRING' != %> <% ISO8601 %> IFT",
                        value
                    )),
                    Token::Ident => Ok(value),
                    Token::Str => Ok(value),
                    Token::Integer | Token::Number => Ok(format!("{} ISO8601", value)),
                    _ => Err(self.proto_error(
                        "dates can only be an INTEGER or STRINGS",
                        select.pos,
                    )),
                };
            }
            return Ok("$now ISO8601".to_string());
        }

        if let Some(last) = &select.last {
            let shift = last
                .options
                .get(&Prefix::Shift)
                .map(|value| self.get_lit(value))
                .unwrap_or_else(|| "0 h".to_string());

            if let Some(value) = last.options.get(&Prefix::Timestamp) {
                return Ok(format!("{} {} -", self.get_lit(value), shift));
            }
            if let Some(value) = last.options.get(&Prefix::Date) {
                return Ok(format!("{} TOTIMESTAMP {} -", self.get_lit(value), shift));
            }
            if let Some(value) = last.options.get(&Prefix::Unknown) {
                return Ok(format!(
                    "{} DUP TYPEOF <% 'STRING' == %> <% TOTIMESTAMP %> IFT {} -",
                    self.get_lit(value),
                    shift
                ));
            }
            if shift != "0 h" {
                return Ok(format!("$now {} -", shift));
            }
        }

        Ok("$now".to_string())
    }

    /// Resolves the select start bound or duration for a FETCH.
    fn get_from(&self, select: &SelectStatement) -> String {
        if let Some(from) = &select.from {
            let value = self.get_lit(&from.from);
            return match from.from.tok {
                Token::NativeVariable => format!(
                    "{} DUP TYPEOF <% 'STRING' != %> <% ISO8601 %> IFT",
                    value
                ),
                Token::Str => value,
                Token::Ident => value,
                _ => format!("{} ISO8601", value),
            };
        }

        if let Some(last) = &select.last {
            if last.last_type == Token::NativeVariable {
                return format!("${}", last.last);
            }
            if last.is_duration {
                return parse_shift(&last.last);
            }
            return format!("-{}", last.last);
        }

        "-1".to_string()
    }

    /// Returns whether the select is from-bounded and its sampling start
    /// value.
    fn get_from_sampling(&self, select: &SelectStatement) -> (bool, String) {
        if let Some(from) = &select.from {
            let value = self.get_lit(&from.from);
            if from.from.tok == Token::Str {
                return (true, format!("{} TOTIMESTAMP", value));
            }
            return (true, value);
        }

        if let Some(last) = &select.last {
            if last.is_duration {
                return (false, parse_shift(&last.last));
            }
        }

        (false, "0".to_string())
    }

    /// Renders the `{ 'key' 'value' }` label map of a FETCH/FIND, expanding
    /// native-variable matchers at runtime.
    fn get_fetch_labels(&self, labels: &[WhereField]) -> String {
        if labels.is_empty() {
            return "{}".to_string();
        }

        let mut buffer = "{ ".to_string();

        for label in labels {
            if label.where_type == Token::NativeVariable {
                buffer.push_str(&format!("${}", label.key));
                buffer.push_str(
                    "
DUP TYPEOF
<%
    'LIST' !=
%>
<%
    1 ->LIST
%>
IFT
<%
    DUP '=' SPLIT
    <%
        DUP SIZE 2 ==
    %>
    <%
        SWAP DROP LIST-> DROP
        CONTINUE
    %>
    IFT
    DROP
    '~' SPLIT
    <%
        DUP SIZE 2 ==
    %>
    <%
        LIST-> DROP
        '~' SWAP +
        CONTINUE
    %>
    IFT
    'Labels fields expects a \"=\" or a \"~\" as key value separator' MSGFAIL
%>
FOREACH
",
                );
            } else {
                buffer.push_str(&format!(
                    "{} {} ",
                    self.get_string_value(&label.key),
                    self.get_where_value_string(label)
                ));
            }
        }

        buffer.push('}');
        buffer
    }

    /// Renders a matcher value, translating regex and negative matches.
    fn get_where_value_string(&self, label: &WhereField) -> String {
        let value = match label.op {
            MatchType::Regex => format!("~{}", label.value),
            MatchType::NotEqual | MatchType::RegexNoMatch => {
                format!("~(?!{}).*", label.value)
            }
            MatchType::Equal => label.value.clone(),
        };
        self.get_string_value(&value)
    }

    /// Renders a list of label key fields.
    fn get_labels_string(&self, fields: &[InternalField]) -> String {
        if fields.len() == 1 && fields[0].tok == Token::NativeVariable {
            return format!("${}", fields[0].lit);
        }

        let mut buffer = "[".to_string();
        let mut separator = " ";
        for label in fields {
            buffer.push_str(&format!("{}\"{}\" ", separator, label.lit));
            separator = "";
        }
        buffer.push(']');
        buffer
    }

    /// Renders one typed field as its stack literal.
    fn get_lit(&self, field: &InternalField) -> String {
        match field.tok {
            Token::NativeVariable => format!("${}", field.lit),
            Token::Str => self.get_string_value(&field.lit),
            Token::Duration => parse_shift(&field.lit),
            _ => field.lit.clone(),
        }
    }

    /// Quotes a string literal, splicing `${this.nativevariable.v}`
    /// templates into runtime concatenations.
    fn get_string_value(&self, lit: &str) -> String {
        let mut value = format!("'{}'", lit);
        if !lit.contains("${this.nativevariable.") {
            return value;
        }

        let mut separator = "";
        loop {
            let Some(start) = value.find("${this.nativevariable.") else {
                break;
            };
            let after = &value[start + "${this.nativevariable.".len()..];
            let Some(end) = after.find('}') else {
                break;
            };
            let variable = after[..end].to_string();
            value = value.replacen(
                &format!("${{this.nativevariable.{}}}", variable),
                &format!("' {}${} TOSTRING + '", separator, variable),
                1,
            );
            separator = "+ ";
        }
        value.push_str(" +");
        value
    }
}

/// Maps a comparison operator to its stack shorthand.
fn comparator_name(tok: Token) -> &'static str {
    match tok {
        Token::Equal => "eq",
        Token::GreaterOrEqual => "ge",
        Token::GreaterThan => "gt",
        Token::LessOrEqual => "le",
        Token::LessThan => "lt",
        Token::NotEqual => "ne",
        _ => "",
    }
}

/// Maps a sort family operator to its SORTBY form.
fn sort_operator(tok: Token) -> &'static str {
    match tok {
        Token::BottomNBy | Token::SortBy | Token::BottomN | Token::Sort => "SORTBY",
        Token::SortDescBy | Token::TopNBy | Token::SortDesc | Token::TopN => "SORTBY REVERSE",
        _ => "",
    }
}

/// Top and bottom swap when sorting on a computed textual key.
fn flip_sort_direction(tok: Token) -> Token {
    match tok {
        Token::TopN => Token::BottomN,
        Token::BottomN => Token::TopN,
        Token::TopNBy => Token::BottomNBy,
        Token::BottomNBy => Token::TopNBy,
        other => other,
    }
}

/// Renders a list of label keys as a stack list literal.
fn get_labels_list_string(labels: &[String]) -> String {
    let mut buffer = "[".to_string();
    let mut separator = " ";
    for label in labels {
        buffer.push_str(&format!("{}\"{}\" ", separator, label));
        separator = "";
    }
    buffer.push(']');
    buffer
}

fn attribute_policy_string(policy: AttributePolicy, prefix: &str) -> String {
    match policy {
        AttributePolicy::Merge => format!(
            "\n{}<% DROP DUP DUP ATTRIBUTES SWAP LABELS APPEND RELABEL %> LMAP",
            prefix
        ),
        AttributePolicy::Split => String::new(),
        AttributePolicy::Remove => format!(
            "\n{}<% DROP DUP ATTRIBUTES {{ SWAP <% DROP '' %> FOREACH }} SETATTRIBUTES %> LMAP",
            prefix
        ),
    }
}

fn get_policy(fill_policy: &str) -> &'static str {
    match fill_policy {
        "auto" => "INTERPOLATE FILLPREVIOUS FILLNEXT",
        "none" => "",
        "previous" => "FILLPREVIOUS",
        "next" => "FILLNEXT",
        "interpolate" => "INTERPOLATE",
        _ => "",
    }
}

/// Splits a duration literal into its stack form: `15ms` becomes `15 ms`.
pub fn parse_shift(value: &str) -> String {
    if value.len() >= 2 {
        let two_end = &value[value.len() - 2..];
        if matches!(two_end, "ms" | "us" | "ns" | "ps") {
            return format!("{} {}", value.trim_end_matches(two_end), two_end);
        }
    }
    if !value.is_empty() {
        let end = &value[value.len() - 1..];
        if matches!(end, "w" | "d" | "h" | "m" | "s") {
            return format!("{} {}", value.trim_end_matches(end), end);
        }
    }
    String::new()
}
