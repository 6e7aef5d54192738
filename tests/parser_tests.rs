// tests/parser_tests.rs

use tsl_lang::ast::{AttributePolicy, InstructionKind, MatchType, Prefix, Token};
use tsl_lang::{Parser, Query};

fn parse(source: &str) -> Query {
    Parser::new(source, "", "", 0, "", "", &[])
        .expect("parser")
        .parse()
        .expect("query")
}

fn parse_err(source: &str) -> String {
    Parser::new(source, "", "", 0, "", "", &[])
        .expect("parser")
        .parse()
        .expect_err("expected a parse error")
        .to_string()
}

// ============================================================================
// Select statements
// ============================================================================

#[test]
fn test_simple_select() {
    let query = parse(r#"select("sys.cpu")"#);
    assert_eq!(query.instructions.len(), 1);

    let InstructionKind::Select(select) = &query.instructions[0].kind else {
        panic!("expected a select instruction");
    };
    assert_eq!(select.metric, "sys.cpu");
    assert!(!select.select_all);
}

#[test]
fn test_select_all() {
    let query = parse("select(*)");
    let InstructionKind::Select(select) = &query.instructions[0].kind else {
        panic!("expected a select instruction");
    };
    assert!(select.select_all);
}

#[test]
fn test_select_where_clause() {
    let query = parse(r#"select("m").where("host=web01", "dc~ln.*")"#);
    let select = query.instructions[0].select();

    assert_eq!(select.where_clauses.len(), 2);
    assert_eq!(select.where_clauses[0].key, "host");
    assert_eq!(select.where_clauses[0].op, MatchType::Equal);
    assert_eq!(select.where_clauses[0].value, "web01");
    assert_eq!(select.where_clauses[1].key, "dc");
    assert_eq!(select.where_clauses[1].op, MatchType::Regex);
    assert_eq!(select.where_clauses[1].value, "ln.*");
}

#[test]
fn test_where_not_equal_and_not_regex() {
    let query = parse(r#"select("m").where("a!=b", "c!~d.*")"#);
    let select = query.instructions[0].select();
    assert_eq!(select.where_clauses[0].op, MatchType::NotEqual);
    assert_eq!(select.where_clauses[1].op, MatchType::RegexNoMatch);
}

#[test]
fn test_where_list_parameter() {
    let query = parse(r#"select("m").where(["a=b", "c=d"])"#);
    let select = query.instructions[0].select();
    assert_eq!(select.where_clauses.len(), 2);
}

#[test]
fn test_where_without_operator_is_rejected() {
    let err = parse_err(r#"select("m").where("plainstring")"#);
    assert!(err.contains("where"), "{}", err);
}

#[test]
fn test_last_duration() {
    let query = parse(r#"select("m").last(1h)"#);
    let select = query.instructions[0].select();
    let last = select.last.as_ref().expect("last statement");
    assert_eq!(last.last, "1h");
    assert!(last.is_duration);
    assert!(select.from.is_none());
}

#[test]
fn test_last_count() {
    let query = parse(r#"select("m").last(100)"#);
    let last = query.instructions[0].select().last.as_ref().unwrap();
    assert_eq!(last.last, "100");
    assert!(!last.is_duration);
}

#[test]
fn test_last_with_named_shift() {
    let query = parse(r#"select("m").last(1h, shift=2m)"#);
    let last = query.instructions[0].select().last.as_ref().unwrap();
    let shift = last.options.get(&Prefix::Shift).expect("shift option");
    assert_eq!(shift.lit, "2m");
}

#[test]
fn test_last_with_positional_timestamp() {
    let query = parse(r#"select("m").last(1h, 1500000000)"#);
    let last = query.instructions[0].select().last.as_ref().unwrap();
    assert!(last.options.contains_key(&Prefix::Timestamp));
}

#[test]
fn test_from_with_bounds() {
    let query = parse(r#"select("m").from(1500000000, 1500003600)"#);
    let select = query.instructions[0].select();
    let from = select.from.as_ref().expect("from statement");
    assert_eq!(from.from.lit, "1500000000");
    assert_eq!(from.to.as_ref().unwrap().lit, "1500003600");
    assert!(select.last.is_none());
}

#[test]
fn test_from_and_last_are_exclusive() {
    let err = parse_err(r#"select("m").from(10).last(1h)"#);
    assert!(err.contains("time function is already set"), "{}", err);
}

#[test]
fn test_double_last_is_rejected() {
    let err = parse_err(r#"select("m").last(1h).last(2h)"#);
    assert!(err.contains("time function is already set"), "{}", err);
}

#[test]
fn test_attribute_policy() {
    let query = parse(r#"select("m").attributePolicy("remove").last(1h)"#);
    assert_eq!(
        query.instructions[0].select().attribute_policy,
        AttributePolicy::Remove
    );
}

#[test]
fn test_unknown_attribute_policy_is_rejected() {
    let err = parse_err(r#"select("m").attributePolicy("keep")"#);
    assert!(err.contains("merge"), "{}", err);
}

// ============================================================================
// Frameworks
// ============================================================================

#[test]
fn test_sample_by_span_and_aggregator() {
    let query = parse(r#"select("m").last(1h).sampleBy(1m, "mean")"#);
    let frameworks = &query.instructions[0].select().frameworks;
    assert_eq!(frameworks.len(), 1);
    assert_eq!(frameworks[0].operator, Token::SampleBy);
    assert_eq!(frameworks[0].attributes.get(&Prefix::Span).unwrap().lit, "1m");
    assert_eq!(
        frameworks[0].attributes.get(&Prefix::Aggregator).unwrap().lit,
        "mean"
    );
}

#[test]
fn test_sample_by_named_parameters() {
    let query = parse(r#"select("m").last(1h).sampleBy(span=1m, aggregator="max", fill="previous")"#);
    let sampler = &query.instructions[0].select().frameworks[0];
    assert_eq!(sampler.attributes.get(&Prefix::Span).unwrap().lit, "1m");
    assert_eq!(sampler.attributes.get(&Prefix::Aggregator).unwrap().lit, "max");
    assert_eq!(sampler.attributes.get(&Prefix::Fill).unwrap().lit, "previous");
}

#[test]
fn test_sample_by_must_be_first() {
    let err = parse_err(r#"select("m").last(1h).abs().sampleBy(1m, "mean")"#);
    assert!(err.contains("first method"), "{}", err);
}

#[test]
fn test_sample_by_span_needs_bounded_select() {
    let err = parse_err(r#"select("m").last(100).sampleBy(1m, "mean")"#);
    assert!(err.contains("counted item"), "{}", err);
}

#[test]
fn test_sample_forbids_span() {
    let err = parse_err(r#"select("m").last(1h).sample("mean", span=1m)"#);
    assert!(err.contains("no span or count"), "{}", err);
}

#[test]
fn test_sample_gets_default_count() {
    let query = parse(r#"select("m").last(1h).sample("mean")"#);
    let sampler = &query.instructions[0].select().frameworks[0];
    assert_eq!(sampler.attributes.get(&Prefix::Count).unwrap().lit, "100");
}

#[test]
fn test_sample_count_from_caller() {
    let mut parser = Parser::new(
        r#"select("m").last(1h).sample("mean")"#,
        "",
        "",
        0,
        "",
        "250",
        &[],
    )
    .unwrap();
    let query = parser.parse().unwrap();
    let sampler = &query.instructions[0].select().frameworks[0];
    assert_eq!(sampler.attributes.get(&Prefix::Count).unwrap().lit, "250");
}

#[test]
fn test_percentile_parameter_is_promoted() {
    let query = parse(r#"select("m").last(1h).sampleBy(1m, percentile, 99)"#);
    let sampler = &query.instructions[0].select().frameworks[0];
    assert_eq!(sampler.unnamed[0].lit, "99.0");
    assert_eq!(sampler.unnamed[0].tok, Token::Number);
}

#[test]
fn test_quoted_percentile_behaves_like_keyword() {
    let query = parse(r#"select("m").last(1h).sampleBy(1m, "percentile", 99)"#);
    let sampler = &query.instructions[0].select().frameworks[0];
    assert_eq!(sampler.unnamed[0].lit, "99.0");
}

#[test]
fn test_percentile_out_of_range_is_rejected() {
    let err = parse_err(r#"select("m").last(1h).sampleBy(1m, percentile, 101)"#);
    assert!(err.contains("[0, 100["), "{}", err);
}

#[test]
fn test_percentile_hundred_is_rejected() {
    let err = parse_err(r#"select("m").last(1h).sampleBy(1m, percentile, 100)"#);
    assert!(err.contains("[0, 100["), "{}", err);
}

#[test]
fn test_framework_chain_order_is_preserved() {
    let query = parse(r#"select("m").last(1h).sampleBy(1m, "mean").abs().rate(1s).shift(2m)"#);
    let operators: Vec<Token> = query.instructions[0]
        .select()
        .frameworks
        .iter()
        .map(|framework| framework.operator)
        .collect();
    assert_eq!(
        operators,
        vec![Token::SampleBy, Token::Abs, Token::Rate, Token::Shift]
    );
}

#[test]
fn test_rate_sets_flag() {
    let query = parse(r#"select("m").last(1h).sampleBy(1m, "mean").rate()"#);
    assert!(query.instructions[0].select().has_rate);
}

#[test]
fn test_group_by_inserts_implicit_sampler() {
    let query = parse(r#"select("m").last(1h).groupBy("dc", "sum")"#);
    let frameworks = &query.instructions[0].select().frameworks;
    assert_eq!(frameworks.len(), 2);
    assert_eq!(frameworks[0].operator, Token::SampleBy);
    assert_eq!(
        frameworks[0].attributes.get(&Prefix::Aggregator).unwrap().lit,
        "last"
    );
    assert_eq!(frameworks[0].attributes.get(&Prefix::Span).unwrap().lit, "1m");
    assert_eq!(frameworks[1].operator, Token::GroupBy);
}

#[test]
fn test_group_by_no_implicit_sampler_when_sampled() {
    let query = parse(r#"select("m").last(1h).sampleBy(1m, "mean").groupBy("dc", "sum")"#);
    let frameworks = &query.instructions[0].select().frameworks;
    assert_eq!(frameworks.len(), 2);
}

#[test]
fn test_group_by_label_list() {
    let query = parse(r#"select("m").last(1h).sampleBy(1m, "mean").groupBy(["dc", "host"], "sum")"#);
    let group = &query.instructions[0].select().frameworks[1];
    let labels: Vec<&str> = group.unnamed.iter().map(|field| field.lit.as_str()).collect();
    assert_eq!(labels, vec!["dc", "host"]);
}

#[test]
fn test_window_operator_with_duration_inserts_sampler() {
    let query = parse(r#"select("m").last(1h).mean(2m)"#);
    let frameworks = &query.instructions[0].select().frameworks;
    assert_eq!(frameworks.len(), 2);
    assert_eq!(frameworks[0].operator, Token::SampleBy);
    assert_eq!(frameworks[1].operator, Token::Mean);
    assert!(frameworks[1].attributes.contains_key(&Prefix::Sampler));
}

#[test]
fn test_window_operator_pre_post() {
    let query = parse(r#"select("m").last(1h).sampleBy(1m, "mean").mean(5, 3)"#);
    let mean = &query.instructions[0].select().frameworks[1];
    assert_eq!(mean.attributes.get(&Prefix::Pre).unwrap().lit, "5");
    assert_eq!(mean.attributes.get(&Prefix::Post).unwrap().lit, "3");
}

#[test]
fn test_no_arg_operator_rejects_parameters() {
    let err = parse_err(r#"select("m").last(1h).abs(3)"#);
    assert!(err.contains("does not expect") || err.contains("at most"), "{}", err);
}

#[test]
fn test_top_n_zero_is_rejected() {
    let err = parse_err(r#"select("m").last(1h).sampleBy(1m, "mean").topN(0)"#);
    assert!(err.contains("value > 0"), "{}", err);
}

#[test]
fn test_rename_label_value_defaults_regex() {
    let query = parse(r#"select("m").last(1h).renameLabelValue("dc", "eu")"#);
    let rename = &query.instructions[0].select().frameworks[0];
    assert_eq!(rename.unnamed.len(), 3);
    assert_eq!(rename.unnamed[1].lit, ".*");
}

#[test]
fn test_remove_labels_allows_zero_arguments() {
    let query = parse(r#"select("m").last(1h).removeLabels()"#);
    let remove = &query.instructions[0].select().frameworks[0];
    assert!(remove.unnamed.is_empty());
}

#[test]
fn test_filter_by_last_value() {
    let query = parse(r#"select("m").last(1h).filterByLastValue(">=100")"#);
    let filter = &query.instructions[0].select().frameworks[0];
    assert_eq!(filter.operator, Token::FilterByLastValue);
    assert_eq!(filter.unnamed[0].lit, ">=100");
}

// ============================================================================
// Meta queries
// ============================================================================

#[test]
fn test_names_meta() {
    let query = parse(r#"select("m").names()"#);
    assert!(query.instructions[0].is_meta());
}

#[test]
fn test_labels_meta_with_key() {
    let query = parse(r#"select("m").labels("host")"#);
    let InstructionKind::Meta(select) = &query.instructions[0].kind else {
        panic!("expected a meta instruction");
    };
    assert_eq!(select.frameworks[0].operator, Token::Labels);
    assert_eq!(select.frameworks[0].unnamed[0].lit, "host");
}

#[test]
fn test_meta_after_time_bound_is_rejected() {
    let err = parse_err(r#"select("m").last(1h).names()"#);
    assert!(err.contains("single select statement"), "{}", err);
}

// ============================================================================
// Global operators
// ============================================================================

#[test]
fn test_add_operator() {
    let query = parse(r#"add(select("a").last(1h), select("b").last(1h))"#);
    let InstructionKind::Operator { operator, .. } = &query.instructions[0].kind else {
        panic!("expected an operator instruction");
    };
    assert_eq!(operator.operator, Token::AddSeries);
    assert_eq!(operator.instructions.len(), 2);
}

#[test]
fn test_operator_requires_two_parameters() {
    let err = parse_err(r#"add(select("a").last(1h))"#);
    assert!(err.contains("at least 2 parameters"), "{}", err);
}

#[test]
fn test_mask_limits_parameters() {
    let err = parse_err(
        r#"mask(select("a").last(1h), select("b").last(1h), select("c").last(1h))"#,
    );
    assert!(err.contains("at most 2 parameters"), "{}", err);
}

#[test]
fn test_on_labels() {
    let query = parse(r#"add(select("a").last(1h), select("b").last(1h)).on("host")"#);
    let operator = query.instructions[0].operator().unwrap();
    assert_eq!(operator.labels, vec!["host".to_string()]);
    assert!(operator.is_on);
}

#[test]
fn test_on_and_ignoring_conflict() {
    let err = parse_err(
        r#"add(select("a").last(1h), select("b").last(1h)).on("host").ignoring("dc")"#,
    );
    assert!(err.contains("Conflict"), "{}", err);
}

#[test]
fn test_group_left_requires_matching_clause() {
    let err = parse_err(r#"add(select("a").last(1h), select("b").last(1h)).groupLeft()"#);
    assert!(err.contains("on or ignoring"), "{}", err);
}

#[test]
fn test_group_label_must_not_overlap_on() {
    let err = parse_err(
        r#"add(select("a").last(1h), select("b").last(1h)).on("host").groupLeft("host")"#,
    );
    assert!(err.contains("must not occur in ON and GROUP"), "{}", err);
}

#[test]
fn test_operators_nest() {
    let query = parse(
        r#"add(mul(select("a").last(1h), select("b").last(1h)), select("c").last(1h))"#,
    );
    let operator = query.instructions[0].operator().unwrap();
    assert_eq!(operator.instructions.len(), 2);
    let inner = operator.instructions[0].operator().expect("nested operator");
    assert_eq!(inner.operator, Token::MulSeries);
}

#[test]
fn test_connect_not_allowed_inside_operator() {
    let err = parse_err(r#"add(connect("warp10", "http://w", "t"), select("b").last(1h))"#);
    assert!(err.contains("isn't allowed in an operator"), "{}", err);
}

#[test]
fn test_post_operator_frameworks() {
    let query =
        parse(r#"add(select("a").last(1h), select("b").last(1h)).add(5)"#);
    let select = query.instructions[0].select();
    assert_eq!(select.frameworks.len(), 1);
    assert_eq!(select.frameworks[0].operator, Token::AddSeries);
}

// ============================================================================
// Variables
// ============================================================================

#[test]
fn test_scalar_variable_use() {
    let query = parse("x = 'sys.cpu'\nselect(x).last(1h)");
    assert_eq!(query.instructions[0].select().metric, "sys.cpu");
}

#[test]
fn test_select_variable_splices() {
    let query = parse(r#"x = select("m").last(10m)
x.sampleBy(30s, "mean")"#);
    assert_eq!(query.instructions.len(), 1);
    let select = query.instructions[0].select();
    assert_eq!(select.metric, "m");
    assert_eq!(select.frameworks.len(), 1);
}

#[test]
fn test_gts_list_variable_appends_frameworks() {
    let query = parse(r#"x = select("m").last(10m).sampleBy(30s, "mean")
x.rate(1s)"#);
    let frameworks = &query.instructions[0].select().frameworks;
    assert_eq!(frameworks.len(), 2);
    assert_eq!(frameworks[1].operator, Token::Rate);
}

#[test]
fn test_variable_used_twice_is_independent() {
    let query = parse(r#"x = select("m").last(10m).sampleBy(30s, "mean")
x.rate(1s)
x.abs()"#);
    assert_eq!(query.instructions.len(), 2);
    assert_eq!(query.instructions[0].select().frameworks.len(), 2);
    assert_eq!(query.instructions[1].select().frameworks.len(), 2);
    assert_eq!(
        query.instructions[1].select().frameworks[1].operator,
        Token::Abs
    );
}

#[test]
fn test_list_variable_composition() {
    let query = parse(r#"keys = ["host", "dc"]
select("m").last(1h).sampleBy(1m, "mean").groupBy(keys.add("rack").remove("dc"), "sum")"#);
    let group = &query.instructions[0].select().frameworks[1];
    let labels: Vec<&str> = group.unnamed.iter().map(|field| field.lit.as_str()).collect();
    assert_eq!(labels, vec!["host", "rack"]);
}

#[test]
fn test_unknown_variable_is_rejected() {
    let err = parse_err("y.rate(1s)");
    assert!(err.contains("doesn't exists"), "{}", err);
}

#[test]
fn test_variable_in_operator_inherits_connect() {
    let query = parse(
        r#"x = select("a").last(1h)
connect("warp10", "http://w10", "tok")
add(x, select("b").last(1h))"#,
    );
    let operator = query.instructions[0].operator().unwrap();
    assert_eq!(operator.instructions[0].connect.token, "tok");
}

#[test]
fn test_variable_declaration_inside_variable_is_rejected() {
    let err = parse_err("x = y = 5");
    assert!(err.contains("cannot be declared inside a variable"), "{}", err);
}

// ============================================================================
// Connect statements
// ============================================================================

#[test]
fn test_connect_is_sticky() {
    let query = parse(
        r#"connect("warp10", "http://w10", "tok")
select("a").last(1h)
select("b").last(1h)"#,
    );
    assert_eq!(query.instructions.len(), 2);
    assert_eq!(query.instructions[0].connect.token, "tok");
    assert_eq!(query.instructions[1].connect.token, "tok");
    assert_eq!(query.instructions[1].connect.api, "http://w10");
}

#[test]
fn test_connect_replaced_by_later_connect() {
    let query = parse(
        r#"connect("warp10", "http://one", "t1")
select("a").last(1h)
connect("warp10", "http://two", "t2")
select("b").last(1h)"#,
    );
    assert_eq!(query.instructions[0].connect.api, "http://one");
    assert_eq!(query.instructions[1].connect.api, "http://two");
}

#[test]
fn test_connect_prometheus_basic_auth() {
    let query = parse(
        r#"connect("prometheus", "http://prom", "user", "pass")
select("a").last(1h).sampleBy(1m, "mean")"#,
    );
    // base64("user:pass")
    assert_eq!(query.instructions[0].connect.token, "dXNlcjpwYXNz");
}

#[test]
fn test_connect_warp10_requires_token() {
    let err = parse_err(r#"connect("warp10", "http://w10")"#);
    assert!(err.contains("endpoint and a token"), "{}", err);
}

// ============================================================================
// Create statements
// ============================================================================

#[test]
fn test_create_series() {
    let query = parse(
        r#"create(series("mySeries").setLabels("host=web01").setValues("now", [-5m, 2], [0, 3]))"#,
    );
    let InstructionKind::Create { create, select } = &query.instructions[0].kind else {
        panic!("expected a create instruction");
    };
    assert_eq!(create.series.len(), 1);
    assert_eq!(create.series[0].metric, "mySeries");
    assert_eq!(create.series[0].values.len(), 2);
    assert_eq!(create.series[0].end.as_ref().unwrap().lit, "now");
    // Created values install the synthetic time bounds.
    assert_eq!(select.from.as_ref().unwrap().from.lit, "$minCreateTick");
}

#[test]
fn test_create_rejects_double_end() {
    let err = parse_err(r#"create(series("s").setValues(100, 200, [0, 1]))"#);
    assert!(err.contains("previously set"), "{}", err);
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_error_carries_position() {
    let err = parse_err(r#"select("m").last(1h).last(2h)"#);
    assert!(err.contains("at line 1, char"), "{}", err);
}

#[test]
fn test_line_start_shifts_reported_lines() {
    let source = "select(\"m\")\n.last(1h)\n.last(2h)";
    let err = Parser::new(source, "", "", 2, "", "", &[])
        .unwrap()
        .parse()
        .expect_err("expected error")
        .to_string();
    // Error is on source line 2 (zero-based): 2 + 1 - 2 = 1.
    assert!(err.contains("at line 1, char"), "{}", err);
}

#[test]
fn test_head_error_respects_line_start() {
    // The instruction-head error is shifted like every other diagnostic.
    let source = "select(\"m\").last(1h)\nfrom(1)";
    let err = Parser::new(source, "", "", 1, "", "", &[])
        .unwrap()
        .parse()
        .expect_err("expected error")
        .to_string();
    assert!(
        err.contains("Unexpected reserved keyword to start instruction at line 1, char 1"),
        "{}",
        err
    );
}

#[test]
fn test_declaration_error_carries_position() {
    let err = parse_err("x = y = 5");
    assert!(err.contains("Cannot parse query:"), "{}", err);
    assert!(
        err.contains("A variable cannot be declared inside a variable at line 1, char"),
        "{}",
        err
    );
}

#[test]
fn test_explicit_from_replaces_query_range_last() {
    let mut parser = Parser::new(
        r#"select("m").from(1500000000, 1500003600).sampleBy(30s, "mean")"#,
        "",
        "",
        0,
        "1h",
        "",
        &[],
    )
    .unwrap();
    let query = parser.parse().unwrap();
    let select = query.instructions[0].select();
    assert_eq!(select.from.as_ref().unwrap().from.lit, "1500000000");
    assert!(select.last.is_none());
}

#[test]
fn test_explicit_last_replaces_query_range_from() {
    let mut parser = Parser::new(
        r#"select("m").last(5m).sampleBy(30s, "mean")"#,
        "",
        "",
        0,
        "1500000000,1500003600",
        "",
        &[],
    )
    .unwrap();
    let query = parser.parse().unwrap();
    let select = query.instructions[0].select();
    assert_eq!(select.last.as_ref().unwrap().last, "5m");
    assert!(select.from.is_none());
}

#[test]
fn test_unknown_method_is_rejected() {
    // An unknown identifier ends the chain and is then rejected as an
    // undeclared variable reference.
    let err = parse_err(r#"select("m").last(1h).frobnicate()"#);
    assert!(err.contains("doesn't exists"), "{}", err);
}

// ============================================================================
// Round-trip properties
// ============================================================================

#[test]
fn test_parse_is_deterministic() {
    let source = r#"connect("warp10", "http://w10", "t")
select("sys.cpu").where("host=web01").last(1h).sampleBy(1m, "mean").groupBy("dc", "sum")
add(select("a").last(1h), select("b").last(1h)).on("host")"#;
    let first = parse(source);
    let second = parse(source);
    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn test_sampler_is_always_first_framework() {
    let sources = [
        r#"select("m").last(1h).sampleBy(1m, "mean").abs().rate(1s)"#,
        r#"select("m").last(1h).sample("mean").abs()"#,
        r#"select("m").last(1h).sampleBy(1m, "mean").groupBy("dc", "sum")"#,
    ];
    for source in sources {
        let query = parse(source);
        for instruction in &query.instructions {
            let frameworks = &instruction.select().frameworks;
            for (index, framework) in frameworks.iter().enumerate() {
                if matches!(framework.operator, Token::Sample | Token::SampleBy) {
                    assert_eq!(index, 0, "sampler must be first in {}", source);
                }
            }
        }
    }
}
