// tests/promql_tests.rs

use tsl_lang::promql::{PromQlGenerator, Ql};
use tsl_lang::Parser;

const NOW_MS: i64 = 1_700_000_000_000;

fn compile(source: &str) -> Vec<Ql> {
    let mut parser = Parser::new(source, "", "", 0, "", "", &[]).expect("parser");
    let query = parser.parse().expect("query");
    let generator = PromQlGenerator::new(0);
    query
        .instructions
        .iter()
        .map(|instruction| generator.generate(instruction, NOW_MS).expect("promql"))
        .collect()
}

fn compile_one(source: &str) -> Ql {
    compile(source).remove(0)
}

fn compile_err(source: &str) -> String {
    let mut parser = Parser::new(source, "", "", 0, "", "", &[]).expect("parser");
    let query = parser.parse().expect("query");
    let generator = PromQlGenerator::new(0);
    for instruction in &query.instructions {
        if let Err(e) = generator.generate(instruction, NOW_MS) {
            return e.to_string();
        }
    }
    panic!("expected a generation error");
}

// ============================================================================
// Selects
// ============================================================================

#[test]
fn test_select_with_where_and_sampler() {
    let ql = compile_one(r#"select("sys.cpu").where("host=web01").last(1h).sampleBy(1m, "mean")"#);
    assert_eq!(ql.query, r#"sys.cpu{host="web01"}"#);
    assert_eq!(ql.step, "1m");
    assert_eq!(ql.start, "1696400000");
    assert_eq!(ql.end, "1700000000");
    assert!(!ql.instant_query);
}

#[test]
fn test_url_encodes_query() {
    let ql = compile_one(r#"select("sys.cpu").where("host=web01").last(1h).sampleBy(1m, "mean")"#);
    assert_eq!(
        ql.to_url(),
        "/api/v1/query_range?query=sys.cpu%7Bhost%3D%22web01%22%7D&start=1696400000&end=1700000000&step=1m"
    );
}

#[test]
fn test_where_operator_translation() {
    let ql = compile_one(
        r#"select("m").where("a=1", "b!=2", "c~x.*", "d!~y.*").last(1h).sampleBy(1m, "mean")"#,
    );
    assert_eq!(ql.query, r#"m{a="1",b!="2",c=~"x.*",d!~"y.*"}"#);
}

#[test]
fn test_from_sets_bounds_directly() {
    let ql = compile_one(r#"select("m").from(1500000000, 1500003600).sampleBy(1m, "mean")"#);
    assert_eq!(ql.start, "1500000000");
    assert_eq!(ql.end, "1500003600");
}

#[test]
fn test_select_requires_sampler() {
    let err = compile_err(r#"select("m").last(1h)"#);
    assert!(err.contains("expects a default sample"), "{}", err);
    assert!(err.contains("prometheus"), "{}", err);
}

#[test]
fn test_select_all_is_rejected() {
    let err = compile_err("select(*).last(1h).sampleBy(1m, \"mean\")");
    assert!(err.contains("select all metrics not supported"), "{}", err);
}

#[test]
fn test_last_count_is_rejected() {
    let err = compile_err(r#"select("m").last(100)"#);
    assert!(err.contains("last supports only duration values"), "{}", err);
}

#[test]
fn test_meta_query_is_rejected() {
    let err = compile_err(r#"select("m").names()"#);
    assert!(err.contains("not supported"), "{}", err);
}

#[test]
fn test_last_day_duration_window() {
    let ql = compile_one(r#"select("m").last(2d).sampleBy(1m, "mean")"#);
    // 2 days before the shared now.
    assert_eq!(ql.start, "1699827200");
}

// ============================================================================
// Frameworks
// ============================================================================

#[test]
fn test_arithmetic_operator_is_infix() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").add(5)"#);
    assert_eq!(ql.query, "m + 5");
}

#[test]
fn test_comparison_operator() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").greaterOrEqual(10)"#);
    assert_eq!(ql.query, "m >= 10");
}

#[test]
fn test_abs_wraps_query() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").abs()"#);
    assert_eq!(ql.query, "abs(m)");
}

#[test]
fn test_day_translates_to_day_of_month() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").day()"#);
    assert_eq!(ql.query, "day_of_month(m)");
}

#[test]
fn test_weekday_translates_to_day_of_week() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").weekday()"#);
    assert_eq!(ql.query, "day_of_week(m)");
}

#[test]
fn test_max_with_translates_to_clamp_min() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").maxWith(5)"#);
    assert_eq!(ql.query, "clamp_min(m,5)");
}

#[test]
fn test_top_n_translates_to_topk() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").topN(3)"#);
    assert_eq!(ql.query, "topk(3,m)");
}

#[test]
fn test_sort_desc_translation() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").sortDesc()"#);
    assert_eq!(ql.query, "sort_desc(m)");
}

#[test]
fn test_mean_window_is_avg_over_time() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").mean(2m)"#);
    assert_eq!(ql.query, "avg_over_time(m[2m])");
}

#[test]
fn test_percentile_window_is_quantile_over_time() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").percentile(99, 2m)"#);
    assert_eq!(ql.query, "quantile_over_time(0.99,m[2m])");
}

#[test]
fn test_rate_window() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").rate(5m)"#);
    assert_eq!(ql.query, "rate(m[1m])");
}

#[test]
fn test_two_window_reductions_are_rejected() {
    let err = compile_err(r#"select("m").last(1h).sampleBy(1m, "mean").mean(2m).max(2m)"#);
    assert!(err.contains("can be done only once"), "{}", err);
}

#[test]
fn test_shift_becomes_offset() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").shift(5m)"#);
    assert_eq!(ql.query, "m offset 5m");
}

#[test]
fn test_shift_with_window_reduction() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").shift(5m).mean(2m)"#);
    assert_eq!(ql.query, "avg_over_time(m[2m] offset 5m)");
}

#[test]
fn test_double_shift_is_rejected() {
    let err = compile_err(r#"select("m").last(1h).sampleBy(1m, "mean").shift(5m).shift(2m)"#);
    assert!(err.contains("shift can be done only once"), "{}", err);
}

#[test]
fn test_group_by_wraps_with_by_clause() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").groupBy("dc", "sum")"#);
    assert_eq!(ql.query, "sum(m) by (dc)");
}

#[test]
fn test_group_without_clause() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").groupWithout("dc", "max")"#);
    assert_eq!(ql.query, "max(m) without (dc)");
}

#[test]
fn test_group_mean_is_avg() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").groupBy("dc", "mean")"#);
    assert_eq!(ql.query, "avg(m) by (dc)");
}

#[test]
fn test_group_percentile_is_quantile() {
    let ql = compile_one(
        r#"select("m").last(1h).sampleBy(1m, "mean").groupBy("dc", percentile, 90)"#,
    );
    assert_eq!(ql.query, "quantile(0.9,m) by (dc)");
}

#[test]
fn test_keep_last_values_switches_to_instant_query() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, "mean").keepLastValues()"#);
    assert!(ql.instant_query);
    assert!(ql.to_url().starts_with("/api/v1/query?"), "{}", ql.to_url());
}

#[test]
fn test_keep_last_values_with_count_is_rejected() {
    let err = compile_err(r#"select("m").last(1h).sampleBy(1m, "mean").keepLastValues(5)"#);
    assert!(err.contains("keepLastValues"), "{}", err);
}

#[test]
fn test_rename_is_unsupported() {
    let err = compile_err(r#"select("m").last(1h).sampleBy(1m, "mean").rename("x")"#);
    assert!(
        err.contains("operator rename not supported in TSL for prometheus"),
        "{}",
        err
    );
}

#[test]
fn test_filter_by_last_value_is_unsupported() {
    let err = compile_err(r#"select("m").last(1h).sampleBy(1m, "mean").filterByLastValue(">=100")"#);
    assert!(err.contains("not supported in TSL for prometheus"), "{}", err);
}

#[test]
fn test_quantize_is_unsupported() {
    let err = compile_err(r#"select("m").last(1h).sampleBy(1m, "mean").quantize("b", 10)"#);
    assert!(err.contains("not supported in TSL for prometheus"), "{}", err);
}

#[test]
fn test_percentile_sampler_wraps_in_quantile_over_time() {
    let ql = compile_one(r#"select("m").last(1h).sampleBy(1m, percentile, 99)"#);
    assert_eq!(ql.query, "quantile_over_time(0.99, m[1m])");
}

#[test]
fn test_explicit_from_overrides_query_range_default() {
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
    let ql = PromQlGenerator::new(0)
        .generate(&query.instructions[0], NOW_MS)
        .expect("promql");
    assert_eq!(ql.start, "1500000000");
    assert_eq!(ql.end, "1500003600");
}

// ============================================================================
// Global operators
// ============================================================================

#[test]
fn test_operator_joins_children() {
    let ql = compile_one(
        r#"add(select("a").last(1h).sampleBy(1m, "mean"), select("b").last(1h).sampleBy(1m, "mean")).on("host")"#,
    );
    assert_eq!(ql.query, "a + on(host) b");
}

#[test]
fn test_operator_without_matching_clause() {
    let ql = compile_one(
        r#"mul(select("a").last(1h).sampleBy(1m, "mean"), select("b").last(1h).sampleBy(1m, "mean"))"#,
    );
    assert_eq!(ql.query, "a * b");
}

#[test]
fn test_operator_with_ignoring_and_group_left() {
    let ql = compile_one(
        r#"div(select("a").last(1h).sampleBy(1m, "mean"), select("b").last(1h).sampleBy(1m, "mean")).ignoring("dc").groupLeft("rack")"#,
    );
    assert_eq!(ql.query, "a / ignoring(dc) group_left(rack) b");
}

#[test]
fn test_operator_requires_identical_bounds() {
    let err = compile_err(
        r#"add(select("a").last(1h).sampleBy(1m, "mean"), select("b").last(2h).sampleBy(1m, "mean"))"#,
    );
    assert!(err.contains("expects same time properties"), "{}", err);
}

#[test]
fn test_comparison_operator_joins_with_symbol() {
    let ql = compile_one(
        r#"greaterThan(select("a").last(1h).sampleBy(1m, "mean"), select("b").last(1h).sampleBy(1m, "mean"))"#,
    );
    assert_eq!(ql.query, "a > b");
}

// ============================================================================
// Document level properties
// ============================================================================

#[test]
fn test_one_query_per_instruction_in_order() {
    let queries = compile(
        r#"select("first").last(1h).sampleBy(1m, "mean")
select("second").last(1h).sampleBy(1m, "mean")"#,
    );
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].query, "first");
    assert_eq!(queries[1].query, "second");
}

#[test]
fn test_generation_is_idempotent() {
    let source = r#"select("m").where("host=web01").last(1h).sampleBy(1m, "mean").groupBy("dc", "sum")"#;
    assert_eq!(compile(source), compile(source));
}
