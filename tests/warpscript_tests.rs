// tests/warpscript_tests.rs

use tsl_lang::{Parser, WarpScriptGenerator};

fn compile(source: &str) -> String {
    compile_with_token(source, "")
}

fn compile_with_token(source: &str, token: &str) -> String {
    let mut parser = Parser::new(source, "", token, 0, "", "", &[]).expect("parser");
    let query = parser.parse().expect("query");
    WarpScriptGenerator::new(0)
        .generate(&query.instructions, true)
        .expect("warpscript")
}

fn compile_err(source: &str) -> String {
    let mut parser = Parser::new(source, "", "", 0, "", "", &[]).expect("parser");
    let query = parser.parse().expect("query");
    WarpScriptGenerator::new(0)
        .generate(&query.instructions, false)
        .expect_err("expected a generation error")
        .to_string()
}

// ============================================================================
// Preamble and fetch
// ============================================================================

#[test]
fn test_preamble_stores_now() {
    let warpscript = compile(r#"select("m").last(1h)"#);
    assert!(warpscript.starts_with("NOW 'now' STORE\n"), "{}", warpscript);
}

#[test]
fn test_token_authenticates_and_raises_limits() {
    let warpscript =
        compile_with_token(r#"select("sys.cpu").where("host=web01").last(1h)"#, "token");
    assert!(warpscript.contains("'token' AUTHENTICATE"), "{}", warpscript);
    assert!(
        warpscript.contains("'stack.maxops.hard' STACKATTRIBUTE"),
        "{}",
        warpscript
    );
    assert!(
        warpscript.contains("'fetch.limit.hard' STACKATTRIBUTE"),
        "{}",
        warpscript
    );
}

#[test]
fn test_fetch_with_last_duration() {
    let warpscript =
        compile_with_token(r#"select("sys.cpu").where("host=web01").last(1h)"#, "token");
    assert!(
        warpscript.contains("[ 'token' 'sys.cpu' { 'host' 'web01' } $now 1 h ] FETCH"),
        "{}",
        warpscript
    );
}

#[test]
fn test_fetch_with_last_count() {
    let warpscript = compile(r#"select("m").last(50)"#);
    assert!(warpscript.contains("[ '' 'm' {} $now -50 ] FETCH"), "{}", warpscript);
}

#[test]
fn test_fetch_with_from_bounds() {
    let warpscript = compile(r#"select("m").from(1500000000, 1500003600)"#);
    assert!(
        warpscript.contains("[ '' 'm' {} 1500000000 ISO8601 1500003600 ISO8601 ] FETCH"),
        "{}",
        warpscript
    );
}

#[test]
fn test_unbounded_select_is_a_find() {
    let warpscript = compile(r#"select("m")"#);
    assert!(warpscript.contains("[ '' 'm' {} ] FIND"), "{}", warpscript);
}

#[test]
fn test_select_all_uses_regex_selector() {
    let warpscript = compile("select(*).last(1h)");
    assert!(warpscript.contains("~.*"), "{}", warpscript);
}

#[test]
fn test_merge_attribute_policy_is_default() {
    let warpscript = compile(r#"select("m").last(1h)"#);
    assert!(
        warpscript.contains("<% DROP DUP DUP ATTRIBUTES SWAP LABELS APPEND RELABEL %> LMAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_remove_attribute_policy() {
    let warpscript = compile(r#"select("m").attributePolicy("remove").last(1h)"#);
    assert!(
        warpscript.contains("<% DROP DUP ATTRIBUTES { SWAP <% DROP '' %> FOREACH } SETATTRIBUTES %> LMAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_regex_where_clause() {
    let warpscript = compile(r#"select("m").where("dc~ln.*").last(1h)"#);
    assert!(warpscript.contains("{ 'dc' '~ln.*' }"), "{}", warpscript);
}

#[test]
fn test_not_equal_where_clause() {
    let warpscript = compile(r#"select("m").where("dc!=ln").last(1h)"#);
    assert!(warpscript.contains("{ 'dc' '~(?!ln).*' }"), "{}", warpscript);
}

// ============================================================================
// Sampling
// ============================================================================

#[test]
fn test_sample_by_emits_bucketize() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean")"#);
    assert!(warpscript.contains("'raw' STORE"), "{}", warpscript);
    assert!(warpscript.contains("bucketizer.mean"), "{}", warpscript);
    assert!(
        warpscript.contains("BUCKETIZE INTERPOLATE FILLPREVIOUS FILLNEXT UNBUCKETIZE"),
        "{}",
        warpscript
    );
}

#[test]
fn test_relative_sampling_clips_to_aligned_window() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean")"#);
    assert!(warpscript.contains("TIMECLIP NONEMPTY"), "{}", warpscript);
    assert!(warpscript.contains("<% SIZE 0 > %>"), "{}", warpscript);
    assert!(warpscript.contains("IFTE"), "{}", warpscript);
}

#[test]
fn test_absolute_sampling_has_no_clip() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean", relative=false)"#);
    assert!(!warpscript.contains("TIMECLIP NONEMPTY"), "{}", warpscript);
    assert!(
        warpscript.contains("[ $raw bucketizer.mean $now 1 m 1 h 1 m / ] BUCKETIZE"),
        "{}",
        warpscript
    );
}

#[test]
fn test_sample_by_fill_policy() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean", fill="previous", relative=false)"#);
    assert!(warpscript.contains("BUCKETIZE FILLPREVIOUS UNBUCKETIZE"), "{}", warpscript);
}

#[test]
fn test_sample_by_fill_value() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean", fill(0), relative=false)"#);
    assert!(
        warpscript.contains("[ NaN NaN NaN 0 ] FILLVALUE"),
        "{}",
        warpscript
    );
}

#[test]
fn test_percentile_sampler_keeps_promoted_literal() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, percentile, 99)"#);
    assert!(warpscript.contains("99.0 bucketizer.percentile"), "{}", warpscript);
}

#[test]
fn test_month_span_walks_addmonths() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1M, "last")"#);
    assert!(warpscript.contains("ADDMONTHS"), "{}", warpscript);
    assert!(warpscript.contains("TSELEMENTS"), "{}", warpscript);
}

#[test]
fn test_rate_after_sampler_extrapolates_last_bucket() {
    let warpscript = compile(r#"select("m").last(10m).sampleBy(30s, "mean").rate(1s)"#);
    assert!(warpscript.contains("LASTBUCKET"), "{}", warpscript);
    assert!(warpscript.contains("SETVALUE"), "{}", warpscript);
}

// ============================================================================
// Mappers
// ============================================================================

#[test]
fn test_no_arg_mapper() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").abs()"#);
    assert!(warpscript.contains("[ SWAP mapper.abs 0 0 0 ] MAP"), "{}", warpscript);
}

#[test]
fn test_add_mapper_converts_to_double() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").add(5)"#);
    assert!(
        warpscript.contains("[ SWAP 5 TODOUBLE mapper.add 0 0 0 ] MAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_div_mapper_multiplies_by_inverse() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").div(4)"#);
    assert!(
        warpscript.contains("[ SWAP 1.0 4 TODOUBLE / mapper.mul 0 0 0 ] MAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_rate_mapper_with_duration() {
    let warpscript = compile(r#"select("m").last(10m).sampleBy(30s, "mean").rate(1s)"#);
    assert!(
        warpscript
            .contains("[ SWAP mapper.rate 1 1 0 ] MAP [ SWAP 1 s 1 s / mapper.mul 0 0 0 ] MAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_variable_chain_appends_rate() {
    let warpscript = compile(
        r#"x = select("m").last(10m).sampleBy(30s, "mean")
x.rate(1s)"#,
    );
    assert!(
        warpscript
            .contains("[ SWAP mapper.rate 1 1 0 ] MAP [ SWAP 1 s 1 s / mapper.mul 0 0 0 ] MAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_shift_operator() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").shift(2m)"#);
    assert!(warpscript.contains("2 m TIMESHIFT"), "{}", warpscript);
}

#[test]
fn test_comparison_mapper() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").greaterThan(10)"#);
    assert!(warpscript.contains("[ SWAP 10 mapper.gt 0 0 0 ] MAP"), "{}", warpscript);
}

#[test]
fn test_logn_mapper() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").logN(3)"#);
    assert!(warpscript.contains("[ SWAP 3 mapper.log 0 0 0 ] MAP"), "{}", warpscript);
}

#[test]
fn test_day_mapper_uses_utc() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").day()"#);
    assert!(warpscript.contains("[ SWAP 'UTC' mapper.day 0 0 0 ] MAP"), "{}", warpscript);
}

#[test]
fn test_stddev_mapper() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").stddev(5, 0)"#);
    assert!(warpscript.contains("TRUE mapper.sd 5 0 0 ] MAP"), "{}", warpscript);
}

#[test]
fn test_window_reduction_with_sampler_duration() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").mean(2m)"#);
    assert!(
        warpscript.contains("[ SWAP mapper.mean 2 m 1 m / ROUND 0 0 ] MAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_cumulative_sum_uses_sliding_window() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").cumulativeSum()"#);
    assert!(
        warpscript.contains("[ SWAP mapper.sum max.tick.sliding.window 0 0 ] MAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_window_aggregator_function() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").window(max, 5, 2)"#);
    assert!(warpscript.contains("[ SWAP mapper.max 5 2 0 ] MAP"), "{}", warpscript);
}

#[test]
fn test_percentile_window() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").percentile(99)"#);
    assert!(
        warpscript.contains("99.0 mapper.percentile 1 0 0 ] MAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_cast_mappers() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").todouble()"#);
    assert!(warpscript.contains("[ SWAP mapper.todouble 0 0 0 ] MAP"), "{}", warpscript);
}

// ============================================================================
// Reducers and sorts
// ============================================================================

#[test]
fn test_group_by_reducer() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").groupBy("dc", "sum")"#);
    assert!(
        warpscript.contains(r#"[ SWAP [ "dc" ] reducer.sum ] REDUCE"#),
        "{}",
        warpscript
    );
}

#[test]
fn test_group_reducer_over_all_labels() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").group("max")"#);
    assert!(warpscript.contains("[ SWAP [] reducer.max ] REDUCE"), "{}", warpscript);
}

#[test]
fn test_group_without_computes_difference() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").groupWithout("dc", "sum")"#);
    assert!(
        warpscript.contains(r#"->SET [ "dc" ] ->SET DIFFERENCE SET-> reducer.sum ] REDUCE"#),
        "{}",
        warpscript
    );
}

#[test]
fn test_group_by_keep_distinct_adds_hash_label() {
    let warpscript = compile(
        r#"select("m").last(1h).sampleBy(1m, "mean").groupBy("dc", "sum", keepDistinct=true)"#,
    );
    assert!(warpscript.contains("hash_945fa9bc3027d7025e3"), "{}", warpscript);
}

#[test]
fn test_top_n_slices_after_reverse() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").topN(2)"#);
    assert!(warpscript.contains("REVERSE [ 0 2 1 - ] SUBLIST"), "{}", warpscript);
}

#[test]
fn test_sort_uses_mean_bucketizer_key() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").sort()"#);
    assert!(
        warpscript.contains("<% [ SWAP bucketizer.mean 0 0 1 ] BUCKETIZE VALUES 0 GET 0 GET %> SORTBY"),
        "{}",
        warpscript
    );
}

#[test]
fn test_top_n_by_sorts_and_slices() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").topNBy(3, max)"#);
    assert!(warpscript.contains("SORTBY REVERSE [ 0 3 1 - ] SUBLIST"), "{}", warpscript);
}

// ============================================================================
// Filters, renames, labels
// ============================================================================

#[test]
fn test_filter_by_last_value() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").filterByLastValue(">=100")"#);
    assert!(
        warpscript.contains("[ SWAP [] 100 filter.last.ge ] FILTER"),
        "{}",
        warpscript
    );
}

#[test]
fn test_filter_by_labels() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").filterByLabels("host=web01")"#);
    assert!(
        warpscript.contains("[ SWAP [] { 'host' 'web01' } filter.bylabels ] FILTER"),
        "{}",
        warpscript
    );
}

#[test]
fn test_filter_by_name() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").filterByName("=cpu")"#);
    assert!(
        warpscript.contains("[ SWAP [] 'cpu' filter.byclass ] FILTER"),
        "{}",
        warpscript
    );
}

#[test]
fn test_filter_without_labels() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").filterWithoutLabels("dc")"#);
    assert!(warpscript.contains("'neg-filter' CSTORE"), "{}", warpscript);
    assert!(
        warpscript.contains("[ SWAP [] { 'dc' '~.*' } filter.bylabels ] @neg-filter"),
        "{}",
        warpscript
    );
}

#[test]
fn test_rename() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").rename("cpu2")"#);
    assert!(warpscript.contains("'cpu2' RENAME"), "{}", warpscript);
}

#[test]
fn test_store_updates() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").store("wtok")"#);
    assert!(warpscript.contains("'wtok' UPDATE"), "{}", warpscript);
}

#[test]
fn test_add_suffix_renames_with_plus() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").addSuffix(".total")"#);
    assert!(warpscript.contains("'%2B.total' RENAME"), "{}", warpscript);
}

#[test]
fn test_add_prefix() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").addPrefix("pre.")"#);
    assert!(
        warpscript.contains("<% DROP DUP NAME 'pre.' SWAP + RENAME %> LMAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_remove_labels_without_arguments_clears_all() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").removeLabels()"#);
    assert!(
        warpscript.contains("<% DROP DUP LABELS { SWAP <% DROP '' %> FOREACH } RELABEL %> LMAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_remove_labels_blanks_named_keys() {
    let warpscript = compile(r#"select("m").last(1h).sampleBy(1m, "mean").removeLabels("dc")"#);
    assert!(warpscript.contains("<% DROP { 'dc' '' } RELABEL %> LMAP"), "{}", warpscript);
}

#[test]
fn test_rename_label_key() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").renameLabelKey("old", "new")"#);
    assert!(
        warpscript.contains("<% DROP DUP LABELS 'old' GET { 'new' ROT 'old' '' } RELABEL %> LMAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_rename_label_value_uses_matcher() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").renameLabelValue("dc", "eu")"#);
    assert!(warpscript.contains("'.*' MATCHER MATCH"), "{}", warpscript);
}

#[test]
fn test_set_label_from_name() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").setLabelFromName("orig")"#);
    assert!(
        warpscript.contains("<% DROP DUP { 'orig' ROT NAME } RELABEL %> LMAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_rename_template_expands_name() {
    let warpscript = compile(
        r#"select("m").last(1h).sampleBy(1m, "mean").renameTemplate("cpu.${this.name}.pct")"#,
    );
    assert!(
        warpscript.contains("[ 'cpu.' $series NAME '.pct' ] '' JOIN RENAME %> LMAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_rename_template_expands_labels() {
    let warpscript = compile(
        r#"select("m").last(1h).sampleBy(1m, "mean").renameTemplate("${this.labels.host}.cpu")"#,
    );
    assert!(
        warpscript.contains("$series LABELS 'host' GET"),
        "{}",
        warpscript
    );
}

#[test]
fn test_keep_last_values_clamps_and_shrinks() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").keepLastValues(10)"#);
    assert!(warpscript.contains("<% DROP 10 SWAP DUP SIZE ROT MIN -1 *  SHRINK %> LMAP"),
        "{}",
        warpscript
    );
}

#[test]
fn test_timeclip_operator() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").timeclip(100, 200)"#);
    assert!(warpscript.contains("100 200 TIMECLIP"), "{}", warpscript);
}

#[test]
fn test_timemodulo_flattens() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").timemodulo(42, "mod")"#);
    assert!(warpscript.contains("42 'mod' TIMEMODULO FLATTEN"), "{}", warpscript);
}

#[test]
fn test_timesplit_flattens() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").timesplit(1h, 2, "part")"#);
    assert!(warpscript.contains("1 h 2 'part' TIMESPLIT FLATTEN"), "{}", warpscript);
}

#[test]
fn test_quantize_emits_histogram() {
    let warpscript =
        compile(r#"select("m").last(1h).sampleBy(1m, "mean").quantize("bucket", 10)"#);
    assert!(warpscript.contains("'labelKey' STORE"), "{}", warpscript);
    assert!(warpscript.contains("VALUEHISTOGRAM"), "{}", warpscript);
    assert!(
        warpscript.contains("[ SWAP [ $labelKey ] reducer.sum ] REDUCE FLATTEN"),
        "{}",
        warpscript
    );
}

// ============================================================================
// Meta queries
// ============================================================================

#[test]
fn test_names_meta() {
    let warpscript = compile(r#"select("m").names()"#);
    assert!(warpscript.contains("[ '' 'm' {} ] FIND"), "{}", warpscript);
    assert!(warpscript.contains("<% DROP NAME %> LMAP UNIQUE"), "{}", warpscript);
}

#[test]
fn test_selectors_meta() {
    let warpscript = compile(r#"select("m").selectors()"#);
    assert!(warpscript.contains("<% DROP TOSELECTOR %> LMAP UNIQUE"), "{}", warpscript);
}

#[test]
fn test_labels_meta_with_key() {
    let warpscript = compile(r#"select("m").labels("host")"#);
    assert!(
        warpscript.contains("<% DROP LABELS 'host' GET %> LMAP UNIQUE"),
        "{}",
        warpscript
    );
}

// ============================================================================
// Create statements
// ============================================================================

#[test]
fn test_create_series_emission() {
    let warpscript = compile(
        r#"create(series("s").setLabels("host=web01").setValues("now", [-5m, 2], [0, 3]))"#,
    );
    assert!(warpscript.contains("MAXLONG -1 * 'maxCreateTick' STORE"), "{}", warpscript);
    assert!(
        warpscript.contains("NEWGTS 's' RENAME { 'host' 'web01' } RELABEL"),
        "{}",
        warpscript
    );
    assert!(warpscript.contains("NOW -5 m + NaN NaN NaN 2 ADDVALUE"), "{}", warpscript);
    assert!(warpscript.contains("NOW 0 + NaN NaN NaN 3 ADDVALUE"), "{}", warpscript);
}

// ============================================================================
// Global operators
// ============================================================================

#[test]
fn test_add_operator_applies_macro() {
    let warpscript = compile(
        r#"add(select("a").last(1h), select("b").last(1h)).on("host")"#,
    );
    assert!(warpscript.contains("[ \n"), "{}", warpscript);
    assert!(warpscript.contains(r#"[ "host" ]"#), "{}", warpscript);
    assert!(warpscript.contains("op.add"), "{}", warpscript);
    assert!(warpscript.contains("APPLY"), "{}", warpscript);
}

#[test]
fn test_comparison_operator_macro_name() {
    let warpscript =
        compile(r#"greaterThan(select("a").last(1h), select("b").last(1h))"#);
    assert!(warpscript.contains("op.gt"), "{}", warpscript);
}

#[test]
fn test_mask_operator() {
    let warpscript = compile(r#"mask(select("a").last(1h), select("b").last(1h))"#);
    assert!(warpscript.contains("op.mask"), "{}", warpscript);
}

#[test]
fn test_ignoring_collects_observed_labels() {
    let warpscript = compile(
        r#"add(select("a").last(1h), select("b").last(1h)).ignoring("dc")"#,
    );
    assert!(warpscript.contains("[] 'operatorLabels' STORE"), "{}", warpscript);
    assert!(
        warpscript.contains("$operatorLabels FLATTEN UNIQUE"),
        "{}",
        warpscript
    );
    assert!(
        warpscript.contains(r#"->SET [ "dc" ] ->SET DIFFERENCE SET->"#),
        "{}",
        warpscript
    );
}

#[test]
fn test_group_left_is_rejected() {
    let err = compile_err(
        r#"add(select("a").last(1h), select("b").last(1h)).on("host").groupLeft("rack")"#,
    );
    assert!(err.contains("TSL doesn't allow"), "{}", err);
    assert!(err.contains("warp 10"), "{}", err);
}

#[test]
fn test_nested_operators_emit_nested_applies() {
    let warpscript = compile(
        r#"add(mul(select("a").last(1h), select("b").last(1h)), select("c").last(1h))"#,
    );
    assert!(warpscript.contains("op.mul"), "{}", warpscript);
    assert!(warpscript.contains("op.add"), "{}", warpscript);
    assert_eq!(warpscript.matches("APPLY").count(), 2, "{}", warpscript);
}

#[test]
fn test_post_operator_frameworks_follow_apply() {
    let warpscript = compile(
        r#"add(select("a").last(1h), select("b").last(1h)).add(5)"#,
    );
    let apply = warpscript.find("APPLY").expect("apply");
    let map = warpscript.find("mapper.add").expect("mapper");
    assert!(map > apply, "{}", warpscript);
}

// ============================================================================
// Native variables
// ============================================================================

#[test]
fn test_native_variable_metric() {
    let mut parser = Parser::new(
        "select(cpuName).last(1h)",
        "",
        "",
        0,
        "",
        "",
        &["cpuName".to_string()],
    )
    .unwrap();
    let query = parser.parse().unwrap();
    let warpscript = WarpScriptGenerator::new(0)
        .generate(&query.instructions, false)
        .unwrap();
    assert!(warpscript.contains("[ '' $cpuName {} $now 1 h ] FETCH"), "{}", warpscript);
}

#[test]
fn test_native_variable_interpolation_in_strings() {
    let mut parser = Parser::new(
        r#"select("cpu.${this.nativevariable.suffix}").last(1h)"#,
        "",
        "",
        0,
        "",
        "",
        &["suffix".to_string()],
    )
    .unwrap();
    let query = parser.parse().unwrap();
    let warpscript = WarpScriptGenerator::new(0)
        .generate(&query.instructions, false)
        .unwrap();
    assert!(warpscript.contains("$suffix TOSTRING +"), "{}", warpscript);
}

// ============================================================================
// Document level properties
// ============================================================================

#[test]
fn test_instructions_emit_in_source_order() {
    let warpscript = compile(
        r#"select("first.metric").last(1h)
select("second.metric").last(1h)"#,
    );
    let first = warpscript.find("first.metric").unwrap();
    let second = warpscript.find("second.metric").unwrap();
    assert!(first < second);
}

#[test]
fn test_generation_is_idempotent() {
    let source = r#"select("m").where("host=web01").last(1h).sampleBy(1m, "mean").groupBy("dc", "sum")"#;
    assert_eq!(compile(source), compile(source));
}
