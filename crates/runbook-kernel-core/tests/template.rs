// crates/runbook-kernel-core/tests/template.rs
// ============================================================================
// Module: Template Evaluator Tests
// Description: Tests for expansion, functions, and boolean coercion.
// ============================================================================
//! ## Overview
//! Validates literal pass-through, dotted-path references, the fixed
//! function set, strict versus lenient missing-reference behavior, and
//! boolean guard coercion.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;

use runbook_kernel_core::Scope;
use runbook_kernel_core::TemplateError;
use runbook_kernel_core::eval_bool;
use runbook_kernel_core::expand;
use runbook_kernel_core::template::direct_reference;
use runbook_kernel_core::template::expand_lenient;
use runbook_kernel_core::template::resolve_map;
use runbook_kernel_core::template::stringify;
use serde_json::Value;
use serde_json::json;

/// Builds a scope with a few representative bindings.
fn scope() -> Scope {
    let mut vars = Scope::new();
    vars.insert("status".to_string(), json!("200"));
    vars.insert("service".to_string(), json!("billing-api"));
    vars.insert("count".to_string(), json!(3));
    vars.insert(
        "check".to_string(),
        json!({ "status_code": "503", "latency": { "p99": 250 } }),
    );
    vars.insert("hosts".to_string(), json!(["alpha", "beta"]));
    vars
}

#[test]
fn literal_strings_pass_through() {
    let value = expand("no templates here", &scope()).expect("expand");
    assert_eq!(value, json!("no templates here"));
}

#[test]
fn sole_reference_yields_raw_value() {
    let value = expand("{{ .count }}", &scope()).expect("expand");
    assert_eq!(value, json!(3));
}

#[test]
fn nested_path_resolves_through_objects() {
    let value = expand("{{ .check.status_code }}", &scope()).expect("expand");
    assert_eq!(value, json!("503"));
    let value = expand("{{ .check.latency.p99 }}", &scope()).expect("expand");
    assert_eq!(value, json!(250));
}

#[test]
fn array_index_path_resolves() {
    let value = expand("{{ .hosts.1 }}", &scope()).expect("expand");
    assert_eq!(value, json!("beta"));
}

#[test]
fn embedded_references_concatenate_stringified() {
    let value = expand("svc={{ .service }} count={{ .count }}", &scope()).expect("expand");
    assert_eq!(value, json!("svc=billing-api count=3"));
}

#[test]
fn strict_expansion_rejects_missing_reference() {
    let err = expand("{{ .missing }}", &scope()).expect_err("unresolved");
    assert!(matches!(err, TemplateError::Unresolved { .. }));
    assert!(err.to_string().contains(".missing"));
}

#[test]
fn lenient_expansion_renders_no_value() {
    let value = expand_lenient("{{ .missing }}", &scope()).expect("lenient");
    assert_eq!(value, json!("<no value>"));
}

#[test]
fn eq_and_ne_compare_stringified() {
    assert_eq!(expand("{{ eq .status \"200\" }}", &scope()).expect("eq"), json!(true));
    assert_eq!(expand("{{ ne .status \"500\" }}", &scope()).expect("ne"), json!(true));
    assert_eq!(expand("{{ eq .count \"3\" }}", &scope()).expect("eq"), json!(true));
}

#[test]
fn ordering_functions_are_lexicographic() {
    assert_eq!(expand("{{ gt .status \"100\" }}", &scope()).expect("gt"), json!(true));
    assert_eq!(expand("{{ lt .status \"500\" }}", &scope()).expect("lt"), json!(true));
}

#[test]
fn string_predicates_work() {
    assert_eq!(
        expand("{{ contains .service \"billing\" }}", &scope()).expect("contains"),
        json!(true)
    );
    assert_eq!(
        expand("{{ hasPrefix .service \"billing-\" }}", &scope()).expect("prefix"),
        json!(true)
    );
    assert_eq!(
        expand("{{ hasSuffix .service \"-api\" }}", &scope()).expect("suffix"),
        json!(true)
    );
}

#[test]
fn default_falls_back_for_missing_values() {
    let value = expand("{{ default .missing \"fallback\" }}", &scope()).expect("default");
    assert_eq!(value, json!("fallback"));
    let value = expand("{{ default .status \"fallback\" }}", &scope()).expect("default");
    assert_eq!(value, json!("200"));
}

#[test]
fn index_descends_into_maps_and_lists() {
    let value = expand("{{ index .check \"status_code\" }}", &scope()).expect("index");
    assert_eq!(value, json!("503"));
    let value = expand("{{ index .hosts \"0\" }}", &scope()).expect("index");
    assert_eq!(value, json!("alpha"));
    let value =
        expand("{{ index .check \"latency\" \"p99\" }}", &scope()).expect("index");
    assert_eq!(value, json!(250));
}

#[test]
fn unknown_function_is_rejected() {
    let err = expand("{{ upper .service }}", &scope()).expect_err("unknown fn");
    assert!(matches!(err, TemplateError::UnknownFunction { .. }));
}

#[test]
fn unterminated_expression_is_a_parse_error() {
    let err = expand("{{ .status", &scope()).expect_err("parse");
    assert!(matches!(err, TemplateError::Parse { .. }));
}

#[test]
fn eval_bool_truth_table() {
    let vars = scope();
    assert!(eval_bool("", &vars).expect("empty"));
    assert!(eval_bool("default", &vars).expect("default literal"));
    assert!(eval_bool("{{ eq .status \"200\" }}", &vars).expect("true compare"));
    assert!(!eval_bool("{{ eq .status \"500\" }}", &vars).expect("false compare"));
    assert!(!eval_bool("{{ .missing }}", &vars).expect("missing is false"));
    assert!(eval_bool("{{ .service }}", &vars).expect("non-empty string"));
}

#[test]
fn resolve_map_resolves_string_leaves_only() {
    let mut map = BTreeMap::new();
    map.insert("url".to_string(), json!("https://{{ .service }}/health"));
    map.insert("retries".to_string(), json!(2));
    map.insert("nested".to_string(), json!({ "svc": "{{ .service }}" }));
    let resolved = resolve_map(&map, &scope()).expect("resolve");
    assert_eq!(resolved["url"], json!("https://billing-api/health"));
    assert_eq!(resolved["retries"], json!(2));
    assert_eq!(resolved["nested"], json!({ "svc": "billing-api" }));
}

#[test]
fn direct_reference_detects_bare_references() {
    assert_eq!(direct_reference("{{ .hosts }}"), Some("hosts"));
    assert_eq!(direct_reference("{{ .a.b }}"), Some("a.b"));
    assert_eq!(direct_reference("prefix {{ .hosts }}"), None);
    assert_eq!(direct_reference("{{ eq .a .b }}"), None);
}

#[test]
fn stringify_renders_scalars_plainly() {
    assert_eq!(stringify(&json!("text")), "text");
    assert_eq!(stringify(&json!(7)), "7");
    assert_eq!(stringify(&json!(true)), "true");
    assert_eq!(stringify(&Value::Null), "");
    assert_eq!(stringify(&json!(["a"])), "[\"a\"]");
}
