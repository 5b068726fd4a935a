// crates/runbook-kernel-core/tests/proptest_template.rs
// ============================================================================
// Module: Template Property Tests
// Description: Property-based checks over template expansion.
// ============================================================================
//! ## Overview
//! Property checks: brace-free strings always pass through unchanged,
//! lenient expansion never fails on well-formed references, and boolean
//! coercion agrees with the rendered string form.

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

use proptest::prelude::*;
use runbook_kernel_core::Scope;
use runbook_kernel_core::eval_bool;
use runbook_kernel_core::expand;
use runbook_kernel_core::template::expand_lenient;
use runbook_kernel_core::template::stringify;
use serde_json::Value;
use serde_json::json;

/// Strategy over identifier-like variable names.
fn identifier() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,12}"
}

/// Strategy over scalar scope values.
fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 ._-]{0,16}".prop_map(Value::String),
    ]
}

proptest! {
    #[test]
    fn brace_free_strings_pass_through(text in "[^{]*") {
        let vars = Scope::new();
        let value = expand(&text, &vars).expect("literal expands");
        prop_assert_eq!(value, Value::String(text));
    }

    #[test]
    fn declared_references_always_resolve(name in identifier(), value in scalar()) {
        let mut vars = Scope::new();
        vars.insert(name.clone(), value.clone());
        let template = format!("{{{{ .{name} }}}}");
        let resolved = expand(&template, &vars).expect("declared reference resolves");
        prop_assert_eq!(resolved, value);
    }

    #[test]
    fn lenient_expansion_never_fails_on_references(name in identifier()) {
        let vars = Scope::new();
        let template = format!("{{{{ .{name} }}}}");
        let resolved = expand_lenient(&template, &vars).expect("lenient expansion");
        prop_assert_eq!(resolved, Value::String("<no value>".to_string()));
    }

    #[test]
    fn eval_bool_agrees_with_rendered_string(name in identifier(), value in scalar()) {
        let mut vars = Scope::new();
        vars.insert(name.clone(), value.clone());
        let template = format!("{{{{ .{name} }}}}");
        let truth = eval_bool(&template, &vars).expect("guard evaluates");
        let rendered = stringify(&value);
        prop_assert_eq!(
            truth,
            !rendered.is_empty() && rendered != "false" && rendered != "<no value>"
        );
    }
}
