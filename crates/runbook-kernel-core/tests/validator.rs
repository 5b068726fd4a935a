// crates/runbook-kernel-core/tests/validator.rs
// ============================================================================
// Module: Validator Tests
// Description: Tests for the three-phase runbook validator.
// ============================================================================
//! ## Overview
//! Validates the structural, semantic, and domain phases: strict decode,
//! graph soundness rules, reference resolution, constant shadowing,
//! parallel checks, and contract tightening against loaded tools.

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

use runbook_kernel_contract::ToolDefinition;
use runbook_kernel_core::Severity;
use runbook_kernel_core::ValidationIssue;
use runbook_kernel_core::has_errors;
use runbook_kernel_core::load_runbook_str;
use runbook_kernel_core::validate;
use runbook_kernel_core::validate_source;

/// Loaded tool definitions for tool-dependent rules.
fn tool_library() -> BTreeMap<String, ToolDefinition> {
    let yaml = r#"
api_version: tool/v0
meta:
  name: health-check
contract:
  side_effects: true
  writes: [service]
  outputs:
    status_code:
      type: string
actions:
  check:
    argv: ["check"]
"#;
    let definition: ToolDefinition = serde_yaml::from_str(yaml).expect("tool yaml");
    [("health-check".to_string(), definition)].into_iter().collect()
}

/// Validates YAML source against the test tool library.
fn issues_for(yaml: &str) -> Vec<ValidationIssue> {
    validate_source(yaml, &tool_library()).1
}

/// Asserts that some error message contains the needle.
fn assert_error_contains(issues: &[ValidationIssue], needle: &str) {
    assert!(
        issues
            .iter()
            .any(|issue| issue.severity == Severity::Error && issue.message.contains(needle)),
        "no error containing '{needle}' in {issues:?}"
    );
}

const HEALTHY: &str = r#"
api_version: kernel/v0
meta:
  name: healthy
  inputs:
    status:
      type: string
      default: "200"
steps:
  - type: assert
    id: check
    assert:
      - kind: equals
        value: "{{ .status }}"
        expected: "200"
  - type: end
    id: done
    outcome:
      category: resolved
      code: ok
"#;

#[test]
fn healthy_runbook_passes() {
    let issues = issues_for(HEALTHY);
    assert!(!has_errors(&issues), "unexpected issues: {issues:?}");
}

#[test]
fn validation_is_idempotent() {
    let runbook = load_runbook_str(HEALTHY).expect("load");
    let tools = tool_library();
    assert_eq!(validate(&runbook, &tools), validate(&runbook, &tools));
}

#[test]
fn unknown_fields_are_structural_errors() {
    let yaml = HEALTHY.replace("meta:", "meta:\n  surprise: true");
    let (runbook, issues) = validate_source(&yaml, &tool_library());
    assert!(runbook.is_none());
    assert!(has_errors(&issues));
}

#[test]
fn wrong_api_version_is_rejected() {
    let yaml = HEALTHY.replace("kernel/v0", "kernel/v1");
    assert_error_contains(&issues_for(&yaml), "api_version must be 'kernel/v0'");
}

#[test]
fn duplicate_step_ids_are_rejected() {
    let yaml = HEALTHY.replace("id: done", "id: check");
    assert_error_contains(&issues_for(&yaml), "duplicate step id 'check'");
}

#[test]
fn missing_end_is_rejected() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: endless
steps:
  - type: manual
    id: only
    instructions: "look at the graphs"
"#;
    assert_error_contains(&issues_for(yaml), "reaches an end step");
}

#[test]
fn branch_reaches_end_when_every_arm_does() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: branchy
  constants:
    mode: fast
steps:
  - type: branch
    id: split
    branches:
      - condition: "{{ eq .mode \"fast\" }}"
        steps:
          - type: end
            id: fast_done
            outcome: { category: resolved, code: fast }
      - condition: default
        steps:
          - type: end
            id: slow_done
            outcome: { category: resolved, code: slow }
"#;
    let issues = issues_for(yaml);
    assert!(!has_errors(&issues), "unexpected issues: {issues:?}");
}

#[test]
fn backward_jump_without_max_is_rejected() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: jumper
steps:
  - type: manual
    id: target
    instructions: "wait"
  - type: manual
    id: retry
    instructions: "retry"
    next: target
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "requires a 'max' bound");
}

#[test]
fn bounded_backward_jump_passes() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: jumper
steps:
  - type: manual
    id: target
    instructions: "wait"
  - type: manual
    id: retry
    instructions: "retry"
    next: { step: target, max: 2 }
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    let issues = issues_for(yaml);
    assert!(!has_errors(&issues), "unexpected issues: {issues:?}");
}

#[test]
fn next_target_must_be_scope_local() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: jumper
  constants:
    go: "yes"
steps:
  - type: branch
    id: split
    branches:
      - condition: default
        steps:
          - type: manual
            id: inner
            instructions: "inner"
            next: outer
  - type: manual
    id: outer
    instructions: "outer"
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "not a step id in the same scope");
}

#[test]
fn unresolved_reference_is_rejected() {
    let yaml = HEALTHY.replace("{{ .status }}", "{{ .nonexistent }}");
    assert_error_contains(&issues_for(&yaml), "unresolved reference '.nonexistent'");
}

#[test]
fn step_id_may_not_shadow_a_constant() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: shadow
  constants:
    check: fixed
steps:
  - type: manual
    id: check
    instructions: "oops"
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "shadows a constant");
}

#[test]
fn parallel_output_collisions_are_rejected() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: collide
steps:
  - type: parallel
    id: fanout
    branches:
      - steps:
          - type: manual
            id: same
            instructions: "left"
      - steps:
          - type: manual
            id: same_other
            instructions: "right"
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    let collide = yaml.replace("same_other", "same");
    let issues = issues_for(&collide);
    assert_error_contains(&issues, "duplicate step id 'same'");
    assert_error_contains(&issues, "collides with parallel branch");
}

#[test]
fn parallel_conflicts_warn_about_serialization() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: conflicted
tools: [health-check]
steps:
  - type: parallel
    id: fanout
    branches:
      - steps:
          - type: tool
            id: left
            tool: health-check
            action: check
      - steps:
          - type: tool
            id: right
            tool: health-check
            action: check
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    let issues = issues_for(yaml);
    assert!(issues.iter().any(|issue| {
        issue.severity == Severity::Warning && issue.message.contains("serialized")
    }));
}

#[test]
fn tool_must_be_declared_in_tools() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: undeclared
steps:
  - type: tool
    id: probe
    tool: health-check
    action: check
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "not declared in tools");
}

#[test]
fn step_contract_must_tighten_tool_contract() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: relaxer
tools: [health-check]
steps:
  - type: tool
    id: probe
    tool: health-check
    action: check
    contract:
      side_effects: false
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "cannot relax side_effects from true to false");
}

#[test]
fn extension_steps_require_inline_contracts() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: extended
steps:
  - type: extension
    id: custom
    extension: ticket-sync
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "requires an inline 'contract'");
}

#[test]
fn for_each_requires_as_and_over() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: iterator
steps:
  - type: manual
    id: each
    instructions: "per host"
    for_each:
      over: "{{ .hosts }}"
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "for_each requires both 'as' and 'over'");
}

#[test]
fn outcome_category_must_be_valid() {
    let yaml = HEALTHY.replace("category: resolved", "category: shrugged");
    assert_error_contains(&issues_for(&yaml), "outcome category 'shrugged'");
}

#[test]
fn branch_without_default_warns() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: no_default
  constants:
    mode: fast
steps:
  - type: branch
    id: split
    branches:
      - condition: "{{ eq .mode \"fast\" }}"
        steps:
          - type: end
            id: fast_done
            outcome: { category: resolved, code: fast }
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    let issues = issues_for(yaml);
    assert!(issues.iter().any(|issue| {
        issue.severity == Severity::Warning && issue.message.contains("no default arm")
    }));
}

#[test]
fn checklist_evidence_requires_items() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: evidence
steps:
  - type: manual
    id: confirm
    instructions: "confirm rollout"
    required_evidence:
      - kind: checklist
        name: rollout_checks
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "checklist evidence requires non-empty 'items'");
}

#[test]
fn duplicate_evidence_names_are_rejected() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: evidence
steps:
  - type: manual
    id: confirm
    instructions: "confirm rollout"
    required_evidence:
      - kind: text
        name: note
      - kind: text
        name: note
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "duplicate evidence name 'note'");
}

#[test]
fn governance_rule_shape_is_checked() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: governed
  governance:
    rules:
      - risk: critical
steps:
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "must set one of 'action' or 'default'");
}

#[test]
fn inputs_from_must_reference_object_constants() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: spreader
  constants:
    common: "not-a-map"
tools: [health-check]
steps:
  - type: tool
    id: probe
    tool: health-check
    action: check
    inputs_from: [common]
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    assert_error_contains(&issues_for(yaml), "must be an object-valued constant");
}

#[test]
fn scope_paths_are_normalized_on_load() {
    let yaml = r#"
api_version: kernel/v0
meta:
  name: scoped
steps:
  - type: manual
    id: staged
    instructions: "stage"
    scope: round/0
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    let runbook = load_runbook_str(yaml).expect("load");
    assert_eq!(runbook.steps[0].scope.as_deref(), Some("round.0"));
}
