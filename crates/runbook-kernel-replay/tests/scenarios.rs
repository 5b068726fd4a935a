// crates/runbook-kernel-replay/tests/scenarios.rs
// ============================================================================
// Module: End-to-End Replay Scenarios
// Description: Full-engine runs against canned scenarios.
// ============================================================================
//! ## Overview
//! Seeds the suite with the canonical end-to-end scenarios: a healthy
//! linear run, branching on a captured value, parallel conflict
//! serialization, bounded backward jumps, tightening rejection at
//! validation, and hash-chain tamper detection, plus replay determinism.

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
use runbook_kernel_core::AutoApprove;
use runbook_kernel_core::CancelToken;
use runbook_kernel_core::Engine;
use runbook_kernel_core::EnginePorts;
use runbook_kernel_core::RunMode;
use runbook_kernel_core::RunResult;
use runbook_kernel_core::RunStatus;
use runbook_kernel_core::Runbook;
use runbook_kernel_core::Scope;
use runbook_kernel_core::has_errors;
use runbook_kernel_core::load_tool_definition_str;
use runbook_kernel_core::validate_source;
use runbook_kernel_replay::ReplayExecutor;
use runbook_kernel_replay::Scenario;
use runbook_kernel_replay::TestSpec;
use runbook_kernel_trace::EventType;
use runbook_kernel_trace::SharedBuffer;
use runbook_kernel_trace::SignatureStatus;
use runbook_kernel_trace::SigningKey;
use runbook_kernel_trace::TraceEvent;
use runbook_kernel_trace::TraceWriter;
use runbook_kernel_trace::verify_trace;
use runbook_kernel_trace::verify_trace_with_key;
use serde_json::json;

const HEALTH_CHECK_TOOL: &str = r#"
api_version: tool/v0
meta:
  name: health-check
  description: Probe a service health endpoint.
contract:
  side_effects: true
  reads: [service]
  outputs:
    status_code:
      type: string
actions:
  check:
    argv: ["check", "{{ .url }}"]
"#;

/// Loads the shared health-check tool library.
fn tool_library() -> BTreeMap<String, ToolDefinition> {
    let definition = load_tool_definition_str(HEALTH_CHECK_TOOL).expect("tool");
    [("health-check".to_string(), definition)].into_iter().collect()
}

/// Validates, then runs a runbook against a scenario; returns the result,
/// final scope, and trace content.
fn run_scenario(
    runbook_yaml: &str,
    scenario: &Scenario,
    tools: &BTreeMap<String, ToolDefinition>,
) -> (RunResult, Scope, String) {
    let (runbook, issues) = validate_source(runbook_yaml, tools);
    assert!(!has_errors(&issues), "validation failed: {issues:?}");
    let runbook: Runbook = runbook.expect("runbook");

    let executor = ReplayExecutor::new(scenario);
    let approvals = AutoApprove;
    let ports = EnginePorts {
        executor: &executor,
        evidence: &executor,
        approvals: &approvals,
        extensions: None,
        resolvers: &[],
    };
    let buffer = SharedBuffer::new();
    let trace = TraceWriter::new(Box::new(buffer.clone()), "scenario-run").with_signing(None);
    let engine = Engine::new(&runbook, tools, ports, RunMode::Replay);
    let (result, vars) =
        engine.run_with_scope(&trace, &scenario.inputs, &CancelToken::new());
    (result, vars, buffer.contents())
}

/// Returns the ordered event type labels of a trace.
fn event_types(trace_content: &str) -> Vec<String> {
    trace_content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let event: TraceEvent = serde_json::from_str(line).expect("event");
            event.event_type.to_string()
        })
        .collect()
}

// ============================================================================
// SECTION: Scenario 1 — Healthy Linear Run
// ============================================================================

const LINEAR_RUNBOOK: &str = r#"
api_version: kernel/v0
meta:
  name: healthy-linear
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
fn healthy_linear_run_resolves() {
    let scenario = Scenario::from_yaml_str("inputs:\n  status: \"200\"\n").expect("scenario");
    let (result, vars, trace) = run_scenario(LINEAR_RUNBOOK, &scenario, &tool_library());
    assert_eq!(result.status, RunStatus::Completed);
    let outcome = result.outcome.clone().expect("outcome");
    assert_eq!(outcome.category, "resolved");
    assert_eq!(outcome.code, "ok");

    let types = event_types(&trace);
    for required in ["run_start", "step_start", "step_complete", "outcome_resolved", "run_complete"]
    {
        assert!(types.iter().any(|label| label == required), "missing {required}");
    }

    let spec = TestSpec::from_yaml_str(
        r#"
expected_status: completed
expected_outcome: resolved
expected_code: ok
must_reach: [check, done]
"#,
    )
    .expect("spec");
    assert!(spec.check(&result, &vars, &trace).is_empty());
}

// ============================================================================
// SECTION: Scenario 2 — Branching on a Captured Value
// ============================================================================

const BRANCHING_RUNBOOK: &str = r#"
api_version: kernel/v0
meta:
  name: branch-on-status
tools: [health-check]
steps:
  - type: tool
    id: probe
    tool: health-check
    action: check
    inputs:
      url: "https://svc/health"
  - type: branch
    id: triage
    branches:
      - condition: "{{ eq .status_code \"200\" }}"
        label: healthy
        steps:
          - type: end
            id: healthy_end
            outcome: { category: no_action, code: healthy }
      - condition: default
        label: broken
        steps:
          - type: end
            id: broken_end
            outcome: { category: escalated, code: broken }
"#;

#[test]
fn branching_on_captured_value_escalates() {
    let scenario = Scenario::from_yaml_str(
        r#"
tool_responses:
  "health-check:check":
    - exit_code: 0
      outputs:
        status_code: "503"
"#,
    )
    .expect("scenario");
    let (result, vars, trace) = run_scenario(BRANCHING_RUNBOOK, &scenario, &tool_library());
    assert_eq!(result.status, RunStatus::Completed);
    let outcome = result.outcome.clone().expect("outcome");
    assert_eq!(outcome.category, "escalated");
    assert_eq!(outcome.code, "broken");

    let spec = TestSpec::from_yaml_str(
        r#"
expected_outcome: escalated
expected_code: broken
must_reach: [probe, broken_end]
must_not_reach: [healthy_end]
expected_outputs:
  status_code: "/5\\d\\d/"
  probe.status_code: "503"
"#,
    )
    .expect("spec");
    assert!(spec.check(&result, &vars, &trace).is_empty());
}

// ============================================================================
// SECTION: Scenario 3 — Parallel Conflict Serialization
// ============================================================================

const CONFLICTING_PARALLEL_RUNBOOK: &str = r#"
api_version: kernel/v0
meta:
  name: conflicting-parallel
steps:
  - type: parallel
    id: fanout
    branches:
      - label: first
        steps:
          - type: manual
            id: restart_primary
            instructions: "restart the primary"
            contract:
              writes: [service]
          - type: end
            id: first_end
            outcome: { category: resolved, code: first }
      - label: second
        steps:
          - type: manual
            id: restart_replica
            instructions: "restart the replica"
            contract:
              writes: [service]
          - type: end
            id: second_end
            outcome: { category: resolved, code: second }
  - type: end
    id: done
    outcome: { category: resolved, code: fallthrough }
"#;

#[test]
fn conflicting_parallel_branches_serialize() {
    let scenario = Scenario::default();
    let (result, _, trace) =
        run_scenario(CONFLICTING_PARALLEL_RUNBOOK, &scenario, &tool_library());
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.outcome.expect("outcome").code, "first");

    let fork: TraceEvent = trace
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .find(|event: &TraceEvent| event.event_type == EventType::ParallelFork)
        .expect("fork event");
    assert_eq!(fork.data["serialized"], json!(true));

    let starts: Vec<String> = trace
        .lines()
        .filter_map(|line| serde_json::from_str::<TraceEvent>(line).ok())
        .filter(|event| event.event_type == EventType::StepStart)
        .filter_map(|event| event.data.get("step").and_then(|step| step.as_str().map(String::from)))
        .collect();
    assert!(starts.contains(&"restart_primary".to_string()));
    assert!(starts.contains(&"restart_replica".to_string()));
}

// ============================================================================
// SECTION: Concurrent Parallel Fan-Out (Disjoint Writes)
// ============================================================================

const ENDPOINT_PROBE_TOOL: &str = r#"
api_version: tool/v0
meta:
  name: endpoint-probe
contract:
  side_effects: true
actions:
  check_primary:
    argv: ["check", "primary"]
    contract:
      writes: [primary]
      outputs:
        primary_status:
          type: string
  check_replica:
    argv: ["check", "replica"]
    contract:
      writes: [replica]
      outputs:
        replica_status:
          type: string
"#;

const DISJOINT_PARALLEL_RUNBOOK: &str = r#"
api_version: kernel/v0
meta:
  name: disjoint-parallel
tools: [endpoint-probe]
steps:
  - type: parallel
    id: fanout
    branches:
      - label: primary
        steps:
          - type: tool
            id: ping_primary
            tool: endpoint-probe
            action: check_primary
          - type: end
            id: primary_done
            outcome: { category: resolved, code: primary-first }
      - label: replica
        steps:
          - type: tool
            id: ping_replica
            tool: endpoint-probe
            action: check_replica
          - type: end
            id: replica_done
            outcome: { category: resolved, code: replica-second }
  - type: end
    id: done
    outcome: { category: resolved, code: fallthrough }
"#;

#[test]
fn non_conflicting_parallel_branches_run_concurrently() {
    let scenario = Scenario::from_yaml_str(
        r#"
tool_responses:
  "endpoint-probe:check_primary":
    - exit_code: 0
      outputs:
        primary_status: "200"
  "endpoint-probe:check_replica":
    - exit_code: 0
      outputs:
        replica_status: "200"
"#,
    )
    .expect("scenario");
    let definition = load_tool_definition_str(ENDPOINT_PROBE_TOOL).expect("tool");
    let tools: BTreeMap<String, ToolDefinition> =
        [("endpoint-probe".to_string(), definition)].into_iter().collect();
    let (result, vars, trace) = run_scenario(DISJOINT_PARALLEL_RUNBOOK, &scenario, &tools);

    // Declaration-order merge: the first branch's outcome wins even when
    // both branches complete concurrently.
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.outcome.expect("outcome").code, "primary-first");

    // Successful branches' bindings flow back into the parent scope.
    assert_eq!(vars.get("primary_status"), Some(&json!("200")));
    assert_eq!(vars.get("replica_status"), Some(&json!("200")));
    assert_eq!(
        runbook_kernel_core::scope::lookup_path(&vars, "ping_primary.primary_status"),
        Some(&json!("200"))
    );

    let events: Vec<TraceEvent> = trace
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("event"))
        .collect();
    let fork_index = events
        .iter()
        .position(|event| event.event_type == EventType::ParallelFork)
        .expect("fork event");
    assert_eq!(events[fork_index].data["serialized"], json!(false));
    let merge_index = events
        .iter()
        .position(|event| event.event_type == EventType::ParallelMerge)
        .expect("merge event");

    // Fork strictly precedes all per-branch events; merge strictly follows
    // all of them (join-all barrier).
    let arm_steps =
        [json!("ping_primary"), json!("ping_replica"), json!("primary_done"), json!("replica_done")];
    let arm_indices: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, event)| {
            event.data.get("step").is_some_and(|step| arm_steps.contains(step))
        })
        .map(|(index, _)| index)
        .collect();
    assert!(!arm_indices.is_empty());
    for index in arm_indices {
        assert!(index > fork_index, "arm event at {index} precedes fork at {fork_index}");
        assert!(index < merge_index, "arm event at {index} follows merge at {merge_index}");
    }
}

// ============================================================================
// SECTION: Scenario 4 — Bounded Backward Jump
// ============================================================================

const JUMP_RUNBOOK: &str = r#"
api_version: kernel/v0
meta:
  name: bounded-jump
steps:
  - type: manual
    id: target
    instructions: "wait for convergence"
  - type: manual
    id: jumper
    instructions: "check convergence"
    next: { step: target, max: 2 }
  - type: end
    id: done
    outcome: { category: resolved, code: converged }
"#;

#[test]
fn backward_jump_is_bounded() {
    let scenario = Scenario::default();
    let (result, vars, _) = run_scenario(JUMP_RUNBOOK, &scenario, &tool_library());
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.outcome.expect("outcome").category, "resolved");
    assert_eq!(
        runbook_kernel_core::scope::lookup_path(&vars, "target.retry_count"),
        Some(&json!(2))
    );
}

#[test]
fn unbounded_backward_jump_fails_validation() {
    let yaml = JUMP_RUNBOOK.replace("next: { step: target, max: 2 }", "next: target");
    let (_, issues) = validate_source(&yaml, &tool_library());
    assert!(issues.iter().any(|issue| issue.message.contains("requires a 'max' bound")));
}

// ============================================================================
// SECTION: Scenario 5 — Tightening Violation at Validation
// ============================================================================

#[test]
fn contract_relaxation_fails_validation() {
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
    inputs:
      url: "https://svc/health"
    contract:
      side_effects: false
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;
    let (_, issues) = validate_source(yaml, &tool_library());
    assert!(
        issues
            .iter()
            .any(|issue| issue.message.contains("cannot relax side_effects from true to false")),
        "missing tightening error: {issues:?}"
    );
}

// ============================================================================
// SECTION: Scenario 6 — Hash Chain Tamper Detection
// ============================================================================

#[test]
fn hash_chain_detects_tampering() {
    let scenario = Scenario::from_yaml_str("inputs:\n  status: \"200\"\n").expect("scenario");
    let (_, _, trace) = run_scenario(LINEAR_RUNBOOK, &scenario, &tool_library());

    let clean = verify_trace(&trace);
    assert!(clean.valid);
    assert!(clean.event_count >= 3);

    let lines: Vec<&str> = trace.lines().collect();
    let mut second: TraceEvent = serde_json::from_str(lines[1]).expect("event");
    second.prev_hash = "0".repeat(64);
    let mut tampered: Vec<String> = lines.iter().map(ToString::to_string).collect();
    tampered[1] = serde_json::to_string(&second).expect("serialize");
    let report = verify_trace(&tampered.join("\n"));
    assert!(!report.valid);
    assert_eq!(report.broken_at, Some(2));
    assert!(report.diagnostic.expect("diagnostic").contains("prev_hash"));
}

#[test]
fn signed_run_verifies_with_key() {
    let scenario = Scenario::from_yaml_str("inputs:\n  status: \"200\"\n").expect("scenario");
    let tools = tool_library();
    let (runbook, issues) = validate_source(LINEAR_RUNBOOK, &tools);
    assert!(!has_errors(&issues));
    let runbook = runbook.expect("runbook");

    let executor = ReplayExecutor::new(&scenario);
    let approvals = AutoApprove;
    let ports = EnginePorts {
        executor: &executor,
        evidence: &executor,
        approvals: &approvals,
        extensions: None,
        resolvers: &[],
    };
    let buffer = SharedBuffer::new();
    let trace = TraceWriter::new(Box::new(buffer.clone()), "signed-run").with_signing(Some(
        SigningKey {
            key: b"audit-key".to_vec(),
            key_id: Some("audit-1".to_string()),
        },
    ));
    let engine = Engine::new(&runbook, &tools, ports, RunMode::Replay);
    let result = engine.run(&trace, &scenario.inputs, &CancelToken::new());
    assert_eq!(result.status, RunStatus::Completed);

    let report = verify_trace_with_key(&buffer.contents(), Some(b"audit-key"));
    assert!(report.valid);
    assert_eq!(report.signature, SignatureStatus::Ok);
}

// ============================================================================
// SECTION: Replay Determinism and Exhaustion
// ============================================================================

#[test]
fn replay_is_deterministic_across_runs() {
    let scenario = Scenario::from_yaml_str(
        r#"
tool_responses:
  "health-check:check":
    - exit_code: 0
      outputs:
        status_code: "503"
"#,
    )
    .expect("scenario");
    let tools = tool_library();
    let (_, _, first) = run_scenario(BRANCHING_RUNBOOK, &scenario, &tools);
    let (_, _, second) = run_scenario(BRANCHING_RUNBOOK, &scenario, &tools);
    assert_eq!(event_types(&first), event_types(&second));
}

#[test]
fn exhausted_responses_fail_the_step() {
    let scenario = Scenario::from_yaml_str(
        r#"
tool_responses:
  "health-check:check": []
"#,
    )
    .expect("scenario");
    let (result, _, _) = run_scenario(BRANCHING_RUNBOOK, &scenario, &tool_library());
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.expect("error").contains("exhausted"));
}

#[test]
fn unknown_response_key_fails_the_step() {
    let scenario = Scenario::default();
    let (result, _, _) = run_scenario(BRANCHING_RUNBOOK, &scenario, &tool_library());
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.expect("error").contains("no replay responses"));
}

// ============================================================================
// SECTION: Evidence From Scenarios
// ============================================================================

#[test]
fn manual_evidence_resolves_from_scenario() {
    let runbook_yaml = r#"
api_version: kernel/v0
meta:
  name: evidence-run
steps:
  - type: manual
    id: confirm
    instructions: "confirm the dashboard is green"
    required_evidence:
      - kind: text
        name: dashboard_state
  - type: assert
    id: check
    assert:
      - kind: equals
        value: "{{ .confirm.dashboard_state }}"
        expected: green
  - type: end
    id: done
    outcome: { category: resolved, code: confirmed }
"#;
    let scenario = Scenario::from_yaml_str(
        r#"
evidence:
  confirm:
    dashboard_state: green
"#,
    )
    .expect("scenario");
    let (result, vars, _) = run_scenario(runbook_yaml, &scenario, &tool_library());
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(
        runbook_kernel_core::scope::lookup_path(&vars, "confirm.dashboard_state"),
        Some(&json!("green"))
    );
}
