// crates/runbook-kernel-contract/tests/tool.rs
// ============================================================================
// Module: Tool Definition Tests
// Description: Tests for tool document validation and action contracts.
// ============================================================================
//! ## Overview
//! Validates tool definition decoding, the `tool/v0` version gate, action
//! contract tightening at load, and effective action-contract resolution.

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

use runbook_kernel_contract::ToolDefinition;
use runbook_kernel_contract::ToolDefinitionError;
use runbook_kernel_contract::Transport;
use runbook_kernel_contract::TriBool;

/// Decodes a tool definition from YAML.
fn decode(yaml: &str) -> ToolDefinition {
    serde_yaml::from_str(yaml).expect("tool yaml decodes")
}

const HEALTH_CHECK: &str = r#"
api_version: tool/v0
meta:
  name: health-check
  description: Probe service health endpoints.
  transport: stdio
  binary: health-check
contract:
  side_effects: false
  deterministic: true
  reads: [service]
  outputs:
    status_code:
      type: string
actions:
  check:
    argv: ["--url", "{{ .url }}"]
    extract:
      status_code:
        from: stdout
        pattern: "status=(\\d+)"
"#;

#[test]
fn decodes_and_validates_a_tool_document() {
    let definition = decode(HEALTH_CHECK);
    definition.validate().expect("valid definition");
    assert_eq!(definition.meta.name, "health-check");
    assert_eq!(definition.meta.transport, Transport::Stdio);
    assert!(definition.actions.contains_key("check"));
}

#[test]
fn rejects_wrong_api_version() {
    let yaml = HEALTH_CHECK.replace("tool/v0", "tool/v1");
    let definition = decode(&yaml);
    let err = definition.validate().expect_err("version gate");
    assert!(matches!(err, ToolDefinitionError::ApiVersion { .. }));
    assert!(err.to_string().contains("tool/v0"));
}

#[test]
fn rejects_unknown_fields() {
    let yaml = format!("{HEALTH_CHECK}\nunexpected: true\n");
    let result: Result<ToolDefinition, _> = serde_yaml::from_str(&yaml);
    assert!(result.is_err());
}

#[test]
fn action_contract_must_tighten_tool_contract() {
    let yaml = r#"
api_version: tool/v0
meta:
  name: deploy
contract:
  side_effects: true
actions:
  apply:
    argv: ["apply"]
    contract:
      side_effects: false
"#;
    let definition = decode(yaml);
    let err = definition.validate().expect_err("relaxation rejected");
    let message = err.to_string();
    assert!(message.contains("cannot relax side_effects from true to false"));
    assert!(message.contains("apply"));
}

#[test]
fn action_contract_merges_over_tool_contract() {
    let yaml = r#"
api_version: tool/v0
meta:
  name: deploy
contract:
  side_effects: true
  writes: [service]
actions:
  apply:
    argv: ["apply"]
    contract:
      idempotent: false
      writes: [dns]
"#;
    let definition = decode(yaml);
    definition.validate().expect("valid definition");
    let contract = definition.action_contract("apply");
    assert_eq!(contract.side_effects, TriBool::True);
    assert!(contract.writes.contains("service"));
    assert!(contract.writes.contains("dns"));
}

#[test]
fn missing_action_falls_back_to_tool_contract() {
    let definition = decode(HEALTH_CHECK);
    let contract = definition.action_contract("nonexistent");
    assert_eq!(contract, definition.contract);
}

#[test]
fn secrets_and_platform_are_optional_metadata() {
    let yaml = r#"
api_version: tool/v0
meta:
  name: dns-tool
  platform: [linux, macos]
  secrets: [DNS_API_TOKEN]
contract: {}
actions: {}
"#;
    let definition = decode(yaml);
    definition.validate().expect("valid definition");
    assert_eq!(definition.meta.platform, vec!["linux", "macos"]);
    assert_eq!(definition.meta.secrets, vec!["DNS_API_TOKEN"]);
}
