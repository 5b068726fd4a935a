// crates/runbook-kernel-core/tests/snapshot.rs
// ============================================================================
// Module: Run Snapshot Tests
// Description: Tests for snapshot save/load round trips.
// ============================================================================
//! ## Overview
//! Validates that run snapshots persist the scope, retry counters, and
//! cursor as plain JSON and reload identically.

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

use runbook_kernel_core::RunSnapshot;
use runbook_kernel_core::Scope;
use serde_json::json;

#[test]
fn snapshot_round_trips_through_disk() {
    let mut vars = Scope::new();
    vars.insert("status_code".to_string(), json!("503"));
    vars.insert("health".to_string(), json!({ "status_code": "503" }));
    let snapshot = RunSnapshot {
        vars,
        retries: [("target".to_string(), 2_u64)].into_iter().collect(),
        cursor: 3,
    };

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.snapshot.json");
    snapshot.save(&path).expect("save");
    let loaded = RunSnapshot::load(&path).expect("load");
    assert_eq!(loaded, snapshot);
}

#[test]
fn snapshot_is_plain_inspectable_json() {
    let snapshot = RunSnapshot {
        vars: Scope::new(),
        retries: std::collections::BTreeMap::new(),
        cursor: 0,
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.snapshot.json");
    snapshot.save(&path).expect("save");
    let raw = std::fs::read_to_string(&path).expect("read");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["cursor"], json!(0));
}

#[test]
fn missing_snapshot_reports_io_error() {
    let err = RunSnapshot::load(std::path::Path::new("/nonexistent/run.json"))
        .expect_err("missing file");
    assert!(err.to_string().contains("snapshot io error"));
}
