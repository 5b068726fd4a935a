// crates/runbook-kernel-trace/tests/redaction.rs
// ============================================================================
// Module: Redaction Tests
// Description: Tests for secret value redaction in emitted events.
// ============================================================================
//! ## Overview
//! Validates that registered secret values are substring-replaced before
//! emission, that nested data is covered, and that a `redaction_applied`
//! event follows any redacted emission.

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

use runbook_kernel_trace::EventType;
use runbook_kernel_trace::REDACTED;
use runbook_kernel_trace::SharedBuffer;
use runbook_kernel_trace::TraceEvent;
use runbook_kernel_trace::TraceWriter;
use runbook_kernel_trace::verify_trace;
use serde_json::Map;
use serde_json::json;

/// Builds a buffer-backed writer with one registered secret value.
fn secret_writer() -> (SharedBuffer, TraceWriter) {
    let buffer = SharedBuffer::new();
    let writer = TraceWriter::new(Box::new(buffer.clone()), "run-1").with_signing(None);
    writer.set_secret_values(&["hunter2".to_string()]);
    (buffer, writer)
}

#[test]
fn secret_values_are_replaced_in_strings() {
    let (buffer, writer) = secret_writer();
    let mut data = Map::new();
    data.insert("stdout".to_string(), json!("token=hunter2 ok"));
    writer.emit(EventType::StepComplete, data).expect("emit");

    let content = buffer.contents();
    assert!(!content.contains("hunter2"));
    assert!(content.contains(REDACTED));
}

#[test]
fn nested_values_are_redacted() {
    let (buffer, writer) = secret_writer();
    let mut data = Map::new();
    data.insert(
        "outputs".to_string(),
        json!({ "auth": ["bearer hunter2"], "plain": "ok" }),
    );
    writer.emit(EventType::StepComplete, data).expect("emit");
    let content = buffer.contents();
    assert!(!content.contains("hunter2"));
    assert!(content.contains("ok"));
}

#[test]
fn redaction_emits_a_redaction_applied_event() {
    let (buffer, writer) = secret_writer();
    let mut data = Map::new();
    data.insert("stdout".to_string(), json!("hunter2"));
    writer.emit(EventType::StepComplete, data).expect("emit");

    let content = buffer.contents();
    let events: Vec<TraceEvent> = content
        .lines()
        .map(|line| serde_json::from_str(line).expect("event"))
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, EventType::RedactionApplied);
    assert_eq!(events[1].data["applied_to"], json!("step_complete"));
}

#[test]
fn redacted_traces_still_verify() {
    let (buffer, writer) = secret_writer();
    let mut data = Map::new();
    data.insert("stdout".to_string(), json!("hunter2"));
    writer.emit(EventType::StepComplete, data).expect("emit");
    writer.emit_complete(Map::new()).expect("complete");
    let report = verify_trace(&buffer.contents());
    assert!(report.valid);
    assert_eq!(report.event_count, 3);
}

#[test]
fn clean_events_emit_no_redaction_marker() {
    let (buffer, writer) = secret_writer();
    let mut data = Map::new();
    data.insert("stdout".to_string(), json!("all clear"));
    writer.emit(EventType::StepComplete, data).expect("emit");
    let content = buffer.contents();
    assert_eq!(content.lines().count(), 1);
    assert!(!content.contains(REDACTED));
}
