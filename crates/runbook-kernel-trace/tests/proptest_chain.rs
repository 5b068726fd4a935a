// crates/runbook-kernel-trace/tests/proptest_chain.rs
// ============================================================================
// Module: Hash Chain Property Tests
// Description: Property-based tamper detection over generated traces.
// ============================================================================
//! ## Overview
//! Property checks: every generated trace verifies cleanly as written, and
//! flipping any single character of any non-terminal line breaks
//! verification at that line or the next, never earlier.

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
use runbook_kernel_trace::EventType;
use runbook_kernel_trace::SharedBuffer;
use runbook_kernel_trace::TraceWriter;
use runbook_kernel_trace::verify_trace;
use serde_json::Map;
use serde_json::json;

/// Emits a trace with the given per-event step labels and returns its
/// content.
fn emit_trace(labels: &[String]) -> String {
    let buffer = SharedBuffer::new();
    let writer = TraceWriter::new(Box::new(buffer.clone()), "prop-run").with_signing(None);
    for label in labels {
        let mut data = Map::new();
        data.insert("step".to_string(), json!(label));
        writer.emit(EventType::StepStart, data).expect("emit");
    }
    writer.emit_complete(Map::new()).expect("complete");
    buffer.contents()
}

/// Replaces the character at `index` of `line` with a different ASCII
/// character.
fn flip_char(line: &str, index: usize) -> String {
    let mut chars: Vec<char> = line.chars().collect();
    let position = index % chars.len();
    chars[position] = if chars[position] == 'x' { 'y' } else { 'x' };
    chars.into_iter().collect()
}

/// Strategy over ASCII step labels.
fn label() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,10}"
}

proptest! {
    #[test]
    fn generated_traces_verify_cleanly(labels in proptest::collection::vec(label(), 1..6)) {
        let content = emit_trace(&labels);
        let report = verify_trace(&content);
        prop_assert!(report.valid);
        prop_assert_eq!(report.event_count, labels.len() + 1);
    }

    #[test]
    fn any_single_flip_breaks_at_that_line_or_the_next(
        labels in proptest::collection::vec(label(), 1..6),
        line_pick in any::<usize>(),
        offset in any::<usize>(),
    ) {
        let content = emit_trace(&labels);
        let lines: Vec<&str> = content.lines().collect();
        // Skip the terminal event: nothing chains after it, so a flip that
        // lands outside its prev_hash field is only caught by the signature.
        let tampered_index = line_pick % (lines.len() - 1);
        let line_no = tampered_index + 1;

        let mut tampered: Vec<String> = lines.iter().map(ToString::to_string).collect();
        tampered[tampered_index] = flip_char(lines[tampered_index], offset);
        prop_assert_ne!(tampered[tampered_index].as_str(), lines[tampered_index]);

        let report = verify_trace(&tampered.join("\n"));
        prop_assert!(!report.valid);
        let broken_at = report.broken_at.expect("broken line");
        prop_assert!(
            broken_at == line_no || broken_at == line_no + 1,
            "flip at line {line_no} detected at {broken_at}"
        );
    }
}
