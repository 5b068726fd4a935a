// crates/runbook-kernel-core/tests/loader.rs
// ============================================================================
// Module: Loader Guard Tests
// Description: Validate document loading guards (path, size, encoding).
// Purpose: Ensure runbook and tool input handling is strict and fail-closed.
// ============================================================================
//! ## Overview
//! Validates the input-hygiene guards and strict decode behavior of the
//! document loader.

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

use std::io::Write;
use std::path::Path;

use runbook_kernel_core::LoadError;
use runbook_kernel_core::Runbook;
use runbook_kernel_core::load_runbook;
use runbook_kernel_core::load_runbook_str;
use tempfile::NamedTempFile;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<Runbook, LoadError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid runbook load".to_string()),
    }
}

const MINIMAL: &str = r#"
api_version: kernel/v0
meta:
  name: minimal
steps:
  - type: end
    id: done
    outcome: { category: resolved, code: ok }
"#;

#[test]
fn load_accepts_a_minimal_runbook() -> TestResult {
    let runbook = load_runbook_str(MINIMAL).map_err(|err| err.to_string())?;
    if runbook.meta.name == "minimal" && runbook.steps.len() == 1 {
        Ok(())
    } else {
        Err("decoded runbook did not match source".to_string())
    }
}

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    let path = Path::new(&long_path);
    assert_invalid(load_runbook(path), "path exceeds max length")
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    let path = Path::new(&long_component);
    assert_invalid(load_runbook(path), "path component too long")
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    let payload = vec![b'a'; 1_048_577];
    file.write_all(&payload).map_err(|err| err.to_string())?;
    assert_invalid(load_runbook(file.path()), "exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(load_runbook(file.path()), "must be utf-8")
}

#[test]
fn load_rejects_unknown_fields() -> TestResult {
    let yaml = format!("{MINIMAL}\nmystery: true\n");
    assert_invalid(load_runbook_str(&yaml), "structure error")
}

#[test]
fn load_rejects_unknown_step_type() -> TestResult {
    let yaml = MINIMAL.replace("type: end", "type: teleport");
    assert_invalid(load_runbook_str(&yaml), "structure error")
}

#[test]
fn load_round_trips_from_disk() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(MINIMAL.as_bytes()).map_err(|err| err.to_string())?;
    let runbook = load_runbook(file.path()).map_err(|err| err.to_string())?;
    if runbook.api_version == "kernel/v0" {
        Ok(())
    } else {
        Err("unexpected api_version".to_string())
    }
}
