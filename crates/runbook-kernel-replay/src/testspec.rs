// crates/runbook-kernel-replay/src/testspec.rs
// ============================================================================
// Module: Test Specifications
// Description: Declarative assertions over a finished replay run.
// Purpose: Let scenario suites assert outcomes, reached steps, and output
//          values without imperative test code.
// Dependencies: crate, regex, runbook-kernel-core, runbook-kernel-trace
// ============================================================================

//! ## Overview
//! A test spec declares what a run must have produced: the outcome category
//! and code, the terminal status, steps that must (or must not) have been
//! reached, and expected output values. Expected values written `/regex/`
//! match as patterns; everything else compares literally after
//! stringification. Checking yields a list of human-readable failures; an
//! empty list is a pass.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use runbook_kernel_core::RunResult;
use runbook_kernel_core::Scope;
use runbook_kernel_core::loader::LoadError;
use runbook_kernel_core::loader::read_document;
use runbook_kernel_core::scope::lookup_path;
use runbook_kernel_core::template::stringify;
use runbook_kernel_trace::EventType;
use runbook_kernel_trace::TraceEvent;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Test Spec
// ============================================================================

/// Declarative expectations over a finished run.
///
/// # Invariants
/// - `expected_outputs` values of the form `/pattern/` are regex matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    /// Expected outcome category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
    /// Expected outcome code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_code: Option<String>,
    /// Expected terminal status (`completed`, `failed`, `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<String>,
    /// Step ids that must have started.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_reach: Vec<String>,
    /// Step ids that must not have started.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not_reach: Vec<String>,
    /// Expected final output values by dotted path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expected_outputs: BTreeMap<String, Value>,
}

impl TestSpec {
    /// Decodes a test spec from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Structure`] on any decode failure.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, LoadError> {
        serde_yaml::from_str(yaml).map_err(|err| LoadError::Structure(err.to_string()))
    }

    /// Loads a test spec from disk with the shared input-hygiene guards.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when a guard rejects the file or decode fails.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        Self::from_yaml_str(&read_document(path)?)
    }

    /// Checks the declared expectations against a run result, final scope,
    /// and trace.
    ///
    /// Returns human-readable failures; an empty list is a pass.
    #[must_use]
    pub fn check(&self, result: &RunResult, vars: &Scope, trace_content: &str) -> Vec<String> {
        let mut failures = Vec::new();

        if let Some(expected) = &self.expected_status {
            let actual = result.status.to_string();
            if &actual != expected {
                failures.push(format!("expected status '{expected}', got '{actual}'"));
            }
        }
        if let Some(expected) = &self.expected_outcome {
            let actual = result.outcome.as_ref().map(|outcome| outcome.category.clone());
            if actual.as_deref() != Some(expected.as_str()) {
                failures.push(format!(
                    "expected outcome '{expected}', got '{actual}'",
                    actual = actual.unwrap_or_else(|| "(none)".to_string())
                ));
            }
        }
        if let Some(expected) = &self.expected_code {
            let actual = result.outcome.as_ref().map(|outcome| outcome.code.clone());
            if actual.as_deref() != Some(expected.as_str()) {
                failures.push(format!(
                    "expected code '{expected}', got '{actual}'",
                    actual = actual.unwrap_or_else(|| "(none)".to_string())
                ));
            }
        }

        let reached = reached_steps(trace_content);
        for step in &self.must_reach {
            if !reached.contains(step) {
                failures.push(format!("step '{step}' was never reached"));
            }
        }
        for step in &self.must_not_reach {
            if reached.contains(step) {
                failures.push(format!("step '{step}' was reached but must not be"));
            }
        }

        for (path, expected) in &self.expected_outputs {
            let Some(actual) = lookup_path(vars, path) else {
                failures.push(format!("output '{path}' is missing"));
                continue;
            };
            let actual = stringify(actual);
            if let Some(pattern) = regex_literal(expected) {
                match Regex::new(pattern) {
                    Ok(regex) => {
                        if !regex.is_match(&actual) {
                            failures.push(format!(
                                "output '{path}' value '{actual}' does not match /{pattern}/"
                            ));
                        }
                    }
                    Err(err) => {
                        failures.push(format!("output '{path}' pattern /{pattern}/: {err}"));
                    }
                }
            } else {
                let expected = stringify(expected);
                if actual != expected {
                    failures
                        .push(format!("output '{path}': expected '{expected}', got '{actual}'"));
                }
            }
        }
        failures
    }
}

/// Extracts the inner pattern when the expected value is `/pattern/`.
fn regex_literal(value: &Value) -> Option<&str> {
    let text = value.as_str()?;
    let inner = text.strip_prefix('/')?.strip_suffix('/')?;
    if inner.is_empty() { None } else { Some(inner) }
}

/// Collects the step identifiers that emitted `step_start` events.
fn reached_steps(trace_content: &str) -> Vec<String> {
    let mut reached = Vec::new();
    for line in trace_content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<TraceEvent>(line) else {
            continue;
        };
        if event.event_type == EventType::StepStart
            && let Some(Value::String(step)) = event.data.get("step")
        {
            reached.push(step.clone());
        }
    }
    reached
}
