// crates/runbook-kernel-replay/src/scenario.rs
// ============================================================================
// Module: Replay Scenarios
// Description: Canned-response scenario documents for deterministic replay.
// Purpose: Seed inputs, ordered tool responses, and manual-step evidence
//          for replay runs.
// Dependencies: runbook-kernel-core, serde, serde_yaml
// ============================================================================

//! ## Overview
//! A scenario declares everything a replay run consumes: seed input values,
//! per-`tool:action` ordered response lists, and evidence values keyed by
//! step id and evidence name. Response lists drain head-first; an exhausted
//! or missing list surfaces as an executor failure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use runbook_kernel_core::ExecutorResponse;
use runbook_kernel_core::loader::LoadError;
use runbook_kernel_core::loader::read_document;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Scenario
// ============================================================================

/// Replay scenario document.
///
/// # Invariants
/// - `tool_responses` keys are `<tool>:<action>` pairs.
/// - Response order within a key is the consumption order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Seed variables overlaid on host inputs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Value>,
    /// Ordered canned responses keyed by `tool:action`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_responses: BTreeMap<String, Vec<ExecutorResponse>>,
    /// Evidence values keyed by step id, then evidence name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evidence: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Scenario {
    /// Decodes a scenario from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Structure`] on any decode failure, including
    /// unknown fields.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, LoadError> {
        serde_yaml::from_str(yaml).map_err(|err| LoadError::Structure(err.to_string()))
    }

    /// Loads a scenario from disk with the shared input-hygiene guards.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when a guard rejects the file or decode fails.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        Self::from_yaml_str(&read_document(path)?)
    }
}
