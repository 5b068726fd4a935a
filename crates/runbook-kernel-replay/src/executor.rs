// crates/runbook-kernel-replay/src/executor.rs
// ============================================================================
// Module: Replay Executor
// Description: Deterministic canned-response substitute for tool transport.
// Purpose: Implement the tool executor and evidence ports from a scenario.
// Dependencies: crate::scenario, runbook-kernel-contract, runbook-kernel-core
// ============================================================================

//! ## Overview
//! The replay executor serves tool invocations from the scenario's ordered
//! response lists, keyed by `<tool>:<action>`. Declared outputs return
//! verbatim; extract rules are not re-run. Consumption is serialized behind
//! a mutex so parallel branches drawing from the same key drain responses in
//! a fixed order. Evidence for manual steps resolves from the scenario's
//! evidence map.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use runbook_kernel_contract::ToolDefinition;
use runbook_kernel_core::CancelToken;
use runbook_kernel_core::EvidenceCollector;
use runbook_kernel_core::ExecutorError;
use runbook_kernel_core::ExecutorResponse;
use runbook_kernel_core::Scope;
use runbook_kernel_core::ToolExecutor;
use runbook_kernel_core::interfaces::EvidenceError;
use runbook_kernel_core::schema::RequiredEvidence;
use serde_json::Value;

use crate::scenario::Scenario;

// ============================================================================
// SECTION: Replay Executor
// ============================================================================

/// Canned-response tool executor and evidence collector.
///
/// # Invariants
/// - Responses for a key are consumed strictly head-first.
/// - The response queue is the only mutable state, guarded by a mutex.
pub struct ReplayExecutor {
    /// Remaining responses keyed by `tool:action`.
    responses: Mutex<BTreeMap<String, VecDeque<ExecutorResponse>>>,
    /// Evidence values keyed by step id, then evidence name.
    evidence: BTreeMap<String, BTreeMap<String, Value>>,
}

impl ReplayExecutor {
    /// Builds an executor from a scenario.
    #[must_use]
    pub fn new(scenario: &Scenario) -> Self {
        let responses = scenario
            .tool_responses
            .iter()
            .map(|(key, list)| (key.clone(), list.iter().cloned().collect()))
            .collect();
        Self {
            responses: Mutex::new(responses),
            evidence: scenario.evidence.clone(),
        }
    }

    /// Returns how many responses remain for a key.
    #[must_use]
    pub fn remaining(&self, key: &str) -> usize {
        self.responses
            .lock()
            .map(|responses| responses.get(key).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}

impl ToolExecutor for ReplayExecutor {
    fn execute(
        &self,
        tool: &ToolDefinition,
        action: &str,
        _inputs: &BTreeMap<String, Value>,
        _scope: &Scope,
        cancel: &CancelToken,
    ) -> Result<ExecutorResponse, ExecutorError> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }
        let key = format!("{tool}:{action}", tool = tool.meta.name);
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| ExecutorError::Transport("replay state poisoned".to_string()))?;
        let Some(queue) = responses.get_mut(&key) else {
            return Err(ExecutorError::ReplayUnknownKey {
                key,
            });
        };
        queue.pop_front().ok_or(ExecutorError::ReplayExhausted {
            key,
        })
    }
}

impl EvidenceCollector for ReplayExecutor {
    fn collect(
        &self,
        step_id: &str,
        item: &RequiredEvidence,
        cancel: &CancelToken,
    ) -> Result<Value, EvidenceError> {
        if cancel.is_cancelled() {
            return Err(EvidenceError::Cancelled);
        }
        Ok(self
            .evidence
            .get(step_id)
            .and_then(|values| values.get(&item.name))
            .cloned()
            .unwrap_or(Value::Null))
    }
}
