// crates/runbook-kernel-trace/src/event.rs
// ============================================================================
// Module: Trace Events
// Description: Typed trace event records for the hash-chained run log.
// Purpose: Provide stable wire shapes for every event the engine emits.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every run emits an append-only sequence of trace events, one JSON object
//! per line. Each event carries its type, an RFC 3339 UTC timestamp, the run
//! identifier, a free-form data map, and the hash of the previous line. The
//! terminal `run_complete` event additionally embeds the chain hash and an
//! optional HMAC signature.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Genesis previous-hash value for the first event of a trace.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

// ============================================================================
// SECTION: Event Types
// ============================================================================

/// Trace event types emitted by the engine.
///
/// # Invariants
/// - Variants are stable for serialization and offline verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Run started; carries runbook name, inputs, and constants.
    RunStart,
    /// Run finished; carries status and the chain hash.
    RunComplete,
    /// Step dispatch began.
    StepStart,
    /// Step dispatch finished; carries status and failure kind.
    StepComplete,
    /// Branch arm was entered.
    BranchEnter,
    /// Branch arm was exited.
    BranchExit,
    /// Parallel block forked its branches.
    ParallelFork,
    /// Parallel block joined and merged its branches.
    ParallelMerge,
    /// Terminal outcome was resolved.
    OutcomeResolved,
    /// Step contract was resolved; carries the contract summary.
    ContractEvaluated,
    /// Governance decision was made for a step.
    GovernanceDecision,
    /// Secret redaction replaced values in an emitted event.
    RedactionApplied,
    /// For-each expansion started.
    ForEachStart,
    /// Single for-each iteration ran.
    ForEachItem,
    /// Approval request was submitted.
    ApprovalSubmitted,
    /// Approval request was resolved.
    ApprovalResolved,
    /// Sub-scope value was exported to the parent scope.
    ScopeExport,
    /// Visibility globs were applied to a scope.
    VisibilityApplied,
    /// Bounded repeat block started.
    RepeatStart,
    /// Single repeat iteration ran.
    RepeatIteration,
    /// Runtime contract violation was observed.
    ContractViolation,
    /// Input was resolved during the pre-flight pass.
    InputResolved,
}

impl EventType {
    /// Returns the stable wire label for the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunStart => "run_start",
            Self::RunComplete => "run_complete",
            Self::StepStart => "step_start",
            Self::StepComplete => "step_complete",
            Self::BranchEnter => "branch_enter",
            Self::BranchExit => "branch_exit",
            Self::ParallelFork => "parallel_fork",
            Self::ParallelMerge => "parallel_merge",
            Self::OutcomeResolved => "outcome_resolved",
            Self::ContractEvaluated => "contract_evaluated",
            Self::GovernanceDecision => "governance_decision",
            Self::RedactionApplied => "redaction_applied",
            Self::ForEachStart => "for_each_start",
            Self::ForEachItem => "for_each_item",
            Self::ApprovalSubmitted => "approval_submitted",
            Self::ApprovalResolved => "approval_resolved",
            Self::ScopeExport => "scope_export",
            Self::VisibilityApplied => "visibility_applied",
            Self::RepeatStart => "repeat_start",
            Self::RepeatIteration => "repeat_iteration",
            Self::ContractViolation => "contract_violation",
            Self::InputResolved => "input_resolved",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Event Record
// ============================================================================

/// Single trace event line.
///
/// # Invariants
/// - `prev_hash` is the SHA-256 hex digest of the previous serialized line;
///   the first event carries [`GENESIS_PREV_HASH`].
/// - `chain_hash`, `signature`, and `signing_key_id` appear only on the
///   terminal `run_complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Event type label.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Run identifier the event belongs to.
    pub run_id: String,
    /// Event payload.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// SHA-256 hex digest of the previous serialized line.
    pub prev_hash: String,
    /// Chain hash embedded in the terminal `run_complete` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_hash: Option<String>,
    /// Hex HMAC-SHA256 signature over `chain_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Identifier of the signing key used for `signature`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<String>,
}
