// crates/runbook-kernel-core/src/runtime/result.rs
// ============================================================================
// Module: Run Results
// Description: Terminal run results, outcomes, and engine errors.
// Purpose: Capture how a run ended for callers, test specs, and the trace.
// Dependencies: crate::interfaces, crate::scope, crate::template, serde
// ============================================================================

//! ## Overview
//! A run ends in one of three states: completed with a structured outcome,
//! failed (a step failure or governance refusal that `continue_on_fail` did
//! not absorb), or error (the engine hit a hard fault such as a missing jump
//! target). Failures carry a stable kind label so test specs and drivers can
//! match on them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::interfaces::ApprovalError;
use crate::interfaces::EvidenceError;
use crate::interfaces::ExtensionError;
use crate::scope::VisibilityError;
use crate::template::TemplateError;
use runbook_kernel_trace::TraceError;

// ============================================================================
// SECTION: Run Status
// ============================================================================

/// Terminal run status.
///
/// # Invariants
/// - Variants are stable for serialization and test-spec matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run reached an end step.
    Completed,
    /// A step failure or governance refusal terminated the run.
    Failed,
    /// The engine hit a hard fault.
    Error,
}

impl RunStatus {
    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Failure Kinds
// ============================================================================

/// Stable failure kind labels for failed runs and steps.
///
/// # Invariants
/// - Variants are stable for serialization and test-spec matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Governance denied the step.
    Denied,
    /// An approval request was rejected.
    ApprovalRejected,
    /// An assertion failed.
    Assertion,
    /// The tool executor returned a failure.
    Executor,
    /// An extension runner reported a failure.
    Extension,
}

impl FailureKind {
    /// Returns the stable wire label for the failure kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Denied => "denied",
            Self::ApprovalRejected => "approval_rejected",
            Self::Assertion => "assertion",
            Self::Executor => "executor",
            Self::Extension => "extension",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Resolved terminal outcome of a completed run.
///
/// # Invariants
/// - `category` is one of resolved / escalated / no_action / needs_rca.
/// - `meta` values are fully template-expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Outcome category.
    pub category: String,
    /// Machine-readable outcome code.
    pub code: String,
    /// Expanded outcome metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

// ============================================================================
// SECTION: Run Result
// ============================================================================

/// Terminal result of a run.
///
/// # Invariants
/// - `outcome` is set exactly for completed runs.
/// - `failure_kind` is set for failed runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Terminal status.
    pub status: RunStatus,
    /// Outcome for completed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    /// Failure kind for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// Human-readable error description for failed and errored runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    /// Builds a completed result carrying an outcome.
    #[must_use]
    pub const fn completed(outcome: RunOutcome) -> Self {
        Self {
            status: RunStatus::Completed,
            outcome: Some(outcome),
            failure_kind: None,
            error: None,
        }
    }

    /// Builds a failed result with a kind and message.
    #[must_use]
    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            outcome: None,
            failure_kind: Some(kind),
            error: Some(error.into()),
        }
    }

    /// Builds an errored result from an engine fault.
    #[must_use]
    pub fn errored(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            outcome: None,
            failure_kind: None,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// SECTION: Engine Errors
// ============================================================================

/// Hard faults that abort the engine with an errored run result.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A referenced tool has no loaded definition.
    #[error("tool '{name}' is not loaded")]
    ToolNotFound {
        /// Missing tool name.
        name: String,
    },
    /// A referenced action does not exist on the tool.
    #[error("tool '{tool}' has no action '{action}'")]
    ActionNotFound {
        /// Tool name.
        tool: String,
        /// Missing action name.
        action: String,
    },
    /// A jump target was not found in the current scope.
    #[error("next target '{target}' not found in the current scope")]
    TargetNotFound {
        /// Missing target identifier.
        target: String,
    },
    /// A backward jump carried no bound at runtime.
    #[error("backward jump to '{target}' requires a 'max' bound")]
    UnboundedBackwardJump {
        /// Jump target identifier.
        target: String,
    },
    /// A jump bound did not resolve to an unsigned integer.
    #[error("jump bound '{raw}' is not a non-negative integer")]
    InvalidJumpBound {
        /// Resolved bound text.
        raw: String,
    },
    /// Template parsing or evaluation failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// An assertion pattern failed to compile.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// Compiler diagnostic.
        message: String,
    },
    /// Visibility glob compilation failed.
    #[error(transparent)]
    Visibility(#[from] VisibilityError),
    /// Trace emission failed.
    #[error(transparent)]
    Trace(#[from] TraceError),
    /// A required input stayed unresolved.
    #[error("required input '{name}' could not be resolved")]
    InputUnresolved {
        /// Input name.
        name: String,
    },
    /// An external input resolver failed.
    #[error(transparent)]
    InputResolver(#[from] crate::interfaces::InputResolveError),
    /// An `inputs_from` source was missing or not an object.
    #[error("inputs_from source '{name}' is not an object-valued variable")]
    InputSpread {
        /// Source variable name.
        name: String,
    },
    /// A for-each source did not yield a list.
    #[error("for_each source did not resolve to a list: {detail}")]
    ForEachSource {
        /// Diagnostic detail.
        detail: String,
    },
    /// Two for-each iterations produced the same keyed output.
    #[error("for_each key '{key}' produced by more than one iteration")]
    DuplicateForEachKey {
        /// Duplicate key value.
        key: String,
    },
    /// No branch arm matched and no default was declared.
    #[error("no branch condition matched for step '{step}'")]
    NoBranchMatched {
        /// Branch step identifier.
        step: String,
    },
    /// The step list ended without reaching an end step.
    #[error("runbook ended without reaching an end step")]
    MissingEnd,
    /// The approval port failed.
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    /// The evidence port failed.
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
    /// An extension runner was missing.
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    /// A parallel branch task panicked.
    #[error("parallel branch task failed: {0}")]
    Thread(String),
    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,
}
