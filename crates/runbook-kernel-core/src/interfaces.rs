// crates/runbook-kernel-core/src/interfaces.rs
// ============================================================================
// Module: Engine Ports
// Description: Backend-agnostic interfaces for tool execution, evidence,
//              approvals, input resolution, and extensions.
// Purpose: Define the contract surfaces the engine consumes without
//          embedding transport details.
// Dependencies: crate::schema, crate::scope, runbook-kernel-contract, time
// ============================================================================

//! ## Overview
//! Ports isolate the engine from transports. The live implementations
//! (process spawn, JSON-RPC, MCP, ticket systems) live outside the core;
//! the replay executor and the in-process auto-approver implement the same
//! traits. Implementations must be `Send + Sync` because parallel blocks
//! call them from branch threads, and every potentially blocking call
//! receives a cancellation token to honor at its next suspension point.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use runbook_kernel_contract::RiskLevel;
use runbook_kernel_contract::ToolDefinition;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::schema::RequiredEvidence;
use crate::scope::Scope;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Lightweight cancellation token threaded through every port call.
///
/// # Invariants
/// - Cancellation is sticky: once set it is never cleared.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    /// Shared cancellation flag.
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true when cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Tool Executor
// ============================================================================

/// Response returned by a tool invocation.
///
/// # Invariants
/// - `outputs` hold extracted, typed values; raw streams stay in `stdout`
///   and `stderr`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorResponse {
    /// Process or transport exit code; non-zero is a step failure.
    #[serde(default)]
    pub exit_code: i64,
    /// Raw standard output.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    /// Raw standard error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    /// Extracted named outputs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
}

/// Errors raised by tool executors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Transport-level failure (spawn, pipe, protocol).
    #[error("executor transport error: {0}")]
    Transport(String),
    /// Replay scenario has no response list for the key.
    #[error("no replay responses for '{key}'")]
    ReplayUnknownKey {
        /// Missing `tool:action` key.
        key: String,
    },
    /// Replay response list for the key is exhausted.
    #[error("replay responses exhausted for '{key}'")]
    ReplayExhausted {
        /// Exhausted `tool:action` key.
        key: String,
    },
    /// The call was cancelled.
    #[error("tool execution cancelled")]
    Cancelled,
}

/// Port invoking tool actions.
pub trait ToolExecutor: Send + Sync {
    /// Executes one tool action with resolved inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] on transport failure, replay exhaustion, or
    /// cancellation.
    fn execute(
        &self,
        tool: &ToolDefinition,
        action: &str,
        inputs: &BTreeMap<String, Value>,
        scope: &Scope,
        cancel: &CancelToken,
    ) -> Result<ExecutorResponse, ExecutorError>;
}

// ============================================================================
// SECTION: Evidence Collector
// ============================================================================

/// Errors raised while collecting manual-step evidence.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum EvidenceError {
    /// Evidence could not be gathered.
    #[error("evidence collection failed for '{name}': {message}")]
    Collection {
        /// Evidence item name.
        name: String,
        /// Collector diagnostic.
        message: String,
    },
    /// The call was cancelled.
    #[error("evidence collection cancelled")]
    Cancelled,
}

/// Port gathering values for a manual step's evidence requirements.
pub trait EvidenceCollector: Send + Sync {
    /// Collects one evidence value for the step.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError`] when the value cannot be gathered.
    fn collect(
        &self,
        step_id: &str,
        item: &RequiredEvidence,
        cancel: &CancelToken,
    ) -> Result<Value, EvidenceError>;
}

/// Collector that skips evidence entirely (dry-run mode).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvidence;

impl EvidenceCollector for NoEvidence {
    fn collect(
        &self,
        _step_id: &str,
        _item: &RequiredEvidence,
        _cancel: &CancelToken,
    ) -> Result<Value, EvidenceError> {
        Ok(Value::Null)
    }
}

// ============================================================================
// SECTION: Approval Port
// ============================================================================

/// Approval request submitted for a require-approval decision.
///
/// # Invariants
/// - `min_approvers` is at least 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Step identifier awaiting approval.
    pub step_id: String,
    /// Risk level that triggered the requirement.
    pub risk_level: RiskLevel,
    /// Minimum number of approvers.
    pub min_approvers: u32,
    /// Human-readable request summary.
    pub summary: String,
}

/// Ticket handle for a submitted approval request.
///
/// # Invariants
/// - Opaque; only meaningful to the issuing port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTicket {
    /// Opaque ticket identifier.
    pub id: String,
}

/// Resolution of an approval request.
///
/// # Invariants
/// - `timestamp` is RFC 3339 UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// Whether the request was approved.
    pub approved: bool,
    /// Approver identifier.
    pub approver: String,
    /// Approval method label (auto, ticket, chat).
    pub method: String,
    /// Resolution timestamp.
    pub timestamp: String,
}

/// Errors raised by the approval port.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// Transport failed while submitting or waiting.
    #[error("approval transport error: {0}")]
    Transport(String),
    /// The wait was cancelled.
    #[error("approval wait cancelled")]
    Cancelled,
}

/// Port submitting approval requests and awaiting their resolution.
pub trait ApprovalPort: Send + Sync {
    /// Submits a request, returning a ticket to wait on.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError`] on transport failure.
    fn submit(&self, request: &ApprovalRequest) -> Result<ApprovalTicket, ApprovalError>;

    /// Blocks until the ticket resolves.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError`] on transport failure or cancellation.
    fn wait(
        &self,
        ticket: &ApprovalTicket,
        cancel: &CancelToken,
    ) -> Result<ApprovalResponse, ApprovalError>;
}

/// In-process approval port that resolves every request immediately.
///
/// # Invariants
/// - Used in dry-run and replay modes where approvals auto-approve.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl ApprovalPort for AutoApprove {
    fn submit(&self, request: &ApprovalRequest) -> Result<ApprovalTicket, ApprovalError> {
        Ok(ApprovalTicket {
            id: request.step_id.clone(),
        })
    }

    fn wait(
        &self,
        _ticket: &ApprovalTicket,
        _cancel: &CancelToken,
    ) -> Result<ApprovalResponse, ApprovalError> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|err| ApprovalError::Transport(err.to_string()))?;
        Ok(ApprovalResponse {
            approved: true,
            approver: "auto".to_string(),
            method: "auto".to_string(),
            timestamp,
        })
    }
}

// ============================================================================
// SECTION: Input Resolver
// ============================================================================

/// Errors raised while resolving an external input binding.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum InputResolveError {
    /// The binding could not be resolved.
    #[error("input binding '{binding}' failed: {message}")]
    Binding {
        /// Offending binding string.
        binding: String,
        /// Resolver diagnostic.
        message: String,
    },
}

/// Port resolving `from`-bound inputs from external systems.
pub trait InputResolver: Send + Sync {
    /// Returns the binding prefix this resolver serves (for example `env`).
    fn prefix(&self) -> &str;

    /// Resolves a binding of the form `<prefix>:<key>`.
    ///
    /// # Errors
    ///
    /// Returns [`InputResolveError`] when the binding cannot be resolved.
    fn resolve(&self, binding: &str) -> Result<Value, InputResolveError>;
}

// ============================================================================
// SECTION: Extension Runner
// ============================================================================

/// Errors raised by extension runners.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// No runner is registered for the extension name.
    #[error("no extension runner for '{name}'")]
    NotFound {
        /// Extension name.
        name: String,
    },
    /// The runner reported a failure.
    #[error("extension '{name}' failed: {message}")]
    Failed {
        /// Extension name.
        name: String,
        /// Runner diagnostic.
        message: String,
    },
    /// The call was cancelled.
    #[error("extension execution cancelled")]
    Cancelled,
}

/// Port dispatching extension steps to an external runner.
///
/// Implementations speak JSON-RPC 2.0 (initialize / execute / shutdown) over
/// stdio or an equivalent transport, serialized per runner with monotonic
/// request identifiers.
pub trait ExtensionRunner: Send + Sync {
    /// Executes an extension step and returns its named outputs.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError`] when the runner is missing or fails.
    fn execute(
        &self,
        name: &str,
        inputs: &BTreeMap<String, Value>,
        scope: &Scope,
        cancel: &CancelToken,
    ) -> Result<BTreeMap<String, Value>, ExtensionError>;
}
