// crates/runbook-kernel-core/src/lib.rs
// ============================================================================
// Module: Runbook Kernel Core Library
// Description: Schema, loader, validator, template evaluator, ports, and
//              the step interpreter.
// Purpose: Provide the governed runbook execution core.
// Dependencies: globset, regex, runbook-kernel-contract,
// runbook-kernel-trace, serde, serde_json, serde_yaml
// ============================================================================

//! ## Overview
//! Runbook Kernel Core interprets declarative YAML runbooks: a strict
//! loader, a three-phase validator, a template evaluator, backend-agnostic
//! ports, and the step interpreter with branching, parallel fan-out,
//! for-each expansion, bounded jumps, scope visibility, and governance.
//! Invariants:
//! - Runbooks are immutable after load; the engine mutates only its own
//!   run state.
//! - Every reachable path of a valid runbook terminates at an end step.
//! - Concurrent branches never share a mutable scope; merges are
//!   declaration-order deterministic.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod interfaces;
pub mod loader;
pub mod resolve;
pub mod runtime;
pub mod schema;
pub mod scope;
pub mod template;
pub mod validate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use interfaces::ApprovalPort;
pub use interfaces::ApprovalRequest;
pub use interfaces::ApprovalResponse;
pub use interfaces::ApprovalTicket;
pub use interfaces::AutoApprove;
pub use interfaces::CancelToken;
pub use interfaces::EvidenceCollector;
pub use interfaces::ExecutorError;
pub use interfaces::ExecutorResponse;
pub use interfaces::ExtensionRunner;
pub use interfaces::InputResolver;
pub use interfaces::NoEvidence;
pub use interfaces::ToolExecutor;
pub use loader::LoadError;
pub use loader::load_runbook;
pub use loader::load_runbook_str;
pub use loader::load_tool_definition;
pub use loader::load_tool_definition_str;
pub use runtime::Engine;
pub use runtime::EngineError;
pub use runtime::EnginePorts;
pub use runtime::FailureKind;
pub use runtime::RunMode;
pub use runtime::RunOutcome;
pub use runtime::RunResult;
pub use runtime::RunSnapshot;
pub use runtime::RunStatus;
pub use schema::KERNEL_API_VERSION;
pub use schema::Runbook;
pub use schema::Step;
pub use schema::StepType;
pub use scope::Scope;
pub use template::TemplateError;
pub use template::eval_bool;
pub use template::expand;
pub use validate::Severity;
pub use validate::ValidationIssue;
pub use validate::ValidationPhase;
pub use validate::has_errors;
pub use validate::validate;
pub use validate::validate_source;
