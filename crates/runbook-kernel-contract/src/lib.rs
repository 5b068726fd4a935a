// crates/runbook-kernel-contract/src/lib.rs
// ============================================================================
// Module: Runbook Kernel Contract Library
// Description: Contract algebra, tool definitions, and governance policy.
// Purpose: Provide the pure behavioural-contract layer that drives
//          governance decisions and parallel-safety checks.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Runbook Kernel Contract defines the behavioural contract model: tri-state
//! attributes, risk derivation, inheritance merge, tightening validation, and
//! read/write conflict detection, plus the tool definition documents and the
//! governance policy rule matcher built on top of contracts.
//! Invariants:
//! - Contract operations are pure; nothing here performs I/O.
//! - Tightening never lowers derived risk: a child accepted by
//!   [`Contract::can_tighten`] merges to a risk at or above the parent's.
//! - Conflict detection is symmetric.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod contract;
pub mod policy;
pub mod tool;
pub mod tristate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use contract::Contract;
pub use contract::ParamDef;
pub use contract::RiskLevel;
pub use contract::assert_contract;
pub use contract::manual_defaults;
pub use policy::ContractPattern;
pub use policy::GovernanceAction;
pub use policy::GovernanceDecision;
pub use policy::GovernancePolicy;
pub use policy::GovernanceRule;
pub use policy::evaluate_policy;
pub use tool::ExtractRule;
pub use tool::ExtractSource;
pub use tool::TOOL_API_VERSION;
pub use tool::ToolAction;
pub use tool::ToolDefinition;
pub use tool::ToolDefinitionError;
pub use tool::ToolMeta;
pub use tool::Transport;
pub use tristate::TriBool;
