// crates/runbook-kernel-core/src/schema.rs
// ============================================================================
// Module: Runbook Schema
// Description: Typed runbook documents, steps, branches, and outcomes.
// Purpose: Provide the strict wire shapes the loader decodes and the engine
//          interprets.
// Dependencies: runbook-kernel-contract, serde, serde_json
// ============================================================================

//! ## Overview
//! A runbook (`api_version: kernel/v0`) is an immutable document: metadata,
//! the ordered tool allowlist, and the step graph. Steps are one flat record
//! with a `type` discriminant over seven kinds; unknown fields are rejected
//! at decode, while which fields a given type requires is enforced by the
//! validator. The graph is a tree of owned records; nested branch steps hold
//! their own step lists and there are no parent pointers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use runbook_kernel_contract::Contract;
use runbook_kernel_contract::GovernancePolicy;
use runbook_kernel_contract::ParamDef;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Required `api_version` for runbook documents.
pub const KERNEL_API_VERSION: &str = "kernel/v0";

// ============================================================================
// SECTION: Runbook
// ============================================================================

/// Complete runbook document.
///
/// # Invariants
/// - Immutable after load; the engine never mutates the document.
/// - `api_version` equals [`KERNEL_API_VERSION`] for valid documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Runbook {
    /// Document API version; must equal `kernel/v0`.
    pub api_version: String,
    /// Runbook metadata.
    pub meta: Meta,
    /// Ordered list of tool names the runbook may invoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Ordered step sequence.
    pub steps: Vec<Step>,
    /// Arbitrary extension mapping kept for forward compatibility.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
}

/// Runbook metadata block.
///
/// # Invariants
/// - `constants` are immutable at runtime; nothing may shadow them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Meta {
    /// Runbook name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Declared inputs keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, ParamDef>,
    /// Immutable constants keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, Value>,
    /// Optional governance policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernancePolicy>,
}

// ============================================================================
// SECTION: Step Types
// ============================================================================

/// Step kind discriminant.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Invoke a declared tool action.
    Tool,
    /// Manual intervention with evidence collection.
    Manual,
    /// Assertion over scope values.
    Assert,
    /// Conditional branch; first matching arm wins.
    Branch,
    /// Parallel fan-out over branch arms.
    Parallel,
    /// Terminal outcome.
    End,
    /// External extension runner.
    Extension,
}

impl StepType {
    /// Returns the stable wire label for the step type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Manual => "manual",
            Self::Assert => "assert",
            Self::Branch => "branch",
            Self::Parallel => "parallel",
            Self::End => "end",
            Self::Extension => "extension",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Step Modifiers
// ============================================================================

/// Bound for a backward `next` jump.
///
/// # Invariants
/// - A template bound is resolved at runtime; validation treats it as
///   bounded with max 1 and warns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextMax {
    /// Literal iteration bound.
    Count(u64),
    /// Template expression resolved at runtime.
    Template(String),
}

/// Jump directive attached to a step.
///
/// # Invariants
/// - Targets are scope-local: only step identifiers in the same branch list
///   may be jumped to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextSpec {
    /// Bounded jump record.
    Bounded {
        /// Target step identifier.
        step: String,
        /// Optional iteration bound, required for backward jumps.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<NextMax>,
    },
    /// Bare target step identifier.
    Target(String),
}

impl NextSpec {
    /// Returns the jump target identifier.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Target(step) | Self::Bounded { step, .. } => step,
        }
    }

    /// Returns the declared bound, when present.
    #[must_use]
    pub const fn max(&self) -> Option<&NextMax> {
        match self {
            Self::Target(_) => None,
            Self::Bounded { max, .. } => max.as_ref(),
        }
    }
}

/// For-each expansion modifier.
///
/// # Invariants
/// - `over` and `bind` are both required for a valid modifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForEach {
    /// List source: a direct variable reference or a comma-joined template.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub over: String,
    /// Iteration variable name.
    #[serde(rename = "as", default, skip_serializing_if = "String::is_empty")]
    pub bind: String,
    /// Run iterations concurrently with forked scopes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parallel: bool,
    /// Optional key template producing a map-valued accumulator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Visibility globs over dot-paths.
///
/// # Invariants
/// - Deny overrides allow; an empty allow list permits everything not
///   denied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Visibility {
    /// Allow globs; empty means allow everything not denied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,
    /// Deny globs; always override allow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

/// Bounded repeat modifier.
///
/// # Invariants
/// - `max` is at least 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepeatBlock {
    /// Maximum iteration count.
    pub max: u64,
    /// Optional stop condition evaluated at the top of each iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
}

// ============================================================================
// SECTION: Step Payloads
// ============================================================================

/// Assertion comparison kind.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    /// Values must be equal after template expansion.
    Equals,
    /// Values must differ after template expansion.
    NotEquals,
    /// Actual value must contain the expected substring.
    Contains,
    /// Actual value must match the regex pattern.
    Matches,
}

impl AssertionKind {
    /// Returns the stable wire label for the assertion kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::Matches => "matches",
        }
    }
}

/// Single assertion within an assert step.
///
/// # Invariants
/// - `expected` applies to equals/not-equals/contains; `pattern` applies to
///   matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Assertion {
    /// Comparison kind.
    pub kind: AssertionKind,
    /// Template producing the actual value.
    pub value: String,
    /// Template producing the expected value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Regex pattern for `matches` assertions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Evidence item kind for manual steps.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// Free-form text evidence.
    Text,
    /// Checklist evidence with per-item confirmation.
    Checklist,
    /// Attachment reference evidence.
    Attachment,
}

/// Declared evidence requirement on a manual step.
///
/// # Invariants
/// - `items` is meaningful only for checklist evidence and must then be
///   non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequiredEvidence {
    /// Evidence kind.
    pub kind: EvidenceKind,
    /// Evidence name, unique within the step.
    pub name: String,
    /// Checklist items.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
}

/// Branch arm with a guard condition and nested steps.
///
/// # Invariants
/// - The literal condition `default` always matches; in branch steps the
///   first matching arm wins, in parallel steps all arms run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Branch {
    /// Guard condition template; empty or `default` always matches.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
    /// Human-readable arm label.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    /// Nested step list.
    pub steps: Vec<Step>,
}

/// Terminal outcome declared on an end step.
///
/// # Invariants
/// - `category` is one of resolved / escalated / no_action / needs_rca for
///   valid documents (checked by the validator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Outcome {
    /// Outcome category.
    pub category: String,
    /// Machine-readable outcome code.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    /// Templated outcome metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

/// Valid outcome categories.
pub const OUTCOME_CATEGORIES: &[&str] = &["resolved", "escalated", "no_action", "needs_rca"];

// ============================================================================
// SECTION: Step
// ============================================================================

/// Single runbook step.
///
/// # Invariants
/// - `step_type` decides which per-variant fields are meaningful; the
///   validator enforces the combinations.
/// - `id` is globally unique across the entire step graph when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Step kind.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Optional globally-unique step identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Guard condition; a false result skips the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Jump directive applied after a successful step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextSpec>,
    /// Continue executing after a step failure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_fail: bool,
    /// For-each expansion modifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each: Option<ForEach>,
    /// Inline contract override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<Contract>,
    /// Named sub-scope pushed for the step (dot-separated path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Names lifted out of the sub-scope into the parent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export: Vec<String>,
    /// Visibility globs applied to the step's new bindings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Bounded repeat modifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatBlock>,
    /// Tool name (tool steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Tool action name (tool steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Templated literal inputs (tool steps); overlay `inputs_from`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Value>,
    /// Map-valued variable names spread into inputs (tool steps).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs_from: Vec<String>,
    /// Operator instructions template (manual steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Declared evidence requirements (manual steps).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_evidence: Vec<RequiredEvidence>,
    /// Assertions (assert steps).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assert: Vec<Assertion>,
    /// Branch arms (branch and parallel steps).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<Branch>,
    /// Terminal outcome (end steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Extension runner name (extension steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl Step {
    /// Returns the step identifier or a positional fallback label.
    #[must_use]
    pub fn display_id(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| format!("step[{index}]"))
    }
}
