// crates/runbook-kernel-contract/src/contract.rs
// ============================================================================
// Module: Contract Algebra
// Description: Behavioural contracts, risk derivation, merge, and tightening.
// Purpose: Provide the pure contract operations that drive governance and
//          parallel-safety decisions.
// Dependencies: crate::tristate, serde, serde_json
// ============================================================================

//! ## Overview
//! A contract is the declared behavioural promise of a step or tool action:
//! tri-state `side_effects` / `deterministic` / `idempotent` attributes,
//! `reads` / `writes` tag sets, an `effects` tag set, and declared parameter
//! shapes. All operations here are pure functions over contract records.
//!
//! Resolution fills defaults (side effects on, non-deterministic,
//! non-idempotent). Merging lets a child override explicitly-set attributes
//! while tag sets grow by union, so tags are added and never removed by
//! construction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::tristate::TriBool;

// ============================================================================
// SECTION: Parameter Definitions
// ============================================================================

/// Declared parameter shape for contract inputs and outputs.
///
/// # Invariants
/// - `param_type` is an informal type label; it is not schema-validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamDef {
    /// Informal type label (`string`, `int`, `bool`, `map`, `list`).
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub param_type: String,
    /// Whether the parameter must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Default value used when the parameter is not supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Optional external-resolver binding (`<resolver>:<key>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

// ============================================================================
// SECTION: Risk Levels
// ============================================================================

/// Risk level derived from a resolved contract.
///
/// # Invariants
/// - Variant order defines the risk partial order: low < medium < high <
///   critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// No side effects and no write tags.
    Low,
    /// Side-effecting but idempotent.
    Medium,
    /// Side-effecting, non-idempotent, but deterministic.
    High,
    /// Side-effecting, non-idempotent, non-deterministic.
    Critical,
}

impl RiskLevel {
    /// Returns the stable wire label for the risk level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Contract
// ============================================================================

/// Behavioural contract for a step, tool, or tool action.
///
/// # Invariants
/// - Tag sets are ordered (`BTreeSet`) so derived summaries are
///   deterministic.
/// - `effects` supersedes `side_effects` as a tag-valued form; both are
///   honored by governance matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Contract {
    /// Whether the operation mutates external state.
    #[serde(default, skip_serializing_if = "TriBool::is_unset")]
    pub side_effects: TriBool,
    /// Whether repeated runs with the same inputs produce the same result.
    #[serde(default, skip_serializing_if = "TriBool::is_unset")]
    pub deterministic: TriBool,
    /// Whether repeated runs converge to the same external state.
    #[serde(default, skip_serializing_if = "TriBool::is_unset")]
    pub idempotent: TriBool,
    /// Resource tags the operation reads.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub reads: BTreeSet<String>,
    /// Resource tags the operation writes.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub writes: BTreeSet<String>,
    /// Effect tags (newer tag-valued form of `side_effects`).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub effects: BTreeSet<String>,
    /// Declared input parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, ParamDef>,
    /// Declared output parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, ParamDef>,
}

/// Default for `side_effects` when unset.
const DEFAULT_SIDE_EFFECTS: bool = true;
/// Default for `deterministic` when unset.
const DEFAULT_DETERMINISTIC: bool = false;
/// Default for `idempotent` when unset.
const DEFAULT_IDEMPOTENT: bool = false;

impl Contract {
    /// Returns a copy with every tri-state attribute pinned to its resolved
    /// value.
    ///
    /// Resolution is idempotent: `c.resolved() == c.resolved().resolved()`.
    #[must_use]
    pub fn resolved(&self) -> Self {
        let mut out = self.clone();
        out.side_effects = TriBool::from(self.side_effects.resolve(DEFAULT_SIDE_EFFECTS));
        out.deterministic = TriBool::from(self.deterministic.resolve(DEFAULT_DETERMINISTIC));
        out.idempotent = TriBool::from(self.idempotent.resolve(DEFAULT_IDEMPOTENT));
        out
    }

    /// Returns true when the resolved contract mutates external state.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        self.side_effects.resolve(DEFAULT_SIDE_EFFECTS) || !self.writes.is_empty()
    }

    /// Derives the risk level of the resolved contract.
    #[must_use]
    pub fn risk(&self) -> RiskLevel {
        if !self.has_side_effects() {
            return RiskLevel::Low;
        }
        if self.idempotent.resolve(DEFAULT_IDEMPOTENT) {
            return RiskLevel::Medium;
        }
        if self.deterministic.resolve(DEFAULT_DETERMINISTIC) {
            return RiskLevel::High;
        }
        RiskLevel::Critical
    }

    /// Merges a child contract over this parent.
    ///
    /// Explicitly-set child attributes replace the parent's; `reads`,
    /// `writes`, and `effects` take the union; `inputs` and `outputs` merge
    /// with child precedence per key.
    #[must_use]
    pub fn merge(&self, child: &Self) -> Self {
        let mut out = Self {
            side_effects: self.side_effects.overridden_by(child.side_effects),
            deterministic: self.deterministic.overridden_by(child.deterministic),
            idempotent: self.idempotent.overridden_by(child.idempotent),
            reads: self.reads.union(&child.reads).cloned().collect(),
            writes: self.writes.union(&child.writes).cloned().collect(),
            effects: self.effects.union(&child.effects).cloned().collect(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        };
        for (name, def) in &child.inputs {
            out.inputs.insert(name.clone(), def.clone());
        }
        for (name, def) in &child.outputs {
            out.outputs.insert(name.clone(), def.clone());
        }
        out
    }

    /// Checks whether `child` is a legal tightening of this parent contract.
    ///
    /// Returns human-readable violations; an empty list means the child is
    /// valid. A child may turn `side_effects` on but never off, and may not
    /// flip `deterministic` or `idempotent` away from the parent's resolved
    /// value in either direction. Tag sets are additive by construction in
    /// [`Contract::merge`], so they cannot be relaxed here.
    #[must_use]
    pub fn can_tighten(&self, child: &Self) -> Vec<String> {
        let mut violations = Vec::new();
        let parent = self.resolved();

        if let Some(child_se) = child.side_effects.as_option() {
            let parent_se = parent.side_effects.resolve(DEFAULT_SIDE_EFFECTS);
            if parent_se && !child_se {
                violations
                    .push("cannot relax side_effects from true to false".to_string());
            }
        }
        if let Some(child_det) = child.deterministic.as_option() {
            let parent_det = parent.deterministic.resolve(DEFAULT_DETERMINISTIC);
            if parent_det && !child_det {
                violations
                    .push("cannot relax deterministic from true to false".to_string());
            }
            if !parent_det && child_det {
                violations.push(
                    "cannot claim deterministic when the parent contract is non-deterministic"
                        .to_string(),
                );
            }
        }
        if let Some(child_idem) = child.idempotent.as_option() {
            let parent_idem = parent.idempotent.resolve(DEFAULT_IDEMPOTENT);
            if parent_idem && !child_idem {
                violations.push("cannot relax idempotent from true to false".to_string());
            }
            if !parent_idem && child_idem {
                violations.push(
                    "cannot claim idempotent when the parent contract is non-idempotent"
                        .to_string(),
                );
            }
        }
        violations
    }

    /// Returns true when the two contracts cannot run concurrently.
    ///
    /// Conflict is symmetric: a write in either set intersecting the other's
    /// reads or writes is a conflict.
    #[must_use]
    pub fn has_conflict(&self, other: &Self) -> bool {
        !self.writes.is_disjoint(&other.reads)
            || !self.writes.is_disjoint(&other.writes)
            || !other.writes.is_disjoint(&self.reads)
    }

    /// Returns a compact summary map for trace emission.
    #[must_use]
    pub fn summary(&self) -> serde_json::Map<String, Value> {
        let resolved = self.resolved();
        let mut map = serde_json::Map::new();
        map.insert(
            "side_effects".to_string(),
            Value::Bool(resolved.side_effects.resolve(DEFAULT_SIDE_EFFECTS)),
        );
        map.insert(
            "deterministic".to_string(),
            Value::Bool(resolved.deterministic.resolve(DEFAULT_DETERMINISTIC)),
        );
        map.insert(
            "idempotent".to_string(),
            Value::Bool(resolved.idempotent.resolve(DEFAULT_IDEMPOTENT)),
        );
        map.insert(
            "reads".to_string(),
            Value::Array(self.reads.iter().cloned().map(Value::String).collect()),
        );
        map.insert(
            "writes".to_string(),
            Value::Array(self.writes.iter().cloned().map(Value::String).collect()),
        );
        map.insert(
            "effects".to_string(),
            Value::Array(self.effects.iter().cloned().map(Value::String).collect()),
        );
        map.insert("risk".to_string(), Value::String(resolved.risk().to_string()));
        map
    }
}

// ============================================================================
// SECTION: Fixed Contracts
// ============================================================================

/// Fixed contract for assertion steps: pure, deterministic, idempotent.
#[must_use]
pub fn assert_contract() -> Contract {
    Contract {
        side_effects: TriBool::False,
        deterministic: TriBool::True,
        idempotent: TriBool::True,
        ..Contract::default()
    }
}

/// Default contract for manual steps: side-effecting, non-deterministic,
/// non-idempotent.
#[must_use]
pub fn manual_defaults() -> Contract {
    Contract {
        side_effects: TriBool::True,
        deterministic: TriBool::False,
        idempotent: TriBool::False,
        ..Contract::default()
    }
}
