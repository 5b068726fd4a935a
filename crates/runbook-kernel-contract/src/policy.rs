// crates/runbook-kernel-contract/src/policy.rs
// ============================================================================
// Module: Governance Policy
// Description: Policy rules and the governance rule matcher.
// Purpose: Decide allow / require-approval / deny for a resolved contract.
// Dependencies: crate::contract, serde
// ============================================================================

//! ## Overview
//! A governance policy is an ordered rule list. Each rule matches a resolved
//! contract by risk level, effect tags, writes/reads tag patterns, or as a
//! default catch-all, and yields one of three actions. The first matching
//! rule wins; an absent or ruleless policy allows everything. When callers
//! stack decisions, the most restrictive action prevails.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::contract::Contract;
use crate::contract::RiskLevel;

// ============================================================================
// SECTION: Actions
// ============================================================================

/// Governance action chosen by a matched rule.
///
/// # Invariants
/// - Variant order defines restrictiveness: allow < require-approval < deny.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum GovernanceAction {
    /// Step may proceed.
    Allow,
    /// Step requires approval before proceeding.
    RequireApproval,
    /// Step must not run.
    Deny,
}

impl GovernanceAction {
    /// Returns the stable wire label for the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::RequireApproval => "require-approval",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for GovernanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Policy Rules
// ============================================================================

/// Contract tag pattern matched against a resolved contract.
///
/// # Invariants
/// - Empty sets never match; a clause must name at least one tag to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractPattern {
    /// Write tags; matches when intersecting the contract's writes.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub writes: BTreeSet<String>,
    /// Read tags; matches when intersecting the contract's reads.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub reads: BTreeSet<String>,
}

/// Single governance rule.
///
/// # Invariants
/// - Exactly one of `action` / `default` is set (checked by the validator's
///   semantic phase, not by decode).
/// - A `default` rule matches every contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernanceRule {
    /// Risk level clause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    /// Effect tag clause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<BTreeSet<String>>,
    /// Contract writes/reads tag clause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<ContractPattern>,
    /// Action taken when the rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<GovernanceAction>,
    /// Catch-all action; a rule written as `default: allow`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<GovernanceAction>,
    /// Minimum number of approvers for require-approval decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_approvers: Option<u32>,
}

impl GovernanceRule {
    /// Returns the effective action of the rule.
    #[must_use]
    pub fn effective_action(&self) -> GovernanceAction {
        self.action.or(self.default).unwrap_or(GovernanceAction::Allow)
    }

    /// Returns true when the rule matches the resolved contract.
    #[must_use]
    pub fn matches(&self, contract: &Contract) -> bool {
        if self.default.is_some() {
            return true;
        }
        if let Some(risk) = self.risk
            && risk == contract.risk()
        {
            return true;
        }
        if let Some(effects) = &self.effects
            && !effects.is_disjoint(&contract.effects)
        {
            // A rule that also constrains writes must intersect both.
            match &self.contract {
                Some(pattern) if !pattern.writes.is_empty() => {
                    if !pattern.writes.is_disjoint(&contract.writes) {
                        return true;
                    }
                }
                _ => return true,
            }
        }
        if let Some(pattern) = &self.contract
            && self.effects.is_none()
        {
            if !pattern.writes.is_empty() && !pattern.writes.is_disjoint(&contract.writes) {
                return true;
            }
            if !pattern.reads.is_empty() && !pattern.reads.is_disjoint(&contract.reads) {
                return true;
            }
        }
        false
    }

    /// Returns a human-readable summary of the rule for decision records.
    #[must_use]
    pub fn summary(&self) -> String {
        if let Some(action) = self.default {
            return format!("default -> {action}");
        }
        let mut clauses = Vec::new();
        if let Some(risk) = self.risk {
            clauses.push(format!("risk={risk}"));
        }
        if let Some(effects) = &self.effects {
            let tags: Vec<&str> = effects.iter().map(String::as_str).collect();
            clauses.push(format!("effects={}", tags.join(",")));
        }
        if let Some(pattern) = &self.contract {
            if !pattern.writes.is_empty() {
                let tags: Vec<&str> = pattern.writes.iter().map(String::as_str).collect();
                clauses.push(format!("writes={}", tags.join(",")));
            }
            if !pattern.reads.is_empty() {
                let tags: Vec<&str> = pattern.reads.iter().map(String::as_str).collect();
                clauses.push(format!("reads={}", tags.join(",")));
            }
        }
        format!("{} -> {}", clauses.join(" "), self.effective_action())
    }
}

/// Ordered governance policy.
///
/// # Invariants
/// - Rule order is significant: the first matching rule wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernancePolicy {
    /// Ordered rule list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<GovernanceRule>,
}

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Governance decision for a single step.
///
/// # Invariants
/// - `min_approvers` is at least 1 for require-approval decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceDecision {
    /// Action to take.
    pub action: GovernanceAction,
    /// Risk level the decision was derived from.
    pub risk_level: RiskLevel,
    /// Minimum approver count for require-approval decisions.
    pub min_approvers: u32,
    /// Human-readable summary of the matched rule.
    pub matched_rule: String,
}

impl GovernanceDecision {
    /// Combines two decisions, keeping the most restrictive action.
    ///
    /// Deny beats require-approval, which beats allow. The higher approver
    /// requirement and risk level are kept.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        let keep_self = self.action >= other.action;
        Self {
            action: self.action.max(other.action),
            risk_level: self.risk_level.max(other.risk_level),
            min_approvers: self.min_approvers.max(other.min_approvers),
            matched_rule: if keep_self { self.matched_rule } else { other.matched_rule },
        }
    }
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluates a governance policy against a resolved contract.
///
/// An absent or ruleless policy allows everything. Otherwise, the first
/// matching rule wins; a contract no rule matches is allowed.
#[must_use]
pub fn evaluate_policy(
    policy: Option<&GovernancePolicy>,
    contract: &Contract,
) -> GovernanceDecision {
    let resolved = contract.resolved();
    let risk_level = resolved.risk();
    let Some(policy) = policy else {
        return GovernanceDecision {
            action: GovernanceAction::Allow,
            risk_level,
            min_approvers: 0,
            matched_rule: "no policy".to_string(),
        };
    };
    for rule in &policy.rules {
        if rule.matches(&resolved) {
            let action = rule.effective_action();
            let min_approvers = match action {
                GovernanceAction::RequireApproval => rule.min_approvers.unwrap_or(1).max(1),
                GovernanceAction::Allow | GovernanceAction::Deny => {
                    rule.min_approvers.unwrap_or(0)
                }
            };
            return GovernanceDecision {
                action,
                risk_level,
                min_approvers,
                matched_rule: rule.summary(),
            };
        }
    }
    GovernanceDecision {
        action: GovernanceAction::Allow,
        risk_level,
        min_approvers: 0,
        matched_rule: "no matching rule".to_string(),
    }
}
