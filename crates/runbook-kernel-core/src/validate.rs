// crates/runbook-kernel-core/src/validate.rs
// ============================================================================
// Module: Runbook Validator
// Description: Three-phase validation (structural, semantic, domain).
// Purpose: Reject unsound step graphs before execution with addressed,
//          severity-tagged issues.
// Dependencies: crate::loader, crate::schema, crate::template,
// runbook-kernel-contract
// ============================================================================

//! ## Overview
//! Validation runs in three phases and aborts at the end of any phase that
//! produced an error. Phase one is the strict YAML decode. Phase two checks
//! required top-level fields and governance rule shape. Phase three runs the
//! domain rules: identifier uniqueness, end reachability, scope-local jumps,
//! bounded backward jumps, template-reference resolution, constant
//! non-shadowing, parallel output uniqueness and conflict detection,
//! contract tightening, and the per-type field requirements.
//!
//! Validation is pure and idempotent: the same document yields the same
//! issue list on every run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use runbook_kernel_contract::Contract;
use runbook_kernel_contract::ToolDefinition;
use serde_json::Value;

use crate::loader::load_runbook_str;
use crate::resolve::aggregate_contract;
use crate::schema::AssertionKind;
use crate::schema::EvidenceKind;
use crate::schema::KERNEL_API_VERSION;
use crate::schema::NextMax;
use crate::schema::OUTCOME_CATEGORIES;
use crate::schema::Runbook;
use crate::schema::Step;
use crate::schema::StepType;
use crate::template::collect_references;

// ============================================================================
// SECTION: Issue Records
// ============================================================================

/// Validation phase an issue was produced by.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPhase {
    /// Strict decode of the document.
    Structural,
    /// Required fields and governance rule shape.
    Semantic,
    /// Graph soundness and contract rules.
    Domain,
}

/// Issue severity.
///
/// # Invariants
/// - Warnings never halt execution; errors abort before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocking issue.
    Error,
    /// Non-blocking advisory.
    Warning,
}

/// Single validation issue with a JSON-path-like location.
///
/// # Invariants
/// - `path` addresses the offending node from the document root.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationIssue {
    /// Producing phase.
    pub phase: ValidationPhase,
    /// JSON-path-like location.
    pub path: String,
    /// Human-readable message.
    pub message: String,
    /// Issue severity.
    pub severity: Severity,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "[{severity}] {path}: {message}", path = self.path, message = self.message)
    }
}

/// Returns true when any issue is an error.
#[must_use]
pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|issue| issue.severity == Severity::Error)
}

// ============================================================================
// SECTION: Entry Points
// ============================================================================

/// Validates YAML source, running the structural phase via strict decode.
///
/// Returns the decoded runbook when phase one passed, plus all issues.
#[must_use]
pub fn validate_source(
    yaml: &str,
    tools: &BTreeMap<String, ToolDefinition>,
) -> (Option<Runbook>, Vec<ValidationIssue>) {
    match load_runbook_str(yaml) {
        Ok(runbook) => {
            let issues = validate(&runbook, tools);
            (Some(runbook), issues)
        }
        Err(err) => (
            None,
            vec![ValidationIssue {
                phase: ValidationPhase::Structural,
                path: "$".to_string(),
                message: err.to_string(),
                severity: Severity::Error,
            }],
        ),
    }
}

/// Validates a decoded runbook (semantic and domain phases).
///
/// The domain phase is skipped when the semantic phase produced errors.
#[must_use]
pub fn validate(
    runbook: &Runbook,
    tools: &BTreeMap<String, ToolDefinition>,
) -> Vec<ValidationIssue> {
    let mut checker = Checker {
        runbook,
        tools,
        issues: Vec::new(),
    };
    checker.semantic_phase();
    if has_errors(&checker.issues) {
        return checker.issues;
    }
    checker.domain_phase();
    checker.issues
}

// ============================================================================
// SECTION: Checker State
// ============================================================================

/// Validator state shared across rules.
struct Checker<'a> {
    /// Document under validation.
    runbook: &'a Runbook,
    /// Loaded tool definitions keyed by tool name.
    tools: &'a BTreeMap<String, ToolDefinition>,
    /// Accumulated issues.
    issues: Vec<ValidationIssue>,
}

impl Checker<'_> {
    /// Records an error at a path.
    fn error(&mut self, phase: ValidationPhase, path: String, message: String) {
        self.issues.push(ValidationIssue {
            phase,
            path,
            message,
            severity: Severity::Error,
        });
    }

    /// Records a warning at a path.
    fn warn(&mut self, phase: ValidationPhase, path: String, message: String) {
        self.issues.push(ValidationIssue {
            phase,
            path,
            message,
            severity: Severity::Warning,
        });
    }

    // ========================================================================
    // SECTION: Semantic Phase
    // ========================================================================

    /// Checks required top-level fields and governance rule shape.
    fn semantic_phase(&mut self) {
        if self.runbook.meta.name.trim().is_empty() {
            self.error(
                ValidationPhase::Semantic,
                "meta.name".to_string(),
                "runbook name is required".to_string(),
            );
        }
        if self.runbook.steps.is_empty() {
            self.error(
                ValidationPhase::Semantic,
                "steps".to_string(),
                "runbook must declare at least one step".to_string(),
            );
        }
        if let Some(policy) = &self.runbook.meta.governance {
            for (index, rule) in policy.rules.iter().enumerate() {
                let path = format!("meta.governance.rules[{index}]");
                match (rule.action.is_some(), rule.default.is_some()) {
                    (true, true) => self.error(
                        ValidationPhase::Semantic,
                        path,
                        "rule must set exactly one of 'action' and 'default'".to_string(),
                    ),
                    (false, false) => self.error(
                        ValidationPhase::Semantic,
                        path,
                        "rule must set one of 'action' or 'default'".to_string(),
                    ),
                    _ => {
                        if rule.action.is_some()
                            && rule.risk.is_none()
                            && rule.effects.is_none()
                            && rule.contract.is_none()
                        {
                            self.warn(
                                ValidationPhase::Semantic,
                                path,
                                "rule has an action but no match clause; it never matches"
                                    .to_string(),
                            );
                        }
                    }
                }
            }
        }
    }

    // ========================================================================
    // SECTION: Domain Phase
    // ========================================================================

    /// Runs the domain rules over the step graph.
    ///
    /// Step-type membership and enum validity are enforced by the strict
    /// decode; the remaining rules walk the graph below.
    fn domain_phase(&mut self) {
        self.rule_api_version();
        self.rule_global_id_uniqueness();
        self.rule_end_reachability();

        let mut symbols: BTreeSet<String> = BTreeSet::new();
        symbols.extend(self.runbook.meta.inputs.keys().cloned());
        symbols.extend(self.runbook.meta.constants.keys().cloned());
        let runbook = self.runbook;
        self.walk_list(&runbook.steps, "steps", &mut symbols);
    }

    /// Rule: `api_version` must equal the kernel version.
    fn rule_api_version(&mut self) {
        if self.runbook.api_version != KERNEL_API_VERSION {
            self.error(
                ValidationPhase::Domain,
                "api_version".to_string(),
                format!(
                    "api_version must be '{KERNEL_API_VERSION}', got '{actual}'",
                    actual = self.runbook.api_version
                ),
            );
        }
    }

    /// Rule: step identifiers are globally unique across the whole graph.
    fn rule_global_id_uniqueness(&mut self) {
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        let mut duplicates = Vec::new();
        collect_ids(&self.runbook.steps, "steps", &mut seen, &mut duplicates);
        for (path, id, first_path) in duplicates {
            self.error(
                ValidationPhase::Domain,
                path,
                format!("duplicate step id '{id}' (first declared at {first_path})"),
            );
        }
    }

    /// Rule: every reachable path terminates at an end step.
    fn rule_end_reachability(&mut self) {
        if !self.runbook.steps.is_empty() && !list_reaches_end(&self.runbook.steps) {
            self.error(
                ValidationPhase::Domain,
                "steps".to_string(),
                "no path through the runbook reaches an end step".to_string(),
            );
        }
    }

    /// Walks one step list, applying the per-step and per-list rules.
    ///
    /// `symbols` holds the resolvable reference roots at this point. Branch
    /// arms fork the symbol set; new names from arms merge back afterwards,
    /// mirroring the runtime scope merge.
    fn walk_list(&mut self, steps: &[Step], path: &str, symbols: &mut BTreeSet<String>) {
        let ids: BTreeMap<&str, usize> = steps
            .iter()
            .enumerate()
            .filter_map(|(index, step)| step.id.as_deref().map(|id| (id, index)))
            .collect();

        for (index, step) in steps.iter().enumerate() {
            let step_path = format!("{path}[{index}]");
            self.check_step_fields(step, &step_path);
            self.check_next(step, index, &ids, &step_path);
            self.check_references(step, symbols, &step_path);
            self.check_shadowing(step, &step_path);
            self.check_inputs_from(step, symbols, &step_path);

            match step.step_type {
                StepType::Branch => {
                    self.check_branch_arms(step, symbols, &step_path);
                }
                StepType::Parallel => {
                    self.check_branch_arms(step, symbols, &step_path);
                    self.rule_parallel_output_uniqueness(step, &step_path);
                    self.rule_parallel_conflicts(step, &step_path);
                }
                _ => {}
            }

            declare_step_symbols(step, self.tools, symbols);
        }
    }

    /// Recurses into branch arms with forked symbol sets.
    fn check_branch_arms(&mut self, step: &Step, symbols: &mut BTreeSet<String>, path: &str) {
        let mut merged: BTreeSet<String> = BTreeSet::new();
        for (arm_index, arm) in step.branches.iter().enumerate() {
            let arm_path = format!("{path}.branches[{arm_index}]");
            if !arm.condition.is_empty() && arm.condition != "default" {
                self.check_template_refs(&arm.condition, symbols, &format!("{arm_path}.condition"));
            }
            let mut forked = symbols.clone();
            self.walk_list(&arm.steps, &format!("{arm_path}.steps"), &mut forked);
            merged.extend(forked.difference(symbols).cloned());
        }
        symbols.extend(merged);
    }

    /// Rule: per-type required fields.
    fn check_step_fields(&mut self, step: &Step, path: &str) {
        let missing: &[&str] = match step.step_type {
            StepType::Tool => {
                let mut missing = Vec::new();
                if step.tool.is_none() {
                    missing.push("tool");
                }
                if step.action.is_none() {
                    missing.push("action");
                }
                for field in missing {
                    self.error(
                        ValidationPhase::Domain,
                        path.to_string(),
                        format!("tool step requires '{field}'"),
                    );
                }
                self.check_tool_step(step, path);
                &[]
            }
            StepType::Manual => {
                self.rule_evidence(step, path);
                if step.instructions.is_none() { &["instructions"] } else { &[] }
            }
            StepType::Assert => {
                self.rule_assertions(step, path);
                &[]
            }
            StepType::Branch | StepType::Parallel => {
                self.rule_branch_shape(step, path);
                &[]
            }
            StepType::End => {
                self.rule_outcome(step, path);
                &[]
            }
            StepType::Extension => {
                if step.extension.is_none() {
                    self.error(
                        ValidationPhase::Domain,
                        path.to_string(),
                        "extension step requires 'extension'".to_string(),
                    );
                }
                if step.contract.is_none() {
                    self.error(
                        ValidationPhase::Domain,
                        path.to_string(),
                        "extension step requires an inline 'contract'".to_string(),
                    );
                }
                &[]
            }
        };
        for field in missing {
            self.error(
                ValidationPhase::Domain,
                path.to_string(),
                format!("{kind} step requires '{field}'", kind = step.step_type),
            );
        }
        if let Some(for_each) = &step.for_each
            && (for_each.over.is_empty() || for_each.bind.is_empty())
        {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.for_each"),
                "for_each requires both 'as' and 'over'".to_string(),
            );
        }
        if let Some(repeat) = &step.repeat
            && repeat.max == 0
        {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.repeat"),
                "repeat.max must be at least 1".to_string(),
            );
        }
    }

    /// Rules specific to tool steps: allowlist membership, tightening, and
    /// platform constraints.
    fn check_tool_step(&mut self, step: &Step, path: &str) {
        let Some(tool_name) = step.tool.as_deref() else {
            return;
        };
        if !self.runbook.tools.iter().any(|name| name == tool_name) {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.tool"),
                format!("tool '{tool_name}' is not declared in tools"),
            );
        }
        let Some(definition) = self.tools.get(tool_name) else {
            return;
        };
        if let Some(action_name) = step.action.as_deref()
            && !definition.actions.contains_key(action_name)
        {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.action"),
                format!("tool '{tool_name}' has no action '{action_name}'"),
            );
        }
        if let Some(override_contract) = &step.contract {
            let base = step
                .action
                .as_deref()
                .map_or_else(|| definition.contract.clone(), |a| definition.action_contract(a));
            for violation in base.can_tighten(override_contract) {
                self.error(
                    ValidationPhase::Domain,
                    format!("{path}.contract"),
                    violation,
                );
            }
        }
        if !definition.meta.platform.is_empty() {
            let host = std::env::consts::OS;
            if !definition.meta.platform.iter().any(|os| os == host) {
                self.warn(
                    ValidationPhase::Domain,
                    format!("{path}.tool"),
                    format!("tool '{tool_name}' does not declare support for host os '{host}'"),
                );
            }
        }
    }

    /// Rule: `next` targets are scope-local and backward jumps are bounded.
    fn check_next(
        &mut self,
        step: &Step,
        index: usize,
        ids: &BTreeMap<&str, usize>,
        path: &str,
    ) {
        let Some(next) = &step.next else {
            return;
        };
        let target = next.target();
        let Some(&target_index) = ids.get(target) else {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.next"),
                format!("next target '{target}' is not a step id in the same scope"),
            );
            return;
        };
        if target_index <= index {
            match next.max() {
                None => self.error(
                    ValidationPhase::Domain,
                    format!("{path}.next"),
                    format!("backward jump to '{target}' requires a 'max' bound"),
                ),
                Some(NextMax::Template(_)) => self.warn(
                    ValidationPhase::Domain,
                    format!("{path}.next"),
                    format!(
                        "backward jump to '{target}' has a templated 'max'; treated as 1 \
                         during validation"
                    ),
                ),
                Some(NextMax::Count(_)) => {}
            }
        }
    }

    /// Rule: every template reference resolves to a known name.
    fn check_references(&mut self, step: &Step, symbols: &BTreeSet<String>, path: &str) {
        let mut local = symbols.clone();
        if let Some(for_each) = &step.for_each
            && !for_each.bind.is_empty()
        {
            local.insert(for_each.bind.clone());
        }
        if step.repeat.is_some() {
            local.insert("repeat".to_string());
        }

        if let Some(when) = &step.when {
            self.check_template_refs(when, &local, &format!("{path}.when"));
        }
        if let Some(for_each) = &step.for_each {
            self.check_template_refs(&for_each.over, symbols, &format!("{path}.for_each.over"));
            if let Some(key) = &for_each.key {
                self.check_template_refs(key, &local, &format!("{path}.for_each.key"));
            }
        }
        if let Some(repeat) = &step.repeat
            && let Some(until) = &repeat.until
        {
            self.check_template_refs(until, &local, &format!("{path}.repeat.until"));
        }
        if let Some(NextMax::Template(template)) = step.next.as_ref().and_then(|n| n.max()) {
            self.check_template_refs(template, &local, &format!("{path}.next.max"));
        }
        for (name, value) in &step.inputs {
            self.check_value_refs(value, &local, &format!("{path}.inputs.{name}"));
        }
        if let Some(instructions) = &step.instructions {
            self.check_template_refs(instructions, &local, &format!("{path}.instructions"));
        }
        for (idx, assertion) in step.assert.iter().enumerate() {
            let base = format!("{path}.assert[{idx}]");
            self.check_template_refs(&assertion.value, &local, &format!("{base}.value"));
            if let Some(expected) = &assertion.expected {
                self.check_template_refs(expected, &local, &format!("{base}.expected"));
            }
            if let Some(pattern) = &assertion.pattern {
                self.check_template_refs(pattern, &local, &format!("{base}.pattern"));
            }
        }
        if let Some(outcome) = &step.outcome {
            for (name, value) in &outcome.meta {
                self.check_value_refs(value, &local, &format!("{path}.outcome.meta.{name}"));
            }
        }
    }

    /// Checks references of all string leaves of a value.
    fn check_value_refs(&mut self, value: &Value, symbols: &BTreeSet<String>, path: &str) {
        match value {
            Value::String(template) => self.check_template_refs(template, symbols, path),
            Value::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    self.check_value_refs(item, symbols, &format!("{path}[{idx}]"));
                }
            }
            Value::Object(map) => {
                for (key, item) in map {
                    self.check_value_refs(item, symbols, &format!("{path}.{key}"));
                }
            }
            _ => {}
        }
    }

    /// Checks one template's reference roots against the symbol set.
    fn check_template_refs(&mut self, template: &str, symbols: &BTreeSet<String>, path: &str) {
        for reference in collect_references(template) {
            let root = reference.split('.').next().unwrap_or(&reference);
            if !symbols.contains(root) {
                self.error(
                    ValidationPhase::Domain,
                    path.to_string(),
                    format!("unresolved reference '.{reference}'"),
                );
            }
        }
    }

    /// Rule: nothing may shadow a declared constant.
    fn check_shadowing(&mut self, step: &Step, path: &str) {
        let constants = &self.runbook.meta.constants;
        if let Some(id) = &step.id
            && constants.contains_key(id)
        {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.id"),
                format!("step id '{id}' shadows a constant"),
            );
        }
        for name in step.export.iter().filter(|name| constants.contains_key(*name)) {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.export"),
                format!("exported name '{name}' shadows a constant"),
            );
        }
        for name in step
            .contract
            .iter()
            .flat_map(|contract| contract.outputs.keys())
            .filter(|name| constants.contains_key(*name))
        {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.contract.outputs"),
                format!("contract output '{name}' shadows a constant"),
            );
        }
    }

    /// Rule: `inputs_from` sources are object-valued and resolvable.
    fn check_inputs_from(&mut self, step: &Step, symbols: &BTreeSet<String>, path: &str) {
        for name in &step.inputs_from {
            if let Some(constant) = self.runbook.meta.constants.get(name) {
                if !constant.is_object() {
                    self.error(
                        ValidationPhase::Domain,
                        format!("{path}.inputs_from"),
                        format!("inputs_from source '{name}' must be an object-valued constant"),
                    );
                }
            } else if !symbols.contains(name) {
                self.error(
                    ValidationPhase::Domain,
                    format!("{path}.inputs_from"),
                    format!("inputs_from source '{name}' is not a known variable"),
                );
            }
        }
    }

    /// Rule: parallel sibling branches declare disjoint output names.
    fn rule_parallel_output_uniqueness(&mut self, step: &Step, path: &str) {
        let mut owners: BTreeMap<String, usize> = BTreeMap::new();
        for (arm_index, arm) in step.branches.iter().enumerate() {
            let mut names = BTreeSet::new();
            collect_output_names(&arm.steps, self.tools, &mut names);
            for name in names {
                if let Some(first) = owners.get(&name) {
                    self.error(
                        ValidationPhase::Domain,
                        format!("{path}.branches[{arm_index}]"),
                        format!(
                            "output '{name}' collides with parallel branch {first} in the \
                             same block"
                        ),
                    );
                } else {
                    owners.insert(name, arm_index);
                }
            }
        }
    }

    /// Rule: conflicting parallel branches are flagged (the engine will
    /// serialize them).
    fn rule_parallel_conflicts(&mut self, step: &Step, path: &str) {
        let contracts: Vec<Contract> = step
            .branches
            .iter()
            .map(|arm| aggregate_contract(&arm.steps, self.tools))
            .collect();
        for (left, left_contract) in contracts.iter().enumerate() {
            for (offset, right_contract) in contracts[left + 1..].iter().enumerate() {
                if left_contract.has_conflict(right_contract) {
                    let right = left + 1 + offset;
                    self.warn(
                        ValidationPhase::Domain,
                        path.to_string(),
                        format!(
                            "parallel branches {left} and {right} declare conflicting \
                             reads/writes; the block will be serialized"
                        ),
                    );
                }
            }
        }
    }

    /// Rule: end steps declare a valid outcome category.
    fn rule_outcome(&mut self, step: &Step, path: &str) {
        let Some(outcome) = &step.outcome else {
            self.error(
                ValidationPhase::Domain,
                path.to_string(),
                "end step requires 'outcome'".to_string(),
            );
            return;
        };
        if !OUTCOME_CATEGORIES.contains(&outcome.category.as_str()) {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.outcome.category"),
                format!(
                    "outcome category '{category}' is not one of {OUTCOME_CATEGORIES:?}",
                    category = outcome.category
                ),
            );
        }
    }

    /// Rule: branch well-formedness (arms present, default advised).
    fn rule_branch_shape(&mut self, step: &Step, path: &str) {
        if step.branches.is_empty() {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.branches"),
                format!("{kind} step requires at least one branch", kind = step.step_type),
            );
            return;
        }
        if step.step_type == StepType::Parallel && step.branches.len() < 2 {
            self.warn(
                ValidationPhase::Domain,
                format!("{path}.branches"),
                "parallel step with a single branch has no fan-out".to_string(),
            );
        }
        if step.step_type == StepType::Branch {
            let has_default = step
                .branches
                .iter()
                .any(|arm| arm.condition.is_empty() || arm.condition == "default");
            if !has_default {
                self.warn(
                    ValidationPhase::Domain,
                    format!("{path}.branches"),
                    "branch step has no default arm; unmatched input is a run error"
                        .to_string(),
                );
            }
        }
    }

    /// Rule: assert steps carry at least one well-formed assertion.
    fn rule_assertions(&mut self, step: &Step, path: &str) {
        if step.assert.is_empty() {
            self.error(
                ValidationPhase::Domain,
                format!("{path}.assert"),
                "assert step requires at least one assertion".to_string(),
            );
        }
        for (idx, assertion) in step.assert.iter().enumerate() {
            let needs_pattern = assertion.kind == AssertionKind::Matches;
            if needs_pattern && assertion.pattern.is_none() {
                self.error(
                    ValidationPhase::Domain,
                    format!("{path}.assert[{idx}]"),
                    "matches assertion requires 'pattern'".to_string(),
                );
            }
            if !needs_pattern && assertion.expected.is_none() {
                self.error(
                    ValidationPhase::Domain,
                    format!("{path}.assert[{idx}]"),
                    format!(
                        "{kind} assertion requires 'expected'",
                        kind = assertion.kind.as_str()
                    ),
                );
            }
        }
    }

    /// Rule: evidence declarations are well-formed.
    fn rule_evidence(&mut self, step: &Step, path: &str) {
        let mut names = BTreeSet::new();
        for (idx, item) in step.required_evidence.iter().enumerate() {
            let item_path = format!("{path}.required_evidence[{idx}]");
            if !names.insert(item.name.clone()) {
                self.error(
                    ValidationPhase::Domain,
                    item_path.clone(),
                    format!("duplicate evidence name '{name}'", name = item.name),
                );
            }
            if item.kind == EvidenceKind::Checklist && item.items.is_empty() {
                self.error(
                    ValidationPhase::Domain,
                    item_path,
                    "checklist evidence requires non-empty 'items'".to_string(),
                );
            }
        }
    }
}

// ============================================================================
// SECTION: Graph Helpers
// ============================================================================

/// Collects step identifiers across the whole graph, recording duplicates.
fn collect_ids(
    steps: &[Step],
    path: &str,
    seen: &mut BTreeMap<String, String>,
    duplicates: &mut Vec<(String, String, String)>,
) {
    for (index, step) in steps.iter().enumerate() {
        let step_path = format!("{path}[{index}]");
        if let Some(id) = &step.id {
            if let Some(first_path) = seen.get(id) {
                duplicates.push((step_path.clone(), id.clone(), first_path.clone()));
            } else {
                seen.insert(id.clone(), step_path.clone());
            }
        }
        for (arm_index, arm) in step.branches.iter().enumerate() {
            collect_ids(
                &arm.steps,
                &format!("{step_path}.branches[{arm_index}].steps"),
                seen,
                duplicates,
            );
        }
    }
}

/// Returns true when the list reaches an end step on some path.
///
/// A list reaches an end when it contains an end step, or a branch step
/// whose every arm reaches an end.
fn list_reaches_end(steps: &[Step]) -> bool {
    steps.iter().any(|step| match step.step_type {
        StepType::End => true,
        StepType::Branch => {
            !step.branches.is_empty()
                && step.branches.iter().all(|arm| list_reaches_end(&arm.steps))
        }
        _ => false,
    })
}

/// Adds the names a step declares to the symbol set.
fn declare_step_symbols(
    step: &Step,
    tools: &BTreeMap<String, ToolDefinition>,
    symbols: &mut BTreeSet<String>,
) {
    if let Some(id) = &step.id {
        symbols.insert(id.clone());
    }
    symbols.extend(step.export.iter().cloned());
    if step.step_type == StepType::Tool {
        symbols.extend(tool_output_names(step, tools));
    }
    if step.step_type == StepType::Extension
        && let Some(contract) = &step.contract
    {
        symbols.extend(contract.outputs.keys().cloned());
    }
}

/// Returns the declared output names of a tool step.
fn tool_output_names(step: &Step, tools: &BTreeMap<String, ToolDefinition>) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = step
        .contract
        .iter()
        .flat_map(|contract| contract.outputs.keys().cloned())
        .collect();
    if let (Some(tool), Some(action)) = (step.tool.as_deref(), step.action.as_deref())
        && let Some(definition) = tools.get(tool)
    {
        names.extend(definition.action_contract(action).outputs.keys().cloned());
    }
    names
}

/// Collects all declared output names of a step list (for parallel
/// uniqueness checks).
fn collect_output_names(
    steps: &[Step],
    tools: &BTreeMap<String, ToolDefinition>,
    names: &mut BTreeSet<String>,
) {
    for step in steps {
        let mut declared = BTreeSet::new();
        declare_step_symbols(step, tools, &mut declared);
        names.extend(declared);
        for arm in &step.branches {
            collect_output_names(&arm.steps, tools, names);
        }
    }
}

