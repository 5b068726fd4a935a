// crates/runbook-kernel-core/src/resolve.rs
// ============================================================================
// Module: Contract Resolution
// Description: Per-step and aggregate contract resolution over the graph.
// Purpose: Share the contract-resolution table between validator and engine.
// Dependencies: crate::schema, runbook-kernel-contract
// ============================================================================

//! ## Overview
//! Contract resolution follows a fixed table: tool steps merge the tool
//! contract, the action contract, and any step override; manual steps start
//! from the manual defaults; assert steps are always the fixed assertion
//! contract; extension steps carry their mandatory inline contract; branch,
//! parallel, and end steps have none. Aggregation unions reads and writes
//! across a step list, recursing into nested arms, and backs the parallel
//! conflict analysis.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use runbook_kernel_contract::Contract;
use runbook_kernel_contract::ToolDefinition;
use runbook_kernel_contract::assert_contract;
use runbook_kernel_contract::manual_defaults;

use crate::schema::Step;
use crate::schema::StepType;

// ============================================================================
// SECTION: Step Contract Resolution
// ============================================================================

/// Resolves a step's contract, tolerating missing tool definitions.
///
/// Tool steps with no loaded definition resolve to the step override alone
/// (or the default contract); the engine performs the strict variant with
/// hard errors before dispatch.
#[must_use]
pub fn step_contract_lenient(
    step: &Step,
    tools: &BTreeMap<String, ToolDefinition>,
) -> Option<Contract> {
    match step.step_type {
        StepType::Tool => {
            let base = match (step.tool.as_deref(), step.action.as_deref()) {
                (Some(tool), Some(action)) => {
                    tools.get(tool).map(|definition| definition.action_contract(action))
                }
                _ => None,
            }
            .unwrap_or_default();
            Some(match &step.contract {
                Some(override_contract) => base.merge(override_contract),
                None => base,
            })
        }
        StepType::Manual => Some(match &step.contract {
            Some(override_contract) => manual_defaults().merge(override_contract),
            None => manual_defaults(),
        }),
        StepType::Assert => Some(assert_contract()),
        StepType::Extension => step.contract.clone(),
        StepType::Branch | StepType::Parallel | StepType::End => None,
    }
}

/// Aggregates the reads and writes of a step list into one contract.
///
/// Nested branch and parallel arms are included; attributes other than the
/// tag sets stay at their defaults because only conflict detection consumes
/// the aggregate.
#[must_use]
pub fn aggregate_contract(steps: &[Step], tools: &BTreeMap<String, ToolDefinition>) -> Contract {
    let mut aggregate = Contract::default();
    for step in steps {
        if let Some(contract) = step_contract_lenient(step, tools) {
            aggregate.reads.extend(contract.reads.iter().cloned());
            aggregate.writes.extend(contract.writes.iter().cloned());
        }
        for arm in &step.branches {
            let nested = aggregate_contract(&arm.steps, tools);
            aggregate.reads.extend(nested.reads);
            aggregate.writes.extend(nested.writes);
        }
    }
    aggregate
}
