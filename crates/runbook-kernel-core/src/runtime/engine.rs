// crates/runbook-kernel-core/src/runtime/engine.rs
// ============================================================================
// Module: Step Interpreter
// Description: Sequential step dispatch with branching, parallel fan-out,
//              for-each expansion, bounded jumps, and governance.
// Purpose: Execute a validated runbook against the engine ports, emitting
//          the hash-chained trace throughout.
// Dependencies: crate::interfaces, crate::resolve, crate::runtime,
// crate::schema, crate::scope, crate::template, runbook-kernel-contract,
// runbook-kernel-trace, regex
// ============================================================================

//! ## Overview
//! The engine walks a step list with an index so bounded backward jumps can
//! rewind it. Every contract-bearing step resolves its contract, passes
//! governance, and then dispatches by type. Parallel blocks and parallel
//! for-each iterations fork the scope into scoped threads and merge results
//! back in declaration order, so replaying the same inputs yields the same
//! event-type sequence. The trace writer is the only shared mutable resource
//! during fan-out.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::thread;

use regex::Regex;
use runbook_kernel_contract::Contract;
use runbook_kernel_contract::GovernanceAction;
use runbook_kernel_contract::GovernanceDecision;
use runbook_kernel_contract::ToolDefinition;
use runbook_kernel_contract::evaluate_policy;
use runbook_kernel_trace::EventType;
use runbook_kernel_trace::TraceWriter;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::interfaces::ApprovalPort;
use crate::interfaces::ApprovalRequest;
use crate::interfaces::AutoApprove;
use crate::interfaces::CancelToken;
use crate::interfaces::EvidenceCollector;
use crate::interfaces::ExecutorError;
use crate::interfaces::ExtensionError;
use crate::interfaces::ExtensionRunner;
use crate::interfaces::InputResolver;
use crate::interfaces::ToolExecutor;
use crate::resolve::aggregate_contract;
use crate::runtime::inputs::resolve_inputs;
use crate::runtime::result::EngineError;
use crate::runtime::result::FailureKind;
use crate::runtime::result::RunOutcome;
use crate::runtime::result::RunResult;
use crate::runtime::result::RunStatus;
use crate::schema::AssertionKind;
use crate::schema::Branch;
use crate::schema::ForEach;
use crate::schema::NextMax;
use crate::schema::NextSpec;
use crate::schema::RepeatBlock;
use crate::schema::Runbook;
use crate::schema::Step;
use crate::schema::StepType;
use crate::scope::Scope;
use crate::scope::VisibilityFilter;
use crate::scope::diff_scope;
use crate::scope::insert_nested;
use crate::scope::insert_scoped;
use crate::scope::lookup_path;
use crate::template::direct_reference;
use crate::template::eval_bool;
use crate::template::expand;
use crate::template::resolve_map;
use crate::template::stringify;

// ============================================================================
// SECTION: Run Modes and Ports
// ============================================================================

/// Execution mode selected by the outer driver.
///
/// # Invariants
/// - Dry-run never invokes the tool executor; replay and dry-run
///   auto-approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Live execution against real ports.
    Real,
    /// Resolve and report without invoking tools.
    DryRun,
    /// Deterministic execution against canned responses.
    Replay,
}

/// Port bundle the engine executes against.
///
/// # Invariants
/// - All ports are `Send + Sync`; parallel branches call them from threads.
#[derive(Clone, Copy)]
pub struct EnginePorts<'a> {
    /// Tool invocation port.
    pub executor: &'a dyn ToolExecutor,
    /// Manual-step evidence port.
    pub evidence: &'a dyn EvidenceCollector,
    /// Approval submission port.
    pub approvals: &'a dyn ApprovalPort,
    /// Optional extension runner port.
    pub extensions: Option<&'a dyn ExtensionRunner>,
    /// External input resolvers.
    pub resolvers: &'a [&'a dyn InputResolver],
}

// ============================================================================
// SECTION: Engine State
// ============================================================================

/// Mutable per-run state: the variable scope and retry counters.
#[derive(Debug, Clone, Default)]
struct ExecState {
    /// Variable scope.
    vars: Scope,
    /// Backward-jump retry counters keyed by target step id.
    retries: BTreeMap<String, u64>,
}

/// Control flow produced by one step.
enum StepFlow {
    /// Advance to the next step.
    Continue,
    /// Terminate the run with this result.
    Finished(RunResult),
}

/// Result of a step's core dispatch, before `continue_on_fail` handling.
enum CoreOutcome {
    /// Step succeeded; extra data for `step_complete`.
    Success(Map<String, Value>),
    /// Step was skipped (dry-run); extra data for `step_complete`.
    Skipped(Map<String, Value>),
    /// Step failed with a kind and message.
    Failed {
        /// Stable failure kind.
        kind: FailureKind,
        /// Human-readable message.
        message: String,
    },
    /// A nested end step resolved the run.
    Finished(RunResult),
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Runbook step interpreter.
///
/// # Invariants
/// - The runbook and tool definitions are immutable for the engine's
///   lifetime; only the per-run [`ExecState`] mutates.
pub struct Engine<'a> {
    /// Validated runbook under execution.
    runbook: &'a Runbook,
    /// Loaded tool definitions keyed by tool name.
    tools: &'a BTreeMap<String, ToolDefinition>,
    /// Port bundle.
    ports: EnginePorts<'a>,
    /// Execution mode.
    mode: RunMode,
}

impl<'a> Engine<'a> {
    /// Creates an engine over a validated runbook and its tool definitions.
    #[must_use]
    pub const fn new(
        runbook: &'a Runbook,
        tools: &'a BTreeMap<String, ToolDefinition>,
        ports: EnginePorts<'a>,
        mode: RunMode,
    ) -> Self {
        Self {
            runbook,
            tools,
            ports,
            mode,
        }
    }

    /// Runs the runbook to completion.
    ///
    /// Inputs resolve first (`input_resolved` events), then `run_start` is
    /// emitted and the step graph executes. The terminal `run_complete`
    /// event is emitted for every exit path, including faults.
    pub fn run(
        &self,
        trace: &TraceWriter,
        host_inputs: &BTreeMap<String, Value>,
        cancel: &CancelToken,
    ) -> RunResult {
        self.run_with_scope(trace, host_inputs, cancel).0
    }

    /// Runs the runbook and also returns the final variable scope.
    ///
    /// Test harnesses use the scope to check expected output values.
    pub fn run_with_scope(
        &self,
        trace: &TraceWriter,
        host_inputs: &BTreeMap<String, Value>,
        cancel: &CancelToken,
    ) -> (RunResult, Scope) {
        match self.run_inner(trace, host_inputs, cancel) {
            Ok((result, vars)) => (result, vars),
            Err(err) => {
                let result = RunResult::errored(err.to_string());
                let _ = self.emit_run_complete(trace, &result);
                (result, Scope::new())
            }
        }
    }

    /// Fallible run body; faults bubble to [`Engine::run`].
    fn run_inner(
        &self,
        trace: &TraceWriter,
        host_inputs: &BTreeMap<String, Value>,
        cancel: &CancelToken,
    ) -> Result<(RunResult, Scope), EngineError> {
        let secret_names: Vec<String> = self
            .tools
            .values()
            .flat_map(|definition| definition.meta.secrets.iter().cloned())
            .collect();
        if !secret_names.is_empty() {
            trace.set_secrets(&secret_names);
        }

        let inputs = resolve_inputs(&self.runbook.meta, host_inputs, self.ports.resolvers, trace)?;
        let mut vars = Scope::new();
        for (name, value) in &self.runbook.meta.constants {
            vars.insert(name.clone(), value.clone());
        }
        for (name, value) in &inputs {
            vars.insert(name.clone(), value.clone());
        }

        let mut data = Map::new();
        data.insert("runbook".to_string(), Value::String(self.runbook.meta.name.clone()));
        data.insert("inputs".to_string(), Value::Object(inputs.into_iter().collect()));
        data.insert(
            "constants".to_string(),
            Value::Object(self.runbook.meta.constants.clone().into_iter().collect()),
        );
        trace.emit(EventType::RunStart, data)?;

        let mut state = ExecState {
            vars,
            retries: BTreeMap::new(),
        };
        let result =
            match self.execute_steps(&self.runbook.steps, &mut state, true, trace, cancel) {
                Ok(Some(result)) => result,
                Ok(None) => RunResult::errored(EngineError::MissingEnd.to_string()),
                Err(err) => RunResult::errored(err.to_string()),
            };
        self.emit_run_complete(trace, &result)?;
        Ok((result, state.vars))
    }

    /// Emits the terminal `run_complete` event for a result.
    fn emit_run_complete(
        &self,
        trace: &TraceWriter,
        result: &RunResult,
    ) -> Result<(), EngineError> {
        let mut data = Map::new();
        data.insert("status".to_string(), Value::String(result.status.to_string()));
        if let Some(outcome) = &result.outcome {
            data.insert(
                "outcome".to_string(),
                json!({
                    "category": outcome.category,
                    "code": outcome.code,
                    "meta": Value::Object(outcome.meta.clone()),
                }),
            );
        }
        if let Some(kind) = result.failure_kind {
            data.insert("failure_kind".to_string(), Value::String(kind.to_string()));
        }
        if let Some(error) = &result.error {
            data.insert("error".to_string(), Value::String(error.clone()));
        }
        trace.emit_complete(data)?;
        Ok(())
    }

    // ========================================================================
    // SECTION: Step List Execution
    // ========================================================================

    /// Executes one step list, honoring guards, jumps, and termination.
    ///
    /// Returns `Some` when a terminal result was produced, `None` when the
    /// list was exhausted and `require_end` is false.
    fn execute_steps(
        &self,
        steps: &[Step],
        state: &mut ExecState,
        require_end: bool,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<Option<RunResult>, EngineError> {
        let ids: BTreeMap<&str, usize> = steps
            .iter()
            .enumerate()
            .filter_map(|(index, step)| step.id.as_deref().map(|id| (id, index)))
            .collect();

        let mut index = 0_usize;
        while index < steps.len() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let step = &steps[index];
            let step_id = step.display_id(index);

            if let Some(when) = &step.when
                && !eval_bool(when, &state.vars)?
            {
                trace.emit(EventType::StepStart, step_data(&step_id, step))?;
                let mut data = step_data(&step_id, step);
                data.insert("status".to_string(), Value::String("skipped".to_string()));
                data.insert("reason".to_string(), Value::String("when_false".to_string()));
                trace.emit(EventType::StepComplete, data)?;
                index += 1;
                continue;
            }

            let flow = if step.for_each.is_some() {
                self.run_for_each(step, &step_id, state, trace, cancel)?
            } else {
                self.run_step(step, &step_id, state, trace, cancel)?
            };
            if let StepFlow::Finished(result) = flow {
                return Ok(Some(result));
            }

            if let Some(next) = &step.next {
                let target = next.target();
                let Some(&target_index) = ids.get(target) else {
                    return Err(EngineError::TargetNotFound {
                        target: target.to_string(),
                    });
                };
                if target_index <= index {
                    let max = self.resolve_jump_bound(next, &state.vars)?;
                    let count = state.retries.get(target).copied().unwrap_or(0);
                    if count < max {
                        let count = count + 1;
                        state.retries.insert(target.to_string(), count);
                        insert_nested(&mut state.vars, target, "retry_count", json!(count));
                        index = target_index;
                        continue;
                    }
                } else {
                    index = target_index;
                    continue;
                }
            }
            index += 1;
        }

        if require_end {
            Ok(Some(RunResult::errored(EngineError::MissingEnd.to_string())))
        } else {
            Ok(None)
        }
    }

    /// Resolves a backward jump bound; absence is a hard fault.
    fn resolve_jump_bound(&self, next: &NextSpec, vars: &Scope) -> Result<u64, EngineError> {
        match next.max() {
            None => Err(EngineError::UnboundedBackwardJump {
                target: next.target().to_string(),
            }),
            Some(NextMax::Count(count)) => Ok(*count),
            Some(NextMax::Template(template)) => {
                let raw = stringify(&expand(template, vars)?);
                raw.parse::<u64>().map_err(|_| EngineError::InvalidJumpBound { raw })
            }
        }
    }

    // ========================================================================
    // SECTION: Single Step Execution
    // ========================================================================

    /// Executes one step: contract, governance, repeat, dispatch, scoping.
    fn run_step(
        &self,
        step: &Step,
        step_id: &str,
        state: &mut ExecState,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<StepFlow, EngineError> {
        trace.emit(EventType::StepStart, step_data(step_id, step))?;

        if let Some(contract) = self.resolve_contract(step, step_id)? {
            let mut data = step_data(step_id, step);
            data.insert("contract".to_string(), Value::Object(contract.summary()));
            trace.emit(EventType::ContractEvaluated, data)?;

            let decision = evaluate_policy(self.runbook.meta.governance.as_ref(), &contract);
            let mut data = step_data(step_id, step);
            data.insert("action".to_string(), Value::String(decision.action.to_string()));
            data.insert(
                "risk_level".to_string(),
                Value::String(decision.risk_level.to_string()),
            );
            data.insert("min_approvers".to_string(), json!(decision.min_approvers));
            data.insert(
                "matched_rule".to_string(),
                Value::String(decision.matched_rule.clone()),
            );
            trace.emit(EventType::GovernanceDecision, data)?;

            match decision.action {
                GovernanceAction::Deny => {
                    let message = format!(
                        "governance denied step '{step_id}' ({rule})",
                        rule = decision.matched_rule
                    );
                    self.emit_step_complete(
                        trace,
                        step,
                        step_id,
                        "skipped",
                        Some(FailureKind::Denied),
                        Some(&message),
                        Map::new(),
                    )?;
                    return Ok(StepFlow::Finished(RunResult::failed(
                        FailureKind::Denied,
                        message,
                    )));
                }
                GovernanceAction::RequireApproval => {
                    if !self.obtain_approval(step_id, &decision, trace, cancel)? {
                        let message = format!("approval rejected for step '{step_id}'");
                        self.emit_step_complete(
                            trace,
                            step,
                            step_id,
                            "skipped",
                            Some(FailureKind::ApprovalRejected),
                            Some(&message),
                            Map::new(),
                        )?;
                        return Ok(StepFlow::Finished(RunResult::failed(
                            FailureKind::ApprovalRejected,
                            message,
                        )));
                    }
                }
                GovernanceAction::Allow => {}
            }
        }

        let scoped = step.scope.is_some() || step.visibility.is_some();
        let base = scoped.then(|| state.vars.clone());

        let core = match &step.repeat {
            Some(repeat) => self.run_repeat(step, step_id, repeat, state, trace, cancel)?,
            None => self.dispatch_core(step, step_id, state, trace, cancel)?,
        };

        match core {
            CoreOutcome::Success(extra) => {
                if let Some(base) = &base {
                    self.apply_scoping(step, step_id, base, state, trace)?;
                }
                self.emit_step_complete(trace, step, step_id, "success", None, None, extra)?;
                Ok(StepFlow::Continue)
            }
            CoreOutcome::Skipped(extra) => {
                self.emit_step_complete(trace, step, step_id, "skipped", None, None, extra)?;
                Ok(StepFlow::Continue)
            }
            CoreOutcome::Failed { kind, message } => {
                self.emit_step_complete(
                    trace,
                    step,
                    step_id,
                    "failed",
                    Some(kind),
                    Some(&message),
                    Map::new(),
                )?;
                if step.continue_on_fail {
                    Ok(StepFlow::Continue)
                } else {
                    Ok(StepFlow::Finished(RunResult::failed(kind, message)))
                }
            }
            CoreOutcome::Finished(result) => {
                let status = match result.status {
                    RunStatus::Completed => "success",
                    RunStatus::Failed | RunStatus::Error => "failed",
                };
                self.emit_step_complete(
                    trace,
                    step,
                    step_id,
                    status,
                    result.failure_kind,
                    result.error.as_deref(),
                    Map::new(),
                )?;
                Ok(StepFlow::Finished(result))
            }
        }
    }

    /// Emits a `step_complete` event.
    #[allow(clippy::too_many_arguments, reason = "Event shape needs every field.")]
    fn emit_step_complete(
        &self,
        trace: &TraceWriter,
        step: &Step,
        step_id: &str,
        status: &str,
        failure_kind: Option<FailureKind>,
        error: Option<&str>,
        extra: Map<String, Value>,
    ) -> Result<(), EngineError> {
        let mut data = step_data(step_id, step);
        data.insert("status".to_string(), Value::String(status.to_string()));
        if let Some(kind) = failure_kind {
            data.insert("failure_kind".to_string(), Value::String(kind.to_string()));
        }
        if let Some(error) = error {
            data.insert("error".to_string(), Value::String(error.to_string()));
        }
        for (key, value) in extra {
            data.insert(key, value);
        }
        trace.emit(EventType::StepComplete, data)?;
        Ok(())
    }

    /// Resolves the step contract per the fixed table, with hard errors for
    /// unknown tools and actions.
    fn resolve_contract(
        &self,
        step: &Step,
        step_id: &str,
    ) -> Result<Option<Contract>, EngineError> {
        match step.step_type {
            StepType::Tool => {
                let (_, action, definition) = self.tool_parts(step, step_id)?;
                let base = definition.action_contract(action);
                Ok(Some(match &step.contract {
                    Some(override_contract) => base.merge(override_contract),
                    None => base,
                }))
            }
            StepType::Manual => {
                let defaults = runbook_kernel_contract::manual_defaults();
                Ok(Some(match &step.contract {
                    Some(override_contract) => defaults.merge(override_contract),
                    None => defaults,
                }))
            }
            StepType::Assert => Ok(Some(runbook_kernel_contract::assert_contract())),
            StepType::Extension => Ok(step.contract.clone()),
            StepType::Branch | StepType::Parallel | StepType::End => Ok(None),
        }
    }

    /// Looks up the tool definition and action for a tool step.
    fn tool_parts<'b>(
        &self,
        step: &'b Step,
        step_id: &str,
    ) -> Result<(&'b str, &'b str, &ToolDefinition), EngineError> {
        let tool = step.tool.as_deref().ok_or_else(|| EngineError::ToolNotFound {
            name: format!("(unset on step '{step_id}')"),
        })?;
        let definition = self.tools.get(tool).ok_or_else(|| EngineError::ToolNotFound {
            name: tool.to_string(),
        })?;
        let action = step.action.as_deref().ok_or_else(|| EngineError::ActionNotFound {
            tool: tool.to_string(),
            action: format!("(unset on step '{step_id}')"),
        })?;
        if !definition.actions.contains_key(action) {
            return Err(EngineError::ActionNotFound {
                tool: tool.to_string(),
                action: action.to_string(),
            });
        }
        Ok((tool, action, definition))
    }

    /// Obtains approval for a require-approval decision.
    ///
    /// Dry-run and replay modes resolve through the in-process auto
    /// approver; live runs go through the configured port.
    fn obtain_approval(
        &self,
        step_id: &str,
        decision: &GovernanceDecision,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<bool, EngineError> {
        let request = ApprovalRequest {
            step_id: step_id.to_string(),
            risk_level: decision.risk_level,
            min_approvers: decision.min_approvers,
            summary: decision.matched_rule.clone(),
        };
        let mut data = Map::new();
        data.insert("step".to_string(), Value::String(step_id.to_string()));
        data.insert("min_approvers".to_string(), json!(request.min_approvers));
        data.insert(
            "risk_level".to_string(),
            Value::String(request.risk_level.to_string()),
        );
        trace.emit(EventType::ApprovalSubmitted, data)?;

        let response = if self.mode == RunMode::Real {
            let ticket = self.ports.approvals.submit(&request)?;
            self.ports.approvals.wait(&ticket, cancel)?
        } else {
            let auto = AutoApprove;
            let ticket = auto.submit(&request)?;
            auto.wait(&ticket, cancel)?
        };

        let mut data = Map::new();
        data.insert("step".to_string(), Value::String(step_id.to_string()));
        data.insert("approved".to_string(), Value::Bool(response.approved));
        data.insert("approver".to_string(), Value::String(response.approver.clone()));
        data.insert("method".to_string(), Value::String(response.method.clone()));
        trace.emit(EventType::ApprovalResolved, data)?;
        Ok(response.approved)
    }

    /// Runs a step body under its bounded repeat modifier.
    fn run_repeat(
        &self,
        step: &Step,
        step_id: &str,
        repeat: &RepeatBlock,
        state: &mut ExecState,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<CoreOutcome, EngineError> {
        let mut data = Map::new();
        data.insert("step".to_string(), Value::String(step_id.to_string()));
        data.insert("max".to_string(), json!(repeat.max));
        trace.emit(EventType::RepeatStart, data)?;

        let mut last = CoreOutcome::Success(Map::new());
        for index in 0..repeat.max {
            state.vars.insert("repeat".to_string(), json!({ "index": index }));
            if let Some(until) = &repeat.until
                && eval_bool(until, &state.vars)?
            {
                break;
            }
            let mut data = Map::new();
            data.insert("step".to_string(), Value::String(step_id.to_string()));
            data.insert("index".to_string(), json!(index));
            trace.emit(EventType::RepeatIteration, data)?;

            last = self.dispatch_core(step, step_id, state, trace, cancel)?;
            match last {
                CoreOutcome::Failed { .. } | CoreOutcome::Finished(_) => break,
                CoreOutcome::Success(_) | CoreOutcome::Skipped(_) => {}
            }
        }
        state.vars.remove("repeat");
        Ok(last)
    }

    /// Applies visibility pruning, scope nesting, and exports after a
    /// successful step.
    fn apply_scoping(
        &self,
        step: &Step,
        step_id: &str,
        base: &Scope,
        state: &mut ExecState,
        trace: &TraceWriter,
    ) -> Result<(), EngineError> {
        let mut new_bindings = diff_scope(base, &state.vars);

        if let Some(visibility) = &step.visibility {
            let filter = VisibilityFilter::compile(&visibility.allow, &visibility.deny)?;
            let mut allowed = 0_u64;
            let mut denied = 0_u64;
            let keys: Vec<String> = new_bindings.keys().cloned().collect();
            for key in keys {
                if filter.is_visible(&key) {
                    allowed += 1;
                } else {
                    state.vars.remove(&key);
                    new_bindings.remove(&key);
                    denied += 1;
                }
            }
            let mut data = Map::new();
            data.insert("step".to_string(), Value::String(step_id.to_string()));
            data.insert("allowed".to_string(), json!(allowed));
            data.insert("denied".to_string(), json!(denied));
            trace.emit(EventType::VisibilityApplied, data)?;
        }

        if let Some(scope_path) = &step.scope {
            for (key, value) in &new_bindings {
                state.vars.remove(key);
                insert_scoped(&mut state.vars, scope_path, key, value.clone());
            }
            for name in &step.export {
                if let Some(value) = new_bindings.get(name) {
                    state.vars.insert(name.clone(), value.clone());
                    let mut data = Map::new();
                    data.insert("step".to_string(), Value::String(step_id.to_string()));
                    data.insert("name".to_string(), Value::String(name.clone()));
                    data.insert("scope".to_string(), Value::String(scope_path.clone()));
                    trace.emit(EventType::ScopeExport, data)?;
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // SECTION: Core Dispatch
    // ========================================================================

    /// Dispatches a step by type.
    fn dispatch_core(
        &self,
        step: &Step,
        step_id: &str,
        state: &mut ExecState,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<CoreOutcome, EngineError> {
        match step.step_type {
            StepType::Tool => self.core_tool(step, step_id, state, trace, cancel),
            StepType::Manual => self.core_manual(step, step_id, state, cancel),
            StepType::Assert => self.core_assert(step, state),
            StepType::Branch => self.core_branch(step, step_id, state, trace, cancel),
            StepType::Parallel => self.core_parallel(step, step_id, state, trace, cancel),
            StepType::End => self.core_end(step, step_id, state, trace),
            StepType::Extension => self.core_extension(step, step_id, state, cancel),
        }
    }

    /// Tool step: spread, overlay, resolve, execute, bind outputs.
    fn core_tool(
        &self,
        step: &Step,
        step_id: &str,
        state: &mut ExecState,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<CoreOutcome, EngineError> {
        let (tool, action, definition) = self.tool_parts(step, step_id)?;

        let mut merged: BTreeMap<String, Value> = BTreeMap::new();
        for source in &step.inputs_from {
            match state.vars.get(source) {
                Some(Value::Object(map)) => {
                    for (key, value) in map {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                _ => {
                    return Err(EngineError::InputSpread {
                        name: source.clone(),
                    });
                }
            }
        }
        for (key, value) in &step.inputs {
            merged.insert(key.clone(), value.clone());
        }
        let inputs = resolve_map(&merged, &state.vars)?;

        if self.mode == RunMode::DryRun {
            let mut extra = Map::new();
            extra.insert("dry_run".to_string(), Value::Bool(true));
            extra.insert("tool".to_string(), Value::String(format!("{tool}:{action}")));
            extra.insert("inputs".to_string(), Value::Object(inputs.into_iter().collect()));
            return Ok(CoreOutcome::Skipped(extra));
        }

        let response =
            match self.ports.executor.execute(definition, action, &inputs, &state.vars, cancel) {
                Ok(response) => response,
                Err(ExecutorError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err) => {
                    return Ok(CoreOutcome::Failed {
                        kind: FailureKind::Executor,
                        message: err.to_string(),
                    });
                }
            };

        if response.exit_code != 0 {
            let mut message =
                format!("tool '{tool}:{action}' exited with code {code}", code = response.exit_code);
            if !response.stderr.is_empty() {
                message.push_str(&format!(": {stderr}", stderr = response.stderr.trim()));
            }
            return Ok(CoreOutcome::Failed {
                kind: FailureKind::Executor,
                message,
            });
        }

        let declared = match &step.contract {
            Some(override_contract) => {
                definition.action_contract(action).merge(override_contract).outputs
            }
            None => definition.action_contract(action).outputs,
        };
        let undeclared: Vec<Value> = response
            .outputs
            .keys()
            .filter(|key| !declared.contains_key(*key))
            .map(|key| Value::String(key.clone()))
            .collect();
        if !undeclared.is_empty() {
            let mut data = Map::new();
            data.insert("step".to_string(), Value::String(step_id.to_string()));
            data.insert("kind".to_string(), Value::String("undeclared_output".to_string()));
            data.insert("outputs".to_string(), Value::Array(undeclared));
            trace.emit(EventType::ContractViolation, data)?;
        }

        for (key, value) in &response.outputs {
            state.vars.insert(key.clone(), value.clone());
            if let Some(id) = &step.id {
                insert_nested(&mut state.vars, id, key, value.clone());
            }
        }

        let mut extra = Map::new();
        extra.insert("exit_code".to_string(), json!(response.exit_code));
        extra.insert(
            "outputs".to_string(),
            Value::Array(response.outputs.keys().map(|key| Value::String(key.clone())).collect()),
        );
        Ok(CoreOutcome::Success(extra))
    }

    /// Manual step: resolve instructions, collect declared evidence.
    fn core_manual(
        &self,
        step: &Step,
        step_id: &str,
        state: &mut ExecState,
        cancel: &CancelToken,
    ) -> Result<CoreOutcome, EngineError> {
        let instructions = match &step.instructions {
            Some(template) => stringify(&expand(template, &state.vars)?),
            None => String::new(),
        };
        let mut extra = Map::new();
        extra.insert("instructions".to_string(), Value::String(instructions));

        if self.mode != RunMode::DryRun {
            let mut collected: Vec<Value> = Vec::new();
            for item in &step.required_evidence {
                let value = self.ports.evidence.collect(step_id, item, cancel)?;
                if let Some(id) = &step.id {
                    insert_nested(&mut state.vars, id, &item.name, value);
                }
                collected.push(Value::String(item.name.clone()));
            }
            extra.insert("evidence".to_string(), Value::Array(collected));
        }
        Ok(CoreOutcome::Success(extra))
    }

    /// Assert step: evaluate every assertion, collect failures.
    fn core_assert(&self, step: &Step, state: &ExecState) -> Result<CoreOutcome, EngineError> {
        let mut failures: Vec<String> = Vec::new();
        for assertion in &step.assert {
            let actual = stringify(&expand(&assertion.value, &state.vars)?);
            match assertion.kind {
                AssertionKind::Equals | AssertionKind::NotEquals | AssertionKind::Contains => {
                    let expected = match &assertion.expected {
                        Some(template) => stringify(&expand(template, &state.vars)?),
                        None => String::new(),
                    };
                    let passed = match assertion.kind {
                        AssertionKind::Equals => actual == expected,
                        AssertionKind::NotEquals => actual != expected,
                        _ => actual.contains(&expected),
                    };
                    if !passed {
                        failures.push(format!(
                            "{kind}: expected '{expected}', got '{actual}'",
                            kind = assertion.kind.as_str()
                        ));
                    }
                }
                AssertionKind::Matches => {
                    let pattern = match &assertion.pattern {
                        Some(template) => stringify(&expand(template, &state.vars)?),
                        None => String::new(),
                    };
                    let regex =
                        Regex::new(&pattern).map_err(|err| EngineError::InvalidPattern {
                            pattern: pattern.clone(),
                            message: err.to_string(),
                        })?;
                    if !regex.is_match(&actual) {
                        failures.push(format!("matches: '{actual}' does not match /{pattern}/"));
                    }
                }
            }
        }
        if failures.is_empty() {
            let mut extra = Map::new();
            extra.insert("assertions".to_string(), json!(step.assert.len()));
            Ok(CoreOutcome::Success(extra))
        } else {
            Ok(CoreOutcome::Failed {
                kind: FailureKind::Assertion,
                message: failures.join("; "),
            })
        }
    }

    /// Branch step: first matching arm wins.
    fn core_branch(
        &self,
        step: &Step,
        step_id: &str,
        state: &mut ExecState,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<CoreOutcome, EngineError> {
        for (index, arm) in step.branches.iter().enumerate() {
            let matched = arm.condition.is_empty()
                || arm.condition == "default"
                || eval_bool(&arm.condition, &state.vars)?;
            if !matched {
                continue;
            }
            let label = branch_label(arm, index);
            let mut data = Map::new();
            data.insert("step".to_string(), Value::String(step_id.to_string()));
            data.insert("branch".to_string(), Value::String(label.clone()));
            trace.emit(EventType::BranchEnter, data)?;

            let nested = self.execute_steps(&arm.steps, state, false, trace, cancel)?;

            let mut data = Map::new();
            data.insert("step".to_string(), Value::String(step_id.to_string()));
            data.insert("branch".to_string(), Value::String(label));
            trace.emit(EventType::BranchExit, data)?;

            return Ok(match nested {
                Some(result) => CoreOutcome::Finished(result),
                None => CoreOutcome::Success(Map::new()),
            });
        }
        Err(EngineError::NoBranchMatched {
            step: step_id.to_string(),
        })
    }

    /// End step: resolve outcome metadata and terminate the run.
    fn core_end(
        &self,
        step: &Step,
        step_id: &str,
        state: &ExecState,
        trace: &TraceWriter,
    ) -> Result<CoreOutcome, EngineError> {
        let Some(outcome) = &step.outcome else {
            return Err(EngineError::MissingEnd);
        };
        let meta: Map<String, Value> =
            resolve_map(&outcome.meta, &state.vars)?.into_iter().collect();
        let resolved = RunOutcome {
            category: outcome.category.clone(),
            code: outcome.code.clone(),
            meta,
        };
        let mut data = Map::new();
        data.insert("step".to_string(), Value::String(step_id.to_string()));
        data.insert("category".to_string(), Value::String(resolved.category.clone()));
        data.insert("code".to_string(), Value::String(resolved.code.clone()));
        data.insert("meta".to_string(), Value::Object(resolved.meta.clone()));
        trace.emit(EventType::OutcomeResolved, data)?;
        Ok(CoreOutcome::Finished(RunResult::completed(resolved)))
    }

    /// Extension step: dispatch to the registered runner.
    fn core_extension(
        &self,
        step: &Step,
        step_id: &str,
        state: &mut ExecState,
        cancel: &CancelToken,
    ) -> Result<CoreOutcome, EngineError> {
        let name = step.extension.as_deref().ok_or_else(|| ExtensionError::NotFound {
            name: format!("(unset on step '{step_id}')"),
        })?;
        let runner = self.ports.extensions.ok_or_else(|| ExtensionError::NotFound {
            name: name.to_string(),
        })?;
        let inputs = resolve_map(&step.inputs, &state.vars)?;
        match runner.execute(name, &inputs, &state.vars, cancel) {
            Ok(outputs) => {
                for (key, value) in &outputs {
                    state.vars.insert(key.clone(), value.clone());
                    if let Some(id) = &step.id {
                        insert_nested(&mut state.vars, id, key, value.clone());
                    }
                }
                let mut extra = Map::new();
                extra.insert("extension".to_string(), Value::String(name.to_string()));
                Ok(CoreOutcome::Success(extra))
            }
            Err(ExtensionError::Cancelled) => Err(EngineError::Cancelled),
            Err(err @ ExtensionError::NotFound { .. }) => Err(err.into()),
            Err(err) => Ok(CoreOutcome::Failed {
                kind: FailureKind::Extension,
                message: err.to_string(),
            }),
        }
    }

    // ========================================================================
    // SECTION: Parallel Fan-Out
    // ========================================================================

    /// Parallel step: conflict analysis, fork, join, declaration-order merge.
    fn core_parallel(
        &self,
        step: &Step,
        step_id: &str,
        state: &mut ExecState,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<CoreOutcome, EngineError> {
        let arms = &step.branches;
        let contracts: Vec<Contract> =
            arms.iter().map(|arm| aggregate_contract(&arm.steps, self.tools)).collect();
        let mut serialized = false;
        'conflict: for (left, left_contract) in contracts.iter().enumerate() {
            for right_contract in &contracts[left + 1..] {
                if left_contract.has_conflict(right_contract) {
                    serialized = true;
                    break 'conflict;
                }
            }
        }

        let mut data = Map::new();
        data.insert("step".to_string(), Value::String(step_id.to_string()));
        data.insert("branches".to_string(), json!(arms.len()));
        data.insert("serialized".to_string(), Value::Bool(serialized));
        trace.emit(EventType::ParallelFork, data)?;

        let base = state.vars.clone();
        let results = if serialized {
            arms.iter()
                .map(|arm| self.run_parallel_arm(arm, &base, state, trace, cancel))
                .collect::<Vec<_>>()
        } else {
            thread::scope(|scope| {
                let handles: Vec<_> = arms
                    .iter()
                    .map(|arm| {
                        let base = base.clone();
                        let retries = state.retries.clone();
                        scope.spawn(move || {
                            let mut forked = ExecState {
                                vars: base,
                                retries,
                            };
                            self.execute_steps(&arm.steps, &mut forked, false, trace, cancel)
                                .map(|result| (result, forked.vars))
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(EngineError::Thread("branch task panicked".to_string()))
                        })
                    })
                    .collect::<Vec<_>>()
            })
        };

        let mut data = Map::new();
        data.insert("step".to_string(), Value::String(step_id.to_string()));
        data.insert("branches".to_string(), json!(arms.len()));
        trace.emit(EventType::ParallelMerge, data)?;

        let mut first_outcome: Option<RunResult> = None;
        let mut first_failure: Option<RunResult> = None;
        for result in results {
            let (nested, arm_vars) = result?;
            match nested {
                Some(run_result) if run_result.status == RunStatus::Completed => {
                    merge_bindings(&base, &arm_vars, &mut state.vars);
                    if first_outcome.is_none() {
                        first_outcome = Some(run_result);
                    }
                }
                Some(run_result) => {
                    if first_failure.is_none() {
                        first_failure = Some(run_result);
                    }
                }
                None => merge_bindings(&base, &arm_vars, &mut state.vars),
            }
        }

        if let Some(result) = first_outcome {
            return Ok(CoreOutcome::Finished(result));
        }
        if let Some(result) = first_failure {
            return Ok(CoreOutcome::Failed {
                kind: result.failure_kind.unwrap_or(FailureKind::Executor),
                message: result.error.unwrap_or_else(|| "parallel branch failed".to_string()),
            });
        }
        let mut extra = Map::new();
        extra.insert("branches".to_string(), json!(arms.len()));
        extra.insert("serialized".to_string(), Value::Bool(serialized));
        Ok(CoreOutcome::Success(extra))
    }

    /// Runs one serialized parallel arm with a forked scope.
    fn run_parallel_arm(
        &self,
        arm: &Branch,
        base: &Scope,
        state: &ExecState,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<(Option<RunResult>, Scope), EngineError> {
        let mut forked = ExecState {
            vars: base.clone(),
            retries: state.retries.clone(),
        };
        let result = self.execute_steps(&arm.steps, &mut forked, false, trace, cancel)?;
        Ok((result, forked.vars))
    }

    // ========================================================================
    // SECTION: For-Each Expansion
    // ========================================================================

    /// Expands a step over a list, sequentially or in parallel.
    fn run_for_each(
        &self,
        step: &Step,
        step_id: &str,
        state: &mut ExecState,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<StepFlow, EngineError> {
        let Some(for_each) = &step.for_each else {
            return self.run_step(step, step_id, state, trace, cancel);
        };
        let items = self.for_each_items(for_each, &state.vars)?;

        let mut data = Map::new();
        data.insert("step".to_string(), Value::String(step_id.to_string()));
        data.insert("count".to_string(), json!(items.len()));
        data.insert("parallel".to_string(), Value::Bool(for_each.parallel));
        trace.emit(EventType::ForEachStart, data)?;

        let mut sub_template = step.clone();
        sub_template.for_each = None;
        sub_template.when = None;
        sub_template.next = None;

        let mut list_acc: Vec<Value> = Vec::new();
        let mut map_acc: Map<String, Value> = Map::new();

        if for_each.parallel {
            let flow = self.for_each_parallel(
                step,
                step_id,
                for_each,
                &sub_template,
                &items,
                state,
                &mut list_acc,
                &mut map_acc,
                trace,
                cancel,
            )?;
            if let Some(result) = flow {
                state.vars.remove(&for_each.bind);
                return Ok(StepFlow::Finished(result));
            }
        } else {
            for (index, item) in items.iter().enumerate() {
                state.vars.insert(for_each.bind.clone(), item.clone());
                let mut data = Map::new();
                data.insert("step".to_string(), Value::String(step_id.to_string()));
                data.insert("index".to_string(), json!(index));
                trace.emit(EventType::ForEachItem, data)?;

                let synthetic = synthetic_id(step, step_id, index);
                let mut sub = sub_template.clone();
                sub.id = Some(synthetic.clone());
                let flow = self.run_step(&sub, &synthetic, state, trace, cancel)?;
                if let StepFlow::Finished(result) = flow {
                    state.vars.remove(&for_each.bind);
                    return Ok(StepFlow::Finished(result));
                }
                accumulate_iteration(
                    for_each,
                    &synthetic,
                    &state.vars,
                    &mut list_acc,
                    &mut map_acc,
                )?;
            }
        }

        state.vars.remove(&for_each.bind);
        if let Some(id) = &step.id {
            let accumulator = if for_each.key.is_some() {
                Value::Object(map_acc)
            } else {
                Value::Array(list_acc)
            };
            state.vars.insert(id.clone(), accumulator);
        }
        Ok(StepFlow::Continue)
    }

    /// Resolves the for-each item list from its `over` source.
    ///
    /// A direct reference to a list-valued variable yields it as-is; any
    /// other template resolves to a string split on commas.
    fn for_each_items(
        &self,
        for_each: &ForEach,
        vars: &Scope,
    ) -> Result<Vec<Value>, EngineError> {
        if let Some(reference) = direct_reference(&for_each.over)
            && let Some(Value::Array(items)) = lookup_path(vars, reference)
        {
            return Ok(items.clone());
        }
        let rendered = stringify(&expand(&for_each.over, vars)?);
        if rendered.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(rendered
            .split(',')
            .map(|item| Value::String(item.trim().to_string()))
            .collect())
    }

    /// Runs for-each iterations concurrently and merges in declaration
    /// order.
    #[allow(clippy::too_many_arguments, reason = "Fan-out plumbing needs the full context.")]
    fn for_each_parallel(
        &self,
        step: &Step,
        step_id: &str,
        for_each: &ForEach,
        sub_template: &Step,
        items: &[Value],
        state: &mut ExecState,
        list_acc: &mut Vec<Value>,
        map_acc: &mut Map<String, Value>,
        trace: &TraceWriter,
        cancel: &CancelToken,
    ) -> Result<Option<RunResult>, EngineError> {
        let base = state.vars.clone();
        let results: Vec<Result<(StepFlow, Scope), EngineError>> = thread::scope(|scope| {
            let handles: Vec<_> = items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    let mut vars = base.clone();
                    vars.insert(for_each.bind.clone(), item.clone());
                    let retries = state.retries.clone();
                    let synthetic = synthetic_id(step, step_id, index);
                    let mut sub = sub_template.clone();
                    sub.id = Some(synthetic.clone());
                    scope.spawn(move || {
                        let mut forked = ExecState {
                            vars,
                            retries,
                        };
                        let mut data = Map::new();
                        data.insert("step".to_string(), Value::String(step_id.to_string()));
                        data.insert("index".to_string(), json!(index));
                        trace.emit(EventType::ForEachItem, data)?;
                        let flow = self.run_step(&sub, &synthetic, &mut forked, trace, cancel)?;
                        Ok((flow, forked.vars))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(EngineError::Thread("for_each task panicked".to_string()))
                    })
                })
                .collect()
        });

        for (index, result) in results.into_iter().enumerate() {
            let (flow, iter_vars) = result?;
            if let StepFlow::Finished(run_result) = flow {
                return Ok(Some(run_result));
            }
            merge_bindings(&base, &iter_vars, &mut state.vars);
            let synthetic = synthetic_id(step, step_id, index);
            accumulate_iteration(for_each, &synthetic, &iter_vars, list_acc, map_acc)?;
        }
        Ok(None)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the base event data for a step.
fn step_data(step_id: &str, step: &Step) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("step".to_string(), Value::String(step_id.to_string()));
    data.insert("type".to_string(), Value::String(step.step_type.to_string()));
    data
}

/// Returns a branch arm label for trace events.
fn branch_label(arm: &Branch, index: usize) -> String {
    if arm.label.is_empty() { format!("branch[{index}]") } else { arm.label.clone() }
}

/// Builds the synthetic identifier for a for-each iteration.
fn synthetic_id(step: &Step, step_id: &str, index: usize) -> String {
    let base = step.id.as_deref().unwrap_or(step_id);
    format!("{base}[{index}]")
}

/// Merges an arm's new-or-changed bindings into the parent scope.
fn merge_bindings(base: &Scope, arm_vars: &Scope, parent: &mut Scope) {
    for (key, value) in diff_scope(base, arm_vars) {
        parent.insert(key, value);
    }
}

/// Appends one iteration's output to the for-each accumulator.
fn accumulate_iteration(
    for_each: &ForEach,
    synthetic: &str,
    iter_vars: &Scope,
    list_acc: &mut Vec<Value>,
    map_acc: &mut Map<String, Value>,
) -> Result<(), EngineError> {
    let output = iter_vars.get(synthetic).cloned().unwrap_or(Value::Null);
    match &for_each.key {
        Some(key_template) => {
            let key = stringify(&expand(key_template, iter_vars)?);
            if map_acc.contains_key(&key) {
                return Err(EngineError::DuplicateForEachKey {
                    key,
                });
            }
            map_acc.insert(key, output);
        }
        None => list_acc.push(output),
    }
    Ok(())
}
