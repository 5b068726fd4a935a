// crates/runbook-kernel-core/src/runtime/inputs.rs
// ============================================================================
// Module: Input Resolution
// Description: Pre-execution resolution of declared runbook inputs.
// Purpose: Resolve every input from host vars, external resolvers, or
//          defaults before the engine starts, fail-closed on required gaps.
// Dependencies: crate::interfaces, crate::runtime::result, crate::schema,
// runbook-kernel-trace
// ============================================================================

//! ## Overview
//! Inputs resolve in strict precedence: host-supplied values always win,
//! then an external resolver matching the input's `from` prefix, then the
//! declared default. A required input that stays unresolved aborts the run
//! before any step executes. Every resolution emits an `input_resolved`
//! trace event tagged with its source.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use runbook_kernel_trace::EventType;
use runbook_kernel_trace::TraceWriter;
use serde_json::Map;
use serde_json::Value;

use crate::interfaces::InputResolver;
use crate::runtime::result::EngineError;
use crate::schema::Meta;
use crate::scope::Scope;

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Resolves all declared inputs against hosts, resolvers, and defaults.
///
/// # Errors
///
/// Returns [`EngineError`] when a required input stays unresolved, a
/// resolver fails, or trace emission fails.
pub fn resolve_inputs(
    meta: &Meta,
    host: &BTreeMap<String, Value>,
    resolvers: &[&dyn InputResolver],
    trace: &TraceWriter,
) -> Result<Scope, EngineError> {
    let mut resolved = Scope::new();
    for (name, def) in &meta.inputs {
        let (value, source) = if let Some(value) = host.get(name) {
            (Some(value.clone()), "host".to_string())
        } else if let Some((value, source)) = resolve_binding(def.from.as_deref(), resolvers)? {
            (Some(value), source)
        } else if let Some(default) = &def.default {
            (Some(default.clone()), "default".to_string())
        } else {
            (None, String::new())
        };

        match value {
            Some(value) => {
                let mut data = Map::new();
                data.insert("input".to_string(), Value::String(name.clone()));
                data.insert("source".to_string(), Value::String(source));
                trace.emit(EventType::InputResolved, data)?;
                resolved.insert(name.clone(), value);
            }
            None if def.required => {
                return Err(EngineError::InputUnresolved { name: name.clone() });
            }
            None => {}
        }
    }
    Ok(resolved)
}

/// Resolves a `from` binding through the first resolver matching its prefix.
fn resolve_binding(
    binding: Option<&str>,
    resolvers: &[&dyn InputResolver],
) -> Result<Option<(Value, String)>, EngineError> {
    let Some(binding) = binding else {
        return Ok(None);
    };
    let Some((prefix, _)) = binding.split_once(':') else {
        return Ok(None);
    };
    for resolver in resolvers {
        if resolver.prefix() == prefix {
            let value = resolver.resolve(binding)?;
            return Ok(Some((value, format!("resolver:{prefix}"))));
        }
    }
    Ok(None)
}
