// crates/runbook-kernel-contract/src/tool.rs
// ============================================================================
// Module: Tool Definitions
// Description: Typed tool definition documents and action contracts.
// Purpose: Describe invocable tools, their transports, and per-action
//          behavioural contracts with tighten-on-load validation.
// Dependencies: crate::contract, serde, thiserror
// ============================================================================

//! ## Overview
//! A tool definition (`api_version: tool/v0`) declares how a tool is invoked
//! (transport, binary, argv/method), what it promises behaviourally (a base
//! contract, optionally tightened per action), and how outputs are extracted
//! from its raw responses. Action contracts must be legal tightenings of the
//! tool contract; this is checked when the definition is validated, before
//! any execution.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::contract::Contract;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Required `api_version` for tool definition documents.
pub const TOOL_API_VERSION: &str = "tool/v0";

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Transport used to invoke a tool.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Spawn the binary and exchange stdin/stdout.
    #[default]
    Stdio,
    /// JSON-RPC 2.0 over a persistent child process.
    Jsonrpc,
    /// Model Context Protocol host adapter.
    Mcp,
}

// ============================================================================
// SECTION: Extraction Rules
// ============================================================================

/// Source stream an extract rule reads from.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractSource {
    /// Raw standard output.
    Stdout,
    /// Raw standard error.
    Stderr,
    /// Parsed JSON body of standard output.
    Json,
}

/// Rule describing how to extract one named output from a tool response.
///
/// # Invariants
/// - `pattern` applies to `stdout`/`stderr` sources; `path` applies to the
///   `json` source. At most one of the two is meaningful per rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractRule {
    /// Source stream the rule reads from.
    pub from: ExtractSource,
    /// Optional regex with one capture group applied to text sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Optional dotted JSON path applied to the `json` source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// ============================================================================
// SECTION: Tool Metadata
// ============================================================================

/// Tool metadata block.
///
/// # Invariants
/// - `name` is the stable identifier runbooks reference in `meta.tools`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolMeta {
    /// Stable tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Transport used to invoke the tool.
    #[serde(default)]
    pub transport: Transport,
    /// Binary path or command name for process transports.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub binary: String,
    /// Operating systems the tool supports (empty = any).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platform: Vec<String>,
    /// Environment variable names holding secrets the tool consumes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
}

// ============================================================================
// SECTION: Tool Actions
// ============================================================================

/// Single invocable action of a tool.
///
/// # Invariants
/// - Exactly one of `argv` / `method` / `mcp_tool` is meaningful, matching
///   the tool transport.
/// - `contract`, when present, must tighten the tool-level contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolAction {
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Argument vector for stdio transports; values may be templates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub argv: Vec<String>,
    /// JSON-RPC method name for jsonrpc transports.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// MCP tool name for mcp transports.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mcp_tool: String,
    /// Output extraction rules keyed by output name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extract: BTreeMap<String, ExtractRule>,
    /// Optional action-level contract tightening the tool contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<Contract>,
}

// ============================================================================
// SECTION: Tool Definition
// ============================================================================

/// Complete tool definition document.
///
/// # Invariants
/// - `api_version` equals [`TOOL_API_VERSION`].
/// - Every action contract is a legal tightening of `contract`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDefinition {
    /// Document API version; must equal `tool/v0`.
    pub api_version: String,
    /// Tool metadata.
    pub meta: ToolMeta,
    /// Base behavioural contract for all actions.
    #[serde(default)]
    pub contract: Contract,
    /// Named actions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, ToolAction>,
}

/// Errors raised while validating a tool definition.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ToolDefinitionError {
    /// The document carried an unexpected `api_version`.
    #[error("tool '{name}': api_version must be '{expected}', got '{actual}'")]
    ApiVersion {
        /// Tool name.
        name: String,
        /// Required version string.
        expected: &'static str,
        /// Version found in the document.
        actual: String,
    },
    /// An action contract illegally relaxed the tool contract.
    #[error("tool '{name}' action '{action}': {violation}")]
    ContractTightening {
        /// Tool name.
        name: String,
        /// Action name.
        action: String,
        /// First tightening violation message.
        violation: String,
    },
}

impl ToolDefinition {
    /// Validates the document shape and action contract tightening.
    ///
    /// # Errors
    ///
    /// Returns [`ToolDefinitionError`] on an unexpected `api_version` or an
    /// action contract that relaxes the tool contract.
    pub fn validate(&self) -> Result<(), ToolDefinitionError> {
        if self.api_version != TOOL_API_VERSION {
            return Err(ToolDefinitionError::ApiVersion {
                name: self.meta.name.clone(),
                expected: TOOL_API_VERSION,
                actual: self.api_version.clone(),
            });
        }
        for (action_name, action) in &self.actions {
            if let Some(action_contract) = &action.contract {
                let violations = self.contract.can_tighten(action_contract);
                if let Some(violation) = violations.into_iter().next() {
                    return Err(ToolDefinitionError::ContractTightening {
                        name: self.meta.name.clone(),
                        action: action_name.clone(),
                        violation,
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolves the effective contract for an action.
    ///
    /// The result is the tool contract merged with the action contract when
    /// one is declared, otherwise the tool contract alone.
    #[must_use]
    pub fn action_contract(&self, action_name: &str) -> Contract {
        match self.actions.get(action_name).and_then(|action| action.contract.as_ref()) {
            Some(action_contract) => self.contract.merge(action_contract),
            None => self.contract.clone(),
        }
    }
}
