// crates/runbook-kernel-core/src/loader.rs
// ============================================================================
// Module: Runbook and Tool Loader
// Description: Strict YAML decoding with input-hygiene guards.
// Purpose: Decode runbook and tool documents fail-closed and normalize
//          scope paths.
// Dependencies: crate::schema, runbook-kernel-contract, serde_yaml
// ============================================================================

//! ## Overview
//! The loader enforces input hygiene before decoding: path length caps, a
//! 1 MiB size limit, and mandatory UTF-8. Decoding is strict; unknown fields
//! anywhere in the document are structural errors. After decode, step scope
//! paths are normalized (`/` becomes `.`). Tool definitions additionally
//! validate their `api_version` and action-contract tightening at load.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use runbook_kernel_contract::ToolDefinition;
use runbook_kernel_contract::ToolDefinitionError;
use thiserror::Error;

use crate::schema::Runbook;
use crate::schema::Step;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum document size in bytes.
const MAX_FILE_BYTES: u64 = 1_048_576;
/// Maximum path length in bytes.
const MAX_PATH_BYTES: usize = 4_096;
/// Maximum path component length in bytes.
const MAX_PATH_COMPONENT_BYTES: usize = 255;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading documents.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Path exceeded the maximum length.
    #[error("document path exceeds max length ({MAX_PATH_BYTES} bytes)")]
    PathTooLong,
    /// A path component exceeded the maximum length.
    #[error("document path component too long (max {MAX_PATH_COMPONENT_BYTES} bytes)")]
    PathComponentTooLong,
    /// File exceeded the size limit.
    #[error("document exceeds size limit ({MAX_FILE_BYTES} bytes)")]
    TooLarge,
    /// File was not valid UTF-8.
    #[error("document must be utf-8")]
    NotUtf8,
    /// File could not be read.
    #[error("document read error: {0}")]
    Io(String),
    /// Strict YAML decode failed (unknown field, type mismatch, malformed
    /// document).
    #[error("document structure error: {0}")]
    Structure(String),
    /// Tool definition failed load-time validation.
    #[error(transparent)]
    ToolDefinition(#[from] ToolDefinitionError),
}

// ============================================================================
// SECTION: File Guards
// ============================================================================

/// Reads a document with path, size, and encoding guards applied.
///
/// # Errors
///
/// Returns [`LoadError`] when any guard rejects the input or the read
/// fails.
pub fn read_document(path: &Path) -> Result<String, LoadError> {
    let raw_path = path.as_os_str().as_encoded_bytes();
    if raw_path.len() > MAX_PATH_BYTES {
        return Err(LoadError::PathTooLong);
    }
    for component in path.components() {
        if component.as_os_str().as_encoded_bytes().len() > MAX_PATH_COMPONENT_BYTES {
            return Err(LoadError::PathComponentTooLong);
        }
    }
    let metadata = fs::metadata(path).map_err(|err| LoadError::Io(err.to_string()))?;
    if metadata.len() > MAX_FILE_BYTES {
        return Err(LoadError::TooLarge);
    }
    let bytes = fs::read(path).map_err(|err| LoadError::Io(err.to_string()))?;
    String::from_utf8(bytes).map_err(|_| LoadError::NotUtf8)
}

// ============================================================================
// SECTION: Runbook Loading
// ============================================================================

/// Decodes a runbook from YAML text.
///
/// # Errors
///
/// Returns [`LoadError::Structure`] on any decode failure, including
/// unknown fields.
pub fn load_runbook_str(yaml: &str) -> Result<Runbook, LoadError> {
    if yaml.len() as u64 > MAX_FILE_BYTES {
        return Err(LoadError::TooLarge);
    }
    let mut runbook: Runbook =
        serde_yaml::from_str(yaml).map_err(|err| LoadError::Structure(err.to_string()))?;
    normalize_steps(&mut runbook.steps);
    Ok(runbook)
}

/// Loads a runbook from disk.
///
/// # Errors
///
/// Returns [`LoadError`] when a guard rejects the file or decode fails.
pub fn load_runbook(path: &Path) -> Result<Runbook, LoadError> {
    load_runbook_str(&read_document(path)?)
}

/// Normalizes scope paths (`/` to `.`) across a step list.
fn normalize_steps(steps: &mut [Step]) {
    for step in steps {
        if let Some(scope) = &mut step.scope {
            *scope = scope.replace('/', ".");
        }
        for branch in &mut step.branches {
            normalize_steps(&mut branch.steps);
        }
    }
}

// ============================================================================
// SECTION: Tool Definition Loading
// ============================================================================

/// Decodes and validates a tool definition from YAML text.
///
/// # Errors
///
/// Returns [`LoadError`] on decode failure, a wrong `api_version`, or an
/// action contract that relaxes the tool contract.
pub fn load_tool_definition_str(yaml: &str) -> Result<ToolDefinition, LoadError> {
    if yaml.len() as u64 > MAX_FILE_BYTES {
        return Err(LoadError::TooLarge);
    }
    let definition: ToolDefinition =
        serde_yaml::from_str(yaml).map_err(|err| LoadError::Structure(err.to_string()))?;
    definition.validate()?;
    Ok(definition)
}

/// Loads a tool definition from disk.
///
/// # Errors
///
/// Returns [`LoadError`] when a guard rejects the file or validation fails.
pub fn load_tool_definition(path: &Path) -> Result<ToolDefinition, LoadError> {
    load_tool_definition_str(&read_document(path)?)
}
