// crates/runbook-kernel-core/src/runtime/snapshot.rs
// ============================================================================
// Module: Run Snapshots
// Description: Serializable engine state for pause and resume.
// Purpose: Persist the mutable run state (scope and retry counters) to disk.
// Dependencies: crate::scope, serde, serde_json
// ============================================================================

//! ## Overview
//! A snapshot captures the engine's mutable state between steps: the
//! variable scope and the backward-jump retry counters. Snapshots are plain
//! JSON so external drivers can inspect them; the immutable runbook is not
//! embedded and must be re-loaded (and re-validated) on resume.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::scope::Scope;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while saving or loading snapshots.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Snapshot file could not be read or written.
    #[error("snapshot io error: {0}")]
    Io(String),
    /// Snapshot content failed to serialize or deserialize.
    #[error("snapshot format error: {0}")]
    Format(String),
}

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Serializable run state snapshot.
///
/// # Invariants
/// - `cursor` addresses the next top-level step index to execute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Variable scope at snapshot time.
    pub vars: Scope,
    /// Backward-jump retry counters keyed by target step id.
    pub retries: BTreeMap<String, u64>,
    /// Next top-level step index.
    pub cursor: usize,
}

impl RunSnapshot {
    /// Writes the snapshot as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] when serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| SnapshotError::Format(err.to_string()))?;
        fs::write(path, json).map_err(|err| SnapshotError::Io(err.to_string()))
    }

    /// Reads a snapshot from disk.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] when the read or parse fails.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let json = fs::read_to_string(path).map_err(|err| SnapshotError::Io(err.to_string()))?;
        serde_json::from_str(&json).map_err(|err| SnapshotError::Format(err.to_string()))
    }
}
