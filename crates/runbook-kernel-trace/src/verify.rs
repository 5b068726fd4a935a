// crates/runbook-kernel-trace/src/verify.rs
// ============================================================================
// Module: Trace Chain Verifier
// Description: Offline verification of hash-chained trace files.
// Purpose: Detect tampering and validate the optional chain-hash signature.
// Dependencies: crate::event, crate::hashing, serde_json
// ============================================================================

//! ## Overview
//! The verifier scans a JSONL trace line by line, checking that every event's
//! `prev_hash` equals the rolling SHA-256 of the previous raw line, starting
//! from the all-zeros genesis hash. A single flipped byte breaks verification
//! at that line or the next. When the last event carries a signature, the
//! verifier recomputes the HMAC with the key from the environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::event::GENESIS_PREV_HASH;
use crate::event::TraceEvent;
use crate::hashing::SIGNING_KEY_ENV;
use crate::hashing::hash_line;
use crate::hashing::sign_chain_hash;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while reading a trace file for verification.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The trace file could not be read.
    #[error("trace read error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Signature verification status for a trace.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    /// No signature was present on the terminal event.
    Absent,
    /// Signature recomputed and matched.
    Ok,
    /// Signature present but no key is configured in the environment.
    NoKey,
    /// Signature present and the recomputed value did not match.
    Invalid,
}

/// Result of verifying a trace file.
///
/// # Invariants
/// - `broken_at` is 1-based and set exactly when `valid` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// True when the whole chain verified cleanly.
    pub valid: bool,
    /// Number of events scanned.
    pub event_count: usize,
    /// Rolling chain hash after the last verified line.
    pub chain_hash: String,
    /// 1-based index of the first broken line, when invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<usize>,
    /// Human-readable diagnostic, when invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    /// Signature verification status.
    pub signature: SignatureStatus,
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies a trace file on disk.
///
/// # Errors
///
/// Returns [`VerifyError`] when the file cannot be read; verification
/// failures are reported in the [`VerifyReport`], not as errors.
pub fn verify_trace_file(path: &Path) -> Result<VerifyReport, VerifyError> {
    let content = fs::read_to_string(path).map_err(|err| VerifyError::Io(err.to_string()))?;
    Ok(verify_trace(&content))
}

/// Verifies trace content, taking the signing key from the environment.
#[must_use]
pub fn verify_trace(content: &str) -> VerifyReport {
    let key = std::env::var(SIGNING_KEY_ENV).ok().filter(|key| !key.is_empty());
    verify_trace_with_key(content, key.as_deref().map(str::as_bytes))
}

/// Verifies trace content with an explicit signing key.
#[must_use]
pub fn verify_trace_with_key(content: &str, key: Option<&[u8]>) -> VerifyReport {
    let mut rolling = GENESIS_PREV_HASH.to_string();
    let mut event_count = 0_usize;
    let mut last_event: Option<TraceEvent> = None;

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index + 1;
        let event: TraceEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                return broken(event_count, rolling, line_no, format!("malformed event: {err}"));
            }
        };
        if event.prev_hash != rolling {
            return broken(
                event_count,
                rolling.clone(),
                line_no,
                format!(
                    "prev_hash mismatch: expected {rolling}, found {found}",
                    found = event.prev_hash
                ),
            );
        }
        rolling = hash_line(line);
        event_count += 1;
        last_event = Some(event);
    }

    let signature =
        last_event.as_ref().map_or(SignatureStatus::Absent, |event| check_signature(event, key));
    VerifyReport {
        valid: true,
        event_count,
        chain_hash: rolling,
        broken_at: None,
        diagnostic: None,
        signature,
    }
}

/// Builds a failed report for a broken line.
fn broken(
    event_count: usize,
    chain_hash: String,
    line_no: usize,
    diagnostic: String,
) -> VerifyReport {
    VerifyReport {
        valid: false,
        event_count,
        chain_hash,
        broken_at: Some(line_no),
        diagnostic: Some(diagnostic),
        signature: SignatureStatus::Absent,
    }
}

/// Checks the signature of the terminal event, when present.
fn check_signature(event: &TraceEvent, key: Option<&[u8]>) -> SignatureStatus {
    let (Some(chain_hash), Some(signature)) = (&event.chain_hash, &event.signature) else {
        return SignatureStatus::Absent;
    };
    let Some(key) = key else {
        return SignatureStatus::NoKey;
    };
    match sign_chain_hash(chain_hash, key) {
        Ok(expected) if expected == *signature => SignatureStatus::Ok,
        Ok(_) => SignatureStatus::Invalid,
        Err(_) => SignatureStatus::Invalid,
    }
}
