// crates/runbook-kernel-trace/src/hashing.rs
// ============================================================================
// Module: Trace Hashing
// Description: SHA-256 line hashing and HMAC-SHA256 chain-hash signing.
// Purpose: Provide the primitives the writer and verifier share.
// Dependencies: hmac, sha2
// ============================================================================

//! ## Overview
//! Trace lines are chained by SHA-256 over the raw serialized line bytes.
//! The terminal chain hash may be signed with HMAC-SHA256 using a key taken
//! from the environment; signatures are hex-encoded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use hmac::Hmac;
use hmac::Mac;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Environment Keys
// ============================================================================

/// Environment variable holding the HMAC signing key.
pub const SIGNING_KEY_ENV: &str = "RUNBOOK_KERNEL_TRACE_SIGNING_KEY";
/// Environment variable labeling the signing key.
pub const SIGNING_KEY_ID_ENV: &str = "RUNBOOK_KERNEL_TRACE_SIGNING_KEY_ID";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by signing operations.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The signing key was rejected by the MAC implementation.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Returns the SHA-256 hex digest of a serialized trace line.
#[must_use]
pub fn hash_line(line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(line.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Computes the hex HMAC-SHA256 signature of a chain hash.
///
/// # Errors
///
/// Returns [`SigningError`] when the key is rejected by the MAC
/// implementation.
pub fn sign_chain_hash(chain_hash: &str, key: &[u8]) -> Result<String, SigningError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|err| SigningError::InvalidKey(err.to_string()))?;
    mac.update(chain_hash.as_bytes());
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

/// Hex-encodes a byte slice with lowercase digits.
fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let hi = byte >> 4;
        let lo = byte & 0x0f;
        out.push(hex_digit(hi));
        out.push(hex_digit(lo));
    }
    out
}

/// Maps a nibble to its lowercase hex digit.
const fn hex_digit(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'a' + (nibble - 10)) as char,
    }
}
