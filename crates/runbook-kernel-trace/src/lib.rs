// crates/runbook-kernel-trace/src/lib.rs
// ============================================================================
// Module: Runbook Kernel Trace Library
// Description: Hash-chained trace events, writer, and verifier.
// Purpose: Provide the tamper-evident run log every execution emits.
// Dependencies: hmac, serde, serde_jcs, serde_json, sha2, time
// ============================================================================

//! ## Overview
//! Runbook Kernel Trace implements the append-only, hash-chained JSONL run
//! log: typed events, a mutex-guarded writer with secret redaction and
//! optional HMAC signing of the terminal chain hash, and an offline verifier.
//! Invariants:
//! - Every event's `prev_hash` is the SHA-256 of the previous serialized
//!   line; the first event chains from the all-zeros genesis hash.
//! - The writer is the only shared mutable resource during concurrent
//!   execution; emission is serialized by its internal mutex.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod event;
pub mod hashing;
pub mod verify;
pub mod writer;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use event::EventType;
pub use event::GENESIS_PREV_HASH;
pub use event::TraceEvent;
pub use hashing::SIGNING_KEY_ENV;
pub use hashing::SIGNING_KEY_ID_ENV;
pub use hashing::SigningError;
pub use hashing::hash_line;
pub use hashing::sign_chain_hash;
pub use verify::SignatureStatus;
pub use verify::VerifyError;
pub use verify::VerifyReport;
pub use verify::verify_trace;
pub use verify::verify_trace_file;
pub use verify::verify_trace_with_key;
pub use writer::REDACTED;
pub use writer::SharedBuffer;
pub use writer::SigningKey;
pub use writer::TraceError;
pub use writer::TraceWriter;
