// crates/runbook-kernel-trace/src/writer.rs
// ============================================================================
// Module: Hash-Chained Trace Writer
// Description: Append-only JSONL emission with per-event prev-hash chaining.
// Purpose: Produce tamper-evident run logs with redaction and optional
//          chain-hash signing.
// Dependencies: crate::event, crate::hashing, serde_jcs, serde_json, time
// ============================================================================

//! ## Overview
//! The writer serializes every event canonically (RFC 8785) onto a single
//! line, chains lines by SHA-256, and appends them to the configured sink
//! behind a mutex. Registered secret values are substring-replaced with
//! `<REDACTED>` before emission. The terminal `run_complete` event embeds the
//! rolling chain hash and, when a signing key is configured, an HMAC-SHA256
//! signature over it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::event::EventType;
use crate::event::GENESIS_PREV_HASH;
use crate::event::TraceEvent;
use crate::hashing::SIGNING_KEY_ENV;
use crate::hashing::SIGNING_KEY_ID_ENV;
use crate::hashing::SigningError;
use crate::hashing::hash_line;
use crate::hashing::sign_chain_hash;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Replacement string for redacted secret values.
pub const REDACTED: &str = "<REDACTED>";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the trace writer.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum TraceError {
    /// Underlying sink failed.
    #[error("trace io error: {0}")]
    Io(String),
    /// Event serialization failed.
    #[error("trace serialization error: {0}")]
    Serialize(String),
    /// Timestamp formatting failed.
    #[error("trace timestamp error: {0}")]
    Timestamp(String),
    /// Chain-hash signing failed.
    #[error("trace signing error: {0}")]
    Signing(#[from] SigningError),
}

// ============================================================================
// SECTION: Signing Configuration
// ============================================================================

/// Signing key configuration for the terminal chain hash.
///
/// # Invariants
/// - `key` is non-empty.
#[derive(Debug, Clone)]
pub struct SigningKey {
    /// Raw HMAC key bytes.
    pub key: Vec<u8>,
    /// Optional key identifier recorded next to the signature.
    pub key_id: Option<String>,
}

impl SigningKey {
    /// Loads the signing key from the environment, if configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let key = std::env::var(SIGNING_KEY_ENV).ok()?;
        if key.is_empty() {
            return None;
        }
        Some(Self {
            key: key.into_bytes(),
            key_id: std::env::var(SIGNING_KEY_ID_ENV).ok(),
        })
    }
}

// ============================================================================
// SECTION: Writer State
// ============================================================================

/// Mutable writer state guarded by the writer mutex.
struct WriterState {
    /// Output sink receiving serialized lines.
    out: Box<dyn Write + Send>,
    /// Rolling previous-line hash.
    prev_hash: String,
    /// Secret values to redact from emitted data.
    secrets: Vec<String>,
}

/// Hash-chained trace writer (append-only).
///
/// # Invariants
/// - Events are written and hashed under a single mutex, so the chain is
///   linear even under concurrent emission.
pub struct TraceWriter {
    /// Run identifier stamped on every event.
    run_id: String,
    /// Signing configuration for the terminal event.
    signing: Option<SigningKey>,
    /// Guarded sink and chain state.
    state: Mutex<WriterState>,
}

impl TraceWriter {
    /// Creates a writer over an arbitrary sink.
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>, run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            signing: SigningKey::from_env(),
            state: Mutex::new(WriterState {
                out,
                prev_hash: GENESIS_PREV_HASH.to_string(),
                secrets: Vec::new(),
            }),
        }
    }

    /// Opens an append-only trace file and creates a writer over it.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Io`] when the file cannot be opened.
    pub fn to_file(path: &Path, run_id: impl Into<String>) -> Result<Self, TraceError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| TraceError::Io(err.to_string()))?;
        Ok(Self::new(Box::new(file), run_id))
    }

    /// Replaces the signing configuration.
    #[must_use]
    pub fn with_signing(mut self, signing: Option<SigningKey>) -> Self {
        self.signing = signing;
        self
    }

    /// Registers environment variable names whose values must be redacted.
    ///
    /// Unset or empty variables are ignored. Registration is additive.
    pub fn set_secrets(&self, env_var_names: &[String]) {
        let values: Vec<String> = env_var_names
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .filter(|value| !value.is_empty())
            .collect();
        self.set_secret_values(&values);
    }

    /// Registers literal secret values to redact from emitted data.
    pub fn set_secret_values(&self, values: &[String]) {
        if let Ok(mut state) = self.state.lock() {
            state.secrets.extend(values.iter().filter(|value| !value.is_empty()).cloned());
        }
    }

    /// Returns the run identifier stamped on events.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the current chain hash (the prev-hash of the next event).
    #[must_use]
    pub fn chain_hash(&self) -> String {
        self.state
            .lock()
            .map(|state| state.prev_hash.clone())
            .unwrap_or_else(|_| GENESIS_PREV_HASH.to_string())
    }

    /// Emits a trace event.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError`] when serialization or the sink fails.
    pub fn emit(&self, event_type: EventType, data: Map<String, Value>) -> Result<(), TraceError> {
        let timestamp = now_rfc3339()?;
        let mut state =
            self.state.lock().map_err(|_| TraceError::Io("trace writer poisoned".to_string()))?;
        let (data, applied) = redact_map(data, &state.secrets);
        write_event(
            &mut state,
            TraceEvent {
                event_type,
                timestamp,
                run_id: self.run_id.clone(),
                data,
                prev_hash: String::new(),
                chain_hash: None,
                signature: None,
                signing_key_id: None,
            },
        )?;
        if applied {
            let timestamp = now_rfc3339()?;
            let mut data = Map::new();
            data.insert("applied_to".to_string(), Value::String(event_type.to_string()));
            write_event(
                &mut state,
                TraceEvent {
                    event_type: EventType::RedactionApplied,
                    timestamp,
                    run_id: self.run_id.clone(),
                    data,
                    prev_hash: String::new(),
                    chain_hash: None,
                    signature: None,
                    signing_key_id: None,
                },
            )?;
        }
        Ok(())
    }

    /// Emits the terminal `run_complete` event with the embedded chain hash
    /// and optional signature.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError`] when serialization, signing, or the sink fails.
    pub fn emit_complete(&self, data: Map<String, Value>) -> Result<(), TraceError> {
        let timestamp = now_rfc3339()?;
        let mut state =
            self.state.lock().map_err(|_| TraceError::Io("trace writer poisoned".to_string()))?;
        let (data, _) = redact_map(data, &state.secrets);
        let chain_hash = state.prev_hash.clone();
        let (signature, signing_key_id) = match &self.signing {
            Some(signing) => (
                Some(sign_chain_hash(&chain_hash, &signing.key)?),
                signing.key_id.clone(),
            ),
            None => (None, None),
        };
        write_event(
            &mut state,
            TraceEvent {
                event_type: EventType::RunComplete,
                timestamp,
                run_id: self.run_id.clone(),
                data,
                prev_hash: String::new(),
                chain_hash: Some(chain_hash),
                signature,
                signing_key_id,
            },
        )
    }
}

/// Serializes and appends one event, advancing the rolling hash.
fn write_event(state: &mut WriterState, mut event: TraceEvent) -> Result<(), TraceError> {
    event.prev_hash = state.prev_hash.clone();
    let line =
        serde_jcs::to_string(&event).map_err(|err| TraceError::Serialize(err.to_string()))?;
    writeln!(state.out, "{line}").map_err(|err| TraceError::Io(err.to_string()))?;
    state.out.flush().map_err(|err| TraceError::Io(err.to_string()))?;
    state.prev_hash = hash_line(&line);
    Ok(())
}

/// Formats the current UTC time as RFC 3339.
fn now_rfc3339() -> Result<String, TraceError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|err| TraceError::Timestamp(err.to_string()))
}

// ============================================================================
// SECTION: Redaction
// ============================================================================

/// Redacts secret values from an event data map.
///
/// Returns the redacted map and whether any replacement occurred.
fn redact_map(data: Map<String, Value>, secrets: &[String]) -> (Map<String, Value>, bool) {
    if secrets.is_empty() {
        return (data, false);
    }
    let mut applied = false;
    let redacted = data
        .into_iter()
        .map(|(key, value)| (key, redact_value(value, secrets, &mut applied)))
        .collect();
    (redacted, applied)
}

/// Recursively redacts secret substrings from a value.
fn redact_value(value: Value, secrets: &[String], applied: &mut bool) -> Value {
    match value {
        Value::String(text) => {
            let mut out = text;
            for secret in secrets {
                if out.contains(secret.as_str()) {
                    out = out.replace(secret.as_str(), REDACTED);
                    *applied = true;
                }
            }
            Value::String(out)
        }
        Value::Array(items) => Value::Array(
            items.into_iter().map(|item| redact_value(item, secrets, applied)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter().map(|(key, item)| (key, redact_value(item, secrets, applied))).collect(),
        ),
        other => other,
    }
}

// ============================================================================
// SECTION: Shared Buffer Sink
// ============================================================================

/// Cloneable in-memory sink for tests and in-process streaming consumers.
///
/// # Invariants
/// - All clones share the same underlying buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    /// Shared byte buffer.
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Creates an empty shared buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the buffered content as UTF-8 text.
    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut bytes = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::other("shared buffer poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
