// crates/runbook-kernel-core/src/scope.rs
// ============================================================================
// Module: Variable Scope
// Description: Mutable variable scope with dotted-path access and visibility.
// Purpose: Hold run variables, support forked copies for concurrency, and
//          apply visibility globs to dot-paths.
// Dependencies: globset, serde_json
// ============================================================================

//! ## Overview
//! The scope maps variable names to heterogeneous values. It is created at
//! run start from constants plus resolved inputs, mutated by step output
//! assignments, and deep-copied on parallel fork, for-each-parallel, and
//! scope entry. Dotted paths resolve by checking the flat key first and then
//! walking nested objects and arrays, so `step.key` works whether the value
//! was bound flat or nested.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use globset::GlobBuilder;
use globset::GlobSet;
use globset::GlobSetBuilder;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Scope Type
// ============================================================================

/// Variable scope: an ordered mapping from names to values.
pub type Scope = BTreeMap<String, Value>;

/// Resolves a dotted path against the scope.
///
/// The full dotted key is checked first; otherwise the path walks nested
/// objects by key and arrays by numeric index.
#[must_use]
pub fn lookup_path<'a>(scope: &'a Scope, path: &str) -> Option<&'a Value> {
    if let Some(value) = scope.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let root = segments.next()?;
    let mut current = scope.get(root)?;
    for segment in segments {
        current = descend(current, segment)?;
    }
    Some(current)
}

/// Descends one path segment into a value.
#[must_use]
pub fn descend<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    }
}

/// Inserts a value under a nested object keyed by `root`.
///
/// The root entry is created as an object when absent; a non-object root is
/// replaced.
pub fn insert_nested(scope: &mut Scope, root: &str, key: &str, value: Value) {
    let entry = scope
        .entry(root.to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(map) = entry {
        map.insert(key.to_string(), value);
    }
}

/// Inserts a value under a dotted sub-scope path.
///
/// `path` segments become nested objects rooted at the first segment;
/// non-object intermediates are replaced.
pub fn insert_scoped(scope: &mut Scope, path: &str, key: &str, value: Value) {
    let mut segments = path.split('.');
    let Some(root) = segments.next() else {
        scope.insert(key.to_string(), value);
        return;
    };
    let entry = scope
        .entry(root.to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(serde_json::Map::new());
    }
    let mut current = entry;
    for segment in segments {
        let Value::Object(map) = current else {
            return;
        };
        let slot = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(serde_json::Map::new());
        }
        current = slot;
    }
    if let Value::Object(map) = current {
        map.insert(key.to_string(), value);
    }
}

/// Returns the bindings of `child` that are new or changed relative to
/// `base`.
#[must_use]
pub fn diff_scope(base: &Scope, child: &Scope) -> Scope {
    child
        .iter()
        .filter(|(key, value)| base.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

// ============================================================================
// SECTION: Visibility
// ============================================================================

/// Errors raised while compiling visibility globs.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum VisibilityError {
    /// A glob pattern failed to compile.
    #[error("invalid visibility glob '{pattern}': {message}")]
    InvalidGlob {
        /// Offending pattern.
        pattern: String,
        /// Compiler diagnostic.
        message: String,
    },
}

/// Compiled visibility filter over dot-paths.
///
/// # Invariants
/// - Deny overrides allow.
/// - An empty allow set permits every path not denied; a non-empty allow set
///   denies everything it does not match.
#[derive(Debug)]
pub struct VisibilityFilter {
    /// Compiled allow globs.
    allow: GlobSet,
    /// True when at least one allow glob was declared.
    has_allow: bool,
    /// Compiled deny globs.
    deny: GlobSet,
}

impl VisibilityFilter {
    /// Compiles allow and deny glob lists.
    ///
    /// Globs use `*` for one dot-segment and `**` for zero or more; they are
    /// matched with the dot treated as the path separator.
    ///
    /// # Errors
    ///
    /// Returns [`VisibilityError`] when a pattern does not compile.
    pub fn compile(allow: &[String], deny: &[String]) -> Result<Self, VisibilityError> {
        Ok(Self {
            allow: build_globset(allow)?,
            has_allow: !allow.is_empty(),
            deny: build_globset(deny)?,
        })
    }

    /// Returns true when the dot-path remains visible.
    #[must_use]
    pub fn is_visible(&self, dot_path: &str) -> bool {
        let slashed = dot_path.replace('.', "/");
        if self.deny.is_match(&slashed) {
            return false;
        }
        if !self.has_allow {
            return true;
        }
        self.allow.is_match(&slashed)
    }
}

/// Compiles a list of dot-path globs into a glob set.
fn build_globset(patterns: &[String]) -> Result<GlobSet, VisibilityError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(&pattern.replace('.', "/"))
            .literal_separator(true)
            .build()
            .map_err(|err| VisibilityError::InvalidGlob {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| VisibilityError::InvalidGlob {
        pattern: String::new(),
        message: err.to_string(),
    })
}
