// crates/runbook-kernel-contract/src/tristate.rs
// ============================================================================
// Module: Tri-State Contract Attribute
// Description: Three-valued boolean attribute for behavioural contracts.
// Purpose: Distinguish "not declared" from an explicit true or false.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Contract attributes are tri-state: a step or action either inherits the
//! parent value (`Unset`) or pins it explicitly (`True` / `False`). The wire
//! form is an optional boolean, so absent YAML keys decode to `Unset`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

// ============================================================================
// SECTION: TriBool
// ============================================================================

/// Three-valued boolean contract attribute.
///
/// # Invariants
/// - `Unset` means "inherit the parent default"; it is never written to the
///   wire as an explicit value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TriBool {
    /// Attribute was not declared; inherit the parent value.
    #[default]
    Unset,
    /// Attribute is explicitly true.
    True,
    /// Attribute is explicitly false.
    False,
}

impl TriBool {
    /// Returns true when the attribute was not declared.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Returns the explicit value, or `None` when unset.
    #[must_use]
    pub const fn as_option(self) -> Option<bool> {
        match self {
            Self::Unset => None,
            Self::True => Some(true),
            Self::False => Some(false),
        }
    }

    /// Builds a tri-state attribute from an optional boolean.
    #[must_use]
    pub const fn from_option(value: Option<bool>) -> Self {
        match value {
            None => Self::Unset,
            Some(true) => Self::True,
            Some(false) => Self::False,
        }
    }

    /// Resolves the attribute against a default for unset values.
    #[must_use]
    pub const fn resolve(self, default: bool) -> bool {
        match self {
            Self::Unset => default,
            Self::True => true,
            Self::False => false,
        }
    }

    /// Returns `other` when it is explicitly set, otherwise `self`.
    #[must_use]
    pub const fn overridden_by(self, other: Self) -> Self {
        match other {
            Self::Unset => self,
            explicit => explicit,
        }
    }
}

impl From<bool> for TriBool {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl fmt::Display for TriBool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("unset"),
            Self::True => f.write_str("true"),
            Self::False => f.write_str("false"),
        }
    }
}

impl Serialize for TriBool {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_option().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TriBool {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<bool>::deserialize(deserializer).map(Self::from_option)
    }
}
