//! # Core Type Definitions
//!
//! This module contains the value types shared by every engine:
//! - Identifiers (`NodeId`, `EdgeId`)
//! - Time (`Timestamp`)
//! - Fixed-point weights (`Score`)
//! - Records (`MemoryNode`, `MemoryEdge`) in the `node` and `edge` submodules
//! - Error types (`EngramError`)
//!
//! ## Determinism Guarantees
//!
//! - Confidence and strength are integer thousandths, never floats at rest
//! - All identifiers implement `Ord` for `BTreeMap`/`BTreeSet` ordering
//! - Floats appear only at the human-readable wire boundary (JSON, TOML)

mod edge;
mod node;

pub use edge::{Direction, MemoryEdge, Relationship};
pub use node::{ContentHash, Impact, MemoryNode, NodeKind, NodeStatus};

use crate::primitives::SCORE_SCALE;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a memory node.
///
/// Allocated from a persisted counter starting at 1 and never reused.
/// `NodeId::UNASSIGNED` marks a draft that has not been committed yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Placeholder id carried by drafts before commit.
    pub const UNASSIGNED: Self = Self(0);

    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of an edge. Same allocation rules as [`NodeId`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EdgeId(pub u64);

impl EdgeId {
    /// Placeholder id carried by drafts before commit.
    pub const UNASSIGNED: Self = Self(0);

    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

// =============================================================================
// TIMESTAMP
// =============================================================================

/// Seconds since the Unix epoch (UTC).
///
/// Serialized as an RFC 3339 string on human-readable formats and as a
/// plain integer in the binary record format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time, truncated to whole seconds.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc().unix_timestamp())
    }

    #[must_use]
    pub const fn from_unix(secs: i64) -> Self {
        Self(secs)
    }

    #[must_use]
    pub const fn as_unix(self) -> i64 {
        self.0
    }

    /// Parse an RFC 3339 timestamp such as `2024-03-01T09:30:00Z`.
    pub fn parse_rfc3339(text: &str) -> Result<Self, EngramError> {
        OffsetDateTime::parse(text.trim(), &Rfc3339)
            .map(|dt| Self(dt.unix_timestamp()))
            .map_err(|e| EngramError::InvalidField {
                field: "timestamp",
                reason: format!("'{}' is not RFC 3339: {}", text, e),
            })
    }

    /// Format as RFC 3339; falls back to the raw integer when out of range.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        OffsetDateTime::from_unix_timestamp(self.0)
            .ok()
            .and_then(|dt| dt.format(&Rfc3339).ok())
            .unwrap_or_else(|| self.0.to_string())
    }

    /// Absolute distance in seconds between two timestamps.
    #[must_use]
    pub const fn abs_diff(self, other: Self) -> u64 {
        self.0.abs_diff(other.0)
    }

    #[must_use]
    pub const fn saturating_sub_secs(self, secs: i64) -> Self {
        Self(self.0.saturating_sub(secs))
    }

    #[must_use]
    pub const fn saturating_add_secs(self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_rfc3339())
        } else {
            serializer.serialize_i64(self.0)
        }
    }
}

struct TimestampVisitor;

impl Visitor<'_> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an RFC 3339 timestamp or unix seconds")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
        Ok(Timestamp(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
        i64::try_from(v)
            .map(Timestamp)
            .map_err(|_| E::custom("unix seconds out of range"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
        Timestamp::parse_rfc3339(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(TimestampVisitor)
        } else {
            deserializer.deserialize_i64(TimestampVisitor)
        }
    }
}

// =============================================================================
// SCORE (fixed-point 0.000 ..= 1.000)
// =============================================================================

/// A confidence or strength value in thousandths.
///
/// `Score::from_permille(700)` is 0.7. Values above 1000 are clamped on
/// construction. Human-readable formats carry the value as a fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Score(u16);

impl Score {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(SCORE_SCALE);

    #[must_use]
    pub const fn from_permille(value: u16) -> Self {
        if value > SCORE_SCALE {
            Self(SCORE_SCALE)
        } else {
            Self(value)
        }
    }

    #[must_use]
    pub const fn permille(self) -> u16 {
        self.0
    }

    /// Convert a fraction in `[0.0, 1.0]`, rounding to the nearest thousandth.
    ///
    /// `field` names the offending field in the `InvalidField` error.
    #[allow(clippy::float_arithmetic)]
    pub fn from_fraction(field: &'static str, value: f64) -> Result<Self, EngramError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(EngramError::InvalidField {
                field,
                reason: format!("{} is outside [0.0, 1.0]", value),
            });
        }
        Ok(Self((value * f64::from(SCORE_SCALE)).round() as u16))
    }

    #[allow(clippy::float_arithmetic)]
    #[must_use]
    pub fn as_fraction(self) -> f64 {
        f64::from(self.0) / f64::from(SCORE_SCALE)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / SCORE_SCALE, self.0 % SCORE_SCALE)
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_f64(self.as_fraction())
        } else {
            serializer.serialize_u16(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Score {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let value = f64::deserialize(deserializer)?;
            Self::from_fraction("score", value).map_err(de::Error::custom)
        } else {
            let value = u16::deserialize(deserializer)?;
            if value > SCORE_SCALE {
                return Err(de::Error::custom("score out of range"));
            }
            Ok(Self(value))
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors reported by the store and its engines.
///
/// - No silent failures; every variant reaches the caller
/// - Nothing is retried inside the core
/// - `DanglingReference` and `SupersessionCycle` abort the enclosing batch
#[derive(Debug, Error)]
pub enum EngramError {
    /// The requested node id is unknown.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The requested edge id is unknown.
    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    /// A reference (edge endpoint or `superseded_by`) names a missing node.
    #[error("Dangling reference: {context} points at missing node {missing}")]
    DanglingReference {
        /// Which reference was dangling, e.g. `"edge to_id"`.
        context: &'static str,
        missing: NodeId,
    },

    /// An edge from a node to itself.
    #[error("Self loop on node {0}")]
    SelfLoop(NodeId),

    /// Following `superseded_by` pointers from this node returns to it.
    #[error("Supersession cycle through node {0}")]
    SupersessionCycle(NodeId),

    /// Path search exhausted its hop budget.
    #[error("No path from {from} to {to} within {max_hops} hops")]
    NoPathWithinBound {
        from: NodeId,
        to: NodeId,
        max_hops: usize,
    },

    /// A walk was cancelled or hit its deadline between hop expansions.
    #[error("Walk cancelled or timed out after {hops_completed} hops ({visited} nodes visited)")]
    CancelledOrTimedOut {
        visited: usize,
        hops_completed: usize,
    },

    /// A record field failed structural validation.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O or database error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// A store lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl EngramError {
    /// True for failures that indicate a store integrity violation.
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::DanglingReference { .. } | Self::SupersessionCycle(_)
        )
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
