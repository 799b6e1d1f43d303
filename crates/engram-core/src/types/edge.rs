//! Memory edge record and relationship vocabulary.

use super::{EdgeId, EngramError, NodeId, Score, Timestamp};
use crate::primitives::{MAX_LABEL_LENGTH, MAX_TEXT_LENGTH};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// RELATIONSHIP
// =============================================================================

/// Closed set of relationship types.
///
/// `Extension` carries names introduced after this vocabulary was fixed so
/// older stores can still load newer records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Relationship {
    // Causal
    CausedBy,
    LedTo,
    InfluencedBy,
    // Temporal
    Supersedes,
    PrecededBy,
    CooccurredWith,
    // Semantic
    Contradicts,
    Supports,
    DependsOn,
    Elaborates,
    RelatesTo,
    SimilarTo,
    // Structural
    PartOf,
    InstanceOf,
    // Attribution
    DecidedBy,
    OwnedBy,
    MentionedIn,
    Extension(String),
}

impl Relationship {
    /// Every built-in relationship, in declaration order.
    pub const BUILTIN: [Self; 17] = [
        Self::CausedBy,
        Self::LedTo,
        Self::InfluencedBy,
        Self::Supersedes,
        Self::PrecededBy,
        Self::CooccurredWith,
        Self::Contradicts,
        Self::Supports,
        Self::DependsOn,
        Self::Elaborates,
        Self::RelatesTo,
        Self::SimilarTo,
        Self::PartOf,
        Self::InstanceOf,
        Self::DecidedBy,
        Self::OwnedBy,
        Self::MentionedIn,
    ];

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CausedBy => "caused_by",
            Self::LedTo => "led_to",
            Self::InfluencedBy => "influenced_by",
            Self::Supersedes => "supersedes",
            Self::PrecededBy => "preceded_by",
            Self::CooccurredWith => "cooccurred_with",
            Self::Contradicts => "contradicts",
            Self::Supports => "supports",
            Self::DependsOn => "depends_on",
            Self::Elaborates => "elaborates",
            Self::RelatesTo => "relates_to",
            Self::SimilarTo => "similar_to",
            Self::PartOf => "part_of",
            Self::InstanceOf => "instance_of",
            Self::DecidedBy => "decided_by",
            Self::OwnedBy => "owned_by",
            Self::MentionedIn => "mentioned_in",
            Self::Extension(name) => name,
        }
    }

    /// Relationships whose meaning does not depend on direction.
    ///
    /// Traversal walks these either way, like `bidirectional` edges.
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        matches!(
            self,
            Self::CooccurredWith | Self::Contradicts | Self::RelatesTo | Self::SimilarTo
        )
    }

    #[must_use]
    pub fn is_extension(&self) -> bool {
        matches!(self, Self::Extension(_))
    }
}

impl FromStr for Relationship {
    type Err = EngramError;

    /// Never fails for non-empty input: unknown names become `Extension`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.is_empty() {
            return Err(EngramError::invalid(
                "relationship",
                "name must not be empty",
            ));
        }
        Ok(Self::BUILTIN
            .iter()
            .find(|rel| rel.as_str() == name)
            .cloned()
            .unwrap_or_else(|| Self::Extension(name.to_string())))
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Relationship {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Relationship {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Which adjacency list of a node to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Edges whose `from_id` is the node.
    Outgoing,
    /// Edges whose `to_id` is the node.
    Incoming,
    Both,
}

impl FromStr for Direction {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outgoing" | "out" => Ok(Self::Outgoing),
            "incoming" | "in" => Ok(Self::Incoming),
            "both" => Ok(Self::Both),
            other => Err(EngramError::invalid(
                "direction",
                format!("unknown direction '{}'", other),
            )),
        }
    }
}

// =============================================================================
// MEMORY EDGE
// =============================================================================

/// A directed, typed, weighted relationship between two memories.
///
/// Immutable once committed. To change a connection's meaning create a new
/// edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEdge {
    #[serde(default)]
    pub id: EdgeId,
    pub from_id: NodeId,
    pub to_id: NodeId,
    pub relationship: Relationship,
    #[serde(default = "default_strength")]
    pub strength: Score,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default = "Timestamp::now")]
    pub created_at: Timestamp,
    #[serde(default)]
    pub evidence: Option<String>,
}

const fn default_strength() -> Score {
    Score::ONE
}

impl MemoryEdge {
    /// Create an unassigned draft edge with full strength.
    #[must_use]
    pub fn new(
        from_id: NodeId,
        to_id: NodeId,
        relationship: Relationship,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: EdgeId::UNASSIGNED,
            from_id,
            to_id,
            relationship,
            strength: Score::ONE,
            bidirectional: false,
            created_at,
            evidence: None,
        }
    }

    #[must_use]
    pub fn with_strength(mut self, strength: Score) -> Self {
        self.strength = strength;
        self
    }

    #[must_use]
    pub fn with_bidirectional(mut self, bidirectional: bool) -> Self {
        self.bidirectional = bidirectional;
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    /// May be walked against its direction.
    #[must_use]
    pub fn walkable_both_ways(&self) -> bool {
        self.bidirectional || self.relationship.is_symmetric()
    }

    /// The endpoint opposite `node`, if `node` is an endpoint.
    #[must_use]
    pub fn other_end(&self, node: NodeId) -> Option<NodeId> {
        if self.from_id == node {
            Some(self.to_id)
        } else if self.to_id == node {
            Some(self.from_id)
        } else {
            None
        }
    }

    #[must_use]
    pub fn touches(&self, node: NodeId) -> bool {
        self.from_id == node || self.to_id == node
    }

    /// Structural validation; endpoint existence is checked by the store.
    pub fn validate(&self) -> Result<(), EngramError> {
        if self.from_id == self.to_id {
            return Err(EngramError::SelfLoop(self.from_id));
        }
        if let Relationship::Extension(name) = &self.relationship {
            if name.trim().is_empty() {
                return Err(EngramError::invalid(
                    "relationship",
                    "name must not be empty",
                ));
            }
            if name.len() > MAX_LABEL_LENGTH {
                return Err(EngramError::invalid(
                    "relationship",
                    format!("name longer than {}", MAX_LABEL_LENGTH),
                ));
            }
        }
        if let Some(evidence) = &self.evidence
            && evidence.len() > MAX_TEXT_LENGTH
        {
            return Err(EngramError::invalid(
                "evidence",
                format!("length {} exceeds maximum {}", evidence.len(), MAX_TEXT_LENGTH),
            ));
        }
        Ok(())
    }
}
