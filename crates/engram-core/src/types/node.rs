//! Memory node record.

use super::{EngramError, NodeId, Score, Timestamp};
use crate::primitives::{
    MAX_LABEL_LENGTH, MAX_LABELS_PER_NODE, MAX_SUMMARY_LENGTH, MAX_TEXT_LENGTH, MIN_TITLE_LENGTH,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// ENUMS
// =============================================================================

/// Category of a memory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Something that happened.
    #[default]
    Event,
    /// A choice that was made.
    Decision,
    /// A thing that was created.
    Artifact,
    Conversation,
    /// A realization or lesson learned.
    Insight,
    Person,
    Project,
    /// A to-do or action item.
    Task,
}

impl NodeKind {
    pub const ALL: [Self; 8] = [
        Self::Event,
        Self::Decision,
        Self::Artifact,
        Self::Conversation,
        Self::Insight,
        Self::Person,
        Self::Project,
        Self::Task,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Decision => "decision",
            Self::Artifact => "artifact",
            Self::Conversation => "conversation",
            Self::Insight => "insight",
            Self::Person => "person",
            Self::Project => "project",
            Self::Task => "task",
        }
    }
}

impl FromStr for NodeKind {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EngramError::invalid("kind", format!("unknown node kind '{}'", s)))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimated impact of a memory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    #[default]
    Medium,
    Low,
}

impl FromStr for Impact {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(EngramError::invalid(
                "impact",
                format!("unknown impact '{}'", other),
            )),
        }
    }
}

/// Lifecycle state of a memory.
///
/// Nodes are never deleted; forgetting is a transition to `Archived`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Active,
    /// Replaced by the node named in `superseded_by`.
    Superseded,
    Disputed,
    Archived,
}

impl NodeStatus {
    pub const ALL: [Self; 4] = [
        Self::Active,
        Self::Superseded,
        Self::Disputed,
        Self::Archived,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Disputed => "disputed",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for NodeStatus {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| EngramError::invalid("status", format!("unknown status '{}'", s)))
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CONTENT HASH
// =============================================================================

/// BLAKE3 hex digest of normalized `what` + `who` + `occurred_at`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct ContentHash(pub String);

impl ContentHash {
    /// Derive the hash for the given identity fields.
    ///
    /// `what` is trimmed, lower-cased and whitespace-collapsed; participants
    /// are lower-cased, de-duplicated and sorted.
    #[must_use]
    pub fn derive<'a>(
        what: &str,
        who: impl IntoIterator<Item = &'a String>,
        occurred_at: Timestamp,
    ) -> Self {
        let normalized_what = what
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        let participants: BTreeSet<String> = who
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        let mut hasher = blake3::Hasher::new();
        hasher.update(normalized_what.as_bytes());
        hasher.update(b"\x1f");
        for participant in &participants {
            hasher.update(participant.as_bytes());
            hasher.update(b"\x1e");
        }
        hasher.update(b"\x1f");
        hasher.update(&occurred_at.as_unix().to_le_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// MEMORY NODE
// =============================================================================

/// A single memory, indexed by who / what / when / where / why / how.
///
/// Committed nodes are immutable except for `status` and `superseded_by`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
    #[serde(default)]
    pub id: NodeId,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub who: BTreeSet<String>,
    pub what: String,
    pub occurred_at: Timestamp,
    #[serde(default = "Timestamp::now")]
    pub recorded_at: Timestamp,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    #[serde(default, rename = "where")]
    pub location: Option<String>,
    #[serde(default)]
    pub why: Option<String>,
    #[serde(default)]
    pub how: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_confidence")]
    pub confidence: Score,
    #[serde(default)]
    pub impact: Impact,
    /// Short recognizable title; also used for reference matching.
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Linked files, URLs or other external references.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Opaque vector supplied by an embedding provider.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub superseded_by: Option<NodeId>,
    #[serde(default)]
    pub content_hash: ContentHash,
}

const fn default_confidence() -> Score {
    Score::ONE
}

impl MemoryNode {
    /// Create an unassigned draft with full confidence, recorded at the
    /// moment it occurred.
    #[must_use]
    pub fn new(what: impl Into<String>, occurred_at: Timestamp) -> Self {
        let mut node = Self {
            id: NodeId::UNASSIGNED,
            kind: NodeKind::default(),
            who: BTreeSet::new(),
            what: what.into(),
            occurred_at,
            recorded_at: occurred_at,
            expires_at: None,
            location: None,
            why: None,
            how: None,
            source: String::new(),
            confidence: Score::ONE,
            impact: Impact::default(),
            summary: String::new(),
            tags: BTreeSet::new(),
            artifacts: Vec::new(),
            embedding: None,
            raw: None,
            status: NodeStatus::Active,
            superseded_by: None,
            content_hash: ContentHash::default(),
        };
        node.refresh_hash();
        node
    }

    #[must_use]
    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_who<I, S>(mut self, who: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.who = who.into_iter().map(Into::into).collect();
        self.refresh_hash();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: Score) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn with_recorded_at(mut self, recorded_at: Timestamp) -> Self {
        self.recorded_at = recorded_at;
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Recompute `content_hash` from the identity fields.
    pub fn refresh_hash(&mut self) {
        self.content_hash = ContentHash::derive(&self.what, &self.who, self.occurred_at);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.status == NodeStatus::Archived
    }

    /// Eligible for edge inference and conflict checks.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self.status, NodeStatus::Active | NodeStatus::Disputed)
    }

    /// The summary, when long enough to be matched as a title.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        let title = self.summary.trim();
        (title.chars().count() >= MIN_TITLE_LENGTH).then_some(title)
    }

    /// Lower-cased participant identifiers.
    #[must_use]
    pub fn participants(&self) -> BTreeSet<String> {
        self.who
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Structural validation of a record.
    ///
    /// Checks field shapes only; references to other nodes are checked by
    /// the mutation engine against the store.
    pub fn validate(&self) -> Result<(), EngramError> {
        if self.what.trim().is_empty() {
            return Err(EngramError::invalid("what", "must not be empty"));
        }
        check_text("what", &self.what, MAX_TEXT_LENGTH)?;
        check_text("summary", &self.summary, MAX_SUMMARY_LENGTH)?;
        check_text("source", &self.source, MAX_LABEL_LENGTH)?;
        for (field, value) in [
            ("where", &self.location),
            ("why", &self.why),
            ("how", &self.how),
            ("raw", &self.raw),
        ] {
            if let Some(value) = value {
                check_text(field, value, MAX_TEXT_LENGTH)?;
            }
        }
        check_labels("who", self.who.iter())?;
        check_labels("tags", self.tags.iter())?;
        check_labels("artifacts", self.artifacts.iter())?;

        if let Some(expires_at) = self.expires_at
            && expires_at < self.occurred_at
        {
            return Err(EngramError::invalid(
                "expires_at",
                "must not precede occurred_at",
            ));
        }
        if let Some(embedding) = &self.embedding
            && embedding.iter().any(|v| !v.is_finite())
        {
            return Err(EngramError::invalid(
                "embedding",
                "must contain only finite values",
            ));
        }

        match (self.status, self.superseded_by) {
            (NodeStatus::Superseded, None) => Err(EngramError::invalid(
                "superseded_by",
                "required when status is superseded",
            )),
            (NodeStatus::Superseded, Some(target)) if target == self.id => {
                Err(EngramError::SupersessionCycle(self.id))
            }
            (NodeStatus::Superseded, Some(_)) => Ok(()),
            (_, Some(_)) => Err(EngramError::invalid(
                "superseded_by",
                "set only when status is superseded",
            )),
            (_, None) => Ok(()),
        }
    }
}

fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), EngramError> {
    if value.len() > max {
        return Err(EngramError::invalid(
            field,
            format!("length {} exceeds maximum {}", value.len(), max),
        ));
    }
    Ok(())
}

fn check_labels<'a>(
    field: &'static str,
    labels: impl ExactSizeIterator<Item = &'a String>,
) -> Result<(), EngramError> {
    if labels.len() > MAX_LABELS_PER_NODE {
        return Err(EngramError::invalid(
            field,
            format!("more than {} entries", MAX_LABELS_PER_NODE),
        ));
    }
    for label in labels {
        if label.trim().is_empty() {
            return Err(EngramError::invalid(field, "entries must not be empty"));
        }
        check_text(field, label, MAX_LABEL_LENGTH)?;
    }
    Ok(())
}
