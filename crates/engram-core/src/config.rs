//! # Engine Configuration
//!
//! Tunables for ingestion, traversal and reconciliation. Every field has a
//! default, so an empty TOML table (or no file at all) is a valid config.
//!
//! ```toml
//! [ingest]
//! temporal_window_secs = 3600
//! edge_commit_threshold = 0.6
//!
//! [traversal]
//! timeout_ms = 5000
//!
//! [reconcile]
//! review_threshold = 0.7
//! ```

use crate::types::{EngramError, Score};
use serde::{Deserialize, Serialize};

/// Top-level configuration shared by every engine of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub ingest: IngestConfig,
    pub traversal: TraversalConfig,
    pub reconcile: ReconcileConfig,
}

impl EngineConfig {
    /// Reject combinations the engines cannot honour.
    pub fn validate(&self) -> Result<(), EngramError> {
        let ingest = &self.ingest;
        if ingest.temporal_window_secs == 0 {
            return Err(EngramError::invalid(
                "ingest.temporal_window_secs",
                "must be positive",
            ));
        }
        if ingest.duplicate_similarity < ingest.update_similarity {
            return Err(EngramError::invalid(
                "ingest.duplicate_similarity",
                "must not be below update_similarity",
            ));
        }
        if self.traversal.default_max_hops == 0 || self.traversal.path_max_hops == 0 {
            return Err(EngramError::invalid(
                "traversal.max_hops",
                "hop budgets must be positive",
            ));
        }
        Ok(())
    }
}

/// Ingestion coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Two memories closer than this (by `occurred_at`) are temporally related.
    pub temporal_window_secs: u64,
    /// Inferred edges scoring strictly above this are committed.
    pub edge_commit_threshold: Score,
    /// An update whose confidence exceeds this supersedes without confirmation.
    pub auto_supersede_threshold: Score,
    /// Text similarity from which two memories are considered the same topic.
    pub update_similarity: Score,
    /// Text similarity from which two memories are considered duplicates.
    pub duplicate_similarity: Score,
    /// Cap on proposed edges per ingestion.
    pub max_inferred_edges: usize,
    /// Score given to an explicit reference match.
    pub reference_score: Score,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            temporal_window_secs: 3600,
            edge_commit_threshold: Score::from_permille(600),
            auto_supersede_threshold: Score::from_permille(900),
            update_similarity: Score::from_permille(500),
            duplicate_similarity: Score::from_permille(900),
            max_inferred_edges: 32,
            reference_score: Score::from_permille(950),
        }
    }
}

/// Traversal engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraversalConfig {
    pub default_max_hops: usize,
    pub path_max_hops: usize,
    /// Deadline applied to walks started through the store; `None` disables it.
    pub timeout_ms: Option<u64>,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            default_max_hops: 2,
            path_max_hops: 6,
            timeout_ms: Some(5000),
        }
    }
}

/// Reconciliation engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Parties at or above this confidence count toward `needs_review`.
    pub review_threshold: Score,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            review_threshold: Score::from_permille(700),
        }
    }
}
