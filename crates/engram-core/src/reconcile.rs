//! # Reconciliation Engine
//!
//! Answers "what is currently believed about this memory?".
//!
//! Starting from any node, `resolve` follows `superseded_by` pointers to
//! the current version, collects the versions it replaced, and gathers the
//! live memories that contradict it. Reconciliation never writes; a
//! conflict that needs a decision is reported through `needs_review`.

use crate::config::ReconcileConfig;
use crate::graph::GraphView;
use crate::types::{Direction, EngramError, MemoryNode, NodeId, NodeStatus, Relationship, Score};
use serde::Serialize;
use std::collections::BTreeSet;

/// Outcome of reconciling one memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationResult {
    /// End of the supersession chain.
    pub current: MemoryNode,
    /// Replaced versions, oldest first. Never contains `current`.
    pub superseded_chain: Vec<MemoryNode>,
    /// Non-archived memories contradicting `current`, by id.
    pub disputes: Vec<MemoryNode>,
    /// At least two confident parties disagree.
    pub needs_review: bool,
    /// Most recently recorded of `current` and `disputes`.
    pub preferred: NodeId,
    pub confidence: Score,
}

impl ReconciliationResult {
    #[must_use]
    pub fn is_disputed(&self) -> bool {
        !self.disputes.is_empty()
    }
}

pub struct Reconciler;

impl Reconciler {
    /// Resolve `id` to its current version.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` if `id` is unknown
    /// - `SupersessionCycle` if the chain revisits a node
    /// - `DanglingReference` if a `superseded_by` target is missing
    pub fn resolve<G: GraphView + ?Sized>(
        view: &G,
        id: NodeId,
        config: &ReconcileConfig,
    ) -> Result<ReconciliationResult, EngramError> {
        let start = view.require_node(id)?;
        let mut seen = BTreeSet::new();

        // Forward: the queried node up to (not including) the current one.
        let mut walked = Vec::new();
        let mut node = start;
        loop {
            if !seen.insert(node.id) {
                return Err(EngramError::SupersessionCycle(node.id));
            }
            match (node.status, node.superseded_by) {
                (NodeStatus::Superseded, Some(next)) => {
                    let next_node =
                        view.get_node(next)?.ok_or(EngramError::DanglingReference {
                            context: "superseded_by",
                            missing: next,
                        })?;
                    walked.push(node);
                    node = next_node;
                }
                _ => break,
            }
        }
        let current = node;

        // Backward: versions the queried node itself replaced, found through
        // `supersedes` edges whose target points back along the chain.
        let mut earlier = Vec::new();
        let mut stack = vec![id];
        while let Some(newer) = stack.pop() {
            for edge in view.edges_of(newer, Direction::Outgoing)? {
                if edge.relationship != Relationship::Supersedes || seen.contains(&edge.to_id) {
                    continue;
                }
                if let Some(older) = view.get_node(edge.to_id)?
                    && older.superseded_by == Some(newer)
                {
                    seen.insert(older.id);
                    stack.push(older.id);
                    earlier.push(older);
                }
            }
        }
        earlier.sort_by_key(|n| (n.recorded_at, n.id));
        earlier.extend(walked);
        let superseded_chain = earlier;

        let mut dispute_ids = BTreeSet::new();
        for edge in view.edges_of(current.id, Direction::Both)? {
            if edge.relationship == Relationship::Contradicts
                && let Some(other) = edge.other_end(current.id)
            {
                dispute_ids.insert(other);
            }
        }
        let mut disputes = Vec::new();
        for other in dispute_ids {
            if let Some(node) = view.get_node(other)?
                && node.status != NodeStatus::Archived
            {
                disputes.push(node);
            }
        }

        let confident = std::iter::once(&current)
            .chain(&disputes)
            .filter(|n| n.confidence >= config.review_threshold)
            .count();
        let needs_review = !disputes.is_empty() && confident >= 2;

        let preferred = std::iter::once(&current)
            .chain(&disputes)
            .max_by_key(|n| (n.recorded_at, n.id))
            .map_or(current.id, |n| n.id);

        if needs_review {
            tracing::info!(
                current = current.id.0,
                disputes = disputes.len(),
                "conflict needs review"
            );
        }

        Ok(ReconciliationResult {
            confidence: current.confidence,
            current,
            superseded_chain,
            disputes,
            needs_review,
            preferred,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
