//! # Mutation Engine
//!
//! Every write to a store goes through a [`WriteBatch`]: node creations,
//! node status updates, edge creations and edge removals, applied together
//! or not at all.
//!
//! A batch is validated as a whole against the current snapshot overlaid
//! with the batch itself. Only a [`ValidatedBatch`] can be applied, so a
//! backend never sees a write that breaks referential integrity or the
//! supersession invariant.

use crate::graph::{Graph, GraphView};
use crate::types::{EdgeId, EngramError, MemoryEdge, MemoryNode, NodeId, NodeStatus};
use std::collections::BTreeSet;

// =============================================================================
// WRITE BATCH
// =============================================================================

/// An unvalidated set of writes.
///
/// Ids are allocated from the counters of the snapshot the batch was
/// started against, so build and commit a batch under the same writer lock.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    next_node_id: NodeId,
    next_edge_id: EdgeId,
    created_nodes: Vec<MemoryNode>,
    updated_nodes: Vec<MemoryNode>,
    created_edges: Vec<MemoryEdge>,
    removed_edges: Vec<EdgeId>,
}

impl WriteBatch {
    /// Start a batch allocating ids after those already used by `view`.
    pub fn against<G: GraphView + ?Sized>(view: &G) -> Result<Self, EngramError> {
        Ok(Self {
            next_node_id: view.next_node_id()?,
            next_edge_id: view.next_edge_id()?,
            created_nodes: Vec::new(),
            updated_nodes: Vec::new(),
            created_edges: Vec::new(),
            removed_edges: Vec::new(),
        })
    }

    /// Queue a new node, assigning its id and content hash.
    pub fn create_node(&mut self, mut node: MemoryNode) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id = NodeId(id.0.saturating_add(1));
        node.id = id;
        node.refresh_hash();
        self.created_nodes.push(node);
        id
    }

    /// Queue a new value for an existing node. A later update of the same
    /// id replaces an earlier one.
    pub fn update_node(&mut self, node: MemoryNode) {
        self.updated_nodes.retain(|n| n.id != node.id);
        self.updated_nodes.push(node);
    }

    /// Queue a new edge, assigning its id.
    pub fn add_edge(&mut self, mut edge: MemoryEdge) -> EdgeId {
        let id = self.next_edge_id;
        self.next_edge_id = EdgeId(id.0.saturating_add(1));
        edge.id = id;
        self.created_edges.push(edge);
        id
    }

    pub fn remove_edge(&mut self, id: EdgeId) {
        if !self.removed_edges.contains(&id) {
            self.removed_edges.push(id);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created_nodes.is_empty()
            && self.updated_nodes.is_empty()
            && self.created_edges.is_empty()
            && self.removed_edges.is_empty()
    }

    /// The state of `id` as it would be after this batch, if known to the
    /// batch itself.
    fn pending_node(&self, id: NodeId) -> Option<&MemoryNode> {
        self.updated_nodes
            .iter()
            .find(|n| n.id == id)
            .or_else(|| self.created_nodes.iter().find(|n| n.id == id))
    }
}

// =============================================================================
// VALIDATED BATCH
// =============================================================================

/// A batch that passed [`MutationEngine::validate`] against a snapshot.
#[derive(Debug, Clone)]
pub struct ValidatedBatch {
    inner: WriteBatch,
}

impl ValidatedBatch {
    pub fn created_nodes(&self) -> &[MemoryNode] {
        &self.inner.created_nodes
    }

    pub fn updated_nodes(&self) -> &[MemoryNode] {
        &self.inner.updated_nodes
    }

    pub fn created_edges(&self) -> &[MemoryEdge] {
        &self.inner.created_edges
    }

    pub fn removed_edges(&self) -> &[EdgeId] {
        &self.inner.removed_edges
    }

    pub fn next_node_id(&self) -> NodeId {
        self.inner.next_node_id
    }

    pub fn next_edge_id(&self) -> EdgeId {
        self.inner.next_edge_id
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Every record of `graph` as one creation batch, keeping ids and
    /// counters. Only for graphs that passed `export::check_integrity`.
    pub(crate) fn restore(graph: &Graph) -> Self {
        let (next_node_id, next_edge_id) = graph.counters();
        Self {
            inner: WriteBatch {
                next_node_id,
                next_edge_id,
                created_nodes: graph.nodes().cloned().collect(),
                updated_nodes: Vec::new(),
                created_edges: graph.edges().cloned().collect(),
                removed_edges: Vec::new(),
            },
        }
    }
}

// =============================================================================
// MUTATION ENGINE
// =============================================================================

/// Validates batches; the backends apply them.
pub struct MutationEngine;

impl MutationEngine {
    /// Check a whole batch against `view` plus the batch's own writes.
    ///
    /// The first violation rejects the entire batch.
    pub fn validate<G: GraphView + ?Sized>(
        view: &G,
        batch: WriteBatch,
    ) -> Result<ValidatedBatch, EngramError> {
        for node in &batch.created_nodes {
            if view.contains_node(node.id)? {
                return Err(EngramError::invalid(
                    "id",
                    format!("node {} already exists", node.id),
                ));
            }
            node.validate()?;
        }

        for node in &batch.updated_nodes {
            let existing = view.require_node(node.id)?;
            node.validate()?;
            let mut expected = existing;
            expected.status = node.status;
            expected.superseded_by = node.superseded_by;
            if expected != *node {
                return Err(EngramError::invalid(
                    "node",
                    format!(
                        "only status and superseded_by of committed node {} may change",
                        node.id
                    ),
                ));
            }
        }

        for node in batch.created_nodes.iter().chain(&batch.updated_nodes) {
            if node.status == NodeStatus::Superseded {
                Self::check_supersession(view, &batch, node)?;
            }
        }

        for edge in &batch.created_edges {
            edge.validate()?;
            if view.get_edge(edge.id)?.is_some() {
                return Err(EngramError::invalid(
                    "id",
                    format!("edge {} already exists", edge.id),
                ));
            }
            if !Self::node_exists(view, &batch, edge.from_id)? {
                return Err(EngramError::DanglingReference {
                    context: "edge from_id",
                    missing: edge.from_id,
                });
            }
            if !Self::node_exists(view, &batch, edge.to_id)? {
                return Err(EngramError::DanglingReference {
                    context: "edge to_id",
                    missing: edge.to_id,
                });
            }
        }

        for id in &batch.removed_edges {
            if view.get_edge(*id)?.is_none() {
                return Err(EngramError::EdgeNotFound(*id));
            }
        }

        Ok(ValidatedBatch { inner: batch })
    }

    fn overlay_node<G: GraphView + ?Sized>(
        view: &G,
        batch: &WriteBatch,
        id: NodeId,
    ) -> Result<Option<MemoryNode>, EngramError> {
        match batch.pending_node(id) {
            Some(node) => Ok(Some(node.clone())),
            None => view.get_node(id),
        }
    }

    fn node_exists<G: GraphView + ?Sized>(
        view: &G,
        batch: &WriteBatch,
        id: NodeId,
    ) -> Result<bool, EngramError> {
        Ok(batch.pending_node(id).is_some() || view.contains_node(id)?)
    }

    /// The target must exist and its own supersession chain must not lead
    /// back to `node`.
    fn check_supersession<G: GraphView + ?Sized>(
        view: &G,
        batch: &WriteBatch,
        node: &MemoryNode,
    ) -> Result<(), EngramError> {
        let Some(target) = node.superseded_by else {
            return Ok(());
        };
        if target == node.id {
            return Err(EngramError::SupersessionCycle(node.id));
        }

        let mut visited = BTreeSet::from([node.id]);
        let mut current = target;
        let mut first = true;
        loop {
            let Some(current_node) = Self::overlay_node(view, batch, current)? else {
                if first {
                    return Err(EngramError::DanglingReference {
                        context: "superseded_by",
                        missing: current,
                    });
                }
                return Ok(());
            };
            first = false;
            if !visited.insert(current) {
                return Err(EngramError::SupersessionCycle(current));
            }
            match (current_node.status, current_node.superseded_by) {
                (NodeStatus::Superseded, Some(next)) if next == node.id => {
                    return Err(EngramError::SupersessionCycle(node.id));
                }
                (NodeStatus::Superseded, Some(next)) => current = next,
                _ => return Ok(()),
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
