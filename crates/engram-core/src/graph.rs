//! # Graph Module
//!
//! The read contract shared by every backend, and the in-memory graph.
//!
//! Nodes and edges live in id-keyed arenas and refer to each other only by
//! id, so cycles and shared incoming edges need no special ownership.
//!
//! ## Read Contract
//!
//! [`GraphView`] is implemented by the in-memory [`Graph`], by redb
//! snapshots, and by the store's snapshot handle. Every engine (traversal,
//! reconciliation, ingestion) is written against it and never knows which
//! backend answers.

use crate::index::GraphIndex;
use crate::mutation::ValidatedBatch;
use crate::types::{
    ContentHash, Direction, EdgeId, EngramError, MemoryEdge, MemoryNode, NodeId, Relationship,
    Score, Timestamp,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// READ CONTRACT
// =============================================================================

/// Read-only, snapshot-consistent access to nodes, edges and indexes.
pub trait GraphView {
    fn get_node(&self, id: NodeId) -> Result<Option<MemoryNode>, EngramError>;

    fn get_edge(&self, id: EdgeId) -> Result<Option<MemoryEdge>, EngramError>;

    /// Edges adjacent to `node`, ordered by `(created_at, id)`.
    ///
    /// Unknown nodes have no edges.
    fn edges_of(&self, node: NodeId, direction: Direction)
    -> Result<Vec<MemoryEdge>, EngramError>;

    /// Nodes with `start <= occurred_at <= end`, ordered by time then id.
    fn nodes_between(&self, start: Timestamp, end: Timestamp)
    -> Result<Vec<NodeId>, EngramError>;

    /// Up to `limit` entries of the time index strictly before
    /// `(at, id)`, nearest first.
    fn nodes_before(
        &self,
        at: Timestamp,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<(Timestamp, NodeId)>, EngramError>;

    /// Up to `limit` entries of the time index strictly after
    /// `(at, id)`, nearest first.
    fn nodes_after(
        &self,
        at: Timestamp,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<(Timestamp, NodeId)>, EngramError>;

    fn nodes_by_tag(&self, tag: &str) -> Result<Vec<NodeId>, EngramError>;

    fn nodes_by_participant(&self, participant: &str) -> Result<Vec<NodeId>, EngramError>;

    fn nodes_by_token(&self, token: &str) -> Result<Vec<NodeId>, EngramError>;

    fn nodes_by_hash(&self, hash: &ContentHash) -> Result<Vec<NodeId>, EngramError>;

    /// Every node id in ascending order.
    fn node_ids(&self) -> Result<Vec<NodeId>, EngramError>;

    /// Every edge in ascending id order.
    fn all_edges(&self) -> Result<Vec<MemoryEdge>, EngramError>;

    fn node_count(&self) -> Result<usize, EngramError>;

    fn edge_count(&self) -> Result<usize, EngramError>;

    /// Id the next created node will receive.
    fn next_node_id(&self) -> Result<NodeId, EngramError>;

    /// Id the next created edge will receive.
    fn next_edge_id(&self) -> Result<EdgeId, EngramError>;

    // -------------------------------------------------------------------------
    // Provided queries
    // -------------------------------------------------------------------------

    /// Like `get_node`, but an unknown id is an error.
    fn require_node(&self, id: NodeId) -> Result<MemoryNode, EngramError> {
        self.get_node(id)?.ok_or(EngramError::NodeNotFound(id))
    }

    fn contains_node(&self, id: NodeId) -> Result<bool, EngramError> {
        Ok(self.get_node(id)?.is_some())
    }

    /// Nodes that occurred at or after `since`.
    fn nodes_since(&self, since: Timestamp) -> Result<Vec<NodeId>, EngramError> {
        self.nodes_between(since, Timestamp(i64::MAX))
    }

    /// Adjacent edges, optionally restricted to a set of relationships.
    fn get_edges(
        &self,
        node: NodeId,
        direction: Direction,
        type_filter: Option<&BTreeSet<Relationship>>,
    ) -> Result<Vec<MemoryEdge>, EngramError> {
        let mut edges = self.edges_of(node, direction)?;
        if let Some(filter) = type_filter {
            edges.retain(|e| filter.contains(&e.relationship));
        }
        Ok(edges)
    }

    /// Adjacent edges paired with the node at their other end.
    fn neighbors(
        &self,
        node: NodeId,
        direction: Direction,
        type_filter: Option<&BTreeSet<Relationship>>,
        min_strength: Score,
    ) -> Result<Vec<(MemoryEdge, NodeId)>, EngramError> {
        Ok(self
            .get_edges(node, direction, type_filter)?
            .into_iter()
            .filter(|e| e.strength >= min_strength)
            .filter_map(|e| e.other_end(node).map(|other| (e, other)))
            .collect())
    }
}

impl<T: GraphView + ?Sized> GraphView for Arc<T> {
    fn get_node(&self, id: NodeId) -> Result<Option<MemoryNode>, EngramError> {
        (**self).get_node(id)
    }

    fn get_edge(&self, id: EdgeId) -> Result<Option<MemoryEdge>, EngramError> {
        (**self).get_edge(id)
    }

    fn edges_of(
        &self,
        node: NodeId,
        direction: Direction,
    ) -> Result<Vec<MemoryEdge>, EngramError> {
        (**self).edges_of(node, direction)
    }

    fn nodes_between(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<NodeId>, EngramError> {
        (**self).nodes_between(start, end)
    }

    fn nodes_before(
        &self,
        at: Timestamp,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<(Timestamp, NodeId)>, EngramError> {
        (**self).nodes_before(at, id, limit)
    }

    fn nodes_after(
        &self,
        at: Timestamp,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<(Timestamp, NodeId)>, EngramError> {
        (**self).nodes_after(at, id, limit)
    }

    fn nodes_by_tag(&self, tag: &str) -> Result<Vec<NodeId>, EngramError> {
        (**self).nodes_by_tag(tag)
    }

    fn nodes_by_participant(&self, participant: &str) -> Result<Vec<NodeId>, EngramError> {
        (**self).nodes_by_participant(participant)
    }

    fn nodes_by_token(&self, token: &str) -> Result<Vec<NodeId>, EngramError> {
        (**self).nodes_by_token(token)
    }

    fn nodes_by_hash(&self, hash: &ContentHash) -> Result<Vec<NodeId>, EngramError> {
        (**self).nodes_by_hash(hash)
    }

    fn node_ids(&self) -> Result<Vec<NodeId>, EngramError> {
        (**self).node_ids()
    }

    fn all_edges(&self) -> Result<Vec<MemoryEdge>, EngramError> {
        (**self).all_edges()
    }

    fn node_count(&self) -> Result<usize, EngramError> {
        (**self).node_count()
    }

    fn edge_count(&self) -> Result<usize, EngramError> {
        (**self).edge_count()
    }

    fn next_node_id(&self) -> Result<NodeId, EngramError> {
        (**self).next_node_id()
    }

    fn next_edge_id(&self) -> Result<EdgeId, EngramError> {
        (**self).next_edge_id()
    }
}

// =============================================================================
// IN-MEMORY GRAPH
// =============================================================================

/// In-memory graph: node and edge arenas plus their indexes.
///
/// Cloning is a deep copy; the store shares it behind an `Arc` and clones
/// only when a writer commits while readers still hold the old version.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: BTreeMap<NodeId, MemoryNode>,
    edges: BTreeMap<EdgeId, MemoryEdge>,
    index: GraphIndex,
    next_node_id: NodeId,
    next_edge_id: EdgeId,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            index: GraphIndex::new(),
            next_node_id: NodeId(1),
            next_edge_id: EdgeId(1),
        }
    }

    /// Rebuild a graph (and its indexes) from stored records.
    ///
    /// Counters never move backwards past the highest id present.
    #[must_use]
    pub fn from_parts(
        nodes: Vec<MemoryNode>,
        edges: Vec<MemoryEdge>,
        next_node_id: NodeId,
        next_edge_id: EdgeId,
    ) -> Self {
        let mut graph = Self::new();
        for node in nodes {
            graph.insert_node(node);
        }
        for edge in edges {
            graph.insert_edge(edge);
        }
        graph.next_node_id = graph.next_node_id.max(next_node_id);
        graph.next_edge_id = graph.next_edge_id.max(next_edge_id);
        graph
    }

    /// Apply a batch that has already passed validation.
    ///
    /// Infallible: all checks happened in `MutationEngine::validate`.
    pub fn apply(&mut self, batch: &ValidatedBatch) {
        for node in batch.created_nodes() {
            self.insert_node(node.clone());
        }
        for node in batch.updated_nodes() {
            // identity fields are unchanged, so index entries stay valid
            self.nodes.insert(node.id, node.clone());
        }
        for edge in batch.created_edges() {
            self.insert_edge(edge.clone());
        }
        for id in batch.removed_edges() {
            if let Some(edge) = self.edges.remove(id) {
                self.index.remove_edge(&edge);
            }
        }
        self.next_node_id = self.next_node_id.max(batch.next_node_id());
        self.next_edge_id = self.next_edge_id.max(batch.next_edge_id());
    }

    /// Ids the next created node and edge will receive.
    #[must_use]
    pub fn counters(&self) -> (NodeId, EdgeId) {
        (self.next_node_id, self.next_edge_id)
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &MemoryNode> {
        self.nodes.values()
    }

    /// All edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = &MemoryEdge> {
        self.edges.values()
    }

    fn insert_node(&mut self, node: MemoryNode) {
        self.index.insert_node(&node);
        if node.id >= self.next_node_id {
            self.next_node_id = NodeId(node.id.0.saturating_add(1));
        }
        self.nodes.insert(node.id, node);
    }

    fn insert_edge(&mut self, edge: MemoryEdge) {
        self.index.insert_edge(&edge);
        if edge.id >= self.next_edge_id {
            self.next_edge_id = EdgeId(edge.id.0.saturating_add(1));
        }
        self.edges.insert(edge.id, edge);
    }
}

impl GraphView for Graph {
    fn get_node(&self, id: NodeId) -> Result<Option<MemoryNode>, EngramError> {
        Ok(self.nodes.get(&id).cloned())
    }

    fn get_edge(&self, id: EdgeId) -> Result<Option<MemoryEdge>, EngramError> {
        Ok(self.edges.get(&id).cloned())
    }

    fn edges_of(
        &self,
        node: NodeId,
        direction: Direction,
    ) -> Result<Vec<MemoryEdge>, EngramError> {
        Ok(self
            .index
            .adjacent(node, direction)
            .into_iter()
            .filter_map(|id| self.edges.get(&id).cloned())
            .collect())
    }

    fn nodes_between(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<NodeId>, EngramError> {
        Ok(self.index.between(start, end))
    }

    fn nodes_before(
        &self,
        at: Timestamp,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<(Timestamp, NodeId)>, EngramError> {
        Ok(self.index.before(at, id, limit))
    }

    fn nodes_after(
        &self,
        at: Timestamp,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<(Timestamp, NodeId)>, EngramError> {
        Ok(self.index.after(at, id, limit))
    }

    fn nodes_by_tag(&self, tag: &str) -> Result<Vec<NodeId>, EngramError> {
        Ok(self.index.by_tag(tag))
    }

    fn nodes_by_participant(&self, participant: &str) -> Result<Vec<NodeId>, EngramError> {
        Ok(self.index.by_participant(participant))
    }

    fn nodes_by_token(&self, token: &str) -> Result<Vec<NodeId>, EngramError> {
        Ok(self.index.by_token(token))
    }

    fn nodes_by_hash(&self, hash: &ContentHash) -> Result<Vec<NodeId>, EngramError> {
        Ok(self.index.by_hash(hash.as_str()))
    }

    fn node_ids(&self) -> Result<Vec<NodeId>, EngramError> {
        Ok(self.nodes.keys().copied().collect())
    }

    fn all_edges(&self) -> Result<Vec<MemoryEdge>, EngramError> {
        Ok(self.edges.values().cloned().collect())
    }

    fn node_count(&self) -> Result<usize, EngramError> {
        Ok(self.nodes.len())
    }

    fn edge_count(&self) -> Result<usize, EngramError> {
        Ok(self.edges.len())
    }

    fn next_node_id(&self) -> Result<NodeId, EngramError> {
        Ok(self.next_node_id)
    }

    fn next_edge_id(&self) -> Result<EdgeId, EngramError> {
        Ok(self.next_edge_id)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mutation::{MutationEngine, WriteBatch};

    fn commit(graph: &mut Graph, batch: WriteBatch) {
        let validated = MutationEngine::validate(graph, batch).expect("valid batch");
        graph.apply(&validated);
    }

    fn sample() -> (Graph, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let mut batch = WriteBatch::against(&graph).expect("batch");
        let a = batch.create_node(MemoryNode::new("alpha", Timestamp(10)).with_tags(["ops"]));
        let b = batch.create_node(MemoryNode::new("beta", Timestamp(20)).with_who(["Ana"]));
        let c = batch.create_node(MemoryNode::new("gamma", Timestamp(30)).with_tags(["OPS"]));
        batch.add_edge(
            MemoryEdge::new(a, b, Relationship::LedTo, Timestamp(1))
                .with_strength(Score::from_permille(300)),
        );
        batch.add_edge(MemoryEdge::new(c, a, Relationship::CausedBy, Timestamp(2)));
        commit(&mut graph, batch);
        (graph, a, b, c)
    }

    #[test]
    fn ids_start_at_one() {
        let (graph, a, b, c) = sample();
        assert_eq!((a, b, c), (NodeId(1), NodeId(2), NodeId(3)));
        assert_eq!(graph.next_node_id().expect("next"), NodeId(4));
        assert_eq!(graph.next_edge_id().expect("next"), EdgeId(3));
    }

    #[test]
    fn get_edges_filters_by_direction_and_type() {
        let (graph, a, _, _) = sample();
        assert_eq!(graph.get_edges(a, Direction::Outgoing, None).expect("out").len(), 1);
        assert_eq!(graph.get_edges(a, Direction::Incoming, None).expect("in").len(), 1);
        assert_eq!(graph.get_edges(a, Direction::Both, None).expect("both").len(), 2);

        let filter: BTreeSet<_> = [Relationship::CausedBy].into_iter().collect();
        let edges = graph
            .get_edges(a, Direction::Both, Some(&filter))
            .expect("filtered");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relationship, Relationship::CausedBy);
    }

    #[test]
    fn neighbors_respect_min_strength() {
        let (graph, a, b, c) = sample();
        let all = graph
            .neighbors(a, Direction::Both, None, Score::ZERO)
            .expect("neighbors");
        let ids: Vec<_> = all.iter().map(|(_, n)| *n).collect();
        assert_eq!(ids, vec![b, c]);

        let strong = graph
            .neighbors(a, Direction::Both, None, Score::from_permille(500))
            .expect("neighbors");
        assert_eq!(strong.len(), 1);
        assert_eq!(strong[0].1, c);
    }

    #[test]
    fn tag_lookup_is_case_insensitive() {
        let (graph, a, _, c) = sample();
        assert_eq!(graph.nodes_by_tag("Ops").expect("tag"), vec![a, c]);
        assert!(graph.nodes_by_tag("missing").expect("tag").is_empty());
    }

    #[test]
    fn nodes_since_uses_occurrence_time() {
        let (graph, _, b, c) = sample();
        assert_eq!(graph.nodes_since(Timestamp(20)).expect("since"), vec![b, c]);
    }

    #[test]
    fn participant_lookup() {
        let (graph, _, b, _) = sample();
        assert_eq!(graph.nodes_by_participant("ana").expect("who"), vec![b]);
    }

    #[test]
    fn from_parts_rebuilds_indexes() {
        let (graph, a, _, _) = sample();
        let rebuilt = Graph::from_parts(
            graph.nodes().cloned().collect(),
            graph.edges().cloned().collect(),
            NodeId(1),
            EdgeId(1),
        );
        assert_eq!(rebuilt.next_node_id().expect("next"), NodeId(4));
        assert_eq!(
            rebuilt.edges_of(a, Direction::Both).expect("edges"),
            graph.edges_of(a, Direction::Both).expect("edges")
        );
        assert_eq!(rebuilt.nodes_by_token("gamma").expect("token"), vec![NodeId(3)]);
    }

    #[test]
    fn require_node_reports_missing() {
        let graph = Graph::new();
        assert!(matches!(
            graph.require_node(NodeId(9)),
            Err(EngramError::NodeNotFound(NodeId(9)))
        ));
    }
}
