//! # Memory Store
//!
//! The explicitly passed store handle every operation goes through.
//!
//! ## Storage Backends
//!
//! - `InMemory`: an `Arc<Graph>` swapped under a short-lived lock. Readers
//!   clone the `Arc`; a writer clones the graph only when a reader still
//!   holds the previous version.
//! - `Persistent`: a [`RedbGraph`]; readers get MVCC read transactions.
//!
//! ## Concurrency
//!
//! Writes (ingestion, status transitions, edge GC, restore) serialize on a
//! single writer lock and are validated against the snapshot taken under
//! it. Readers take a [`Snapshot`] and never wait for an ingestion in
//! flight; they keep seeing the state as of the moment they started.

use crate::config::EngineConfig;
use crate::export;
use crate::graph::{Graph, GraphView};
use crate::ingestor::{IngestResult, Ingestor};
use crate::mutation::{MutationEngine, ValidatedBatch, WriteBatch};
use crate::query::{self, Query, QueryOutput};
use crate::reconcile::{ReconciliationResult, Reconciler};
use crate::stats::GraphMetrics;
use crate::storage::{RedbGraph, RedbSnapshot};
use crate::traversal::{
    ContextWindow, PathOptions, Traversal, TraversalHit, TraverseOptions, WalkLimits,
};
use crate::types::{
    ContentHash, Direction, EdgeId, EngramError, MemoryEdge, MemoryNode, NodeId, NodeStatus,
    Relationship, Score, Timestamp,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A consistent read-only view of a store.
#[derive(Debug)]
pub enum Snapshot {
    InMemory(Arc<Graph>),
    Persistent(RedbSnapshot),
}

impl Snapshot {
    fn view(&self) -> &dyn GraphView {
        match self {
            Self::InMemory(graph) => &**graph,
            Self::Persistent(snapshot) => snapshot,
        }
    }
}

impl GraphView for Snapshot {
    fn get_node(&self, id: NodeId) -> Result<Option<MemoryNode>, EngramError> {
        self.view().get_node(id)
    }

    fn get_edge(&self, id: EdgeId) -> Result<Option<MemoryEdge>, EngramError> {
        self.view().get_edge(id)
    }

    fn edges_of(
        &self,
        node: NodeId,
        direction: Direction,
    ) -> Result<Vec<MemoryEdge>, EngramError> {
        self.view().edges_of(node, direction)
    }

    fn nodes_between(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<NodeId>, EngramError> {
        self.view().nodes_between(start, end)
    }

    fn nodes_before(
        &self,
        at: Timestamp,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<(Timestamp, NodeId)>, EngramError> {
        self.view().nodes_before(at, id, limit)
    }

    fn nodes_after(
        &self,
        at: Timestamp,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<(Timestamp, NodeId)>, EngramError> {
        self.view().nodes_after(at, id, limit)
    }

    fn nodes_by_tag(&self, tag: &str) -> Result<Vec<NodeId>, EngramError> {
        self.view().nodes_by_tag(tag)
    }

    fn nodes_by_participant(&self, participant: &str) -> Result<Vec<NodeId>, EngramError> {
        self.view().nodes_by_participant(participant)
    }

    fn nodes_by_token(&self, token: &str) -> Result<Vec<NodeId>, EngramError> {
        self.view().nodes_by_token(token)
    }

    fn nodes_by_hash(&self, hash: &ContentHash) -> Result<Vec<NodeId>, EngramError> {
        self.view().nodes_by_hash(hash)
    }

    fn node_ids(&self) -> Result<Vec<NodeId>, EngramError> {
        self.view().node_ids()
    }

    fn all_edges(&self) -> Result<Vec<MemoryEdge>, EngramError> {
        self.view().all_edges()
    }

    fn node_count(&self) -> Result<usize, EngramError> {
        self.view().node_count()
    }

    fn edge_count(&self) -> Result<usize, EngramError> {
        self.view().edge_count()
    }

    fn next_node_id(&self) -> Result<NodeId, EngramError> {
        self.view().next_node_id()
    }

    fn next_edge_id(&self) -> Result<EdgeId, EngramError> {
        self.view().next_edge_id()
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Storage backend of a [`MemoryStore`].
enum StorageBackend {
    InMemory(RwLock<Arc<Graph>>),
    Persistent(RedbGraph),
}

/// Handle to one memory store. Open once, pass around, close on shutdown.
pub struct MemoryStore {
    backend: StorageBackend,
    writer: Mutex<()>,
    config: EngineConfig,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("persistent", &self.is_persistent())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create an empty volatile store.
    pub fn in_memory(config: EngineConfig) -> Result<Self, EngramError> {
        Self::from_graph(Graph::new(), config)
    }

    /// Wrap an existing in-memory graph, e.g. one loaded from an export.
    pub fn from_graph(graph: Graph, config: EngineConfig) -> Result<Self, EngramError> {
        config.validate()?;
        Ok(Self {
            backend: StorageBackend::InMemory(RwLock::new(Arc::new(graph))),
            writer: Mutex::new(()),
            config,
        })
    }

    /// Open or create a redb-backed store at `path`.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngramError> {
        config.validate()?;
        let path = path.as_ref();
        let redb = RedbGraph::open(path)?;
        tracing::info!(path = %path.display(), "store opened");
        Ok(Self {
            backend: StorageBackend::Persistent(redb),
            writer: Mutex::new(()),
            config,
        })
    }

    /// Release the store. Every committed write is already durable.
    pub fn close(self) -> Result<(), EngramError> {
        let _guard = self.writer.lock().map_err(|_| EngramError::LockPoisoned)?;
        tracing::debug!(persistent = self.is_persistent(), "store closed");
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// Take a consistent read view of the current state.
    pub fn snapshot(&self) -> Result<Snapshot, EngramError> {
        match &self.backend {
            StorageBackend::InMemory(graph) => {
                let graph = graph.read().map_err(|_| EngramError::LockPoisoned)?;
                Ok(Snapshot::InMemory(Arc::clone(&graph)))
            }
            StorageBackend::Persistent(redb) => redb.snapshot().map(Snapshot::Persistent),
        }
    }

    /// Deadline for walks started without explicit limits.
    #[must_use]
    pub fn default_limits(&self) -> WalkLimits {
        match self.config.traversal.timeout_ms {
            Some(ms) => WalkLimits::with_timeout(Duration::from_millis(ms)),
            None => WalkLimits::unbounded(),
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Run `build` under the writer lock against a fresh snapshot and
    /// commit the batch it returns. Nothing is written if any step fails.
    ///
    /// There is one writer lock per store, so writes touching unrelated
    /// nodes still run one at a time. Readers never take it.
    pub fn write<T, F>(&self, build: F) -> Result<T, EngramError>
    where
        F: FnOnce(&Snapshot) -> Result<(WriteBatch, T), EngramError>,
    {
        let _guard = self.writer.lock().map_err(|_| EngramError::LockPoisoned)?;
        self.write_locked(build)
    }

    /// Body of [`MemoryStore::write`]; caller holds the writer lock.
    fn write_locked<T, F>(&self, build: F) -> Result<T, EngramError>
    where
        F: FnOnce(&Snapshot) -> Result<(WriteBatch, T), EngramError>,
    {
        let snapshot = self.snapshot()?;
        let (batch, value) = build(&snapshot)?;
        if batch.is_empty() {
            return Ok(value);
        }
        let validated = MutationEngine::validate(&snapshot, batch)?;
        drop(snapshot);
        self.apply(&validated)?;
        tracing::debug!(
            nodes = validated.created_nodes().len(),
            updates = validated.updated_nodes().len(),
            edges = validated.created_edges().len(),
            removed = validated.removed_edges().len(),
            "batch committed"
        );
        Ok(value)
    }

    /// Commit a batch built by the caller.
    ///
    /// Ids in the batch must still be free; build batches with
    /// [`MemoryStore::write`] when other writers may be active.
    pub fn commit(&self, batch: WriteBatch) -> Result<(), EngramError> {
        self.write(|_| Ok((batch, ())))
    }

    /// Caller holds the writer lock.
    fn apply(&self, batch: &ValidatedBatch) -> Result<(), EngramError> {
        match &self.backend {
            StorageBackend::InMemory(graph) => {
                let mut graph = graph.write().map_err(|_| EngramError::LockPoisoned)?;
                Arc::make_mut(&mut graph).apply(batch);
                Ok(())
            }
            StorageBackend::Persistent(redb) => redb.commit(batch),
        }
    }

    /// Create a node (unassigned id) or transition an existing one's status.
    ///
    /// An update may change only `status` and `superseded_by`.
    pub fn put_node(&self, node: MemoryNode) -> Result<NodeId, EngramError> {
        self.write(|snapshot| {
            let mut batch = WriteBatch::against(snapshot)?;
            let id = if node.id.is_assigned() {
                let id = node.id;
                batch.update_node(node);
                id
            } else {
                batch.create_node(node)
            };
            Ok((batch, id))
        })
    }

    /// Create an edge. Both endpoints must exist.
    pub fn put_edge(&self, edge: MemoryEdge) -> Result<EdgeId, EngramError> {
        if edge.id.is_assigned() {
            return Err(EngramError::invalid(
                "id",
                "edges are immutable once committed",
            ));
        }
        self.write(|snapshot| {
            let mut batch = WriteBatch::against(snapshot)?;
            let id = batch.add_edge(edge);
            Ok((batch, id))
        })
    }

    /// Ingest a candidate memory: dedup, conflicts, inferred edges, one commit.
    pub fn ingest(&self, candidate: MemoryNode) -> Result<IngestResult, EngramError> {
        let ingestor = Ingestor::new(&self.config.ingest);
        // held until the result is read back, so it describes this commit
        let guard = self.writer.lock().map_err(|_| EngramError::LockPoisoned)?;
        let mut result = self.write_locked(|snapshot| {
            let plan = ingestor.plan(snapshot, candidate, Timestamp::now())?;
            Ok((plan.batch, plan.result))
        })?;

        let snapshot = self.snapshot()?;
        result.needs_review =
            Reconciler::resolve(&snapshot, result.node.id, &self.config.reconcile)?.needs_review;
        if result.created {
            // status may have changed in the same commit
            result.node = snapshot.require_node(result.node.id)?;
        }
        drop(snapshot);
        drop(guard);

        tracing::info!(
            node = result.node.id.0,
            created = result.created,
            inferred = result.inferred_edges.len(),
            committed = result.inferred_edges.iter().filter(|e| e.committed).count(),
            conflicts = result.conflicts.len(),
            needs_review = result.needs_review,
            "memory ingested"
        );
        Ok(result)
    }

    /// Apply a pending update: mark `old` as superseded by `new`.
    ///
    /// Requires a `supersedes` edge from `new` to `old`, as left by
    /// ingestion when the update was not confident enough to apply itself.
    pub fn confirm_supersession(&self, new: NodeId, old: NodeId) -> Result<(), EngramError> {
        self.write(|snapshot| {
            snapshot.require_node(new)?;
            let mut node = snapshot.require_node(old)?;
            let linked = snapshot
                .edges_of(new, Direction::Outgoing)?
                .iter()
                .any(|e| e.relationship == Relationship::Supersedes && e.to_id == old);
            if !linked {
                return Err(EngramError::invalid(
                    "supersession",
                    format!("no supersedes edge from {} to {}", new, old),
                ));
            }

            let mut batch = WriteBatch::against(snapshot)?;
            if node.superseded_by != Some(new) {
                node.status = NodeStatus::Superseded;
                node.superseded_by = Some(new);
                batch.update_node(node);
                tracing::info!(old = old.0, new = new.0, "supersession confirmed");
            }
            Ok((batch, ()))
        })
    }

    /// Transition a node to `active`, `disputed` or `archived`.
    ///
    /// Supersession goes through [`MemoryStore::confirm_supersession`] or
    /// `put_node`.
    pub fn set_status(&self, id: NodeId, status: NodeStatus) -> Result<(), EngramError> {
        if status == NodeStatus::Superseded {
            return Err(EngramError::invalid(
                "status",
                "superseded requires a replacement node",
            ));
        }
        self.write(|snapshot| {
            let mut node = snapshot.require_node(id)?;
            let mut batch = WriteBatch::against(snapshot)?;
            if node.status != status {
                node.status = status;
                node.superseded_by = None;
                batch.update_node(node);
            }
            Ok((batch, ()))
        })
    }

    /// Forget a memory. Edges pointing at it stay until collected.
    pub fn archive(&self, id: NodeId) -> Result<(), EngramError> {
        self.set_status(id, NodeStatus::Archived)
    }

    /// Remove every edge with an archived endpoint, in one batch.
    ///
    /// Returns the removed ids. Ids are not reused.
    pub fn collect_archived_edges(&self) -> Result<Vec<EdgeId>, EngramError> {
        let removed = self.write(|snapshot| {
            let mut archived = BTreeSet::new();
            for id in snapshot.node_ids()? {
                if snapshot.require_node(id)?.is_archived() {
                    archived.insert(id);
                }
            }
            let mut batch = WriteBatch::against(snapshot)?;
            let mut removed = Vec::new();
            for edge in snapshot.all_edges()? {
                if archived.contains(&edge.from_id) || archived.contains(&edge.to_id) {
                    batch.remove_edge(edge.id);
                    removed.push(edge.id);
                }
            }
            Ok((batch, removed))
        })?;
        tracing::info!(removed = removed.len(), "archived edges collected");
        Ok(removed)
    }

    /// Load a canonical export into this store, which must be empty.
    pub fn restore(&self, data: &[u8]) -> Result<(), EngramError> {
        let graph = export::import_canonical(data)?;
        let _guard = self.writer.lock().map_err(|_| EngramError::LockPoisoned)?;
        let snapshot = self.snapshot()?;
        if snapshot.node_count()? > 0 || snapshot.edge_count()? > 0 {
            return Err(EngramError::invalid(
                "store",
                "restore requires an empty store",
            ));
        }
        drop(snapshot);

        let (nodes, edges) = (graph.nodes().count(), graph.edges().count());
        match &self.backend {
            StorageBackend::InMemory(current) => {
                let mut current = current.write().map_err(|_| EngramError::LockPoisoned)?;
                *current = Arc::new(graph);
            }
            StorageBackend::Persistent(redb) => redb.commit(&ValidatedBatch::restore(&graph))?,
        }
        tracing::info!(nodes, edges, "store restored");
        Ok(())
    }

    /// Compact the database file. No-op for in-memory stores.
    pub fn compact(&mut self) -> Result<bool, EngramError> {
        match &mut self.backend {
            StorageBackend::InMemory(_) => Ok(false),
            StorageBackend::Persistent(redb) => redb.compact(),
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn get_node(&self, id: NodeId) -> Result<MemoryNode, EngramError> {
        self.snapshot()?.require_node(id)
    }

    pub fn get_edge(&self, id: EdgeId) -> Result<MemoryEdge, EngramError> {
        self.snapshot()?
            .get_edge(id)?
            .ok_or(EngramError::EdgeNotFound(id))
    }

    /// Edges of a known node, ordered by `(created_at, id)`.
    pub fn get_edges(
        &self,
        node: NodeId,
        direction: Direction,
        type_filter: Option<&BTreeSet<Relationship>>,
    ) -> Result<Vec<MemoryEdge>, EngramError> {
        let snapshot = self.snapshot()?;
        snapshot.require_node(node)?;
        snapshot.get_edges(node, direction, type_filter)
    }

    pub fn neighbors(
        &self,
        node: NodeId,
        direction: Direction,
        type_filter: Option<&BTreeSet<Relationship>>,
        min_strength: Score,
    ) -> Result<Vec<(MemoryEdge, NodeId)>, EngramError> {
        self.snapshot()?
            .neighbors(node, direction, type_filter, min_strength)
    }

    pub fn nodes_since(&self, since: Timestamp) -> Result<Vec<NodeId>, EngramError> {
        self.snapshot()?.nodes_since(since)
    }

    pub fn nodes_by_tag(&self, tag: &str) -> Result<Vec<NodeId>, EngramError> {
        self.snapshot()?.nodes_by_tag(tag)
    }

    pub fn nodes_by_participant(&self, participant: &str) -> Result<Vec<NodeId>, EngramError> {
        self.snapshot()?.nodes_by_participant(participant)
    }

    pub fn search(&self, text: &str, limit: Option<usize>) -> Result<Vec<MemoryNode>, EngramError> {
        query::search(&self.snapshot()?, text, limit)
    }

    pub fn traverse(
        &self,
        start: NodeId,
        options: &TraverseOptions,
    ) -> Result<Vec<TraversalHit>, EngramError> {
        self.traverse_with(start, options, &self.default_limits())
    }

    /// Like [`MemoryStore::traverse`] with caller-provided deadline or
    /// cancellation.
    pub fn traverse_with(
        &self,
        start: NodeId,
        options: &TraverseOptions,
        limits: &WalkLimits,
    ) -> Result<Vec<TraversalHit>, EngramError> {
        Traversal::traverse(&self.snapshot()?, start, options, limits)
    }

    pub fn find_path(
        &self,
        from: NodeId,
        to: NodeId,
        options: &PathOptions,
    ) -> Result<Vec<NodeId>, EngramError> {
        self.find_path_with(from, to, options, &self.default_limits())
    }

    pub fn find_path_with(
        &self,
        from: NodeId,
        to: NodeId,
        options: &PathOptions,
        limits: &WalkLimits,
    ) -> Result<Vec<NodeId>, EngramError> {
        Traversal::find_path(&self.snapshot()?, from, to, options, limits)
    }

    pub fn find_related(
        &self,
        node: NodeId,
        relationship: Option<&Relationship>,
        direction: Direction,
    ) -> Result<Vec<(MemoryEdge, MemoryNode)>, EngramError> {
        Traversal::find_related(&self.snapshot()?, node, relationship, direction)
    }

    pub fn context_window(
        &self,
        center: NodeId,
        before: usize,
        after: usize,
    ) -> Result<ContextWindow, EngramError> {
        Traversal::context_window(&self.snapshot()?, center, before, after, &self.default_limits())
    }

    pub fn resolve(&self, id: NodeId) -> Result<ReconciliationResult, EngramError> {
        Reconciler::resolve(&self.snapshot()?, id, &self.config.reconcile)
    }

    /// Execute a structured query against one snapshot.
    pub fn execute(&self, query: &Query) -> Result<QueryOutput, EngramError> {
        let limits = match query.timeout_ms {
            Some(ms) => WalkLimits::with_timeout(Duration::from_millis(ms)),
            None => self.default_limits(),
        };
        query::execute(&self.snapshot()?, query, &self.config, &limits)
    }

    pub fn stats(&self) -> Result<GraphMetrics, EngramError> {
        GraphMetrics::from_view(&self.snapshot()?)
    }

    pub fn node_count(&self) -> Result<usize, EngramError> {
        self.snapshot()?.node_count()
    }

    pub fn edge_count(&self) -> Result<usize, EngramError> {
        self.snapshot()?.edge_count()
    }

    /// Canonical byte stream of the current state.
    pub fn export_canonical(&self) -> Result<Vec<u8>, EngramError> {
        export::export_canonical(&self.snapshot()?)
    }

    /// BLAKE3 fingerprint of the current state.
    pub fn canonical_hash(&self) -> Result<String, EngramError> {
        export::canonical_hash(&self.snapshot()?)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::in_memory(EngineConfig::default()).expect("store")
    }

    fn persistent(dir: &tempfile::TempDir) -> MemoryStore {
        MemoryStore::open(dir.path().join("engram.redb"), EngineConfig::default()).expect("open")
    }

    fn node(what: &str, at: i64) -> MemoryNode {
        MemoryNode::new(what, Timestamp(at))
    }

    #[test]
    fn put_and_get_node() {
        let store = store();
        let id = store.put_node(node("first memory", 1)).expect("put");
        assert_eq!(id, NodeId(1));
        assert_eq!(store.get_node(id).expect("get").what, "first memory");
        assert!(matches!(
            store.get_node(NodeId(7)),
            Err(EngramError::NodeNotFound(NodeId(7)))
        ));
    }

    #[test]
    fn dangling_edge_leaves_store_unchanged() {
        let store = store();
        let a = store.put_node(node("only node", 1)).expect("put");
        let result = store.put_edge(MemoryEdge::new(a, NodeId(99), Relationship::Supports, Timestamp(0)));
        assert!(matches!(result, Err(EngramError::DanglingReference { .. })));
        assert_eq!(store.edge_count().expect("count"), 0);
        assert!(store.get_edges(a, Direction::Both, None).expect("edges").is_empty());
    }

    #[test]
    fn committed_edges_cannot_be_reput() {
        let store = store();
        let a = store.put_node(node("a memory", 1)).expect("put");
        let b = store.put_node(node("b memory", 2)).expect("put");
        let id = store
            .put_edge(MemoryEdge::new(a, b, Relationship::LedTo, Timestamp(0)))
            .expect("edge");
        let edge = store.get_edge(id).expect("get");
        assert!(matches!(
            store.put_edge(edge),
            Err(EngramError::InvalidField { field: "id", .. })
        ));
    }

    #[test]
    fn get_edges_of_unknown_node_is_not_found() {
        assert!(matches!(
            store().get_edges(NodeId(3), Direction::Both, None),
            Err(EngramError::NodeNotFound(NodeId(3)))
        ));
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let store = store();
        store.put_node(node("before", 1)).expect("put");
        let snapshot = store.snapshot().expect("snapshot");
        store.put_node(node("after", 2)).expect("put");
        assert_eq!(snapshot.node_count().expect("count"), 1);
        assert_eq!(store.node_count().expect("count"), 2);
    }

    #[test]
    fn persistent_snapshot_is_isolated_from_later_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = persistent(&dir);
        store.put_node(node("before", 1)).expect("put");
        let snapshot = store.snapshot().expect("snapshot");
        store.put_node(node("after", 2)).expect("put");
        assert_eq!(snapshot.node_count().expect("count"), 1);
        assert_eq!(store.node_count().expect("count"), 2);
    }

    #[test]
    fn ingest_twice_is_idempotent() {
        let store = store();
        let first = store
            .ingest(node("Release 2.1 shipped to production", 100))
            .expect("ingest");
        let edges = store.edge_count().expect("count");
        let second = store
            .ingest(node("Release 2.1 shipped to production", 100))
            .expect("ingest");
        assert_eq!(first.node.id, second.node.id);
        assert!(!second.created);
        assert_eq!(store.edge_count().expect("count"), edges);
    }

    #[test]
    fn confirm_supersession_requires_edge() {
        let store = store();
        let old = store.put_node(node("old owner", 1)).expect("put");
        let new = store.put_node(node("new owner", 2)).expect("put");
        assert!(matches!(
            store.confirm_supersession(new, old),
            Err(EngramError::InvalidField {
                field: "supersession",
                ..
            })
        ));

        store
            .put_edge(MemoryEdge::new(new, old, Relationship::Supersedes, Timestamp(0)))
            .expect("edge");
        store.confirm_supersession(new, old).expect("confirm");
        let resolved = store.resolve(old).expect("resolve");
        assert_eq!(resolved.current.id, new);
        assert_eq!(resolved.superseded_chain.len(), 1);

        // confirming again changes nothing
        store.confirm_supersession(new, old).expect("idempotent");
    }

    #[test]
    fn supersession_cycle_leaves_state_intact() {
        let store = store();
        let x = store.put_node(node("x version", 1)).expect("put");
        let y = store.put_node(node("y version", 2)).expect("put");
        let mut old_x = store.get_node(x).expect("x");
        old_x.status = NodeStatus::Superseded;
        old_x.superseded_by = Some(y);
        store.put_node(old_x).expect("x superseded by y");

        let mut old_y = store.get_node(y).expect("y");
        old_y.status = NodeStatus::Superseded;
        old_y.superseded_by = Some(x);
        assert!(matches!(
            store.put_node(old_y),
            Err(EngramError::SupersessionCycle(_))
        ));
        assert!(store.get_node(y).expect("y").is_active());
    }

    #[test]
    fn archive_and_collect_edges() {
        let store = store();
        let a = store.put_node(node("keep me", 1)).expect("put");
        let b = store.put_node(node("forget me", 2)).expect("put");
        let edge = store
            .put_edge(MemoryEdge::new(a, b, Relationship::RelatesTo, Timestamp(0)))
            .expect("edge");
        store.archive(b).expect("archive");

        // edges survive archival until collected
        assert_eq!(store.get_edges(a, Direction::Both, None).expect("edges").len(), 1);
        assert_eq!(store.collect_archived_edges().expect("gc"), vec![edge]);
        assert_eq!(store.edge_count().expect("count"), 0);
        assert_eq!(store.get_node(b).expect("b").status, NodeStatus::Archived);

        let next = store.put_node(node("later", 3)).expect("put");
        let fresh = store
            .put_edge(MemoryEdge::new(a, next, Relationship::LedTo, Timestamp(1)))
            .expect("edge");
        assert!(fresh > edge);
    }

    #[test]
    fn set_status_rejects_superseded() {
        let store = store();
        let a = store.put_node(node("a memory", 1)).expect("put");
        assert!(store.set_status(a, NodeStatus::Superseded).is_err());
        store.set_status(a, NodeStatus::Disputed).expect("disputed");
        assert_eq!(store.get_node(a).expect("a").status, NodeStatus::Disputed);
    }

    #[test]
    fn zero_timeout_query_is_cancelled() {
        let store = store();
        let a = store.put_node(node("start", 1)).expect("put");
        let result = store.execute(&Query::with_timeout(
            crate::query::QueryType::Traverse {
                start: a,
                options: TraverseOptions::default(),
            },
            0,
        ));
        assert!(matches!(result, Err(EngramError::CancelledOrTimedOut { .. })));
    }

    #[test]
    fn export_restores_into_redb() {
        let source = store();
        let a = source.ingest(node("Design review for search", 10)).expect("ingest");
        let b = source.ingest(node("Search latency budget agreed", 20)).expect("ingest");
        source
            .put_edge(MemoryEdge::new(a.node.id, b.node.id, Relationship::LedTo, Timestamp(5)))
            .expect("edge");
        let bytes = source.export_canonical().expect("export");

        let dir = tempfile::tempdir().expect("tempdir");
        let target = persistent(&dir);
        target.restore(&bytes).expect("restore");
        assert_eq!(
            target.canonical_hash().expect("hash"),
            source.canonical_hash().expect("hash")
        );
        assert!(matches!(
            target.restore(&bytes),
            Err(EngramError::InvalidField { field: "store", .. })
        ));

        let next = target.put_node(node("after restore", 30)).expect("put");
        assert_eq!(next, NodeId(3));
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = {
            let store = persistent(&dir);
            let id = store.put_node(node("durable", 1).with_tags(["ops"])).expect("put");
            store.close().expect("close");
            id
        };
        let store = persistent(&dir);
        assert_eq!(store.get_node(id).expect("get").what, "durable");
        assert_eq!(store.nodes_by_tag("ops").expect("tag"), vec![id]);
    }

    #[test]
    fn readers_run_while_writer_commits() {
        let store = Arc::new(store());
        let root = store.put_node(node("root", 0)).expect("put");
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 1..50 {
                    let id = store.put_node(node(&format!("child {}", i), i)).expect("put");
                    store
                        .put_edge(MemoryEdge::new(root, id, Relationship::LedTo, Timestamp(i)))
                        .expect("edge");
                }
            })
        };
        for _ in 0..50 {
            let snapshot = store.snapshot().expect("snapshot");
            for edge in snapshot.all_edges().expect("edges") {
                assert!(snapshot.contains_node(edge.to_id).expect("contains"));
            }
        }
        writer.join().expect("writer");
        assert_eq!(store.edge_count().expect("count"), 49);
    }

    #[test]
    fn ingest_review_flag_describes_its_own_commit() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let store = Arc::new(store());
        let rival = store.put_node(node("rival account", 0)).expect("put");
        let done = Arc::new(AtomicBool::new(false));

        // contradicts each node once, as soon as it is the newest
        let contradictor = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut last_linked = rival;
                while !done.load(Ordering::Acquire) {
                    let next = store.snapshot().expect("snapshot").next_node_id().expect("next");
                    let latest = NodeId(next.0 - 1);
                    if latest == last_linked {
                        std::thread::yield_now();
                        continue;
                    }
                    store
                        .put_edge(MemoryEdge::new(
                            rival,
                            latest,
                            Relationship::Contradicts,
                            Timestamp(0),
                        ))
                        .expect("contradicts");
                    last_linked = latest;
                }
            })
        };

        for i in 1..=40_i64 {
            let result = store
                .ingest(node(&format!("sensor{} calibrated{}", i, i), i * 100_000))
                .expect("ingest");
            assert!(result.created);
            assert!(result.conflicts.is_empty());
            assert!(
                !result.needs_review,
                "ingest of node {} reported a dispute it did not create",
                result.node.id
            );
        }

        let last = NodeId(store.node_count().expect("count") as u64);
        let contradicted = |id: NodeId| {
            store
                .get_edges(id, Direction::Incoming, None)
                .expect("edges")
                .iter()
                .any(|e| e.relationship == Relationship::Contradicts)
        };
        while !contradicted(last) && !contradictor.is_finished() {
            std::thread::yield_now();
        }
        done.store(true, Ordering::Release);
        contradictor.join().expect("contradictor");

        // the later edge is visible to a fresh resolution
        assert!(store.resolve(last).expect("resolve").needs_review);
    }
}
