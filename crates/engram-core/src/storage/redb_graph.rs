//! # redb-backed Graph Storage
//!
//! A disk-backed memory store using the redb embedded database:
//! - ACID transactions (one write transaction per batch)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC: a [`RedbSnapshot`] wraps a read transaction and keeps seeing the
//!   state as of its start while writers commit
//!
//! Records are postcard-encoded. Secondary and adjacency indexes are redb
//! multimap tables written in the same transaction as the records.

use crate::graph::GraphView;
use crate::index::{IndexKeys, normalize_label};
use crate::mutation::ValidatedBatch;
use crate::types::{
    ContentHash, Direction, EdgeId, EngramError, MemoryEdge, MemoryNode, NodeId, Timestamp,
};
use redb::{
    Database, MultimapTableDefinition, ReadTransaction, ReadableDatabase,
    ReadableTable, ReadableTableMetadata, TableDefinition,
};
use std::collections::BTreeSet;
use std::path::Path;

/// NodeId(u64) -> postcard `MemoryNode`
const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");

/// EdgeId(u64) -> postcard `MemoryEdge`
const EDGES: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");

/// Counters: "next_node_id", "next_edge_id"
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// from_id -> (created_at, edge_id)
const OUTGOING: MultimapTableDefinition<u64, (i64, u64)> =
    MultimapTableDefinition::new("adj_outgoing");

/// to_id -> (created_at, edge_id)
const INCOMING: MultimapTableDefinition<u64, (i64, u64)> =
    MultimapTableDefinition::new("adj_incoming");

/// occurred_at -> node_id
const BY_TIME: MultimapTableDefinition<i64, u64> = MultimapTableDefinition::new("idx_time");

const BY_TAG: MultimapTableDefinition<&str, u64> = MultimapTableDefinition::new("idx_tag");

const BY_PARTICIPANT: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("idx_participant");

const BY_TOKEN: MultimapTableDefinition<&str, u64> = MultimapTableDefinition::new("idx_token");

const BY_HASH: MultimapTableDefinition<&str, u64> = MultimapTableDefinition::new("idx_hash");

const NEXT_NODE_KEY: &str = "next_node_id";
const NEXT_EDGE_KEY: &str = "next_edge_id";

fn storage_err(e: impl std::fmt::Display) -> EngramError {
    EngramError::IoError(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, EngramError> {
    postcard::to_allocvec(value).map_err(|e| EngramError::SerializationError(e.to_string()))
}

fn decode<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, EngramError> {
    postcard::from_bytes(bytes).map_err(|e| EngramError::DeserializationError(e.to_string()))
}

// =============================================================================
// DATABASE HANDLE
// =============================================================================

/// A memory store persisted in a redb database file.
pub struct RedbGraph {
    db: Database,
}

impl std::fmt::Debug for RedbGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbGraph").finish_non_exhaustive()
    }
}

impl RedbGraph {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngramError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Create every table up front so read transactions never miss one.
        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            write_txn.open_table(NODES).map_err(storage_err)?;
            write_txn.open_table(EDGES).map_err(storage_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(storage_err)?;
            for key in [NEXT_NODE_KEY, NEXT_EDGE_KEY] {
                if meta.get(key).map_err(storage_err)?.is_none() {
                    meta.insert(key, 1u64).map_err(storage_err)?;
                }
            }
            write_txn.open_multimap_table(OUTGOING).map_err(storage_err)?;
            write_txn.open_multimap_table(INCOMING).map_err(storage_err)?;
            write_txn.open_multimap_table(BY_TIME).map_err(storage_err)?;
            write_txn.open_multimap_table(BY_TAG).map_err(storage_err)?;
            write_txn
                .open_multimap_table(BY_PARTICIPANT)
                .map_err(storage_err)?;
            write_txn.open_multimap_table(BY_TOKEN).map_err(storage_err)?;
            write_txn.open_multimap_table(BY_HASH).map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        Ok(Self { db })
    }

    /// Start a consistent read-only view of the current committed state.
    pub fn snapshot(&self) -> Result<RedbSnapshot, EngramError> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        Ok(RedbSnapshot { txn })
    }

    /// Write a validated batch in a single transaction.
    ///
    /// Records, indexes and counters become visible together on commit.
    pub fn commit(&self, batch: &ValidatedBatch) -> Result<(), EngramError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut nodes = write_txn.open_table(NODES).map_err(storage_err)?;
            let mut edges = write_txn.open_table(EDGES).map_err(storage_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(storage_err)?;
            let mut outgoing = write_txn.open_multimap_table(OUTGOING).map_err(storage_err)?;
            let mut incoming = write_txn.open_multimap_table(INCOMING).map_err(storage_err)?;
            let mut by_time = write_txn.open_multimap_table(BY_TIME).map_err(storage_err)?;
            let mut by_tag = write_txn.open_multimap_table(BY_TAG).map_err(storage_err)?;
            let mut by_participant = write_txn
                .open_multimap_table(BY_PARTICIPANT)
                .map_err(storage_err)?;
            let mut by_token = write_txn.open_multimap_table(BY_TOKEN).map_err(storage_err)?;
            let mut by_hash = write_txn.open_multimap_table(BY_HASH).map_err(storage_err)?;

            for node in batch.created_nodes() {
                let bytes = encode(node)?;
                nodes
                    .insert(node.id.0, bytes.as_slice())
                    .map_err(storage_err)?;

                let keys = IndexKeys::of(node);
                by_time
                    .insert(node.occurred_at.as_unix(), node.id.0)
                    .map_err(storage_err)?;
                for tag in &keys.tags {
                    by_tag.insert(tag.as_str(), node.id.0).map_err(storage_err)?;
                }
                for participant in &keys.participants {
                    by_participant
                        .insert(participant.as_str(), node.id.0)
                        .map_err(storage_err)?;
                }
                for token in &keys.tokens {
                    by_token
                        .insert(token.as_str(), node.id.0)
                        .map_err(storage_err)?;
                }
                by_hash
                    .insert(node.content_hash.as_str(), node.id.0)
                    .map_err(storage_err)?;
            }

            for node in batch.updated_nodes() {
                let bytes = encode(node)?;
                nodes
                    .insert(node.id.0, bytes.as_slice())
                    .map_err(storage_err)?;
            }

            for edge in batch.created_edges() {
                let bytes = encode(edge)?;
                edges
                    .insert(edge.id.0, bytes.as_slice())
                    .map_err(storage_err)?;
                let key = (edge.created_at.as_unix(), edge.id.0);
                outgoing.insert(edge.from_id.0, key).map_err(storage_err)?;
                incoming.insert(edge.to_id.0, key).map_err(storage_err)?;
            }

            for id in batch.removed_edges() {
                let removed = edges
                    .remove(id.0)
                    .map_err(storage_err)?
                    .map(|guard| decode::<MemoryEdge>(guard.value()))
                    .transpose()?;
                if let Some(edge) = removed {
                    let key = (edge.created_at.as_unix(), edge.id.0);
                    outgoing.remove(edge.from_id.0, key).map_err(storage_err)?;
                    incoming.remove(edge.to_id.0, key).map_err(storage_err)?;
                }
            }

            meta.insert(NEXT_NODE_KEY, batch.next_node_id().0)
                .map_err(storage_err)?;
            meta.insert(NEXT_EDGE_KEY, batch.next_edge_id().0)
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<bool, EngramError> {
        self.db.compact().map_err(storage_err)
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A read transaction exposing the store as it was when it began.
pub struct RedbSnapshot {
    txn: ReadTransaction,
}

impl std::fmt::Debug for RedbSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbSnapshot").finish_non_exhaustive()
    }
}

impl RedbSnapshot {
    fn lookup_label(
        &self,
        table: MultimapTableDefinition<'static, &'static str, u64>,
        key: &str,
    ) -> Result<Vec<NodeId>, EngramError> {
        let table = self.txn.open_multimap_table(table).map_err(storage_err)?;
        let mut ids = Vec::new();
        for value in table.get(key).map_err(storage_err)? {
            ids.push(NodeId(value.map_err(storage_err)?.value()));
        }
        Ok(ids)
    }

    fn adjacent(
        &self,
        table: MultimapTableDefinition<'static, u64, (i64, u64)>,
        node: NodeId,
    ) -> Result<BTreeSet<(i64, u64)>, EngramError> {
        let table = self.txn.open_multimap_table(table).map_err(storage_err)?;
        let mut keys = BTreeSet::new();
        for value in table.get(node.0).map_err(storage_err)? {
            keys.insert(value.map_err(storage_err)?.value());
        }
        Ok(keys)
    }

    fn counter(&self, key: &str) -> Result<u64, EngramError> {
        let table = self.txn.open_table(METADATA).map_err(storage_err)?;
        Ok(table
            .get(key)
            .map_err(storage_err)?
            .map(|v| v.value())
            .unwrap_or(1))
    }
}

impl GraphView for RedbSnapshot {
    fn get_node(&self, id: NodeId) -> Result<Option<MemoryNode>, EngramError> {
        let table = self.txn.open_table(NODES).map_err(storage_err)?;
        table
            .get(id.0)
            .map_err(storage_err)?
            .map(|guard| decode(guard.value()))
            .transpose()
    }

    fn get_edge(&self, id: EdgeId) -> Result<Option<MemoryEdge>, EngramError> {
        let table = self.txn.open_table(EDGES).map_err(storage_err)?;
        table
            .get(id.0)
            .map_err(storage_err)?
            .map(|guard| decode(guard.value()))
            .transpose()
    }

    fn edges_of(
        &self,
        node: NodeId,
        direction: Direction,
    ) -> Result<Vec<MemoryEdge>, EngramError> {
        let mut keys = BTreeSet::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            keys.extend(self.adjacent(OUTGOING, node)?);
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            keys.extend(self.adjacent(INCOMING, node)?);
        }
        let mut edges = Vec::with_capacity(keys.len());
        for (_, id) in keys {
            if let Some(edge) = self.get_edge(EdgeId(id))? {
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    fn nodes_between(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<NodeId>, EngramError> {
        if start > end {
            return Ok(Vec::new());
        }
        let table = self.txn.open_multimap_table(BY_TIME).map_err(storage_err)?;
        let mut ids = Vec::new();
        for entry in table
            .range(start.as_unix()..=end.as_unix())
            .map_err(storage_err)?
        {
            let (_, values) = entry.map_err(storage_err)?;
            for value in values {
                ids.push(NodeId(value.map_err(storage_err)?.value()));
            }
        }
        Ok(ids)
    }

    fn nodes_before(
        &self,
        at: Timestamp,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<(Timestamp, NodeId)>, EngramError> {
        let mut found = Vec::new();
        if limit == 0 {
            return Ok(found);
        }
        let table = self.txn.open_multimap_table(BY_TIME).map_err(storage_err)?;
        for entry in table.range(..=at.as_unix()).map_err(storage_err)?.rev() {
            let (key, values) = entry.map_err(storage_err)?;
            let occurred = Timestamp(key.value());
            for value in values.rev() {
                let node = NodeId(value.map_err(storage_err)?.value());
                if occurred == at && node >= id {
                    continue;
                }
                found.push((occurred, node));
                if found.len() == limit {
                    return Ok(found);
                }
            }
        }
        Ok(found)
    }

    fn nodes_after(
        &self,
        at: Timestamp,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<(Timestamp, NodeId)>, EngramError> {
        let mut found = Vec::new();
        if limit == 0 {
            return Ok(found);
        }
        let table = self.txn.open_multimap_table(BY_TIME).map_err(storage_err)?;
        for entry in table.range(at.as_unix()..).map_err(storage_err)? {
            let (key, values) = entry.map_err(storage_err)?;
            let occurred = Timestamp(key.value());
            for value in values {
                let node = NodeId(value.map_err(storage_err)?.value());
                if occurred == at && node <= id {
                    continue;
                }
                found.push((occurred, node));
                if found.len() == limit {
                    return Ok(found);
                }
            }
        }
        Ok(found)
    }

    fn nodes_by_tag(&self, tag: &str) -> Result<Vec<NodeId>, EngramError> {
        self.lookup_label(BY_TAG, &normalize_label(tag))
    }

    fn nodes_by_participant(&self, participant: &str) -> Result<Vec<NodeId>, EngramError> {
        self.lookup_label(BY_PARTICIPANT, &normalize_label(participant))
    }

    fn nodes_by_token(&self, token: &str) -> Result<Vec<NodeId>, EngramError> {
        self.lookup_label(BY_TOKEN, &token.to_lowercase())
    }

    fn nodes_by_hash(&self, hash: &ContentHash) -> Result<Vec<NodeId>, EngramError> {
        self.lookup_label(BY_HASH, hash.as_str())
    }

    fn node_ids(&self) -> Result<Vec<NodeId>, EngramError> {
        let table = self.txn.open_table(NODES).map_err(storage_err)?;
        let mut ids = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (key, _) = entry.map_err(storage_err)?;
            ids.push(NodeId(key.value()));
        }
        Ok(ids)
    }

    fn all_edges(&self) -> Result<Vec<MemoryEdge>, EngramError> {
        let table = self.txn.open_table(EDGES).map_err(storage_err)?;
        let mut edges = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            edges.push(decode(value.value())?);
        }
        Ok(edges)
    }

    fn node_count(&self) -> Result<usize, EngramError> {
        let table = self.txn.open_table(NODES).map_err(storage_err)?;
        Ok(table.len().map_err(storage_err)? as usize)
    }

    fn edge_count(&self) -> Result<usize, EngramError> {
        let table = self.txn.open_table(EDGES).map_err(storage_err)?;
        Ok(table.len().map_err(storage_err)? as usize)
    }

    fn next_node_id(&self) -> Result<NodeId, EngramError> {
        self.counter(NEXT_NODE_KEY).map(NodeId)
    }

    fn next_edge_id(&self) -> Result<EdgeId, EngramError> {
        self.counter(NEXT_EDGE_KEY).map(EdgeId)
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
    use crate::types::{Relationship, Score};
    use tempfile::tempdir;

    fn commit(graph: &RedbGraph, build: impl FnOnce(&mut WriteBatch)) -> Result<(), EngramError> {
        let snapshot = graph.snapshot()?;
        let mut batch = WriteBatch::against(&snapshot)?;
        build(&mut batch);
        let validated = MutationEngine::validate(&snapshot, batch)?;
        graph.commit(&validated)
    }

    #[test]
    fn fresh_database_counters_start_at_one() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("test.redb")).expect("open db");
        let snapshot = graph.snapshot().expect("snapshot");
        assert_eq!(snapshot.next_node_id().expect("next"), NodeId(1));
        assert_eq!(snapshot.next_edge_id().expect("next"), EdgeId(1));
        assert_eq!(snapshot.node_count().expect("count"), 0);
    }

    #[test]
    fn nodes_edges_and_indexes_persist() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        {
            let graph = RedbGraph::open(&db_path).expect("open db");
            commit(&graph, |batch| {
                let a = batch.create_node(
                    MemoryNode::new("Migrated billing to Postgres", Timestamp(100))
                        .with_who(["Ana"])
                        .with_tags(["infra"]),
                );
                let b = batch.create_node(MemoryNode::new("Cut over traffic", Timestamp(200)));
                batch.add_edge(
                    MemoryEdge::new(a, b, Relationship::LedTo, Timestamp(300))
                        .with_strength(Score::from_permille(800)),
                );
            })
            .expect("commit");
        }

        let graph = RedbGraph::open(&db_path).expect("reopen");
        let snapshot = graph.snapshot().expect("snapshot");
        assert_eq!(snapshot.node_count().expect("count"), 2);
        assert_eq!(snapshot.edge_count().expect("count"), 1);
        assert_eq!(snapshot.next_node_id().expect("next"), NodeId(3));
        assert_eq!(snapshot.nodes_by_tag("INFRA").expect("tag"), vec![NodeId(1)]);
        assert_eq!(snapshot.nodes_by_participant("ana").expect("who"), vec![NodeId(1)]);
        assert_eq!(snapshot.nodes_by_token("postgres").expect("token"), vec![NodeId(1)]);
        assert_eq!(
            snapshot.nodes_between(Timestamp(150), Timestamp(250)).expect("range"),
            vec![NodeId(2)]
        );
        assert_eq!(
            snapshot.nodes_before(Timestamp(200), NodeId(2), 5).expect("before"),
            vec![(Timestamp(100), NodeId(1))]
        );
        assert_eq!(
            snapshot.nodes_after(Timestamp(100), NodeId(1), 1).expect("after"),
            vec![(Timestamp(200), NodeId(2))]
        );
        assert!(snapshot.nodes_after(Timestamp(200), NodeId(2), 5).expect("after").is_empty());

        let edges = snapshot.edges_of(NodeId(2), Direction::Incoming).expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].strength.permille(), 800);
        assert_eq!(edges[0].relationship, Relationship::LedTo);

        let node = snapshot.require_node(NodeId(1)).expect("node");
        assert_eq!(node.what, "Migrated billing to Postgres");
        assert_eq!(
            snapshot.nodes_by_hash(&node.content_hash).expect("hash"),
            vec![NodeId(1)]
        );
    }

    #[test]
    fn snapshot_is_isolated_from_later_commits() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("test.redb")).expect("open db");
        commit(&graph, |batch| {
            batch.create_node(MemoryNode::new("first", Timestamp(1)));
        })
        .expect("commit");

        let before = graph.snapshot().expect("snapshot");
        commit(&graph, |batch| {
            batch.create_node(MemoryNode::new("second", Timestamp(2)));
        })
        .expect("commit");

        assert_eq!(before.node_count().expect("count"), 1);
        assert_eq!(graph.snapshot().expect("snapshot").node_count().expect("count"), 2);
    }

    #[test]
    fn dangling_edge_leaves_database_unchanged() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("test.redb")).expect("open db");
        let result = commit(&graph, |batch| {
            let a = batch.create_node(MemoryNode::new("lonely", Timestamp(1)));
            batch.add_edge(MemoryEdge::new(a, NodeId(50), Relationship::Supports, Timestamp(1)));
        });
        assert!(matches!(result, Err(EngramError::DanglingReference { .. })));

        let snapshot = graph.snapshot().expect("snapshot");
        assert_eq!(snapshot.node_count().expect("count"), 0);
        assert_eq!(snapshot.edge_count().expect("count"), 0);
        assert_eq!(snapshot.next_node_id().expect("next"), NodeId(1));
    }

    #[test]
    fn removed_edges_leave_adjacency() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("test.redb")).expect("open db");
        commit(&graph, |batch| {
            let a = batch.create_node(MemoryNode::new("a", Timestamp(1)));
            let b = batch.create_node(MemoryNode::new("b", Timestamp(2)));
            batch.add_edge(MemoryEdge::new(a, b, Relationship::RelatesTo, Timestamp(3)));
        })
        .expect("commit");

        commit(&graph, |batch| batch.remove_edge(EdgeId(1))).expect("remove");

        let snapshot = graph.snapshot().expect("snapshot");
        assert_eq!(snapshot.edge_count().expect("count"), 0);
        assert!(snapshot.edges_of(NodeId(1), Direction::Both).expect("edges").is_empty());
        // ids are never reused
        assert_eq!(snapshot.next_edge_id().expect("next"), EdgeId(2));
    }
}
