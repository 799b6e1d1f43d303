//! # Canonical Export Module
//!
//! redb files are not bit-identical across runs, so verification and
//! backups go through a canonical stream instead:
//!
//! ```text
//! [header_len: u32 LE] [CanonicalHeader (postcard)] [CanonicalGraph (postcard)]
//! ```
//!
//! Nodes and edges are sorted by id and the payload is checksummed with
//! BLAKE3, so two stores with the same contents export the same bytes
//! regardless of backend.

use crate::graph::{Graph, GraphView};
use crate::primitives::{
    CANONICAL_MAGIC, CANONICAL_VERSION, MAX_IMPORT_EDGE_COUNT, MAX_IMPORT_NODE_COUNT,
};
use crate::types::{EdgeId, EngramError, MemoryEdge, MemoryNode, NodeId, NodeStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// CANONICAL FORMAT
// =============================================================================

/// Header for canonical export files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub node_count: u64,
    pub edge_count: u64,
    /// BLAKE3 digest of the postcard payload.
    pub checksum: [u8; 32],
}

impl CanonicalHeader {
    #[must_use]
    pub fn new(node_count: u64, edge_count: u64, checksum: [u8; 32]) -> Self {
        Self {
            magic: CANONICAL_MAGIC,
            version: CANONICAL_VERSION,
            node_count,
            edge_count,
            checksum,
        }
    }

    /// Error messages stay generic; the file may come from anywhere.
    pub fn validate(&self) -> Result<(), EngramError> {
        if self.magic != CANONICAL_MAGIC {
            return Err(EngramError::DeserializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != CANONICAL_VERSION {
            return Err(EngramError::DeserializationError(
                "Unsupported file version".to_string(),
            ));
        }
        if self.node_count > MAX_IMPORT_NODE_COUNT {
            return Err(EngramError::DeserializationError(format!(
                "Node count {} exceeds maximum allowed {}",
                self.node_count, MAX_IMPORT_NODE_COUNT
            )));
        }
        if self.edge_count > MAX_IMPORT_EDGE_COUNT {
            return Err(EngramError::DeserializationError(format!(
                "Edge count {} exceeds maximum allowed {}",
                self.edge_count, MAX_IMPORT_EDGE_COUNT
            )));
        }
        Ok(())
    }
}

/// Every record of a store, sorted by id, plus the id counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalGraph {
    pub nodes: Vec<MemoryNode>,
    pub edges: Vec<MemoryEdge>,
    pub next_node_id: u64,
    pub next_edge_id: u64,
}

impl CanonicalGraph {
    /// Collect a snapshot in canonical order.
    pub fn from_view<G: GraphView + ?Sized>(view: &G) -> Result<Self, EngramError> {
        let mut nodes = Vec::with_capacity(view.node_count()?);
        for id in view.node_ids()? {
            nodes.push(view.require_node(id)?);
        }
        Ok(Self {
            nodes,
            edges: view.all_edges()?,
            next_node_id: view.next_node_id()?.0,
            next_edge_id: view.next_edge_id()?.0,
        })
    }

    /// Rebuild an in-memory graph, preserving ids and counters.
    #[must_use]
    pub fn into_graph(self) -> Graph {
        Graph::from_parts(
            self.nodes,
            self.edges,
            NodeId(self.next_node_id),
            EdgeId(self.next_edge_id),
        )
    }
}

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>, EngramError> {
    postcard::to_allocvec(value)
        .map_err(|e| EngramError::SerializationError(format!("{}: {}", what, e)))
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Export a snapshot to the canonical byte stream.
pub fn export_canonical<G: GraphView + ?Sized>(view: &G) -> Result<Vec<u8>, EngramError> {
    let canonical = CanonicalGraph::from_view(view)?;
    let data = encode(&canonical, "Data")?;
    let header = CanonicalHeader::new(
        canonical.nodes.len() as u64,
        canonical.edges.len() as u64,
        *blake3::hash(&data).as_bytes(),
    );
    let header_bytes = encode(&header, "Header")?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| EngramError::SerializationError("Header too large".to_string()))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data.len());
    result.extend_from_slice(&header_len.to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data);
    Ok(result)
}

/// Decode and verify a canonical stream.
///
/// Checks, in order: framing, header, checksum, counts, record validity
/// and referential integrity. Nothing is returned unless all pass.
pub fn import_canonical(data: &[u8]) -> Result<Graph, EngramError> {
    let Some((len_bytes, rest)) = data.split_first_chunk::<4>() else {
        return Err(EngramError::DeserializationError(
            "Data too short".to_string(),
        ));
    };
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(EngramError::DeserializationError(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, payload) = rest.split_at(header_len);

    let header: CanonicalHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| EngramError::DeserializationError(format!("Header: {}", e)))?;
    header.validate()?;

    if *blake3::hash(payload).as_bytes() != header.checksum {
        return Err(EngramError::DeserializationError(
            "Checksum mismatch".to_string(),
        ));
    }

    let canonical: CanonicalGraph = postcard::from_bytes(payload)
        .map_err(|e| EngramError::DeserializationError(format!("Data: {}", e)))?;
    if canonical.nodes.len() as u64 != header.node_count {
        return Err(EngramError::DeserializationError(
            "Node count mismatch".to_string(),
        ));
    }
    if canonical.edges.len() as u64 != header.edge_count {
        return Err(EngramError::DeserializationError(
            "Edge count mismatch".to_string(),
        ));
    }

    let graph = canonical.into_graph();
    check_integrity(&graph)?;
    Ok(graph)
}

/// Verify record shapes, edge endpoints and supersession chains of a
/// graph built outside the mutation engine.
pub fn check_integrity(graph: &Graph) -> Result<(), EngramError> {
    let ids: BTreeSet<NodeId> = graph.nodes().map(|n| n.id).collect();
    if ids.contains(&NodeId::UNASSIGNED) {
        return Err(EngramError::invalid("id", "node id 0 is reserved"));
    }

    for node in graph.nodes() {
        node.validate()?;
        if let Some(target) = node.superseded_by
            && !ids.contains(&target)
        {
            return Err(EngramError::DanglingReference {
                context: "superseded_by",
                missing: target,
            });
        }
    }

    for edge in graph.edges() {
        if !edge.id.is_assigned() {
            return Err(EngramError::invalid("id", "edge id 0 is reserved"));
        }
        edge.validate()?;
        for (context, endpoint) in [("edge from_id", edge.from_id), ("edge to_id", edge.to_id)] {
            if !ids.contains(&endpoint) {
                return Err(EngramError::DanglingReference {
                    context,
                    missing: endpoint,
                });
            }
        }
    }

    // Every chain must end; a node already known to end is not re-walked.
    let mut terminating = BTreeSet::new();
    for start in graph.nodes() {
        let mut path = BTreeSet::new();
        let mut current = start.clone();
        while current.status == NodeStatus::Superseded && !terminating.contains(&current.id) {
            if !path.insert(current.id) {
                return Err(EngramError::SupersessionCycle(current.id));
            }
            match current.superseded_by {
                Some(next) => current = graph.require_node(next)?,
                None => break,
            }
        }
        terminating.extend(path);
    }
    Ok(())
}

/// BLAKE3 fingerprint (hex) of a snapshot's canonical export.
pub fn canonical_hash<G: GraphView + ?Sized>(view: &G) -> Result<String, EngramError> {
    let bytes = export_canonical(view)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================
