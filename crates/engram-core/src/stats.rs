//! # Store Metrics
//!
//! Counts describing the shape of a store, computed from one snapshot.

use crate::graph::GraphView;
use crate::types::{EngramError, NodeId, NodeStatus};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Metrics of a store snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct GraphMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    /// Node count per status name.
    pub by_status: BTreeMap<String, usize>,
    /// Node count per kind name.
    pub by_kind: BTreeMap<String, usize>,
    /// Edge count per relationship name.
    pub by_relationship: BTreeMap<String, usize>,
    /// Nodes no edge points at.
    pub root_count: usize,
    /// Edges with an archived endpoint; what `collect_archived_edges` would remove.
    pub archived_edge_count: usize,
    /// Edges per node as fixed-point: density * 1_000_000.
    pub density_millionths: u64,
}

impl GraphMetrics {
    /// Full pass over a snapshot.
    pub fn from_view<G: GraphView + ?Sized>(view: &G) -> Result<Self, EngramError> {
        let mut metrics = Self::default();
        for status in NodeStatus::ALL {
            metrics.by_status.insert(status.as_str().to_string(), 0);
        }

        let mut archived: BTreeSet<NodeId> = BTreeSet::new();
        let mut node_ids = BTreeSet::new();
        for id in view.node_ids()? {
            let node = view.require_node(id)?;
            *metrics
                .by_status
                .entry(node.status.as_str().to_string())
                .or_default() += 1;
            *metrics
                .by_kind
                .entry(node.kind.as_str().to_string())
                .or_default() += 1;
            if node.is_archived() {
                archived.insert(id);
            }
            node_ids.insert(id);
        }

        let mut targets = BTreeSet::new();
        let edges = view.all_edges()?;
        for edge in &edges {
            *metrics
                .by_relationship
                .entry(edge.relationship.as_str().to_string())
                .or_default() += 1;
            if archived.contains(&edge.from_id) || archived.contains(&edge.to_id) {
                metrics.archived_edge_count += 1;
            }
            targets.insert(edge.to_id);
        }

        metrics.node_count = node_ids.len();
        metrics.edge_count = edges.len();
        metrics.root_count = node_ids.difference(&targets).count();
        metrics.density_millionths = if metrics.node_count > 0 {
            (metrics.edge_count as u64).saturating_mul(1_000_000) / metrics.node_count as u64
        } else {
            0
        };
        Ok(metrics)
    }

    /// Density as parts per thousand.
    #[must_use]
    pub fn density_per_thousand(&self) -> u64 {
        self.density_millionths / 1000
    }
}
