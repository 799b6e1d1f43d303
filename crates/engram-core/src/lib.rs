//! # engram-core
//!
//! Graph-structured memory store for agent and assistant workloads.
//!
//! Memories are typed nodes ("what happened, when, who was involved") and
//! typed, weighted edges between them. On top of that the store provides:
//!
//! - Bounded traversal and shortest-path search that terminate on cycles
//! - Belief reconciliation over supersession chains and contradictions
//! - Atomic ingestion with dedup, conflict detection and edge inference
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust)
//! - Deterministic: ordered maps, fixed-point scores, stable tie-breaking
//! - No process-wide store: every operation goes through a [`MemoryStore`]
//! - Every write is validated in full before anything is applied

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod export;
pub mod graph;
pub mod index;
pub mod ingestor;
pub mod mutation;
pub mod primitives;
pub mod query;
pub mod reconcile;
pub mod stats;
pub mod storage;
pub mod store;
pub mod traversal;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    ContentHash, Direction, EdgeId, EngramError, Impact, MemoryEdge, MemoryNode, NodeId,
    NodeKind, NodeStatus, Relationship, Score, Timestamp,
};

// =============================================================================
// RE-EXPORTS: Engines
// =============================================================================

pub use config::{EngineConfig, IngestConfig, ReconcileConfig, TraversalConfig};
pub use export::{CanonicalGraph, CanonicalHeader, canonical_hash, export_canonical, import_canonical};
pub use graph::{Graph, GraphView};
pub use ingestor::{Conflict, ConflictKind, InferenceBasis, InferredEdge, IngestResult, Ingestor};
pub use mutation::{MutationEngine, ValidatedBatch, WriteBatch};
pub use query::{Query, QueryOutput, QueryType, RelatedNode};
pub use reconcile::{ReconciliationResult, Reconciler};
pub use stats::GraphMetrics;
pub use storage::{RedbGraph, RedbSnapshot};
pub use store::{MemoryStore, Snapshot};
pub use traversal::{
    CancelToken, ContextWindow, PathOptions, Traversal, TraversalHit, TraverseOptions,
    WalkDirection, WalkLimits,
};
