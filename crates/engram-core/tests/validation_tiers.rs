//! # Validation Tier Tests (T0-T4)
//!
//! Every tier runs against both backends. If ANY tier fails, the store is
//! INVALID.
//!
//! ## Tiers
//! - T0: Record Integrity
//! - T1: Ingestion
//! - T2: Bounded Traversal
//! - T3: Reconciliation
//! - T4: Persistence and Export

use engram_core::{
    Direction, EngineConfig, EngramError, MemoryEdge, MemoryNode, MemoryStore, NodeId,
    NodeStatus, PathOptions, Relationship, Score, Timestamp, TraverseOptions,
};
use tempfile::TempDir;

/// Run `check` on a fresh in-memory store and a fresh redb store.
fn each_backend(check: impl Fn(&MemoryStore)) {
    let memory = MemoryStore::in_memory(EngineConfig::default()).expect("memory store");
    check(&memory);

    let dir = TempDir::new().expect("tempdir");
    let redb = MemoryStore::open(dir.path().join("tiers.redb"), EngineConfig::default())
        .expect("redb store");
    check(&redb);
}

fn put(store: &MemoryStore, what: &str, at: i64) -> NodeId {
    store
        .put_node(MemoryNode::new(what, Timestamp(at)))
        .expect("put node")
}

fn link(store: &MemoryStore, from: NodeId, to: NodeId, relationship: Relationship) {
    store
        .put_edge(MemoryEdge::new(from, to, relationship, Timestamp(0)))
        .expect("put edge");
}

fn supersede(store: &MemoryStore, old: NodeId, new: NodeId) -> Result<NodeId, EngramError> {
    let mut node = store.get_node(old).expect("old node");
    node.status = NodeStatus::Superseded;
    node.superseded_by = Some(new);
    store.put_node(node)
}

// =============================================================================
// TIER T0: RECORD INTEGRITY
// =============================================================================

mod t0_record_integrity {
    use super::*;

    /// T0.1: A stored node reads back with an assigned id.
    #[test]
    fn node_roundtrip() {
        each_backend(|store| {
            let id = put(store, "Kickoff meeting held", 10);
            assert!(id.is_assigned());
            let node = store.get_node(id).expect("get");
            assert_eq!(node.what, "Kickoff meeting held");
            assert_eq!(node.status, NodeStatus::Active);
        });
    }

    /// T0.2: An edge to a missing node is rejected and nothing is written.
    #[test]
    fn dangling_edge_rejected_without_state_change() {
        each_backend(|store| {
            let a = put(store, "Lonely memory", 1);
            let before = store.canonical_hash().expect("hash");

            let result = store.put_edge(MemoryEdge::new(
                a,
                NodeId(404),
                Relationship::CausedBy,
                Timestamp(0),
            ));
            assert!(matches!(
                result,
                Err(EngramError::DanglingReference {
                    missing: NodeId(404),
                    ..
                })
            ));
            assert_eq!(store.canonical_hash().expect("hash"), before);
            assert!(store.get_edges(a, Direction::Both, None).expect("edges").is_empty());
        });
    }

    /// T0.3: Self-loops are rejected.
    #[test]
    fn self_loop_rejected() {
        each_backend(|store| {
            let a = put(store, "Self reference", 1);
            let result = store.put_edge(MemoryEdge::new(a, a, Relationship::RelatesTo, Timestamp(0)));
            assert!(matches!(result, Err(EngramError::SelfLoop(id)) if id == a));
        });
    }

    /// T0.4: Structurally invalid nodes are rejected.
    #[test]
    fn empty_what_rejected() {
        each_backend(|store| {
            let result = store.put_node(MemoryNode::new("   ", Timestamp(1)));
            assert!(matches!(
                result,
                Err(EngramError::InvalidField { field: "what", .. })
            ));
            assert_eq!(store.node_count().expect("count"), 0);
        });
    }

    /// T0.5: Content fields of committed nodes are immutable.
    #[test]
    fn committed_content_is_immutable() {
        each_backend(|store| {
            let id = put(store, "Original wording", 1);
            let mut node = store.get_node(id).expect("get");
            node.what = "Rewritten wording".into();
            assert!(matches!(
                store.put_node(node),
                Err(EngramError::InvalidField { field: "node", .. })
            ));
            assert_eq!(store.get_node(id).expect("get").what, "Original wording");
        });
    }
}

// =============================================================================
// TIER T1: INGESTION
// =============================================================================

mod t1_ingestion {
    use super::*;

    /// T1.1: Ingesting the same memory twice creates one node and no new edges.
    #[test]
    fn ingest_is_idempotent() {
        each_backend(|store| {
            put(store, "Quarterly planning started", 100);
            let candidate = MemoryNode::new("Budget review for Q3 approved", Timestamp(200))
                .with_who(["dana"]);

            let first = store.ingest(candidate.clone()).expect("first");
            let (nodes, edges) = (
                store.node_count().expect("nodes"),
                store.edge_count().expect("edges"),
            );
            let second = store.ingest(candidate).expect("second");

            assert!(first.created);
            assert!(!second.created);
            assert_eq!(first.node.id, second.node.id);
            assert_eq!(store.node_count().expect("nodes"), nodes);
            assert_eq!(store.edge_count().expect("edges"), edges);
        });
    }

    /// T1.2: Nearby memories are linked in time.
    #[test]
    fn temporal_neighbours_are_linked() {
        each_backend(|store| {
            let earlier = store
                .ingest(MemoryNode::new("Incident declared for checkout", Timestamp(1_000)))
                .expect("earlier");
            let later = store
                .ingest(MemoryNode::new("Rollback completed by oncall", Timestamp(1_060)))
                .expect("later");

            let edges = store
                .get_edges(later.node.id, Direction::Outgoing, None)
                .expect("edges");
            assert!(edges.iter().any(|e| e.relationship == Relationship::PrecededBy
                && e.to_id == earlier.node.id));
        });
    }

    /// T1.3: A contradicting memory is linked and flagged for review.
    #[test]
    fn contradiction_is_flagged() {
        each_backend(|store| {
            let original = store
                .ingest(MemoryNode::new("The launch is on schedule", Timestamp(10)))
                .expect("original");
            let counter = store
                .ingest(MemoryNode::new("The launch is not on schedule", Timestamp(20)))
                .expect("counter");

            assert!(counter.needs_review);
            let edges = store
                .get_edges(counter.node.id, Direction::Outgoing, None)
                .expect("edges");
            assert!(edges.iter().any(|e| e.relationship == Relationship::Contradicts
                && e.to_id == original.node.id));
        });
    }
}

// =============================================================================
// TIER T2: BOUNDED TRAVERSAL
// =============================================================================

mod t2_traversal {
    use super::*;

    /// T2.1: Traversal terminates on a cycle and visits each node once.
    #[test]
    fn traversal_terminates_on_cycles() {
        each_backend(|store| {
            let a = put(store, "a", 1);
            let b = put(store, "b", 2);
            let c = put(store, "c", 3);
            link(store, a, b, Relationship::LedTo);
            link(store, b, c, Relationship::LedTo);
            link(store, c, a, Relationship::LedTo);

            let hits = store
                .traverse(a, &TraverseOptions::hops(50))
                .expect("traverse");
            let ids: Vec<_> = hits.iter().map(|h| h.node.id).collect();
            assert_eq!(ids, vec![b, c]);
        });
    }

    /// T2.2: The shortest path wins over a longer one within the bound.
    #[test]
    fn shortest_path_preferred() {
        each_backend(|store| {
            let a = put(store, "a", 1);
            let b = put(store, "b", 2);
            let c = put(store, "c", 3);
            let e = put(store, "e", 4);
            let d = put(store, "d", 5);
            link(store, a, c, Relationship::LedTo);
            link(store, c, e, Relationship::LedTo);
            link(store, e, d, Relationship::LedTo);
            link(store, a, b, Relationship::LedTo);
            link(store, b, d, Relationship::LedTo);

            let path = store
                .find_path(a, d, &PathOptions::hops(3))
                .expect("path");
            assert_eq!(path, vec![a, b, d]);
        });
    }

    /// T2.3: A path longer than the bound is reported as such.
    #[test]
    fn path_beyond_bound_rejected() {
        each_backend(|store| {
            let a = put(store, "a", 1);
            let b = put(store, "b", 2);
            let c = put(store, "c", 3);
            link(store, a, b, Relationship::LedTo);
            link(store, b, c, Relationship::LedTo);

            let result = store.find_path(a, c, &PathOptions::hops(1));
            assert!(matches!(
                result,
                Err(EngramError::NoPathWithinBound { max_hops: 1, .. })
            ));
            assert_eq!(
                store.find_path(a, c, &PathOptions::hops(2)).expect("path"),
                vec![a, b, c]
            );
        });
    }

    /// T2.4: Hop counts never exceed the bound.
    #[test]
    fn hops_respect_bound() {
        each_backend(|store| {
            let mut prev = put(store, "chain start", 0);
            let start = prev;
            for i in 1..8 {
                let next = put(store, &format!("chain link {}", i), i);
                link(store, prev, next, Relationship::LedTo);
                prev = next;
            }
            let hits = store
                .traverse(start, &TraverseOptions::hops(3))
                .expect("traverse");
            assert_eq!(hits.len(), 3);
            assert!(hits.iter().all(|h| h.hop_count <= 3 && h.path.len() == h.hop_count + 1));
        });
    }

    /// T2.5: Unknown start nodes are reported.
    #[test]
    fn unknown_start_not_found() {
        each_backend(|store| {
            assert!(matches!(
                store.traverse(NodeId(9), &TraverseOptions::default()),
                Err(EngramError::NodeNotFound(NodeId(9)))
            ));
        });
    }

    /// T2.6: A context window skips archived memories and orders
    /// same-instant memories by id.
    #[test]
    fn context_window_skips_archived() {
        each_backend(|store| {
            let first = put(store, "kickoff held", 10);
            let tie = put(store, "kickoff notes shared", 20);
            let center = put(store, "scope agreed", 20);
            let mut forgotten = Vec::new();
            for i in 0..5 {
                forgotten.push(put(store, &format!("draft {}", i), 30 + i));
            }
            let last = put(store, "budget signed", 100);
            for id in &forgotten {
                store.archive(*id).expect("archive");
            }

            let window = store.context_window(center, 5, 1).expect("window");
            let before: Vec<_> = window.before.iter().map(|n| n.id).collect();
            let after: Vec<_> = window.after.iter().map(|n| n.id).collect();
            assert_eq!(before, vec![first, tie]);
            assert_eq!(after, vec![last]);
        });
    }
}

// =============================================================================
// TIER T3: RECONCILIATION
// =============================================================================

mod t3_reconciliation {
    use super::*;

    /// T3.1: A chain A -> B -> C resolves to C from anywhere on it.
    #[test]
    fn chain_resolves_to_latest() {
        each_backend(|store| {
            let a = put(store, "Owner is team red", 1);
            let b = put(store, "Owner is team blue", 2);
            let c = put(store, "Owner is team green", 3);
            supersede(store, a, b).expect("a -> b");
            supersede(store, b, c).expect("b -> c");

            for start in [a, b, c] {
                let result = store.resolve(start).expect("resolve");
                assert_eq!(result.current.id, c);
                if start == a {
                    let chain: Vec<_> = result.superseded_chain.iter().map(|n| n.id).collect();
                    assert_eq!(chain, vec![a, b]);
                }
            }
        });
    }

    /// T3.2: Closing a supersession cycle fails and changes nothing.
    #[test]
    fn supersession_cycle_rejected() {
        each_backend(|store| {
            let a = put(store, "Version one", 1);
            let b = put(store, "Version two", 2);
            let c = put(store, "Version three", 3);
            supersede(store, a, b).expect("a -> b");
            supersede(store, b, c).expect("b -> c");
            let before = store.canonical_hash().expect("hash");

            assert!(matches!(
                supersede(store, c, a),
                Err(EngramError::SupersessionCycle(_))
            ));
            assert_eq!(store.canonical_hash().expect("hash"), before);
            assert!(store.get_node(c).expect("c").is_active());
        });
    }

    /// T3.3: Two confident contradicting memories need review from either side.
    #[test]
    fn confident_contradiction_needs_review() {
        each_backend(|store| {
            let confident = Score::from_permille(750);
            let x = store
                .put_node(MemoryNode::new("Deploys freeze on Fridays", Timestamp(1)).with_confidence(confident))
                .expect("x");
            let y = store
                .put_node(MemoryNode::new("Deploys allowed any day", Timestamp(2)).with_confidence(confident))
                .expect("y");
            link(store, x, y, Relationship::Contradicts);

            for id in [x, y] {
                let result = store.resolve(id).expect("resolve");
                assert!(result.needs_review);
                assert_eq!(result.disputes.len(), 1);
            }
        });
    }

    /// T3.4: A single confident party is not enough for review.
    #[test]
    fn unconfident_contradiction_is_not_flagged() {
        each_backend(|store| {
            let x = store
                .put_node(MemoryNode::new("Rumour one", Timestamp(1)).with_confidence(Score::from_permille(300)))
                .expect("x");
            let y = put(store, "Confirmed fact", 2);
            link(store, y, x, Relationship::Contradicts);

            let result = store.resolve(y).expect("resolve");
            assert!(result.is_disputed());
            assert!(!result.needs_review);
        });
    }

    /// T3.5: A pending update is applied by confirmation.
    #[test]
    fn confirmation_applies_pending_update() {
        each_backend(|store| {
            let old = put(store, "Standup at nine", 1);
            let new = put(store, "Standup at ten", 2);
            link(store, new, old, Relationship::Supersedes);
            assert_eq!(store.resolve(old).expect("resolve").current.id, old);

            store.confirm_supersession(new, old).expect("confirm");
            let result = store.resolve(old).expect("resolve");
            assert_eq!(result.current.id, new);
            assert_eq!(store.get_node(old).expect("old").status, NodeStatus::Superseded);
        });
    }
}

// =============================================================================
// TIER T4: PERSISTENCE AND EXPORT
// =============================================================================

mod t4_persistence {
    use super::*;

    /// T4.1: Export and restore preserve the canonical hash across backends.
    #[test]
    fn export_restore_across_backends() {
        let source = MemoryStore::in_memory(EngineConfig::default()).expect("store");
        let a = put(&source, "Vendor shortlist drafted", 10);
        let b = put(&source, "Vendor chosen", 20);
        link(&source, a, b, Relationship::LedTo);
        supersede(&source, a, b).expect("supersede");
        let bytes = source.export_canonical().expect("export");

        let dir = TempDir::new().expect("tempdir");
        let target = MemoryStore::open(dir.path().join("restore.redb"), EngineConfig::default())
            .expect("open");
        target.restore(&bytes).expect("restore");
        assert_eq!(
            target.canonical_hash().expect("hash"),
            source.canonical_hash().expect("hash")
        );
        assert_eq!(target.resolve(a).expect("resolve").current.id, b);
    }

    /// T4.2: Archived edges are collected and ids are never reused.
    #[test]
    fn archive_then_collect() {
        each_backend(|store| {
            let a = put(store, "Keep", 1);
            let b = put(store, "Drop", 2);
            link(store, a, b, Relationship::RelatesTo);
            store.archive(b).expect("archive");

            let hits = store
                .traverse(a, &TraverseOptions::hops(2))
                .expect("traverse");
            assert!(hits.is_empty());

            let removed = store.collect_archived_edges().expect("gc");
            assert_eq!(removed.len(), 1);
            assert_eq!(store.edge_count().expect("edges"), 0);
            assert_eq!(store.stats().expect("stats").archived_edge_count, 0);
        });
    }

    /// T4.3: A redb store keeps its contents across reopen.
    #[test]
    fn redb_reopen_keeps_state() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("reopen.redb");
        let hash = {
            let store = MemoryStore::open(&path, EngineConfig::default()).expect("open");
            let a = put(&store, "Persisted first", 1);
            let b = put(&store, "Persisted second", 2);
            link(&store, a, b, Relationship::LedTo);
            let hash = store.canonical_hash().expect("hash");
            store.close().expect("close");
            hash
        };
        let store = MemoryStore::open(&path, EngineConfig::default()).expect("reopen");
        assert_eq!(store.canonical_hash().expect("hash"), hash);
    }
}
