//! # Query Module
//!
//! Structured queries over a store snapshot.
//!
//! - One enum covering every read operation a presentation layer needs
//! - Serializable, so queries can arrive as JSON
//! - Executed against a single snapshot with one deadline

use crate::config::EngineConfig;
use crate::graph::GraphView;
use crate::index::tokenize;
use crate::reconcile::{ReconciliationResult, Reconciler};
use crate::traversal::{
    ContextWindow, PathOptions, Traversal, TraversalHit, TraverseOptions, WalkLimits,
};
use crate::types::{
    Direction, EngramError, MemoryEdge, MemoryNode, NodeId, Relationship, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query operations supported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueryType {
    /// Bounded context walk from a node.
    Traverse {
        start: NodeId,
        #[serde(default)]
        options: TraverseOptions,
    },

    /// Shortest path between two nodes.
    FindPath {
        from: NodeId,
        to: NodeId,
        #[serde(default)]
        options: PathOptions,
    },

    /// One-hop neighbours, optionally of one relationship.
    Related {
        node: NodeId,
        #[serde(default)]
        relationship: Option<Relationship>,
        #[serde(default = "both")]
        direction: Direction,
    },

    /// Memories just before and after a node in time.
    ContextWindow {
        center: NodeId,
        before: usize,
        after: usize,
    },

    /// Current belief for a node.
    Resolve { node: NodeId },

    /// Memories that occurred at or after a time, oldest first.
    Since {
        since: Timestamp,
        #[serde(default)]
        limit: Option<usize>,
    },

    ByTag { tag: String },

    ByParticipant { participant: String },

    /// Token search over `what`, `summary` and tags.
    Search {
        text: String,
        #[serde(default)]
        limit: Option<usize>,
    },
}

const fn both() -> Direction {
    Direction::Both
}

/// A structured query with optional timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(flatten)]
    pub query_type: QueryType,
    /// Overrides `traversal.timeout_ms` for this query.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Query {
    #[must_use]
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn with_timeout(query_type: QueryType, timeout_ms: u64) -> Self {
        Self {
            query_type,
            timeout_ms: Some(timeout_ms),
        }
    }

    #[must_use]
    pub fn traverse(start: NodeId, max_hops: usize) -> Self {
        Self::new(QueryType::Traverse {
            start,
            options: TraverseOptions::hops(max_hops),
        })
    }

    #[must_use]
    pub fn find_path(from: NodeId, to: NodeId, max_hops: usize) -> Self {
        Self::new(QueryType::FindPath {
            from,
            to,
            options: PathOptions::hops(max_hops),
        })
    }

    #[must_use]
    pub fn resolve(node: NodeId) -> Self {
        Self::new(QueryType::Resolve { node })
    }

    #[must_use]
    pub fn search(text: impl Into<String>) -> Self {
        Self::new(QueryType::Search {
            text: text.into(),
            limit: None,
        })
    }
}

/// A neighbour reported by a `Related` query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedNode {
    pub edge: MemoryEdge,
    pub node: MemoryNode,
}

/// Result of executing a [`Query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum QueryOutput {
    Hits(Vec<TraversalHit>),
    Path(Vec<NodeId>),
    Related(Vec<RelatedNode>),
    Window(ContextWindow),
    Resolution(ReconciliationResult),
    Nodes(Vec<MemoryNode>),
}

impl QueryOutput {
    /// Number of top-level items in the result.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Hits(hits) => hits.len(),
            Self::Path(path) => path.len(),
            Self::Related(related) => related.len(),
            Self::Window(window) => window.before.len() + 1 + window.after.len(),
            Self::Resolution(_) => 1,
            Self::Nodes(nodes) => nodes.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run `query` against one snapshot.
pub fn execute<G: GraphView + ?Sized>(
    view: &G,
    query: &Query,
    config: &EngineConfig,
    limits: &WalkLimits,
) -> Result<QueryOutput, EngramError> {
    match &query.query_type {
        QueryType::Traverse { start, options } => {
            Traversal::traverse(view, *start, options, limits).map(QueryOutput::Hits)
        }
        QueryType::FindPath { from, to, options } => {
            Traversal::find_path(view, *from, *to, options, limits).map(QueryOutput::Path)
        }
        QueryType::Related {
            node,
            relationship,
            direction,
        } => Ok(QueryOutput::Related(
            Traversal::find_related(view, *node, relationship.as_ref(), *direction)?
                .into_iter()
                .map(|(edge, node)| RelatedNode { edge, node })
                .collect(),
        )),
        QueryType::ContextWindow {
            center,
            before,
            after,
        } => Traversal::context_window(view, *center, *before, *after, limits)
            .map(QueryOutput::Window),
        QueryType::Resolve { node } => {
            Reconciler::resolve(view, *node, &config.reconcile).map(QueryOutput::Resolution)
        }
        QueryType::Since { since, limit } => {
            let mut ids = view.nodes_since(*since)?;
            if let Some(limit) = limit {
                ids.truncate(*limit);
            }
            load(view, ids).map(QueryOutput::Nodes)
        }
        QueryType::ByTag { tag } => load(view, view.nodes_by_tag(tag)?).map(QueryOutput::Nodes),
        QueryType::ByParticipant { participant } => {
            load(view, view.nodes_by_participant(participant)?).map(QueryOutput::Nodes)
        }
        QueryType::Search { text, limit } => search(view, text, *limit).map(QueryOutput::Nodes),
    }
}

fn load<G: GraphView + ?Sized>(view: &G, ids: Vec<NodeId>) -> Result<Vec<MemoryNode>, EngramError> {
    let mut nodes = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(node) = view.get_node(id)? {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

/// Nodes sharing tokens with `text`, most shared tokens first, then by id.
/// Archived nodes are left out.
pub fn search<G: GraphView + ?Sized>(
    view: &G,
    text: &str,
    limit: Option<usize>,
) -> Result<Vec<MemoryNode>, EngramError> {
    let mut hits: BTreeMap<NodeId, usize> = BTreeMap::new();
    for token in tokenize(text) {
        for id in view.nodes_by_token(&token)? {
            *hits.entry(id).or_default() += 1;
        }
    }
    let mut ranked: Vec<(NodeId, usize)> = hits.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let limit = limit.unwrap_or(usize::MAX);
    let mut nodes = Vec::new();
    for (id, _) in ranked {
        if nodes.len() >= limit {
            break;
        }
        if let Some(node) = view.get_node(id)?
            && !node.is_archived()
        {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::mutation::{MutationEngine, WriteBatch};

    fn sample() -> Graph {
        let mut graph = Graph::new();
        let mut batch = WriteBatch::against(&graph).expect("batch");
        let a = batch.create_node(
            MemoryNode::new("Postgres chosen for billing", Timestamp(10)).with_tags(["db"]),
        );
        let b = batch.create_node(
            MemoryNode::new("Billing launch slipped", Timestamp(20)).with_who(["ana"]),
        );
        batch.create_node(MemoryNode::new("Offsite agenda", Timestamp(30)));
        batch.add_edge(MemoryEdge::new(a, b, Relationship::LedTo, Timestamp(0)));
        let validated = MutationEngine::validate(&graph, batch).expect("valid");
        graph.apply(&validated);
        graph
    }

    fn run(graph: &Graph, query: Query) -> QueryOutput {
        execute(graph, &query, &EngineConfig::default(), &WalkLimits::unbounded()).expect("query")
    }

    #[test]
    fn query_with_timeout() {
        let q = Query::with_timeout(QueryType::Resolve { node: NodeId(1) }, 1000);
        assert_eq!(q.timeout_ms, Some(1000));
        assert_eq!(Query::resolve(NodeId(1)).timeout_ms, None);
    }

    #[test]
    fn query_parses_from_json() {
        let q: Query = serde_json::from_str(
            r#"{"op": "find_path", "from": 1, "to": 2, "options": {"max_hops": 3}, "timeout_ms": 50}"#,
        )
        .expect("parse");
        assert_eq!(q.timeout_ms, Some(50));
        match q.query_type {
            QueryType::FindPath { from, options, .. } => {
                assert_eq!(from, NodeId(1));
                assert_eq!(options.max_hops, 3);
            }
            other => panic!("unexpected {:?}", other),
        }

        let q: Query = serde_json::from_str(r#"{"op": "related", "node": 4}"#).expect("parse");
        assert!(matches!(
            q.query_type,
            QueryType::Related {
                direction: Direction::Both,
                relationship: None,
                ..
            }
        ));
    }

    #[test]
    fn search_ranks_by_shared_tokens() {
        let graph = sample();
        let output = run(&graph, Query::search("billing postgres"));
        let QueryOutput::Nodes(nodes) = output else {
            panic!("expected nodes");
        };
        let ids: Vec<_> = nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![NodeId(1), NodeId(2)]);
    }

    #[test]
    fn since_respects_limit() {
        let graph = sample();
        let output = run(
            &graph,
            Query::new(QueryType::Since {
                since: Timestamp(15),
                limit: Some(1),
            }),
        );
        assert_eq!(output.len(), 1);
    }

    #[test]
    fn traverse_and_path_dispatch() {
        let graph = sample();
        assert_eq!(run(&graph, Query::traverse(NodeId(1), 2)).len(), 1);
        assert_eq!(
            run(&graph, Query::find_path(NodeId(1), NodeId(2), 2)),
            QueryOutput::Path(vec![NodeId(1), NodeId(2)])
        );
    }

    #[test]
    fn lookup_queries() {
        let graph = sample();
        assert_eq!(
            run(&graph, Query::new(QueryType::ByTag { tag: "DB".into() })).len(),
            1
        );
        assert_eq!(
            run(
                &graph,
                Query::new(QueryType::ByParticipant {
                    participant: "ana".into()
                })
            )
            .len(),
            1
        );
        assert!(
            run(
                &graph,
                Query::new(QueryType::ByTag {
                    tag: "missing".into()
                })
            )
            .is_empty()
        );
    }

    #[test]
    fn output_serializes_with_kind() {
        let json = serde_json::to_value(QueryOutput::Path(vec![NodeId(1)])).expect("json");
        assert_eq!(json["kind"], "path");
        assert_eq!(json["result"][0], 1);
    }
}
