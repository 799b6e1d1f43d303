//! # Traversal Engine
//!
//! Bounded, read-only walks over a [`GraphView`]:
//! - [`Traversal::traverse`]: breadth-first context walk with paths
//! - [`Traversal::find_path`]: shortest hop-count path between two nodes
//! - [`Traversal::find_related`]: one-hop typed neighbours
//! - [`Traversal::context_window`]: temporal neighbours of a memory
//!
//! ## Guarantees
//!
//! - A node is visited at most once; the first (shortest) path wins
//! - Neighbours are expanded in `(created_at, edge id)` order, so results
//!   are deterministic for a given snapshot
//! - Every walk is bounded by `MAX_TRAVERSAL_DEPTH` and checks its
//!   [`WalkLimits`] before each node expansion

use crate::graph::GraphView;
use crate::primitives::MAX_TRAVERSAL_DEPTH;
use crate::types::{
    Direction, EdgeId, EngramError, MemoryEdge, MemoryNode, NodeId, Relationship, Score, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Time-index entries read per step of a context window.
const WINDOW_PAGE: usize = 64;

// =============================================================================
// CANCELLATION
// =============================================================================

/// Shared flag a caller can flip to abort walks in flight.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Deadline and cancellation checked cooperatively during a walk.
#[derive(Debug, Clone, Default)]
pub struct WalkLimits {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
}

impl WalkLimits {
    /// No deadline, no cancellation.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check(&self, visited: usize, hops_completed: usize) -> Result<(), EngramError> {
        let cancelled = self.cancel.as_ref().is_some_and(CancelToken::is_cancelled);
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        if cancelled || expired {
            tracing::debug!(visited, hops_completed, cancelled, "walk aborted");
            return Err(EngramError::CancelledOrTimedOut {
                visited,
                hops_completed,
            });
        }
        Ok(())
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Which way directional, non-symmetric edges may be walked.
///
/// Bidirectional edges and symmetric relationships are always walkable
/// both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WalkDirection {
    /// From `from_id` to `to_id`, the direction the relationship reads.
    #[default]
    Forward,
    /// Against the relationship, e.g. walking `caused_by` back to effects.
    Reverse,
    Both,
}

impl FromStr for WalkDirection {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Self::Forward),
            "reverse" => Ok(Self::Reverse),
            "both" => Ok(Self::Both),
            other => Err(EngramError::invalid(
                "direction",
                format!("unknown walk direction '{}'", other),
            )),
        }
    }
}

/// Parameters of a bounded context walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraverseOptions {
    pub max_hops: usize,
    /// Only follow these relationships; `None` follows all.
    pub type_filter: Option<BTreeSet<Relationship>>,
    /// Edges weaker than this are not followed.
    pub min_strength: Score,
    /// Report the start node itself at hop 0.
    pub include_start: bool,
    pub direction: WalkDirection,
    /// Enter archived nodes.
    pub include_archived: bool,
}

impl Default for TraverseOptions {
    fn default() -> Self {
        Self {
            max_hops: 2,
            type_filter: None,
            min_strength: Score::ZERO,
            include_start: false,
            direction: WalkDirection::Forward,
            include_archived: false,
        }
    }
}

impl TraverseOptions {
    #[must_use]
    pub fn hops(max_hops: usize) -> Self {
        Self {
            max_hops,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn only<I: IntoIterator<Item = Relationship>>(mut self, relationships: I) -> Self {
        self.type_filter = Some(relationships.into_iter().collect());
        self
    }

    #[must_use]
    pub fn min_strength(mut self, min_strength: Score) -> Self {
        self.min_strength = min_strength;
        self
    }

    #[must_use]
    pub fn include_start(mut self, include_start: bool) -> Self {
        self.include_start = include_start;
        self
    }

    #[must_use]
    pub fn direction(mut self, direction: WalkDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// Parameters of a path search. Walks both directions by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathOptions {
    pub max_hops: usize,
    pub type_filter: Option<BTreeSet<Relationship>>,
    pub min_strength: Score,
    pub direction: WalkDirection,
    pub include_archived: bool,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            max_hops: 6,
            type_filter: None,
            min_strength: Score::ZERO,
            direction: WalkDirection::Both,
            include_archived: false,
        }
    }
}

impl PathOptions {
    #[must_use]
    pub fn hops(max_hops: usize) -> Self {
        Self {
            max_hops,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn direction(mut self, direction: WalkDirection) -> Self {
        self.direction = direction;
        self
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// One node reached by a context walk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraversalHit {
    pub node: MemoryNode,
    /// Node ids from the start to `node`, inclusive.
    pub path: Vec<NodeId>,
    /// Edge ids walked along `path`.
    pub via: Vec<EdgeId>,
    pub hop_count: usize,
}

/// Memories surrounding a centre memory in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextWindow {
    /// Oldest first.
    pub before: Vec<MemoryNode>,
    pub center: MemoryNode,
    /// Oldest first.
    pub after: Vec<MemoryNode>,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Stateless walk operations over any [`GraphView`].
pub struct Traversal;

struct Frontier {
    node: NodeId,
    path: Vec<NodeId>,
    via: Vec<EdgeId>,
}

impl Traversal {
    /// Edges leaving `node` that a walk in `direction` may take, with the
    /// node on the other side, in `(created_at, edge id)` order.
    fn steps<G: GraphView + ?Sized>(
        view: &G,
        node: NodeId,
        direction: WalkDirection,
        type_filter: Option<&BTreeSet<Relationship>>,
        min_strength: Score,
    ) -> Result<Vec<(MemoryEdge, NodeId)>, EngramError> {
        let forward = matches!(direction, WalkDirection::Forward | WalkDirection::Both);
        let reverse = matches!(direction, WalkDirection::Reverse | WalkDirection::Both);
        Ok(view
            .neighbors(node, Direction::Both, type_filter, min_strength)?
            .into_iter()
            .filter(|(edge, _)| {
                let outgoing = edge.from_id == node;
                edge.walkable_both_ways() || (outgoing && forward) || (!outgoing && reverse)
            })
            .collect())
    }

    /// Breadth-first walk from `start`.
    ///
    /// Returns nodes in discovery order with the path that first reached
    /// them. Terminates on `max_hops` or an empty frontier.
    pub fn traverse<G: GraphView + ?Sized>(
        view: &G,
        start: NodeId,
        options: &TraverseOptions,
        limits: &WalkLimits,
    ) -> Result<Vec<TraversalHit>, EngramError> {
        let start_node = view.require_node(start)?;
        let max_hops = options.max_hops.min(MAX_TRAVERSAL_DEPTH);

        let mut visited = BTreeSet::from([start]);
        let mut hits = Vec::new();
        if options.include_start {
            hits.push(TraversalHit {
                node: start_node,
                path: vec![start],
                via: Vec::new(),
                hop_count: 0,
            });
        }

        let mut frontier = vec![Frontier {
            node: start,
            path: vec![start],
            via: Vec::new(),
        }];

        for hop in 0..max_hops {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for current in frontier {
                limits.check(visited.len(), hop)?;
                for (edge, neighbor) in Self::steps(
                    view,
                    current.node,
                    options.direction,
                    options.type_filter.as_ref(),
                    options.min_strength,
                )? {
                    if visited.contains(&neighbor) {
                        continue;
                    }
                    let Some(node) = view.get_node(neighbor)? else {
                        continue;
                    };
                    if node.is_archived() && !options.include_archived {
                        continue;
                    }
                    visited.insert(neighbor);

                    let mut path = current.path.clone();
                    path.push(neighbor);
                    let mut via = current.via.clone();
                    via.push(edge.id);

                    hits.push(TraversalHit {
                        node,
                        path: path.clone(),
                        via: via.clone(),
                        hop_count: hop + 1,
                    });
                    next.push(Frontier {
                        node: neighbor,
                        path,
                        via,
                    });
                }
            }
            frontier = next;
        }

        Ok(hits)
    }

    /// Shortest hop-count path from `from` to `to`, both inclusive.
    ///
    /// Among equally short paths the one discovered first under the
    /// deterministic expansion order wins.
    pub fn find_path<G: GraphView + ?Sized>(
        view: &G,
        from: NodeId,
        to: NodeId,
        options: &PathOptions,
        limits: &WalkLimits,
    ) -> Result<Vec<NodeId>, EngramError> {
        view.require_node(from)?;
        view.require_node(to)?;
        if from == to {
            return Ok(vec![from]);
        }
        let max_hops = options.max_hops.min(MAX_TRAVERSAL_DEPTH);

        let mut parent: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut visited = BTreeSet::from([from]);
        let mut frontier = vec![from];

        for hop in 0..max_hops {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for current in frontier {
                limits.check(visited.len(), hop)?;
                for (_, neighbor) in Self::steps(
                    view,
                    current,
                    options.direction,
                    options.type_filter.as_ref(),
                    options.min_strength,
                )? {
                    if visited.contains(&neighbor) {
                        continue;
                    }
                    if neighbor != to && !options.include_archived {
                        match view.get_node(neighbor)? {
                            Some(node) if !node.is_archived() => {}
                            _ => continue,
                        }
                    }
                    visited.insert(neighbor);
                    parent.insert(neighbor, current);
                    if neighbor == to {
                        return Ok(Self::reconstruct(&parent, from, to));
                    }
                    next.push(neighbor);
                }
            }
            frontier = next;
        }

        Err(EngramError::NoPathWithinBound {
            from,
            to,
            max_hops: options.max_hops,
        })
    }

    fn reconstruct(parent: &BTreeMap<NodeId, NodeId>, from: NodeId, to: NodeId) -> Vec<NodeId> {
        let mut path = vec![to];
        let mut current = to;
        while current != from {
            match parent.get(&current) {
                Some(&previous) => {
                    path.push(previous);
                    current = previous;
                }
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Direct neighbours of `node`, optionally of one relationship type.
    ///
    /// `direction` selects stored adjacency (outgoing, incoming or both);
    /// edge semantics are not applied.
    pub fn find_related<G: GraphView + ?Sized>(
        view: &G,
        node: NodeId,
        relationship: Option<&Relationship>,
        direction: Direction,
    ) -> Result<Vec<(MemoryEdge, MemoryNode)>, EngramError> {
        view.require_node(node)?;
        let filter = relationship.map(|r| BTreeSet::from([r.clone()]));
        let mut related = Vec::new();
        for (edge, other) in view.neighbors(node, direction, filter.as_ref(), Score::ZERO)? {
            if let Some(other_node) = view.get_node(other)? {
                related.push((edge, other_node));
            }
        }
        Ok(related)
    }

    /// Up to `before` memories that occurred just before `center` and up to
    /// `after` just after it, skipping archived ones.
    ///
    /// Same-instant memories are ordered by id. The time index is read in
    /// pages, and `limits` is checked before each page.
    pub fn context_window<G: GraphView + ?Sized>(
        view: &G,
        center: NodeId,
        before: usize,
        after: usize,
        limits: &WalkLimits,
    ) -> Result<ContextWindow, EngramError> {
        let center_node = view.require_node(center)?;
        let at = center_node.occurred_at;

        let mut earlier = Self::window_side(view, (at, center), before, true, 0, limits)?;
        earlier.reverse();
        let later = Self::window_side(view, (at, center), after, false, earlier.len(), limits)?;

        Ok(ContextWindow {
            before: earlier,
            center: center_node,
            after: later,
        })
    }

    /// Collect up to `want` live nodes on one side of `cursor`, nearest first.
    fn window_side<G: GraphView + ?Sized>(
        view: &G,
        mut cursor: (Timestamp, NodeId),
        want: usize,
        backwards: bool,
        visited: usize,
        limits: &WalkLimits,
    ) -> Result<Vec<MemoryNode>, EngramError> {
        let mut found = Vec::new();
        while found.len() < want {
            limits.check(visited + found.len(), 0)?;
            let page_size = (want - found.len()).min(WINDOW_PAGE);
            let page = if backwards {
                view.nodes_before(cursor.0, cursor.1, page_size)?
            } else {
                view.nodes_after(cursor.0, cursor.1, page_size)?
            };
            let Some(&last) = page.last() else {
                break;
            };
            let exhausted = page.len() < page_size;
            for (_, id) in page {
                if let Some(node) = view.get_node(id)?
                    && !node.is_archived()
                {
                    found.push(node);
                }
            }
            cursor = last;
            if exhausted {
                break;
            }
        }
        Ok(found)
    }
}

// =============================================================================
// TESTS
// =============================================================================
