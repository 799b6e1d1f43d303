//! # Index Layer
//!
//! Secondary indexes over nodes and adjacency indexes over edges.
//!
//! The same key derivation (`IndexKeys`, `tokenize`) feeds both the
//! in-memory [`GraphIndex`] and the redb index tables, so every backend
//! answers lookups identically. Indexes are updated inside the commit that
//! writes the record; there is no background rebuild.

use crate::primitives::MIN_TOKEN_LENGTH;
use crate::types::{Direction, EdgeId, MemoryEdge, MemoryNode, NodeId, Score, Timestamp};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

// =============================================================================
// TOKENIZATION
// =============================================================================

/// Words that mark a statement as negated.
const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "nothing", "nobody", "neither", "nor", "cannot", "without",
];

/// Words carrying no topical signal. Negations are included so that a
/// statement and its negation share the same token set.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "to", "in", "on", "at", "for", "with", "by", "is",
    "are", "was", "were", "be", "been", "it", "its", "this", "that", "we", "you", "he", "she",
    "they", "as", "from", "will", "would", "should", "can", "could", "has", "have", "had", "do",
    "does", "did", "but", "so", "our", "my", "their", "us", "them", "then", "than", "into",
    "about", "any", "all",
];

/// Lower-cased words of `text`, with contractions like `don't` expanded
/// to `do not`.
fn words(text: &str) -> impl Iterator<Item = String> {
    let expanded = text.to_lowercase().replace("n't", " not");
    expanded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
}

/// Normalized topical tokens of `text`.
#[must_use]
pub fn tokenize(text: &str) -> BTreeSet<String> {
    words(text)
        .filter(|w| w.chars().count() >= MIN_TOKEN_LENGTH)
        .filter(|w| !STOPWORDS.contains(&w.as_str()) && !NEGATIONS.contains(&w.as_str()))
        .collect()
}

/// True when `text` contains a negation word.
#[must_use]
pub fn has_negation(text: &str) -> bool {
    words(text).any(|w| NEGATIONS.contains(&w.as_str()))
}

/// Jaccard similarity of two sets, in thousandths. Two empty sets score 0.
#[must_use]
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> Score {
    let union = a.union(b).count();
    if union == 0 {
        return Score::ZERO;
    }
    let shared = a.intersection(b).count();
    Score::from_permille((shared * 1000 / union) as u16)
}

/// Normalize a tag or participant for index lookups.
#[must_use]
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

// =============================================================================
// INDEX KEYS
// =============================================================================

/// Secondary index keys derived from one node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexKeys {
    pub tags: BTreeSet<String>,
    pub participants: BTreeSet<String>,
    pub tokens: BTreeSet<String>,
}

impl IndexKeys {
    #[must_use]
    pub fn of(node: &MemoryNode) -> Self {
        let tags: BTreeSet<String> = node
            .tags
            .iter()
            .map(|t| normalize_label(t))
            .filter(|t| !t.is_empty())
            .collect();
        let mut tokens = tokenize(&node.what);
        tokens.extend(tokenize(&node.summary));
        for tag in &tags {
            tokens.extend(tokenize(tag));
        }
        Self {
            tags,
            participants: node.participants(),
            tokens,
        }
    }
}

// =============================================================================
// IN-MEMORY INDEX
// =============================================================================

fn add_to(map: &mut BTreeMap<String, BTreeSet<NodeId>>, key: &str, id: NodeId) {
    map.entry(key.to_string()).or_default().insert(id);
}

fn lookup(map: &BTreeMap<String, BTreeSet<NodeId>>, key: &str) -> Vec<NodeId> {
    map.get(key)
        .map(|ids| ids.iter().copied().collect())
        .unwrap_or_default()
}

/// Adjacency key: edges are listed in creation order, then by id.
pub type AdjacencyKey = (Timestamp, EdgeId);

/// Index structures for the in-memory graph.
#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    by_time: BTreeSet<(Timestamp, NodeId)>,
    by_tag: BTreeMap<String, BTreeSet<NodeId>>,
    by_participant: BTreeMap<String, BTreeSet<NodeId>>,
    by_token: BTreeMap<String, BTreeSet<NodeId>>,
    by_hash: BTreeMap<String, BTreeSet<NodeId>>,
    outgoing: BTreeMap<NodeId, BTreeSet<AdjacencyKey>>,
    incoming: BTreeMap<NodeId, BTreeSet<AdjacencyKey>>,
}

impl GraphIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a newly created node. Status updates do not touch the index.
    pub fn insert_node(&mut self, node: &MemoryNode) {
        let keys = IndexKeys::of(node);
        self.by_time.insert((node.occurred_at, node.id));
        for tag in &keys.tags {
            add_to(&mut self.by_tag, tag, node.id);
        }
        for participant in &keys.participants {
            add_to(&mut self.by_participant, participant, node.id);
        }
        for token in &keys.tokens {
            add_to(&mut self.by_token, token, node.id);
        }
        add_to(&mut self.by_hash, node.content_hash.as_str(), node.id);
    }

    pub fn insert_edge(&mut self, edge: &MemoryEdge) {
        let key = (edge.created_at, edge.id);
        self.outgoing.entry(edge.from_id).or_default().insert(key);
        self.incoming.entry(edge.to_id).or_default().insert(key);
    }

    pub fn remove_edge(&mut self, edge: &MemoryEdge) {
        let key = (edge.created_at, edge.id);
        if let Some(list) = self.outgoing.get_mut(&edge.from_id) {
            list.remove(&key);
        }
        if let Some(list) = self.incoming.get_mut(&edge.to_id) {
            list.remove(&key);
        }
    }

    /// Edge ids adjacent to `node`, ordered by `(created_at, id)`.
    #[must_use]
    pub fn adjacent(&self, node: NodeId, direction: Direction) -> Vec<EdgeId> {
        let empty = BTreeSet::new();
        let outgoing = self.outgoing.get(&node).unwrap_or(&empty);
        let incoming = self.incoming.get(&node).unwrap_or(&empty);
        match direction {
            Direction::Outgoing => outgoing.iter().map(|(_, id)| *id).collect(),
            Direction::Incoming => incoming.iter().map(|(_, id)| *id).collect(),
            Direction::Both => outgoing
                .union(incoming)
                .map(|(_, id)| *id)
                .collect(),
        }
    }

    /// Nodes with `start <= occurred_at <= end`, in time order.
    #[must_use]
    pub fn between(&self, start: Timestamp, end: Timestamp) -> Vec<NodeId> {
        if start > end {
            return Vec::new();
        }
        self.by_time
            .range((start, NodeId(0))..=(end, NodeId(u64::MAX)))
            .map(|(_, id)| *id)
            .collect()
    }

    /// Entries strictly before `(at, id)` in time order, nearest first.
    #[must_use]
    pub fn before(&self, at: Timestamp, id: NodeId, limit: usize) -> Vec<(Timestamp, NodeId)> {
        self.by_time.range(..(at, id)).rev().take(limit).copied().collect()
    }

    /// Entries strictly after `(at, id)` in time order, nearest first.
    #[must_use]
    pub fn after(&self, at: Timestamp, id: NodeId, limit: usize) -> Vec<(Timestamp, NodeId)> {
        self.by_time
            .range((Bound::Excluded((at, id)), Bound::Unbounded))
            .take(limit)
            .copied()
            .collect()
    }

    #[must_use]
    pub fn by_tag(&self, tag: &str) -> Vec<NodeId> {
        lookup(&self.by_tag, &normalize_label(tag))
    }

    #[must_use]
    pub fn by_participant(&self, participant: &str) -> Vec<NodeId> {
        lookup(&self.by_participant, &normalize_label(participant))
    }

    #[must_use]
    pub fn by_token(&self, token: &str) -> Vec<NodeId> {
        lookup(&self.by_token, &token.to_lowercase())
    }

    #[must_use]
    pub fn by_hash(&self, hash: &str) -> Vec<NodeId> {
        lookup(&self.by_hash, hash)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::Relationship;

    #[test]
    fn tokenize_drops_stopwords_and_short_words() {
        let tokens = tokenize("We chose Postgres for the billing-service, v2 a");
        let expected: BTreeSet<String> = ["chose", "postgres", "billing", "service", "v2"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn negation_detected_in_contractions() {
        assert!(has_negation("We don't use Redis"));
        assert!(has_negation("never again"));
        assert!(!has_negation("We use Redis"));
        assert_eq!(tokenize("We don't use Redis"), tokenize("We use Redis"));
    }

    #[test]
    fn jaccard_bounds() {
        let a: BTreeSet<u8> = [1, 2, 3].into_iter().collect();
        let b: BTreeSet<u8> = [2, 3, 4].into_iter().collect();
        assert_eq!(jaccard(&a, &b).permille(), 500);
        assert_eq!(jaccard(&a, &a), Score::ONE);
        assert_eq!(jaccard::<u8>(&BTreeSet::new(), &BTreeSet::new()), Score::ZERO);
    }

    #[test]
    fn keys_include_tag_tokens() {
        let mut node = MemoryNode::new("Deploy finished", Timestamp(5))
            .with_tags(["Release-Train"])
            .with_who(["Ana"]);
        node.id = NodeId(1);
        let keys = IndexKeys::of(&node);
        assert!(keys.tags.contains("release-train"));
        assert!(keys.tokens.contains("release"));
        assert!(keys.tokens.contains("deploy"));
        assert!(keys.participants.contains("ana"));
    }

    #[test]
    fn time_range_is_inclusive() {
        let mut index = GraphIndex::new();
        for (id, at) in [(1, 10), (2, 20), (3, 30)] {
            let mut node = MemoryNode::new(format!("n{}", id), Timestamp(at));
            node.id = NodeId(id);
            index.insert_node(&node);
        }
        assert_eq!(index.between(Timestamp(10), Timestamp(20)), vec![NodeId(1), NodeId(2)]);
        assert!(index.between(Timestamp(31), Timestamp(40)).is_empty());
        assert!(index.between(Timestamp(30), Timestamp(10)).is_empty());
    }

    #[test]
    fn bounded_ranges_are_exclusive_and_nearest_first() {
        let mut index = GraphIndex::new();
        for (id, at) in [(1, 10), (2, 20), (3, 20), (4, 30)] {
            let mut node = MemoryNode::new(format!("n{}", id), Timestamp(at));
            node.id = NodeId(id);
            index.insert_node(&node);
        }
        assert_eq!(
            index.before(Timestamp(20), NodeId(3), 5),
            vec![(Timestamp(20), NodeId(2)), (Timestamp(10), NodeId(1))]
        );
        assert_eq!(index.before(Timestamp(20), NodeId(3), 1), vec![(Timestamp(20), NodeId(2))]);
        assert_eq!(
            index.after(Timestamp(20), NodeId(2), 5),
            vec![(Timestamp(20), NodeId(3)), (Timestamp(30), NodeId(4))]
        );
        assert!(index.after(Timestamp(30), NodeId(4), 5).is_empty());
        assert!(index.before(Timestamp(20), NodeId(3), 0).is_empty());
    }

    #[test]
    fn adjacency_ordered_by_creation_then_id() {
        let mut index = GraphIndex::new();
        let mut late = MemoryEdge::new(NodeId(1), NodeId(2), Relationship::LedTo, Timestamp(9));
        late.id = EdgeId(1);
        let mut early = MemoryEdge::new(NodeId(1), NodeId(3), Relationship::LedTo, Timestamp(2));
        early.id = EdgeId(2);
        let mut back = MemoryEdge::new(NodeId(4), NodeId(1), Relationship::LedTo, Timestamp(5));
        back.id = EdgeId(3);
        index.insert_edge(&late);
        index.insert_edge(&early);
        index.insert_edge(&back);

        assert_eq!(index.adjacent(NodeId(1), Direction::Outgoing), vec![EdgeId(2), EdgeId(1)]);
        assert_eq!(
            index.adjacent(NodeId(1), Direction::Both),
            vec![EdgeId(2), EdgeId(3), EdgeId(1)]
        );

        index.remove_edge(&early);
        assert_eq!(index.adjacent(NodeId(1), Direction::Outgoing), vec![EdgeId(1)]);
    }
}
