//! # Ingestion Coordinator
//!
//! Turns a pre-extracted candidate [`MemoryNode`] into one atomic
//! [`WriteBatch`]:
//!
//! 1. **Dedup**: an active node with the same content hash is returned
//!    unchanged and nothing is written.
//! 2. **Candidate pool**: existing live nodes reachable through the time,
//!    participant and token indexes, plus explicitly referenced ids.
//! 3. **Conflicts**: each pool node is classified as a duplicate, an update
//!    the candidate supersedes, or a contradiction, and linked accordingly.
//! 4. **Inference**: remaining pool nodes get proposed edges from explicit
//!    references, participant overlap and temporal proximity. Proposals
//!    above the commit threshold join the batch; the rest are only reported.
//!
//! The coordinator only plans. The store validates and commits the batch
//! under its writer lock, so a failed ingestion leaves no trace.

use crate::config::IngestConfig;
use crate::graph::GraphView;
use crate::index::{IndexKeys, has_negation, jaccard, tokenize};
use crate::mutation::WriteBatch;
use crate::primitives::MAX_CANDIDATE_POOL;
use crate::types::{
    EngramError, MemoryEdge, MemoryNode, NodeId, NodeStatus, Relationship, Score, Timestamp,
};
use serde::Serialize;
use std::collections::BTreeSet;

// =============================================================================
// RESULT TYPES
// =============================================================================

/// How an existing memory relates to an ingested candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Same statement by the same people.
    Duplicate,
    /// The candidate is a newer version of the existing memory.
    Update,
    /// Same topic, opposite polarity.
    Contradiction,
}

impl ConflictKind {
    fn relationship(self) -> Relationship {
        match self {
            Self::Duplicate => Relationship::SimilarTo,
            Self::Update => Relationship::Supersedes,
            Self::Contradiction => Relationship::Contradicts,
        }
    }
}

/// Why an edge was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceBasis {
    /// The candidate names the node's id or title.
    Reference,
    /// Shared participants.
    Participants,
    /// Close in `occurred_at`.
    Temporal,
}

/// A proposed edge and whether it was persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferredEdge {
    /// Carries an assigned id only when `committed`.
    pub edge: MemoryEdge,
    pub basis: InferenceBasis,
    pub score: Score,
    pub committed: bool,
}

/// A conflict found between the candidate and an existing memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub existing: NodeId,
    pub kind: ConflictKind,
    /// Token similarity of the two `what` texts.
    pub similarity: Score,
    /// The committed edge recording the conflict.
    pub edge: MemoryEdge,
    /// The existing node was transitioned to `superseded` in the same commit.
    pub auto_superseded: bool,
}

/// Outcome of one ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestResult {
    /// The stored node: newly created, or the existing duplicate.
    pub node: MemoryNode,
    pub created: bool,
    pub inferred_edges: Vec<InferredEdge>,
    pub conflicts: Vec<Conflict>,
    /// Resolving the stored node reports a conflict needing a decision.
    pub needs_review: bool,
}

/// A planned ingestion: the batch to commit and the result to report
/// once it is committed.
#[derive(Debug)]
pub struct IngestPlan {
    pub batch: WriteBatch,
    pub result: IngestResult,
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// One proposed edge before ids are known.
struct Proposal {
    other: NodeId,
    relationship: Relationship,
    /// Edge runs from the candidate to `other`.
    outgoing: bool,
    basis: InferenceBasis,
    score: Score,
    evidence: String,
}

pub struct Ingestor<'a> {
    config: &'a IngestConfig,
}

impl<'a> Ingestor<'a> {
    #[must_use]
    pub fn new(config: &'a IngestConfig) -> Self {
        Self { config }
    }

    /// Plan the ingestion of `candidate` against `view`.
    ///
    /// `now` stamps the created edges. Must run under the writer lock that
    /// will commit the returned batch.
    pub fn plan<G: GraphView + ?Sized>(
        &self,
        view: &G,
        mut candidate: MemoryNode,
        now: Timestamp,
    ) -> Result<IngestPlan, EngramError> {
        if candidate.id.is_assigned() {
            return Err(EngramError::invalid(
                "id",
                "candidates must not carry an id",
            ));
        }
        if candidate.status != NodeStatus::Active || candidate.superseded_by.is_some() {
            return Err(EngramError::invalid(
                "status",
                "candidates must be active",
            ));
        }
        candidate.refresh_hash();
        candidate.validate()?;

        if let Some(existing) = self.find_duplicate(view, &candidate)? {
            tracing::debug!(node = existing.id.0, "duplicate content, nothing written");
            return Ok(IngestPlan {
                batch: WriteBatch::against(view)?,
                result: IngestResult {
                    node: existing,
                    created: false,
                    inferred_edges: Vec::new(),
                    conflicts: Vec::new(),
                    needs_review: false,
                },
            });
        }

        let pool = self.candidate_pool(view, &candidate)?;
        let candidate_tokens = tokenize(&candidate.what);
        let candidate_negated = has_negation(&candidate.what);
        let candidate_people = candidate.participants();
        let referenced = referenced_ids(&candidate.what);
        let candidate_text = candidate.what.to_lowercase();

        let mut conflicts = Vec::new();
        let mut proposals = Vec::new();
        for existing in &pool {
            let similarity = jaccard(&candidate_tokens, &tokenize(&existing.what));
            let people = existing.participants();

            if let Some(kind) = self.classify(
                &candidate,
                existing,
                similarity,
                candidate_negated,
                &candidate_people,
                &people,
            ) {
                conflicts.push((existing.clone(), kind, similarity));
                continue;
            }

            let named = referenced.contains(&existing.id)
                || existing
                    .title()
                    .is_some_and(|t| candidate_text.contains(&t.to_lowercase()));
            if named {
                proposals.push(Proposal {
                    other: existing.id,
                    relationship: Relationship::MentionedIn,
                    outgoing: false,
                    basis: InferenceBasis::Reference,
                    score: self.config.reference_score,
                    evidence: format!("candidate references {}", existing.id),
                });
            }

            let overlap = jaccard(&candidate_people, &people);
            if overlap > Score::ZERO {
                proposals.push(Proposal {
                    other: existing.id,
                    relationship: Relationship::RelatesTo,
                    outgoing: true,
                    basis: InferenceBasis::Participants,
                    score: overlap,
                    evidence: format!("participant overlap {}", overlap),
                });
            }

            if let Some(proposal) = self.temporal(&candidate, existing) {
                proposals.push(proposal);
            }
        }

        proposals.sort_by(|a, b| b.score.cmp(&a.score).then(a.other.cmp(&b.other)));
        proposals.truncate(self.config.max_inferred_edges);

        // Build the batch: node first so edges can point at its id.
        let mut batch = WriteBatch::against(view)?;
        let new_id = batch.create_node(candidate.clone());
        candidate.id = new_id;

        let mut reported_conflicts = Vec::new();
        for (existing, kind, similarity) in conflicts {
            let mut edge = MemoryEdge::new(new_id, existing.id, kind.relationship(), now)
                .with_strength(similarity)
                .with_evidence(format!("token similarity {}", similarity));
            edge.id = batch.add_edge(edge.clone());

            let auto_superseded = kind == ConflictKind::Update
                && candidate.confidence > self.config.auto_supersede_threshold;
            if auto_superseded {
                let mut old = existing;
                old.status = NodeStatus::Superseded;
                old.superseded_by = Some(new_id);
                batch.update_node(old);
            }
            tracing::info!(
                candidate = new_id.0,
                existing = edge.to_id.0,
                kind = ?kind,
                auto_superseded,
                "conflict detected"
            );
            reported_conflicts.push(Conflict {
                existing: edge.to_id,
                kind,
                similarity,
                edge,
                auto_superseded,
            });
        }

        let mut inferred_edges = Vec::new();
        for proposal in proposals {
            let (from, to) = if proposal.outgoing {
                (new_id, proposal.other)
            } else {
                (proposal.other, new_id)
            };
            let mut edge = MemoryEdge::new(from, to, proposal.relationship, now)
                .with_strength(proposal.score)
                .with_evidence(proposal.evidence);
            let committed = proposal.score > self.config.edge_commit_threshold;
            if committed {
                edge.id = batch.add_edge(edge.clone());
            }
            tracing::debug!(
                from = from.0,
                to = to.0,
                relationship = %edge.relationship,
                score = %proposal.score,
                committed,
                "inferred edge"
            );
            inferred_edges.push(InferredEdge {
                edge,
                basis: proposal.basis,
                score: proposal.score,
                committed,
            });
        }

        Ok(IngestPlan {
            batch,
            result: IngestResult {
                node: candidate,
                created: true,
                inferred_edges,
                conflicts: reported_conflicts,
                needs_review: false,
            },
        })
    }

    fn find_duplicate<G: GraphView + ?Sized>(
        &self,
        view: &G,
        candidate: &MemoryNode,
    ) -> Result<Option<MemoryNode>, EngramError> {
        for id in view.nodes_by_hash(&candidate.content_hash)? {
            if let Some(node) = view.get_node(id)?
                && node.is_active()
            {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    /// Live nodes sharing time, people, words or an explicit reference
    /// with the candidate, in id order.
    fn candidate_pool<G: GraphView + ?Sized>(
        &self,
        view: &G,
        candidate: &MemoryNode,
    ) -> Result<Vec<MemoryNode>, EngramError> {
        let window = i64::try_from(self.config.temporal_window_secs).unwrap_or(i64::MAX);
        let referenced = referenced_ids(&candidate.what);

        let mut ids: BTreeSet<NodeId> = view
            .nodes_between(
                candidate.occurred_at.saturating_sub_secs(window),
                candidate.occurred_at.saturating_add_secs(window),
            )?
            .into_iter()
            .collect();
        let keys = IndexKeys::of(candidate);
        for participant in &keys.participants {
            ids.extend(view.nodes_by_participant(participant)?);
        }
        for token in &keys.tokens {
            ids.extend(view.nodes_by_token(token)?);
        }

        // Over the cap, explicit references stay and the newest ids fill
        // the rest.
        let mut selected: BTreeSet<NodeId> = referenced.iter().copied().collect();
        for id in ids.into_iter().rev() {
            if selected.len() >= MAX_CANDIDATE_POOL {
                break;
            }
            selected.insert(id);
        }

        let mut pool = Vec::new();
        for id in selected {
            if let Some(node) = view.get_node(id)?
                && node.is_live()
            {
                pool.push(node);
            }
        }
        Ok(pool)
    }

    fn classify(
        &self,
        candidate: &MemoryNode,
        existing: &MemoryNode,
        similarity: Score,
        candidate_negated: bool,
        candidate_people: &BTreeSet<String>,
        people: &BTreeSet<String>,
    ) -> Option<ConflictKind> {
        if similarity < self.config.update_similarity {
            return None;
        }
        if candidate_negated != has_negation(&existing.what) {
            return Some(ConflictKind::Contradiction);
        }
        if similarity >= self.config.duplicate_similarity && candidate_people == people {
            return Some(ConflictKind::Duplicate);
        }
        let shared_people = (candidate_people.is_empty() && people.is_empty())
            || !candidate_people.is_disjoint(people);
        if candidate.occurred_at >= existing.occurred_at && shared_people {
            return Some(ConflictKind::Update);
        }
        None
    }

    /// Proposal for two memories within the temporal window, scored
    /// linearly from 0.8 at the same instant down to 0 at the window edge.
    fn temporal(&self, candidate: &MemoryNode, existing: &MemoryNode) -> Option<Proposal> {
        let window = self.config.temporal_window_secs;
        let dt = candidate.occurred_at.abs_diff(existing.occurred_at);
        if dt >= window {
            return None;
        }
        let permille = 800 * u128::from(window - dt) / u128::from(window);
        let score = Score::from_permille(u16::try_from(permille).unwrap_or(0));
        let (relationship, outgoing) = if dt == 0 {
            (Relationship::CooccurredWith, true)
        } else {
            // preceded_by runs from the later memory to the earlier one
            (
                Relationship::PrecededBy,
                candidate.occurred_at > existing.occurred_at,
            )
        };
        Some(Proposal {
            other: existing.id,
            relationship,
            outgoing,
            basis: InferenceBasis::Temporal,
            score,
            evidence: format!("{}s apart", dt),
        })
    }
}

/// Node ids written as `#12` or `node:12` in `text`.
fn referenced_ids(text: &str) -> BTreeSet<NodeId> {
    let lower = text.to_lowercase();
    let mut ids = BTreeSet::new();
    for marker in ["#", "node:"] {
        let mut rest = lower.as_str();
        while let Some(pos) = rest.find(marker) {
            rest = &rest[pos + marker.len()..];
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if let Ok(value) = digits.parse::<u64>()
                && value != 0
            {
                ids.insert(NodeId(value));
            }
        }
    }
    ids
}

// =============================================================================
// TESTS
// =============================================================================
