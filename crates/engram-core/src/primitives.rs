//! # Store Primitives
//!
//! Hardcoded limits and format constants for the engram store.
//!
//! Tunable behaviour (windows, thresholds, timeouts) lives in
//! [`crate::config::EngineConfig`]; the values here are fixed at compile
//! time and bound every operation regardless of configuration.

/// Maximum number of hops any walk may take.
///
/// Requested `max_hops` values above this are clamped.
pub const MAX_TRAVERSAL_DEPTH: usize = 100;

/// Maximum length of `what` and of the other free-text fields (64KB).
pub const MAX_TEXT_LENGTH: usize = 65536;

/// Maximum length of a single participant, tag or artifact reference.
pub const MAX_LABEL_LENGTH: usize = 256;

/// Maximum number of participants, tags or artifacts on one node.
pub const MAX_LABELS_PER_NODE: usize = 1024;

/// Maximum length of the `summary` field.
pub const MAX_SUMMARY_LENGTH: usize = 4096;

/// Minimum `summary` length for it to count as a recognizable title
/// during explicit reference matching.
pub const MIN_TITLE_LENGTH: usize = 8;

/// Minimum token length kept by the token index.
pub const MIN_TOKEN_LENGTH: usize = 2;

/// Maximum number of existing nodes examined per ingestion.
///
/// Keeps candidate-pool construction bounded on hot tags or tokens.
pub const MAX_CANDIDATE_POOL: usize = 512;

/// Scale of fixed-point scores: `1000` represents 1.0.
pub const SCORE_SCALE: u16 = 1000;

// =============================================================================
// RECORD FORMAT
// =============================================================================

/// Magic bytes for the canonical export header ("Engram eXport").
pub const CANONICAL_MAGIC: [u8; 4] = *b"ENGX";

/// Current canonical export format version.
pub const CANONICAL_VERSION: u8 = 1;

/// Maximum node count accepted by a canonical import.
pub const MAX_IMPORT_NODE_COUNT: u64 = 1_000_000;

/// Maximum edge count accepted by a canonical import.
pub const MAX_IMPORT_EDGE_COUNT: u64 = 10_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(&CANONICAL_MAGIC, b"ENGX");
    }

    #[test]
    fn title_length_within_summary_limit() {
        assert!(MIN_TITLE_LENGTH < MAX_SUMMARY_LENGTH);
    }
}
