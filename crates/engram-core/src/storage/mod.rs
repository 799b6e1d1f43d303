//! Disk-backed storage.

mod redb_graph;

pub use redb_graph::{RedbGraph, RedbSnapshot};
