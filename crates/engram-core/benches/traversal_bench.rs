//! # Store Benchmarks
//!
//! Traversal, path search, ingestion and export over synthetic graphs.
//!
//! Run with: `cargo bench -p engram-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use engram_core::{
    EngineConfig, Graph, MemoryEdge, MemoryNode, MemoryStore, MutationEngine, NodeId,
    PathOptions, Relationship, Timestamp, Traversal, TraverseOptions, WalkLimits, WriteBatch,
    export_canonical,
};
use std::hint::black_box;

/// `size` memories in a `led_to` chain.
fn create_chain(size: usize) -> Graph {
    let mut graph = Graph::new();
    let mut batch = WriteBatch::against(&graph).expect("batch");
    let mut prev = None;
    for i in 0..size {
        let id = batch.create_node(MemoryNode::new(format!("step {}", i), Timestamp(i as i64)));
        if let Some(prev) = prev {
            batch.add_edge(MemoryEdge::new(prev, id, Relationship::LedTo, Timestamp(0)));
        }
        prev = Some(id);
    }
    let validated = MutationEngine::validate(&graph, batch).expect("valid");
    graph.apply(&validated);
    graph
}

/// A hub memory with `size - 1` spokes.
fn create_star(size: usize) -> Graph {
    let mut graph = Graph::new();
    let mut batch = WriteBatch::against(&graph).expect("batch");
    let hub = batch.create_node(MemoryNode::new("hub", Timestamp(0)));
    for i in 1..size {
        let spoke = batch.create_node(MemoryNode::new(format!("spoke {}", i), Timestamp(i as i64)));
        batch.add_edge(MemoryEdge::new(hub, spoke, Relationship::RelatesTo, Timestamp(0)));
    }
    let validated = MutationEngine::validate(&graph, batch).expect("valid");
    graph.apply(&validated);
    graph
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_traverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("traverse");
    let limits = WalkLimits::unbounded();

    for size in [100, 500, 1000].iter() {
        let graph = create_chain(*size);
        for depth in [2usize, 10, 50] {
            let options = TraverseOptions::hops(depth);
            group.bench_with_input(
                BenchmarkId::new(format!("depth_{}", depth), size),
                &options,
                |b, options| {
                    b.iter(|| black_box(Traversal::traverse(&graph, NodeId(1), options, &limits)));
                },
            );
        }
    }

    for size in [100, 1000].iter() {
        let graph = create_star(*size);
        let options = TraverseOptions::hops(2);
        group.bench_with_input(BenchmarkId::new("star", size), &options, |b, options| {
            b.iter(|| black_box(Traversal::traverse(&graph, NodeId(2), options, &limits)));
        });
    }

    group.finish();
}

fn bench_find_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_path");
    let limits = WalkLimits::unbounded();

    for size in [10, 50, 100].iter() {
        let graph = create_chain(*size);
        let options = PathOptions::hops(*size);
        let end = NodeId(*size as u64);

        group.bench_with_input(BenchmarkId::from_parameter(size), &options, |b, options| {
            b.iter(|| black_box(Traversal::find_path(&graph, NodeId(1), end, options, &limits)));
        });
    }

    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let store = MemoryStore::in_memory(EngineConfig::default()).expect("store");
                for i in 0..size {
                    let node = MemoryNode::new(
                        format!("deploy {} finished for service {}", i, i % 7),
                        Timestamp((i * 60) as i64),
                    );
                    let _ = store.ingest(node);
                }
                black_box(store)
            });
        });
    }

    group.finish();
}

fn bench_export_canonical(c: &mut Criterion) {
    let mut group = c.benchmark_group("export_canonical");

    for size in [100, 500, 1000].iter() {
        let graph = create_chain(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(export_canonical(&graph)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_traverse,
    bench_find_path,
    bench_ingest,
    bench_export_canonical
);
criterion_main!(benches);
