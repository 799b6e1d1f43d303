//! # CLI Command Implementations

use super::{AddArgs, Context, ExportFormat, WalkArgs};
use crate::config::Backend;
use engram_core::{
    CanonicalGraph, Direction, EngramError, Graph, IngestResult, MemoryNode, MemoryStore, NodeId,
    PathOptions, Query, QueryOutput, QueryType, Relationship, Score, Timestamp, TraverseOptions,
    WalkDirection, export::check_integrity, import_canonical,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE LIMITS
// =============================================================================

/// Maximum size of an ingestion or query file (100 MB).
const MAX_INPUT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum size of an export file to import (500 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Maximum drafts in one `add --file`.
const MAX_INGEST_BATCH: usize = 10_000;

/// Read an existing regular file no larger than `max_size`.
fn read_input(path: &Path, max_size: u64) -> Result<Vec<u8>, EngramError> {
    let canonical = path.canonicalize().map_err(|e| {
        EngramError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(EngramError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| EngramError::IoError(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > max_size {
        return Err(EngramError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }

    std::fs::read(&canonical).map_err(|e| EngramError::IoError(format!("Read file: {}", e)))
}

/// Resolve an output path whose parent directory must already exist.
fn output_path(path: &Path) -> Result<PathBuf, EngramError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let parent = parent.canonicalize().map_err(|e| {
        EngramError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;
    let name = path
        .file_name()
        .ok_or_else(|| EngramError::IoError("Output path has no filename".to_string()))?;
    Ok(parent.join(name))
}

fn invalid(field: &'static str, reason: impl Into<String>) -> EngramError {
    EngramError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn emit<T: Serialize>(value: &T) -> Result<(), EngramError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| EngramError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn score(field: &'static str, value: Option<f64>) -> Result<Option<Score>, EngramError> {
    value.map(|v| Score::from_fraction(field, v)).transpose()
}

// =============================================================================
// STORE HANDLING
// =============================================================================

/// Open the store named by `ctx`.
///
/// The file backend loads the whole export into memory; a missing file is
/// an empty store.
pub fn open_store(ctx: &Context) -> Result<MemoryStore, EngramError> {
    match ctx.backend {
        Backend::Redb => MemoryStore::open(&ctx.database, ctx.engine.clone()),
        Backend::Memory => MemoryStore::in_memory(ctx.engine.clone()),
        Backend::File => {
            if ctx.database.exists() {
                let data = read_input(&ctx.database, MAX_IMPORT_FILE_SIZE)?;
                MemoryStore::from_graph(load_graph(&data)?, ctx.engine.clone())
            } else {
                MemoryStore::in_memory(ctx.engine.clone())
            }
        }
    }
}

/// Persist a file-backed store. Other backends are already durable or
/// volatile by choice.
pub fn save_store(ctx: &Context, store: &MemoryStore) -> Result<(), EngramError> {
    if ctx.backend != Backend::File {
        return Ok(());
    }
    let data = store.export_canonical()?;
    std::fs::write(&ctx.database, &data)
        .map_err(|e| EngramError::IoError(format!("Write db: {}", e)))
}

/// Decode a canonical export, falling back to the JSON export format.
pub fn load_graph(data: &[u8]) -> Result<Graph, EngramError> {
    match import_canonical(data) {
        Ok(graph) => Ok(graph),
        Err(canonical_err) => {
            let Ok(canonical) = serde_json::from_slice::<CanonicalGraph>(data) else {
                return Err(canonical_err);
            };
            let graph = canonical.into_graph();
            check_integrity(&graph)?;
            Ok(graph)
        }
    }
}

// =============================================================================
// LIFECYCLE COMMANDS
// =============================================================================

/// Create an empty store.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), EngramError> {
    if ctx.backend == Backend::Memory {
        println!("Memory backend needs no initialization");
        return Ok(());
    }
    if ctx.database.exists() {
        if !force {
            return Err(EngramError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(&ctx.database)
            .map_err(|e| EngramError::IoError(format!("Remove db: {}", e)))?;
    }

    let store = open_store(ctx)?;
    save_store(ctx, &store)?;
    store.close()?;
    println!(
        "Initialized new {} store at {}",
        ctx.backend.as_str(),
        ctx.database.display()
    );
    Ok(())
}

/// Show store metrics.
pub fn cmd_status(ctx: &Context) -> Result<(), EngramError> {
    let store = open_store(ctx)?;
    let metrics = store.stats()?;

    if ctx.json {
        return emit(&serde_json::json!({
            "database": ctx.database.to_string_lossy(),
            "backend": ctx.backend.as_str(),
            "metrics": metrics,
        }));
    }

    println!("Engram Store Status");
    println!("===================");
    println!("Database: {}", ctx.database.display());
    println!("Backend:  {}", ctx.backend.as_str());
    println!();
    println!("Memories: {}", metrics.node_count);
    for (status, count) in &metrics.by_status {
        println!("  {:<11} {}", status, count);
    }
    println!("Edges:    {}", metrics.edge_count);
    for (relationship, count) in &metrics.by_relationship {
        println!("  {:<16} {}", relationship, count);
    }
    println!("Roots:    {}", metrics.root_count);
    println!(
        "Density:  {} per thousand",
        metrics.density_per_thousand()
    );
    if metrics.archived_edge_count > 0 {
        println!(
            "Collectable edges: {} (run `engram gc`)",
            metrics.archived_edge_count
        );
    }
    Ok(())
}

/// Export the store.
pub fn cmd_export(ctx: &Context, output: &Path, format: ExportFormat) -> Result<(), EngramError> {
    let output = output_path(output)?;
    let store = open_store(ctx)?;

    let data = match format {
        ExportFormat::Canonical => {
            println!("Checksum: {}", store.canonical_hash()?);
            store.export_canonical()?
        }
        ExportFormat::Json => {
            let canonical = CanonicalGraph::from_view(&store.snapshot()?)?;
            serde_json::to_vec_pretty(&canonical)
                .map_err(|e| EngramError::SerializationError(e.to_string()))?
        }
    };

    std::fs::write(&output, &data)
        .map_err(|e| EngramError::IoError(format!("Write file: {}", e)))?;
    println!("Exported {} bytes to {}", data.len(), output.display());
    Ok(())
}

/// Load an export into an empty store.
pub fn cmd_import(ctx: &Context, input: &Path) -> Result<(), EngramError> {
    let data = read_input(input, MAX_IMPORT_FILE_SIZE)?;
    let store = open_store(ctx)?;

    // JSON exports are re-encoded so `restore` sees one format.
    let canonical = match import_canonical(&data) {
        Ok(_) => data,
        Err(_) => engram_core::export_canonical(&load_graph(&data)?)?,
    };
    store.restore(&canonical)?;
    save_store(ctx, &store)?;

    println!(
        "Imported {} memories, {} edges",
        store.node_count()?,
        store.edge_count()?
    );
    Ok(())
}

/// Print the store fingerprint.
pub fn cmd_hash(ctx: &Context) -> Result<(), EngramError> {
    let store = open_store(ctx)?;
    let hash = store.canonical_hash()?;
    if ctx.json {
        return emit(&serde_json::json!({ "blake3": hash }));
    }
    println!("{}", hash);
    Ok(())
}

// =============================================================================
// INGESTION
// =============================================================================

/// Build drafts from `add` arguments.
pub fn drafts(args: AddArgs) -> Result<Vec<MemoryNode>, EngramError> {
    if let Some(file) = &args.file {
        let data = read_input(file, MAX_INPUT_FILE_SIZE)?;
        let value: serde_json::Value = serde_json::from_slice(&data)
            .map_err(|e| EngramError::DeserializationError(format!("{}: {}", file.display(), e)))?;
        let drafts: Vec<MemoryNode> = match value {
            serde_json::Value::Array(_) => serde_json::from_value(value),
            _ => serde_json::from_value(value).map(|node| vec![node]),
        }
        .map_err(|e| EngramError::DeserializationError(format!("{}: {}", file.display(), e)))?;
        if drafts.len() > MAX_INGEST_BATCH {
            return Err(invalid(
                "file",
                format!(
                    "{} drafts exceed maximum {}",
                    drafts.len(),
                    MAX_INGEST_BATCH
                ),
            ));
        }
        return Ok(drafts);
    }

    let what = args
        .what
        .ok_or_else(|| invalid("what", "give the memory text or --file"))?;
    let mut node = MemoryNode::new(what, args.at.unwrap_or_else(Timestamp::now))
        .with_who(args.who)
        .with_tags(args.tag);
    if let Some(kind) = args.kind {
        node = node.with_kind(kind);
    }
    if let Some(summary) = args.summary {
        node = node.with_summary(summary);
    }
    if let Some(confidence) = score("confidence", args.confidence)? {
        node = node.with_confidence(confidence);
    }
    if let Some(source) = args.source {
        node = node.with_source(source);
    }
    Ok(vec![node])
}

/// Ingest memories.
pub fn cmd_add(ctx: &Context, args: AddArgs) -> Result<(), EngramError> {
    let drafts = drafts(args)?;
    let store = open_store(ctx)?;

    let mut results = Vec::with_capacity(drafts.len());
    for draft in drafts {
        results.push(store.ingest(draft)?);
    }
    save_store(ctx, &store)?;

    if ctx.json {
        return emit(&results);
    }
    for result in &results {
        print_ingest(result);
    }
    Ok(())
}

fn print_ingest(result: &IngestResult) {
    let committed = result.inferred_edges.iter().filter(|e| e.committed).count();
    if result.created {
        println!(
            "{} stored: {} edge(s) inferred, {} committed, {} conflict(s)",
            result.node.id,
            result.inferred_edges.len(),
            committed,
            result.conflicts.len()
        );
    } else {
        println!("{} already stored", result.node.id);
    }
    for conflict in &result.conflicts {
        let applied = if conflict.auto_superseded {
            " (applied)"
        } else {
            ""
        };
        println!(
            "  {:?} with {} at similarity {}{}",
            conflict.kind, conflict.existing, conflict.similarity, applied
        );
    }
    for inferred in result.inferred_edges.iter().filter(|e| !e.committed) {
        println!(
            "  proposed {} {} -> {} (score {})",
            inferred.edge.relationship, inferred.edge.from_id, inferred.edge.to_id, inferred.score
        );
    }
    if result.needs_review {
        println!("  needs review");
    }
}

// =============================================================================
// READ COMMANDS
// =============================================================================

/// Print a memory and its edges.
pub fn cmd_show(ctx: &Context, id: u64) -> Result<(), EngramError> {
    let store = open_store(ctx)?;
    let node = store.get_node(NodeId(id))?;
    let edges = store.get_edges(node.id, Direction::Both, None)?;

    if ctx.json {
        return emit(&serde_json::json!({ "node": node, "edges": edges }));
    }

    println!("{}", describe(&node));
    if !node.who.is_empty() {
        println!("  who:        {}", join(&node.who));
    }
    if !node.tags.is_empty() {
        println!("  tags:       {}", join(&node.tags));
    }
    if !node.summary.is_empty() {
        println!("  summary:    {}", node.summary);
    }
    println!("  kind:       {}", node.kind);
    println!("  confidence: {}", node.confidence);
    if let Some(newer) = node.superseded_by {
        println!("  superseded by {}", newer);
    }
    for edge in &edges {
        println!(
            "  {} {} -> {} (strength {})",
            edge.relationship, edge.from_id, edge.to_id, edge.strength
        );
    }
    Ok(())
}

/// Walk outward from a memory.
pub fn cmd_traverse(ctx: &Context, start: u64, walk: &WalkArgs) -> Result<(), EngramError> {
    let mut options = TraverseOptions::hops(
        walk.hops
            .unwrap_or(ctx.engine.traversal.default_max_hops),
    )
    .direction(walk.direction)
    .include_start(walk.include_start);
    if !walk.relationship.is_empty() {
        options = options.only(walk.relationship.iter().cloned());
    }
    if let Some(min) = score("min_strength", walk.min_strength)? {
        options = options.min_strength(min);
    }
    options.include_archived = walk.include_archived;

    run_query(
        ctx,
        Query::new(QueryType::Traverse {
            start: NodeId(start),
            options,
        }),
    )
}

/// Shortest path between two memories.
pub fn cmd_path(
    ctx: &Context,
    from: u64,
    to: u64,
    hops: Option<usize>,
    direction: WalkDirection,
) -> Result<(), EngramError> {
    let options = PathOptions::hops(hops.unwrap_or(ctx.engine.traversal.path_max_hops))
        .direction(direction);
    run_query(
        ctx,
        Query::new(QueryType::FindPath {
            from: NodeId(from),
            to: NodeId(to),
            options,
        }),
    )
}

pub fn cmd_resolve(ctx: &Context, id: u64) -> Result<(), EngramError> {
    run_query(ctx, Query::resolve(NodeId(id)))
}

pub fn cmd_related(
    ctx: &Context,
    id: u64,
    relationship: Option<Relationship>,
    direction: Direction,
) -> Result<(), EngramError> {
    run_query(
        ctx,
        Query::new(QueryType::Related {
            node: NodeId(id),
            relationship,
            direction,
        }),
    )
}

pub fn cmd_window(ctx: &Context, id: u64, before: usize, after: usize) -> Result<(), EngramError> {
    run_query(
        ctx,
        Query::new(QueryType::ContextWindow {
            center: NodeId(id),
            before,
            after,
        }),
    )
}

pub fn cmd_since(ctx: &Context, since: Timestamp, limit: Option<usize>) -> Result<(), EngramError> {
    run_query(ctx, Query::new(QueryType::Since { since, limit }))
}

pub fn cmd_tag(ctx: &Context, tag: String) -> Result<(), EngramError> {
    run_query(ctx, Query::new(QueryType::ByTag { tag }))
}

pub fn cmd_who(ctx: &Context, participant: String) -> Result<(), EngramError> {
    run_query(ctx, Query::new(QueryType::ByParticipant { participant }))
}

pub fn cmd_search(ctx: &Context, text: String, limit: Option<usize>) -> Result<(), EngramError> {
    run_query(ctx, Query::new(QueryType::Search { text, limit }))
}

/// Run a JSON query document.
pub fn cmd_query(
    ctx: &Context,
    json: Option<String>,
    file: Option<PathBuf>,
) -> Result<(), EngramError> {
    let text = match (json, file) {
        (Some(json), _) => json,
        (None, Some(file)) => String::from_utf8(read_input(&file, MAX_INPUT_FILE_SIZE)?)
            .map_err(|e| EngramError::DeserializationError(e.to_string()))?,
        (None, None) => return Err(invalid("query", "give a JSON document or --file")),
    };
    run_query(ctx, parse_query(&text)?)
}

/// Parse a JSON query document.
pub fn parse_query(text: &str) -> Result<Query, EngramError> {
    serde_json::from_str(text)
        .map_err(|e| EngramError::DeserializationError(format!("query: {}", e)))
}

fn run_query(ctx: &Context, query: Query) -> Result<(), EngramError> {
    let store = open_store(ctx)?;
    let output = store.execute(&query)?;
    if ctx.json {
        return emit(&output);
    }
    print_output(&output);
    Ok(())
}

fn print_output(output: &QueryOutput) {
    match output {
        QueryOutput::Hits(hits) => {
            println!("{} memories reached", hits.len());
            for hit in hits {
                let path: Vec<String> = hit.path.iter().map(ToString::to_string).collect();
                println!("  [{}] {}", hit.hop_count, describe(&hit.node));
                println!("      via {}", path.join(" -> "));
            }
        }
        QueryOutput::Path(path) => {
            let path: Vec<String> = path.iter().map(ToString::to_string).collect();
            println!("{}", path.join(" -> "));
        }
        QueryOutput::Related(related) => {
            for entry in related {
                println!(
                    "  {} {} -> {}: {}",
                    entry.edge.relationship,
                    entry.edge.from_id,
                    entry.edge.to_id,
                    describe(&entry.node)
                );
            }
        }
        QueryOutput::Window(window) => {
            for node in &window.before {
                println!("  {}", describe(node));
            }
            println!("> {}", describe(&window.center));
            for node in &window.after {
                println!("  {}", describe(node));
            }
        }
        QueryOutput::Resolution(result) => {
            println!("Current:   {}", describe(&result.current));
            println!("Confidence: {}", result.confidence);
            for node in &result.superseded_chain {
                println!("  replaced {}", describe(node));
            }
            for node in &result.disputes {
                println!("  disputed by {}", describe(node));
            }
            if result.is_disputed() {
                println!("Preferred: {}", result.preferred);
            }
            if result.needs_review {
                println!("Needs review");
            }
        }
        QueryOutput::Nodes(nodes) => {
            for node in nodes {
                println!("{}", describe(node));
            }
        }
    }
}

fn describe(node: &MemoryNode) -> String {
    format!(
        "{} [{}] {} ({})",
        node.id, node.status, node.what, node.occurred_at
    )
}

fn join<'a>(labels: impl IntoIterator<Item = &'a String>) -> String {
    labels
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// MAINTENANCE COMMANDS
// =============================================================================

/// Apply a pending supersession.
pub fn cmd_confirm(ctx: &Context, new: u64, old: u64) -> Result<(), EngramError> {
    let store = open_store(ctx)?;
    store.confirm_supersession(NodeId(new), NodeId(old))?;
    save_store(ctx, &store)?;
    println!("{} superseded by {}", NodeId(old), NodeId(new));
    Ok(())
}

/// Archive a memory.
pub fn cmd_archive(ctx: &Context, id: u64) -> Result<(), EngramError> {
    let store = open_store(ctx)?;
    store.archive(NodeId(id))?;
    save_store(ctx, &store)?;
    println!("{} archived", NodeId(id));
    Ok(())
}

/// Collect edges of archived memories.
pub fn cmd_gc(ctx: &Context, compact: bool) -> Result<(), EngramError> {
    let mut store = open_store(ctx)?;
    let removed = store.collect_archived_edges()?;
    save_store(ctx, &store)?;
    let compacted = compact && store.compact()?;

    if ctx.json {
        return emit(&serde_json::json!({ "removed": removed, "compacted": compacted }));
    }
    println!("Removed {} edge(s)", removed.len());
    if compacted {
        println!("Database compacted");
    }
    Ok(())
}
