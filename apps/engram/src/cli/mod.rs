//! # Engram CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create an empty store
//! - `status` - Show store metrics
//! - `add` - Ingest memories from flags or a JSON file
//! - `show` - Print one memory and its edges
//! - `traverse` - Bounded context walk from a memory
//! - `path` - Shortest path between two memories
//! - `resolve` - Current belief for a memory
//! - `related` - One-hop neighbours
//! - `window` - Memories just before and after one in time
//! - `since`, `tag`, `who`, `search` - Index lookups
//! - `query` - Run a JSON query
//! - `confirm` - Apply a pending supersession
//! - `archive` - Forget a memory
//! - `gc` - Remove edges of archived memories
//! - `export`, `import`, `hash` - Canonical snapshots

mod commands;

use crate::config::{AppConfig, Backend};
use clap::{Args, Parser, Subcommand, ValueEnum};
use engram_core::{
    Direction, EngineConfig, EngramError, NodeKind, Relationship, Timestamp, WalkDirection,
};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Engram - graph-structured memory store
///
/// Records what happened, when and who was involved, links related
/// memories, and answers what is currently believed.
#[derive(Parser, Debug)]
#[command(name = "engram")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the store (default: engram.redb)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Configuration file (default: $ENGRAM_CONFIG, then ./engram.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an empty store
    Init {
        /// Overwrite an existing store
        #[arg(short, long)]
        force: bool,
    },

    /// Show store metrics
    Status,

    /// Ingest memories
    Add(AddArgs),

    /// Print a memory and its edges
    Show { id: u64 },

    /// Walk outward from a memory
    Traverse {
        start: u64,
        #[command(flatten)]
        walk: WalkArgs,
    },

    /// Shortest path between two memories
    Path {
        from: u64,
        to: u64,

        /// Hop budget (default: traversal.path_max_hops)
        #[arg(long)]
        hops: Option<usize>,

        /// forward, reverse or both
        #[arg(short, long, default_value = "both")]
        direction: WalkDirection,
    },

    /// Resolve a memory to what is currently believed
    Resolve { id: u64 },

    /// One-hop neighbours of a memory
    Related {
        id: u64,

        /// Only this relationship
        #[arg(short, long)]
        relationship: Option<Relationship>,

        /// outgoing, incoming or both
        #[arg(short, long, default_value = "both")]
        direction: Direction,
    },

    /// Memories just before and after one in time
    Window {
        id: u64,
        #[arg(short, long, default_value = "3")]
        before: usize,
        #[arg(short, long, default_value = "3")]
        after: usize,
    },

    /// Memories that occurred at or after a time
    Since {
        /// RFC 3339 or Unix seconds
        #[arg(value_parser = parse_timestamp)]
        at: Timestamp,
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Memories with a tag
    Tag { tag: String },

    /// Memories involving a participant
    Who { participant: String },

    /// Token search over text, summaries and tags
    Search {
        text: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Run a JSON query, e.g. '{"op": "resolve", "node": 3}'
    Query {
        /// Query document; read from --file when omitted
        json: Option<String>,
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Mark OLD as superseded by NEW (requires a supersedes edge NEW -> OLD)
    Confirm { new: u64, old: u64 },

    /// Archive (forget) a memory
    Archive { id: u64 },

    /// Remove edges touching archived memories
    Gc {
        /// Also compact the redb file
        #[arg(long)]
        compact: bool,
    },

    /// Export the store
    Export {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short = 't', long, value_enum, default_value = "canonical")]
        format: ExportFormat,
    },

    /// Load an export into an empty store
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// BLAKE3 fingerprint of the store contents
    Hash,
}

/// Memory fields for `add`.
#[derive(Args, Debug, Default)]
pub struct AddArgs {
    /// What happened
    pub what: Option<String>,

    /// JSON file holding one draft or an array of drafts
    #[arg(short, long, conflicts_with = "what")]
    pub file: Option<PathBuf>,

    /// When it happened: RFC 3339 or Unix seconds (default: now)
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<Timestamp>,

    /// Participant (repeatable)
    #[arg(short, long)]
    pub who: Vec<String>,

    /// Tag (repeatable)
    #[arg(short, long)]
    pub tag: Vec<String>,

    #[arg(short, long)]
    pub kind: Option<NodeKind>,

    /// Short title
    #[arg(short, long)]
    pub summary: Option<String>,

    /// Confidence in [0, 1]
    #[arg(long)]
    pub confidence: Option<f64>,

    #[arg(long)]
    pub source: Option<String>,
}

/// Options of `traverse`.
#[derive(Args, Debug, Default)]
pub struct WalkArgs {
    /// Hop budget (default: traversal.default_max_hops)
    #[arg(long)]
    pub hops: Option<usize>,

    /// Only follow this relationship (repeatable)
    #[arg(short, long)]
    pub relationship: Vec<Relationship>,

    /// Skip edges weaker than this, in [0, 1]
    #[arg(long)]
    pub min_strength: Option<f64>,

    /// forward, reverse or both
    #[arg(short, long, default_value = "forward")]
    pub direction: WalkDirection,

    /// Report the start memory too
    #[arg(long)]
    pub include_start: bool,

    /// Enter archived memories
    #[arg(long)]
    pub include_archived: bool,
}

/// Formats of `export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// Checksummed binary snapshot
    Canonical,
    /// Human-readable JSON
    Json,
}

/// Accept Unix seconds or RFC 3339.
pub fn parse_timestamp(text: &str) -> Result<Timestamp, EngramError> {
    match text.trim().parse::<i64>() {
        Ok(secs) => Ok(Timestamp::from_unix(secs)),
        Err(_) => Timestamp::parse_rfc3339(text.trim()),
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Resolved settings every command runs with.
#[derive(Debug, Clone)]
pub struct Context {
    pub database: PathBuf,
    pub backend: Backend,
    pub json: bool,
    pub engine: EngineConfig,
}

impl Context {
    /// Merge flags over the configuration file.
    pub fn resolve(cli: &Cli) -> Result<Self, EngramError> {
        let config = AppConfig::load(cli.config.as_deref())?;
        Ok(Self {
            database: config.database(cli.database.as_deref()),
            backend: config.backend(cli.backend),
            json: cli.json,
            engine: config.engine(),
        })
    }
}

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), EngramError> {
    let ctx = Context::resolve(&cli)?;
    tracing::debug!(
        database = %ctx.database.display(),
        backend = ctx.backend.as_str(),
        "context resolved"
    );

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&ctx, force),
        Some(Commands::Status) | None => cmd_status(&ctx),
        Some(Commands::Add(args)) => cmd_add(&ctx, args),
        Some(Commands::Show { id }) => cmd_show(&ctx, id),
        Some(Commands::Traverse { start, walk }) => cmd_traverse(&ctx, start, &walk),
        Some(Commands::Path {
            from,
            to,
            hops,
            direction,
        }) => cmd_path(&ctx, from, to, hops, direction),
        Some(Commands::Resolve { id }) => cmd_resolve(&ctx, id),
        Some(Commands::Related {
            id,
            relationship,
            direction,
        }) => cmd_related(&ctx, id, relationship, direction),
        Some(Commands::Window { id, before, after }) => cmd_window(&ctx, id, before, after),
        Some(Commands::Since { at, limit }) => cmd_since(&ctx, at, limit),
        Some(Commands::Tag { tag }) => cmd_tag(&ctx, tag),
        Some(Commands::Who { participant }) => cmd_who(&ctx, participant),
        Some(Commands::Search { text, limit }) => cmd_search(&ctx, text, limit),
        Some(Commands::Query { json, file }) => cmd_query(&ctx, json, file),
        Some(Commands::Confirm { new, old }) => cmd_confirm(&ctx, new, old),
        Some(Commands::Archive { id }) => cmd_archive(&ctx, id),
        Some(Commands::Gc { compact }) => cmd_gc(&ctx, compact),
        Some(Commands::Export { output, format }) => cmd_export(&ctx, &output, format),
        Some(Commands::Import { input }) => cmd_import(&ctx, &input),
        Some(Commands::Hash) => cmd_hash(&ctx),
    }
}
