//! # Engram - Memory Store CLI
//!
//! ## Usage
//!
//! ```bash
//! # Create a store and record a memory
//! engram init
//! engram add "Chose Postgres for billing" --at 2024-03-01T10:00:00Z -w ana -t db
//!
//! # Walk, connect and reconcile
//! engram traverse 1 --hops 3
//! engram path 1 7
//! engram resolve 4 --json
//! ```
//!
//! Logging goes to stderr. `RUST_LOG` sets the filter (default
//! `engram=info`); `ENGRAM_LOG_FORMAT=json` switches to JSON lines.

use clap::Parser;
use engram::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let log_format = std::env::var("ENGRAM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "engram=info,engram_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
