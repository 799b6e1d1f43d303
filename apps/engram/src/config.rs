//! # Application Configuration
//!
//! TOML configuration for the binary.
//!
//! Lookup order:
//! 1. `--config <path>`
//! 2. `ENGRAM_CONFIG` environment variable
//! 3. `./engram.toml`, when present
//!
//! With none of these, defaults apply. Command-line flags override the
//! `[store]` section.
//!
//! ```toml
//! [store]
//! database = "memories.redb"
//! backend = "redb"
//!
//! [ingest]
//! temporal_window_secs = 1800
//! edge_commit_threshold = 0.7
//!
//! [traversal]
//! timeout_ms = 2000
//!
//! [reconcile]
//! review_threshold = 0.8
//! ```

use clap::ValueEnum;
use engram_core::{EngineConfig, EngramError, IngestConfig, ReconcileConfig, TraversalConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "ENGRAM_CONFIG";

/// Configuration file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "engram.toml";

/// Database path used when neither flags nor config name one.
pub const DEFAULT_DATABASE: &str = "engram.redb";

/// Where the store lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Canonical export file, loaded and rewritten by every command
    File,
    /// redb database (ACID, durable on every commit)
    #[default]
    Redb,
    /// Volatile store discarded on exit
    Memory,
}

impl Backend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Redb => "redb",
            Self::Memory => "memory",
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub database: Option<PathBuf>,
    pub backend: Option<Backend>,
}

/// Whole configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub traversal: TraversalConfig,
    pub reconcile: ReconcileConfig,
}

impl AppConfig {
    /// Parse a configuration document.
    pub fn parse(text: &str) -> Result<Self, EngramError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| EngramError::DeserializationError(format!("config: {}", e)))?;
        config.engine().validate()?;
        Ok(config)
    }

    /// Read a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, EngramError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngramError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Resolve the configuration file to use, if any, and load it.
    pub fn load(explicit: Option<&Path>) -> Result<Self, EngramError> {
        match Self::locate(explicit, std::env::var_os(CONFIG_ENV).map(PathBuf::from)) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    fn locate(explicit: Option<&Path>, from_env: Option<PathBuf>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = from_env.filter(|p| !p.as_os_str().is_empty()) {
            return Some(path);
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        local.is_file().then_some(local)
    }

    /// Engine settings handed to the store.
    #[must_use]
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            ingest: self.ingest.clone(),
            traversal: self.traversal.clone(),
            reconcile: self.reconcile.clone(),
        }
    }

    /// Database path: flag, then config, then the default.
    #[must_use]
    pub fn database(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.store.database.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE))
    }

    /// Backend: flag, then config, then redb.
    #[must_use]
    pub fn backend(&self, flag: Option<Backend>) -> Backend {
        flag.or(self.store.backend).unwrap_or_default()
    }
}
