//! # engram
//!
//! Command-line front end over `engram-core`. Exposed as a library so the
//! command layer can be exercised by integration tests.

pub mod cli;
pub mod config;
