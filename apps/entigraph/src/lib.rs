//! # entigraph
//!
//! The command line application over `entigraph-core`.
//!
//! - `cli`: clap commands over named graph snapshots
//! - `config`: `entigraph.toml` loading
//! - `source`: concurrent placeholder enrichment from a record directory
//! - `error`: the application error type

pub mod cli;
pub mod config;
pub mod error;
pub mod source;

pub use config::{AppConfig, EnrichConfig};
pub use error::AppError;
