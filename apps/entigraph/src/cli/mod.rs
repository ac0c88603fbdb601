//! # entigraph CLI Module
//!
//! This module implements the CLI interface for entigraph.
//!
//! Graphs live as named snapshots inside one redb database (`-D`). Every
//! command loads the graph named by `-g`, works on it, and saves it back.
//!
//! ## Available Commands
//!
//! - `init` - Create an empty graph
//! - `status` - Show graph counters
//! - `list` - List stored graphs
//! - `ingest` - Ingest NDJSON records
//! - `merge` - Merge the nodes owning some records
//! - `dedupe` - Merge nodes sharing property values
//! - `tag` - Inspect and change per-record tags
//! - `describe` - Show one canonical node
//! - `intersect` - Intersect stored graphs into a new one
//! - `filter` - Topology filters into a new graph
//! - `enrich` - Resolve placeholders from a record directory
//! - `export` / `import` - Line or binary dumps

mod commands;

use crate::config::AppConfig;
use crate::error::AppError;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// entigraph - entity canonicalization graph
///
/// Merges duplicate records from many sources into canonical nodes while
/// keeping every original record and its tags addressable.
#[derive(Parser, Debug)]
#[command(name = "entigraph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the snapshot database
    #[arg(short = 'D', long, global = true, default_value = "entigraph.db")]
    pub database: PathBuf,

    /// Name of the graph to work on
    #[arg(short, long, global = true, default_value = "main")]
    pub graph: String,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "entigraph.toml")]
    pub config: PathBuf,

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
    /// Create an empty graph
    Init {
        /// Replace an existing graph of the same name
        #[arg(short, long)]
        force: bool,
    },

    /// Show graph counters
    Status,

    /// List stored graphs
    List,

    /// Ingest newline-delimited JSON records
    Ingest {
        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Merge the nodes owning the given records
    Merge {
        /// Record ids (at least two)
        #[arg(required = true, num_args = 2..)]
        records: Vec<String>,
    },

    /// Merge nodes that share a value of any given property
    Dedupe {
        /// Property name to match on (repeatable)
        #[arg(short, long = "prop", required = true)]
        props: Vec<String>,
    },

    /// Inspect and change per-record tags
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Show one canonical node (by canonical or record id)
    Describe {
        /// Canonical id or record id
        id: String,
    },

    /// Intersect stored graphs into a new graph
    Intersect {
        /// Graph names (at least one)
        #[arg(required = true)]
        graphs: Vec<String>,

        /// Name to store the result under
        #[arg(long)]
        into: String,
    },

    /// Filter the current graph by topology into a new graph
    Filter {
        #[command(subcommand)]
        filter: FilterKind,
    },

    /// Fetch records for unresolved placeholders
    Enrich {
        /// Record directory (overrides `enrich.source_dir`)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Concurrent fetches (overrides `enrich.concurrency`)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Export the graph
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format
        #[arg(short = 't', long, value_enum, default_value = "lines")]
        format: DumpFormat,
    },

    /// Import a graph dump
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Import format
        #[arg(short = 't', long, value_enum, default_value = "lines")]
        format: DumpFormat,

        /// Replace an existing graph of the same name
        #[arg(short, long)]
        force: bool,
    },
}

/// Tag subcommands.
#[derive(Subcommand, Debug)]
pub enum TagAction {
    /// Give every record the tag unless it already has it
    Ensure {
        name: String,
        /// Value for records without the tag
        #[arg(long)]
        value: bool,
    },
    /// Set a tag on one record
    Set {
        record: String,
        name: String,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
    /// Remove a tag from one record
    Clear { record: String, name: String },
    /// List records or nodes matching a filter like `seen=true,flag=unset`
    List {
        #[arg(default_value = "")]
        filter: String,
        /// List canonical nodes (all records must match) instead of records
        #[arg(long)]
        nodes: bool,
    },
}

/// Topology filters.
#[derive(Subcommand, Debug)]
pub enum FilterKind {
    /// Keep nodes whose in + out degree is within bounds
    Degree {
        #[arg(long)]
        min: Option<usize>,
        #[arg(long)]
        max: Option<usize>,
        /// Name to store the result under
        #[arg(long)]
        into: String,
    },
    /// Keep the k-core
    Kcore {
        #[arg(short)]
        k: usize,
        /// Name to store the result under
        #[arg(long)]
        into: String,
    },
    /// Keep nodes in connected components of bounded size
    Component {
        #[arg(long)]
        min: Option<usize>,
        #[arg(long)]
        max: Option<usize>,
        /// Name to store the result under
        #[arg(long)]
        into: String,
    },
}

/// Dump formats.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    /// One JSON object per record
    Lines,
    /// Binary snapshot
    Binary,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AppError> {
    let config = AppConfig::load(&cli.config)?;
    let ctx = Context::new(cli.database, cli.graph, config)
        .json(cli.json)
        .quiet(cli.quiet);

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&ctx, force),
        Some(Commands::Status) | None => cmd_status(&ctx),
        Some(Commands::List) => cmd_list(&ctx),
        Some(Commands::Ingest { file }) => cmd_ingest(&ctx, &file),
        Some(Commands::Merge { records }) => cmd_merge(&ctx, &records),
        Some(Commands::Dedupe { props }) => cmd_dedupe(&ctx, &props),
        Some(Commands::Tag { action }) => cmd_tag(&ctx, action),
        Some(Commands::Describe { id }) => cmd_describe(&ctx, &id),
        Some(Commands::Intersect { graphs, into }) => cmd_intersect(&ctx, &graphs, &into),
        Some(Commands::Filter { filter }) => cmd_filter(&ctx, filter),
        Some(Commands::Enrich {
            source,
            concurrency,
        }) => cmd_enrich(&ctx, source, concurrency).await,
        Some(Commands::Export { output, format }) => cmd_export(&ctx, &output, format),
        Some(Commands::Import {
            input,
            format,
            force,
        }) => cmd_import(&ctx, &input, format, force),
    }
}
