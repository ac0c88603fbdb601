//! # entigraph
//!
//! The main binary for the entigraph canonicalization engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 apps/entigraph (THE BINARY)              │
//! │                                                          │
//! │  ┌─────────────┐   ┌─────────────┐   ┌───────────────┐   │
//! │  │   CLI       │   │   Config    │   │ Record source │   │
//! │  │  (clap)     │   │   (toml)    │   │ (tokio tasks) │   │
//! │  └──────┬──────┘   └──────┬──────┘   └───────┬───────┘   │
//! │         └─────────────────┼──────────────────┘           │
//! │                           ▼                              │
//! │                  ┌─────────────────┐                     │
//! │                  │ entigraph-core  │                     │
//! │                  │  (THE ENGINE)   │                     │
//! │                  └─────────────────┘                     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! entigraph init
//! entigraph ingest -f records.ndjson
//! entigraph dedupe --prop email
//! entigraph enrich --source records/
//! entigraph -g other ingest -f more.ndjson
//! entigraph intersect main other --into common
//! ```

use clap::Parser;
use entigraph::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // ENTIGRAPH_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("ENTIGRAPH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "entigraph=debug,entigraph_core=debug"
    } else {
        "entigraph=info,entigraph_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

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

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
