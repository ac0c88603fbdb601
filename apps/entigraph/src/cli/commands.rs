//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::{DumpFormat, FilterKind, TagAction};
use crate::config::{AppConfig, MAX_ENRICH_CONCURRENCY};
use crate::error::AppError;
use crate::source::{self, DirectorySource};
use entigraph_core::{
    CanonicalGraph, CanonicalId, Changes, EntityGraph, GraphAlgebra, Ingestor, RecordId,
    SnapshotStore, TagFilter, graph_from_bytes, graph_to_bytes, merge_on_properties, read_lines,
    track, write_lines,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::info;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for ingestion (100 MB).
const MAX_INGEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum file size for import (512 MB, the binary snapshot limit).
const MAX_IMPORT_FILE_SIZE: u64 = 512 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), AppError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| AppError::Io(format!("Cannot read file metadata: {e}")))?;

    if metadata.len() > max_size {
        return Err(AppError::InvalidArgument(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path and make sure it is a regular file.
///
/// Canonicalizing resolves ".." and symlinks before anything is opened.
fn validate_file_path(path: &Path) -> Result<PathBuf, AppError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| AppError::Io(format!("Invalid file path '{}': {e}", path.display())))?;

    if !canonical.is_file() {
        return Err(AppError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path: the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, AppError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let canonical_parent = parent.canonicalize().map_err(|e| {
        AppError::Io(format!(
            "Invalid output directory '{}': {e}",
            parent.display()
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(AppError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| AppError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Everything a command needs besides its own arguments.
#[derive(Debug, Clone)]
pub struct Context {
    pub database: PathBuf,
    pub graph: String,
    pub config: AppConfig,
    pub json: bool,
    pub quiet: bool,
}

impl Context {
    #[must_use]
    pub fn new(database: PathBuf, graph: String, config: AppConfig) -> Self {
        Self {
            database,
            graph,
            config,
            json: false,
            quiet: false,
        }
    }

    #[must_use]
    pub fn json(mut self, on: bool) -> Self {
        self.json = on;
        self
    }

    #[must_use]
    pub fn quiet(mut self, on: bool) -> Self {
        self.quiet = on;
        self
    }

    fn open_store(&self) -> Result<SnapshotStore, AppError> {
        Ok(SnapshotStore::open(&self.database)?)
    }

    /// A new empty graph using the configured model and policy.
    fn empty_graph(&self) -> Result<CanonicalGraph, AppError> {
        Ok(CanonicalGraph::with_model(
            self.config.model()?,
            self.config.graph.clone(),
        ))
    }

    /// Load a stored graph by name.
    fn load(&self, store: &SnapshotStore, name: &str) -> Result<CanonicalGraph, AppError> {
        store
            .load(name, self.config.model()?, self.config.graph.clone())?
            .ok_or_else(|| AppError::MissingGraph(name.to_string()))
    }

    /// Load the working graph, or start an empty one.
    fn load_or_create(&self, store: &SnapshotStore) -> Result<CanonicalGraph, AppError> {
        match store.load(&self.graph, self.config.model()?, self.config.graph.clone())? {
            Some(graph) => Ok(graph),
            None => {
                info!(graph = %self.graph, "starting new graph");
                self.empty_graph()
            }
        }
    }

    fn save(&self, store: &SnapshotStore, name: &str, graph: &CanonicalGraph) -> Result<(), AppError> {
        store.save(name, graph)?;
        Ok(())
    }

    /// Print `value` as JSON in json mode, otherwise run `human` unless quiet.
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce()) {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_default()
            );
        } else if !self.quiet {
            human();
        }
    }
}

fn print_changes(changes: &Changes) {
    println!(
        "Changes: {} merged, {} new nodes, {} new edges",
        changes.merged.len(),
        changes.nodes_new.len(),
        changes.edges_new.len()
    );
    for (id, records) in &changes.merged {
        let ids: Vec<&str> = records.iter().map(|r| r.id().as_str()).collect();
        println!("  {id} <- {}", ids.join(", "));
    }
}

// =============================================================================
// INIT / STATUS / LIST
// =============================================================================

/// Create an empty graph.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), AppError> {
    let store = ctx.open_store()?;
    if store.contains(&ctx.graph)? && !force {
        return Err(AppError::GraphExists(ctx.graph.clone()));
    }

    let graph = ctx.empty_graph()?;
    ctx.save(&store, &ctx.graph, &graph)?;

    ctx.emit(
        &serde_json::json!({ "database": ctx.database, "graph": ctx.graph }),
        || println!("Initialized graph '{}' in {:?}", ctx.graph, ctx.database),
    );
    Ok(())
}

/// Show graph counters.
pub fn cmd_status(ctx: &Context) -> Result<(), AppError> {
    let store = ctx.open_store()?;
    let graph = ctx.load(&store, &ctx.graph)?;
    let stats = graph.stats();

    ctx.emit(
        &serde_json::json!({
            "database": ctx.database,
            "graph": ctx.graph,
            "stats": stats,
        }),
        || {
            println!("entigraph Status");
            println!("================");
            println!("Database: {:?}", ctx.database);
            println!("Graph:    {}", ctx.graph);
            println!();
            println!("Records:  {}", stats.records);
            println!("Nodes:    {}", stats.nodes);
            println!("Links:    {}", stats.links);
            println!("Edges:    {}", stats.edges);
            println!("Merged:   {}", stats.merged);
            println!("Pending:  {}", stats.pending);
        },
    );
    Ok(())
}

/// List stored graphs.
pub fn cmd_list(ctx: &Context) -> Result<(), AppError> {
    let store = ctx.open_store()?;
    let listed = store.list()?;

    let rows: Vec<_> = listed
        .iter()
        .map(|(name, stats)| serde_json::json!({ "name": name, "stats": stats }))
        .collect();
    ctx.emit(&rows, || {
        if listed.is_empty() {
            println!("No graphs stored in {:?}", ctx.database);
        }
        for (name, stats) in &listed {
            println!(
                "{name:<24} {:>8} records {:>8} nodes {:>8} edges {:>6} pending",
                stats.records, stats.nodes, stats.edges, stats.pending
            );
        }
    });
    Ok(())
}

// =============================================================================
// INGEST / MERGE / DEDUPE
// =============================================================================

/// Ingest newline-delimited JSON records.
pub fn cmd_ingest(ctx: &Context, file: &Path) -> Result<(), AppError> {
    info!("Ingesting from {:?}", file);

    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_INGEST_FILE_SIZE)?;

    let reader = BufReader::new(File::open(&validated_path)?);
    let records = Ingestor::read_records(reader).collect::<Result<Vec<_>, _>>()?;

    let store = ctx.open_store()?;
    let mut graph = ctx.load_or_create(&store)?;
    let report = Ingestor::ingest_batch(&mut graph, &records)?;
    ctx.save(&store, &ctx.graph, &graph)?;

    info!(
        nodes_new = report.nodes_new,
        edges_new = report.edges_new,
        rejected = report.rejected,
        "ingest complete"
    );
    ctx.emit(&report, || {
        println!(
            "Ingested {} records: {} new nodes, {} new edges, {} duplicates, {} rejected",
            records.len(),
            report.nodes_new,
            report.edges_new,
            report.duplicates,
            report.rejected
        );
        println!(
            "Graph now has {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
    });
    Ok(())
}

/// Merge the nodes owning `records`.
pub fn cmd_merge(ctx: &Context, records: &[String]) -> Result<(), AppError> {
    let ids: Vec<RecordId> = records.iter().map(|r| RecordId::new(r.as_str())).collect();

    let store = ctx.open_store()?;
    let mut graph = ctx.load(&store, &ctx.graph)?;
    let (merged, changes) = track(&mut graph, |session| session.merge_records(&ids))?;
    ctx.save(&store, &ctx.graph, &graph)?;

    let parts = graph.node(&merged).map_or(0, |n| n.parts.len());
    ctx.emit(
        &serde_json::json!({ "canonical_id": merged, "parts": parts, "changes": changes }),
        || {
            println!("Merged into {merged} ({parts} records)");
            print_changes(&changes);
        },
    );
    Ok(())
}

/// Merge nodes sharing a value of any of `props`.
pub fn cmd_dedupe(ctx: &Context, props: &[String]) -> Result<(), AppError> {
    let names: Vec<&str> = props.iter().map(String::as_str).collect();

    let store = ctx.open_store()?;
    let mut graph = ctx.load(&store, &ctx.graph)?;
    let (report, changes) = track(&mut graph, |session| merge_on_properties(session, &names))?;
    if !changes.is_empty() {
        ctx.save(&store, &ctx.graph, &graph)?;
    }

    ctx.emit(
        &serde_json::json!({ "report": report, "changes": changes }),
        || {
            println!(
                "Dedupe on {}: {} merged nodes, {} keys skipped",
                names.join(", "),
                report.merged.len(),
                report.skipped.len()
            );
            for key in &report.skipped {
                println!("  skipped {key}");
            }
            print_changes(&changes);
        },
    );
    Ok(())
}

// =============================================================================
// TAGS
// =============================================================================

/// Inspect and change tags.
pub fn cmd_tag(ctx: &Context, action: TagAction) -> Result<(), AppError> {
    let store = ctx.open_store()?;
    let mut graph = ctx.load(&store, &ctx.graph)?;

    match action {
        TagAction::Ensure { name, value } => {
            let added = graph.ensure_tag(&name, value);
            ctx.save(&store, &ctx.graph, &graph)?;
            ctx.emit(&serde_json::json!({ "tag": name, "added": added }), || {
                println!("Tagged {added} records with {name}={value}");
            });
        }
        TagAction::Set {
            record,
            name,
            value,
        } => {
            graph.set_tag(&RecordId::new(record.as_str()), &name, value)?;
            ctx.save(&store, &ctx.graph, &graph)?;
            ctx.emit(&serde_json::json!({ "record": record, "tag": name, "value": value }), || {
                println!("{record}: {name}={value}");
            });
        }
        TagAction::Clear { record, name } => {
            let existed = graph.clear_tag(&RecordId::new(record.as_str()), &name)?;
            if existed {
                ctx.save(&store, &ctx.graph, &graph)?;
            }
            ctx.emit(&serde_json::json!({ "record": record, "tag": name, "cleared": existed }), || {
                if existed {
                    println!("{record}: {name} cleared");
                } else {
                    println!("{record}: {name} was not set");
                }
            });
        }
        TagAction::List { filter, nodes } => {
            let filter: TagFilter = filter.parse()?;
            if nodes {
                let found: Vec<&CanonicalId> = graph.nodes(&filter).map(|n| &n.id).collect();
                ctx.emit(&found, || {
                    for id in &found {
                        println!("{id}");
                    }
                    println!("{} nodes match {filter}", found.len());
                });
            } else {
                let found: Vec<(&CanonicalId, &RecordId)> =
                    graph.parts(&filter).map(|(c, p)| (c, p.id())).collect();
                ctx.emit(&found, || {
                    for (canonical, record) in &found {
                        println!("{record}\t{canonical}");
                    }
                    println!("{} records match {filter}", found.len());
                });
            }
        }
    }
    Ok(())
}

// =============================================================================
// DESCRIBE
// =============================================================================

/// Show one canonical node, looked up by canonical id first, then record id.
pub fn cmd_describe(ctx: &Context, id: &str) -> Result<(), AppError> {
    let store = ctx.open_store()?;
    let graph = ctx.load(&store, &ctx.graph)?;

    let canonical = CanonicalId::new(id);
    let canonical = if graph.node(&canonical).is_some() {
        canonical
    } else {
        graph.canonical_id_of(&RecordId::new(id))?.clone()
    };
    let description = graph.describe(&canonical)?;

    ctx.emit(&description, || {
        let kind = if description.is_link { "link" } else { "node" };
        println!("{kind} {}", description.id);
        println!("Parts:");
        for part in &description.parts {
            let pending = if part.pending { " (pending)" } else { "" };
            println!("  {} [{}]{pending}", part.id(), part.record.schema());
            for (name, values) in &part.record.core().properties {
                println!("    {name}: {}", values.join(" | "));
            }
        }
        if !description.tags.is_empty() {
            println!("Tags:");
            for (name, value) in &description.tags {
                println!("  {name}={value}");
            }
        }
        println!("In edges:  {}", description.in_edges.len());
        for edge in &description.in_edges {
            println!("  {} -[{}]-> {}", edge.source, edge.key, edge.target);
        }
        println!("Out edges: {}", description.out_edges.len());
        for edge in &description.out_edges {
            println!("  {} -[{}]-> {}", edge.source, edge.key, edge.target);
        }
    });
    Ok(())
}

// =============================================================================
// ALGEBRA
// =============================================================================

/// Intersect stored graphs into `into`.
pub fn cmd_intersect(ctx: &Context, names: &[String], into: &str) -> Result<(), AppError> {
    let store = ctx.open_store()?;
    let graphs = names
        .iter()
        .map(|name| ctx.load(&store, name))
        .collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&CanonicalGraph> = graphs.iter().collect();

    let result = GraphAlgebra::intersect(&refs)?;
    ctx.save(&store, into, &result)?;

    let stats = result.stats();
    ctx.emit(&serde_json::json!({ "into": into, "stats": stats }), || {
        println!(
            "Intersected {} graphs into '{into}': {} records, {} nodes, {} edges",
            names.len(),
            stats.records,
            stats.nodes,
            stats.edges
        );
    });
    Ok(())
}

fn bounds(min: Option<usize>, max: Option<usize>) -> Result<(Bound<usize>, Bound<usize>), AppError> {
    if let (Some(lo), Some(hi)) = (min, max)
        && lo > hi
    {
        return Err(AppError::InvalidArgument(format!(
            "--min {lo} is greater than --max {hi}"
        )));
    }
    Ok((
        min.map_or(Bound::Unbounded, Bound::Included),
        max.map_or(Bound::Unbounded, Bound::Included),
    ))
}

/// Apply a topology filter to the working graph and store the result.
pub fn cmd_filter(ctx: &Context, filter: FilterKind) -> Result<(), AppError> {
    let store = ctx.open_store()?;
    let graph = ctx.load(&store, &ctx.graph)?;

    let (result, into) = match filter {
        FilterKind::Degree { min, max, into } => {
            (GraphAlgebra::filter_by_degree(&graph, bounds(min, max)?)?, into)
        }
        FilterKind::Kcore { k, into } => (GraphAlgebra::filter_k_core(&graph, k)?, into),
        FilterKind::Component { min, max, into } => (
            GraphAlgebra::filter_component_size(&graph, bounds(min, max)?)?,
            into,
        ),
    };
    ctx.save(&store, &into, &result)?;

    let stats = result.stats();
    ctx.emit(&serde_json::json!({ "into": into, "stats": stats }), || {
        println!(
            "Kept {} of {} nodes ({} edges) in '{into}'",
            stats.nodes,
            graph.node_count(),
            stats.edges
        );
    });
    Ok(())
}

// =============================================================================
// ENRICH
// =============================================================================

/// Resolve placeholders by fetching their records concurrently.
pub async fn cmd_enrich(
    ctx: &Context,
    source_dir: Option<PathBuf>,
    concurrency: Option<usize>,
) -> Result<(), AppError> {
    let dir = source_dir
        .or_else(|| ctx.config.enrich.source_dir.clone())
        .ok_or_else(|| {
            AppError::InvalidArgument(
                "no record source: pass --source or set enrich.source_dir".to_string(),
            )
        })?;
    if !dir.is_dir() {
        return Err(AppError::Io(format!(
            "Record source '{}' is not a directory",
            dir.display()
        )));
    }
    let concurrency = concurrency
        .unwrap_or(ctx.config.enrich.concurrency)
        .clamp(1, MAX_ENRICH_CONCURRENCY);

    let store = ctx.open_store()?;
    let mut graph = ctx.load(&store, &ctx.graph)?;
    let pending = graph.pending_stubs();
    if pending.is_empty() {
        ctx.emit(&serde_json::json!({ "requested": 0 }), || {
            println!("No placeholders to resolve");
        });
        return Ok(());
    }

    info!(pending = pending.len(), concurrency, "resolving placeholders");
    let results = DirectorySource::new(dir, concurrency).fetch_all(pending).await?;
    let (report, changes) = source::apply(&mut graph, &results)?;
    if !changes.is_empty() {
        ctx.save(&store, &ctx.graph, &graph)?;
    }

    ctx.emit(
        &serde_json::json!({ "report": report, "changes": changes }),
        || {
            println!(
                "Enriched {} of {} placeholders ({} missing, {} failed, {} rejected)",
                report.applied, report.requested, report.missing, report.failed, report.rejected
            );
            print_changes(&changes);
        },
    );
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Export the working graph.
pub fn cmd_export(ctx: &Context, output: &Path, format: DumpFormat) -> Result<(), AppError> {
    let validated_output = validate_output_path(output)?;

    let store = ctx.open_store()?;
    let graph = ctx.load(&store, &ctx.graph)?;

    let written = match format {
        DumpFormat::Lines => {
            let mut writer = BufWriter::new(File::create(&validated_output)?);
            let lines = write_lines(&graph, &mut writer)?;
            writer.flush()?;
            lines
        }
        DumpFormat::Binary => {
            let data = graph_to_bytes(&graph)?;
            std::fs::write(&validated_output, &data)?;
            data.len()
        }
    };

    let unit = match format {
        DumpFormat::Lines => "lines",
        DumpFormat::Binary => "bytes",
    };
    ctx.emit(
        &serde_json::json!({ "output": validated_output, "written": written, "unit": unit }),
        || println!("Exported {written} {unit} to {:?}", validated_output),
    );
    Ok(())
}

/// Import a dump as the working graph.
pub fn cmd_import(
    ctx: &Context,
    input: &Path,
    format: DumpFormat,
    force: bool,
) -> Result<(), AppError> {
    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;

    let store = ctx.open_store()?;
    if store.contains(&ctx.graph)? && !force {
        return Err(AppError::GraphExists(ctx.graph.clone()));
    }

    let model = ctx.config.model()?;
    let config = ctx.config.graph.clone();
    let graph = match format {
        DumpFormat::Lines => {
            read_lines(BufReader::new(File::open(&validated_path)?), model, config)?
        }
        DumpFormat::Binary => {
            let data = std::fs::read(&validated_path)?;
            graph_from_bytes(&data, model, config)?
        }
    };
    ctx.save(&store, &ctx.graph, &graph)?;

    let stats = graph.stats();
    ctx.emit(&serde_json::json!({ "graph": ctx.graph, "stats": stats }), || {
        println!(
            "Imported graph '{}': {} records, {} nodes, {} edges",
            ctx.graph, stats.records, stats.nodes, stats.edges
        );
    });
    Ok(())
}
