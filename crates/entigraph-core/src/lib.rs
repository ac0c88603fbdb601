//! # entigraph-core
//!
//! The canonicalization engine for entigraph.
//!
//! This crate turns overlapping, duplicate-laden entity records from many
//! sources into a deduplicated graph. Records believed to denote the same
//! real-world entity are merged into canonical nodes; every original record
//! stays addressable through a lookup table and keeps its own tags.
//!
//! ## Layers
//!
//! - `store`: records, merge groups, record -> canonical lookup
//! - `graph`: the canonical multigraph and the `EntityGraph` trait
//! - `merge`: atomic contraction of two groups, canonical id derivation
//! - `tags`: per-part boolean tags and all-parts-agree queries
//! - `tracker`: change recording over one logical operation
//! - `algebra`: intersection and topology filters producing new graphs
//!
//! ## Architectural Constraints
//!
//! - Single mutator: nothing here is internally synchronized
//! - Deterministic: `BTreeMap`/`BTreeSet` only, no randomness
//! - No async, no network: record sources live in the app layer

// =============================================================================
// MODULES
// =============================================================================

pub mod algebra;
pub mod dedupe;
pub mod formats;
pub mod graph;
pub mod ingestor;
pub mod merge;
pub mod primitives;
pub mod schema;
pub mod storage;
pub mod store;
pub mod tags;
pub mod tracker;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CanonicalEdge, CanonicalId, CanonicalNode, EdgeRecord, GraphError, Part, Properties, Record,
    RecordCore, RecordId, Tags,
};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use algebra::GraphAlgebra;
pub use dedupe::{DedupeReport, merge_on_properties};
pub use graph::{
    CanonicalGraph, EntityGraph, GraphConfig, GraphStats, NodeDescription, StubPolicy,
};
pub use ingestor::{IngestReport, Ingestor, RawRecord};
pub use merge::Merger;
pub use schema::{EdgeEndpoints, SchemaDef, SchemaModel, TypeModel};
pub use store::RecordStore;
pub use tags::{TagFilter, tag_pass};
pub use tracker::{ChangeTracker, Changes, track};

// =============================================================================
// RE-EXPORTS: Formats and Storage
// =============================================================================

pub use formats::{
    LineRecord, PersistenceHeader, SerializableGraph, graph_from_bytes, graph_to_bytes,
    read_lines, write_lines,
};
pub use storage::SnapshotStore;
