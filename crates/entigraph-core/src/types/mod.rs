//! # Core Type Definitions
//!
//! This module contains the data model of the entigraph engine:
//! - Identifiers (`RecordId`, `CanonicalId`)
//! - Raw input records (`Record`, `RecordCore`, `EdgeRecord`)
//! - Merge groups and their constituents (`CanonicalNode`, `Part`)
//! - Multigraph edges (`CanonicalEdge`)
//! - Error types (`GraphError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` (where they act as keys) for use in `BTreeMap`/`BTreeSet`
//! - Serialize without skipped fields, so postcard and JSON agree on shape

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a raw record, globally unique per source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Create a new record id.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a canonical merge group.
///
/// A group that was never merged carries the id of its only record.
/// Merged groups carry a digest of their sorted part ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(pub String);

impl CanonicalId {
    /// Create a new canonical id.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CanonicalId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<&RecordId> for CanonicalId {
    fn from(id: &RecordId) -> Self {
        Self(id.0.clone())
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// Property name -> ordered values. Values are scalars or other record ids.
pub type Properties = BTreeMap<String, Vec<String>>;

/// Per-part boolean tags.
pub type Tags = BTreeMap<String, bool>;

/// The fields every record carries regardless of kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCore {
    /// The record id.
    pub id: RecordId,
    /// Type name from the externally supplied schema hierarchy.
    pub schema: String,
    /// Property values.
    pub properties: Properties,
}

impl RecordCore {
    /// Create a record with no properties.
    #[must_use]
    pub fn new(id: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(id),
            schema: schema.into(),
            properties: Properties::new(),
        }
    }

    /// Builder-style property append.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(name, value);
        self
    }

    /// Append a value, ignoring exact duplicates.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let values = self.properties.entry(name.into()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    /// Values of a property, empty if absent.
    #[must_use]
    pub fn values(&self, name: &str) -> &[String] {
        self.properties.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fill in values from a later observation of the same record.
    ///
    /// Existing values are never removed. Returns `true` if anything was added.
    pub fn fill_from(&mut self, other: &RecordCore) -> bool {
        let mut changed = false;
        for (name, values) in &other.properties {
            let slot = self.properties.entry(name.clone()).or_default();
            for value in values {
                if !slot.contains(value) {
                    slot.push(value.clone());
                    changed = true;
                }
            }
        }
        changed
    }
}

/// An edge record: a record whose type designates a source and a target property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Shared record fields.
    pub core: RecordCore,
    /// Property holding source record ids.
    pub source_prop: String,
    /// Property holding target record ids.
    pub target_prop: String,
}

impl EdgeRecord {
    /// Create an edge record from its core and endpoint property names.
    #[must_use]
    pub fn new(
        core: RecordCore,
        source_prop: impl Into<String>,
        target_prop: impl Into<String>,
    ) -> Self {
        Self {
            core,
            source_prop: source_prop.into(),
            target_prop: target_prop.into(),
        }
    }

    /// Source record ids in property order.
    pub fn sources(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.core
            .values(&self.source_prop)
            .iter()
            .map(|s| RecordId::new(s.as_str()))
    }

    /// Target record ids in property order.
    pub fn targets(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.core
            .values(&self.target_prop)
            .iter()
            .map(|s| RecordId::new(s.as_str()))
    }

    /// Every (source, target) pair this record connects.
    pub fn endpoint_pairs(&self) -> Vec<(RecordId, RecordId)> {
        let targets: Vec<RecordId> = self.targets().collect();
        self.sources()
            .flat_map(|s| targets.iter().map(move |t| (s.clone(), t.clone())))
            .collect()
    }

    /// All endpoint ids, sources first.
    pub fn endpoints(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.sources().chain(self.targets())
    }
}

/// A unit of input data: either a plain entity or an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    /// A plain entity (person, company, document, ...).
    Plain(RecordCore),
    /// A relationship between plain entities.
    Edge(EdgeRecord),
}

impl Record {
    /// Shared record fields.
    #[must_use]
    pub fn core(&self) -> &RecordCore {
        match self {
            Self::Plain(core) => core,
            Self::Edge(edge) => &edge.core,
        }
    }

    /// Mutable shared record fields.
    pub fn core_mut(&mut self) -> &mut RecordCore {
        match self {
            Self::Plain(core) => core,
            Self::Edge(edge) => &mut edge.core,
        }
    }

    /// The record id.
    #[must_use]
    pub fn id(&self) -> &RecordId {
        &self.core().id
    }

    /// The record's type name.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.core().schema
    }

    /// True for edge records.
    #[must_use]
    pub fn is_edge(&self) -> bool {
        matches!(self, Self::Edge(_))
    }

    /// The edge view of this record, if it is one.
    #[must_use]
    pub fn as_edge(&self) -> Option<&EdgeRecord> {
        match self {
            Self::Edge(edge) => Some(edge),
            Self::Plain(_) => None,
        }
    }
}

// =============================================================================
// MERGE GROUPS
// =============================================================================

/// One constituent record of a merge group together with its own tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// The record.
    pub record: Record,
    /// Tags of this record only; merges never collapse them.
    pub tags: Tags,
    /// Placeholder created for an unresolved reference, awaiting the real record.
    pub pending: bool,
}

impl Part {
    /// Wrap a freshly observed record.
    #[must_use]
    pub fn new(record: Record) -> Self {
        Self {
            record,
            tags: Tags::new(),
            pending: false,
        }
    }

    /// Wrap a placeholder record.
    #[must_use]
    pub fn stub(record: Record) -> Self {
        Self {
            record,
            tags: Tags::new(),
            pending: true,
        }
    }

    /// The part's record id.
    #[must_use]
    pub fn id(&self) -> &RecordId {
        self.record.id()
    }
}

/// A merge group of one or more records believed to denote the same entity.
///
/// Groups of plain records are graph nodes; groups of edge records ("links")
/// key the edges between nodes. A group never mixes the two kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalNode {
    /// The group's canonical id.
    pub id: CanonicalId,
    /// Constituents in insertion order. Never empty.
    pub parts: Vec<Part>,
}

impl CanonicalNode {
    /// Create a single-part group carrying the record's own id.
    #[must_use]
    pub fn single(part: Part) -> Self {
        Self {
            id: CanonicalId::from(part.id()),
            parts: vec![part],
        }
    }

    /// True if the group is made of edge records.
    #[must_use]
    pub fn is_link(&self) -> bool {
        self.parts.first().is_some_and(|p| p.record.is_edge())
    }

    /// Ids of all constituents in insertion order.
    pub fn part_ids(&self) -> impl Iterator<Item = &RecordId> + '_ {
        self.parts.iter().map(Part::id)
    }

    /// Find a constituent by record id.
    #[must_use]
    pub fn part(&self, id: &RecordId) -> Option<&Part> {
        self.parts.iter().find(|p| p.id() == id)
    }

    /// Find a constituent by record id, mutably.
    pub fn part_mut(&mut self, id: &RecordId) -> Option<&mut Part> {
        self.parts.iter_mut().find(|p| p.id() == id)
    }

    /// Constituent records.
    pub fn records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.parts.iter().map(|p| &p.record)
    }

    /// True if any constituent is still a placeholder.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.parts.iter().any(|p| p.pending)
    }

    /// Node-level value of one tag: the AND over every part that carries it.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<bool> {
        self.parts
            .iter()
            .filter_map(|p| p.tags.get(name).copied())
            .reduce(|a, b| a && b)
    }

    /// Node-level view of all tags (AND-reduced per name).
    #[must_use]
    pub fn tags(&self) -> Tags {
        let mut reduced = Tags::new();
        for part in &self.parts {
            for (name, value) in &part.tags {
                reduced
                    .entry(name.clone())
                    .and_modify(|v| *v = *v && *value)
                    .or_insert(*value);
            }
        }
        reduced
    }
}

// =============================================================================
// EDGES
// =============================================================================

/// A directed multigraph edge between two canonical nodes.
///
/// `key` is the canonical id of the link group whose records this edge
/// represents, so parallel edges between one pair stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalEdge {
    /// Source node.
    pub source: CanonicalId,
    /// Target node.
    pub target: CanonicalId,
    /// Link group key.
    pub key: CanonicalId,
}

impl CanonicalEdge {
    /// Create a new edge.
    #[must_use]
    pub fn new(source: CanonicalId, target: CanonicalId, key: CanonicalId) -> Self {
        Self {
            source,
            target,
            key,
        }
    }

    /// True if source and target are the same node.
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the entigraph engine.
///
/// - Identity and merge errors always reach the immediate caller
/// - Batch callers may skip `IncompatibleMerge` per item
/// - The engine never panics; all errors are recoverable
#[derive(Debug, Error)]
pub enum GraphError {
    /// The record id is not present in the lookup table.
    #[error("Record not found: {0}")]
    NotFound(RecordId),

    /// The canonical id does not name a live group.
    #[error("Canonical node not found: {0}")]
    NodeNotFound(CanonicalId),

    /// An edge references a record that is not in the graph (strict policy).
    #[error("Edge {edge} references unknown record {endpoint}")]
    DanglingEndpoint {
        /// The edge record.
        edge: RecordId,
        /// The missing endpoint.
        endpoint: RecordId,
    },

    /// The two groups cannot denote the same entity.
    #[error("Cannot merge {left} with {right}: {reason}")]
    IncompatibleMerge {
        /// Left group.
        left: CanonicalId,
        /// Right group.
        right: CanonicalId,
        /// Why the merge was refused.
        reason: String,
    },

    /// A merge would produce an id already owned by an unrelated group.
    #[error("Canonical id collision: {0}")]
    CanonicalIdCollision(CanonicalId),

    /// Raw input could not be turned into a record.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The type model definition is inconsistent.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A tag filter expression could not be parsed.
    #[error("Invalid tag filter: {0}")]
    InvalidTagFilter(String),

    /// Mutation attempted through a change tracker after its changes were taken.
    #[error("Change tracking session already closed")]
    SessionClosed,

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
