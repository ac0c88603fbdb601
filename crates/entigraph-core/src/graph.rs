//! # Canonical Graph
//!
//! The in-memory entity graph: a directed multigraph whose nodes are merge
//! groups of plain records and whose edges are keyed by merge groups of
//! edge records.
//!
//! This module implements the `EntityGraph` trait.
//! All data structures use `BTreeMap`/`BTreeSet` for deterministic ordering.
//!
//! ## Invariants
//!
//! - Every canonical edge's endpoints are live plain groups and its key is a
//!   live link group
//! - No two edges share the same (source, target, key) triple
//! - Every record id maps to exactly one live group

use crate::merge::Merger;
use crate::primitives::STUB_SCHEMA;
use crate::schema::{SchemaModel, TypeModel};
use crate::store::RecordStore;
use crate::tags::TagFilter;
use crate::{
    CanonicalEdge, CanonicalId, CanonicalNode, EdgeRecord, GraphError, Part, Record, RecordCore,
    RecordId, Tags,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// What to do when an edge references a record the graph has not seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StubPolicy {
    /// Insert a pending placeholder and fill it when the real record arrives.
    #[default]
    CreateStub,
    /// Refuse the edge with `DanglingEndpoint`.
    Reject,
}

/// Per-graph behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Unresolved reference handling.
    pub stub_policy: StubPolicy,
    /// Schema given to placeholders.
    pub stub_schema: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            stub_policy: StubPolicy::default(),
            stub_schema: STUB_SCHEMA.to_string(),
        }
    }
}

// =============================================================================
// ENTITYGRAPH TRAIT
// =============================================================================

/// The mutation interface shared by the graph and anything wrapping it.
///
/// Every graph-changing operation goes through this trait so wrappers such as
/// [`crate::ChangeTracker`] can observe it. Reads go through [`Self::graph`].
pub trait EntityGraph {
    /// Read-only view of the underlying graph.
    fn graph(&self) -> &CanonicalGraph;

    /// Add a plain record. Returns its canonical id and whether anything new
    /// was stored (a new record, or a placeholder filled with real data).
    fn add_node(&mut self, record: RecordCore) -> Result<(CanonicalId, bool), GraphError>;

    /// Add an edge record and connect every (source, target) pair it names.
    /// Returns `false` if the record was already present.
    fn add_edge(&mut self, record: EdgeRecord) -> Result<bool, GraphError>;

    /// Merge two groups into one. Returns the resulting canonical id.
    fn merge_nodes(
        &mut self,
        left: &CanonicalId,
        right: &CanonicalId,
    ) -> Result<CanonicalId, GraphError>;

    /// Give every part that lacks `name` the default value.
    fn ensure_tag(&mut self, name: &str, default: bool) -> usize;

    /// Set a tag on one record's part.
    fn set_tag(&mut self, record: &RecordId, name: &str, value: bool) -> Result<(), GraphError>;

    /// Add either kind of record.
    fn add_record(&mut self, record: Record) -> Result<(CanonicalId, bool), GraphError> {
        match record {
            Record::Plain(core) => self.add_node(core),
            Record::Edge(edge) => {
                let id = edge.core.id.clone();
                let is_new = self.add_edge(edge)?;
                let canonical = self.graph().canonical_id_of(&id)?.clone();
                Ok((canonical, is_new))
            }
        }
    }

    /// Merge the groups currently owning each record, in order.
    ///
    /// Each id is resolved right before its merge, so earlier merges in the
    /// same call are always taken into account.
    fn merge_records(&mut self, ids: &[RecordId]) -> Result<CanonicalId, GraphError> {
        let (first, rest) = ids
            .split_first()
            .ok_or_else(|| GraphError::InvalidRecord("nothing to merge".to_string()))?;
        let mut merged = self.graph().canonical_id_of(first)?.clone();
        for id in rest {
            let current = self.graph().canonical_id_of(id)?.clone();
            merged = self.merge_nodes(&merged, &current)?;
        }
        Ok(merged)
    }

    /// Fold a list of groups into one.
    fn merge_many(&mut self, ids: &[CanonicalId]) -> Result<CanonicalId, GraphError> {
        let representatives = ids
            .iter()
            .map(|id| {
                self.graph()
                    .node(id)
                    .and_then(|n| n.parts.first())
                    .map(|p| p.id().clone())
                    .ok_or_else(|| GraphError::NodeNotFound(id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.merge_records(&representatives)
    }
}

// =============================================================================
// VIEWS
// =============================================================================

/// Everything known about one canonical node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeDescription {
    /// Canonical id.
    pub id: CanonicalId,
    /// True for link groups.
    pub is_link: bool,
    /// Constituents with their own tags.
    pub parts: Vec<Part>,
    /// AND-reduced node-level tags.
    pub tags: Tags,
    /// Incoming edges (outgoing edges for links: the edges they key).
    pub in_edges: Vec<CanonicalEdge>,
    /// Outgoing edges.
    pub out_edges: Vec<CanonicalEdge>,
}

/// Graph-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Stored raw records, placeholders included.
    pub records: usize,
    /// Plain canonical nodes.
    pub nodes: usize,
    /// Link groups.
    pub links: usize,
    /// Canonical edges.
    pub edges: usize,
    /// Groups holding more than one record.
    pub merged: usize,
    /// Placeholders still awaiting their record.
    pub pending: usize,
}

// =============================================================================
// GRAPH IMPLEMENTATION
// =============================================================================

/// The canonical entity graph.
///
/// Uses `BTreeMap` exclusively for deterministic ordering.
#[derive(Clone)]
pub struct CanonicalGraph {
    /// Records, groups and the record -> group lookup.
    store: RecordStore,
    /// All edges.
    edges: BTreeSet<CanonicalEdge>,
    /// source -> edges leaving it
    outgoing: BTreeMap<CanonicalId, BTreeSet<CanonicalEdge>>,
    /// target -> edges entering it
    incoming: BTreeMap<CanonicalId, BTreeSet<CanonicalEdge>>,
    /// link key -> edges it keys
    keyed: BTreeMap<CanonicalId, BTreeSet<CanonicalEdge>>,
    /// endpoint id not stored -> edge records naming it
    waiting: BTreeMap<RecordId, BTreeSet<RecordId>>,
    /// Type hierarchy consulted for merges and edge classification.
    model: Arc<dyn TypeModel>,
    config: GraphConfig,
}

impl fmt::Debug for CanonicalGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalGraph")
            .field("records", &self.store.record_count())
            .field("groups", &self.store.group_count())
            .field("edges", &self.edges.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for CanonicalGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CanonicalGraph {
    /// Create an empty graph over the builtin schema model.
    #[must_use]
    pub fn new() -> Self {
        Self::with_model(Arc::new(SchemaModel::builtin()), GraphConfig::default())
    }

    /// Create an empty graph over a caller-supplied type model.
    #[must_use]
    pub fn with_model(model: Arc<dyn TypeModel>, config: GraphConfig) -> Self {
        Self {
            store: RecordStore::new(),
            edges: BTreeSet::new(),
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
            keyed: BTreeMap::new(),
            waiting: BTreeMap::new(),
            model,
            config,
        }
    }

    /// An empty graph sharing this graph's model and configuration.
    #[must_use]
    pub fn empty_like(&self) -> Self {
        Self::with_model(Arc::clone(&self.model), self.config.clone())
    }

    /// Rebuild a graph from complete merge groups.
    ///
    /// The lookup table is derived from group membership and edges are
    /// re-derived from the link groups' records. Endpoints that do not
    /// resolve to a live group are skipped.
    pub fn from_groups(
        groups: impl IntoIterator<Item = CanonicalNode>,
        model: Arc<dyn TypeModel>,
        config: GraphConfig,
    ) -> Result<Self, GraphError> {
        let mut graph = Self::with_model(model, config);
        graph.store = RecordStore::from_groups(groups)?;
        graph.rebuild_edges();
        Ok(graph)
    }

    /// A new graph over the same model and configuration holding `groups`.
    pub fn with_groups(
        &self,
        groups: impl IntoIterator<Item = CanonicalNode>,
    ) -> Result<Self, GraphError> {
        Self::from_groups(groups, Arc::clone(&self.model), self.config.clone())
    }

    /// The type model.
    #[must_use]
    pub fn model(&self) -> &dyn TypeModel {
        self.model.as_ref()
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// The underlying record store.
    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// True if the record id is stored.
    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.store.contains(id)
    }

    /// Current canonical id of a record.
    pub fn canonical_id_of(&self, id: &RecordId) -> Result<&CanonicalId, GraphError> {
        self.store.canonical_id_of(id)
    }

    /// A live group by canonical id.
    #[must_use]
    pub fn node(&self, id: &CanonicalId) -> Option<&CanonicalNode> {
        self.store.group(id)
    }

    /// The group owning a record.
    pub fn node_of(&self, id: &RecordId) -> Result<&CanonicalNode, GraphError> {
        self.store.group_of(id)
    }

    /// Plain nodes whose every part satisfies the filter.
    pub fn nodes<'a>(
        &'a self,
        filter: &'a TagFilter,
    ) -> impl Iterator<Item = &'a CanonicalNode> + 'a {
        self.store
            .groups()
            .filter(move |n| !n.is_link() && filter.matches_node(n))
    }

    /// Link groups.
    pub fn links(&self) -> impl Iterator<Item = &CanonicalNode> + '_ {
        self.store.groups().filter(|n| n.is_link())
    }

    /// All canonical edges in (source, target, key) order.
    pub fn edges(&self) -> impl Iterator<Item = &CanonicalEdge> + '_ {
        self.edges.iter()
    }

    /// Edges paired with the link group whose records they represent.
    pub fn edges_with_records(
        &self,
    ) -> impl Iterator<Item = (&CanonicalEdge, &CanonicalNode)> + '_ {
        self.edges
            .iter()
            .filter_map(|e| self.store.group(&e.key).map(|link| (e, link)))
    }

    /// Edges leaving a node.
    pub fn out_edges<'a>(&'a self, id: &CanonicalId) -> impl Iterator<Item = &'a CanonicalEdge> + 'a {
        self.outgoing.get(id).into_iter().flatten()
    }

    /// Edges entering a node.
    pub fn in_edges<'a>(&'a self, id: &CanonicalId) -> impl Iterator<Item = &'a CanonicalEdge> + 'a {
        self.incoming.get(id).into_iter().flatten()
    }

    /// Edges keyed by a link group.
    pub fn keyed_edges<'a>(
        &'a self,
        key: &CanonicalId,
    ) -> impl Iterator<Item = &'a CanonicalEdge> + 'a {
        self.keyed.get(key).into_iter().flatten()
    }

    /// In-degree plus out-degree; a self-loop counts twice.
    #[must_use]
    pub fn degree(&self, id: &CanonicalId) -> usize {
        self.outgoing.get(id).map_or(0, BTreeSet::len) + self.incoming.get(id).map_or(0, BTreeSet::len)
    }

    /// Number of plain nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.store.groups().filter(|n| !n.is_link()).count()
    }

    /// Number of canonical edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of stored records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.store.record_count()
    }

    /// Record ids of placeholders still awaiting their real record.
    #[must_use]
    pub fn pending_stubs(&self) -> Vec<RecordId> {
        self.store
            .groups()
            .flat_map(|n| n.parts.iter())
            .filter(|p| p.pending)
            .map(|p| p.id().clone())
            .collect()
    }

    /// Full description of one node.
    pub fn describe(&self, id: &CanonicalId) -> Result<NodeDescription, GraphError> {
        let node = self
            .node(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        let (in_edges, out_edges) = if node.is_link() {
            (Vec::new(), self.keyed_edges(id).cloned().collect())
        } else {
            (
                self.in_edges(id).cloned().collect(),
                self.out_edges(id).cloned().collect(),
            )
        };
        Ok(NodeDescription {
            id: node.id.clone(),
            is_link: node.is_link(),
            parts: node.parts.clone(),
            tags: node.tags(),
            in_edges,
            out_edges,
        })
    }

    /// Graph-wide counters.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            records: self.store.record_count(),
            edges: self.edges.len(),
            ..GraphStats::default()
        };
        for group in self.store.groups() {
            if group.is_link() {
                stats.links += 1;
            } else {
                stats.nodes += 1;
            }
            if group.parts.len() > 1 {
                stats.merged += 1;
            }
            stats.pending += group.parts.iter().filter(|p| p.pending).count();
        }
        stats
    }

    // -------------------------------------------------------------------------
    // Record insertion
    // -------------------------------------------------------------------------

    /// Insert a placeholder for a referenced record unless it already exists.
    pub fn add_stub(&mut self, id: &RecordId) -> Result<CanonicalId, GraphError> {
        if let Ok(existing) = self.store.canonical_id_of(id) {
            return Ok(existing.clone());
        }
        let stub = RecordCore::new(id.as_str(), self.config.stub_schema.as_str());
        let (canonical, _) = self.store.put_part(Part::stub(Record::Plain(stub)))?;
        trace!(record = %id, "created placeholder");
        self.connect_waiting(id);
        Ok(canonical)
    }

    fn insert_plain(&mut self, record: RecordCore) -> Result<(CanonicalId, bool), GraphError> {
        if record.id.as_str().is_empty() {
            return Err(GraphError::InvalidRecord("empty record id".to_string()));
        }
        let Ok(canonical) = self.store.canonical_id_of(&record.id).cloned() else {
            let id = record.id.clone();
            let stored = self.store.put(Record::Plain(record))?;
            self.connect_waiting(&id);
            return Ok(stored);
        };

        let group = self
            .store
            .group(&canonical)
            .ok_or_else(|| GraphError::NodeNotFound(canonical.clone()))?;
        if group.is_link() {
            return Err(GraphError::InvalidRecord(format!(
                "{} is already stored as an edge record",
                record.id
            )));
        }
        let pending = group.part(&record.id).is_some_and(|p| p.pending);
        if pending {
            // The filled record must still fit the rest of its group.
            if let Some(other) = group
                .parts
                .iter()
                .filter(|p| !p.pending)
                .find(|p| !self.model.compatible(p.record.schema(), &record.schema))
            {
                return Err(GraphError::IncompatibleMerge {
                    left: canonical.clone(),
                    right: CanonicalId::from(&record.id),
                    reason: format!(
                        "schema {} does not fit {} of {}",
                        record.schema,
                        other.record.schema(),
                        other.id()
                    ),
                });
            }
        }

        let id = record.id.clone();
        let part = self
            .store
            .part_mut(&id)
            .ok_or_else(|| GraphError::NotFound(id.clone()))?;
        if pending {
            part.record = Record::Plain(record);
            part.pending = false;
            debug!(record = %id, canonical = %canonical, "filled placeholder");
            Ok((canonical, true))
        } else {
            if part.record.core_mut().fill_from(&record) {
                trace!(record = %id, "added property values to existing record");
            }
            Ok((canonical, false))
        }
    }

    fn insert_edge(&mut self, record: EdgeRecord) -> Result<bool, GraphError> {
        let id = record.core.id.clone();
        if id.as_str().is_empty() {
            return Err(GraphError::InvalidRecord("empty record id".to_string()));
        }
        self.check_endpoints(&record)?;

        let (canonical, is_new) = match self.store.canonical_id_of(&id).cloned() {
            Ok(canonical) => {
                let part = self
                    .store
                    .part_mut(&id)
                    .ok_or_else(|| GraphError::NotFound(id.clone()))?;
                match &mut part.record {
                    Record::Edge(existing) => {
                        existing.core.fill_from(&record.core);
                    }
                    Record::Plain(_) => {
                        return Err(GraphError::InvalidRecord(format!(
                            "{id} is already stored as a plain record"
                        )));
                    }
                }
                (canonical, false)
            }
            Err(_) => {
                let (canonical, _) = self.store.put(Record::Edge(record.clone()))?;
                (canonical, true)
            }
        };

        for endpoint in record.endpoints() {
            if !self.store.contains(&endpoint) {
                self.add_stub(&endpoint)?;
            }
        }
        let linked = self.connect(&canonical, &record);
        trace!(record = %id, edges = linked, "connected edge record");
        Ok(is_new)
    }

    /// Check endpoints before any mutation happens.
    fn check_endpoints(&self, record: &EdgeRecord) -> Result<(), GraphError> {
        for endpoint in record.endpoints() {
            if endpoint == record.core.id {
                return Err(GraphError::InvalidRecord(format!(
                    "edge {endpoint} references itself"
                )));
            }
            match self.store.group_of(&endpoint) {
                Ok(group) if group.is_link() => {
                    return Err(GraphError::InvalidRecord(format!(
                        "edge {} points at edge record {endpoint}",
                        record.core.id
                    )));
                }
                Ok(_) => {}
                Err(_) if self.config.stub_policy == StubPolicy::Reject => {
                    return Err(GraphError::DanglingEndpoint {
                        edge: record.core.id.clone(),
                        endpoint,
                    });
                }
                Err(_) => {}
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Edge bookkeeping
    // -------------------------------------------------------------------------

    /// Edges an edge record produces under the current lookup table.
    fn resolve_edges(&self, key: &CanonicalId, record: &EdgeRecord) -> Vec<CanonicalEdge> {
        record
            .endpoint_pairs()
            .into_iter()
            .filter_map(|(source, target)| {
                let source = self.store.canonical_id_of(&source).ok()?;
                let target = self.store.canonical_id_of(&target).ok()?;
                Some(CanonicalEdge::new(source.clone(), target.clone(), key.clone()))
            })
            .collect()
    }

    /// Insert every resolvable edge of a record. Returns how many were new.
    fn connect(&mut self, key: &CanonicalId, record: &EdgeRecord) -> usize {
        self.resolve_edges(key, record)
            .into_iter()
            .filter(|edge| self.link(edge.clone()))
            .count()
    }

    /// Connect edge records that named `id` before it was stored.
    fn connect_waiting(&mut self, id: &RecordId) {
        let Some(edge_ids) = self.waiting.remove(id) else {
            return;
        };
        for edge_id in edge_ids {
            let Ok(group) = self.store.group_of(&edge_id) else {
                continue;
            };
            let key = group.id.clone();
            let Some(record) = group.part(&edge_id).and_then(|p| p.record.as_edge()).cloned()
            else {
                continue;
            };
            let linked = self.connect(&key, &record);
            trace!(record = %edge_id, endpoint = %id, edges = linked, "connected waiting edge record");
        }
    }

    /// Re-derive all edges from the stored link records.
    ///
    /// Endpoints that are not stored are remembered, so the edges they take
    /// part in appear as soon as the record (or a placeholder) is added.
    fn rebuild_edges(&mut self) {
        let mut work = Vec::new();
        let mut waiting: BTreeMap<RecordId, BTreeSet<RecordId>> = BTreeMap::new();
        for link in self.links() {
            for edge in link.parts.iter().filter_map(|p| p.record.as_edge()) {
                for endpoint in edge.endpoints() {
                    if !self.store.contains(&endpoint) {
                        waiting
                            .entry(endpoint)
                            .or_default()
                            .insert(edge.core.id.clone());
                    }
                }
                work.extend(self.resolve_edges(&link.id, edge));
            }
        }
        self.waiting = waiting;
        for edge in work {
            self.link(edge);
        }
    }

    /// Insert one edge into every index. Returns `false` for a duplicate triple.
    pub(crate) fn link(&mut self, edge: CanonicalEdge) -> bool {
        if !self.edges.insert(edge.clone()) {
            return false;
        }
        self.outgoing
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.clone());
        self.incoming
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.clone());
        self.keyed.entry(edge.key.clone()).or_default().insert(edge);
        true
    }

    fn unlink(&mut self, edge: &CanonicalEdge) {
        self.edges.remove(edge);
        for (index, id) in [
            (&mut self.outgoing, &edge.source),
            (&mut self.incoming, &edge.target),
            (&mut self.keyed, &edge.key),
        ] {
            if let Some(set) = index.get_mut(id) {
                set.remove(edge);
                if set.is_empty() {
                    index.remove(id);
                }
            }
        }
    }

    /// Delete a group together with every edge touching or keyed by it.
    ///
    /// Only used as the last step of a merge: the lookup entries of the
    /// removed parts are left for the merge to repoint.
    pub(crate) fn remove_node(
        &mut self,
        id: &CanonicalId,
    ) -> Option<(CanonicalNode, BTreeSet<CanonicalEdge>)> {
        let group = self.store.remove_group(id)?;
        let mut detached = BTreeSet::new();
        for index in [&self.outgoing, &self.incoming, &self.keyed] {
            if let Some(set) = index.get(id) {
                detached.extend(set.iter().cloned());
            }
        }
        for edge in &detached {
            self.unlink(edge);
        }
        Some((group, detached))
    }

    /// Set a tag on every part of a group.
    pub fn set_node_tag(
        &mut self,
        id: &CanonicalId,
        name: &str,
        value: bool,
    ) -> Result<(), GraphError> {
        let group = self
            .store
            .group_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))?;
        for part in &mut group.parts {
            part.tags.insert(name.to_string(), value);
        }
        Ok(())
    }
}

impl EntityGraph for CanonicalGraph {
    fn graph(&self) -> &CanonicalGraph {
        self
    }

    fn add_node(&mut self, record: RecordCore) -> Result<(CanonicalId, bool), GraphError> {
        self.insert_plain(record)
    }

    fn add_edge(&mut self, record: EdgeRecord) -> Result<bool, GraphError> {
        self.insert_edge(record)
    }

    fn merge_nodes(
        &mut self,
        left: &CanonicalId,
        right: &CanonicalId,
    ) -> Result<CanonicalId, GraphError> {
        Merger::merge_nodes(self, left, right)
    }

    fn ensure_tag(&mut self, name: &str, default: bool) -> usize {
        let mut set = 0;
        for group in self.store.groups_mut() {
            for part in &mut group.parts {
                if !part.tags.contains_key(name) {
                    part.tags.insert(name.to_string(), default);
                    set += 1;
                }
            }
        }
        set
    }

    fn set_tag(&mut self, record: &RecordId, name: &str, value: bool) -> Result<(), GraphError> {
        let part = self
            .store
            .part_mut(record)
            .ok_or_else(|| GraphError::NotFound(record.clone()))?;
        part.tags.insert(name.to_string(), value);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: &str) -> RecordCore {
        RecordCore::new(id, "Person")
    }

    fn link(id: &str, subject: &str, object: &str) -> EdgeRecord {
        let core = RecordCore::new(id, "UnknownLink")
            .with_property("subject", subject)
            .with_property("object", object);
        EdgeRecord::new(core, "subject", "object")
    }

    #[test]
    fn add_node_reports_new_then_existing() {
        let mut graph = CanonicalGraph::new();
        let (id, is_new) = graph.add_node(person("a")).expect("add");
        assert!(is_new);
        assert_eq!(id.as_str(), "a");

        let (again, is_new) = graph.add_node(person("a")).expect("add");
        assert!(!is_new);
        assert_eq!(again, id);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn add_edge_connects_known_endpoints() {
        let mut graph = CanonicalGraph::new();
        graph.add_node(person("a")).expect("a");
        graph.add_node(person("b")).expect("b");

        assert!(graph.add_edge(link("e", "a", "b")).expect("edge"));
        assert!(!graph.add_edge(link("e", "a", "b")).expect("edge again"));

        assert_eq!(graph.edge_count(), 1);
        let edge = graph.edges().next().expect("one edge");
        assert_eq!(edge.source.as_str(), "a");
        assert_eq!(edge.target.as_str(), "b");
        assert_eq!(edge.key.as_str(), "e");
        assert_eq!(graph.degree(&CanonicalId::from("a")), 1);
    }

    #[test]
    fn missing_endpoint_creates_placeholder() {
        let mut graph = CanonicalGraph::new();
        graph.add_node(person("a")).expect("a");
        graph.add_edge(link("e", "a", "ghost")).expect("edge");

        assert_eq!(graph.pending_stubs(), vec![RecordId::from("ghost")]);
        let stub = graph.node_of(&RecordId::from("ghost")).expect("stub");
        assert_eq!(stub.parts[0].record.schema(), STUB_SCHEMA);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn placeholder_is_filled_by_real_record() {
        let mut graph = CanonicalGraph::new();
        graph.add_edge(link("e", "a", "b")).expect("edge");
        let (_, is_new) = graph
            .add_node(person("b").with_property("name", "Bob"))
            .expect("fill");

        assert!(is_new);
        assert_eq!(graph.pending_stubs(), vec![RecordId::from("a")]);
        let b = graph.node_of(&RecordId::from("b")).expect("b");
        assert_eq!(b.parts[0].record.schema(), "Person");
        assert_eq!(b.parts[0].record.core().values("name"), ["Bob"]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn reject_policy_refuses_dangling_edge() {
        let config = GraphConfig {
            stub_policy: StubPolicy::Reject,
            ..GraphConfig::default()
        };
        let mut graph = CanonicalGraph::with_model(Arc::new(SchemaModel::builtin()), config);
        graph.add_node(person("a")).expect("a");

        let err = graph.add_edge(link("e", "a", "ghost"));
        assert!(matches!(err, Err(GraphError::DanglingEndpoint { .. })));
        assert!(!graph.contains(&RecordId::from("e")));
        assert_eq!(graph.record_count(), 1);
    }

    #[test]
    fn edge_id_cannot_be_reused_as_plain() {
        let mut graph = CanonicalGraph::new();
        graph.add_edge(link("e", "a", "b")).expect("edge");
        assert!(matches!(
            graph.add_node(person("e")),
            Err(GraphError::InvalidRecord(_))
        ));
    }

    #[test]
    fn describe_lists_both_directions() {
        let mut graph = CanonicalGraph::new();
        graph.add_edge(link("e1", "a", "b")).expect("e1");
        graph.add_edge(link("e2", "c", "a")).expect("e2");

        let description = graph.describe(&CanonicalId::from("a")).expect("describe");
        assert_eq!(description.in_edges.len(), 1);
        assert_eq!(description.out_edges.len(), 1);
        assert!(!description.is_link);

        let link = graph.describe(&CanonicalId::from("e1")).expect("link");
        assert!(link.is_link);
        assert_eq!(link.out_edges.len(), 1);
    }

    #[test]
    fn stats_count_everything() {
        let mut graph = CanonicalGraph::new();
        graph.add_node(person("a")).expect("a");
        graph.add_edge(link("e", "a", "b")).expect("edge");

        let stats = graph.stats();
        assert_eq!(stats.records, 3);
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.links, 1);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.merged, 0);
    }

    #[test]
    fn from_groups_rebuilds_edges() {
        let mut graph = CanonicalGraph::new();
        graph.add_edge(link("e", "a", "b")).expect("edge");

        let groups: Vec<CanonicalNode> = graph.store().groups().cloned().collect();
        let rebuilt = CanonicalGraph::from_groups(
            groups,
            Arc::new(SchemaModel::builtin()),
            GraphConfig::default(),
        )
        .expect("rebuild");

        assert_eq!(rebuilt.edge_count(), 1);
        assert_eq!(rebuilt.record_count(), 3);
    }

    fn without(graph: &CanonicalGraph, dropped: &str) -> CanonicalGraph {
        let groups = graph
            .store()
            .groups()
            .filter(|g| g.part(&RecordId::from(dropped)).is_none())
            .cloned();
        graph.with_groups(groups).expect("regroup")
    }

    #[test]
    fn dropped_endpoint_reconnects_when_stored_again() {
        let mut graph = CanonicalGraph::new();
        graph.add_node(person("a")).expect("a");
        graph.add_node(person("b")).expect("b");
        graph.add_edge(link("e", "a", "b")).expect("edge");

        let mut partial = without(&graph, "a");
        assert_eq!(partial.edge_count(), 0);

        partial.add_node(person("a")).expect("re-add");
        assert_eq!(partial.edge_count(), 1);
        let rebuilt = partial.with_groups(partial.store().groups().cloned()).expect("rebuild");
        assert!(rebuilt.edges().eq(partial.edges()));
    }

    #[test]
    fn placeholder_for_dropped_endpoint_reconnects() {
        let mut graph = CanonicalGraph::new();
        graph.add_node(person("a")).expect("a");
        graph.add_node(person("b")).expect("b");
        graph.add_edge(link("e", "a", "b")).expect("edge");

        let mut partial = without(&graph, "a");
        partial.add_edge(link("f", "a", "b")).expect("second edge");

        assert_eq!(partial.pending_stubs(), vec![RecordId::from("a")]);
        assert_eq!(partial.edge_count(), 2);
        let a = partial.canonical_id_of(&RecordId::from("a")).expect("a").clone();
        assert_eq!(partial.out_edges(&a).count(), 2);
    }
}
