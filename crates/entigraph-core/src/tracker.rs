//! # Change Tracker
//!
//! A decorator over any [`EntityGraph`] that records what one logical
//! operation changed: which records were newly added and which canonical
//! groups came out of merges.
//!
//! Only `add_node`, `add_edge` and `merge_nodes` are intercepted. Everything
//! else on the trait is forwarded untouched.
//!
//! Merge ids are reconciled as the session goes: when a group that came out
//! of an earlier merge is merged again, its old id is replaced by the new
//! one, so the final change set only names groups that are still live.

use crate::graph::{CanonicalGraph, EntityGraph};
use crate::{CanonicalId, EdgeRecord, GraphError, Record, RecordCore, RecordId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// The delta produced by one tracked session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Changes {
    /// Final canonical id -> constituent records of every merged group.
    pub merged: BTreeMap<CanonicalId, Vec<Record>>,
    /// Plain records stored for the first time (or placeholders filled).
    pub nodes_new: Vec<Record>,
    /// Edge records stored for the first time.
    pub edges_new: Vec<Record>,
}

impl Changes {
    /// True if the session changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty() && self.nodes_new.is_empty() && self.edges_new.is_empty()
    }
}

/// Records the changes made through it to a wrapped graph.
#[derive(Debug)]
pub struct ChangeTracker<'g, G: EntityGraph> {
    inner: &'g mut G,
    merged: BTreeSet<CanonicalId>,
    nodes_new: Vec<RecordId>,
    edges_new: Vec<RecordId>,
    closed: bool,
}

impl<'g, G: EntityGraph> ChangeTracker<'g, G> {
    /// Open a tracking session over `inner`.
    pub fn new(inner: &'g mut G) -> Self {
        Self {
            inner,
            merged: BTreeSet::new(),
            nodes_new: Vec::new(),
            edges_new: Vec::new(),
            closed: false,
        }
    }

    /// True once [`Self::get_changes`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Collect the session's changes and close it.
    ///
    /// Records are read from the graph at call time, so they reflect any
    /// later fill-ins. Calling again returns the same result.
    pub fn get_changes(&mut self) -> Changes {
        self.closed = true;
        let graph = self.inner.graph();

        let merged: BTreeMap<CanonicalId, Vec<Record>> = self
            .merged
            .iter()
            .filter_map(|id| {
                let node = graph.node(id)?;
                Some((id.clone(), node.records().cloned().collect::<Vec<_>>()))
            })
            .collect();
        let fetch = |ids: &[RecordId]| -> Vec<Record> {
            ids.iter()
                .filter_map(|id| graph.store().part(id))
                .map(|p| p.record.clone())
                .collect()
        };

        Changes {
            merged,
            nodes_new: fetch(&self.nodes_new),
            edges_new: fetch(&self.edges_new),
        }
    }

    fn ensure_open(&self) -> Result<(), GraphError> {
        if self.closed {
            Err(GraphError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl<G: EntityGraph> EntityGraph for ChangeTracker<'_, G> {
    fn graph(&self) -> &CanonicalGraph {
        self.inner.graph()
    }

    fn add_node(&mut self, record: RecordCore) -> Result<(CanonicalId, bool), GraphError> {
        self.ensure_open()?;
        let id = record.id.clone();
        let (canonical, is_new) = self.inner.add_node(record)?;
        if is_new {
            self.nodes_new.push(id);
        }
        Ok((canonical, is_new))
    }

    fn add_edge(&mut self, record: EdgeRecord) -> Result<bool, GraphError> {
        self.ensure_open()?;
        let id = record.core.id.clone();
        let is_new = self.inner.add_edge(record)?;
        if is_new {
            self.edges_new.push(id);
        }
        Ok(is_new)
    }

    fn merge_nodes(
        &mut self,
        left: &CanonicalId,
        right: &CanonicalId,
    ) -> Result<CanonicalId, GraphError> {
        self.ensure_open()?;
        let merged = self.inner.merge_nodes(left, right)?;
        if left != right {
            self.merged.remove(left);
            self.merged.remove(right);
            self.merged.insert(merged.clone());
            debug!(merged = %merged, tracked = self.merged.len(), "tracked merge");
        }
        Ok(merged)
    }

    fn ensure_tag(&mut self, name: &str, default: bool) -> usize {
        self.inner.ensure_tag(name, default)
    }

    fn set_tag(&mut self, record: &RecordId, name: &str, value: bool) -> Result<(), GraphError> {
        self.inner.set_tag(record, name, value)
    }
}

/// Run `operation` inside a tracking session and return its result with the
/// changes it made.
pub fn track<G, T, F>(graph: &mut G, operation: F) -> Result<(T, Changes), GraphError>
where
    G: EntityGraph,
    F: FnOnce(&mut ChangeTracker<'_, G>) -> Result<T, GraphError>,
{
    let mut tracker = ChangeTracker::new(graph);
    let value = operation(&mut tracker)?;
    Ok((value, tracker.get_changes()))
}

// =============================================================================
// TESTS
// =============================================================================
