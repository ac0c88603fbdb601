//! # Record Store
//!
//! Keeps every raw record exactly once, grouped into canonical merge groups,
//! plus the lookup table from record id to current canonical id.
//!
//! The store knows nothing about edges or type compatibility; the graph
//! layer decides what may be grouped and calls in here to do the bookkeeping.

use crate::{CanonicalId, CanonicalNode, GraphError, Part, Record, RecordId};
use std::collections::BTreeMap;

/// Record storage and the record -> canonical lookup table.
///
/// Invariant: every part id of every group maps to that group's id in
/// `lookup`, and no record id appears in two groups.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    /// Canonical id -> merge group.
    groups: BTreeMap<CanonicalId, CanonicalNode>,
    /// Record id -> canonical id of the group that owns it.
    lookup: BTreeMap<RecordId, CanonicalId>,
}

impl RecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from complete groups, rebuilding the lookup table.
    pub fn from_groups(groups: impl IntoIterator<Item = CanonicalNode>) -> Result<Self, GraphError> {
        let mut store = Self::new();
        for group in groups {
            if group.parts.is_empty() {
                return Err(GraphError::InvalidRecord(format!(
                    "canonical node {} has no parts",
                    group.id
                )));
            }
            let is_link = group.is_link();
            if group.parts.iter().any(|p| p.record.is_edge() != is_link) {
                return Err(GraphError::InvalidRecord(format!(
                    "canonical node {} mixes edge and plain records",
                    group.id
                )));
            }
            if store.groups.contains_key(&group.id) {
                return Err(GraphError::CanonicalIdCollision(group.id));
            }
            store.groups.insert(group.id.clone(), group);
        }
        store.rebuild_lookup()?;
        Ok(store)
    }

    /// True if the record id is known.
    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.lookup.contains_key(id)
    }

    /// Current canonical id of a record.
    pub fn canonical_id_of(&self, id: &RecordId) -> Result<&CanonicalId, GraphError> {
        self.lookup
            .get(id)
            .ok_or_else(|| GraphError::NotFound(id.clone()))
    }

    /// Register a record as a single-part group if it is not already present.
    ///
    /// Returns the owning canonical id and whether the record was new.
    pub fn put(&mut self, record: Record) -> Result<(CanonicalId, bool), GraphError> {
        self.put_part(Part::new(record))
    }

    /// Register a part (possibly a placeholder) as a single-part group.
    pub fn put_part(&mut self, part: Part) -> Result<(CanonicalId, bool), GraphError> {
        if let Some(existing) = self.lookup.get(part.id()) {
            return Ok((existing.clone(), false));
        }
        let group = CanonicalNode::single(part);
        if self.groups.contains_key(&group.id) {
            return Err(GraphError::CanonicalIdCollision(group.id));
        }
        let id = group.id.clone();
        self.lookup.insert(group.parts[0].id().clone(), id.clone());
        self.groups.insert(id.clone(), group);
        Ok((id, true))
    }

    /// Get a group by canonical id.
    #[must_use]
    pub fn group(&self, id: &CanonicalId) -> Option<&CanonicalNode> {
        self.groups.get(id)
    }

    /// Get a group by canonical id, mutably.
    ///
    /// Callers must not add or remove parts through this handle.
    pub(crate) fn group_mut(&mut self, id: &CanonicalId) -> Option<&mut CanonicalNode> {
        self.groups.get_mut(id)
    }

    /// True if the canonical id names a live group.
    #[must_use]
    pub fn contains_group(&self, id: &CanonicalId) -> bool {
        self.groups.contains_key(id)
    }

    /// The group that owns a record.
    pub fn group_of(&self, id: &RecordId) -> Result<&CanonicalNode, GraphError> {
        let cid = self.canonical_id_of(id)?;
        self.groups
            .get(cid)
            .ok_or_else(|| GraphError::NodeNotFound(cid.clone()))
    }

    /// A single part by record id.
    #[must_use]
    pub fn part(&self, id: &RecordId) -> Option<&Part> {
        let cid = self.lookup.get(id)?;
        self.groups.get(cid)?.part(id)
    }

    /// A single part by record id, mutably.
    pub(crate) fn part_mut(&mut self, id: &RecordId) -> Option<&mut Part> {
        let cid = self.lookup.get(id)?;
        self.groups.get_mut(cid)?.part_mut(id)
    }

    /// All groups in canonical id order.
    pub fn groups(&self) -> impl Iterator<Item = &CanonicalNode> {
        self.groups.values()
    }

    /// All groups, mutably.
    pub(crate) fn groups_mut(&mut self) -> impl Iterator<Item = &mut CanonicalNode> {
        self.groups.values_mut()
    }

    /// Insert a complete group and point all of its parts at it.
    pub(crate) fn insert_group(&mut self, group: CanonicalNode) {
        for part in &group.parts {
            self.lookup.insert(part.id().clone(), group.id.clone());
        }
        self.groups.insert(group.id.clone(), group);
    }

    /// Detach a group. Lookup entries are left for the caller to repoint.
    pub(crate) fn remove_group(&mut self, id: &CanonicalId) -> Option<CanonicalNode> {
        self.groups.remove(id)
    }

    /// Recompute the lookup table purely from group membership.
    pub fn rebuild_lookup(&mut self) -> Result<(), GraphError> {
        let mut lookup = BTreeMap::new();
        for group in self.groups.values() {
            for part in &group.parts {
                if lookup
                    .insert(part.id().clone(), group.id.clone())
                    .is_some()
                {
                    return Err(GraphError::InvalidRecord(format!(
                        "record {} belongs to more than one canonical node",
                        part.id()
                    )));
                }
            }
        }
        self.lookup = lookup;
        Ok(())
    }

    /// Number of stored records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.lookup.len()
    }

    /// Number of live groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================
