//! # Merge Engine
//!
//! Contracts two canonical groups into one.
//!
//! A merge either completes fully or leaves the graph untouched: every check
//! (existence, kind, type compatibility, id collision) runs before the first
//! mutation.
//!
//! ## Canonical Ids
//!
//! The id of a merged group is a BLAKE3 digest over its sorted, de-duplicated
//! part ids, truncated to 128 bits and hex encoded. The result depends only
//! on the set of parts, never on the order merges happened in. A group with
//! one part keeps that record's own id.

use crate::graph::CanonicalGraph;
use crate::primitives::{CANONICAL_ID_BYTES, CANONICAL_ID_SEPARATOR};
use crate::{CanonicalEdge, CanonicalId, CanonicalNode, GraphError, Part, RecordId};
use std::collections::BTreeSet;
use tracing::debug;

/// The merge engine.
pub struct Merger;

impl Merger {
    /// Derive the canonical id of a set of record ids.
    pub fn canonical_id<'a>(
        ids: impl IntoIterator<Item = &'a RecordId>,
    ) -> Result<CanonicalId, GraphError> {
        let sorted: BTreeSet<&str> = ids.into_iter().map(RecordId::as_str).collect();
        let mut iter = sorted.iter();
        let Some(first) = iter.next() else {
            return Err(GraphError::InvalidRecord(
                "cannot derive a canonical id from zero records".to_string(),
            ));
        };
        if sorted.len() == 1 {
            return Ok(CanonicalId::new(*first));
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(first.as_bytes());
        let mut separator = [0u8; 4];
        let separator = CANONICAL_ID_SEPARATOR.encode_utf8(&mut separator).as_bytes();
        for id in iter {
            hasher.update(separator);
            hasher.update(id.as_bytes());
        }
        let hex: String = hasher
            .finalize()
            .as_bytes()
            .iter()
            .take(CANONICAL_ID_BYTES)
            .map(|b| format!("{b:02x}"))
            .collect();
        Ok(CanonicalId::new(hex))
    }

    /// Merge `right` into `left` and return the resulting canonical id.
    ///
    /// Merging a group with itself is a no-op. Parts of `left` come first in
    /// the merged group. Edges are rewired onto the new id and duplicate
    /// (source, target, key) triples created by the contraction collapse.
    pub fn merge_nodes(
        graph: &mut CanonicalGraph,
        left: &CanonicalId,
        right: &CanonicalId,
    ) -> Result<CanonicalId, GraphError> {
        if left == right {
            return graph
                .node(left)
                .map(|n| n.id.clone())
                .ok_or_else(|| GraphError::NodeNotFound(left.clone()));
        }

        let left_node = graph
            .node(left)
            .ok_or_else(|| GraphError::NodeNotFound(left.clone()))?;
        let right_node = graph
            .node(right)
            .ok_or_else(|| GraphError::NodeNotFound(right.clone()))?;
        Self::check_compatible(graph, left_node, right_node)?;

        let merged_id = Self::canonical_id(left_node.part_ids().chain(right_node.part_ids()))?;
        if merged_id != *left && merged_id != *right && graph.node(&merged_id).is_some() {
            return Err(GraphError::CanonicalIdCollision(merged_id));
        }
        let is_link = left_node.is_link();

        // Checks done; from here on nothing can fail.
        let mut detached = BTreeSet::new();
        let mut parts: Vec<Part> = Vec::new();
        for id in [left, right] {
            if let Some((group, edges)) = graph.remove_node(id) {
                parts.extend(group.parts);
                detached.extend(edges);
            }
        }
        graph.store_mut().insert_group(CanonicalNode {
            id: merged_id.clone(),
            parts,
        });

        let remap = |id: &CanonicalId| {
            if id == left || id == right {
                merged_id.clone()
            } else {
                id.clone()
            }
        };
        let mut collapsed = 0usize;
        for edge in detached {
            let rewired = if is_link {
                CanonicalEdge::new(edge.source, edge.target, merged_id.clone())
            } else {
                CanonicalEdge::new(remap(&edge.source), remap(&edge.target), edge.key)
            };
            if !graph.link(rewired) {
                collapsed += 1;
            }
        }

        debug!(
            left = %left,
            right = %right,
            merged = %merged_id,
            collapsed_edges = collapsed,
            "merged canonical nodes"
        );
        Ok(merged_id)
    }

    /// Check that a set of groups could be folded into one, without touching
    /// the graph. Fails with the first pair that a merge would refuse.
    pub fn check_mergeable(graph: &CanonicalGraph, ids: &[CanonicalId]) -> Result<(), GraphError> {
        let nodes = ids
            .iter()
            .map(|id| {
                graph
                    .node(id)
                    .ok_or_else(|| GraphError::NodeNotFound(id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (i, left) in nodes.iter().enumerate() {
            for right in nodes.iter().skip(i + 1) {
                if left.id != right.id {
                    Self::check_compatible(graph, left, right)?;
                }
            }
        }
        Ok(())
    }

    fn check_compatible(
        graph: &CanonicalGraph,
        left: &CanonicalNode,
        right: &CanonicalNode,
    ) -> Result<(), GraphError> {
        let refuse = |reason: String| GraphError::IncompatibleMerge {
            left: left.id.clone(),
            right: right.id.clone(),
            reason,
        };

        if left.is_link() != right.is_link() {
            return Err(refuse(
                "cannot merge an edge record group with a plain node".to_string(),
            ));
        }

        // Placeholders carry no type information yet.
        let model = graph.model();
        for l in left.parts.iter().filter(|p| !p.pending) {
            for r in right.parts.iter().filter(|p| !p.pending) {
                if !model.compatible(l.record.schema(), r.record.schema()) {
                    return Err(refuse(format!(
                        "schema {} of {} is incompatible with schema {} of {}",
                        l.record.schema(),
                        l.id(),
                        r.record.schema(),
                        r.id()
                    )));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
