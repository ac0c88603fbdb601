//! # Property Deduplication
//!
//! Merges plain nodes that share an exact value on any of a set of
//! identifying properties (registration numbers, e-mail addresses, ...).
//!
//! Nodes are grouped by `property:value` keys. Each group is merged through
//! the graph's own merge operation, so a wrapping change tracker sees every
//! merge. A group is checked as a whole first: if any two of its nodes
//! conflict, nothing in it is merged, the key is logged as skipped and the
//! rest of the pass continues.

use crate::graph::EntityGraph;
use crate::merge::Merger;
use crate::tags::TagFilter;
use crate::{CanonicalId, GraphError, RecordId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Outcome of a deduplication pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupeReport {
    /// Canonical ids produced by successful merges, in key order.
    pub merged: Vec<CanonicalId>,
    /// Keys whose merge was refused as incompatible.
    pub skipped: Vec<String>,
}

/// Merge nodes sharing a value of any of `properties`.
///
/// Matching is exact on normalised values. Nodes are tracked by one record
/// each, which is resolved again right before merging, so earlier merges in
/// the same pass never leave a stale id behind.
pub fn merge_on_properties<G: EntityGraph>(
    graph: &mut G,
    properties: &[&str],
) -> Result<DedupeReport, GraphError> {
    let wanted: BTreeSet<&str> = properties.iter().copied().collect();
    let mut index: BTreeMap<String, BTreeSet<RecordId>> = BTreeMap::new();

    let any = TagFilter::any();
    for node in graph.graph().nodes(&any) {
        let Some(representative) = node.parts.first().map(|p| p.id().clone()) else {
            continue;
        };
        for part in &node.parts {
            for (name, values) in &part.record.core().properties {
                if !wanted.contains(name.as_str()) {
                    continue;
                }
                for value in values {
                    index
                        .entry(format!("{name}:{value}"))
                        .or_default()
                        .insert(representative.clone());
                }
            }
        }
    }

    let mut report = DedupeReport::default();
    for (key, records) in index {
        if records.len() < 2 {
            continue;
        }
        let records: Vec<RecordId> = records.into_iter().collect();
        let distinct: Vec<CanonicalId> = records
            .iter()
            .filter_map(|r| graph.graph().canonical_id_of(r).ok())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        if distinct.len() < 2 {
            continue;
        }

        let checked = Merger::check_mergeable(graph.graph(), &distinct)
            .and_then(|()| graph.merge_records(&records));
        match checked {
            Ok(merged) => {
                debug!(key = %key, merged = %merged, "deduplicated");
                report.merged.push(merged);
            }
            Err(e @ GraphError::IncompatibleMerge { .. }) => {
                warn!(key = %key, error = %e, "skipped incompatible duplicates");
                report.skipped.push(key);
            }
            Err(e) => return Err(e),
        }
    }

    // Later merges may have absorbed earlier results.
    report.merged.retain(|id| graph.graph().node(id).is_some());
    report.merged.dedup();
    Ok(report)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CanonicalGraph;
    use crate::RecordCore;

    fn company(id: &str, reg: &str) -> RecordCore {
        RecordCore::new(id, "Company").with_property("registrationNumber", reg)
    }

    #[test]
    fn shared_values_merge_transitively() {
        let mut graph = CanonicalGraph::new();
        graph.add_node(company("a", "123")).expect("a");
        graph.add_node(company("b", "123")).expect("b");
        graph
            .add_node(company("c", "456").with_property("registrationNumber", "123"))
            .expect("c");
        graph.add_node(company("d", "789")).expect("d");

        let report = merge_on_properties(&mut graph, &["registrationNumber"]).expect("dedupe");

        assert_eq!(report.merged.len(), 1);
        assert_eq!(graph.node_count(), 2);
        let merged = graph.node(&report.merged[0]).expect("merged node");
        assert_eq!(merged.parts.len(), 3);
    }

    #[test]
    fn ignores_other_properties() {
        let mut graph = CanonicalGraph::new();
        graph
            .add_node(RecordCore::new("a", "Person").with_property("name", "Ann"))
            .expect("a");
        graph
            .add_node(RecordCore::new("b", "Person").with_property("name", "Ann"))
            .expect("b");

        let report = merge_on_properties(&mut graph, &["email"]).expect("dedupe");
        assert!(report.merged.is_empty());
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn incompatible_groups_are_skipped() {
        let mut graph = CanonicalGraph::new();
        graph
            .add_node(RecordCore::new("p", "Person").with_property("email", "x@y"))
            .expect("p");
        graph
            .add_node(RecordCore::new("c", "Company").with_property("email", "x@y"))
            .expect("c");

        let report = merge_on_properties(&mut graph, &["email"]).expect("dedupe");
        assert!(report.merged.is_empty());
        assert_eq!(report.skipped, ["email:x@y"]);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn conflicting_group_is_skipped_whole() {
        // a fits b and c on its own, but b and c exclude each other.
        let mut graph = CanonicalGraph::new();
        for (id, schema) in [("a", "LegalEntity"), ("b", "Person"), ("c", "Company")] {
            graph
                .add_node(RecordCore::new(id, schema).with_property("email", "x"))
                .expect("add");
        }

        let report = merge_on_properties(&mut graph, &["email"]).expect("dedupe");
        assert!(report.merged.is_empty());
        assert_eq!(report.skipped, ["email:x"]);
        assert_eq!(graph.node_count(), 3);
        for id in ["a", "b", "c"] {
            let node = graph.node_of(&RecordId::from(id)).expect("node");
            assert_eq!(node.parts.len(), 1);
        }
    }
}
