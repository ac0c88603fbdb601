//! # Property-Based Tests
//!
//! Determinism and conservation invariants of merging, checked with proptest.

use entigraph_core::{
    CanonicalGraph, CanonicalId, EdgeRecord, EntityGraph, GraphAlgebra, Merger, RecordCore,
    RecordId,
};
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn node_id(i: usize) -> String {
    format!("n{i}")
}

/// A graph of `size` entities plus one link per `(source, target)` pair.
fn build(size: usize, links: &[(usize, usize)]) -> CanonicalGraph {
    let mut graph = CanonicalGraph::new();
    for i in 0..size {
        graph
            .add_node(RecordCore::new(node_id(i), "LegalEntity"))
            .expect("add node");
    }
    for (n, (s, t)) in links.iter().enumerate() {
        let core = RecordCore::new(format!("l{n}"), "UnknownLink")
            .with_property("subject", node_id(s % size))
            .with_property("object", node_id(t % size));
        graph
            .add_edge(EdgeRecord::new(core, "subject", "object"))
            .expect("add edge");
    }
    graph
}

fn part_set(graph: &CanonicalGraph, id: &CanonicalId) -> BTreeSet<RecordId> {
    graph
        .node(id)
        .map(|n| n.part_ids().cloned().collect())
        .unwrap_or_default()
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// The canonical id of a set does not depend on input order or repeats.
    #[test]
    fn canonical_id_order_independent(ids in btree_set("[a-z0-9]{1,8}", 1..12)) {
        let forward: Vec<RecordId> = ids.iter().map(|s| RecordId::from(s.as_str())).collect();
        let mut backward = forward.clone();
        backward.reverse();
        let mut doubled = forward.clone();
        doubled.extend(forward.iter().cloned());

        let a = Merger::canonical_id(&forward).expect("id");
        prop_assert_eq!(&a, &Merger::canonical_id(&backward).expect("id"));
        prop_assert_eq!(&a, &Merger::canonical_id(&doubled).expect("id"));
    }

    /// merge(a, b) and merge(b, a) agree on id, parts and edge count.
    #[test]
    fn merge_is_commutative(
        size in 2usize..12,
        links in vec((0usize..12, 0usize..12), 0..20),
        pick in (0usize..12, 0usize..12),
    ) {
        let left = CanonicalId::new(node_id(pick.0 % size));
        let right = CanonicalId::new(node_id(pick.1 % size));

        let mut g1 = build(size, &links);
        let mut g2 = build(size, &links);
        let m1 = g1.merge_nodes(&left, &right).expect("merge");
        let m2 = g2.merge_nodes(&right, &left).expect("merge");

        prop_assert_eq!(&m1, &m2);
        prop_assert_eq!(part_set(&g1, &m1), part_set(&g2, &m2));
        prop_assert_eq!(g1.edge_count(), g2.edge_count());
        let e1: Vec<_> = g1.edges().cloned().collect();
        let e2: Vec<_> = g2.edges().cloned().collect();
        prop_assert_eq!(e1, e2);
    }

    /// Records outside a merge keep their own id.
    #[test]
    fn bystanders_keep_identity(
        size in 3usize..12,
        links in vec((0usize..12, 0usize..12), 0..20),
    ) {
        let mut graph = build(size, &links);
        graph
            .merge_records(&[RecordId::new(node_id(0)), RecordId::new(node_id(1))])
            .expect("merge");

        for i in 2..size {
            let id = RecordId::new(node_id(i));
            let canonical = graph.canonical_id_of(&id).expect("known");
            prop_assert_eq!(canonical.as_str(), id.as_str());
        }
    }

    /// Merging never produces two edges with the same triple, and every
    /// link still keys at least one edge.
    #[test]
    fn no_duplicate_edges_after_merges(
        size in 2usize..10,
        links in vec((0usize..10, 0usize..10), 1..25),
        merges in vec((0usize..10, 0usize..10), 1..6),
    ) {
        let mut graph = build(size, &links);
        for (a, b) in merges {
            graph
                .merge_records(&[RecordId::new(node_id(a % size)), RecordId::new(node_id(b % size))])
                .expect("merge");
        }

        let triples: Vec<_> = graph.edges().collect();
        let unique: BTreeSet<_> = triples.iter().collect();
        prop_assert_eq!(triples.len(), unique.len());
        for link in graph.links() {
            prop_assert!(graph.keyed_edges(&link.id).count() >= 1);
        }
        for edge in graph.edges() {
            prop_assert!(graph.node(&edge.source).is_some());
            prop_assert!(graph.node(&edge.target).is_some());
        }
    }

    /// After any sequence of merges every record belongs to exactly one live
    /// group, and the lookup table points at that group.
    #[test]
    fn lookup_is_a_bijection(
        size in 2usize..10,
        links in vec((0usize..10, 0usize..10), 0..15),
        merges in vec((0usize..10, 0usize..10), 0..8),
    ) {
        let mut graph = build(size, &links);
        for (a, b) in merges {
            graph
                .merge_records(&[RecordId::new(node_id(a % size)), RecordId::new(node_id(b % size))])
                .expect("merge");
        }

        let mut owners: BTreeMap<RecordId, CanonicalId> = BTreeMap::new();
        for group in graph.store().groups() {
            for id in group.part_ids() {
                prop_assert!(owners.insert(id.clone(), group.id.clone()).is_none());
            }
        }
        prop_assert_eq!(owners.len(), graph.record_count());
        prop_assert_eq!(owners.len(), size + links.len());
        for (record, owner) in &owners {
            prop_assert_eq!(graph.canonical_id_of(record).expect("known"), owner);
        }
    }

    /// Merging two nodes with no edge between them keeps the edge count.
    #[test]
    fn unlinked_merge_conserves_edges(
        size in 2usize..12,
        links in vec((0usize..12, 0usize..12), 0..20),
        pick in (0usize..12, 0usize..12),
    ) {
        let left = CanonicalId::new(node_id(pick.0 % size));
        let right = CanonicalId::new(node_id(pick.1 % size));
        prop_assume!(left != right);

        let mut graph = build(size, &links);
        let between = graph.edges().any(|e| {
            (e.source == left && e.target == right) || (e.source == right && e.target == left)
        });
        prop_assume!(!between);

        let before = graph.edge_count();
        let degree = graph.degree(&left) + graph.degree(&right);
        let merged = graph.merge_nodes(&left, &right).expect("merge");
        prop_assert_eq!(graph.edge_count(), before);
        prop_assert_eq!(graph.degree(&merged), degree);
    }

    /// Intersecting a graph with itself preserves its shape.
    #[test]
    fn self_intersection_is_identity(
        size in 1usize..10,
        links in vec((0usize..10, 0usize..10), 0..15),
    ) {
        let graph = build(size, &links);
        let same = GraphAlgebra::intersect(&[&graph, &graph]).expect("intersect");

        prop_assert_eq!(same.stats(), graph.stats());
        let e1: Vec<_> = graph.edges().cloned().collect();
        let e2: Vec<_> = same.edges().cloned().collect();
        prop_assert_eq!(e1, e2);
    }
}
