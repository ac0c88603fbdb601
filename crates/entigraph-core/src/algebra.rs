//! # Graph Algebra
//!
//! Pure functions from canonical graphs to new canonical graphs.
//!
//! - `intersect`: the overlap of independently merged graphs, with merge
//!   state unioned from every input
//! - `filter_by_degree`, `filter_k_core`, `filter_component_size`: topology
//!   filters that keep the surviving nodes' full part and tag state and the
//!   edges between survivors only
//!
//! Topology (k-core peeling, connected components) is computed on a petgraph
//! projection of the canonical graph; the canonical graph itself never
//! depends on petgraph for storage.

use crate::graph::CanonicalGraph;
use crate::merge::Merger;
use crate::tags::TagFilter;
use crate::{CanonicalId, CanonicalNode, GraphError, Part, RecordId};
use petgraph::algo::kosaraju_scc;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::stable_graph::StableUnGraph;
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeBounds;
use tracing::debug;

/// Graph algebra operations.
pub struct GraphAlgebra;

impl GraphAlgebra {
    // =========================================================================
    // INTERSECTION
    // =========================================================================

    /// The overlap of several graphs.
    ///
    /// Plain record ids present in every graph are kept. For each kept id a
    /// fresh group is built from that record's groups in all graphs, closed
    /// transitively, so two records merged in any input end up merged in the
    /// result. Edge records are then replayed from every graph when all of
    /// their endpoints survived, grouped the same way.
    pub fn intersect(graphs: &[&CanonicalGraph]) -> Result<CanonicalGraph, GraphError> {
        let Some((first, rest)) = graphs.split_first() else {
            return Err(GraphError::InvalidRecord(
                "intersection needs at least one graph".to_string(),
            ));
        };

        let any = TagFilter::any();
        let common: Vec<RecordId> = first
            .nodes(&any)
            .flat_map(CanonicalNode::part_ids)
            .filter(|id| {
                rest.iter()
                    .all(|g| g.node_of(id).is_ok_and(|n| !n.is_link()))
            })
            .cloned()
            .collect();

        let node_groups = Self::union_groups(graphs, common, |part| !part.record.is_edge())?;
        let surviving: BTreeSet<RecordId> = node_groups
            .iter()
            .flat_map(|g| g.part_ids().cloned())
            .collect();

        let edge_survives = |part: &Part| {
            part.record
                .as_edge()
                .is_some_and(|edge| edge.endpoints().all(|e| surviving.contains(&e)))
        };
        let edge_seeds: Vec<RecordId> = graphs
            .iter()
            .flat_map(|g| g.links())
            .flat_map(|link| link.parts.iter())
            .filter(|p| edge_survives(*p))
            .map(|p| p.id().clone())
            .collect();
        let link_groups = Self::union_groups(graphs, edge_seeds, edge_survives)?;

        debug!(
            graphs = graphs.len(),
            common = surviving.len(),
            nodes = node_groups.len(),
            links = link_groups.len(),
            "intersected graphs"
        );
        first.with_groups(node_groups.into_iter().chain(link_groups))
    }

    /// Build groups by following membership through every graph, starting
    /// from each seed not yet assigned.
    fn union_groups<F>(
        graphs: &[&CanonicalGraph],
        seeds: Vec<RecordId>,
        keep: F,
    ) -> Result<Vec<CanonicalNode>, GraphError>
    where
        F: Fn(&Part) -> bool,
    {
        let mut assigned: BTreeSet<RecordId> = BTreeSet::new();
        let mut groups = Vec::new();

        for seed in seeds {
            if !assigned.insert(seed.clone()) {
                continue;
            }
            let mut parts: Vec<Part> = Vec::new();
            let mut position: BTreeMap<RecordId, usize> = BTreeMap::new();
            let mut queue = vec![seed];

            while let Some(id) = queue.pop() {
                for graph in graphs {
                    let Ok(group) = graph.node_of(&id) else {
                        continue;
                    };
                    for part in group.parts.iter().filter(|&p| keep(p)) {
                        match position.get(part.id()) {
                            Some(&index) => absorb(&mut parts[index], part),
                            None => {
                                position.insert(part.id().clone(), parts.len());
                                parts.push(part.clone());
                            }
                        }
                        if assigned.insert(part.id().clone()) {
                            queue.push(part.id().clone());
                        }
                    }
                }
            }

            if parts.is_empty() {
                continue;
            }
            let id = Merger::canonical_id(parts.iter().map(Part::id))?;
            groups.push(CanonicalNode { id, parts });
        }
        Ok(groups)
    }

    // =========================================================================
    // TOPOLOGY FILTERS
    // =========================================================================

    /// A new graph restricted to `keep`, with the edges between kept nodes.
    ///
    /// A link group survives if at least one edge it keys survives.
    pub fn materialize(
        graph: &CanonicalGraph,
        keep: &BTreeSet<CanonicalId>,
    ) -> Result<CanonicalGraph, GraphError> {
        let nodes = keep
            .iter()
            .filter_map(|id| graph.node(id))
            .filter(|n| !n.is_link())
            .cloned();
        let links = graph
            .links()
            .filter(|link| {
                graph
                    .keyed_edges(&link.id)
                    .any(|e| keep.contains(&e.source) && keep.contains(&e.target))
            })
            .cloned();
        graph.with_groups(nodes.chain(links))
    }

    /// Keep nodes whose total degree (in + out, self-loops twice) is in range.
    pub fn filter_by_degree(
        graph: &CanonicalGraph,
        range: impl RangeBounds<usize>,
    ) -> Result<CanonicalGraph, GraphError> {
        let any = TagFilter::any();
        let keep: BTreeSet<CanonicalId> = graph
            .nodes(&any)
            .filter(|n| range.contains(&graph.degree(&n.id)))
            .map(|n| n.id.clone())
            .collect();
        debug!(kept = keep.len(), "degree filter");
        Self::materialize(graph, &keep)
    }

    /// Keep the k-core: the largest subgraph in which every node has degree
    /// at least `k`, found by repeatedly peeling nodes below `k`.
    pub fn filter_k_core(graph: &CanonicalGraph, k: usize) -> Result<CanonicalGraph, GraphError> {
        let topology = Topology::project(graph);
        let mut peeled: StableUnGraph<usize, ()> = topology.graph.into();

        loop {
            let weak: Vec<NodeIndex> = peeled
                .node_indices()
                .filter(|&n| {
                    let degree: usize = peeled
                        .edges(n)
                        .map(|e| if e.source() == e.target() { 2 } else { 1 })
                        .sum();
                    degree < k
                })
                .collect();
            if weak.is_empty() {
                break;
            }
            for n in weak {
                peeled.remove_node(n);
            }
        }

        let keep: BTreeSet<CanonicalId> = peeled
            .node_indices()
            .filter_map(|n| peeled.node_weight(n))
            .filter_map(|&i| topology.ids.get(i).cloned())
            .collect();
        debug!(k, kept = keep.len(), "k-core filter");
        Self::materialize(graph, &keep)
    }

    /// Keep nodes whose weakly connected component size is in range.
    pub fn filter_component_size(
        graph: &CanonicalGraph,
        range: impl RangeBounds<usize>,
    ) -> Result<CanonicalGraph, GraphError> {
        let topology = Topology::project(graph);
        let keep: BTreeSet<CanonicalId> = kosaraju_scc(&topology.graph)
            .into_iter()
            .filter(|component| range.contains(&component.len()))
            .flatten()
            .filter_map(|n| topology.graph.node_weight(n))
            .filter_map(|&i| topology.ids.get(i).cloned())
            .collect();
        debug!(kept = keep.len(), "component size filter");
        Self::materialize(graph, &keep)
    }
}

/// Undirected projection of the plain nodes and their edges.
///
/// Node weights index into `ids`; parallel edges are kept.
struct Topology {
    graph: UnGraph<usize, ()>,
    ids: Vec<CanonicalId>,
}

impl Topology {
    fn project(source: &CanonicalGraph) -> Self {
        let any = TagFilter::any();
        let ids: Vec<CanonicalId> = source.nodes(&any).map(|n| n.id.clone()).collect();
        let mut graph = UnGraph::with_capacity(ids.len(), source.edge_count());
        let index: BTreeMap<&CanonicalId, NodeIndex> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id, graph.add_node(i)))
            .collect();
        for edge in source.edges() {
            if let (Some(&a), Some(&b)) = (index.get(&edge.source), index.get(&edge.target)) {
                graph.add_edge(a, b, ());
            }
        }
        Self { graph, ids }
    }
}

/// Fold another graph's copy of the same record into `target`.
///
/// A real record replaces a placeholder; tags present in both are AND-ed.
fn absorb(target: &mut Part, other: &Part) {
    if target.pending && !other.pending {
        target.record = other.record.clone();
        target.pending = false;
    } else if !other.pending {
        target.record.core_mut().fill_from(other.record.core());
    }
    for (name, value) in &other.tags {
        target
            .tags
            .entry(name.clone())
            .and_modify(|v| *v = *v && *value)
            .or_insert(*value);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{graph_from_bytes, graph_to_bytes};
    use crate::graph::{EntityGraph, GraphConfig};
    use crate::schema::SchemaModel;
    use crate::{EdgeRecord, RecordCore};
    use std::sync::Arc;

    fn graph_of(ids: &[&str]) -> CanonicalGraph {
        let mut graph = CanonicalGraph::new();
        for id in ids {
            graph.add_node(RecordCore::new(*id, "Person")).expect("add");
        }
        graph
    }

    fn link(graph: &mut CanonicalGraph, id: &str, subject: &str, object: &str) {
        let core = RecordCore::new(id, "UnknownLink")
            .with_property("subject", subject)
            .with_property("object", object);
        graph
            .add_edge(EdgeRecord::new(core, "subject", "object"))
            .expect("edge");
    }

    #[test]
    fn intersect_of_nothing_fails() {
        assert!(GraphAlgebra::intersect(&[]).is_err());
    }

    #[test]
    fn intersect_keeps_edges_with_surviving_endpoints() {
        let mut g1 = graph_of(&["a", "b", "only1"]);
        link(&mut g1, "ab", "a", "b");
        link(&mut g1, "a-only", "a", "only1");
        let g2 = graph_of(&["a", "b"]);

        let result = GraphAlgebra::intersect(&[&g1, &g2]).expect("intersect");
        assert_eq!(result.node_count(), 2);
        assert_eq!(result.edge_count(), 1);
        assert!(result.contains(&RecordId::from("ab")));
        assert!(!result.contains(&RecordId::from("a-only")));
    }

    #[test]
    fn intersect_ands_tags_of_shared_parts() {
        let mut g1 = graph_of(&["a"]);
        let mut g2 = graph_of(&["a"]);
        g1.set_tag(&RecordId::from("a"), "seen", true).expect("g1");
        g2.set_tag(&RecordId::from("a"), "seen", false).expect("g2");

        let result = GraphAlgebra::intersect(&[&g1, &g2]).expect("intersect");
        let part = result.store().part(&RecordId::from("a")).expect("a");
        assert_eq!(part.tags.get("seen"), Some(&false));
    }

    #[test]
    fn degree_filter_uses_half_open_range() {
        let mut graph = graph_of(&["hub", "x", "y", "lonely"]);
        link(&mut graph, "e1", "hub", "x");
        link(&mut graph, "e2", "hub", "y");

        let filtered = GraphAlgebra::filter_by_degree(&graph, 1..2).expect("filter");
        assert_eq!(filtered.node_count(), 2);
        assert!(filtered.contains(&RecordId::from("x")));
        assert_eq!(filtered.edge_count(), 0);

        let unbounded = GraphAlgebra::filter_by_degree(&graph, 1..).expect("filter");
        assert_eq!(unbounded.node_count(), 3);
        assert_eq!(unbounded.edge_count(), 2);
    }

    #[test]
    fn k_core_peels_iteratively() {
        // Triangle with a tail: the tail must go, and with it nothing else.
        let mut graph = graph_of(&["a", "b", "c", "tail"]);
        link(&mut graph, "ab", "a", "b");
        link(&mut graph, "bc", "b", "c");
        link(&mut graph, "ca", "c", "a");
        link(&mut graph, "ct", "c", "tail");

        let core = GraphAlgebra::filter_k_core(&graph, 2).expect("k-core");
        assert_eq!(core.node_count(), 3);
        assert_eq!(core.edge_count(), 3);
        assert!(!core.contains(&RecordId::from("tail")));
        assert!(!core.contains(&RecordId::from("ct")));

        let empty = GraphAlgebra::filter_k_core(&graph, 3).expect("k-core");
        assert_eq!(empty.node_count(), 0);
    }

    #[test]
    fn filtered_graph_survives_readding_dropped_endpoint() {
        // `e` connects a and b to c; only its b -> c edge survives the filter.
        let mut graph = graph_of(&["a", "b", "c"]);
        let mut core = RecordCore::new("e", "UnknownLink");
        core.add("subject", "a");
        core.add("subject", "b");
        core.add("object", "c");
        graph
            .add_edge(EdgeRecord::new(core, "subject", "object"))
            .expect("e");
        link(&mut graph, "e2", "b", "c");

        let mut filtered = GraphAlgebra::filter_by_degree(&graph, 2..).expect("filter");
        assert!(!filtered.contains(&RecordId::from("a")));
        assert!(filtered.contains(&RecordId::from("e")));
        assert_eq!(filtered.edge_count(), 2);

        filtered
            .add_node(RecordCore::new("a", "Person"))
            .expect("re-add");
        assert_eq!(filtered.edge_count(), 3);

        let bytes = graph_to_bytes(&filtered).expect("save");
        let restored = graph_from_bytes(
            &bytes,
            Arc::new(SchemaModel::builtin()),
            GraphConfig::default(),
        )
        .expect("load");
        assert!(restored.edges().eq(filtered.edges()));
        assert_eq!(restored.stats(), filtered.stats());
    }

    #[test]
    fn component_size_filter() {
        let mut graph = graph_of(&["a", "b", "c", "solo"]);
        link(&mut graph, "ab", "a", "b");
        link(&mut graph, "bc", "c", "b");

        let big = GraphAlgebra::filter_component_size(&graph, 2..).expect("filter");
        assert_eq!(big.node_count(), 3);
        let small = GraphAlgebra::filter_component_size(&graph, ..2).expect("filter");
        assert_eq!(small.node_count(), 1);
        assert!(small.contains(&RecordId::from("solo")));
    }
}
