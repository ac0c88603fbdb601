//! # Tag Index
//!
//! Boolean tags live on individual parts, never on merged nodes, so a merge
//! cannot lose which record was marked how. Node-level questions are answered
//! at query time:
//!
//! - a node matches a filter only if every one of its parts does
//! - [`crate::CanonicalNode::tag`] AND-reduces a tag across the parts carrying it
//!
//! A filter term can also require a tag to be absent, which is how a
//! processing pass finds the parts it has not visited yet.

use crate::graph::{CanonicalGraph, EntityGraph};
use crate::{CanonicalId, CanonicalNode, GraphError, Part, RecordId};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

// =============================================================================
// TAG FILTER
// =============================================================================

/// Conjunction of tag requirements.
///
/// `Some(v)` requires the tag to be set to `v`; `None` requires it unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    terms: BTreeMap<String, Option<bool>>,
}

impl TagFilter {
    /// A filter that matches everything.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Require a tag to hold a value.
    #[must_use]
    pub fn with(self, name: impl Into<String>, value: bool) -> Self {
        self.require(name, Some(value))
    }

    /// Require a tag to be absent.
    #[must_use]
    pub fn unset(self, name: impl Into<String>) -> Self {
        self.require(name, None)
    }

    /// Add a term.
    #[must_use]
    pub fn require(mut self, name: impl Into<String>, value: Option<bool>) -> Self {
        self.terms.insert(name.into(), value);
        self
    }

    /// True if the filter has no terms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// True if a single part satisfies every term.
    #[must_use]
    pub fn matches_part(&self, part: &Part) -> bool {
        self.terms
            .iter()
            .all(|(name, want)| part.tags.get(name).copied() == *want)
    }

    /// True if every part of the node satisfies every term.
    #[must_use]
    pub fn matches_node(&self, node: &CanonicalNode) -> bool {
        node.parts.iter().all(|p| self.matches_part(p))
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.terms {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            match value {
                Some(v) => write!(f, "{name}={v}")?,
                None => write!(f, "{name}=unset")?,
            }
        }
        Ok(())
    }
}

/// Parses `name=true,other=false,third=unset`. An empty string matches everything.
impl FromStr for TagFilter {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut filter = Self::any();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, value) = term.split_once('=').ok_or_else(|| {
                GraphError::InvalidTagFilter(format!("tag term '{term}' must be name=value"))
            })?;
            let value = match value.trim() {
                "true" => Some(true),
                "false" => Some(false),
                "unset" | "none" => None,
                other => {
                    return Err(GraphError::InvalidTagFilter(format!(
                        "tag value '{other}' must be true, false or unset"
                    )));
                }
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(GraphError::InvalidTagFilter("empty tag name".to_string()));
            }
            filter = filter.require(name, value);
        }
        Ok(filter)
    }
}

// =============================================================================
// GRAPH TAG OPERATIONS
// =============================================================================

impl CanonicalGraph {
    /// Parts of plain nodes that satisfy the filter, with their owning group.
    pub fn parts<'a>(
        &'a self,
        filter: &'a TagFilter,
    ) -> impl Iterator<Item = (&'a CanonicalId, &'a Part)> + 'a {
        self.store()
            .groups()
            .filter(|n| !n.is_link())
            .flat_map(move |n| {
                n.parts
                    .iter()
                    .filter(move |p| filter.matches_part(p))
                    .map(move |p| (&n.id, p))
            })
    }

    /// True if every part of the node satisfies the filter.
    pub fn node_has_tags(&self, id: &CanonicalId, filter: &TagFilter) -> Result<bool, GraphError> {
        self.node(id)
            .map(|n| filter.matches_node(n))
            .ok_or_else(|| GraphError::NodeNotFound(id.clone()))
    }

    /// Remove a tag from one part. Returns whether it was set.
    pub fn clear_tag(&mut self, record: &RecordId, name: &str) -> Result<bool, GraphError> {
        let part = self
            .store_mut()
            .part_mut(record)
            .ok_or_else(|| GraphError::NotFound(record.clone()))?;
        Ok(part.tags.remove(name).is_some())
    }
}

// =============================================================================
// TAG PASS
// =============================================================================

/// Run `visit` once over every plain part that has not yet been marked with
/// `name`, then mark it `true`.
///
/// Parts are initialized to `false` first unless `force` already reset them.
/// With `force`, every part is reset to `false` and revisited. The set of
/// parts is snapshotted up front, so parts added by `visit` wait for the next
/// pass. A part that `visit` fails on stays `false` and the error is returned.
pub fn tag_pass<G, F>(graph: &mut G, name: &str, force: bool, mut visit: F) -> Result<usize, GraphError>
where
    G: EntityGraph,
    F: FnMut(&mut G, &CanonicalId, &RecordId) -> Result<(), GraphError>,
{
    if force {
        let all: Vec<RecordId> = graph
            .graph()
            .parts(&TagFilter::any())
            .map(|(_, p)| p.id().clone())
            .collect();
        for id in &all {
            graph.set_tag(id, name, false)?;
        }
    }
    graph.ensure_tag(name, false);

    let filter = TagFilter::any().with(name, false);
    let todo: Vec<RecordId> = graph
        .graph()
        .parts(&filter)
        .map(|(_, p)| p.id().clone())
        .collect();

    let mut visited = 0usize;
    for record in todo {
        // Earlier visits may have merged this record elsewhere.
        let canonical = graph.graph().canonical_id_of(&record)?.clone();
        visit(graph, &canonical, &record)?;
        graph.set_tag(&record, name, true)?;
        visited += 1;
    }
    debug!(tag = name, visited, "tag pass finished");
    Ok(visited)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordCore;

    fn graph_with(ids: &[&str]) -> CanonicalGraph {
        let mut graph = CanonicalGraph::new();
        for id in ids {
            graph.add_node(RecordCore::new(*id, "Person")).expect("add");
        }
        graph
    }

    #[test]
    fn filter_parses_terms() {
        let filter: TagFilter = "seen=true, flagged=false,new=unset".parse().expect("parse");
        assert_eq!(filter.to_string(), "flagged=false,new=unset,seen=true");
        assert!(matches!(
            "broken".parse::<TagFilter>(),
            Err(GraphError::InvalidTagFilter(_))
        ));
        assert!(matches!(
            "x=maybe".parse::<TagFilter>(),
            Err(GraphError::InvalidTagFilter(_))
        ));
        assert!(matches!(
            "=true".parse::<TagFilter>(),
            Err(GraphError::InvalidTagFilter(_))
        ));
        assert!("".parse::<TagFilter>().expect("empty").is_empty());
    }

    #[test]
    fn unset_term_matches_untagged_parts() {
        let mut graph = graph_with(&["a", "b"]);
        graph
            .set_tag(&RecordId::from("a"), "seen", true)
            .expect("tag");

        let unset = TagFilter::any().unset("seen");
        let ids: Vec<&str> = graph.parts(&unset).map(|(_, p)| p.id().as_str()).collect();
        assert_eq!(ids, ["b"]);
    }

    #[test]
    fn node_matches_only_if_all_parts_agree() {
        let mut graph = graph_with(&["a", "b"]);
        graph.set_tag(&RecordId::from("a"), "seen", true).expect("a");
        graph.set_tag(&RecordId::from("b"), "seen", false).expect("b");
        let merged = graph
            .merge_records(&[RecordId::from("a"), RecordId::from("b")])
            .expect("merge");

        let yes = TagFilter::any().with("seen", true);
        let no = TagFilter::any().with("seen", false);
        assert!(!graph.node_has_tags(&merged, &yes).expect("node"));
        assert!(!graph.node_has_tags(&merged, &no).expect("node"));
        assert_eq!(graph.parts(&yes).count(), 1);
        assert_eq!(graph.node(&merged).expect("node").tag("seen"), Some(false));
    }

    #[test]
    fn ensure_tag_keeps_existing_values() {
        let mut graph = graph_with(&["a", "b"]);
        graph.set_tag(&RecordId::from("a"), "seen", true).expect("a");

        assert_eq!(graph.ensure_tag("seen", false), 1);
        assert_eq!(graph.parts(&TagFilter::any().with("seen", true)).count(), 1);
        assert_eq!(graph.parts(&TagFilter::any().with("seen", false)).count(), 1);
    }

    #[test]
    fn clear_tag_reports_presence() {
        let mut graph = graph_with(&["a"]);
        let a = RecordId::from("a");
        graph.set_tag(&a, "seen", true).expect("tag");
        assert!(graph.clear_tag(&a, "seen").expect("clear"));
        assert!(!graph.clear_tag(&a, "seen").expect("clear again"));
        assert!(graph.clear_tag(&RecordId::from("ghost"), "seen").is_err());
    }

    #[test]
    fn tag_pass_visits_each_part_once() {
        let mut graph = graph_with(&["a", "b", "c"]);

        let mut seen = Vec::new();
        let visited = tag_pass(&mut graph, "done", false, |_, _, record| {
            seen.push(record.clone());
            Ok(())
        })
        .expect("pass");
        assert_eq!(visited, 3);
        assert_eq!(seen.len(), 3);

        let again = tag_pass(&mut graph, "done", false, |_, _, _| Ok(())).expect("pass");
        assert_eq!(again, 0);

        let forced = tag_pass(&mut graph, "done", true, |_, _, _| Ok(())).expect("pass");
        assert_eq!(forced, 3);
    }

    #[test]
    fn tag_pass_skips_parts_added_during_pass() {
        let mut graph = graph_with(&["a"]);
        let visited = tag_pass(&mut graph, "done", false, |g, _, _| {
            g.add_node(RecordCore::new("late", "Person")).map(|_| ())
        })
        .expect("pass");

        assert_eq!(visited, 1);
        let late = graph.node_of(&RecordId::from("late")).expect("late");
        assert_eq!(late.parts[0].tags.get("done"), None);
    }
}
