//! # Type Model
//!
//! The engine never hardcodes entity types. It consults a [`TypeModel`] to
//! decide whether two records may be merged and which properties of an edge
//! type name its endpoints.
//!
//! [`SchemaModel`] is the stock implementation: a named hierarchy of
//! [`SchemaDef`]s with multiple inheritance. Callers can build their own from
//! configuration or use [`SchemaModel::builtin`].

use crate::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// TYPEMODEL TRAIT
// =============================================================================

/// The type hierarchy the engine merges against.
pub trait TypeModel: Send + Sync + fmt::Debug {
    /// True if `schema` is `ancestor` or inherits from it.
    fn is_a(&self, schema: &str, ancestor: &str) -> bool;

    /// Endpoint property names if `schema` is an edge type.
    fn edge_endpoints(&self, schema: &str) -> Option<EdgeEndpoints>;

    /// True if records of these two types may denote the same entity.
    ///
    /// Holds when one type is an ancestor of the other.
    fn compatible(&self, a: &str, b: &str) -> bool {
        self.is_a(a, b) || self.is_a(b, a)
    }
}

// =============================================================================
// SCHEMA DEFINITIONS
// =============================================================================

/// Source/target property names of an edge type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEndpoints {
    /// Property holding source record ids.
    pub source: String,
    /// Property holding target record ids.
    pub target: String,
}

/// One named type in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
    /// Type name.
    pub name: String,
    /// Direct parents.
    #[serde(default)]
    pub extends: Vec<String>,
    /// Present for edge types.
    #[serde(default)]
    pub edge: Option<EdgeEndpoints>,
}

impl SchemaDef {
    /// A plain entity type.
    #[must_use]
    pub fn entity(name: &str, extends: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            extends: extends.iter().map(|s| (*s).to_string()).collect(),
            edge: None,
        }
    }

    /// An edge type.
    #[must_use]
    pub fn edge(name: &str, extends: &[&str], source: &str, target: &str) -> Self {
        Self {
            edge: Some(EdgeEndpoints {
                source: source.to_string(),
                target: target.to_string(),
            }),
            ..Self::entity(name, extends)
        }
    }
}

// =============================================================================
// SCHEMA MODEL
// =============================================================================

/// A validated type hierarchy with precomputed ancestor sets.
#[derive(Debug, Clone, Default)]
pub struct SchemaModel {
    defs: BTreeMap<String, SchemaDef>,
    ancestors: BTreeMap<String, BTreeSet<String>>,
}

impl SchemaModel {
    /// Build a model, checking that every parent is defined and that the
    /// hierarchy is acyclic.
    pub fn new(defs: impl IntoIterator<Item = SchemaDef>) -> Result<Self, GraphError> {
        let mut map = BTreeMap::new();
        for def in defs {
            if def.name.is_empty() {
                return Err(GraphError::InvalidSchema("empty schema name".to_string()));
            }
            if map.contains_key(&def.name) {
                return Err(GraphError::InvalidSchema(format!(
                    "schema {} defined twice",
                    def.name
                )));
            }
            map.insert(def.name.clone(), def);
        }

        for def in map.values() {
            if let Some(parent) = def.extends.iter().find(|p| !map.contains_key(*p)) {
                return Err(GraphError::InvalidSchema(format!(
                    "schema {} extends unknown schema {parent}",
                    def.name
                )));
            }
        }

        let mut ancestors = BTreeMap::new();
        for name in map.keys() {
            let mut seen = BTreeSet::new();
            let mut stack: Vec<&str> = map
                .get(name)
                .map(|d| d.extends.iter().map(String::as_str).collect())
                .unwrap_or_default();
            while let Some(current) = stack.pop() {
                if current == name {
                    return Err(GraphError::InvalidSchema(format!(
                        "schema {name} inherits from itself"
                    )));
                }
                if seen.insert(current.to_string())
                    && let Some(def) = map.get(current)
                {
                    stack.extend(def.extends.iter().map(String::as_str));
                }
            }
            ancestors.insert(name.clone(), seen);
        }

        Ok(Self {
            defs: map,
            ancestors,
        })
    }

    /// The stock hierarchy of common investigative entity and link types.
    #[must_use]
    pub fn builtin() -> Self {
        let defs = [
            SchemaDef::entity("Thing", &[]),
            SchemaDef::entity("LegalEntity", &["Thing"]),
            SchemaDef::entity("Person", &["LegalEntity"]),
            SchemaDef::entity("Organization", &["LegalEntity"]),
            SchemaDef::entity("Asset", &["Thing"]),
            SchemaDef::entity("Company", &["Organization", "Asset"]),
            SchemaDef::entity("PublicBody", &["Organization"]),
            SchemaDef::entity("Document", &["Thing"]),
            SchemaDef::entity("Address", &["Thing"]),
            SchemaDef::entity("Interval", &[]),
            SchemaDef::edge("UnknownLink", &["Interval"], "subject", "object"),
            SchemaDef::edge("Ownership", &["Interval"], "owner", "asset"),
            SchemaDef::edge("Directorship", &["Interval"], "director", "organization"),
            SchemaDef::edge("Membership", &["Interval"], "member", "organization"),
            SchemaDef::edge("Employment", &["Interval"], "employer", "employee"),
            SchemaDef::edge("Family", &["Interval"], "person", "relative"),
        ];
        // Static table, covered by `builtin_hierarchy`.
        Self::new(defs).unwrap_or_default()
    }

    /// Look up a schema definition.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SchemaDef> {
        self.defs.get(name)
    }

    /// True if the schema is defined.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Number of defined schemata.
    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// True if no schema is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Definitions in name order.
    pub fn defs(&self) -> impl Iterator<Item = &SchemaDef> {
        self.defs.values()
    }
}

impl TypeModel for SchemaModel {
    fn is_a(&self, schema: &str, ancestor: &str) -> bool {
        schema == ancestor
            || self
                .ancestors
                .get(schema)
                .is_some_and(|set| set.contains(ancestor))
    }

    fn edge_endpoints(&self, schema: &str) -> Option<EdgeEndpoints> {
        self.defs.get(schema).and_then(|d| d.edge.clone())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_hierarchy() {
        let model = SchemaModel::builtin();
        assert!(!model.is_empty());
        assert!(model.is_a("Company", "Thing"));
        assert!(model.is_a("Company", "Asset"));
        assert!(model.is_a("Person", "LegalEntity"));
        assert!(!model.is_a("Person", "Organization"));
        assert!(!model.is_a("Ownership", "Thing"));
    }

    #[test]
    fn compatible_is_symmetric_ancestry() {
        let model = SchemaModel::builtin();
        assert!(model.compatible("Thing", "Person"));
        assert!(model.compatible("Person", "Thing"));
        assert!(model.compatible("LegalEntity", "Company"));
        assert!(!model.compatible("Person", "Company"));
        assert!(!model.compatible("Person", "Ownership"));
    }

    #[test]
    fn edge_endpoints_only_for_edge_types() {
        let model = SchemaModel::builtin();
        let endpoints = model.edge_endpoints("Ownership").expect("edge type");
        assert_eq!(endpoints.source, "owner");
        assert_eq!(endpoints.target, "asset");
        assert!(model.edge_endpoints("Person").is_none());
        assert!(model.edge_endpoints("Unknown").is_none());
    }

    #[test]
    fn unknown_parent_rejected() {
        let result = SchemaModel::new([SchemaDef::entity("Person", &["Nobody"])]);
        assert!(matches!(result, Err(GraphError::InvalidSchema(_))));
    }

    #[test]
    fn cycle_rejected() {
        let result = SchemaModel::new([
            SchemaDef::entity("A", &["B"]),
            SchemaDef::entity("B", &["A"]),
        ]);
        assert!(matches!(result, Err(GraphError::InvalidSchema(_))));
    }

    #[test]
    fn duplicate_rejected() {
        let result = SchemaModel::new([SchemaDef::entity("A", &[]), SchemaDef::entity("A", &[])]);
        assert!(matches!(result, Err(GraphError::InvalidSchema(_))));
    }
}
