//! # Persistence Format
//!
//! Binary serialization for canonical graphs.
//!
//! File I/O operations are in the app layer and the redb snapshot store.
//!
//! Format: Header (5 bytes) + postcard-serialized graph data.
//! - 4 bytes: Magic ("EGRF")
//! - 1 byte: Version
//!
//! The payload carries every merge group with its parts and tags plus the
//! edge list. On load the lookup table and edges are re-derived from the
//! groups, and the stored edge list must agree with the result.
//!
//! ## Limits
//!
//! Size and header are validated before the payload is decoded.

use crate::graph::{CanonicalGraph, GraphConfig};
use crate::primitives::{self, MAX_SNAPSHOT_BYTES};
use crate::schema::TypeModel;
use crate::{CanonicalEdge, CanonicalNode, GraphError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Minimum valid file size (header only).
const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all graph data.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Create a new header with current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    /// Validate the header.
    pub fn validate(&self) -> Result<(), GraphError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(GraphError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(GraphError::SerializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Write header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let [a, b, c, d] = self.magic;
        [a, b, c, d, self.version]
    }

    /// Read header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GraphError> {
        match bytes {
            [a, b, c, d, version, ..] => Ok(Self {
                magic: [*a, *b, *c, *d],
                version: *version,
            }),
            _ => Err(GraphError::SerializationError(
                "Header too short".to_string(),
            )),
        }
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZABLE GRAPH
// =============================================================================

/// Owned, order-stable form of a canonical graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableGraph {
    /// Every merge group in canonical id order.
    pub groups: Vec<CanonicalNode>,
    /// Every edge in (source, target, key) order.
    pub edges: Vec<CanonicalEdge>,
}

impl From<&CanonicalGraph> for SerializableGraph {
    fn from(graph: &CanonicalGraph) -> Self {
        Self {
            groups: graph.store().groups().cloned().collect(),
            edges: graph.edges().cloned().collect(),
        }
    }
}

impl SerializableGraph {
    /// Rebuild a live graph, checking the stored edges against the records.
    pub fn into_graph(
        self,
        model: Arc<dyn TypeModel>,
        config: GraphConfig,
    ) -> Result<CanonicalGraph, GraphError> {
        let graph = CanonicalGraph::from_groups(self.groups, model, config)?;
        if !graph.edges().eq(self.edges.iter()) {
            return Err(GraphError::SerializationError(
                "stored edges do not match the stored edge records".to_string(),
            ));
        }
        Ok(graph)
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a graph to bytes (header + payload).
///
/// This is a pure transformation - no file I/O.
pub fn graph_to_bytes(graph: &CanonicalGraph) -> Result<Vec<u8>, GraphError> {
    let header = PersistenceHeader::new();
    let serializable = SerializableGraph::from(graph);

    let payload = postcard::to_stdvec(&serializable)
        .map_err(|e| GraphError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&header.to_bytes());
    result.extend_from_slice(&payload);

    Ok(result)
}

/// Deserialize a graph from bytes.
///
/// This is a pure transformation - no file I/O. Size and header are checked
/// before the payload is decoded.
pub fn graph_from_bytes(
    bytes: &[u8],
    model: Arc<dyn TypeModel>,
    config: GraphConfig,
) -> Result<CanonicalGraph, GraphError> {
    if bytes.len() > MAX_SNAPSHOT_BYTES {
        return Err(GraphError::SerializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_BYTES
        )));
    }

    let header = PersistenceHeader::from_bytes(bytes)?;
    header.validate()?;

    let payload = bytes.get(HEADER_SIZE..).unwrap_or_default();
    let serializable: SerializableGraph = postcard::from_bytes(payload).map_err(|e| {
        GraphError::SerializationError(format!("Failed to deserialize graph data: {}", e))
    })?;

    serializable.into_graph(model, config)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityGraph;
    use crate::schema::SchemaModel;
    use crate::{EdgeRecord, RecordCore, RecordId};

    fn model() -> Arc<dyn TypeModel> {
        Arc::new(SchemaModel::builtin())
    }

    fn sample() -> CanonicalGraph {
        let mut graph = CanonicalGraph::new();
        graph
            .add_node(RecordCore::new("a", "Person").with_property("name", "Ann"))
            .expect("a");
        graph.add_node(RecordCore::new("b", "Person")).expect("b");
        let core = RecordCore::new("e", "UnknownLink")
            .with_property("subject", "a")
            .with_property("object", "c");
        graph
            .add_edge(EdgeRecord::new(core, "subject", "object"))
            .expect("edge");
        graph
            .merge_records(&[RecordId::from("a"), RecordId::from("b")])
            .expect("merge");
        graph.set_tag(&RecordId::from("a"), "seen", true).expect("tag");
        graph
    }

    #[test]
    fn header_roundtrip() {
        let header = PersistenceHeader::new();
        let bytes = header.to_bytes();
        let restored = PersistenceHeader::from_bytes(&bytes).expect("parse header");

        assert_eq!(restored.magic, *primitives::MAGIC_BYTES);
        assert_eq!(restored.version, primitives::FORMAT_VERSION);
    }

    #[test]
    fn bytes_roundtrip_bit_exact() {
        let graph = sample();

        let bytes1 = graph_to_bytes(&graph).expect("first serialize");
        let restored =
            graph_from_bytes(&bytes1, model(), GraphConfig::default()).expect("deserialize");
        let bytes2 = graph_to_bytes(&restored).expect("second serialize");

        assert_eq!(
            bytes1, bytes2,
            "save -> load -> save must produce identical bytes"
        );
        assert_eq!(restored.stats(), graph.stats());
        assert_eq!(restored.pending_stubs(), vec![RecordId::from("c")]);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = vec![0u8; 10];
        bytes[0..4].copy_from_slice(b"XXXX");

        let result = graph_from_bytes(&bytes, model(), GraphConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn short_input_rejected() {
        let result = graph_from_bytes(b"EGR", model(), GraphConfig::default());
        assert!(matches!(result, Err(GraphError::SerializationError(_))));
    }

    #[test]
    fn tampered_edges_rejected() {
        let mut serializable = SerializableGraph::from(&sample());
        serializable.edges.clear();
        assert!(serializable
            .into_graph(model(), GraphConfig::default())
            .is_err());
    }
}
