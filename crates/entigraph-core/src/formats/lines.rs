//! # Line Format
//!
//! Newline-delimited JSON export of a canonical graph: one record per line,
//! each carrying its canonical grouping id, its tags and its placeholder flag.
//!
//! ```text
//! {"canonical_id":"3f2a...","id":"p1","schema":"Person","properties":{...},"tags":{"seen":true},"pending":false}
//! ```
//!
//! Reading a dump back regroups the lines by canonical id, rebuilds the
//! lookup table from that membership and re-derives edges from the edge
//! records. No merge decision is replayed.

use crate::graph::{CanonicalGraph, GraphConfig};
use crate::ingestor::Ingestor;
use crate::merge::Merger;
use crate::schema::TypeModel;
use crate::{CanonicalId, CanonicalNode, GraphError, Part, Properties, RecordCore, RecordId, Tags};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::sync::Arc;

/// One exported record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    /// Group the record belongs to.
    pub canonical_id: CanonicalId,
    /// Record id.
    pub id: RecordId,
    /// Type name.
    pub schema: String,
    /// Property values.
    #[serde(default)]
    pub properties: Properties,
    /// Part tags.
    #[serde(default)]
    pub tags: Tags,
    /// Placeholder flag.
    #[serde(default)]
    pub pending: bool,
}

impl LineRecord {
    fn from_part(canonical_id: &CanonicalId, part: &Part) -> Self {
        let core = part.record.core();
        Self {
            canonical_id: canonical_id.clone(),
            id: core.id.clone(),
            schema: core.schema.clone(),
            properties: core.properties.clone(),
            tags: part.tags.clone(),
            pending: part.pending,
        }
    }
}

/// Write every part of every group. Returns the number of lines written.
pub fn write_lines<W: Write>(graph: &CanonicalGraph, mut writer: W) -> Result<usize, GraphError> {
    let mut count = 0usize;
    for group in graph.store().groups() {
        for part in &group.parts {
            let line = LineRecord::from_part(&group.id, part);
            serde_json::to_writer(&mut writer, &line)
                .map_err(|e| GraphError::SerializationError(e.to_string()))?;
            writer
                .write_all(b"\n")
                .map_err(|e| GraphError::IoError(e.to_string()))?;
            count += 1;
        }
    }
    writer
        .flush()
        .map_err(|e| GraphError::IoError(e.to_string()))?;
    Ok(count)
}

/// Rebuild a graph from a line dump.
///
/// Fails if a group's canonical id does not match its parts.
pub fn read_lines<R: BufRead>(
    reader: R,
    model: Arc<dyn TypeModel>,
    config: GraphConfig,
) -> Result<CanonicalGraph, GraphError> {
    let mut grouped: BTreeMap<CanonicalId, Vec<Part>> = BTreeMap::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| GraphError::IoError(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LineRecord = serde_json::from_str(&line).map_err(|e| {
            GraphError::SerializationError(format!("line {}: {e}", index + 1))
        })?;
        let core = RecordCore {
            id: entry.id,
            schema: entry.schema,
            properties: entry.properties,
        };
        let part = Part {
            record: Ingestor::classify(core, model.as_ref()),
            tags: entry.tags,
            pending: entry.pending,
        };
        grouped.entry(entry.canonical_id).or_default().push(part);
    }

    let mut groups = Vec::with_capacity(grouped.len());
    for (id, parts) in grouped {
        let derived = Merger::canonical_id(parts.iter().map(Part::id))?;
        if derived != id {
            return Err(GraphError::SerializationError(format!(
                "canonical id {id} does not match its parts (expected {derived})"
            )));
        }
        groups.push(CanonicalNode { id, parts });
    }
    CanonicalGraph::from_groups(groups, model, config)
}

// =============================================================================
// TESTS
// =============================================================================
