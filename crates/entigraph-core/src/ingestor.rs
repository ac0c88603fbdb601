//! # Ingestor Module
//!
//! Record validation and ingestion protocol for entigraph.
//!
//! - Validate raw records before graph mutation
//! - Normalise property values to strings
//! - Classify records as plain or edge through the type model
//! - Add plain records before edges so endpoints resolve without placeholders
//!
//! Raw records use the common entity JSON shape:
//! `{"id": "...", "schema": "...", "properties": {"name": ["..."]}}`.
//! Property values may be strings, numbers, booleans, nested entities (their
//! `id` is kept) or arrays of those.

use crate::graph::EntityGraph;
use crate::primitives::{
    CANONICAL_ID_SEPARATOR, MAX_ID_LENGTH, MAX_PROPERTY_LENGTH, MAX_SCHEMA_LENGTH,
    MAX_VALUE_LENGTH, MAX_VALUES_PER_RECORD,
};
use crate::schema::TypeModel;
use crate::{CanonicalId, EdgeRecord, GraphError, Record, RecordCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::BufRead;
use tracing::{debug, warn};

/// A record as read from an external source, before normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Record id.
    pub id: String,
    /// Type name.
    pub schema: String,
    /// Unnormalised property values.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// Outcome of a batch ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Plain records newly stored (or placeholders filled).
    pub nodes_new: usize,
    /// Edge records newly stored.
    pub edges_new: usize,
    /// Records that were already present.
    pub duplicates: usize,
    /// Records refused by validation or the stub policy.
    pub rejected: usize,
}

/// The Ingestor handles record validation and graph ingestion.
pub struct Ingestor;

impl Ingestor {
    /// Validate the identity fields of a raw record.
    pub fn validate(raw: &RawRecord) -> Result<(), GraphError> {
        if raw.id.is_empty() {
            return Err(GraphError::InvalidRecord("empty record id".to_string()));
        }
        if raw.id.len() > MAX_ID_LENGTH {
            return Err(GraphError::InvalidRecord(format!(
                "record id longer than {MAX_ID_LENGTH} bytes"
            )));
        }
        if raw.id.contains(CANONICAL_ID_SEPARATOR) {
            return Err(GraphError::InvalidRecord(format!(
                "record id {:?} contains a NUL byte",
                raw.id
            )));
        }
        if raw.schema.is_empty() || raw.schema.len() > MAX_SCHEMA_LENGTH {
            return Err(GraphError::InvalidRecord(format!(
                "record {} has an invalid schema name",
                raw.id
            )));
        }
        Ok(())
    }

    /// Validate and normalise a raw record into its core fields.
    pub fn normalize(raw: &RawRecord) -> Result<RecordCore, GraphError> {
        Self::validate(raw)?;
        let mut core = RecordCore::new(raw.id.as_str(), raw.schema.as_str());
        let mut count = 0usize;

        for (name, value) in &raw.properties {
            if name.is_empty() || name.len() > MAX_PROPERTY_LENGTH {
                return Err(GraphError::InvalidRecord(format!(
                    "record {} has an invalid property name",
                    raw.id
                )));
            }
            let mut values = Vec::new();
            flatten_value(value, &mut values);
            for v in values {
                if v.len() > MAX_VALUE_LENGTH {
                    return Err(GraphError::InvalidRecord(format!(
                        "record {} property {name} exceeds {MAX_VALUE_LENGTH} bytes",
                        raw.id
                    )));
                }
                count += 1;
                if count > MAX_VALUES_PER_RECORD {
                    return Err(GraphError::InvalidRecord(format!(
                        "record {} has more than {MAX_VALUES_PER_RECORD} values",
                        raw.id
                    )));
                }
                core.add(name.as_str(), v);
            }
        }
        Ok(core)
    }

    /// Turn normalised fields into a plain or edge record.
    #[must_use]
    pub fn classify(core: RecordCore, model: &dyn TypeModel) -> Record {
        match model.edge_endpoints(&core.schema) {
            Some(endpoints) => Record::Edge(EdgeRecord::new(
                core,
                endpoints.source,
                endpoints.target,
            )),
            None => Record::Plain(core),
        }
    }

    /// Validate, normalise and classify in one step.
    pub fn parse(raw: &RawRecord, model: &dyn TypeModel) -> Result<Record, GraphError> {
        Ok(Self::classify(Self::normalize(raw)?, model))
    }

    /// Ingest a single raw record into any entity graph.
    pub fn ingest_record<G: EntityGraph>(
        graph: &mut G,
        raw: &RawRecord,
    ) -> Result<(CanonicalId, bool), GraphError> {
        let record = Self::parse(raw, graph.graph().model())?;
        graph.add_record(record)
    }

    /// Ingest a batch: plain records first, then edges.
    ///
    /// Records that fail validation or hit a strict stub policy are counted
    /// as rejected and skipped. Any other error aborts the batch.
    pub fn ingest_batch<G: EntityGraph>(
        graph: &mut G,
        raws: &[RawRecord],
    ) -> Result<IngestReport, GraphError> {
        let mut report = IngestReport::default();
        let mut plain = Vec::new();
        let mut edges = Vec::new();

        for raw in raws {
            match Self::parse(raw, graph.graph().model()) {
                Ok(Record::Plain(core)) => plain.push(core),
                Ok(Record::Edge(edge)) => edges.push(edge),
                Err(e) => {
                    warn!(record = %raw.id, error = %e, "rejected record");
                    report.rejected += 1;
                }
            }
        }

        for core in plain {
            match graph.add_node(core) {
                Ok((_, true)) => report.nodes_new += 1,
                Ok((_, false)) => report.duplicates += 1,
                Err(e @ (GraphError::InvalidRecord(_) | GraphError::IncompatibleMerge { .. })) => {
                    warn!(error = %e, "rejected record");
                    report.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        for edge in edges {
            match graph.add_edge(edge) {
                Ok(true) => report.edges_new += 1,
                Ok(false) => report.duplicates += 1,
                Err(e @ (GraphError::InvalidRecord(_) | GraphError::DanglingEndpoint { .. })) => {
                    warn!(error = %e, "rejected edge");
                    report.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            nodes_new = report.nodes_new,
            edges_new = report.edges_new,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "ingested batch"
        );
        Ok(report)
    }

    /// Read newline-delimited JSON records. Blank lines are skipped.
    pub fn read_records<R: BufRead>(
        reader: R,
    ) -> impl Iterator<Item = Result<RawRecord, GraphError>> {
        reader
            .lines()
            .enumerate()
            .filter_map(|(index, line)| match line {
                Err(e) => Some(Err(GraphError::IoError(e.to_string()))),
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(serde_json::from_str(&line).map_err(|e| {
                    GraphError::SerializationError(format!("line {}: {e}", index + 1))
                })),
            })
    }
}

/// Append the string forms of a JSON property value.
fn flatten_value(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push(b.to_string()),
        Value::Number(n) => out.push(n.to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten_value(item, out);
            }
        }
        // Nested entity: keep the reference.
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("id") {
                out.push(id.clone());
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
