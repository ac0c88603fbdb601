//! # redb-backed Snapshot Storage
//!
//! A disk-backed store of named graph snapshots using the redb embedded
//! database.
//!
//! Each snapshot is the binary persistence format (header + postcard
//! payload) stored under its name, next to a small stats record so listing
//! does not have to decode whole graphs. Saving a snapshot replaces the
//! previous one of the same name in a single ACID transaction.

use crate::formats::{graph_from_bytes, graph_to_bytes};
use crate::graph::{CanonicalGraph, GraphConfig, GraphStats};
use crate::schema::TypeModel;
use crate::GraphError;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Table for snapshots: name -> serialized graph bytes
const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

/// Table for snapshot stats: name -> postcard-encoded `GraphStats`
const SNAPSHOT_STATS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshot_stats");

fn io_err(e: impl std::fmt::Display) -> GraphError {
    GraphError::IoError(e.to_string())
}

/// Named graph snapshots in one redb file.
pub struct SnapshotStore {
    /// The redb database handle.
    db: Database,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Open or create a snapshot database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(SNAPSHOTS).map_err(io_err)?;
            let _ = write_txn.open_table(SNAPSHOT_STATS).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db })
    }

    /// Store a graph under `name`, replacing any previous snapshot.
    pub fn save(&self, name: &str, graph: &CanonicalGraph) -> Result<(), GraphError> {
        if name.is_empty() {
            return Err(GraphError::InvalidRecord("empty snapshot name".to_string()));
        }
        let bytes = graph_to_bytes(graph)?;
        let stats = postcard::to_stdvec(&graph.stats())
            .map_err(|e| GraphError::SerializationError(e.to_string()))?;

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(SNAPSHOTS).map_err(io_err)?;
            table.insert(name, bytes.as_slice()).map_err(io_err)?;
            let mut table = write_txn.open_table(SNAPSHOT_STATS).map_err(io_err)?;
            table.insert(name, stats.as_slice()).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;

        debug!(snapshot = name, bytes = bytes.len(), "saved snapshot");
        Ok(())
    }

    /// Load the snapshot stored under `name`, if any.
    pub fn load(
        &self,
        name: &str,
        model: Arc<dyn TypeModel>,
        config: GraphConfig,
    ) -> Result<Option<CanonicalGraph>, GraphError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(SNAPSHOTS).map_err(io_err)?;
        let Some(bytes) = table.get(name).map_err(io_err)? else {
            return Ok(None);
        };
        graph_from_bytes(bytes.value(), model, config).map(Some)
    }

    /// True if a snapshot named `name` exists.
    pub fn contains(&self, name: &str) -> Result<bool, GraphError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(SNAPSHOTS).map_err(io_err)?;
        Ok(table.get(name).map_err(io_err)?.is_some())
    }

    /// All snapshot names with their stats, in name order.
    pub fn list(&self) -> Result<Vec<(String, GraphStats)>, GraphError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(SNAPSHOT_STATS).map_err(io_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, value) = entry.map_err(io_err)?;
            let stats: GraphStats = postcard::from_bytes(value.value())
                .map_err(|e| GraphError::SerializationError(e.to_string()))?;
            result.push((key.value().to_string(), stats));
        }
        Ok(result)
    }

    /// Delete a snapshot. Returns whether it existed.
    pub fn remove(&self, name: &str) -> Result<bool, GraphError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let existed = {
            let mut table = write_txn.open_table(SNAPSHOTS).map_err(io_err)?;
            let existed = table.remove(name).map_err(io_err)?.is_some();
            let mut table = write_txn.open_table(SNAPSHOT_STATS).map_err(io_err)?;
            table.remove(name).map_err(io_err)?;
            existed
        };
        write_txn.commit().map_err(io_err)?;
        Ok(existed)
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), GraphError> {
        self.db.compact().map_err(io_err)?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityGraph;
    use crate::schema::SchemaModel;
    use crate::{RecordCore, RecordId};
    use tempfile::tempdir;

    fn model() -> Arc<dyn TypeModel> {
        Arc::new(SchemaModel::builtin())
    }

    fn sample() -> CanonicalGraph {
        let mut graph = CanonicalGraph::new();
        graph.add_node(RecordCore::new("a", "Person")).expect("a");
        graph.add_node(RecordCore::new("b", "Person")).expect("b");
        graph
            .merge_records(&[RecordId::from("a"), RecordId::from("b")])
            .expect("merge");
        graph
    }

    #[test]
    fn save_and_load() {
        let temp = tempdir().expect("temp dir");
        let store = SnapshotStore::open(temp.path().join("test.redb")).expect("open db");

        store.save("main", &sample()).expect("save");
        let loaded = store
            .load("main", model(), GraphConfig::default())
            .expect("load")
            .expect("present");

        assert_eq!(loaded.stats(), sample().stats());
        assert!(store
            .load("missing", model(), GraphConfig::default())
            .expect("load")
            .is_none());
    }

    #[test]
    fn persistence_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("test.redb");

        {
            let store = SnapshotStore::open(&path).expect("open db");
            store.save("main", &sample()).expect("save");
        }

        let store = SnapshotStore::open(&path).expect("reopen db");
        assert!(store.contains("main").expect("contains"));
        let listed = store.list().expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "main");
        assert_eq!(listed[0].1.merged, 1);
    }

    #[test]
    fn save_replaces_and_remove_deletes() {
        let temp = tempdir().expect("temp dir");
        let store = SnapshotStore::open(temp.path().join("test.redb")).expect("open db");

        store.save("g", &CanonicalGraph::new()).expect("save empty");
        store.save("g", &sample()).expect("replace");
        assert_eq!(store.list().expect("list")[0].1.records, 2);

        assert!(store.remove("g").expect("remove"));
        assert!(!store.remove("g").expect("remove again"));
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn empty_name_rejected() {
        let temp = tempdir().expect("temp dir");
        let store = SnapshotStore::open(temp.path().join("test.redb")).expect("open db");
        assert!(store.save("", &sample()).is_err());
    }
}
