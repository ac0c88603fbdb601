//! # Record Source
//!
//! Resolves placeholders by fetching the real records from a directory of
//! `<record id>.json` files.
//!
//! Fetching fans out over a tokio `JoinSet`, bounded by a semaphore. The
//! graph is never touched from a task: results come back in request order
//! and [`apply`] folds them into the graph on the calling task, inside one
//! change-tracking session.

use crate::error::AppError;
use entigraph_core::{
    CanonicalGraph, Changes, GraphError, Ingestor, RawRecord, RecordId, track,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Maximum size of one record file (16 MB).
const MAX_RECORD_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// What a fetch produced for one id.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// The record was found and parsed.
    Found(RawRecord),
    /// The source has no record under this id.
    Missing,
    /// The record exists but could not be read or parsed.
    Failed(String),
}

/// One id and its fetch outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub id: RecordId,
    pub outcome: Fetched,
}

/// Counters for one enrichment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    pub requested: usize,
    pub applied: usize,
    pub missing: usize,
    pub failed: usize,
    pub rejected: usize,
}

/// A directory of JSON record files.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    concurrency: usize,
}

impl DirectorySource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            root: root.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// File holding `id`, or `None` if the id cannot be a plain file name.
    pub fn path_for(&self, id: &RecordId) -> Option<PathBuf> {
        let name = id.as_str();
        let unsafe_name = name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\', '\0']);
        if unsafe_name {
            return None;
        }
        Some(self.root.join(format!("{name}.json")))
    }

    /// Fetch every id concurrently. Results keep the order of `ids`.
    ///
    /// A failed fetch is reported in its result and never aborts the rest.
    pub async fn fetch_all(&self, ids: Vec<RecordId>) -> Result<Vec<FetchResult>, AppError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, id) in ids.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let path = self.path_for(&id);
            tasks.spawn(async move {
                let outcome = match path {
                    None => Fetched::Failed("record id is not a valid file name".to_string()),
                    Some(path) => match semaphore.acquire().await {
                        Ok(_permit) => fetch_one(&path, &id).await,
                        Err(e) => Fetched::Failed(e.to_string()),
                    },
                };
                (index, FetchResult { id, outcome })
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.map_err(|e| AppError::Task(e.to_string()))?);
        }
        results.sort_by_key(|(index, _)| *index);
        debug!(fetched = results.len(), "fetch batch complete");
        Ok(results.into_iter().map(|(_, result)| result).collect())
    }
}

async fn fetch_one(path: &Path, id: &RecordId) -> Fetched {
    match tokio::fs::metadata(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Fetched::Missing,
        Err(e) => return Fetched::Failed(e.to_string()),
        Ok(meta) if meta.len() > MAX_RECORD_FILE_SIZE => {
            return Fetched::Failed(format!(
                "file size {} bytes exceeds maximum allowed {MAX_RECORD_FILE_SIZE} bytes",
                meta.len()
            ));
        }
        Ok(_) => {}
    }

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => return Fetched::Failed(e.to_string()),
    };
    match serde_json::from_slice::<RawRecord>(&bytes) {
        Ok(raw) if raw.id == id.as_str() => Fetched::Found(raw),
        Ok(raw) => Fetched::Failed(format!("file holds record {} instead", raw.id)),
        Err(e) => Fetched::Failed(e.to_string()),
    }
}

/// Apply fetch results to the graph serially, recording every change.
///
/// Records the graph refuses (invalid, or incompatible with what their
/// placeholder was already merged with) are counted and skipped.
pub fn apply(
    graph: &mut CanonicalGraph,
    results: &[FetchResult],
) -> Result<(EnrichReport, Changes), AppError> {
    let mut report = EnrichReport {
        requested: results.len(),
        ..EnrichReport::default()
    };

    let ((), changes) = track(graph, |session| {
        for result in results {
            match &result.outcome {
                Fetched::Found(raw) => match Ingestor::ingest_record(session, raw) {
                    Ok(_) => report.applied += 1,
                    Err(
                        e @ (GraphError::InvalidRecord(_)
                        | GraphError::IncompatibleMerge { .. }
                        | GraphError::DanglingEndpoint { .. }),
                    ) => {
                        warn!(record = %result.id, error = %e, "skipped fetched record");
                        report.rejected += 1;
                    }
                    Err(e) => return Err(e),
                },
                Fetched::Missing => report.missing += 1,
                Fetched::Failed(reason) => {
                    warn!(record = %result.id, reason = %reason, "fetch failed");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    })?;

    info!(
        requested = report.requested,
        applied = report.applied,
        missing = report.missing,
        failed = report.failed,
        rejected = report.rejected,
        "enrichment applied"
    );
    Ok((report, changes))
}

// =============================================================================
// TESTS
// =============================================================================
