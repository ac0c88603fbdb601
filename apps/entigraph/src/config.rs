//! # Configuration
//!
//! `entigraph.toml` holds everything that is not a per-command flag:
//!
//! ```toml
//! [graph]
//! stub_policy = "create_stub"   # or "reject"
//! stub_schema = "Thing"
//!
//! [enrich]
//! concurrency = 8
//! source_dir = "records/"
//!
//! # Optional: replaces the built-in type model entirely.
//! [[schema]]
//! name = "Thing"
//!
//! [[schema]]
//! name = "Link"
//! extends = ["Thing"]
//! edge = { source = "from", target = "to" }
//! ```
//!
//! A missing file means defaults.

use crate::error::AppError;
use entigraph_core::{GraphConfig, SchemaDef, SchemaModel, TypeModel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default number of concurrent record fetches.
pub const DEFAULT_ENRICH_CONCURRENCY: usize = 8;

/// Upper bound on concurrent record fetches.
pub const MAX_ENRICH_CONCURRENCY: usize = 256;

/// Enrichment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnrichConfig {
    /// Fetches in flight at once.
    pub concurrency: usize,
    /// Directory holding `<record id>.json` files.
    pub source_dir: Option<PathBuf>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_ENRICH_CONCURRENCY,
            source_dir: None,
        }
    }
}

/// Contents of `entigraph.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub graph: GraphConfig,
    pub schema: Vec<SchemaDef>,
    pub enrich: EnrichConfig,
}

impl AppConfig {
    /// Load from `path`, or defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::parse(&text)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let config: Self = toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))?;
        if config.enrich.concurrency == 0 || config.enrich.concurrency > MAX_ENRICH_CONCURRENCY {
            return Err(AppError::Config(format!(
                "enrich.concurrency must be between 1 and {MAX_ENRICH_CONCURRENCY}"
            )));
        }
        if config.graph.stub_schema.is_empty() {
            return Err(AppError::Config("graph.stub_schema is empty".to_string()));
        }
        Ok(config)
    }

    /// The type model: the configured schemas, or the built-in hierarchy.
    pub fn model(&self) -> Result<Arc<dyn TypeModel>, AppError> {
        if self.schema.is_empty() {
            return Ok(Arc::new(SchemaModel::builtin()));
        }
        let model = SchemaModel::new(self.schema.iter().cloned())?;
        if !model.contains(&self.graph.stub_schema) {
            return Err(AppError::Config(format!(
                "stub schema '{}' is not defined",
                self.graph.stub_schema
            )));
        }
        Ok(Arc::new(model))
    }
}

// =============================================================================
// TESTS
// =============================================================================
