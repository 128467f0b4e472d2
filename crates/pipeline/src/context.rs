//! What a stage executor needs besides its own config.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferry_core::data_source::{BackendType, ConnectionConfig};
use ferry_core::fetch_config::FetchConfig;
use ferry_core::save_mapping::SaveMapping;
use ferry_core::types::DbId;
use ferry_sql::SqlAdapter;

use crate::error::PipelineError;

/// A data source resolved to something the adapter can connect with.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConnection {
    pub backend: BackendType,
    pub config: ConnectionConfig,
}

/// Shared, cheaply cloneable execution context for one run.
#[derive(Clone)]
pub struct StageContext {
    pub adapter: Arc<dyn SqlAdapter>,
    sources: Arc<HashMap<DbId, SourceConnection>>,
    /// Instant that date parameters resolve against.
    pub now: DateTime<Utc>,
}

impl StageContext {
    pub fn new(
        adapter: Arc<dyn SqlAdapter>,
        sources: HashMap<DbId, SourceConnection>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            adapter,
            sources: Arc::new(sources),
            now,
        }
    }

    pub fn source(&self, id: DbId) -> Result<&SourceConnection, PipelineError> {
        self.sources
            .get(&id)
            .ok_or(PipelineError::DataSourceNotFound(id))
    }
}

/// Every data source id a migration touches, sorted and deduplicated.
pub fn referenced_data_sources(configs: &[FetchConfig], mappings: &[SaveMapping]) -> Vec<DbId> {
    configs
        .iter()
        .filter_map(FetchConfig::data_source_id)
        .chain(mappings.iter().map(|m| m.data_source_id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
