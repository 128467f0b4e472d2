//! Source/target database definitions.

use ferry_core::data_source::{BackendType, ConnectionConfig};
use ferry_core::error::CoreError;
use ferry_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `data_sources` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DataSource {
    pub id: DbId,
    pub name: String,
    pub backend: String,
    /// Connection settings; never serialized since it may hold a password.
    #[serde(skip_serializing)]
    pub config: serde_json::Value,
    pub created_by: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl DataSource {
    pub fn backend_type(&self) -> Result<BackendType, CoreError> {
        BackendType::from_str(&self.backend)
    }

    /// Decode the stored config for this backend.
    pub fn connection(&self) -> Result<(BackendType, ConnectionConfig), CoreError> {
        let backend = self.backend_type()?;
        Ok((backend, ConnectionConfig::from_json(backend, &self.config)?))
    }
}

/// DTO for inserting a data source.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDataSource {
    pub name: String,
    pub backend: String,
    pub config: serde_json::Value,
    pub created_by: Option<DbId>,
}

impl CreateDataSource {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("Data source name must not be empty".into()));
        }
        let backend = BackendType::from_str(&self.backend)?;
        ConnectionConfig::from_json(backend, &self.config)?;
        Ok(())
    }
}
