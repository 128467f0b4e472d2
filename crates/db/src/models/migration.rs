//! Migration definitions: the ordered stage list plus how and when it runs.

use ferry_core::error::CoreError;
use ferry_core::fetch_config::{parse_fetch_configs, FetchConfig};
use ferry_core::params::Param;
use ferry_core::save_mapping::{parse_save_mappings, SaveMapping};
use ferry_core::schedule::Schedule;
use ferry_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `migrations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Migration {
    pub id: DbId,
    pub name: String,
    pub is_active: bool,
    pub fetch_configs: serde_json::Value,
    pub save_mappings: serde_json::Value,
    pub params: serde_json::Value,
    pub cron_expression: Option<String>,
    pub created_by: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Migration {
    pub fn parsed_fetch_configs(&self) -> Result<Vec<FetchConfig>, CoreError> {
        parse_fetch_configs(&self.fetch_configs)
    }

    pub fn parsed_save_mappings(&self) -> Result<Vec<SaveMapping>, CoreError> {
        parse_save_mappings(&self.save_mappings)
    }

    /// Migration-level params, resolved before the first stage runs.
    pub fn parsed_params(&self) -> Result<Vec<Param>, CoreError> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| CoreError::Validation(format!("Invalid migration params: {e}")))
    }

    /// The schedule, if one is configured. Blank expressions count as none.
    pub fn schedule(&self) -> Result<Option<Schedule>, CoreError> {
        match self.cron_expression.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => Schedule::parse(text).map(Some),
        }
    }
}

/// DTO for inserting a migration.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMigration {
    pub name: String,
    pub is_active: Option<bool>,
    pub fetch_configs: serde_json::Value,
    pub save_mappings: Option<serde_json::Value>,
    pub params: Option<serde_json::Value>,
    pub cron_expression: Option<String>,
    pub created_by: Option<DbId>,
}

impl CreateMigration {
    /// Reject definitions the runner could never execute.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("Migration name must not be empty".into()));
        }
        parse_fetch_configs(&self.fetch_configs)?;
        if let Some(mappings) = &self.save_mappings {
            parse_save_mappings(mappings)?;
        }
        if let Some(text) = self.cron_expression.as_deref().filter(|t| !t.trim().is_empty()) {
            Schedule::parse(text)?;
        }
        Ok(())
    }
}
