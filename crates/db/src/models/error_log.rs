//! Structured failure records in the `errors` table.

use ferry_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `errors` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ErrorLog {
    pub id: DbId,
    pub severity: String,
    pub source: String,
    pub trigger: Option<String>,
    pub message: String,
    pub stack: Option<String>,
    pub migration_id: Option<DbId>,
    pub run_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for recording a failure.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateErrorLog {
    pub severity: String,
    pub source: String,
    pub trigger: Option<String>,
    pub message: String,
    pub stack: Option<String>,
    pub migration_id: Option<DbId>,
    pub run_id: Option<DbId>,
}
