//! Migration run rows and the snapshot published on every change.

use ferry_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::{MigrationRunStatus, StatusId};

/// Metadata key holding the boot id of the process that owns the run.
pub const METADATA_INSTANCE_ID: &str = "instanceId";

/// A row from the `migration_runs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MigrationRun {
    pub id: DbId,
    pub migration_id: DbId,
    pub status_id: StatusId,
    /// One percentage per pipeline position.
    pub progress: Vec<i16>,
    pub trigger: String,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub pid: Option<i32>,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MigrationRun {
    pub fn status(&self) -> Option<MigrationRunStatus> {
        MigrationRunStatus::from_id(self.status_id)
    }

    /// Boot id of the process that created the run.
    pub fn instance_id(&self) -> Option<&str> {
        self.metadata.get(METADATA_INSTANCE_ID)?.as_str()
    }

    /// Event payload for `migration_run.changed`.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "migrationId": self.migration_id,
            "status": self.status().map(MigrationRunStatus::as_str).unwrap_or("unknown"),
            "progress": self.progress,
            "trigger": self.trigger,
            "error": self.error,
            "startedAt": self.started_at,
            "finishedAt": self.finished_at,
        })
    }
}

/// DTO for creating a pending run.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMigrationRun {
    pub migration_id: DbId,
    pub trigger: String,
    pub metadata: serde_json::Value,
    pub pid: Option<i32>,
    /// Number of progress slots, one per pipeline position.
    pub progress_slots: i32,
}
