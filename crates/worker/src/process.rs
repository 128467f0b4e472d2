//! Identity of this worker process.

use chrono::{DateTime, Utc};
use ferry_db::models::migration_run::METADATA_INSTANCE_ID;
use uuid::Uuid;

/// Built once in `main` and handed to the coordinator, recovery and
/// scheduler. A run whose stored instance id differs from this one was
/// started by another (possibly dead) process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContext {
    pub instance_id: Uuid,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl ProcessContext {
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }

    /// `metadata` stored on every run this process creates.
    pub fn run_metadata(&self) -> serde_json::Value {
        serde_json::json!({ METADATA_INSTANCE_ID: self.instance_id.to_string() })
    }

    /// The pid as stored in `migration_runs.pid`.
    pub fn pid_column(&self) -> Option<i32> {
        i32::try_from(self.pid).ok()
    }

    pub fn owns(&self, instance_id: Option<&str>) -> bool {
        instance_id.and_then(|id| Uuid::parse_str(id).ok()) == Some(self.instance_id)
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new()
    }
}
