//! Event type and error-log constants for migration runs.
//!
//! Used by the worker when publishing run snapshots on the event bus and
//! when writing rows to the `errors` table.

/// A run's status, progress or error changed. Payload is the full run snapshot.
pub const EVENT_MIGRATION_RUN_CHANGED: &str = "migration_run.changed";

/// Source entity kind attached to run events.
pub const ENTITY_MIGRATION_RUN: &str = "migration_run";

// ---------------------------------------------------------------------------
// Error log
// ---------------------------------------------------------------------------

pub const SEVERITY_ERROR: &str = "error";
pub const SEVERITY_WARNING: &str = "warning";

/// The run coordinator.
pub const SOURCE_RUNNER: &str = "runner";

/// Orphan recovery at boot.
pub const SOURCE_RECOVERY: &str = "recovery";

/// The schedule driver.
pub const SOURCE_SCHEDULER: &str = "scheduler";

/// Error written to runs reclaimed by orphan recovery.
pub const ORPHANED_RUN_ERROR: &str =
    "Run was interrupted because its worker process stopped; a resume run was started";
