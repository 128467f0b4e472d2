//! Orphan-run recovery at boot.
//!
//! A run left `running` by a process that is gone will never finish on its
//! own. Any `running` row whose stored instance id is not this process's is
//! failed and a fresh `resume` run of the same migration is started.
//! Resume failures are recorded but never retried.

use std::sync::Arc;

use tokio::task::JoinHandle;

use ferry_core::run_events::{ORPHANED_RUN_ERROR, SEVERITY_WARNING, SOURCE_RECOVERY};
use ferry_core::run_lifecycle::RunTrigger;
use ferry_db::models::error_log::CreateErrorLog;
use ferry_db::models::migration_run::MigrationRun;
use ferry_db::RunStore;

use crate::coordinator::RunCoordinator;
use crate::error::CoordinatorError;

/// Counts from one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `running` rows looked at.
    pub examined: usize,
    /// Rows owned by another process and failed by this pass.
    pub orphaned: usize,
    pub resumed: usize,
    /// Orphans whose resume run could not be started.
    pub failed: usize,
}

pub struct OrphanRecovery {
    store: Arc<dyn RunStore>,
    coordinator: Arc<RunCoordinator>,
}

impl OrphanRecovery {
    pub fn new(store: Arc<dyn RunStore>, coordinator: Arc<RunCoordinator>) -> Self {
        Self { store, coordinator }
    }

    /// Run one pass in the background, logging the report.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            match self.run().await {
                Ok(report) => tracing::info!(
                    examined = report.examined,
                    orphaned = report.orphaned,
                    resumed = report.resumed,
                    failed = report.failed,
                    "Orphan recovery finished",
                ),
                Err(e) => tracing::error!(error = %e, "Orphan recovery failed"),
            }
        })
    }

    pub async fn run(&self) -> Result<RecoveryReport, CoordinatorError> {
        let running = self.store.list_running_runs().await?;
        let mut report = RecoveryReport {
            examined: running.len(),
            ..Default::default()
        };

        let process = self.coordinator.process();
        for run in running {
            if process.owns(run.instance_id()) {
                continue;
            }

            // Another path (a stop, or a second recovering process) got there first.
            if !self.store.fail_run(run.id, ORPHANED_RUN_ERROR).await? {
                continue;
            }
            report.orphaned += 1;
            tracing::warn!(
                run_id = run.id,
                migration_id = run.migration_id,
                instance_id = run.instance_id().unwrap_or("unknown"),
                "Failed orphaned run",
            );
            self.coordinator.publish_run(run.id).await;

            match self.coordinator.start(run.migration_id, RunTrigger::Resume).await {
                Ok(started) => {
                    report.resumed += 1;
                    tracing::info!(
                        orphan_run_id = run.id,
                        run_id = started.run.id,
                        migration_id = run.migration_id,
                        "Resumed orphaned migration",
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    self.record_resume_failure(&run, &e).await;
                }
            }
        }

        Ok(report)
    }

    async fn record_resume_failure(&self, orphan: &MigrationRun, err: &CoordinatorError) {
        tracing::error!(
            run_id = orphan.id,
            migration_id = orphan.migration_id,
            error = %err,
            "Failed to resume orphaned migration",
        );
        let entry = CreateErrorLog {
            severity: SEVERITY_WARNING.to_string(),
            source: SOURCE_RECOVERY.to_string(),
            trigger: Some(RunTrigger::Resume.as_str().to_string()),
            message: format!("Could not resume migration {}: {err}", orphan.migration_id),
            stack: Some(format!("{err:?}")),
            migration_id: Some(orphan.migration_id),
            run_id: Some(orphan.id),
        };
        if let Err(e) = self.store.log_error(&entry).await {
            tracing::error!(run_id = orphan.id, error = %e, "Failed to write recovery error log");
        }
    }
}
