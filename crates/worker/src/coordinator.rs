//! Migration run coordinator.
//!
//! Owns the lifecycle of every run this process drives: creates the
//! pending row, marks it running, feeds the fetch-config pipeline in a
//! spawned task, records progress per pipeline position and converts the
//! outcome into a terminal status. It is the only place stage errors turn
//! into run status and error-log entries.
//!
//! Cancellation is cooperative and checked between pipeline yields only,
//! either through the run's token (set by [`RunCoordinator::stop`] or
//! process shutdown) or through the persisted status no longer being
//! `running`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use ferry_core::dataset::FetchConfigResult;
use ferry_core::error::CoreError;
use ferry_core::fetch_config::FetchConfig;
use ferry_core::params::{resolve_params, Param};
use ferry_core::run_events::{
    ENTITY_MIGRATION_RUN, EVENT_MIGRATION_RUN_CHANGED, SEVERITY_ERROR, SOURCE_RUNNER,
};
use ferry_core::run_lifecycle::{clamp_progress, summarize_error, RunTrigger};
use ferry_core::save_mapping::SaveMapping;
use ferry_core::types::DbId;
use ferry_db::models::error_log::CreateErrorLog;
use ferry_db::models::migration_run::{CreateMigrationRun, MigrationRun};
use ferry_db::RunStore;
use ferry_events::{DomainEvent, EventBus};
use ferry_pipeline::{
    execute_traced, referenced_data_sources, SaveWriter, SourceConnection, StageContext,
};
use ferry_sql::SqlAdapter;

use crate::error::CoordinatorError;
use crate::process::ProcessContext;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// How a driven run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Summarized error message, as stored on the run row.
    Failed(String),
    Canceled,
    /// Process shutdown stopped the run; the row stays `running` for
    /// orphan recovery on the next boot.
    Interrupted,
}

/// A run that has been created and handed to its driver task.
#[derive(Debug)]
pub struct StartedRun {
    /// The row as created (still `pending`).
    pub run: MigrationRun,
    task: JoinHandle<RunOutcome>,
}

impl StartedRun {
    /// Wait for the driver to finish.
    pub async fn outcome(self) -> Result<RunOutcome, CoordinatorError> {
        self.task
            .await
            .map_err(|e| CoreError::Internal(format!("Run driver task failed: {e}")).into())
    }
}

/// A run currently driven by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRun {
    pub run_id: DbId,
    pub migration_id: DbId,
}

// ---------------------------------------------------------------------------
// RunCoordinator
// ---------------------------------------------------------------------------

/// Per-migration slot; `run_id` is `None` while the row is being created.
struct Slot {
    run_id: Option<DbId>,
    cancel: CancellationToken,
}

/// Everything the driver task needs, parsed up front.
struct RunPlan {
    configs: Vec<FetchConfig>,
    mappings: Vec<SaveMapping>,
    params: Vec<Param>,
}

pub struct RunCoordinator {
    store: Arc<dyn RunStore>,
    adapter: Arc<dyn SqlAdapter>,
    events: Arc<EventBus>,
    process: ProcessContext,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    /// Keyed by migration id.
    slots: Mutex<HashMap<DbId, Slot>>,
}

impl RunCoordinator {
    /// `shutdown` is the process token; every run's token is a child of it.
    pub fn new(
        store: Arc<dyn RunStore>,
        adapter: Arc<dyn SqlAdapter>,
        events: Arc<EventBus>,
        process: ProcessContext,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            adapter,
            events,
            process,
            shutdown,
            tasks: TaskTracker::new(),
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn process(&self) -> &ProcessContext {
        &self.process
    }

    /// Create a run for `migration_id` and start driving it in the background.
    ///
    /// Refuses inactive migrations and migrations this process is already
    /// running.
    pub async fn start(
        self: &Arc<Self>,
        migration_id: DbId,
        trigger: RunTrigger,
    ) -> Result<StartedRun, CoordinatorError> {
        let migration = self
            .store
            .find_migration(migration_id)
            .await?
            .ok_or(CoordinatorError::NotFound {
                entity: "Migration",
                id: migration_id,
            })?;
        if !migration.is_active {
            return Err(CoordinatorError::Inactive(migration_id));
        }

        let plan = RunPlan {
            configs: migration.parsed_fetch_configs()?,
            mappings: migration.parsed_save_mappings()?,
            params: migration.parsed_params()?,
        };

        let cancel = self.reserve(migration_id)?;
        let input = CreateMigrationRun {
            migration_id,
            trigger: trigger.as_str().to_string(),
            metadata: self.process.run_metadata(),
            pid: self.process.pid_column(),
            progress_slots: plan.configs.len() as i32,
        };
        let run = match self.store.create_run(&input).await {
            Ok(run) => run,
            Err(e) => {
                self.release(migration_id);
                return Err(e.into());
            }
        };
        self.assign(migration_id, run.id);

        tracing::info!(
            run_id = run.id,
            migration_id,
            trigger = trigger.as_str(),
            stages = plan.configs.len(),
            "Migration run created",
        );
        self.events.publish(changed_event(&run));

        let coordinator = Arc::clone(self);
        let driven = run.clone();
        let task = self
            .tasks
            .spawn(async move { coordinator.drive(driven, plan, cancel).await });

        Ok(StartedRun { run, task })
    }

    /// Start a run and wait until it finishes.
    pub async fn run_to_completion(
        self: &Arc<Self>,
        migration_id: DbId,
        trigger: RunTrigger,
    ) -> Result<(DbId, RunOutcome), CoordinatorError> {
        let started = self.start(migration_id, trigger).await?;
        let run_id = started.run.id;
        Ok((run_id, started.outcome().await?))
    }

    /// Cancel a pending or running run.
    ///
    /// Returns `false` if the run had already finished. The driver notices
    /// at its next yield.
    pub async fn stop(&self, run_id: DbId) -> Result<bool, CoordinatorError> {
        let canceled = self.store.cancel_run(run_id).await?;
        if let Some(token) = self.token_for(run_id) {
            token.cancel();
        }
        if canceled {
            tracing::info!(run_id, "Migration run canceled");
            self.publish_run(run_id).await;
        } else {
            tracing::debug!(run_id, "Stop requested for a run that is not active");
        }
        Ok(canceled)
    }

    /// Runs currently driven by this process.
    pub fn active_runs(&self) -> Vec<ActiveRun> {
        let slots = self.lock_slots();
        let mut runs: Vec<ActiveRun> = slots
            .iter()
            .filter_map(|(&migration_id, slot)| {
                slot.run_id.map(|run_id| ActiveRun {
                    run_id,
                    migration_id,
                })
            })
            .collect();
        runs.sort_by_key(|r| r.run_id);
        runs
    }

    /// Whether this process is driving a run of `migration_id`.
    pub fn is_running(&self, migration_id: DbId) -> bool {
        self.lock_slots().contains_key(&migration_id)
    }

    /// Publish the current snapshot of a run.
    pub async fn publish_run(&self, run_id: DbId) {
        match self.store.find_run(run_id).await {
            Ok(Some(run)) => self.events.publish(changed_event(&run)),
            Ok(None) => tracing::warn!(run_id, "Run vanished before its change could be published"),
            Err(e) => tracing::warn!(run_id, error = %e, "Failed to load run for publishing"),
        }
    }

    /// Wait for in-flight drivers after the process token was cancelled.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tasks.close();
        let drained = tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok();
        if !drained {
            tracing::warn!(remaining = self.tasks.len(), "Run drivers still busy at shutdown");
        }
        drained
    }

    // -----------------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------------

    async fn drive(
        self: Arc<Self>,
        run: MigrationRun,
        plan: RunPlan,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let outcome = match self.drive_stages(&run, plan, &cancel).await {
            Ok(outcome) => outcome,
            Err(failure) => self.fail(&run, failure).await,
        };

        self.release(run.migration_id);
        tracing::info!(
            run_id = run.id,
            migration_id = run.migration_id,
            outcome = ?outcome,
            "Migration run finished"
        );
        outcome
    }

    async fn drive_stages(
        &self,
        run: &MigrationRun,
        plan: RunPlan,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, Failure> {
        if !self.store.mark_running(run.id).await? {
            tracing::info!(run_id = run.id, "Run was canceled before it started");
            return Ok(RunOutcome::Canceled);
        }
        self.publish_run(run.id).await;

        let ctx = self.stage_context(&plan).await?;
        let priors = initial_priors(&plan.params, &ctx)?;
        let writer = SaveWriter::new(plan.mappings);
        let mut progress = vec![0i16; plan.configs.len()];
        let mut stream = execute_traced(plan.configs, priors, ctx.clone());

        loop {
            if cancel.is_cancelled() {
                return Ok(self.interrupted());
            }
            let Some(item) = stream.next().await else {
                break;
            };
            let step = item?;

            if !writer.is_empty() {
                let written = writer.write(&step.result, &ctx).await?;
                tracing::debug!(run_id = run.id, rows = written, "Saved final result");
            }

            for (slot, value) in progress.iter_mut().zip(&step.path_progress) {
                *slot = clamp_progress(i64::from(*value));
            }
            if !self.store.update_progress(run.id, &progress).await? {
                tracing::info!(run_id = run.id, "Run is no longer running; stopping driver");
                return Ok(RunOutcome::Canceled);
            }
            self.publish_run(run.id).await;
        }

        if cancel.is_cancelled() {
            return Ok(self.interrupted());
        }
        if self.store.complete_run(run.id).await? {
            self.publish_run(run.id).await;
            Ok(RunOutcome::Success)
        } else {
            Ok(RunOutcome::Canceled)
        }
    }

    /// Token fired: either `stop` canceled the row, or the process is
    /// shutting down and the row is left for recovery.
    fn interrupted(&self) -> RunOutcome {
        if self.shutdown.is_cancelled() {
            RunOutcome::Interrupted
        } else {
            RunOutcome::Canceled
        }
    }

    async fn stage_context(&self, plan: &RunPlan) -> Result<StageContext, Failure> {
        let ids = referenced_data_sources(&plan.configs, &plan.mappings);
        let mut sources = HashMap::with_capacity(ids.len());
        if !ids.is_empty() {
            for data_source in self.store.find_data_sources(&ids).await? {
                let (backend, config) = data_source.connection()?;
                sources.insert(data_source.id, SourceConnection { backend, config });
            }
        }
        Ok(StageContext::new(Arc::clone(&self.adapter), sources, Utc::now()))
    }

    /// Mark the run failed and write the error log entry.
    async fn fail(&self, run: &MigrationRun, failure: Failure) -> RunOutcome {
        let summary = summarize_error(&failure.message);
        tracing::error!(
            run_id = run.id,
            migration_id = run.migration_id,
            error = %failure.message,
            "Migration run failed",
        );

        match self.store.fail_run(run.id, &summary).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(run_id = run.id, "Run already finished; failure not recorded");
            }
            Err(e) => tracing::error!(run_id = run.id, error = %e, "Failed to mark run as failed"),
        }

        let entry = CreateErrorLog {
            severity: SEVERITY_ERROR.to_string(),
            source: SOURCE_RUNNER.to_string(),
            trigger: Some(run.trigger.clone()),
            message: summary.clone(),
            stack: Some(failure.detail),
            migration_id: Some(run.migration_id),
            run_id: Some(run.id),
        };
        if let Err(e) = self.store.log_error(&entry).await {
            tracing::error!(run_id = run.id, error = %e, "Failed to write error log entry");
        }

        self.publish_run(run.id).await;
        RunOutcome::Failed(summary)
    }

    // -----------------------------------------------------------------------
    // Slots
    // -----------------------------------------------------------------------

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<DbId, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reserve(&self, migration_id: DbId) -> Result<CancellationToken, CoordinatorError> {
        let mut slots = self.lock_slots();
        if slots.contains_key(&migration_id) {
            return Err(CoordinatorError::AlreadyRunning(migration_id));
        }
        let cancel = self.shutdown.child_token();
        slots.insert(
            migration_id,
            Slot {
                run_id: None,
                cancel: cancel.clone(),
            },
        );
        Ok(cancel)
    }

    fn assign(&self, migration_id: DbId, run_id: DbId) {
        if let Some(slot) = self.lock_slots().get_mut(&migration_id) {
            slot.run_id = Some(run_id);
        }
    }

    fn release(&self, migration_id: DbId) {
        self.lock_slots().remove(&migration_id);
    }

    fn token_for(&self, run_id: DbId) -> Option<CancellationToken> {
        self.lock_slots()
            .values()
            .find(|slot| slot.run_id == Some(run_id))
            .map(|slot| slot.cancel.clone())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A failure inside a run: display text for the row, debug text for the log.
struct Failure {
    message: String,
    detail: String,
}

impl<E: std::error::Error> From<E> for Failure {
    fn from(err: E) -> Self {
        Self {
            message: err.to_string(),
            detail: format!("{err:?}"),
        }
    }
}

/// Migration-level params become a leading `params` result.
fn initial_priors(
    params: &[Param],
    ctx: &StageContext,
) -> Result<Vec<FetchConfigResult>, CoreError> {
    if params.is_empty() {
        return Ok(Vec::new());
    }
    let data = resolve_params(params, ctx.now)?;
    Ok(vec![FetchConfigResult::Params { data }])
}

fn changed_event(run: &MigrationRun) -> DomainEvent {
    DomainEvent::new(EVENT_MIGRATION_RUN_CHANGED)
        .with_source(ENTITY_MIGRATION_RUN, run.id)
        .with_payload(run.snapshot())
}
