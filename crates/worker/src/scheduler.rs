//! Schedule (cron) driver.
//!
//! Keeps one entry per scheduled migration with its next fire instant.
//! Every tick, due entries start a `cron` run unless the migration already
//! has one `running`; a skipped fire is dropped, not queued. Definitions
//! are reloaded from the store periodically and can be pushed in directly
//! with [`Scheduler::upsert`] / [`Scheduler::remove`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio_util::sync::CancellationToken;

use ferry_core::run_events::{SEVERITY_ERROR, SOURCE_SCHEDULER};
use ferry_core::run_lifecycle::RunTrigger;
use ferry_core::schedule::Schedule;
use ferry_core::types::DbId;
use ferry_db::models::error_log::CreateErrorLog;
use ferry_db::RunStore;

use crate::coordinator::RunCoordinator;
use crate::error::CoordinatorError;

struct Entry {
    schedule: Schedule,
    next_fire: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    store: Arc<dyn RunStore>,
    coordinator: Arc<RunCoordinator>,
    offset: FixedOffset,
    tick_interval: Duration,
    refresh_interval: Duration,
    entries: Mutex<HashMap<DbId, Entry>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn RunStore>,
        coordinator: Arc<RunCoordinator>,
        offset: FixedOffset,
        tick_interval: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            store,
            coordinator,
            offset,
            tick_interval,
            refresh_interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Run the tick and refresh loops until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self.refresh().await {
            tracing::error!(error = %e, "Initial schedule load failed");
        }

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut refresher = tokio::time::interval_at(
            tokio::time::Instant::now() + self.refresh_interval,
            self.refresh_interval,
        );

        tracing::info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            refresh_secs = self.refresh_interval.as_secs(),
            entries = self.len(),
            "Scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
                _ = refresher.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::error!(error = %e, "Schedule refresh failed");
                    }
                }
            }
        }
    }

    /// Reload definitions of active scheduled migrations.
    ///
    /// Unchanged definitions keep their next fire instant; migrations no
    /// longer listed are dropped. Returns the number of entries afterwards.
    pub async fn refresh(&self) -> Result<usize, CoordinatorError> {
        let migrations = self.store.list_scheduled_migrations().await?;
        let now = Utc::now();

        let mut loaded = HashMap::with_capacity(migrations.len());
        for migration in migrations {
            match migration.schedule() {
                Ok(Some(schedule)) => {
                    loaded.insert(migration.id, schedule);
                }
                Ok(None) => {}
                Err(e) => {
                    let migration_id = migration.id;
                    tracing::warn!(migration_id, error = %e, "Ignoring invalid schedule");
                }
            }
        }

        let mut entries = self.lock_entries();
        entries.retain(|id, _| loaded.contains_key(id));
        for (migration_id, schedule) in loaded {
            let unchanged = entries
                .get(&migration_id)
                .is_some_and(|entry| entry.schedule == schedule);
            if !unchanged {
                let next_fire = schedule.next_fire(now, self.offset);
                entries.insert(migration_id, Entry { schedule, next_fire });
            }
        }
        tracing::debug!(entries = entries.len(), "Schedules refreshed");
        Ok(entries.len())
    }

    /// Add or replace the schedule of one migration.
    pub fn upsert(&self, migration_id: DbId, schedule: Schedule) {
        let next_fire = schedule.next_fire(Utc::now(), self.offset);
        tracing::debug!(migration_id, next_fire = ?next_fire, "Schedule upserted");
        self.lock_entries()
            .insert(migration_id, Entry { schedule, next_fire });
    }

    pub fn remove(&self, migration_id: DbId) -> bool {
        self.lock_entries().remove(&migration_id).is_some()
    }

    pub fn next_fire(&self, migration_id: DbId) -> Option<DateTime<Utc>> {
        self.lock_entries().get(&migration_id)?.next_fire
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire every entry due at `now`. Returns the migrations a run was
    /// started for.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<DbId> {
        let due = self.take_due(now);
        let mut started = Vec::new();

        for migration_id in due {
            if self.coordinator.is_running(migration_id) {
                tracing::info!(migration_id, "Skipping scheduled run; already running here");
                continue;
            }
            match self.store.has_running_run(migration_id).await {
                Ok(true) => {
                    tracing::info!(migration_id, "Skipping scheduled run; already running");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(migration_id, error = %e, "Failed to check for running runs");
                    continue;
                }
            }

            match self.coordinator.start(migration_id, RunTrigger::Cron).await {
                Ok(run) => {
                    tracing::info!(migration_id, run_id = run.run.id, "Scheduled run started");
                    started.push(migration_id);
                }
                Err(CoordinatorError::AlreadyRunning(_)) => {
                    tracing::info!(migration_id, "Skipping scheduled run; already running here");
                }
                Err(e) => self.record_start_failure(migration_id, &e).await,
            }
        }
        started
    }

    /// Collect due entries and advance them past `now`.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<DbId> {
        let mut entries = self.lock_entries();
        let mut due = Vec::new();
        for (&migration_id, entry) in entries.iter_mut() {
            if entry.next_fire.is_some_and(|at| at <= now) {
                entry.next_fire = entry.schedule.next_fire(now, self.offset);
                due.push(migration_id);
            }
        }
        due.sort_unstable();
        due
    }

    async fn record_start_failure(&self, migration_id: DbId, err: &CoordinatorError) {
        tracing::error!(migration_id, error = %err, "Failed to start scheduled run");
        let entry = CreateErrorLog {
            severity: SEVERITY_ERROR.to_string(),
            source: SOURCE_SCHEDULER.to_string(),
            trigger: Some(RunTrigger::Cron.as_str().to_string()),
            message: format!("Could not start scheduled run of migration {migration_id}: {err}"),
            stack: Some(format!("{err:?}")),
            migration_id: Some(migration_id),
            run_id: None,
        };
        if let Err(e) = self.store.log_error(&entry).await {
            tracing::error!(migration_id, error = %e, "Failed to write scheduler error log entry");
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<DbId, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
