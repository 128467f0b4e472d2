//! In-memory store and scripted adapter shared by the worker tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use ferry_core::bound_query::BoundQuery;
use ferry_core::data_source::{BackendType, ConnectionConfig};
use ferry_core::dataset::Row;
use ferry_core::types::DbId;
use ferry_db::models::data_source::DataSource;
use ferry_db::models::error_log::{CreateErrorLog, ErrorLog};
use ferry_db::models::migration::Migration;
use ferry_db::models::migration_run::{CreateMigrationRun, MigrationRun};
use ferry_db::models::status::MigrationRunStatus;
use ferry_db::RunStore;
use ferry_events::EventBus;
use ferry_sql::{AdapterError, QueryResult, SqlAdapter};
use ferry_worker::{ProcessContext, RunCoordinator};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    next_id: DbId,
    migrations: BTreeMap<DbId, Migration>,
    data_sources: BTreeMap<DbId, DataSource>,
    runs: BTreeMap<DbId, MigrationRun>,
    errors: Vec<ErrorLog>,
}

impl State {
    fn id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

/// [`RunStore`] over plain maps, with the same guarded transitions as the
/// Postgres repositories.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn add_data_source(&self, backend: &str) -> DbId {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        let config = match backend {
            "sqlite" => json!({"path": "/tmp/ferry-test.db"}),
            _ => json!({"host": "db", "port": 5432, "username": "u", "database": "d"}),
        };
        state.data_sources.insert(
            id,
            DataSource {
                id,
                name: format!("source-{id}"),
                backend: backend.to_string(),
                config,
                created_by: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub fn add_migration(
        &self,
        fetch_configs: Value,
        save_mappings: Value,
        schedule: Option<Value>,
    ) -> DbId {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        state.migrations.insert(
            id,
            Migration {
                id,
                name: format!("migration-{id}"),
                is_active: true,
                fetch_configs,
                save_mappings,
                params: json!([]),
                cron_expression: schedule.map(|s| s.to_string()),
                created_by: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub fn update_migration(&self, id: DbId, f: impl FnOnce(&mut Migration)) {
        let mut state = self.state.lock().unwrap();
        if let Some(migration) = state.migrations.get_mut(&id) {
            f(migration);
        }
    }

    /// Insert a run row directly, as another process would have.
    pub fn insert_run(
        &self,
        migration_id: DbId,
        status: MigrationRunStatus,
        instance_id: &str,
    ) -> DbId {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        state.runs.insert(
            id,
            MigrationRun {
                id,
                migration_id,
                status_id: status.id(),
                progress: vec![0],
                trigger: "manual".into(),
                error: None,
                metadata: json!({"instanceId": instance_id}),
                pid: Some(1),
                started_at: Some(Utc::now()),
                finished_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub fn run(&self, id: DbId) -> MigrationRun {
        self.state.lock().unwrap().runs[&id].clone()
    }

    pub fn runs_for(&self, migration_id: DbId) -> Vec<MigrationRun> {
        self.state
            .lock()
            .unwrap()
            .runs
            .values()
            .filter(|r| r.migration_id == migration_id)
            .cloned()
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorLog> {
        self.state.lock().unwrap().errors.clone()
    }

    fn finish(&self, run_id: DbId, status: MigrationRunStatus, error: Option<&str>) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(run) = state.runs.get_mut(&run_id) else {
            return false;
        };
        let active = [MigrationRunStatus::Pending.id(), MigrationRunStatus::Running.id()];
        if !active.contains(&run.status_id) {
            return false;
        }
        run.status_id = status.id();
        if let Some(error) = error {
            run.error = Some(error.to_string());
        }
        run.finished_at = Some(Utc::now());
        true
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn find_migration(&self, id: DbId) -> Result<Option<Migration>, sqlx::Error> {
        Ok(self.state.lock().unwrap().migrations.get(&id).cloned())
    }

    async fn list_scheduled_migrations(&self) -> Result<Vec<Migration>, sqlx::Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .migrations
            .values()
            .filter(|m| m.is_active && m.cron_expression.is_some())
            .cloned()
            .collect())
    }

    async fn find_data_sources(&self, ids: &[DbId]) -> Result<Vec<DataSource>, sqlx::Error> {
        let state = self.state.lock().unwrap();
        Ok(ids.iter().filter_map(|id| state.data_sources.get(id).cloned()).collect())
    }

    async fn create_run(&self, input: &CreateMigrationRun) -> Result<MigrationRun, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        let run = MigrationRun {
            id,
            migration_id: input.migration_id,
            status_id: MigrationRunStatus::Pending.id(),
            progress: vec![0; input.progress_slots.max(0) as usize],
            trigger: input.trigger.clone(),
            error: None,
            metadata: input.metadata.clone(),
            pid: input.pid,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.runs.insert(id, run.clone());
        Ok(run)
    }

    async fn mark_running(&self, run_id: DbId) -> Result<bool, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        match state.runs.get_mut(&run_id) {
            Some(run) if run.status_id == MigrationRunStatus::Pending.id() => {
                run.status_id = MigrationRunStatus::Running.id();
                run.started_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(&self, run_id: DbId, progress: &[i16]) -> Result<bool, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        match state.runs.get_mut(&run_id) {
            Some(run) if run.status_id == MigrationRunStatus::Running.id() => {
                run.progress = progress.to_vec();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_run(&self, run_id: DbId) -> Result<bool, sqlx::Error> {
        Ok(self.finish(run_id, MigrationRunStatus::Success, None))
    }

    async fn fail_run(&self, run_id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        Ok(self.finish(run_id, MigrationRunStatus::Failed, Some(error)))
    }

    async fn cancel_run(&self, run_id: DbId) -> Result<bool, sqlx::Error> {
        Ok(self.finish(run_id, MigrationRunStatus::Canceled, None))
    }

    async fn find_run(&self, run_id: DbId) -> Result<Option<MigrationRun>, sqlx::Error> {
        Ok(self.state.lock().unwrap().runs.get(&run_id).cloned())
    }

    async fn list_running_runs(&self) -> Result<Vec<MigrationRun>, sqlx::Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .runs
            .values()
            .filter(|r| r.status_id == MigrationRunStatus::Running.id())
            .cloned()
            .collect())
    }

    async fn has_running_run(&self, migration_id: DbId) -> Result<bool, sqlx::Error> {
        Ok(self.state.lock().unwrap().runs.values().any(|r| {
            r.migration_id == migration_id && r.status_id == MigrationRunStatus::Running.id()
        }))
    }

    async fn list_recent_runs(&self, limit: i64) -> Result<Vec<MigrationRun>, sqlx::Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .runs
            .values()
            .rev()
            .take(limit.clamp(1, 100) as usize)
            .cloned()
            .collect())
    }

    async fn log_error(&self, input: &CreateErrorLog) -> Result<ErrorLog, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        let entry = ErrorLog {
            id,
            severity: input.severity.clone(),
            source: input.source.clone(),
            trigger: input.trigger.clone(),
            message: input.message.clone(),
            stack: input.stack.clone(),
            migration_id: input.migration_id,
            run_id: input.run_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.errors.push(entry.clone());
        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// ScriptedAdapter
// ---------------------------------------------------------------------------

/// Serves canned rows by table name. With a gate installed, every fetch
/// waits for a permit so tests can hold a run mid-flight.
#[derive(Default)]
pub struct ScriptedAdapter {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    statements: Mutex<Vec<BoundQuery>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedAdapter {
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                gate: Some(Arc::clone(&gate)),
                ..Default::default()
            },
            gate,
        )
    }

    pub fn set_table(&self, name: &str, count: i64) {
        let rows = (1..=count)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".into(), json!(i));
                row.insert("label".into(), json!(format!("row{i}")));
                row
            })
            .collect();
        self.tables.lock().unwrap().insert(name.to_string(), rows);
    }

    pub fn statements(&self) -> Vec<BoundQuery> {
        self.statements.lock().unwrap().clone()
    }

    fn rows_for(&self, sql: &str) -> Result<Vec<Row>, AdapterError> {
        let tables = self.tables.lock().unwrap();
        tables
            .iter()
            .find(|(name, _)| sql.contains(name.as_str()))
            .map(|(_, rows)| rows.clone())
            .ok_or_else(|| AdapterError::Query(format!("relation does not exist: {sql}")))
    }
}

#[async_trait]
impl SqlAdapter for ScriptedAdapter {
    async fn execute(
        &self,
        _backend: BackendType,
        _config: &ConnectionConfig,
        query: &BoundQuery,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<QueryResult, AdapterError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| AdapterError::Connection(e.to_string()))?
                .forget();
        }
        let rows = self.rows_for(&query.sql)?;
        let start = (offset.unwrap_or(0) as usize).min(rows.len());
        let end = limit.map_or(rows.len(), |l| (start + l as usize).min(rows.len()));
        let page = rows[start..end].to_vec();
        Ok(QueryResult {
            columns: ferry_core::dataset::union_columns(&page),
            rows: page,
        })
    }

    async fn count(
        &self,
        _backend: BackendType,
        _config: &ConnectionConfig,
        query: &BoundQuery,
    ) -> Result<i64, AdapterError> {
        Ok(self.rows_for(&query.sql)?.len() as i64)
    }

    async fn execute_statement(
        &self,
        _backend: BackendType,
        _config: &ConnectionConfig,
        query: &BoundQuery,
    ) -> Result<u64, AdapterError> {
        self.statements.lock().unwrap().push(query.clone());
        Ok((query.variables.len() / 2) as u64)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub adapter: Arc<ScriptedAdapter>,
    pub events: Arc<EventBus>,
    pub shutdown: CancellationToken,
    pub coordinator: Arc<RunCoordinator>,
}

impl Harness {
    pub fn new(adapter: ScriptedAdapter) -> Self {
        let store = Arc::new(MemoryStore::default());
        let adapter = Arc::new(adapter);
        let events = Arc::new(EventBus::default());
        let shutdown = CancellationToken::new();
        let coordinator = RunCoordinator::new(
            store.clone(),
            adapter.clone(),
            Arc::clone(&events),
            ProcessContext::new(),
            shutdown.clone(),
        );
        Self {
            store,
            adapter,
            events,
            shutdown,
            coordinator,
        }
    }

    /// A one-stage migration reading `table` from a fresh SQLite source.
    pub fn simple_migration(&self, table: &str) -> DbId {
        let source = self.store.add_data_source("sqlite");
        let query = format!("SELECT * FROM {table}");
        self.store.add_migration(
            json!([{"id": table, "type": "sql",
                    "params": {"dataSourceId": source, "query": query}}]),
            json!([]),
            None,
        )
    }
}

/// Poll until the run reaches `status`, failing after two seconds.
pub async fn wait_for_status(
    store: &MemoryStore,
    run_id: DbId,
    status: MigrationRunStatus,
) -> MigrationRun {
    for _ in 0..200 {
        let run = store.run(run_id);
        if run.status_id == status.id() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never reached {}", status.as_str());
}
