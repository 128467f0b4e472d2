//! The persistence seam used by the run coordinator, recovery and scheduler.

use async_trait::async_trait;
use ferry_core::types::DbId;

use crate::models::data_source::DataSource;
use crate::models::error_log::{CreateErrorLog, ErrorLog};
use crate::models::migration::Migration;
use crate::models::migration_run::{CreateMigrationRun, MigrationRun};
use crate::models::status::MigrationRunStatus;
use crate::repositories::{DataSourceRepo, ErrorLogRepo, MigrationRepo, MigrationRunRepo};
use crate::DbPool;

/// Everything the worker reads and writes about migrations and runs.
///
/// Terminal updates (`complete_run`, `fail_run`, `cancel_run`) only apply
/// to pending or running rows and report whether they did.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn find_migration(&self, id: DbId) -> Result<Option<Migration>, sqlx::Error>;

    /// Active migrations that carry a schedule.
    async fn list_scheduled_migrations(&self) -> Result<Vec<Migration>, sqlx::Error>;

    async fn find_data_sources(&self, ids: &[DbId]) -> Result<Vec<DataSource>, sqlx::Error>;

    async fn create_run(&self, input: &CreateMigrationRun) -> Result<MigrationRun, sqlx::Error>;

    async fn mark_running(&self, run_id: DbId) -> Result<bool, sqlx::Error>;

    async fn update_progress(&self, run_id: DbId, progress: &[i16]) -> Result<bool, sqlx::Error>;

    async fn complete_run(&self, run_id: DbId) -> Result<bool, sqlx::Error>;

    async fn fail_run(&self, run_id: DbId, error: &str) -> Result<bool, sqlx::Error>;

    async fn cancel_run(&self, run_id: DbId) -> Result<bool, sqlx::Error>;

    async fn find_run(&self, run_id: DbId) -> Result<Option<MigrationRun>, sqlx::Error>;

    async fn list_running_runs(&self) -> Result<Vec<MigrationRun>, sqlx::Error>;

    async fn has_running_run(&self, migration_id: DbId) -> Result<bool, sqlx::Error>;

    async fn list_recent_runs(&self, limit: i64) -> Result<Vec<MigrationRun>, sqlx::Error>;

    async fn log_error(&self, input: &CreateErrorLog) -> Result<ErrorLog, sqlx::Error>;
}

/// [`RunStore`] backed by the Postgres repositories.
#[derive(Clone)]
pub struct PgRunStore {
    pool: DbPool,
}

impl PgRunStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn find_migration(&self, id: DbId) -> Result<Option<Migration>, sqlx::Error> {
        MigrationRepo::find_by_id(&self.pool, id).await
    }

    async fn list_scheduled_migrations(&self) -> Result<Vec<Migration>, sqlx::Error> {
        MigrationRepo::list_scheduled(&self.pool).await
    }

    async fn find_data_sources(&self, ids: &[DbId]) -> Result<Vec<DataSource>, sqlx::Error> {
        DataSourceRepo::find_by_ids(&self.pool, ids).await
    }

    async fn create_run(&self, input: &CreateMigrationRun) -> Result<MigrationRun, sqlx::Error> {
        MigrationRunRepo::create(&self.pool, input).await
    }

    async fn mark_running(&self, run_id: DbId) -> Result<bool, sqlx::Error> {
        MigrationRunRepo::mark_running(&self.pool, run_id).await
    }

    async fn update_progress(&self, run_id: DbId, progress: &[i16]) -> Result<bool, sqlx::Error> {
        MigrationRunRepo::update_progress(&self.pool, run_id, progress).await
    }

    async fn complete_run(&self, run_id: DbId) -> Result<bool, sqlx::Error> {
        MigrationRunRepo::complete(&self.pool, run_id).await
    }

    async fn fail_run(&self, run_id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        MigrationRunRepo::fail(&self.pool, run_id, error).await
    }

    async fn cancel_run(&self, run_id: DbId) -> Result<bool, sqlx::Error> {
        MigrationRunRepo::cancel(&self.pool, run_id).await
    }

    async fn find_run(&self, run_id: DbId) -> Result<Option<MigrationRun>, sqlx::Error> {
        MigrationRunRepo::find_by_id(&self.pool, run_id).await
    }

    async fn list_running_runs(&self) -> Result<Vec<MigrationRun>, sqlx::Error> {
        MigrationRunRepo::list_by_status(&self.pool, MigrationRunStatus::Running).await
    }

    async fn has_running_run(&self, migration_id: DbId) -> Result<bool, sqlx::Error> {
        MigrationRunRepo::has_running(&self.pool, migration_id).await
    }

    async fn list_recent_runs(&self, limit: i64) -> Result<Vec<MigrationRun>, sqlx::Error> {
        MigrationRunRepo::list_recent(&self.pool, limit).await
    }

    async fn log_error(&self, input: &CreateErrorLog) -> Result<ErrorLog, sqlx::Error> {
        ErrorLogRepo::create(&self.pool, input).await
    }
}
