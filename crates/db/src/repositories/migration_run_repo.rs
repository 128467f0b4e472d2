//! Repository for the `migration_runs` table.
//!
//! Every terminal update is guarded by `status_id IN (pending, running)`,
//! so `finished_at` is written at most once and a canceled run is never
//! overwritten by a late success or failure.

use ferry_core::types::DbId;
use sqlx::PgPool;

use crate::models::migration_run::{CreateMigrationRun, MigrationRun};
use crate::models::status::{MigrationRunStatus, StatusId};

/// Column list for `migration_runs` queries.
const COLUMNS: &str = "\
    id, migration_id, status_id, progress, trigger, error, metadata, pid, \
    started_at, finished_at, created_at, updated_at";

/// Maximum page size for run listing.
const MAX_LIMIT: i64 = 100;

/// Statuses a terminal update may overwrite.
const ACTIVE_STATUSES: [StatusId; 2] = [
    MigrationRunStatus::Pending as StatusId,
    MigrationRunStatus::Running as StatusId,
];

pub struct MigrationRunRepo;

impl MigrationRunRepo {
    /// Insert a pending run with zeroed progress slots.
    pub async fn create(
        pool: &PgPool,
        input: &CreateMigrationRun,
    ) -> Result<MigrationRun, sqlx::Error> {
        let query = format!(
            "INSERT INTO migration_runs \
                 (migration_id, status_id, progress, trigger, metadata, pid) \
             VALUES ($1, $2, array_fill(0::smallint, ARRAY[$3::int]), $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, MigrationRun>(&query)
            .bind(input.migration_id)
            .bind(MigrationRunStatus::Pending.id())
            .bind(input.progress_slots.max(0))
            .bind(&input.trigger)
            .bind(&input.metadata)
            .bind(input.pid)
            .fetch_one(pool)
            .await
    }

    /// Pending -> running. Returns `false` if the run was canceled first.
    pub async fn mark_running(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE migration_runs SET status_id = $2, started_at = NOW() \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(MigrationRunStatus::Running.id())
        .bind(MigrationRunStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the progress array of a running run.
    pub async fn update_progress(
        pool: &PgPool,
        id: DbId,
        progress: &[i16],
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE migration_runs SET progress = $2 WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(progress)
        .bind(MigrationRunStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn complete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        Self::finish(pool, id, MigrationRunStatus::Success, None).await
    }

    pub async fn fail(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        Self::finish(pool, id, MigrationRunStatus::Failed, Some(error)).await
    }

    pub async fn cancel(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        Self::finish(pool, id, MigrationRunStatus::Canceled, None).await
    }

    async fn finish(
        pool: &PgPool,
        id: DbId,
        status: MigrationRunStatus,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE migration_runs \
             SET status_id = $2, error = COALESCE($3, error), finished_at = NOW() \
             WHERE id = $1 AND status_id IN ($4, $5)",
        )
        .bind(id)
        .bind(status.id())
        .bind(error)
        .bind(ACTIVE_STATUSES[0])
        .bind(ACTIVE_STATUSES[1])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<MigrationRun>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM migration_runs WHERE id = $1");
        sqlx::query_as::<_, MigrationRun>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_status(
        pool: &PgPool,
        status: MigrationRunStatus,
    ) -> Result<Vec<MigrationRun>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM migration_runs WHERE status_id = $1 ORDER BY id");
        sqlx::query_as::<_, MigrationRun>(&query)
            .bind(status.id())
            .fetch_all(pool)
            .await
    }

    pub async fn has_running(pool: &PgPool, migration_id: DbId) -> Result<bool, sqlx::Error> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS \
                 (SELECT 1 FROM migration_runs WHERE migration_id = $1 AND status_id = $2)",
        )
        .bind(migration_id)
        .bind(MigrationRunStatus::Running.id())
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }

    /// Most recent runs first; snapshot for late event subscribers.
    pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<MigrationRun>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM migration_runs ORDER BY created_at DESC, id DESC LIMIT $1"
        );
        sqlx::query_as::<_, MigrationRun>(&query)
            .bind(limit.clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }
}
