//! Repository for the `migrations` table.

use ferry_core::types::DbId;
use sqlx::PgPool;

use crate::models::migration::{CreateMigration, Migration};

/// Column list for `migrations` queries.
const COLUMNS: &str = "\
    id, name, is_active, fetch_configs, save_mappings, params, \
    cron_expression, created_by, created_at, updated_at";

pub struct MigrationRepo;

impl MigrationRepo {
    pub async fn create(pool: &PgPool, input: &CreateMigration) -> Result<Migration, sqlx::Error> {
        let query = format!(
            "INSERT INTO migrations \
                 (name, is_active, fetch_configs, save_mappings, params, \
                  cron_expression, created_by) \
             VALUES ($1, COALESCE($2, TRUE), $3, COALESCE($4, '[]'::jsonb), \
                     COALESCE($5, '[]'::jsonb), $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Migration>(&query)
            .bind(&input.name)
            .bind(input.is_active)
            .bind(&input.fetch_configs)
            .bind(&input.save_mappings)
            .bind(&input.params)
            .bind(&input.cron_expression)
            .bind(input.created_by)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Migration>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM migrations WHERE id = $1");
        sqlx::query_as::<_, Migration>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Active migrations with a schedule, for the cron driver.
    pub async fn list_scheduled(pool: &PgPool) -> Result<Vec<Migration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM migrations \
             WHERE is_active AND cron_expression IS NOT NULL AND cron_expression <> '' \
             ORDER BY id"
        );
        sqlx::query_as::<_, Migration>(&query).fetch_all(pool).await
    }

    pub async fn set_active(pool: &PgPool, id: DbId, is_active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE migrations SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(is_active)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
