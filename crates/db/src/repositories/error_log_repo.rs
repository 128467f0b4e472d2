//! Repository for the `errors` table.

use ferry_core::types::DbId;
use sqlx::PgPool;

use crate::models::error_log::{CreateErrorLog, ErrorLog};

/// Column list for `errors` queries.
const COLUMNS: &str = "\
    id, severity, source, trigger, message, stack, migration_id, run_id, \
    created_at, updated_at";

pub struct ErrorLogRepo;

impl ErrorLogRepo {
    pub async fn create(pool: &PgPool, input: &CreateErrorLog) -> Result<ErrorLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO errors (severity, source, trigger, message, stack, migration_id, run_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ErrorLog>(&query)
            .bind(&input.severity)
            .bind(&input.source)
            .bind(&input.trigger)
            .bind(&input.message)
            .bind(&input.stack)
            .bind(input.migration_id)
            .bind(input.run_id)
            .fetch_one(pool)
            .await
    }
}
