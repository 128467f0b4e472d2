//! Repository for the `data_sources` table.

use ferry_core::types::DbId;
use sqlx::PgPool;

use crate::models::data_source::{CreateDataSource, DataSource};

/// Column list for `data_sources` queries.
const COLUMNS: &str = "id, name, backend, config, created_by, created_at, updated_at";

pub struct DataSourceRepo;

impl DataSourceRepo {
    pub async fn create(
        pool: &PgPool,
        input: &CreateDataSource,
    ) -> Result<DataSource, sqlx::Error> {
        let query = format!(
            "INSERT INTO data_sources (name, backend, config, created_by) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DataSource>(&query)
            .bind(&input.name)
            .bind(&input.backend)
            .bind(&input.config)
            .bind(input.created_by)
            .fetch_one(pool)
            .await
    }

    /// Fetch several data sources at once. Unknown ids are skipped.
    pub async fn find_by_ids(pool: &PgPool, ids: &[DbId]) -> Result<Vec<DataSource>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!("SELECT {COLUMNS} FROM data_sources WHERE id = ANY($1) ORDER BY id");
        sqlx::query_as::<_, DataSource>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
    }
}
