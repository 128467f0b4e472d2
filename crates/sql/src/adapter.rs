//! The execution contract and its sqlx implementation.

use async_trait::async_trait;
use ferry_core::bound_query::BoundQuery;
use ferry_core::data_source::{BackendType, ConnectionConfig, FileConfig, NetworkConfig};
use ferry_core::dataset::{union_columns, Row as DatasetRow};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row};

use crate::decode::{self, bind_all, binding, Binding};
use crate::error::AdapterError;
use crate::markers::{self, MarkerStyle};

/// Rows of one statement plus the column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<DatasetRow>,
    pub columns: Vec<String>,
}

/// Uniform access to the source backends.
///
/// Queries use `$1..$n` markers regardless of backend.
#[async_trait]
pub trait SqlAdapter: Send + Sync {
    /// Run a query, optionally paged by wrapping it in a subselect.
    async fn execute(
        &self,
        backend: BackendType,
        config: &ConnectionConfig,
        query: &BoundQuery,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<QueryResult, AdapterError>;

    /// `SELECT COUNT(*) FROM (<query>) AS sub`.
    async fn count(
        &self,
        backend: BackendType,
        config: &ConnectionConfig,
        query: &BoundQuery,
    ) -> Result<i64, AdapterError>;

    /// Run a statement that returns no rows, reporting rows affected.
    async fn execute_statement(
        &self,
        backend: BackendType,
        config: &ConnectionConfig,
        query: &BoundQuery,
    ) -> Result<u64, AdapterError>;
}

// ---------------------------------------------------------------------------
// SqlxAdapter
// ---------------------------------------------------------------------------

/// [`SqlAdapter`] over sqlx connections, one fresh connection per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxAdapter;

/// What a single connection is asked to do.
enum Operation {
    Fetch,
    Count,
    Statement,
}

enum Outcome {
    Rows(QueryResult),
    Count(i64),
    Affected(u64),
}

impl SqlxAdapter {
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        backend: BackendType,
        config: &ConnectionConfig,
        sql: String,
        query: &BoundQuery,
        op: Operation,
    ) -> Result<Outcome, AdapterError> {
        let prepared = BoundQuery {
            sql,
            variables: query.variables.clone(),
        };
        let (sql, values) = markers::translate(&prepared, MarkerStyle::from(backend))?;
        let typed_dates = backend == BackendType::Postgres;
        let bindings: Vec<Binding> = values.iter().map(|v| binding(v, typed_dates)).collect();

        tracing::debug!(
            backend = %backend,
            variables = bindings.len(),
            sql = %sql,
            "Executing statement"
        );

        match (backend, config) {
            (BackendType::Postgres, ConnectionConfig::Network(net)) => {
                let mut conn = PgConnection::connect_with(&pg_options(net))
                    .await
                    .map_err(|e| AdapterError::Connection(e.to_string()))?;
                let result = pg_run(&mut conn, &sql, bindings, op).await;
                close(conn, backend).await;
                result
            }
            (BackendType::Mysql, ConnectionConfig::Network(net)) => {
                let mut conn = MySqlConnection::connect_with(&mysql_options(net))
                    .await
                    .map_err(|e| AdapterError::Connection(e.to_string()))?;
                let result = mysql_run(&mut conn, &sql, bindings, op).await;
                close(conn, backend).await;
                result
            }
            (BackendType::Sqlite, ConnectionConfig::File(file)) => {
                let mut conn = SqliteConnection::connect_with(&sqlite_options(file))
                    .await
                    .map_err(|e| AdapterError::Connection(e.to_string()))?;
                let result = sqlite_run(&mut conn, &sql, bindings, op).await;
                close(conn, backend).await;
                result
            }
            (backend, _) => Err(AdapterError::Config(format!(
                "Connection config does not match backend '{backend}'"
            ))),
        }
    }
}

#[async_trait]
impl SqlAdapter for SqlxAdapter {
    async fn execute(
        &self,
        backend: BackendType,
        config: &ConnectionConfig,
        query: &BoundQuery,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<QueryResult, AdapterError> {
        let sql = markers::paged(&query.sql, limit, offset);
        match self.run(backend, config, sql, query, Operation::Fetch).await? {
            Outcome::Rows(result) => Ok(result),
            _ => Err(AdapterError::Query("Fetch returned no rows".into())),
        }
    }

    async fn count(
        &self,
        backend: BackendType,
        config: &ConnectionConfig,
        query: &BoundQuery,
    ) -> Result<i64, AdapterError> {
        let sql = markers::counted(&query.sql);
        match self.run(backend, config, sql, query, Operation::Count).await? {
            Outcome::Count(n) => Ok(n),
            _ => Err(AdapterError::Query("Count returned no value".into())),
        }
    }

    async fn execute_statement(
        &self,
        backend: BackendType,
        config: &ConnectionConfig,
        query: &BoundQuery,
    ) -> Result<u64, AdapterError> {
        let sql = query.sql.clone();
        match self.run(backend, config, sql, query, Operation::Statement).await? {
            Outcome::Affected(n) => Ok(n),
            _ => Err(AdapterError::Query("Statement returned rows".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

fn pg_options(net: &NetworkConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&net.host)
        .port(net.port)
        .username(&net.username)
        .password(&net.password)
        .database(&net.database)
        .disable_statement_logging()
}

fn mysql_options(net: &NetworkConfig) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(&net.host)
        .port(net.port)
        .username(&net.username)
        .password(&net.password)
        .database(&net.database)
        .disable_statement_logging()
}

fn sqlite_options(file: &FileConfig) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(&file.path)
        .create_if_missing(false)
        .disable_statement_logging()
}

/// Close a connection; failures are logged since the result is already known.
async fn close<C: Connection>(conn: C, backend: BackendType) {
    if let Err(e) = conn.close().await {
        tracing::warn!(backend = %backend, error = %e, "Failed to close connection cleanly");
    }
}

// ---------------------------------------------------------------------------
// Per-backend execution
// ---------------------------------------------------------------------------

async fn pg_run(
    conn: &mut PgConnection,
    sql: &str,
    bindings: Vec<Binding>,
    op: Operation,
) -> Result<Outcome, AdapterError> {
    let query = bind_all!(sqlx::query(sql), bindings);
    match op {
        Operation::Fetch => {
            let rows = query.fetch_all(&mut *conn).await.map_err(AdapterError::from_query)?;
            let columns = match rows.first() {
                Some(row) => decode::column_names(row),
                None => described_columns(&mut *conn, sql).await?,
            };
            Ok(Outcome::Rows(QueryResult {
                rows: rows.iter().map(decode::pg_row).collect(),
                columns,
            }))
        }
        Operation::Count => {
            let row = query.fetch_one(&mut *conn).await.map_err(AdapterError::from_query)?;
            let n: i64 = row.try_get(0).map_err(AdapterError::from_query)?;
            Ok(Outcome::Count(n))
        }
        Operation::Statement => {
            let done = query.execute(&mut *conn).await.map_err(AdapterError::from_query)?;
            Ok(Outcome::Affected(done.rows_affected()))
        }
    }
}

async fn mysql_run(
    conn: &mut MySqlConnection,
    sql: &str,
    bindings: Vec<Binding>,
    op: Operation,
) -> Result<Outcome, AdapterError> {
    let query = bind_all!(sqlx::query(sql), bindings);
    match op {
        Operation::Fetch => {
            let rows = query.fetch_all(&mut *conn).await.map_err(AdapterError::from_query)?;
            let columns = match rows.first() {
                Some(row) => decode::column_names(row),
                None => described_columns(&mut *conn, sql).await?,
            };
            Ok(Outcome::Rows(QueryResult {
                rows: rows.iter().map(decode::mysql_row).collect(),
                columns,
            }))
        }
        Operation::Count => {
            let row = query.fetch_one(&mut *conn).await.map_err(AdapterError::from_query)?;
            let n: i64 = row.try_get(0).map_err(AdapterError::from_query)?;
            Ok(Outcome::Count(n))
        }
        Operation::Statement => {
            let done = query.execute(&mut *conn).await.map_err(AdapterError::from_query)?;
            Ok(Outcome::Affected(done.rows_affected()))
        }
    }
}

/// Result columns from the prepared statement, for pages with no rows.
fn described_columns<'c, E>(
    executor: E,
    sql: &'c str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<String>, AdapterError>> + Send + 'c>>
where
    E: Executor<'c> + 'c,
{
    Box::pin(async move {
        let described = executor.describe(sql).await.map_err(AdapterError::from_query)?;
        Ok(described.columns().iter().map(|c| c.name().to_string()).collect())
    })
}

async fn sqlite_run(
    conn: &mut SqliteConnection,
    sql: &str,
    bindings: Vec<Binding>,
    op: Operation,
) -> Result<Outcome, AdapterError> {
    let query = bind_all!(sqlx::query(sql), bindings);
    match op {
        Operation::Fetch => {
            let rows = query.fetch_all(&mut *conn).await.map_err(AdapterError::from_query)?;
            let rows: Vec<DatasetRow> = rows.iter().map(decode::sqlite_row).collect();
            // The file engine reports columns from the rows themselves.
            let columns = union_columns(&rows);
            Ok(Outcome::Rows(QueryResult { rows, columns }))
        }
        Operation::Count => {
            let row = query.fetch_one(&mut *conn).await.map_err(AdapterError::from_query)?;
            let n: i64 = row.try_get(0).map_err(AdapterError::from_query)?;
            Ok(Outcome::Count(n))
        }
        Operation::Statement => {
            let done = query.execute(&mut *conn).await.map_err(AdapterError::from_query)?;
            Ok(Outcome::Affected(done.rows_affected()))
        }
    }
}
