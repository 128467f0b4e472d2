use ferry_core::error::CoreError;

/// Failures talking to a source backend.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Backend unreachable, authentication failed or the connection broke.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed the statement.
    #[error("Query error: {0}")]
    Query(String),

    /// The stored connection config does not fit the backend.
    #[error("Invalid connection config: {0}")]
    Config(String),
}

impl AdapterError {
    /// Classify a driver error raised while running a statement.
    pub fn from_query(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connection(err.to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

impl From<CoreError> for AdapterError {
    fn from(err: CoreError) -> Self {
        Self::Config(err.to_string())
    }
}
