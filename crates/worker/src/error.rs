use ferry_core::error::CoreError;
use ferry_core::types::DbId;

/// Why a run could not be started, stopped or recovered.
///
/// Failures *inside* a run never surface here; they end the run as
/// `failed` and land in the error log.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Migration {0} is not active")]
    Inactive(DbId),

    #[error("Migration {0} already has a run in progress")]
    AlreadyRunning(DbId),

    #[error("State store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}
