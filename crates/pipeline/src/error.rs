use ferry_core::error::CoreError;
use ferry_core::types::DbId;
use ferry_sql::AdapterError;

/// Stage failures. They reach the run coordinator unmodified.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A merge or modification stage names a dataset no earlier stage produced.
    #[error("Stage '{stage}' references unknown dataset '{dataset_id}'")]
    ConfigReference { stage: String, dataset_id: String },

    #[error("Data source {0} not found")]
    DataSourceNotFound(DbId),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("Parameter resolution failed: {0}")]
    Param(String),

    #[error("Expression error in column '{column}': {message}")]
    Expression { column: String, message: String },

    #[error("Invalid stage config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl PipelineError {
    /// Whether the failure came from reaching a backend rather than from the
    /// migration definition.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Adapter(AdapterError::Connection(_)))
    }
}
