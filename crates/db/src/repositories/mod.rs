//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod data_source_repo;
pub mod error_log_repo;
pub mod migration_repo;
pub mod migration_run_repo;

pub use data_source_repo::DataSourceRepo;
pub use error_log_repo::ErrorLogRepo;
pub use migration_repo::MigrationRepo;
pub use migration_run_repo::MigrationRunRepo;
