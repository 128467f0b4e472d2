//! Row structs and create DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row and, where rows are inserted, a create DTO.

pub mod data_source;
pub mod error_log;
pub mod migration;
pub mod migration_run;
pub mod status;
