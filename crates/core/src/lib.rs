//! Ferry domain core.
//!
//! Zero internal dependencies: everything here is pure data and pure
//! functions so the pipeline, persistence and worker crates can share it.

pub mod bound_query;
pub mod comparison;
pub mod data_source;
pub mod dataset;
pub mod error;
pub mod expression;
pub mod fetch_config;
pub mod params;
pub mod placeholders;
pub mod query_builder;
pub mod run_events;
pub mod run_lifecycle;
pub mod save_mapping;
pub mod schedule;
pub mod types;
