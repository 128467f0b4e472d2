//! Fetch-config execution.
//!
//! A migration is an ordered list of fetch configs. [`execute`] turns that
//! list into a lazy stream of dataset results using one executor per
//! config kind (see [`stages`]); [`SaveWriter`] writes the final results to
//! their target tables.

pub mod context;
pub mod error;
pub mod pipeline;
pub mod save;
pub mod stages;

pub use context::{referenced_data_sources, SourceConnection, StageContext};
pub use error::PipelineError;
pub use pipeline::{execute, execute_traced, PipelineYield};
pub use save::SaveWriter;
pub use stages::sql::PAGE_SIZE;
