//! SQL execution adapter over the source backends.
//!
//! One contract ([`SqlAdapter`]) for SQLite files and MySQL/Postgres
//! servers. Every call opens its own connection and closes it before
//! returning; there is no pooling.

pub mod adapter;
pub mod decode;
pub mod error;
pub mod markers;

pub use adapter::{QueryResult, SqlAdapter, SqlxAdapter};
pub use error::AdapterError;
