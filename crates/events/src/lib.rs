//! Ferry event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`DomainEvent`]: the event envelope.
//!
//! There is no durable queue. Subscribers that connect late or lag behind
//! recover state from a snapshot read of the run store.

pub mod bus;

pub use bus::{DomainEvent, EventBus};
