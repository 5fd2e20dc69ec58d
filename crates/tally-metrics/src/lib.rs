//! # tally-metrics
//!
//! Aggregation and persistence for Tally.
//!
//! This crate provides:
//! - [`MetricStore`]: gauges and counters behind one lock
//! - [`DurableBackend`]: snapshot persistence (file, or Turso with the `turso` feature)
//! - [`Persister`]: write-through or interval persistence and startup restore

pub mod backend;
pub mod file;
pub mod persist;
pub mod store;
#[cfg(feature = "turso")]
pub mod turso;

pub use backend::{open_backend, DurableBackend};
pub use file::FileBackend;
pub use persist::Persister;
pub use store::MetricStore;
#[cfg(feature = "turso")]
pub use turso::TursoBackend;
