//! # tally-core
//!
//! Core types for the Tally metrics pipeline.
//!
//! Tally collects gauges (last write wins) and counters (running sums) from
//! agents, verifies and stores them on a server, and persists snapshots to a
//! file or a database.
//!
//! This crate holds what every other crate shares:
//! - the wire sample [`Metric`] and its typed form [`MetricValue`]
//! - the store [`Snapshot`]
//! - the unified [`TallyError`]
//! - server and agent configuration

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{AgentConfig, ServerConfig, StorageTarget};
pub use error::{Result, TallyError};
pub use types::*;
