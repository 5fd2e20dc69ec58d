//! Tally Agent - collects runtime metrics and ships them to a server
//!
//! - [`RuntimeCollector`] samples the host on every poll
//! - [`Reporter`] drives the poll and report loops
//! - [`WorkerPool`] fans a report out across concurrent deliveries
//! - [`HttpDelivery`] is the shipped [`Delivery`] transport

mod client;
pub mod collector;
pub mod pool;
mod reporter;

pub use client::{HttpDelivery, RETRY_DELAYS};
pub use collector::RuntimeCollector;
pub use pool::{Delivery, Job, JobResult, QueuedRun, ResultStream, WorkerPool};
pub use reporter::{ReportSummary, Reporter};
