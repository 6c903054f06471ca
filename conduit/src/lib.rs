//! Workload and sync orchestration core.
//!
//! Tracks connector workloads through their lifecycle, buffers and persists
//! checkpoint state of running syncs, and derives per stream run states from
//! the protocol messages a sync emits.

pub mod concurrency;
pub mod error;
mod macros;
pub mod metrics;
pub mod persistence;
pub mod protocol;
pub mod stats;
pub mod store;
pub mod stream_status;
pub mod types;
pub mod workload;
