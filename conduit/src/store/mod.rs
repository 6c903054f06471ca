//! Storage abstractions for workloads, the dispatch queue and sync snapshots.
//!
//! - [`workload`] - compare-and-set access to workload records
//! - [`queue`] - the dispatch queue workers poll for new workloads
//! - [`sync`] - durable checkpoint state and stats of running syncs
//!
//! The [`both`] module provides implementations backing every trait at once.

pub mod both;
pub mod queue;
pub mod sync;
pub mod workload;
