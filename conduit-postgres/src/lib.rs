//! Postgres access for conduit.
//!
//! Row types and single-statement queries backing the workload repository,
//! the dispatch queue and the persisted state and stats snapshots. Every
//! status transition is one conditional `update ... returning` so concurrent
//! callers can never interleave a read and a write.

pub mod db;
pub mod queue;
pub mod snapshot;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod workload;
