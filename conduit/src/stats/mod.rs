//! Record and byte counters of a running sync.

mod tracker;

pub use tracker::{StreamStats, StreamSyncStats, SyncStats, SyncStatsTracker};
