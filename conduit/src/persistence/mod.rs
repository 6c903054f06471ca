//! Buffered persistence of checkpoint state and stats of a running sync.
//!
//! States are reduced by a [`StateAggregator`] and written periodically by
//! [`SyncPersistence`]. A failed write keeps its data and merges it with the
//! states of the next period, so no checkpoint is dropped.

mod state;
mod sync;

pub use state::{StateAggregator, StateSnapshot};
pub use sync::{SaveStatsRequest, SyncPersistence};
