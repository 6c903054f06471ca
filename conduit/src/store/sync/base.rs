use std::future::Future;

use crate::error::ConduitResult;
use crate::persistence::{SaveStatsRequest, StateSnapshot};
use crate::types::ConnectionId;

/// Durable storage for the checkpoint state and stats of running syncs.
///
/// Both writes replace what was stored before: state snapshots are already
/// reduced and stats are cumulative.
pub trait SyncPersistenceStore {
    fn persist_state(
        &self,
        connection_id: ConnectionId,
        snapshot: &StateSnapshot,
    ) -> impl Future<Output = ConduitResult<()>> + Send;

    fn persist_stats(
        &self,
        request: &SaveStatsRequest,
    ) -> impl Future<Output = ConduitResult<()>> + Send;
}
