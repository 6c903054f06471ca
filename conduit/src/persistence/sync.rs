use std::sync::Arc;

use conduit_config::shared::SyncPersistenceConfig;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::concurrency::retry::retry_with_backoff;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ConduitResult, ErrorKind};
use crate::metrics::{
    CONDUIT_STATE_COMMIT_ATTEMPTS_TOTAL, CONDUIT_STATE_COMMIT_CLOSE_SUCCESSES_TOTAL,
    CONDUIT_STATE_COMMIT_FAILURES_TOTAL, CONDUIT_STATE_COMMIT_NOT_ATTEMPTED_TOTAL,
    CONDUIT_STATE_COMMIT_SUCCESSES_TOTAL, CONDUIT_STATS_COMMIT_ATTEMPTS_TOTAL,
    CONDUIT_STATS_COMMIT_CLOSE_SUCCESSES_TOTAL, CONDUIT_STATS_COMMIT_FAILURES_TOTAL,
    CONDUIT_STATS_COMMIT_NOT_ATTEMPTED_TOTAL, CONDUIT_STATS_COMMIT_SUCCESSES_TOTAL, CONNECTION_ID,
    register_metrics,
};
use crate::persistence::state::{StateAggregator, StateSnapshot};
use crate::protocol::StateMessage;
use crate::stats::{SyncStats, SyncStatsTracker};
use crate::store::sync::SyncPersistenceStore;
use crate::types::{AttemptNumber, ConnectionId, JobId, SyncContext};

/// Stats of one sync attempt, as written to durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveStatsRequest {
    pub job_id: JobId,
    pub attempt_number: AttemptNumber,
    pub stats: SyncStats,
}

#[derive(Debug, Default)]
struct PersistenceBuffer {
    /// Receives every persisted state.
    active: StateAggregator,
    /// States taken out of `active` by a flush and not yet persisted.
    to_flush: Option<StateAggregator>,
    /// Stats taken by a flush and not yet persisted.
    stats_to_flush: Option<SyncStats>,
    last_persisted_stats: Option<SyncStats>,
    closed: bool,
    flush_task: Option<JoinHandle<()>>,
}

impl PersistenceBuffer {
    fn has_states_to_flush(&self) -> bool {
        !self.active.is_empty() || self.to_flush.is_some()
    }

    fn has_stats_to_flush(&self, current: &SyncStats) -> bool {
        self.stats_to_flush.is_some() || self.last_persisted_stats.as_ref() != Some(current)
    }

    /// Moves the active states into the flush buffer and captures the stats as
    /// of now. Returns what has to be written.
    fn prepare(&mut self, stats: SyncStats) -> (Option<StateSnapshot>, Option<SyncStats>) {
        let active = std::mem::take(&mut self.active);
        if !active.is_empty() {
            match self.to_flush.as_mut() {
                Some(retained) => {
                    if let Err(err) = retained.merge(active.clone()) {
                        warn!(
                            error = %err,
                            "replacing unpersisted states with states of a different type"
                        );
                        self.to_flush = Some(active);
                    }
                }
                None => self.to_flush = Some(active),
            }
        }

        if self.last_persisted_stats.as_ref() != Some(&stats) {
            self.stats_to_flush = Some(stats);
        }

        (
            self.to_flush.as_ref().map(StateAggregator::snapshot),
            self.stats_to_flush.clone(),
        )
    }
}

#[derive(Debug)]
struct Shared<S> {
    context: SyncContext,
    config: SyncPersistenceConfig,
    store: S,
    stats: Arc<SyncStatsTracker>,
    buffer: Mutex<PersistenceBuffer>,
    shutdown_tx: ShutdownTx,
}

impl<S> Shared<S>
where
    S: SyncPersistenceStore + Send + Sync + 'static,
{
    fn connection_label(&self) -> String {
        self.context.connection_id.to_string()
    }

    async fn persist_state_once(&self, snapshot: &StateSnapshot) -> ConduitResult<()> {
        let connection_id = self.connection_label();
        counter!(CONDUIT_STATE_COMMIT_ATTEMPTS_TOTAL, CONNECTION_ID => connection_id.clone())
            .increment(1);

        match self
            .store
            .persist_state(self.context.connection_id, snapshot)
            .await
        {
            Ok(()) => {
                counter!(CONDUIT_STATE_COMMIT_SUCCESSES_TOTAL, CONNECTION_ID => connection_id)
                    .increment(1);
                Ok(())
            }
            Err(err) => {
                counter!(CONDUIT_STATE_COMMIT_FAILURES_TOTAL, CONNECTION_ID => connection_id)
                    .increment(1);
                Err(err)
            }
        }
    }

    async fn persist_stats_once(&self, stats: &SyncStats) -> ConduitResult<()> {
        let connection_id = self.connection_label();
        counter!(CONDUIT_STATS_COMMIT_ATTEMPTS_TOTAL, CONNECTION_ID => connection_id.clone())
            .increment(1);

        let request = SaveStatsRequest {
            job_id: self.context.job_id,
            attempt_number: self.context.attempt_number,
            stats: stats.clone(),
        };

        match self.store.persist_stats(&request).await {
            Ok(()) => {
                counter!(CONDUIT_STATS_COMMIT_SUCCESSES_TOTAL, CONNECTION_ID => connection_id)
                    .increment(1);
                Ok(())
            }
            Err(err) => {
                counter!(CONDUIT_STATS_COMMIT_FAILURES_TOTAL, CONNECTION_ID => connection_id)
                    .increment(1);
                Err(err)
            }
        }
    }

    async fn mark_state_persisted(&self) {
        self.buffer.lock().await.to_flush = None;
    }

    async fn mark_stats_persisted(&self, stats: SyncStats) {
        let mut buffer = self.buffer.lock().await;
        buffer.stats_to_flush = None;
        buffer.last_persisted_stats = Some(stats);
    }

    /// Periodic flush. Failures are logged and left in the buffers, so the next
    /// flush retries them together with whatever arrived in between.
    async fn flush(&self) {
        let (state, stats) = {
            let mut buffer = self.buffer.lock().await;
            buffer.prepare(self.stats.snapshot())
        };

        if let Some(state) = state {
            if let Err(err) = self.persist_state_once(&state).await {
                warn!(
                    connection_id = %self.context.connection_id,
                    error = %err,
                    "failed to persist state, it will be retried with the next flush"
                );
                return;
            }
            self.mark_state_persisted().await;
        }

        if let Some(stats) = stats {
            if let Err(err) = self.persist_stats_once(&stats).await {
                warn!(
                    connection_id = %self.context.connection_id,
                    error = %err,
                    "failed to persist stats, they will be retried with the next flush"
                );
                return;
            }
            self.mark_stats_persisted(stats).await;
        }
    }

    fn emit_not_attempted(&self, state: bool, stats: bool) {
        if state {
            counter!(
                CONDUIT_STATE_COMMIT_NOT_ATTEMPTED_TOTAL,
                CONNECTION_ID => self.connection_label()
            )
            .increment(1);
        }
        if stats {
            counter!(
                CONDUIT_STATS_COMMIT_NOT_ATTEMPTED_TOTAL,
                CONNECTION_ID => self.connection_label()
            )
            .increment(1);
        }
    }
}

async fn run_flush_loop<S>(shared: Arc<Shared<S>>, mut shutdown_rx: ShutdownRx)
where
    S: SyncPersistenceStore + Send + Sync + 'static,
{
    let mut interval = tokio::time::interval(shared.config.flush_period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                debug!(connection_id = %shared.context.connection_id, "stopping state flush task");
                break;
            }

            _ = interval.tick() => {
                shared.flush().await;
            }
        }
    }
}

/// Buffers the checkpoint state and stats of one sync attempt and writes them
/// to a [`SyncPersistenceStore`] periodically.
///
/// The background flush task starts with the first [`SyncPersistence::persist`]
/// call and is the only writer until [`SyncPersistence::shutdown`], which stops
/// it and performs the final flush.
#[derive(Debug)]
pub struct SyncPersistence<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for SyncPersistence<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S> SyncPersistence<S>
where
    S: SyncPersistenceStore + Send + Sync + 'static,
{
    pub fn new(
        context: SyncContext,
        config: SyncPersistenceConfig,
        store: S,
        stats: Arc<SyncStatsTracker>,
    ) -> Self {
        register_metrics();

        let (shutdown_tx, _) = create_shutdown_channel();
        let shared = Shared {
            context,
            config,
            store,
            stats,
            buffer: Mutex::new(PersistenceBuffer::default()),
            shutdown_tx,
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.shared.context
    }

    pub fn stats(&self) -> &Arc<SyncStatsTracker> {
        &self.shared.stats
    }

    /// Buffers `state` of `connection_id` for the next flush.
    ///
    /// Fails with [`ErrorKind::PreconditionFailed`] when the connection is not
    /// the one of this sync attempt and with [`ErrorKind::InvalidState`] after
    /// shutdown.
    pub async fn persist(
        &self,
        connection_id: ConnectionId,
        state: StateMessage,
    ) -> ConduitResult<()> {
        if connection_id != self.shared.context.connection_id {
            bail!(
                ErrorKind::PreconditionFailed,
                "State belongs to another connection",
                format!(
                    "expected connection {}, got {connection_id}",
                    self.shared.context.connection_id
                )
            );
        }

        let mut buffer = self.shared.buffer.lock().await;
        if buffer.closed {
            bail!(
                ErrorKind::InvalidState,
                "Sync persistence is shut down",
                connection_id
            );
        }

        buffer.active.ingest(state)?;

        if buffer.flush_task.is_none() {
            info!(connection_id = %connection_id, "starting state flush task");
            let shutdown_rx = self.shared.shutdown_tx.subscribe();
            buffer.flush_task = Some(tokio::spawn(run_flush_loop(
                self.shared.clone(),
                shutdown_rx,
            )));
        }

        Ok(())
    }

    /// Stops the flush task and writes whatever is left.
    ///
    /// When the in-flight flush does not finish within the shutdown timeout
    /// the task is aborted, nothing more is written and both state and stats
    /// are counted as not attempted. Otherwise remaining state and stats are
    /// written, each store write retried per `final_flush_retry`; the error of
    /// the last attempt is returned.
    pub async fn shutdown(&self) -> ConduitResult<()> {
        let shared = &self.shared;
        let flush_task = {
            let mut buffer = shared.buffer.lock().await;
            if buffer.closed {
                debug!(
                    connection_id = %shared.context.connection_id,
                    "sync persistence already shut down"
                );
                return Ok(());
            }
            buffer.closed = true;
            buffer.flush_task.take()
        };

        if let Some(mut flush_task) = flush_task {
            let _ = shared.shutdown_tx.shutdown();

            let timeout = shared.config.shutdown_timeout();
            let stopped = match tokio::time::timeout(timeout, &mut flush_task).await {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    error!(
                        connection_id = %shared.context.connection_id,
                        error = %err,
                        "state flush task failed"
                    );
                    false
                }
                Err(_) => {
                    flush_task.abort();
                    info!(
                        connection_id = %shared.context.connection_id,
                        "pending flush took too long to complete, most recent states may be lost"
                    );
                    false
                }
            };

            if !stopped {
                shared.emit_not_attempted(true, true);
                return Ok(());
            }
        }

        let state = {
            let mut buffer = shared.buffer.lock().await;
            if buffer.has_states_to_flush() {
                buffer.prepare(shared.stats.snapshot()).0
            } else {
                None
            }
        };

        if let Some(state) = state {
            let retry = &shared.config.final_flush_retry;
            let result =
                retry_with_backoff(retry, "final state flush", || shared.persist_state_once(&state))
                    .await;

            if let Err(err) = result {
                error!(
                    connection_id = %shared.context.connection_id,
                    error = %err,
                    "final state flush failed"
                );
                shared.emit_not_attempted(true, true);
                return Err(err);
            }
            shared.mark_state_persisted().await;
        }

        counter!(
            CONDUIT_STATE_COMMIT_CLOSE_SUCCESSES_TOTAL,
            CONNECTION_ID => shared.connection_label()
        )
        .increment(1);

        // Stats are checked independently of states: a previous stats write may
        // have failed after its states were written.
        let stats = {
            let buffer = shared.buffer.lock().await;
            let current = shared.stats.snapshot();
            buffer.has_stats_to_flush(&current).then_some(current)
        };
        if let Some(stats) = stats {
            let retry = &shared.config.final_flush_retry;
            let result =
                retry_with_backoff(retry, "final stats flush", || shared.persist_stats_once(&stats))
                    .await;

            if let Err(err) = result {
                error!(
                    connection_id = %shared.context.connection_id,
                    error = %err,
                    "final stats flush failed"
                );
                shared.emit_not_attempted(false, true);
                return Err(err);
            }
            shared.mark_stats_persisted(stats).await;
        }

        counter!(
            CONDUIT_STATS_COMMIT_CLOSE_SUCCESSES_TOTAL,
            CONNECTION_ID => shared.connection_label()
        )
        .increment(1);

        info!(connection_id = %shared.context.connection_id, "sync persistence shut down");

        Ok(())
    }

    /// Returns the stats written by the last successful flush.
    pub async fn last_persisted_stats(&self) -> Option<SyncStats> {
        self.shared.buffer.lock().await.last_persisted_stats.clone()
    }

    /// Returns whether any state is still waiting to be written.
    pub async fn has_pending_states(&self) -> bool {
        self.shared.buffer.lock().await.has_states_to_flush()
    }

    #[cfg(test)]
    async fn ingest_without_flush_task(&self, state: StateMessage) -> ConduitResult<()> {
        self.shared.buffer.lock().await.active.ingest(state)
    }
}
