//! Shared helpers for the integration tests: recording and failing
//! collaborators, plus a local metrics recorder to assert emitted counters.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use conduit::bail;
use conduit::error::{ConduitResult, ErrorKind};
use conduit::persistence::{SaveStatsRequest, StateSnapshot};
use conduit::store::both::memory::MemoryStore;
use conduit::store::sync::SyncPersistenceStore;
use conduit::store::workload::WorkloadRepository;
use conduit::types::{ConnectionId, SyncContext};
use conduit::workload::{CompletionSignaler, SignalInput, Workload, WorkloadStatus, WorkloadType};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use tokio::sync::Notify;
use uuid::Uuid;

pub fn sync_context() -> SyncContext {
    SyncContext::new(Uuid::new_v4(), Uuid::new_v4(), 42, 0)
}

/// Signaler remembering every delivered signal. Fails every delivery when
/// created with [`RecordingSignaler::failing`].
#[derive(Debug, Clone, Default)]
pub struct RecordingSignaler {
    signals: Arc<StdMutex<Vec<SignalInput>>>,
    fail: bool,
}

impl RecordingSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn signals(&self) -> Vec<SignalInput> {
        self.signals.lock().unwrap().clone()
    }
}

impl CompletionSignaler for RecordingSignaler {
    async fn signal(&self, input: &SignalInput) -> ConduitResult<()> {
        if self.fail {
            bail!(ErrorKind::SignalError, "Workflow is unreachable");
        }

        self.signals.lock().unwrap().push(input.clone());

        Ok(())
    }
}

#[derive(Debug, Default)]
struct FlakyStoreInner {
    fail_states: AtomicBool,
    fail_stats: AtomicBool,
    state_calls: AtomicU32,
    stats_calls: AtomicU32,
    states: StdMutex<Vec<StateSnapshot>>,
    stats: StdMutex<Vec<SaveStatsRequest>>,
}

/// Persistence store whose writes can be switched to fail and which records
/// every successful write. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: Arc<FlakyStoreInner>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_states(&self, fail: bool) {
        self.inner.fail_states.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stats(&self, fail: bool) {
        self.inner.fail_stats.store(fail, Ordering::SeqCst);
    }

    pub fn state_calls(&self) -> u32 {
        self.inner.state_calls.load(Ordering::SeqCst)
    }

    pub fn stats_calls(&self) -> u32 {
        self.inner.stats_calls.load(Ordering::SeqCst)
    }

    pub fn persisted_states(&self) -> Vec<StateSnapshot> {
        self.inner.states.lock().unwrap().clone()
    }

    pub fn persisted_stats(&self) -> Vec<SaveStatsRequest> {
        self.inner.stats.lock().unwrap().clone()
    }
}

impl SyncPersistenceStore for FlakyStore {
    async fn persist_state(
        &self,
        _connection_id: ConnectionId,
        snapshot: &StateSnapshot,
    ) -> ConduitResult<()> {
        self.inner.state_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_states.load(Ordering::SeqCst) {
            bail!(ErrorKind::StorageError, "State storage is unavailable");
        }

        self.inner.states.lock().unwrap().push(snapshot.clone());

        Ok(())
    }

    async fn persist_stats(&self, request: &SaveStatsRequest) -> ConduitResult<()> {
        self.inner.stats_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_stats.load(Ordering::SeqCst) {
            bail!(ErrorKind::StorageError, "Stats storage is unavailable");
        }

        self.inner.stats.lock().unwrap().push(request.clone());

        Ok(())
    }
}

#[derive(Debug, Default)]
struct HangingStoreInner {
    hang_stats: bool,
    started: Notify,
    state_calls: AtomicU32,
    stats_calls: AtomicU32,
}

/// Persistence store whose state writes never complete. Created with
/// [`HangingStore::hanging_stats`], state writes succeed and stats writes
/// never complete instead.
#[derive(Debug, Clone, Default)]
pub struct HangingStore {
    inner: Arc<HangingStoreInner>,
}

impl HangingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hanging_stats() -> Self {
        Self {
            inner: Arc::new(HangingStoreInner {
                hang_stats: true,
                ..HangingStoreInner::default()
            }),
        }
    }

    /// Resolves once the hanging write is in flight.
    pub async fn wait_for_write(&self) {
        self.inner.started.notified().await;
    }

    pub fn state_calls(&self) -> u32 {
        self.inner.state_calls.load(Ordering::SeqCst)
    }

    pub fn stats_calls(&self) -> u32 {
        self.inner.stats_calls.load(Ordering::SeqCst)
    }

    async fn hang(&self) {
        self.inner.started.notify_one();
        std::future::pending::<()>().await;
    }
}

impl SyncPersistenceStore for HangingStore {
    async fn persist_state(
        &self,
        _connection_id: ConnectionId,
        _snapshot: &StateSnapshot,
    ) -> ConduitResult<()> {
        self.inner.state_calls.fetch_add(1, Ordering::SeqCst);
        if !self.inner.hang_stats {
            self.hang().await;
        }

        Ok(())
    }

    async fn persist_stats(&self, _request: &SaveStatsRequest) -> ConduitResult<()> {
        self.inner.stats_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.hang_stats {
            self.hang().await;
        }

        Ok(())
    }
}

/// Repository over a [`MemoryStore`] that cancels a chosen workload right
/// after the next mutex key search returned it, like a concurrent caller
/// winning the race for it.
#[derive(Debug, Clone)]
pub struct RacingRepository {
    store: MemoryStore,
    cancel_after_search: Arc<StdMutex<Option<String>>>,
}

impl RacingRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            cancel_after_search: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn cancel_after_next_search(&self, id: &str) {
        *self.cancel_after_search.lock().unwrap() = Some(id.to_owned());
    }
}

impl WorkloadRepository for RacingRepository {
    async fn insert_workload(&self, workload: Workload) -> ConduitResult<Option<Workload>> {
        self.store.insert_workload(workload).await
    }

    async fn get_workload(&self, id: &str) -> ConduitResult<Option<Workload>> {
        self.store.get_workload(id).await
    }

    async fn claim_workload(
        &self,
        id: &str,
        dataplane_id: &str,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Option<Workload>> {
        self.store.claim_workload(id, dataplane_id, deadline).await
    }

    async fn advance_workload(
        &self,
        id: &str,
        from: &[WorkloadStatus],
        to: WorkloadStatus,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Option<Workload>> {
        self.store.advance_workload(id, from, to, deadline).await
    }

    async fn heartbeat_workload(
        &self,
        id: &str,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Option<Workload>> {
        self.store.heartbeat_workload(id, deadline).await
    }

    async fn terminate_workload(
        &self,
        id: &str,
        from: &[WorkloadStatus],
        to: WorkloadStatus,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> ConduitResult<Option<Workload>> {
        self.store
            .terminate_workload(id, from, to, source, reason)
            .await
    }

    async fn search_by_mutex_key_and_statuses(
        &self,
        mutex_key: &str,
        statuses: &[WorkloadStatus],
    ) -> ConduitResult<Vec<Workload>> {
        let holders = self
            .store
            .search_by_mutex_key_and_statuses(mutex_key, statuses)
            .await?;

        let cancelled = self.cancel_after_search.lock().unwrap().take();
        if let Some(id) = cancelled {
            self.store
                .terminate_workload(
                    &id,
                    &WorkloadStatus::ACTIVE,
                    WorkloadStatus::Cancelled,
                    Some("api"),
                    Some("cancelled by user"),
                )
                .await?;
        }

        Ok(holders)
    }

    async fn search_workloads(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        updated_before: Option<DateTime<Utc>>,
    ) -> ConduitResult<Vec<Workload>> {
        self.store
            .search_workloads(dataplane_ids, statuses, updated_before)
            .await
    }

    async fn search_by_expired_deadline(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Vec<Workload>> {
        self.store
            .search_by_expired_deadline(dataplane_ids, statuses, deadline)
            .await
    }

    async fn search_by_type_status_and_creation_date(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        workload_types: Option<&[WorkloadType]>,
        created_before: DateTime<Utc>,
    ) -> ConduitResult<Vec<Workload>> {
        self.store
            .search_by_type_status_and_creation_date(
                dataplane_ids,
                statuses,
                workload_types,
                created_before,
            )
            .await
    }
}

/// Counters captured while running a test body.
#[derive(Debug, Default)]
pub struct CapturedMetrics {
    counters: Vec<(String, Vec<(String, String)>, u64)>,
}

impl CapturedMetrics {
    /// Sums the counters named `name` that carry every label in `labels`.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .iter()
            .filter(|(counter_name, counter_labels, _)| {
                counter_name == name
                    && labels.iter().all(|(key, value)| {
                        counter_labels
                            .iter()
                            .any(|(label_key, label_value)| {
                                label_key == key && label_value == value
                            })
                    })
            })
            .map(|(_, _, value)| value)
            .sum()
    }
}

/// Runs `test` on a fresh current thread runtime with a local metrics
/// recorder and returns its output together with the recorded counters.
///
/// Tasks spawned by `test` run on the same thread, so their metrics are
/// captured too.
pub fn with_captured_metrics<F, Fut, T>(test: F) -> (T, CapturedMetrics)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build test runtime");

    let output = metrics::with_local_recorder(&recorder, || runtime.block_on(test()));

    let counters = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(key, _, _, value)| match value {
            DebugValue::Counter(value) => {
                let key = key.key();
                let labels = key
                    .labels()
                    .map(|label| (label.key().to_owned(), label.value().to_owned()))
                    .collect();
                Some((key.name().to_owned(), labels, value))
            }
            _ => None,
        })
        .collect();

    (output, CapturedMetrics { counters })
}
