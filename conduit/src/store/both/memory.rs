use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::ConduitResult;
use crate::persistence::{SaveStatsRequest, StateSnapshot};
use crate::stats::SyncStats;
use crate::store::queue::WorkloadQueue;
use crate::store::sync::SyncPersistenceStore;
use crate::store::workload::WorkloadRepository;
use crate::types::{AttemptNumber, ConnectionId, JobId};
use crate::workload::{Workload, WorkloadPriority, WorkloadQueueStats, WorkloadStatus, WorkloadType};

#[derive(Debug, Clone)]
struct QueueEntry {
    workload_id: String,
    dataplane_group: Option<String>,
    priority: WorkloadPriority,
    poll_deadline: DateTime<Utc>,
    acked: bool,
}

#[derive(Debug, Default)]
struct Inner {
    workloads: HashMap<String, Workload>,
    queue: Vec<QueueEntry>,
    connection_states: HashMap<ConnectionId, StateSnapshot>,
    sync_stats: HashMap<(JobId, AttemptNumber), SyncStats>,
}

impl Inner {
    /// Applies `update` to the workload if its status is one of `from`.
    fn compare_and_set(
        &mut self,
        id: &str,
        from: &[WorkloadStatus],
        update: impl FnOnce(&mut Workload),
    ) -> Option<Workload> {
        let workload = self.workloads.get_mut(id)?;
        if !from.contains(&workload.status) {
            return None;
        }

        update(workload);
        workload.updated_at = Utc::now();

        Some(workload.clone())
    }

    fn search(&self, predicate: impl Fn(&Workload) -> bool) -> Vec<Workload> {
        let mut workloads: Vec<_> = self
            .workloads
            .values()
            .filter(|workload| predicate(workload))
            .cloned()
            .collect();
        workloads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        workloads
    }
}

fn matches_filter<T: PartialEq>(filter: Option<&[T]>, value: &T) -> bool {
    filter.is_none_or(|values| values.contains(value))
}

fn matches_dataplane(filter: Option<&[String]>, dataplane_id: Option<&String>) -> bool {
    match (filter, dataplane_id) {
        (None, _) => true,
        (Some(ids), Some(dataplane_id)) => ids.contains(dataplane_id),
        (Some(_), None) => false,
    }
}

/// In-memory implementation of every store trait.
///
/// Clones share the same data. Meant for tests and single process setups:
/// nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last state snapshot persisted for `connection_id`.
    pub async fn connection_state(&self, connection_id: ConnectionId) -> Option<StateSnapshot> {
        let inner = self.inner.lock().await;

        inner.connection_states.get(&connection_id).cloned()
    }

    /// Returns the last stats persisted for an attempt.
    pub async fn sync_stats(
        &self,
        job_id: JobId,
        attempt_number: AttemptNumber,
    ) -> Option<SyncStats> {
        let inner = self.inner.lock().await;

        inner.sync_stats.get(&(job_id, attempt_number)).cloned()
    }

    /// Returns whether every queue entry of `workload_id` is acknowledged.
    pub async fn is_acked(&self, workload_id: &str) -> bool {
        let inner = self.inner.lock().await;

        inner
            .queue
            .iter()
            .filter(|entry| entry.workload_id == workload_id)
            .all(|entry| entry.acked)
    }
}

impl WorkloadRepository for MemoryStore {
    async fn insert_workload(&self, workload: Workload) -> ConduitResult<Option<Workload>> {
        let mut inner = self.inner.lock().await;

        if inner.workloads.contains_key(&workload.id) {
            return Ok(None);
        }
        inner
            .workloads
            .insert(workload.id.clone(), workload.clone());

        Ok(Some(workload))
    }

    async fn get_workload(&self, id: &str) -> ConduitResult<Option<Workload>> {
        let inner = self.inner.lock().await;

        Ok(inner.workloads.get(id).cloned())
    }

    async fn claim_workload(
        &self,
        id: &str,
        dataplane_id: &str,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Option<Workload>> {
        let mut inner = self.inner.lock().await;

        if let Some(workload) = inner.workloads.get(id) {
            let held_by_caller = workload.dataplane_id.as_deref() == Some(dataplane_id)
                && matches!(
                    workload.status,
                    WorkloadStatus::Claimed | WorkloadStatus::Launched
                );
            if held_by_caller {
                return Ok(Some(workload.clone()));
            }
        }

        Ok(inner.compare_and_set(id, &[WorkloadStatus::Pending], |workload| {
            workload.status = WorkloadStatus::Claimed;
            workload.dataplane_id = Some(dataplane_id.to_owned());
            workload.deadline = Some(deadline);
        }))
    }

    async fn advance_workload(
        &self,
        id: &str,
        from: &[WorkloadStatus],
        to: WorkloadStatus,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Option<Workload>> {
        let mut inner = self.inner.lock().await;

        Ok(inner.compare_and_set(id, from, |workload| {
            workload.status = to;
            workload.deadline = Some(deadline);
        }))
    }

    async fn heartbeat_workload(
        &self,
        id: &str,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Option<Workload>> {
        let mut inner = self.inner.lock().await;

        Ok(inner.compare_and_set(id, &[WorkloadStatus::Running], |workload| {
            workload.deadline = Some(deadline);
            workload.last_heartbeat_at = Some(Utc::now());
        }))
    }

    async fn terminate_workload(
        &self,
        id: &str,
        from: &[WorkloadStatus],
        to: WorkloadStatus,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> ConduitResult<Option<Workload>> {
        let mut inner = self.inner.lock().await;

        Ok(inner.compare_and_set(id, from, |workload| {
            workload.status = to;
            workload.termination_source = source.map(str::to_owned);
            workload.termination_reason = reason.map(str::to_owned);
            workload.deadline = None;
        }))
    }

    async fn search_by_mutex_key_and_statuses(
        &self,
        mutex_key: &str,
        statuses: &[WorkloadStatus],
    ) -> ConduitResult<Vec<Workload>> {
        let inner = self.inner.lock().await;

        let mut workloads = inner.search(|workload| {
            workload.mutex_key.as_deref() == Some(mutex_key) && statuses.contains(&workload.status)
        });
        workloads.reverse();

        Ok(workloads)
    }

    async fn search_workloads(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        updated_before: Option<DateTime<Utc>>,
    ) -> ConduitResult<Vec<Workload>> {
        let inner = self.inner.lock().await;

        Ok(inner.search(|workload| {
            matches_dataplane(dataplane_ids, workload.dataplane_id.as_ref())
                && matches_filter(statuses, &workload.status)
                && updated_before.is_none_or(|before| workload.updated_at < before)
        }))
    }

    async fn search_by_expired_deadline(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Vec<Workload>> {
        let inner = self.inner.lock().await;

        Ok(inner.search(|workload| {
            matches_dataplane(dataplane_ids, workload.dataplane_id.as_ref())
                && matches_filter(statuses, &workload.status)
                && workload.deadline.is_some_and(|current| current < deadline)
        }))
    }

    async fn search_by_type_status_and_creation_date(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        workload_types: Option<&[WorkloadType]>,
        created_before: DateTime<Utc>,
    ) -> ConduitResult<Vec<Workload>> {
        let inner = self.inner.lock().await;

        Ok(inner.search(|workload| {
            matches_dataplane(dataplane_ids, workload.dataplane_id.as_ref())
                && matches_filter(statuses, &workload.status)
                && matches_filter(workload_types, &workload.workload_type)
                && workload.created_at < created_before
        }))
    }
}

impl WorkloadQueue for MemoryStore {
    async fn enqueue(
        &self,
        workload_id: &str,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
    ) -> ConduitResult<()> {
        let mut inner = self.inner.lock().await;

        inner.queue.push(QueueEntry {
            workload_id: workload_id.to_owned(),
            dataplane_group: dataplane_group.map(str::to_owned),
            priority,
            poll_deadline: Utc::now(),
            acked: false,
        });

        Ok(())
    }

    async fn poll(
        &self,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
        quantity: u32,
        redelivery: Duration,
    ) -> ConduitResult<Vec<String>> {
        let mut inner = self.inner.lock().await;

        let now = Utc::now();
        let lease_until = chrono::Duration::from_std(redelivery)
            .ok()
            .and_then(|lease| now.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut leased = Vec::new();
        for entry in inner.queue.iter_mut() {
            if leased.len() >= quantity as usize {
                break;
            }

            let available = !entry.acked
                && entry.priority == priority
                && entry.dataplane_group.as_deref() == dataplane_group
                && entry.poll_deadline <= now;
            if available {
                entry.poll_deadline = lease_until;
                leased.push(entry.workload_id.clone());
            }
        }

        Ok(leased)
    }

    async fn ack(&self, workload_id: &str) -> ConduitResult<()> {
        let mut inner = self.inner.lock().await;

        for entry in inner
            .queue
            .iter_mut()
            .filter(|entry| entry.workload_id == workload_id)
        {
            entry.acked = true;
        }

        Ok(())
    }

    async fn count_depth(
        &self,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
    ) -> ConduitResult<u64> {
        let inner = self.inner.lock().await;

        let depth = inner
            .queue
            .iter()
            .filter(|entry| {
                !entry.acked
                    && entry.priority == priority
                    && entry.dataplane_group.as_deref() == dataplane_group
            })
            .count();

        Ok(depth as u64)
    }

    async fn stats(&self) -> ConduitResult<Vec<WorkloadQueueStats>> {
        let inner = self.inner.lock().await;

        let mut buckets: BTreeMap<(Option<String>, i32), u64> = BTreeMap::new();
        for entry in inner.queue.iter().filter(|entry| !entry.acked) {
            *buckets
                .entry((entry.dataplane_group.clone(), entry.priority.as_i32()))
                .or_default() += 1;
        }

        let mut stats = Vec::with_capacity(buckets.len());
        for ((dataplane_group, priority), enqueued_count) in buckets {
            stats.push(WorkloadQueueStats {
                dataplane_group,
                priority: WorkloadPriority::try_from(priority)?,
                enqueued_count,
            });
        }

        Ok(stats)
    }
}

impl SyncPersistenceStore for MemoryStore {
    async fn persist_state(
        &self,
        connection_id: ConnectionId,
        snapshot: &StateSnapshot,
    ) -> ConduitResult<()> {
        let mut inner = self.inner.lock().await;

        inner
            .connection_states
            .insert(connection_id, snapshot.clone());

        Ok(())
    }

    async fn persist_stats(&self, request: &SaveStatsRequest) -> ConduitResult<()> {
        let mut inner = self.inner.lock().await;

        inner.sync_stats.insert(
            (request.job_id, request.attempt_number),
            request.stats.clone(),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::NewWorkload;

    fn workload(id: &str) -> Workload {
        Workload::pending(NewWorkload::new(id, WorkloadType::Sync), Utc::now())
    }

    #[tokio::test]
    async fn test_insert_does_not_overwrite() {
        let store = MemoryStore::new();

        assert!(store.insert_workload(workload("w1")).await.unwrap().is_some());
        assert!(store.insert_workload(workload("w1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryStore::new();
        store.insert_workload(workload("w1")).await.unwrap();
        let deadline = Utc::now();

        let claimed = store
            .claim_workload("w1", "dp-1", deadline)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, WorkloadStatus::Claimed);

        assert!(
            store
                .claim_workload("w1", "dp-2", deadline)
                .await
                .unwrap()
                .is_none()
        );

        let again = store
            .claim_workload("w1", "dp-1", deadline + chrono::Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.deadline, Some(deadline));
    }

    #[tokio::test]
    async fn test_poll_leases_entries() {
        let store = MemoryStore::new();
        store.enqueue("w1", Some("eu"), WorkloadPriority::High).await.unwrap();
        store.enqueue("w2", Some("eu"), WorkloadPriority::High).await.unwrap();
        store.enqueue("w3", None, WorkloadPriority::Default).await.unwrap();
        let redelivery = Duration::from_secs(60);

        let leased = store
            .poll(Some("eu"), WorkloadPriority::High, 1, redelivery)
            .await
            .unwrap();
        assert_eq!(leased, vec!["w1".to_owned()]);

        let leased = store
            .poll(Some("eu"), WorkloadPriority::High, 10, redelivery)
            .await
            .unwrap();
        assert_eq!(leased, vec!["w2".to_owned()]);

        let leased = store
            .poll(Some("eu"), WorkloadPriority::High, 10, redelivery)
            .await
            .unwrap();
        assert!(leased.is_empty());

        assert_eq!(
            store.count_depth(Some("eu"), WorkloadPriority::High).await.unwrap(),
            2
        );
        store.ack("w1").await.unwrap();
        store.ack("w1").await.unwrap();
        assert_eq!(
            store.count_depth(Some("eu"), WorkloadPriority::High).await.unwrap(),
            1
        );

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            vec![
                WorkloadQueueStats {
                    dataplane_group: None,
                    priority: WorkloadPriority::Default,
                    enqueued_count: 1,
                },
                WorkloadQueueStats {
                    dataplane_group: Some("eu".to_owned()),
                    priority: WorkloadPriority::High,
                    enqueued_count: 1,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_poll_redelivers_after_lease_expires() {
        let store = MemoryStore::new();
        store.enqueue("w1", None, WorkloadPriority::Default).await.unwrap();

        let leased = store
            .poll(None, WorkloadPriority::Default, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(leased, vec!["w1".to_owned()]);

        let leased = store
            .poll(None, WorkloadPriority::Default, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(leased, vec!["w1".to_owned()]);
    }
}
