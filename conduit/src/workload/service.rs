use chrono::{DateTime, Utc};
use conduit_config::shared::WorkloadConfig;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::error::{ConduitResult, ErrorKind};
use crate::metrics::{
    CONDUIT_WORKLOAD_LAUNCH_OUTCOMES_TOTAL, CONDUIT_WORKLOAD_SUPERSEDED_TOTAL,
    CONDUIT_WORKLOAD_TIME_SINCE_CREATION_SECONDS, CONDUIT_WORKLOAD_TRANSITIONS_TOTAL, DATAPLANE_ID,
    OUTCOME, STATUS, UNASSIGNED_DATAPLANE, WORKLOAD_TYPE, register_metrics,
};
use crate::store::queue::WorkloadQueue;
use crate::store::workload::WorkloadRepository;
use crate::workload::model::{
    LAUNCHER_SOURCE, NewWorkload, SUPERSEDED_SOURCE, Workload, WorkloadPriority,
    WorkloadQueueStats, WorkloadStatus, WorkloadType,
};
use crate::workload::signal::{CompletionSignaler, send_completion_signal};
use crate::{bail, conduit_error};

const CLAIMABLE_BY_LAUNCH: [WorkloadStatus; 2] =
    [WorkloadStatus::Claimed, WorkloadStatus::Launched];
const STARTED: [WorkloadStatus; 3] = [
    WorkloadStatus::Claimed,
    WorkloadStatus::Launched,
    WorkloadStatus::Running,
];

/// Drives workloads through their lifecycle.
///
/// ```text
/// pending -> claimed -> launched -> running -> success
///    \__________\___________\__________\____-> failure | cancelled
/// ```
///
/// Every transition is a compare-and-set in the [`WorkloadRepository`]. When
/// it matches nothing the workload is re-read to tell a lost race (logged,
/// not an error) from a transition that is not allowed
/// ([`ErrorKind::InvalidStatusTransition`]).
#[derive(Debug, Clone)]
pub struct WorkloadService<R, Q, S> {
    config: WorkloadConfig,
    repository: R,
    queue: Q,
    signaler: S,
}

impl<R, Q, S> WorkloadService<R, Q, S>
where
    R: WorkloadRepository,
    Q: WorkloadQueue,
    S: CompletionSignaler,
{
    pub fn new(config: WorkloadConfig, repository: R, queue: Q, signaler: S) -> Self {
        register_metrics();

        Self {
            config,
            repository,
            queue,
            signaler,
        }
    }

    /// Creates a pending workload and enqueues it for dispatch.
    ///
    /// When the workload carries a mutex key, every other active workload
    /// holding the key is failed so that only the newest one stays active.
    pub async fn create(&self, new: NewWorkload) -> ConduitResult<Workload> {
        new.validate()?;

        let id = new.id.clone();
        let Some(created) = self
            .repository
            .insert_workload(Workload::pending(new, Utc::now()))
            .await?
        else {
            bail!(ErrorKind::Conflict, "Workload already exists", id);
        };

        self.queue
            .enqueue(
                &created.id,
                created.dataplane_group.as_deref(),
                created.priority,
            )
            .await?;
        record_transition(&created);

        info!(
            workload_id = %created.id,
            workload_type = created.workload_type.as_str(),
            "workload created"
        );

        match created.mutex_key.clone() {
            Some(mutex_key) => self.enforce_mutex_key(created, &mutex_key).await,
            None => Ok(created),
        }
    }

    /// Fails every active workload holding `mutex_key` except the newest one.
    ///
    /// Creation time ties go to the greatest id, so concurrent creators agree
    /// on the keeper. Returns the latest version of `created`.
    async fn enforce_mutex_key(
        &self,
        created: Workload,
        mutex_key: &str,
    ) -> ConduitResult<Workload> {
        let holders = self
            .repository
            .search_by_mutex_key_and_statuses(mutex_key, &WorkloadStatus::ACTIVE)
            .await?;

        let Some(keeper) = holders
            .iter()
            .max_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
            .map(|workload| workload.id.clone())
        else {
            return Ok(created);
        };

        let reason = format!("Superseded by {keeper}");
        let mut created = created;

        for holder in holders.into_iter().filter(|workload| workload.id != keeper) {
            match self
                .fail(&holder.id, Some(SUPERSEDED_SOURCE), Some(&reason))
                .await
            {
                Ok(failed) => {
                    info!(
                        workload_id = %holder.id,
                        mutex_key,
                        superseded_by = %keeper,
                        "superseded workload failed"
                    );
                    counter!(
                        CONDUIT_WORKLOAD_SUPERSEDED_TOTAL,
                        WORKLOAD_TYPE => holder.workload_type.as_str()
                    )
                    .increment(1);

                    if failed.id == created.id {
                        created = failed;
                    }
                }
                Err(err) if err.kind() == ErrorKind::InvalidStatusTransition => {
                    debug!(
                        workload_id = %holder.id,
                        mutex_key,
                        "superseded workload already terminated"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(created)
    }

    pub async fn get(&self, id: &str) -> ConduitResult<Workload> {
        match self.repository.get_workload(id).await? {
            Some(workload) => Ok(workload),
            None => bail!(ErrorKind::NotFound, "Workload not found", id),
        }
    }

    /// Claims a pending workload for `dataplane_id`.
    ///
    /// Returns [`None`] when another dataplane won the claim. Claiming a
    /// workload again from the dataplane that already holds it returns it
    /// unchanged.
    pub async fn claim(
        &self,
        id: &str,
        dataplane_id: &str,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Option<Workload>> {
        if let Some(claimed) = self
            .repository
            .claim_workload(id, dataplane_id, deadline)
            .await?
        {
            self.queue.ack(id).await?;
            record_transition(&claimed);

            return Ok(Some(claimed));
        }

        let current = self.get(id).await?;
        if current.status.is_terminal() {
            bail!(
                ErrorKind::InvalidStatusTransition,
                "Cannot claim a terminated workload",
                format!("workload {id} is {}", current.status)
            );
        }

        info!(
            workload_id = %id,
            dataplane_id,
            claimed_by = current.dataplane_id.as_deref().unwrap_or(UNASSIGNED_DATAPLANE),
            "workload claimed by another dataplane"
        );

        Ok(None)
    }

    pub async fn launch(&self, id: &str, deadline: DateTime<Utc>) -> ConduitResult<Workload> {
        if let Some(launched) = self
            .repository
            .advance_workload(id, &CLAIMABLE_BY_LAUNCH, WorkloadStatus::Launched, deadline)
            .await?
        {
            record_transition(&launched);
            return Ok(launched);
        }

        let current = self.get(id).await?;
        match current.status {
            WorkloadStatus::Pending => bail!(
                ErrorKind::InvalidStatusTransition,
                "Cannot launch a workload that is not yet claimed",
                id
            ),
            status if status.is_terminal() => bail!(
                ErrorKind::InvalidStatusTransition,
                "Cannot launch a terminated workload",
                format!("workload {id} is {status}")
            ),
            status => {
                info!(workload_id = %id, %status, "workload moved past launched, ignoring launch");
                Ok(current)
            }
        }
    }

    pub async fn running(&self, id: &str, deadline: DateTime<Utc>) -> ConduitResult<Workload> {
        if let Some(running) = self
            .repository
            .advance_workload(id, &STARTED, WorkloadStatus::Running, deadline)
            .await?
        {
            record_transition(&running);
            return Ok(running);
        }

        let current = self.get(id).await?;
        match current.status {
            WorkloadStatus::Pending => bail!(
                ErrorKind::InvalidStatusTransition,
                "Cannot run a workload that is not yet claimed",
                id
            ),
            status if status.is_terminal() => bail!(
                ErrorKind::InvalidStatusTransition,
                "Cannot run a terminated workload",
                format!("workload {id} is {status}")
            ),
            status => {
                info!(workload_id = %id, %status, "lost race while marking workload running");
                Ok(current)
            }
        }
    }

    /// Extends the deadline of a running workload. Status never changes.
    pub async fn heartbeat(&self, id: &str, deadline: DateTime<Utc>) -> ConduitResult<Workload> {
        if let Some(workload) = self.repository.heartbeat_workload(id, deadline).await? {
            return Ok(workload);
        }

        let current = self.get(id).await?;
        match current.status {
            WorkloadStatus::Pending => bail!(
                ErrorKind::InvalidStatusTransition,
                "Cannot heartbeat a workload that is not yet claimed",
                id
            ),
            WorkloadStatus::Claimed | WorkloadStatus::Launched => bail!(
                ErrorKind::InvalidStatusTransition,
                "Cannot heartbeat a workload that is not running",
                format!(
                    "workload {id} is {}, running must be called before heartbeat",
                    current.status
                )
            ),
            WorkloadStatus::Running => Ok(current),
            status => bail!(
                ErrorKind::InvalidStatusTransition,
                "Cannot heartbeat a terminated workload",
                format!("workload {id} is {status}")
            ),
        }
    }

    pub async fn succeed(&self, id: &str) -> ConduitResult<Workload> {
        self.terminate(id, &STARTED, WorkloadStatus::Success, None, None)
            .await
    }

    /// Fails an active workload.
    ///
    /// Failures reported by the launcher are also counted as launch outcomes.
    pub async fn fail(
        &self,
        id: &str,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> ConduitResult<Workload> {
        let failed = self
            .terminate(
                id,
                &WorkloadStatus::ACTIVE,
                WorkloadStatus::Failure,
                source,
                reason,
            )
            .await?;

        if source == Some(LAUNCHER_SOURCE) {
            counter!(
                CONDUIT_WORKLOAD_LAUNCH_OUTCOMES_TOTAL,
                WORKLOAD_TYPE => failed.workload_type.as_str(),
                OUTCOME => "failure"
            )
            .increment(1);
        }

        Ok(failed)
    }

    pub async fn cancel(
        &self,
        id: &str,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> ConduitResult<Workload> {
        self.terminate(
            id,
            &WorkloadStatus::ACTIVE,
            WorkloadStatus::Cancelled,
            source,
            reason,
        )
        .await
    }

    /// Moves a workload to a terminal status, then acknowledges its queue
    /// entries and signals its workflow.
    ///
    /// Terminating a workload that is already in `to` succeeds without side
    /// effects besides the queue acknowledgement.
    async fn terminate(
        &self,
        id: &str,
        from: &[WorkloadStatus],
        to: WorkloadStatus,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> ConduitResult<Workload> {
        if let Some(terminated) = self
            .repository
            .terminate_workload(id, from, to, source, reason)
            .await?
        {
            self.queue.ack(id).await?;
            record_transition(&terminated);
            send_completion_signal(&self.signaler, &terminated).await;

            info!(workload_id = %id, status = %to, source, reason, "workload terminated");

            return Ok(terminated);
        }

        let current = self.get(id).await?;
        if current.status == to {
            debug!(workload_id = %id, status = %to, "workload already terminated, ignoring");
            self.queue.ack(id).await?;

            return Ok(current);
        }

        let detail = format!("workload {id} is {}, cannot become {to}", current.status);
        let err = if current.status.is_terminal() {
            conduit_error!(
                ErrorKind::InvalidStatusTransition,
                "Workload is already terminated",
                detail
            )
        } else {
            conduit_error!(
                ErrorKind::InvalidStatusTransition,
                "Workload is not yet claimed",
                detail
            )
        };
        warn!(workload_id = %id, error = %err, "invalid workload transition");

        Err(err)
    }

    pub async fn list(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        updated_before: Option<DateTime<Utc>>,
    ) -> ConduitResult<Vec<Workload>> {
        self.repository
            .search_workloads(dataplane_ids, statuses, updated_before)
            .await
    }

    /// Lists workloads whose deadline passed strictly before `deadline`.
    pub async fn list_with_expired_deadline(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Vec<Workload>> {
        self.repository
            .search_by_expired_deadline(dataplane_ids, statuses, deadline)
            .await
    }

    /// Lists active workloads created strictly before `created_before`.
    pub async fn list_running_created_before(
        &self,
        dataplane_ids: Option<&[String]>,
        workload_types: Option<&[WorkloadType]>,
        created_before: DateTime<Utc>,
    ) -> ConduitResult<Vec<Workload>> {
        self.repository
            .search_by_type_status_and_creation_date(
                dataplane_ids,
                Some(&WorkloadStatus::ACTIVE),
                workload_types,
                created_before,
            )
            .await
    }

    /// Leases up to `quantity` queued workloads of a bucket.
    ///
    /// Leased entries are handed out again once the redelivery window passes
    /// unless their workload is claimed or terminated in between.
    pub async fn poll_queue(
        &self,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
        quantity: Option<u32>,
    ) -> ConduitResult<Vec<Workload>> {
        let quantity = quantity.unwrap_or(self.config.default_poll_quantity);
        let ids = self
            .queue
            .poll(
                dataplane_group,
                priority,
                quantity,
                self.config.queue_poll_redelivery(),
            )
            .await?;

        let mut workloads = Vec::with_capacity(ids.len());
        for id in ids {
            match self.repository.get_workload(&id).await? {
                Some(workload) => workloads.push(workload),
                None => warn!(workload_id = %id, "queued workload does not exist"),
            }
        }

        Ok(workloads)
    }

    pub async fn count_queue_depth(
        &self,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
    ) -> ConduitResult<u64> {
        self.queue.count_depth(dataplane_group, priority).await
    }

    pub async fn queue_stats(&self) -> ConduitResult<Vec<WorkloadQueueStats>> {
        self.queue.stats().await
    }
}

fn record_transition(workload: &Workload) {
    let workload_type = workload.workload_type.as_str();
    let status = workload.status.as_str();
    let dataplane_id = workload
        .dataplane_id
        .clone()
        .unwrap_or_else(|| UNASSIGNED_DATAPLANE.to_owned());

    let elapsed = (workload.updated_at - workload.created_at)
        .to_std()
        .unwrap_or_default();

    histogram!(
        CONDUIT_WORKLOAD_TIME_SINCE_CREATION_SECONDS,
        WORKLOAD_TYPE => workload_type,
        STATUS => status,
        DATAPLANE_ID => dataplane_id.clone()
    )
    .record(elapsed.as_secs_f64());

    counter!(
        CONDUIT_WORKLOAD_TRANSITIONS_TOTAL,
        WORKLOAD_TYPE => workload_type,
        STATUS => status,
        DATAPLANE_ID => dataplane_id
    )
    .increment(1);
}
