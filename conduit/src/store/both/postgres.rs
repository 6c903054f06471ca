use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_config::shared::PgConnectionConfig;
use conduit_postgres::{db, queue, snapshot, workload};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;

use crate::error::{ConduitError, ConduitResult, ErrorKind};
use crate::persistence::{SaveStatsRequest, StateSnapshot};
use crate::store::queue::WorkloadQueue;
use crate::store::sync::SyncPersistenceStore;
use crate::store::workload::WorkloadRepository;
use crate::types::ConnectionId;
use crate::workload::{
    Workload, WorkloadLabel, WorkloadPriority, WorkloadQueueStats, WorkloadStatus, WorkloadType,
};
use crate::{bail, conduit_error};

const MIN_POOL_CONNECTIONS: u32 = 1;
const MAX_POOL_CONNECTIONS: u32 = 10;

impl From<&Workload> for workload::WorkloadRow {
    fn from(value: &Workload) -> Self {
        workload::WorkloadRow {
            id: value.id.clone(),
            dataplane_id: value.dataplane_id.clone(),
            dataplane_group: value.dataplane_group.clone(),
            status: value.status.as_str().to_owned(),
            workload_type: value.workload_type.as_str().to_owned(),
            last_heartbeat_at: value.last_heartbeat_at,
            labels: Json(
                value
                    .labels
                    .iter()
                    .map(|label| workload::WorkloadLabelRow {
                        key: label.key.clone(),
                        value: label.value.clone(),
                    })
                    .collect(),
            ),
            input_payload: value.input_payload.clone(),
            log_path: value.log_path.clone(),
            mutex_key: value.mutex_key.clone(),
            deadline: value.deadline,
            signal_input: value.signal_input.clone(),
            priority: value.priority.as_i32(),
            termination_source: value.termination_source.clone(),
            termination_reason: value.termination_reason.clone(),
            auto_id: value.auto_id,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

/// Status, type and priority are stored as plain columns and validated here.
impl TryFrom<workload::WorkloadRow> for Workload {
    type Error = ConduitError;

    fn try_from(value: workload::WorkloadRow) -> Result<Self, Self::Error> {
        Ok(Workload {
            status: value.status.parse()?,
            workload_type: value.workload_type.parse()?,
            priority: WorkloadPriority::try_from(value.priority)?,
            labels: value
                .labels
                .0
                .into_iter()
                .map(|label| WorkloadLabel::new(label.key, label.value))
                .collect(),
            id: value.id,
            dataplane_id: value.dataplane_id,
            dataplane_group: value.dataplane_group,
            last_heartbeat_at: value.last_heartbeat_at,
            input_payload: value.input_payload,
            log_path: value.log_path,
            mutex_key: value.mutex_key,
            deadline: value.deadline,
            signal_input: value.signal_input,
            termination_source: value.termination_source,
            termination_reason: value.termination_reason,
            auto_id: value.auto_id,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

fn into_workload(row: Option<workload::WorkloadRow>) -> ConduitResult<Option<Workload>> {
    row.map(Workload::try_from).transpose()
}

fn into_workloads(rows: Vec<workload::WorkloadRow>) -> ConduitResult<Vec<Workload>> {
    rows.into_iter().map(Workload::try_from).collect()
}

fn status_names(statuses: &[WorkloadStatus]) -> Vec<&'static str> {
    statuses.iter().map(WorkloadStatus::as_str).collect()
}

fn type_names(workload_types: &[WorkloadType]) -> Vec<&'static str> {
    workload_types.iter().map(WorkloadType::as_str).collect()
}

/// Postgres implementation of every store trait.
///
/// Each operation is one statement, so concurrent callers only ever race
/// inside the database where the compare-and-set conditions are evaluated.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database described by `config` and applies pending migrations.
    pub async fn connect(config: &PgConnectionConfig) -> ConduitResult<Self> {
        db::migrate_database(config).await.map_err(|err| {
            conduit_error!(
                ErrorKind::StorageError,
                "Failed to migrate the conduit database",
                err
            )
        })?;

        let pool =
            db::connect_to_database(config, MIN_POOL_CONNECTIONS, MAX_POOL_CONNECTIONS).await?;
        debug!(database = %config.name, "connected to the conduit database");

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the last state snapshot persisted for `connection_id`.
    pub async fn connection_state(
        &self,
        connection_id: ConnectionId,
    ) -> ConduitResult<Option<StateSnapshot>> {
        let Some(value) = snapshot::get_connection_state(&self.pool, connection_id).await? else {
            return Ok(None);
        };

        Ok(Some(serde_json::from_value(value)?))
    }
}

impl WorkloadRepository for PostgresStore {
    async fn insert_workload(&self, workload: Workload) -> ConduitResult<Option<Workload>> {
        let row = workload::WorkloadRow::from(&workload);

        into_workload(workload::insert_workload(&self.pool, &row).await?)
    }

    async fn get_workload(&self, id: &str) -> ConduitResult<Option<Workload>> {
        into_workload(workload::get_workload(&self.pool, id).await?)
    }

    async fn claim_workload(
        &self,
        id: &str,
        dataplane_id: &str,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Option<Workload>> {
        into_workload(workload::claim_workload(&self.pool, id, dataplane_id, deadline).await?)
    }

    async fn advance_workload(
        &self,
        id: &str,
        from: &[WorkloadStatus],
        to: WorkloadStatus,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Option<Workload>> {
        if to.is_terminal() {
            bail!(
                ErrorKind::InvalidStatusTransition,
                "Terminal statuses must be set through termination",
                to
            );
        }

        let from = status_names(from);
        into_workload(
            workload::advance_workload(&self.pool, id, &from, to.as_str(), deadline).await?,
        )
    }

    async fn heartbeat_workload(
        &self,
        id: &str,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Option<Workload>> {
        into_workload(workload::heartbeat_workload(&self.pool, id, deadline).await?)
    }

    async fn terminate_workload(
        &self,
        id: &str,
        from: &[WorkloadStatus],
        to: WorkloadStatus,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> ConduitResult<Option<Workload>> {
        let from = status_names(from);
        into_workload(
            workload::terminate_workload(&self.pool, id, &from, to.as_str(), source, reason)
                .await?,
        )
    }

    async fn search_by_mutex_key_and_statuses(
        &self,
        mutex_key: &str,
        statuses: &[WorkloadStatus],
    ) -> ConduitResult<Vec<Workload>> {
        let statuses = status_names(statuses);
        into_workloads(
            workload::search_by_mutex_key_and_statuses(&self.pool, mutex_key, &statuses).await?,
        )
    }

    async fn search_workloads(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        updated_before: Option<DateTime<Utc>>,
    ) -> ConduitResult<Vec<Workload>> {
        let statuses = statuses.map(status_names);
        into_workloads(
            workload::search_workloads(
                &self.pool,
                dataplane_ids,
                statuses.as_deref(),
                updated_before,
            )
            .await?,
        )
    }

    async fn search_by_expired_deadline(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        deadline: DateTime<Utc>,
    ) -> ConduitResult<Vec<Workload>> {
        let statuses = statuses.map(status_names);
        into_workloads(
            workload::search_by_expired_deadline(
                &self.pool,
                dataplane_ids,
                statuses.as_deref(),
                deadline,
            )
            .await?,
        )
    }

    async fn search_by_type_status_and_creation_date(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        workload_types: Option<&[WorkloadType]>,
        created_before: DateTime<Utc>,
    ) -> ConduitResult<Vec<Workload>> {
        let statuses = statuses.map(status_names);
        let workload_types = workload_types.map(type_names);
        into_workloads(
            workload::search_by_type_status_and_creation_date(
                &self.pool,
                dataplane_ids,
                statuses.as_deref(),
                workload_types.as_deref(),
                created_before,
            )
            .await?,
        )
    }
}

impl WorkloadQueue for PostgresStore {
    async fn enqueue(
        &self,
        workload_id: &str,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
    ) -> ConduitResult<()> {
        queue::enqueue_workload(&self.pool, workload_id, dataplane_group, priority.as_i32())
            .await
            .map_err(|err| conduit_error!(ErrorKind::QueueError, "Failed to enqueue workload", err))
    }

    async fn poll(
        &self,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
        quantity: u32,
        redelivery: Duration,
    ) -> ConduitResult<Vec<String>> {
        queue::poll_workload_queue(
            &self.pool,
            dataplane_group,
            priority.as_i32(),
            quantity,
            redelivery,
        )
        .await
        .map_err(|err| conduit_error!(ErrorKind::QueueError, "Failed to poll workload queue", err))
    }

    async fn ack(&self, workload_id: &str) -> ConduitResult<()> {
        let acked = queue::ack_workload_queue_item(&self.pool, workload_id)
            .await
            .map_err(|err| {
                conduit_error!(ErrorKind::QueueError, "Failed to ack workload queue item", err)
            })?;
        debug!(workload_id, acked, "acked workload queue entries");

        Ok(())
    }

    async fn count_depth(
        &self,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
    ) -> ConduitResult<u64> {
        let depth =
            queue::count_workload_queue_depth(&self.pool, dataplane_group, priority.as_i32())
                .await?;

        Ok(depth.max(0) as u64)
    }

    async fn stats(&self) -> ConduitResult<Vec<WorkloadQueueStats>> {
        queue::get_workload_queue_stats(&self.pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok(WorkloadQueueStats {
                    dataplane_group: row.dataplane_group,
                    priority: WorkloadPriority::try_from(row.priority)?,
                    enqueued_count: row.enqueued_count.max(0) as u64,
                })
            })
            .collect()
    }
}

impl SyncPersistenceStore for PostgresStore {
    async fn persist_state(
        &self,
        connection_id: ConnectionId,
        snapshot: &StateSnapshot,
    ) -> ConduitResult<()> {
        let state = serde_json::to_value(snapshot).map_err(|err| {
            conduit_error!(
                ErrorKind::SerializationError,
                "Failed to serialize state snapshot",
                err
            )
        })?;

        snapshot::upsert_connection_state(&self.pool, connection_id, &state).await?;

        Ok(())
    }

    async fn persist_stats(&self, request: &SaveStatsRequest) -> ConduitResult<()> {
        let stats = serde_json::to_value(&request.stats).map_err(|err| {
            conduit_error!(
                ErrorKind::SerializationError,
                "Failed to serialize sync stats",
                err
            )
        })?;

        snapshot::upsert_sync_stats(&self.pool, request.job_id, request.attempt_number, &stats)
            .await?;

        Ok(())
    }
}
