use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A key/value label attached to a workload, stored inline as jsonb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadLabelRow {
    pub key: String,
    pub value: String,
}

/// A row of `conduit.workloads`.
///
/// Status and type are kept as their snake case text forms; conversion into
/// the domain enums happens in the store implementation.
#[derive(Debug, Clone, FromRow)]
pub struct WorkloadRow {
    pub id: String,
    pub dataplane_id: Option<String>,
    pub dataplane_group: Option<String>,
    pub status: String,
    pub workload_type: String,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub labels: Json<Vec<WorkloadLabelRow>>,
    pub input_payload: String,
    pub log_path: String,
    pub mutex_key: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub signal_input: Option<String>,
    pub priority: i32,
    pub termination_source: Option<String>,
    pub termination_reason: Option<String>,
    pub auto_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inserts a workload unless one with the same id already exists.
///
/// Returns [`None`] when the id is taken.
pub async fn insert_workload(
    pool: &PgPool,
    row: &WorkloadRow,
) -> sqlx::Result<Option<WorkloadRow>> {
    sqlx::query_as::<_, WorkloadRow>(
        r#"
        insert into conduit.workloads (
            id, dataplane_id, dataplane_group, status, workload_type, last_heartbeat_at,
            labels, input_payload, log_path, mutex_key, deadline, signal_input, priority,
            termination_source, termination_reason, auto_id, created_at, updated_at
        )
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        on conflict (id) do nothing
        returning *
        "#,
    )
    .bind(&row.id)
    .bind(&row.dataplane_id)
    .bind(&row.dataplane_group)
    .bind(&row.status)
    .bind(&row.workload_type)
    .bind(row.last_heartbeat_at)
    .bind(&row.labels)
    .bind(&row.input_payload)
    .bind(&row.log_path)
    .bind(&row.mutex_key)
    .bind(row.deadline)
    .bind(&row.signal_input)
    .bind(row.priority)
    .bind(&row.termination_source)
    .bind(&row.termination_reason)
    .bind(row.auto_id)
    .bind(row.created_at)
    .bind(row.updated_at)
    .fetch_optional(pool)
    .await
}

pub async fn get_workload(pool: &PgPool, id: &str) -> sqlx::Result<Option<WorkloadRow>> {
    sqlx::query_as::<_, WorkloadRow>(
        r#"
        select * from conduit.workloads where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Claims a pending workload for `dataplane_id`.
///
/// A workload already claimed or launched by the same dataplane is returned
/// as is, without refreshing its deadline. Both branches read the snapshot
/// taken before the update, so at most one of them yields a row.
pub async fn claim_workload(
    pool: &PgPool,
    id: &str,
    dataplane_id: &str,
    deadline: DateTime<Utc>,
) -> sqlx::Result<Option<WorkloadRow>> {
    sqlx::query_as::<_, WorkloadRow>(
        r#"
        with claimed as (
            update conduit.workloads
            set dataplane_id = $2, status = 'claimed', deadline = $3, updated_at = now()
            where id = $1 and status = 'pending'
            returning *
        )
        select * from claimed
        union all
        select * from conduit.workloads
        where id = $1 and dataplane_id = $2 and status in ('claimed', 'launched')
        "#,
    )
    .bind(id)
    .bind(dataplane_id)
    .bind(deadline)
    .fetch_optional(pool)
    .await
}

/// Moves a workload whose status is in `from` to `to`, refreshing its deadline.
///
/// Used by launch and running, which only differ by their allowed predecessors.
pub async fn advance_workload(
    pool: &PgPool,
    id: &str,
    from: &[&str],
    to: &str,
    deadline: DateTime<Utc>,
) -> sqlx::Result<Option<WorkloadRow>> {
    sqlx::query_as::<_, WorkloadRow>(
        r#"
        update conduit.workloads
        set status = $3, deadline = $4, updated_at = now()
        where id = $1 and status = any($2)
        returning *
        "#,
    )
    .bind(id)
    .bind(from)
    .bind(to)
    .bind(deadline)
    .fetch_optional(pool)
    .await
}

/// Records a heartbeat on a running workload. Status is left untouched.
pub async fn heartbeat_workload(
    pool: &PgPool,
    id: &str,
    deadline: DateTime<Utc>,
) -> sqlx::Result<Option<WorkloadRow>> {
    sqlx::query_as::<_, WorkloadRow>(
        r#"
        update conduit.workloads
        set deadline = $2, last_heartbeat_at = now(), updated_at = now()
        where id = $1 and status = 'running'
        returning *
        "#,
    )
    .bind(id)
    .bind(deadline)
    .fetch_optional(pool)
    .await
}

/// Moves a workload whose status is in `from` to the terminal status `to`,
/// recording who ended it and why and clearing its deadline.
pub async fn terminate_workload(
    pool: &PgPool,
    id: &str,
    from: &[&str],
    to: &str,
    source: Option<&str>,
    reason: Option<&str>,
) -> sqlx::Result<Option<WorkloadRow>> {
    sqlx::query_as::<_, WorkloadRow>(
        r#"
        update conduit.workloads
        set status = $3,
            termination_source = $4,
            termination_reason = $5,
            deadline = null,
            updated_at = now()
        where id = $1 and status = any($2)
        returning *
        "#,
    )
    .bind(id)
    .bind(from)
    .bind(to)
    .bind(source)
    .bind(reason)
    .fetch_optional(pool)
    .await
}

pub async fn search_by_mutex_key_and_statuses(
    pool: &PgPool,
    mutex_key: &str,
    statuses: &[&str],
) -> sqlx::Result<Vec<WorkloadRow>> {
    sqlx::query_as::<_, WorkloadRow>(
        r#"
        select * from conduit.workloads
        where mutex_key = $1 and status = any($2)
        order by created_at desc
        "#,
    )
    .bind(mutex_key)
    .bind(statuses)
    .fetch_all(pool)
    .await
}

/// Lists workloads filtered by dataplane, status and last update. A [`None`]
/// filter matches everything.
pub async fn search_workloads(
    pool: &PgPool,
    dataplane_ids: Option<&[String]>,
    statuses: Option<&[&str]>,
    updated_before: Option<DateTime<Utc>>,
) -> sqlx::Result<Vec<WorkloadRow>> {
    sqlx::query_as::<_, WorkloadRow>(
        r#"
        select * from conduit.workloads
        where ($1::text[] is null or dataplane_id = any($1))
          and ($2::text[] is null or status = any($2))
          and ($3::timestamptz is null or updated_at < $3)
        order by created_at
        "#,
    )
    .bind(dataplane_ids)
    .bind(statuses)
    .bind(updated_before)
    .fetch_all(pool)
    .await
}

/// Lists workloads whose deadline is strictly before `deadline`.
pub async fn search_by_expired_deadline(
    pool: &PgPool,
    dataplane_ids: Option<&[String]>,
    statuses: Option<&[&str]>,
    deadline: DateTime<Utc>,
) -> sqlx::Result<Vec<WorkloadRow>> {
    sqlx::query_as::<_, WorkloadRow>(
        r#"
        select * from conduit.workloads
        where ($1::text[] is null or dataplane_id = any($1))
          and ($2::text[] is null or status = any($2))
          and deadline < $3
        order by created_at
        "#,
    )
    .bind(dataplane_ids)
    .bind(statuses)
    .bind(deadline)
    .fetch_all(pool)
    .await
}

/// Lists workloads created strictly before `created_before`.
pub async fn search_by_type_status_and_creation_date(
    pool: &PgPool,
    dataplane_ids: Option<&[String]>,
    statuses: Option<&[&str]>,
    workload_types: Option<&[&str]>,
    created_before: DateTime<Utc>,
) -> sqlx::Result<Vec<WorkloadRow>> {
    sqlx::query_as::<_, WorkloadRow>(
        r#"
        select * from conduit.workloads
        where ($1::text[] is null or dataplane_id = any($1))
          and ($2::text[] is null or status = any($2))
          and ($3::text[] is null or workload_type = any($3))
          and created_at < $4
        order by created_at
        "#,
    )
    .bind(dataplane_ids)
    .bind(statuses)
    .bind(workload_types)
    .bind(created_before)
    .fetch_all(pool)
    .await
}
