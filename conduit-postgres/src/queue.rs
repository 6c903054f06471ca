use std::time::Duration;

use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Pending entry counts of one (group, priority) bucket of the dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct WorkloadQueueStatsRow {
    pub dataplane_group: Option<String>,
    pub priority: i32,
    pub enqueued_count: i64,
}

pub async fn enqueue_workload(
    pool: &PgPool,
    workload_id: &str,
    dataplane_group: Option<&str>,
    priority: i32,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into conduit.workload_queue (id, workload_id, dataplane_group, priority)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(workload_id)
    .bind(dataplane_group)
    .bind(priority)
    .execute(pool)
    .await?;

    Ok(())
}

/// Leases up to `quantity` unacknowledged entries of a bucket for `redelivery`
/// and returns their workload ids, oldest first.
///
/// Rows locked by a concurrent poller are skipped rather than waited on.
pub async fn poll_workload_queue(
    pool: &PgPool,
    dataplane_group: Option<&str>,
    priority: i32,
    quantity: u32,
    redelivery: Duration,
) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(
        r#"
        with leased as (
            update conduit.workload_queue
            set poll_deadline = now() + make_interval(secs => $4)
            where id in (
                select id from conduit.workload_queue
                where dataplane_group is not distinct from $1
                  and priority = $2
                  and acked_at is null
                  and poll_deadline <= now()
                order by created_at
                limit $3
                for update skip locked
            )
            returning workload_id, created_at
        )
        select workload_id from leased order by created_at
        "#,
    )
    .bind(dataplane_group)
    .bind(priority)
    .bind(i64::from(quantity))
    .bind(redelivery.as_secs_f64())
    .fetch_all(pool)
    .await
}

/// Acknowledges every pending entry of a workload. Acknowledging twice is a no-op.
pub async fn ack_workload_queue_item(pool: &PgPool, workload_id: &str) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"
        update conduit.workload_queue
        set acked_at = now()
        where workload_id = $1 and acked_at is null
        "#,
    )
    .bind(workload_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn count_workload_queue_depth(
    pool: &PgPool,
    dataplane_group: Option<&str>,
    priority: i32,
) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        select count(*) from conduit.workload_queue
        where dataplane_group is not distinct from $1
          and priority = $2
          and acked_at is null
        "#,
    )
    .bind(dataplane_group)
    .bind(priority)
    .fetch_one(pool)
    .await
}

pub async fn get_workload_queue_stats(
    pool: &PgPool,
) -> sqlx::Result<Vec<WorkloadQueueStatsRow>> {
    sqlx::query_as::<_, WorkloadQueueStatsRow>(
        r#"
        select dataplane_group, priority, count(*) as enqueued_count
        from conduit.workload_queue
        where acked_at is null
        group by dataplane_group, priority
        order by dataplane_group nulls first, priority
        "#,
    )
    .fetch_all(pool)
    .await
}
