use sqlx::PgPool;
use uuid::Uuid;

/// Replaces the persisted checkpoint state of a connection.
pub async fn upsert_connection_state(
    pool: &PgPool,
    connection_id: Uuid,
    state: &serde_json::Value,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into conduit.connection_state (connection_id, state)
        values ($1, $2)
        on conflict (connection_id)
        do update set state = excluded.state, updated_at = now()
        "#,
    )
    .bind(connection_id)
    .bind(state)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_connection_state(
    pool: &PgPool,
    connection_id: Uuid,
) -> sqlx::Result<Option<serde_json::Value>> {
    sqlx::query_scalar::<_, serde_json::Value>(
        r#"
        select state from conduit.connection_state where connection_id = $1
        "#,
    )
    .bind(connection_id)
    .fetch_optional(pool)
    .await
}

/// Replaces the stats of one sync attempt. Stats are cumulative, so the last
/// write always carries the most complete picture.
pub async fn upsert_sync_stats(
    pool: &PgPool,
    job_id: i64,
    attempt_number: i32,
    stats: &serde_json::Value,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into conduit.sync_stats (job_id, attempt_number, stats)
        values ($1, $2, $3)
        on conflict (job_id, attempt_number)
        do update set stats = excluded.stats, updated_at = now()
        "#,
    )
    .bind(job_id)
    .bind(attempt_number)
    .bind(stats)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_sync_stats(
    pool: &PgPool,
    job_id: i64,
    attempt_number: i32,
) -> sqlx::Result<Option<serde_json::Value>> {
    sqlx::query_scalar::<_, serde_json::Value>(
        r#"
        select stats from conduit.sync_stats where job_id = $1 and attempt_number = $2
        "#,
    )
    .bind(job_id)
    .bind(attempt_number)
    .fetch_optional(pool)
    .await
}
