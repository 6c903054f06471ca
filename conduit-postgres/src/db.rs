use conduit_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};
use tracing::info;

/// Schema owning every conduit table, including the sqlx migration ledger.
pub const CONDUIT_SCHEMA: &str = "conduit";

/// Opens a connection pool to the conduit database.
pub async fn connect_to_database(
    config: &PgConnectionConfig,
    min_connections: u32,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    let options: PgConnectOptions = config.with_db();

    PgPoolOptions::new()
        .min_connections(min_connections)
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

/// Applies pending migrations inside the `conduit` schema.
///
/// The search path is pinned to the schema on every migration connection so
/// that the `_sqlx_migrations` ledger does not land in `public`.
pub async fn migrate_database(config: &PgConnectionConfig) -> Result<(), sqlx::Error> {
    let options: PgConnectOptions = config.with_db();

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists conduit;").await?;
                conn.execute("set search_path = 'conduit';").await?;

                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    info!("applying conduit migrations");

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("conduit migrations applied");

    Ok(())
}
