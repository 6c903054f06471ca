use conduit_config::shared::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

use crate::db::migrate_database;

/// Connection settings for a throwaway database on the local test server.
///
/// Host, port and credentials come from `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`,
/// `TESTS_DATABASE_USERNAME` and `TESTS_DATABASE_PASSWORD`, defaulting to a local
/// `postgres` superuser.
pub fn local_test_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").unwrap_or_else(|_| "localhost".to_owned()),
        port: std::env::var("TESTS_DATABASE_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(5432),
        name: format!("conduit_test_{}", Uuid::new_v4().simple()),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .unwrap_or_else(|_| "postgres".to_owned()),
        password: std::env::var("TESTS_DATABASE_PASSWORD").ok().map(Into::into),
        tls: TlsConfig::default(),
    }
}

/// Creates the database named in `config`, applies migrations and returns a pool.
///
/// # Panics
/// Panics if the server is unreachable or any setup statement fails.
pub async fn create_pg_database(config: &PgConnectionConfig) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"create database "{}";"#, config.name))
        .await
        .expect("Failed to create database");

    migrate_database(config)
        .await
        .expect("Failed to migrate database");

    PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to Postgres")
}

/// Terminates remaining connections and drops the database named in `config`.
///
/// # Panics
/// Panics if any statement fails.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");

    connection
        .execute(&*format!(
            r#"
            select pg_terminate_backend(pg_stat_activity.pid)
            from pg_stat_activity
            where pg_stat_activity.datname = '{}'
            and pid <> pg_backend_pid();"#,
            config.name
        ))
        .await
        .expect("Failed to terminate database connections");

    connection
        .execute(&*format!(r#"drop database if exists "{}";"#, config.name))
        .await
        .expect("Failed to destroy database");
}
