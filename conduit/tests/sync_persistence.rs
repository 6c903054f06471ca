use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use conduit::error::ErrorKind;
use conduit::metrics::{
    CONDUIT_STATE_COMMIT_CLOSE_SUCCESSES_TOTAL, CONDUIT_STATE_COMMIT_FAILURES_TOTAL,
    CONDUIT_STATE_COMMIT_NOT_ATTEMPTED_TOTAL, CONDUIT_STATS_COMMIT_CLOSE_SUCCESSES_TOTAL,
    CONDUIT_STATS_COMMIT_NOT_ATTEMPTED_TOTAL,
};
use conduit::persistence::{StateSnapshot, SyncPersistence};
use conduit::protocol::{ProtocolMessage, RecordMessage, StateMessage, StreamDescriptor};
use conduit::stats::SyncStatsTracker;
use conduit::store::both::memory::MemoryStore;
use conduit::store::sync::SyncPersistenceStore;
use conduit_config::shared::{RetryConfig, SyncPersistenceConfig};
use conduit_telemetry::tracing::init_test_tracing;
use serde_json::json;
use uuid::Uuid;

use crate::common::{FlakyStore, HangingStore, sync_context, with_captured_metrics};

mod common;

fn config(flush_period_ms: u64, shutdown_timeout_ms: u64) -> SyncPersistenceConfig {
    SyncPersistenceConfig {
        flush_period_ms,
        shutdown_timeout_ms,
        final_flush_retry: RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
        },
    }
}

fn persistence<S>(store: S, config: SyncPersistenceConfig) -> SyncPersistence<S>
where
    S: SyncPersistenceStore + Send + Sync + 'static,
{
    SyncPersistence::new(
        sync_context(),
        config,
        store,
        Arc::new(SyncStatsTracker::new()),
    )
}

fn state(name: &str, cursor: i64) -> StateMessage {
    StateMessage::stream(
        StreamDescriptor::new(Some("public"), name),
        json!({ "cursor": cursor }),
        cursor,
    )
}

fn record(name: &str) -> ProtocolMessage {
    ProtocolMessage::record(RecordMessage::new(Some("public"), name, json!({ "id": 1 })))
}

#[tokio::test]
async fn test_periodic_flush_persists_latest_state() {
    init_test_tracing();
    let store = MemoryStore::new();
    let persistence = persistence(store.clone(), config(10, 1_000));
    let connection_id = persistence.context().connection_id;

    persistence
        .persist(connection_id, state("users", 1))
        .await
        .unwrap();
    persistence
        .persist(connection_id, state("users", 2))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        store.connection_state(connection_id).await,
        Some(StateSnapshot {
            states: vec![state("users", 2)]
        })
    );
    assert!(!persistence.has_pending_states().await);

    let context = *persistence.context();
    assert!(
        store
            .sync_stats(context.job_id, context.attempt_number)
            .await
            .is_some()
    );

    persistence.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_flush_keeps_states_for_the_next_flush() {
    init_test_tracing();
    let store = FlakyStore::new();
    store.fail_states(true);
    let persistence = persistence(store.clone(), config(10, 1_000));
    let connection_id = persistence.context().connection_id;

    persistence
        .persist(connection_id, state("users", 1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    persistence
        .persist(connection_id, state("orders", 7))
        .await
        .unwrap();

    assert!(store.state_calls() >= 1);
    assert!(store.persisted_states().is_empty());
    // Stats wait for their states to be written.
    assert_eq!(store.stats_calls(), 0);

    store.fail_states(false);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let latest = store.persisted_states().pop().unwrap();
    assert_eq!(latest.states, vec![state("orders", 7), state("users", 1)]);
    assert!(store.stats_calls() >= 1);

    persistence.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_writes_remaining_stats() {
    init_test_tracing();
    let store = MemoryStore::new();
    let persistence = persistence(store.clone(), config(60_000, 1_000));
    let connection_id = persistence.context().connection_id;

    persistence
        .persist(connection_id, state("users", 1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    persistence.stats().track_source_message(&record("users"));
    persistence.stats().track_source_message(&record("users"));
    persistence.shutdown().await.unwrap();

    let context = *persistence.context();
    let stats = store
        .sync_stats(context.job_id, context.attempt_number)
        .await
        .unwrap();
    assert_eq!(stats.totals.records_emitted, 2);
    assert_eq!(persistence.last_persisted_stats().await, Some(stats));
}

#[tokio::test]
async fn test_rejects_state_of_another_connection() {
    init_test_tracing();
    let persistence = persistence(MemoryStore::new(), config(10, 1_000));

    let err = persistence
        .persist(Uuid::new_v4(), state("users", 1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert!(!persistence.has_pending_states().await);
}

#[tokio::test]
async fn test_rejects_mixed_state_types() {
    init_test_tracing();
    let persistence = persistence(MemoryStore::new(), config(60_000, 1_000));
    let connection_id = persistence.context().connection_id;

    persistence
        .persist(connection_id, state("users", 1))
        .await
        .unwrap();
    let err = persistence
        .persist(
            connection_id,
            StateMessage::Legacy {
                data: json!({ "cursor": 2 }),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);

    persistence.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_persist_after_shutdown_fails() {
    init_test_tracing();
    let persistence = persistence(MemoryStore::new(), config(10, 1_000));
    let connection_id = persistence.context().connection_id;

    persistence.shutdown().await.unwrap();

    let err = persistence
        .persist(connection_id, state("users", 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_final_flush_failure_is_returned() {
    init_test_tracing();
    let store = FlakyStore::new();

    let (result, metrics) = with_captured_metrics(|| {
        let store = store.clone();
        async move {
            store.fail_states(true);
            let persistence = persistence(store.clone(), config(60_000, 1_000));
            let connection_id = persistence.context().connection_id;

            persistence
                .persist(connection_id, state("users", 1))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(store.state_calls(), 1);

            persistence.shutdown().await
        }
    });

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageError);
    assert_eq!(store.state_calls(), 3);
    assert_eq!(store.stats_calls(), 0);

    assert_eq!(metrics.counter(CONDUIT_STATE_COMMIT_FAILURES_TOTAL, &[]), 3);
    assert_eq!(
        metrics.counter(CONDUIT_STATE_COMMIT_NOT_ATTEMPTED_TOTAL, &[]),
        1
    );
    assert_eq!(
        metrics.counter(CONDUIT_STATS_COMMIT_NOT_ATTEMPTED_TOTAL, &[]),
        1
    );
    assert_eq!(
        metrics.counter(CONDUIT_STATE_COMMIT_CLOSE_SUCCESSES_TOTAL, &[]),
        0
    );
}

#[test]
fn test_shutdown_timeout_skips_final_flush() {
    init_test_tracing();
    let store = HangingStore::new();

    let (connection_id, metrics) = with_captured_metrics(|| {
        let store = store.clone();
        async move {
            let persistence = persistence(store.clone(), config(60_000, 50));
            let connection_id = persistence.context().connection_id;

            persistence
                .persist(connection_id, state("users", 1))
                .await
                .unwrap();
            store.wait_for_write().await;

            persistence.shutdown().await.unwrap();
            // A second shutdown is a no-op.
            persistence.shutdown().await.unwrap();

            let err = persistence
                .persist(connection_id, state("users", 2))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);

            connection_id
        }
    });

    let connection_label = connection_id.to_string();
    let labels = [("connection_id", connection_label.as_str())];
    assert_eq!(store.stats_calls(), 0);
    assert_eq!(
        metrics.counter(CONDUIT_STATE_COMMIT_NOT_ATTEMPTED_TOTAL, &labels),
        1
    );
    assert_eq!(
        metrics.counter(CONDUIT_STATS_COMMIT_NOT_ATTEMPTED_TOTAL, &labels),
        1
    );
    assert_eq!(
        metrics.counter(CONDUIT_STATE_COMMIT_CLOSE_SUCCESSES_TOTAL, &labels),
        0
    );
    assert_eq!(
        metrics.counter(CONDUIT_STATS_COMMIT_CLOSE_SUCCESSES_TOTAL, &labels),
        0
    );
}

#[test]
fn test_shutdown_timeout_during_stats_write_counts_stats_not_attempted() {
    init_test_tracing();
    let store = HangingStore::hanging_stats();

    let (connection_id, metrics) = with_captured_metrics(|| {
        let store = store.clone();
        async move {
            let persistence = persistence(store.clone(), config(10, 50));
            let connection_id = persistence.context().connection_id;

            persistence
                .persist(connection_id, state("users", 1))
                .await
                .unwrap();
            store.wait_for_write().await;

            persistence.shutdown().await.unwrap();

            connection_id
        }
    });

    let connection_label = connection_id.to_string();
    let labels = [("connection_id", connection_label.as_str())];
    assert_eq!(store.state_calls(), 1);
    assert_eq!(store.stats_calls(), 1);
    assert_eq!(
        metrics.counter(CONDUIT_STATE_COMMIT_NOT_ATTEMPTED_TOTAL, &labels),
        1
    );
    assert_eq!(
        metrics.counter(CONDUIT_STATS_COMMIT_NOT_ATTEMPTED_TOTAL, &labels),
        1
    );
    assert_eq!(
        metrics.counter(CONDUIT_STATS_COMMIT_CLOSE_SUCCESSES_TOTAL, &labels),
        0
    );
}

#[test]
fn test_final_flush_without_retries_writes_once() {
    init_test_tracing();
    let store = FlakyStore::new();
    store.fail_states(true);

    let (result, metrics) = with_captured_metrics(|| {
        let store = store.clone();
        async move {
            let mut config = config(60_000, 1_000);
            config.final_flush_retry.max_attempts = 1;
            let persistence = persistence(store, config);
            let connection_id = persistence.context().connection_id;

            persistence
                .persist(connection_id, state("users", 1))
                .await
                .unwrap();
            // The first periodic flush runs right away and fails.
            tokio::time::sleep(Duration::from_millis(20)).await;

            persistence.shutdown().await
        }
    });

    assert_eq!(result.unwrap_err().kind(), ErrorKind::StorageError);
    // One periodic write and exactly one final write.
    assert_eq!(store.state_calls(), 2);
    assert_eq!(store.stats_calls(), 0);
    assert_eq!(metrics.counter(CONDUIT_STATE_COMMIT_FAILURES_TOTAL, &[]), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_persist_during_flushes_loses_no_state() {
    init_test_tracing();
    let store = FlakyStore::new();
    let persistence = persistence(store.clone(), config(1, 5_000));
    let connection_id = persistence.context().connection_id;

    let writers = (0..8)
        .map(|writer| {
            let persistence = persistence.clone();
            tokio::spawn(async move {
                for cursor in 1..=20 {
                    persistence
                        .persist(connection_id, state(&format!("stream_{writer}"), cursor))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect::<Vec<_>>();
    for writer in writers {
        writer.await.unwrap();
    }
    persistence.shutdown().await.unwrap();

    let mut latest = HashMap::new();
    for snapshot in store.persisted_states() {
        for message in snapshot.states {
            if let StateMessage::Stream { stream, id } = message {
                latest.insert(stream.stream_descriptor.name, id);
            }
        }
    }

    assert_eq!(latest.len(), 8);
    assert!(latest.values().all(|cursor| *cursor == 20));
    assert!(!persistence.has_pending_states().await);
}
