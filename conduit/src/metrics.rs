use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

// Workloads
pub const CONDUIT_WORKLOAD_TRANSITIONS_TOTAL: &str = "conduit_workload_transitions_total";
pub const CONDUIT_WORKLOAD_TIME_SINCE_CREATION_SECONDS: &str =
    "conduit_workload_time_since_creation_seconds";
pub const CONDUIT_WORKLOAD_LAUNCH_OUTCOMES_TOTAL: &str = "conduit_workload_launch_outcomes_total";
pub const CONDUIT_WORKLOAD_SIGNALS_TOTAL: &str = "conduit_workload_signals_total";
pub const CONDUIT_WORKLOAD_SUPERSEDED_TOTAL: &str = "conduit_workload_superseded_total";

// Stream status
pub const CONDUIT_STREAM_STATUS_EVENTS_TOTAL: &str = "conduit_stream_status_events_total";
pub const CONDUIT_STREAM_STATUS_TRACKING_SKIPPED_TOTAL: &str =
    "conduit_stream_status_tracking_skipped_total";
pub const CONDUIT_STREAM_STATUS_TRACKING_ERRORS_TOTAL: &str =
    "conduit_stream_status_tracking_errors_total";

// Sync persistence
pub const CONDUIT_STATE_COMMIT_ATTEMPTS_TOTAL: &str = "conduit_state_commit_attempts_total";
pub const CONDUIT_STATE_COMMIT_FAILURES_TOTAL: &str = "conduit_state_commit_failures_total";
pub const CONDUIT_STATE_COMMIT_SUCCESSES_TOTAL: &str = "conduit_state_commit_successes_total";
pub const CONDUIT_STATE_COMMIT_NOT_ATTEMPTED_TOTAL: &str =
    "conduit_state_commit_not_attempted_total";
pub const CONDUIT_STATE_COMMIT_CLOSE_SUCCESSES_TOTAL: &str =
    "conduit_state_commit_close_successes_total";
pub const CONDUIT_STATS_COMMIT_ATTEMPTS_TOTAL: &str = "conduit_stats_commit_attempts_total";
pub const CONDUIT_STATS_COMMIT_FAILURES_TOTAL: &str = "conduit_stats_commit_failures_total";
pub const CONDUIT_STATS_COMMIT_SUCCESSES_TOTAL: &str = "conduit_stats_commit_successes_total";
pub const CONDUIT_STATS_COMMIT_NOT_ATTEMPTED_TOTAL: &str =
    "conduit_stats_commit_not_attempted_total";
pub const CONDUIT_STATS_COMMIT_CLOSE_SUCCESSES_TOTAL: &str =
    "conduit_stats_commit_close_successes_total";

// Labels
pub const WORKLOAD_TYPE: &str = "type";
pub const STATUS: &str = "status";
pub const DATAPLANE_ID: &str = "dataplane_id";
pub const OUTCOME: &str = "outcome";
pub const FAILURE_TYPE: &str = "failure_type";
pub const RUN_STATE: &str = "run_state";
pub const REASON: &str = "reason";
pub const CONNECTION_ID: &str = "connection_id";

/// Label value used when a workload has not been claimed by any dataplane yet.
pub const UNASSIGNED_DATAPLANE: &str = "unassigned";

/// Registers descriptions of the metrics emitted by conduit. Safe to call
/// repeatedly; descriptions are registered once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            CONDUIT_WORKLOAD_TRANSITIONS_TOTAL,
            Unit::Count,
            "Number of successful workload status transitions"
        );

        describe_histogram!(
            CONDUIT_WORKLOAD_TIME_SINCE_CREATION_SECONDS,
            Unit::Seconds,
            "Time elapsed between workload creation and a status transition"
        );

        describe_counter!(
            CONDUIT_WORKLOAD_LAUNCH_OUTCOMES_TOTAL,
            Unit::Count,
            "Workloads failed by the launcher, by workload type"
        );

        describe_counter!(
            CONDUIT_WORKLOAD_SIGNALS_TOTAL,
            Unit::Count,
            "Completion signals sent to the orchestrator, by outcome"
        );

        describe_counter!(
            CONDUIT_WORKLOAD_SUPERSEDED_TOTAL,
            Unit::Count,
            "Active workloads failed because a newer workload took their mutex key"
        );

        describe_counter!(
            CONDUIT_STREAM_STATUS_EVENTS_TOTAL,
            Unit::Count,
            "Stream run state change events published"
        );

        describe_counter!(
            CONDUIT_STREAM_STATUS_TRACKING_SKIPPED_TOTAL,
            Unit::Count,
            "Messages not tracked because stream status tracking is disabled"
        );

        describe_counter!(
            CONDUIT_STREAM_STATUS_TRACKING_ERRORS_TOTAL,
            Unit::Count,
            "Stream status bookkeeping failures swallowed to keep the sync running"
        );

        for (name, description) in [
            (
                CONDUIT_STATE_COMMIT_ATTEMPTS_TOTAL,
                "Attempts to persist checkpoint state",
            ),
            (
                CONDUIT_STATE_COMMIT_FAILURES_TOTAL,
                "Failed attempts to persist checkpoint state",
            ),
            (
                CONDUIT_STATE_COMMIT_SUCCESSES_TOTAL,
                "Successful attempts to persist checkpoint state",
            ),
            (
                CONDUIT_STATE_COMMIT_NOT_ATTEMPTED_TOTAL,
                "Checkpoint state left unpersisted when persistence shut down",
            ),
            (
                CONDUIT_STATE_COMMIT_CLOSE_SUCCESSES_TOTAL,
                "Shutdowns that left no checkpoint state behind",
            ),
            (
                CONDUIT_STATS_COMMIT_ATTEMPTS_TOTAL,
                "Attempts to persist sync stats",
            ),
            (
                CONDUIT_STATS_COMMIT_FAILURES_TOTAL,
                "Failed attempts to persist sync stats",
            ),
            (
                CONDUIT_STATS_COMMIT_SUCCESSES_TOTAL,
                "Successful attempts to persist sync stats",
            ),
            (
                CONDUIT_STATS_COMMIT_NOT_ATTEMPTED_TOTAL,
                "Sync stats left unpersisted when persistence shut down",
            ),
            (
                CONDUIT_STATS_COMMIT_CLOSE_SUCCESSES_TOTAL,
                "Shutdowns that left no sync stats behind",
            ),
        ] {
            describe_counter!(name, Unit::Count, description);
        }
    });
}
