use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::ConduitResult;
use crate::workload::{Workload, WorkloadStatus, WorkloadType};

/// Durable storage of workload records.
///
/// Every mutating method is a single compare-and-set on the current status:
/// it returns the updated workload when the status matched and [`None`]
/// otherwise. A [`None`] is never an error; callers re-read the workload to
/// find out why nothing matched.
///
/// Implementations must be safe to call from many concurrent callers.
pub trait WorkloadRepository {
    /// Inserts `workload` unless its id is already taken, in which case [`None`]
    /// is returned and the existing record is left untouched.
    fn insert_workload(
        &self,
        workload: Workload,
    ) -> impl Future<Output = ConduitResult<Option<Workload>>> + Send;

    fn get_workload(&self, id: &str)
    -> impl Future<Output = ConduitResult<Option<Workload>>> + Send;

    /// Moves a pending workload to claimed by `dataplane_id`.
    ///
    /// A workload already claimed or launched by the same dataplane is
    /// returned unchanged.
    fn claim_workload(
        &self,
        id: &str,
        dataplane_id: &str,
        deadline: DateTime<Utc>,
    ) -> impl Future<Output = ConduitResult<Option<Workload>>> + Send;

    /// Moves a workload whose status is one of `from` to the non terminal
    /// status `to` and sets its deadline.
    fn advance_workload(
        &self,
        id: &str,
        from: &[WorkloadStatus],
        to: WorkloadStatus,
        deadline: DateTime<Utc>,
    ) -> impl Future<Output = ConduitResult<Option<Workload>>> + Send;

    /// Refreshes the deadline and heartbeat time of a running workload.
    fn heartbeat_workload(
        &self,
        id: &str,
        deadline: DateTime<Utc>,
    ) -> impl Future<Output = ConduitResult<Option<Workload>>> + Send;

    /// Moves a workload whose status is one of `from` to the terminal status
    /// `to`, recording the termination source and reason and clearing its
    /// deadline.
    fn terminate_workload(
        &self,
        id: &str,
        from: &[WorkloadStatus],
        to: WorkloadStatus,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> impl Future<Output = ConduitResult<Option<Workload>>> + Send;

    /// Returns workloads holding `mutex_key` in one of `statuses`, newest first.
    fn search_by_mutex_key_and_statuses(
        &self,
        mutex_key: &str,
        statuses: &[WorkloadStatus],
    ) -> impl Future<Output = ConduitResult<Vec<Workload>>> + Send;

    /// Returns workloads matching every given filter, oldest first. A [`None`]
    /// filter matches everything.
    fn search_workloads(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        updated_before: Option<DateTime<Utc>>,
    ) -> impl Future<Output = ConduitResult<Vec<Workload>>> + Send;

    /// Returns workloads whose deadline is strictly before `deadline`.
    fn search_by_expired_deadline(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        deadline: DateTime<Utc>,
    ) -> impl Future<Output = ConduitResult<Vec<Workload>>> + Send;

    /// Returns workloads created strictly before `created_before`.
    fn search_by_type_status_and_creation_date(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        workload_types: Option<&[WorkloadType]>,
        created_before: DateTime<Utc>,
    ) -> impl Future<Output = ConduitResult<Vec<Workload>>> + Send;
}
