use std::future::Future;
use std::time::Duration;

use crate::error::ConduitResult;
use crate::workload::{WorkloadPriority, WorkloadQueueStats};

/// Dispatch queue from which dataplanes pick up new workloads.
///
/// Entries are bucketed by dataplane group and priority. Polling leases
/// entries for a redelivery window instead of removing them; an entry only
/// leaves the queue once it is acknowledged.
pub trait WorkloadQueue {
    fn enqueue(
        &self,
        workload_id: &str,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
    ) -> impl Future<Output = ConduitResult<()>> + Send;

    /// Leases up to `quantity` entries of a bucket for `redelivery` and
    /// returns their workload ids, oldest first.
    fn poll(
        &self,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
        quantity: u32,
        redelivery: Duration,
    ) -> impl Future<Output = ConduitResult<Vec<String>>> + Send;

    /// Acknowledges the entries of a workload. Acknowledging an already
    /// acknowledged or unknown workload succeeds.
    fn ack(&self, workload_id: &str) -> impl Future<Output = ConduitResult<()>> + Send;

    fn count_depth(
        &self,
        dataplane_group: Option<&str>,
        priority: WorkloadPriority,
    ) -> impl Future<Output = ConduitResult<u64>> + Send;

    fn stats(&self) -> impl Future<Output = ConduitResult<Vec<WorkloadQueueStats>>> + Send;
}
