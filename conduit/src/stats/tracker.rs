use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::protocol::{
    EstimateTrace, EstimateType, ProtocolMessage, RecordMessage, StateMessage, StreamDescriptor,
    TraceMessage,
};

/// Counters of one stream, or of the whole sync when used as totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub records_emitted: u64,
    pub bytes_emitted: u64,
    pub records_committed: u64,
    pub bytes_committed: u64,
    pub estimated_records: u64,
    pub estimated_bytes: u64,
}

impl StreamStats {
    fn add(&mut self, other: &StreamStats) {
        self.records_emitted += other.records_emitted;
        self.bytes_emitted += other.bytes_emitted;
        self.records_committed += other.records_committed;
        self.bytes_committed += other.bytes_committed;
        self.estimated_records += other.estimated_records;
        self.estimated_bytes += other.estimated_bytes;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSyncStats {
    pub stream: StreamDescriptor,
    pub stats: StreamStats,
}

/// Point in time view of the counters of a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub totals: StreamStats,
    /// Sorted by stream descriptor.
    pub streams: Vec<StreamSyncStats>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    records: u64,
    bytes: u64,
}

impl Counts {
    fn add(&mut self, other: Counts) {
        self.records += other.records;
        self.bytes += other.bytes;
    }
}

#[derive(Debug, Default)]
struct StreamCounters {
    emitted: Counts,
    committed: Counts,
    estimated: Option<Counts>,
    /// Emitted since the last source state of the stream.
    staged: Counts,
    /// Emitted before a source state, keyed by the state id, waiting for the
    /// destination to acknowledge it.
    pending: BTreeMap<i64, Counts>,
}

impl StreamCounters {
    fn stage(&mut self, state_id: i64) {
        let staged = std::mem::take(&mut self.staged);
        self.pending.entry(state_id).or_default().add(staged);
    }

    fn commit_up_to(&mut self, state_id: i64) {
        let still_pending = self.pending.split_off(&state_id.saturating_add(1));
        for counts in std::mem::replace(&mut self.pending, still_pending).into_values() {
            self.committed.add(counts);
        }
    }

    fn stats(&self) -> StreamStats {
        let estimated = self.estimated.unwrap_or_default();

        StreamStats {
            records_emitted: self.emitted.records,
            bytes_emitted: self.emitted.bytes,
            records_committed: self.committed.records,
            bytes_committed: self.committed.bytes,
            estimated_records: estimated.records,
            estimated_bytes: estimated.bytes,
        }
    }
}

/// Counts records and bytes flowing through one sync attempt.
///
/// Records read from the source are emitted immediately. They only count as
/// committed once the destination echoes the source state that followed
/// them, since that is the point from which a retry would resume.
#[derive(Debug, Default)]
pub struct SyncStatsTracker {
    streams: DashMap<StreamDescriptor, StreamCounters>,
    sync_estimated_records: AtomicU64,
    sync_estimated_bytes: AtomicU64,
}

impl SyncStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates counters from a message read from the source.
    pub fn track_source_message(&self, message: &ProtocolMessage) {
        match message {
            ProtocolMessage::Record { record } => self.track_record(record),
            ProtocolMessage::State { state } => self.track_source_state(state),
            ProtocolMessage::Trace {
                trace: TraceMessage::Estimate { estimate },
            } => self.track_estimate(estimate),
            ProtocolMessage::Trace { .. } | ProtocolMessage::Other => {}
        }
    }

    /// Updates counters from a message read from the destination.
    pub fn track_destination_message(&self, message: &ProtocolMessage) {
        if let ProtocolMessage::State { state } = message {
            self.track_destination_state(state);
        }
    }

    pub fn track_record(&self, record: &RecordMessage) {
        let bytes = record.data.to_string().len() as u64;
        let mut counters = self.streams.entry(record.stream_descriptor()).or_default();

        counters.emitted.add(Counts { records: 1, bytes });
        counters.staged.add(Counts { records: 1, bytes });
    }

    pub fn track_source_state(&self, state: &StateMessage) {
        match state {
            StateMessage::Stream { stream, id } => {
                self.streams
                    .entry(stream.stream_descriptor.clone())
                    .or_default()
                    .stage(*id);
            }
            StateMessage::Global { id, .. } => {
                for mut counters in self.streams.iter_mut() {
                    counters.stage(*id);
                }
            }
            StateMessage::Legacy { .. } => {}
        }
    }

    pub fn track_destination_state(&self, state: &StateMessage) {
        match state {
            StateMessage::Stream { stream, id } => {
                if let Some(mut counters) = self.streams.get_mut(&stream.stream_descriptor) {
                    counters.commit_up_to(*id);
                }
            }
            StateMessage::Global { id, .. } => {
                for mut counters in self.streams.iter_mut() {
                    counters.commit_up_to(*id);
                }
            }
            StateMessage::Legacy { .. } => {}
        }
    }

    pub fn track_estimate(&self, estimate: &EstimateTrace) {
        let records = estimate.row_estimate.unwrap_or_default().max(0) as u64;
        let bytes = estimate.byte_estimate.unwrap_or_default().max(0) as u64;

        match estimate.estimate_type {
            EstimateType::Stream => {
                let descriptor = StreamDescriptor {
                    name: estimate.name.clone(),
                    namespace: estimate.namespace.clone(),
                };
                self.streams.entry(descriptor).or_default().estimated =
                    Some(Counts { records, bytes });
            }
            EstimateType::Sync => {
                self.sync_estimated_records.store(records, Ordering::Relaxed);
                self.sync_estimated_bytes.store(bytes, Ordering::Relaxed);
            }
        }
    }

    /// Returns the current counters.
    ///
    /// Total estimates add up per stream estimates when any stream reported
    /// one and fall back to the sync wide estimate otherwise.
    pub fn snapshot(&self) -> SyncStats {
        let mut totals = StreamStats::default();
        let mut has_stream_estimates = false;

        let mut streams: Vec<StreamSyncStats> = self
            .streams
            .iter()
            .map(|entry| {
                has_stream_estimates |= entry.estimated.is_some();
                let stats = entry.stats();
                totals.add(&stats);

                StreamSyncStats {
                    stream: entry.key().clone(),
                    stats,
                }
            })
            .collect();
        streams.sort_by(|a, b| a.stream.cmp(&b.stream));

        if !has_stream_estimates {
            totals.estimated_records = self.sync_estimated_records.load(Ordering::Relaxed);
            totals.estimated_bytes = self.sync_estimated_bytes.load(Ordering::Relaxed);
        }

        SyncStats { totals, streams }
    }
}
