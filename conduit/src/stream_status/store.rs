use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::protocol::StreamDescriptor;

/// Identity of one stream within one sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamStatusKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl StreamStatusKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_owned),
            name: name.to_owned(),
        }
    }
}

impl From<&StreamDescriptor> for StreamStatusKey {
    fn from(descriptor: &StreamDescriptor) -> Self {
        Self {
            namespace: descriptor.namespace.clone(),
            name: descriptor.name.clone(),
        }
    }
}

impl fmt::Display for StreamStatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Externally reported phase of a stream.
///
/// [`Running`] and [`RateLimited`] may replace each other. [`Complete`] and
/// [`Incomplete`] are final for the attempt.
///
/// [`Running`]: StreamStatusRunState::Running
/// [`RateLimited`]: StreamStatusRunState::RateLimited
/// [`Complete`]: StreamStatusRunState::Complete
/// [`Incomplete`]: StreamStatusRunState::Incomplete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatusRunState {
    Running,
    RateLimited,
    Complete,
    Incomplete,
}

impl StreamStatusRunState {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            StreamStatusRunState::Complete | StreamStatusRunState::Incomplete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatusRunState::Running => "running",
            StreamStatusRunState::RateLimited => "rate_limited",
            StreamStatusRunState::Complete => "complete",
            StreamStatusRunState::Incomplete => "incomplete",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatusMetadata {
    /// Epoch milliseconds at which a rate limited source expects to resume.
    pub quota_reset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatusValue {
    pub run_state: Option<StreamStatusRunState>,
    /// Highest checkpoint id seen for the stream.
    pub latest_state_id: Option<i64>,
    pub source_complete: bool,
    pub stream_empty: bool,
    pub metadata: Option<StreamStatusMetadata>,
}

impl Default for StreamStatusValue {
    fn default() -> Self {
        Self {
            run_state: None,
            latest_state_id: None,
            source_complete: false,
            stream_empty: true,
            metadata: None,
        }
    }
}

const NO_GLOBAL_STATE_ID: i64 = i64::MIN;

/// Status of every stream of one sync attempt.
///
/// Every mutation is a monotonic merge applied atomically to one entry, so
/// concurrent readers never observe a regression.
#[derive(Debug)]
pub struct StreamStatusStateStore {
    entries: DashMap<StreamStatusKey, StreamStatusValue>,
    latest_global_state_id: AtomicI64,
}

impl Default for StreamStatusStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamStatusStateStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            latest_global_state_id: AtomicI64::new(NO_GLOBAL_STATE_ID),
        }
    }

    pub fn get(&self, key: &StreamStatusKey) -> Option<StreamStatusValue> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn run_state(&self, key: &StreamStatusKey) -> Option<StreamStatusRunState> {
        self.entries.get(key).and_then(|entry| entry.run_state)
    }

    /// Returns every tracked stream, sorted by key.
    pub fn entries(&self) -> Vec<(StreamStatusKey, StreamStatusValue)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        entries
    }

    pub fn keys(&self) -> Vec<StreamStatusKey> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Adopts `run_state` unless the stream already reached a final state.
    pub fn set_run_state(&self, key: &StreamStatusKey, run_state: StreamStatusRunState) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        if !entry.run_state.is_some_and(|current| current.is_final()) {
            entry.run_state = Some(run_state);
        }
    }

    /// Replaces the metadata unless the stream already reached a final state.
    pub fn set_metadata(&self, key: &StreamStatusKey, metadata: Option<StreamStatusMetadata>) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        if !entry.run_state.is_some_and(|current| current.is_final()) {
            entry.metadata = metadata;
        }
    }

    /// Raises the latest checkpoint id of the stream. Lower ids are ignored.
    pub fn set_latest_state_id(&self, key: &StreamStatusKey, state_id: i64) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        if entry.latest_state_id.is_none_or(|current| state_id > current) {
            entry.latest_state_id = Some(state_id);
        }
    }

    /// Raises the latest global checkpoint id. Lower ids are ignored.
    pub fn set_latest_global_state_id(&self, state_id: i64) {
        self.latest_global_state_id
            .fetch_max(state_id, Ordering::SeqCst);
    }

    pub fn latest_global_state_id(&self) -> Option<i64> {
        let state_id = self.latest_global_state_id.load(Ordering::SeqCst);
        (state_id != NO_GLOBAL_STATE_ID).then_some(state_id)
    }

    pub fn mark_source_complete(&self, key: &StreamStatusKey) {
        self.entries.entry(key.clone()).or_default().source_complete = true;
    }

    pub fn mark_stream_not_empty(&self, key: &StreamStatusKey) {
        self.entries.entry(key.clone()).or_default().stream_empty = false;
    }

    /// Returns whether `state_id` acknowledges the last checkpoint of a stream
    /// whose source already reported completion.
    pub fn is_stream_complete(&self, key: &StreamStatusKey, state_id: i64) -> bool {
        self.entries.get(key).is_some_and(|entry| {
            entry.source_complete && entry.latest_state_id == Some(state_id)
        })
    }

    /// Returns whether `state_id` acknowledges the last global checkpoint.
    pub fn is_global_complete(&self, state_id: i64) -> bool {
        self.latest_global_state_id() == Some(state_id)
    }
}
