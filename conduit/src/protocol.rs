//! Connector protocol message shapes.
//!
//! Only the parts needed to classify messages for stream status and stats
//! bookkeeping are modelled. Unknown message and trace types deserialize into
//! the `Other` variants instead of failing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name and optional namespace of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamDescriptor {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.map(str::to_owned),
        }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A message read from a source or destination process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolMessage {
    Record { record: RecordMessage },
    State { state: StateMessage },
    Trace { trace: TraceMessage },
    #[serde(other)]
    Other,
}

impl ProtocolMessage {
    pub fn record(record: RecordMessage) -> Self {
        Self::Record { record }
    }

    pub fn state(state: StateMessage) -> Self {
        Self::State { state }
    }

    pub fn trace(trace: TraceMessage) -> Self {
        Self::Trace { trace }
    }

    /// Returns the stream a message is scoped to.
    ///
    /// Global and legacy states, sync-wide estimates and error traces are not
    /// scoped to a single stream and yield [`None`].
    pub fn stream_descriptor(&self) -> Option<StreamDescriptor> {
        match self {
            ProtocolMessage::Record { record } => Some(record.stream_descriptor()),
            ProtocolMessage::State {
                state: StateMessage::Stream { stream, .. },
            } => Some(stream.stream_descriptor.clone()),
            ProtocolMessage::Trace {
                trace: TraceMessage::StreamStatus { stream_status },
            } => Some(stream_status.stream_descriptor.clone()),
            ProtocolMessage::Trace {
                trace: TraceMessage::Estimate { estimate },
            } if estimate.estimate_type == EstimateType::Stream => Some(StreamDescriptor {
                name: estimate.name.clone(),
                namespace: estimate.namespace.clone(),
            }),
            ProtocolMessage::State { .. }
            | ProtocolMessage::Trace { .. }
            | ProtocolMessage::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub data: serde_json::Value,
    #[serde(default)]
    pub emitted_at: i64,
}

impl RecordMessage {
    pub fn new(namespace: Option<&str>, stream: &str, data: serde_json::Value) -> Self {
        Self {
            stream: stream.to_owned(),
            namespace: namespace.map(str::to_owned),
            data,
            emitted_at: 0,
        }
    }

    pub fn stream_descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            name: self.stream.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// A checkpoint. Stream and global states carry an id that increases with
/// every checkpoint emitted by the source and is echoed by the destination
/// once the checkpoint is committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateMessage {
    Stream { stream: StreamState, id: i64 },
    Global { global: GlobalState, id: i64 },
    Legacy { data: serde_json::Value },
}

impl StateMessage {
    pub fn stream(descriptor: StreamDescriptor, stream_state: serde_json::Value, id: i64) -> Self {
        Self::Stream {
            stream: StreamState {
                stream_descriptor: descriptor,
                stream_state: Some(stream_state),
            },
            id,
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            StateMessage::Stream { id, .. } | StateMessage::Global { id, .. } => Some(*id),
            StateMessage::Legacy { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub stream_descriptor: StreamDescriptor,
    #[serde(default)]
    pub stream_state: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    #[serde(default)]
    pub shared_state: Option<serde_json::Value>,
    #[serde(default)]
    pub stream_states: Vec<StreamState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceMessage {
    StreamStatus { stream_status: StreamStatusTrace },
    Estimate { estimate: EstimateTrace },
    Error { error: ErrorTrace },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatusTrace {
    pub stream_descriptor: StreamDescriptor,
    pub status: StreamStatusKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<StreamStatusReason>,
}

impl StreamStatusTrace {
    pub fn new(descriptor: StreamDescriptor, status: StreamStatusKind) -> Self {
        Self {
            stream_descriptor: descriptor,
            status,
            reasons: Vec::new(),
        }
    }

    /// Returns the rate limit reason if the source reported one.
    pub fn rate_limited(&self) -> Option<&RateLimitedReason> {
        self.reasons.iter().find_map(|reason| match reason {
            StreamStatusReason::RateLimited { rate_limited } => Some(rate_limited),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatusKind {
    Started,
    Running,
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatusReason {
    RateLimited { rate_limited: RateLimitedReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitedReason {
    /// Epoch milliseconds at which the source expects its quota to reset.
    #[serde(default)]
    pub quota_reset: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstimateType {
    Stream,
    Sync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateTrace {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(rename = "type")]
    pub estimate_type: EstimateType,
    #[serde(default)]
    pub row_estimate: Option<i64>,
    #[serde(default)]
    pub byte_estimate: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTrace {
    pub message: String,
    #[serde(default)]
    pub internal_message: Option<String>,
}
