use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ConduitResult, ErrorKind};
use crate::protocol::{StateMessage, StreamDescriptor};

/// Reduced checkpoint state of a connection, as written to durable storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// One message per stream sorted by stream descriptor, or a single global
    /// or legacy message.
    pub states: Vec<StateMessage>,
}

#[derive(Debug, Clone, Default)]
enum Aggregated {
    #[default]
    Empty,
    Streams(BTreeMap<StreamDescriptor, StateMessage>),
    Single(StateMessage),
}

/// Keeps only the latest checkpoint of each stream.
///
/// A sync checkpoints either per stream or through one global or legacy
/// state. Mixing both within one aggregator is rejected.
#[derive(Debug, Clone, Default)]
pub struct StateAggregator {
    aggregated: Aggregated,
}

impl StateAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, state: StateMessage) -> ConduitResult<()> {
        let per_stream = matches!(state, StateMessage::Stream { .. });
        let compatible = match self.aggregated {
            Aggregated::Empty => true,
            Aggregated::Streams(_) => per_stream,
            Aggregated::Single(_) => !per_stream,
        };
        if !compatible {
            bail!(
                ErrorKind::ValidationError,
                "State type changed within a sync",
                "per stream and global states cannot be combined"
            );
        }

        if !per_stream {
            self.aggregated = Aggregated::Single(state);
            return Ok(());
        }

        if self.is_empty() {
            self.aggregated = Aggregated::Streams(BTreeMap::new());
        }
        if let (Aggregated::Streams(streams), StateMessage::Stream { stream, .. }) =
            (&mut self.aggregated, &state)
        {
            streams.insert(stream.stream_descriptor.clone(), state.clone());
        }

        Ok(())
    }

    /// Folds `other` into this aggregator. States of `other` are newer and win.
    pub fn merge(&mut self, other: StateAggregator) -> ConduitResult<()> {
        for state in other.into_states() {
            self.ingest(state)?;
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.aggregated, Aggregated::Empty)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let states = match &self.aggregated {
            Aggregated::Empty => Vec::new(),
            Aggregated::Streams(streams) => streams.values().cloned().collect(),
            Aggregated::Single(state) => vec![state.clone()],
        };

        StateSnapshot { states }
    }

    fn into_states(self) -> Vec<StateMessage> {
        match self.aggregated {
            Aggregated::Empty => Vec::new(),
            Aggregated::Streams(streams) => streams.into_values().collect(),
            Aggregated::Single(state) => vec![state],
        }
    }
}
