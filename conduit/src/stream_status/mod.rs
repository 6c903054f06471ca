//! Per stream run state tracking of a sync attempt.
//!
//! The [`StreamStatusTracker`] observes the ordered protocol messages of one
//! attempt, keeps a [`StreamStatusValue`] per stream and publishes a
//! [`StreamStatusUpdateEvent`] whenever a stream changes run state.

mod events;
mod factory;
mod store;
mod tracker;

pub use events::{StreamStatusEventPublisher, StreamStatusUpdateEvent};
pub use factory::{
    ConfigFeatureFlags, FeatureFlagClient, STREAM_STATUS_TRACKING_FLAG, StreamStatusTrackerFactory,
};
pub use store::{
    StreamStatusKey, StreamStatusMetadata, StreamStatusRunState, StreamStatusStateStore,
    StreamStatusValue,
};
pub use tracker::StreamStatusTracker;
