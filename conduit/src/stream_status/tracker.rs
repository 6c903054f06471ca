use metrics::counter;
use tracing::{debug, warn};

use crate::metrics::{
    CONDUIT_STREAM_STATUS_EVENTS_TOTAL, CONDUIT_STREAM_STATUS_TRACKING_ERRORS_TOTAL,
    CONDUIT_STREAM_STATUS_TRACKING_SKIPPED_TOTAL, REASON, RUN_STATE,
};
use crate::protocol::{ProtocolMessage, StateMessage, StreamStatusKind, TraceMessage};
use crate::stream_status::events::{StreamStatusEventPublisher, StreamStatusUpdateEvent};
use crate::stream_status::store::{
    StreamStatusKey, StreamStatusMetadata, StreamStatusRunState, StreamStatusStateStore,
};
use crate::types::SyncContext;

/// What a protocol message means for stream status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrackedMessage {
    Running(StreamStatusKey),
    RateLimited(StreamStatusKey, StreamStatusMetadata),
    Incomplete(StreamStatusKey),
    SourceComplete(StreamStatusKey),
    Record(StreamStatusKey),
    StreamState(StreamStatusKey, i64),
    GlobalState(i64),
    Ignored,
}

impl From<&ProtocolMessage> for TrackedMessage {
    fn from(message: &ProtocolMessage) -> Self {
        match message {
            ProtocolMessage::Trace {
                trace: TraceMessage::StreamStatus { stream_status },
            } => {
                let key = StreamStatusKey::from(&stream_status.stream_descriptor);
                match stream_status.status {
                    StreamStatusKind::Started | StreamStatusKind::Running => {
                        match stream_status.rate_limited() {
                            Some(reason) => TrackedMessage::RateLimited(
                                key,
                                StreamStatusMetadata {
                                    quota_reset: reason.quota_reset,
                                },
                            ),
                            None => TrackedMessage::Running(key),
                        }
                    }
                    StreamStatusKind::Incomplete => TrackedMessage::Incomplete(key),
                    StreamStatusKind::Complete => TrackedMessage::SourceComplete(key),
                }
            }
            ProtocolMessage::Record { record } => {
                TrackedMessage::Record(StreamStatusKey::from(&record.stream_descriptor()))
            }
            ProtocolMessage::State {
                state: StateMessage::Stream { stream, id },
            } => TrackedMessage::StreamState(StreamStatusKey::from(&stream.stream_descriptor), *id),
            ProtocolMessage::State {
                state: StateMessage::Global { id, .. },
            } => TrackedMessage::GlobalState(*id),
            ProtocolMessage::State {
                state: StateMessage::Legacy { .. },
            }
            | ProtocolMessage::Trace { .. }
            | ProtocolMessage::Other => TrackedMessage::Ignored,
        }
    }
}

/// Derives the run state of every stream of one sync attempt from the
/// protocol messages flowing through it.
///
/// Messages must be tracked in the order they were read. Tracking never fails:
/// problems are counted and logged so that status bookkeeping can never abort
/// the data transfer.
#[derive(Debug)]
pub struct StreamStatusTracker<P> {
    context: SyncContext,
    store: StreamStatusStateStore,
    publisher: P,
    enabled: bool,
}

impl<P> StreamStatusTracker<P>
where
    P: StreamStatusEventPublisher,
{
    pub(crate) fn new(context: SyncContext, publisher: P, enabled: bool) -> Self {
        Self {
            context,
            store: StreamStatusStateStore::new(),
            publisher,
            enabled,
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    pub fn store(&self) -> &StreamStatusStateStore {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn track(&self, message: &ProtocolMessage) {
        if !self.enabled {
            counter!(CONDUIT_STREAM_STATUS_TRACKING_SKIPPED_TOTAL, REASON => "disabled")
                .increment(1);
            return;
        }

        let tracked = TrackedMessage::from(message);
        let keys = match &tracked {
            TrackedMessage::Running(key)
            | TrackedMessage::RateLimited(key, _)
            | TrackedMessage::Incomplete(key)
            | TrackedMessage::SourceComplete(key)
            | TrackedMessage::Record(key)
            | TrackedMessage::StreamState(key, _) => vec![key.clone()],
            TrackedMessage::GlobalState(_) => self.store.keys(),
            TrackedMessage::Ignored => return,
        };

        let before: Vec<_> = keys.iter().map(|key| self.store.run_state(key)).collect();
        self.apply(tracked);

        for (key, before) in keys.into_iter().zip(before) {
            let Some(value) = self.store.get(&key) else {
                continue;
            };

            match value.run_state {
                Some(run_state) if value.run_state != before => {
                    self.publish(key, run_state, value.metadata).await;
                }
                _ => {}
            }
        }
    }

    fn apply(&self, tracked: TrackedMessage) {
        match tracked {
            TrackedMessage::Running(key) => {
                self.store.set_run_state(&key, StreamStatusRunState::Running);
                self.store.set_metadata(&key, None);
            }
            TrackedMessage::RateLimited(key, metadata) => {
                self.store
                    .set_run_state(&key, StreamStatusRunState::RateLimited);
                self.store.set_metadata(&key, Some(metadata));
            }
            TrackedMessage::Incomplete(key) => {
                self.store
                    .set_run_state(&key, StreamStatusRunState::Incomplete);
            }
            TrackedMessage::SourceComplete(key) => {
                self.store.mark_source_complete(&key);
            }
            TrackedMessage::Record(key) => {
                // Records prove the source is no longer waiting on its quota.
                if self.store.run_state(&key) != Some(StreamStatusRunState::Running) {
                    self.store.set_run_state(&key, StreamStatusRunState::Running);
                    self.store.set_metadata(&key, None);
                }
                self.store.mark_stream_not_empty(&key);
            }
            TrackedMessage::StreamState(key, state_id) => {
                if self.store.is_stream_complete(&key, state_id) {
                    self.store.set_run_state(&key, StreamStatusRunState::Complete);
                } else {
                    self.store.set_latest_state_id(&key, state_id);
                }
            }
            TrackedMessage::GlobalState(state_id) => {
                if self.store.is_global_complete(state_id) {
                    for (key, value) in self.store.entries() {
                        if value.source_complete {
                            self.store.set_run_state(&key, StreamStatusRunState::Complete);
                        }
                    }
                } else {
                    self.store.set_latest_global_state_id(state_id);
                }
            }
            TrackedMessage::Ignored => {}
        }
    }

    async fn publish(
        &self,
        key: StreamStatusKey,
        run_state: StreamStatusRunState,
        metadata: Option<StreamStatusMetadata>,
    ) {
        debug!(
            connection_id = %self.context.connection_id,
            stream = %key,
            run_state = run_state.as_str(),
            "stream run state changed"
        );

        let event = StreamStatusUpdateEvent {
            context: self.context,
            key,
            run_state,
            metadata,
        };

        match self.publisher.publish(event).await {
            Ok(()) => {
                counter!(CONDUIT_STREAM_STATUS_EVENTS_TOTAL, RUN_STATE => run_state.as_str())
                    .increment(1);
            }
            Err(err) => {
                warn!(
                    connection_id = %self.context.connection_id,
                    error = %err,
                    "failed to publish stream status update"
                );
                counter!(CONDUIT_STREAM_STATUS_TRACKING_ERRORS_TOTAL, REASON => "publish")
                    .increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::protocol::{
        RateLimitedReason, RecordMessage, StreamDescriptor, StreamStatusReason, StreamStatusTrace,
    };

    type Events = mpsc::UnboundedReceiver<StreamStatusUpdateEvent>;

    fn tracker() -> (
        StreamStatusTracker<mpsc::UnboundedSender<StreamStatusUpdateEvent>>,
        Events,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = SyncContext::new(Uuid::new_v4(), Uuid::new_v4(), 1, 0);
        (StreamStatusTracker::new(context, tx, true), rx)
    }

    fn users() -> StreamDescriptor {
        StreamDescriptor::new(Some("public"), "users")
    }

    fn status(descriptor: StreamDescriptor, kind: StreamStatusKind) -> ProtocolMessage {
        ProtocolMessage::trace(TraceMessage::StreamStatus {
            stream_status: StreamStatusTrace::new(descriptor, kind),
        })
    }

    fn rate_limited(descriptor: StreamDescriptor, quota_reset: i64) -> ProtocolMessage {
        let mut stream_status = StreamStatusTrace::new(descriptor, StreamStatusKind::Running);
        stream_status.reasons.push(StreamStatusReason::RateLimited {
            rate_limited: RateLimitedReason {
                quota_reset: Some(quota_reset),
            },
        });
        ProtocolMessage::trace(TraceMessage::StreamStatus { stream_status })
    }

    fn record(descriptor: &StreamDescriptor) -> ProtocolMessage {
        ProtocolMessage::record(RecordMessage::new(
            descriptor.namespace.as_deref(),
            &descriptor.name,
            json!({}),
        ))
    }

    fn state(descriptor: StreamDescriptor, id: i64) -> ProtocolMessage {
        ProtocolMessage::state(StateMessage::stream(descriptor, json!({}), id))
    }

    fn drain(events: &mut Events) -> Vec<StreamStatusRunState> {
        let mut run_states = Vec::new();
        while let Ok(event) = events.try_recv() {
            run_states.push(event.run_state);
        }
        run_states
    }

    #[test]
    fn test_classification() {
        let key = StreamStatusKey::from(&users());
        assert_eq!(
            TrackedMessage::from(&status(users(), StreamStatusKind::Started)),
            TrackedMessage::Running(key.clone())
        );
        assert_eq!(
            TrackedMessage::from(&status(users(), StreamStatusKind::Complete)),
            TrackedMessage::SourceComplete(key.clone())
        );
        assert_eq!(
            TrackedMessage::from(&state(users(), 3)),
            TrackedMessage::StreamState(key, 3)
        );
        assert_eq!(
            TrackedMessage::from(&ProtocolMessage::Other),
            TrackedMessage::Ignored
        );
    }

    #[tokio::test]
    async fn test_complete_after_destination_ack() {
        let (tracker, mut events) = tracker();
        let key = StreamStatusKey::from(&users());

        tracker.track(&status(users(), StreamStatusKind::Started)).await;
        tracker.track(&record(&users())).await;
        tracker.track(&record(&users())).await;
        tracker.track(&state(users(), 5)).await;

        let value = tracker.store().get(&key).unwrap();
        assert_eq!(value.run_state, Some(StreamStatusRunState::Running));
        assert_eq!(value.latest_state_id, Some(5));
        assert!(!value.stream_empty);
        assert!(!value.source_complete);
        assert_eq!(drain(&mut events), vec![StreamStatusRunState::Running]);

        tracker.track(&status(users(), StreamStatusKind::Complete)).await;
        assert!(tracker.store().get(&key).unwrap().source_complete);
        assert!(drain(&mut events).is_empty());

        tracker.track(&state(users(), 5)).await;
        assert_eq!(
            tracker.store().run_state(&key),
            Some(StreamStatusRunState::Complete)
        );
        assert_eq!(drain(&mut events), vec![StreamStatusRunState::Complete]);

        tracker.track(&state(users(), 5)).await;
        tracker.track(&status(users(), StreamStatusKind::Running)).await;
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_stream_resumes_on_record() {
        let (tracker, mut events) = tracker();
        let key = StreamStatusKey::from(&users());

        tracker.track(&rate_limited(users(), 1_000)).await;
        let value = tracker.store().get(&key).unwrap();
        assert_eq!(value.run_state, Some(StreamStatusRunState::RateLimited));
        assert_eq!(value.metadata.unwrap().quota_reset, Some(1_000));

        tracker.track(&record(&users())).await;
        let value = tracker.store().get(&key).unwrap();
        assert_eq!(value.run_state, Some(StreamStatusRunState::Running));
        assert_eq!(value.metadata, None);

        assert_eq!(
            drain(&mut events),
            vec![
                StreamStatusRunState::RateLimited,
                StreamStatusRunState::Running
            ]
        );
    }

    #[tokio::test]
    async fn test_incomplete_is_final() {
        let (tracker, mut events) = tracker();
        let key = StreamStatusKey::from(&users());

        tracker.track(&status(users(), StreamStatusKind::Running)).await;
        tracker.track(&status(users(), StreamStatusKind::Incomplete)).await;
        tracker.track(&status(users(), StreamStatusKind::Running)).await;
        tracker.track(&record(&users())).await;

        assert_eq!(
            tracker.store().run_state(&key),
            Some(StreamStatusRunState::Incomplete)
        );
        assert_eq!(
            drain(&mut events),
            vec![
                StreamStatusRunState::Running,
                StreamStatusRunState::Incomplete
            ]
        );
    }

    #[tokio::test]
    async fn test_global_state_completes_source_complete_streams() {
        let (tracker, mut events) = tracker();
        let orders = StreamDescriptor::new(Some("public"), "orders");
        let global = |id| {
            ProtocolMessage::state(StateMessage::Global {
                global: crate::protocol::GlobalState {
                    shared_state: None,
                    stream_states: vec![],
                },
                id,
            })
        };

        tracker.track(&status(users(), StreamStatusKind::Running)).await;
        tracker.track(&status(orders.clone(), StreamStatusKind::Running)).await;
        tracker.track(&global(1)).await;
        tracker.track(&status(users(), StreamStatusKind::Complete)).await;
        drain(&mut events);

        tracker.track(&global(1)).await;

        assert_eq!(
            tracker.store().run_state(&StreamStatusKey::from(&users())),
            Some(StreamStatusRunState::Complete)
        );
        assert_eq!(
            tracker.store().run_state(&StreamStatusKey::from(&orders)),
            Some(StreamStatusRunState::Running)
        );
        assert_eq!(drain(&mut events), vec![StreamStatusRunState::Complete]);
    }

    #[tokio::test]
    async fn test_disabled_tracker_records_nothing() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let context = SyncContext::new(Uuid::new_v4(), Uuid::new_v4(), 1, 0);
        let tracker = StreamStatusTracker::new(context, tx, false);

        tracker.track(&status(users(), StreamStatusKind::Running)).await;

        assert!(tracker.store().entries().is_empty());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_closed_receiver_does_not_fail_tracking() {
        let (tracker, events) = tracker();
        drop(events);

        tracker.track(&status(users(), StreamStatusKind::Running)).await;

        assert_eq!(
            tracker.store().run_state(&StreamStatusKey::from(&users())),
            Some(StreamStatusRunState::Running)
        );
    }
}
