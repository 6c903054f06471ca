use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::bail;
use crate::error::{ConduitResult, ErrorKind};
use crate::stream_status::store::{StreamStatusKey, StreamStatusMetadata, StreamStatusRunState};
use crate::types::SyncContext;

/// Published whenever the run state of a stream changes.
///
/// Delivery is at least once; consumers deduplicate by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatusUpdateEvent {
    pub context: SyncContext,
    pub key: StreamStatusKey,
    pub run_state: StreamStatusRunState,
    pub metadata: Option<StreamStatusMetadata>,
}

/// Forwards stream status changes to whoever reconciles them.
pub trait StreamStatusEventPublisher {
    fn publish(
        &self,
        event: StreamStatusUpdateEvent,
    ) -> impl Future<Output = ConduitResult<()>> + Send;
}

impl StreamStatusEventPublisher for mpsc::UnboundedSender<StreamStatusUpdateEvent> {
    async fn publish(&self, event: StreamStatusUpdateEvent) -> ConduitResult<()> {
        if self.send(event).is_err() {
            bail!(
                ErrorKind::InvalidState,
                "Stream status event receiver is closed"
            );
        }

        Ok(())
    }
}
