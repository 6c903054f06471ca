use std::future::Future;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConduitResult;
use crate::metrics::{CONDUIT_WORKLOAD_SIGNALS_TOTAL, FAILURE_TYPE, STATUS, WORKLOAD_TYPE};
use crate::workload::model::Workload;

/// Where to deliver the completion signal of a workload.
///
/// Parsed from [`Workload::signal_input`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalInput {
    pub workflow_type: String,
    pub workflow_id: String,
}

/// Delivers completion signals to the long-lived workflow waiting on a workload.
pub trait CompletionSignaler {
    fn signal(&self, input: &SignalInput) -> impl Future<Output = ConduitResult<()>> + Send;
}

/// Signaler for deployments without a workflow engine. Every signal is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSignaler;

impl CompletionSignaler for NoopSignaler {
    async fn signal(&self, input: &SignalInput) -> ConduitResult<()> {
        debug!(workflow_id = %input.workflow_id, "dropping completion signal");

        Ok(())
    }
}

/// Sends the completion signal of a terminated workload.
///
/// Failures are counted and logged but never returned: the workload already
/// reached its terminal status and the workflow falls back to polling.
pub(crate) async fn send_completion_signal<S>(signaler: &S, workload: &Workload)
where
    S: CompletionSignaler,
{
    let Some(raw_input) = workload.signal_input.as_deref() else {
        return;
    };

    let workload_type = workload.workload_type.as_str();

    let input = match serde_json::from_str::<SignalInput>(raw_input) {
        Ok(input) => input,
        Err(err) => {
            warn!(
                workload_id = %workload.id,
                error = %err,
                "could not parse workload signal input"
            );
            counter!(
                CONDUIT_WORKLOAD_SIGNALS_TOTAL,
                WORKLOAD_TYPE => workload_type,
                STATUS => "failure",
                FAILURE_TYPE => "deserialization"
            )
            .increment(1);
            return;
        }
    };

    match signaler.signal(&input).await {
        Ok(()) => {
            debug!(
                workload_id = %workload.id,
                workflow_id = %input.workflow_id,
                "completion signal sent"
            );
            counter!(
                CONDUIT_WORKLOAD_SIGNALS_TOTAL,
                WORKLOAD_TYPE => workload_type,
                STATUS => "success",
                FAILURE_TYPE => "none"
            )
            .increment(1);
        }
        Err(err) => {
            warn!(
                workload_id = %workload.id,
                workflow_id = %input.workflow_id,
                error = %err,
                "could not deliver completion signal"
            );
            counter!(
                CONDUIT_WORKLOAD_SIGNALS_TOTAL,
                WORKLOAD_TYPE => workload_type,
                STATUS => "failure",
                FAILURE_TYPE => "delivery"
            )
            .increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_input_uses_camel_case() {
        let input: SignalInput =
            serde_json::from_str(r#"{"workflowType":"sync","workflowId":"connection_manager_1"}"#)
                .unwrap();
        assert_eq!(input.workflow_type, "sync");
        assert_eq!(input.workflow_id, "connection_manager_1");
    }
}
