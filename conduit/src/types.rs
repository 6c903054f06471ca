use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkspaceId = Uuid;
pub type ConnectionId = Uuid;
pub type JobId = i64;
pub type AttemptNumber = i32;

/// Identity of one sync attempt: one try of a connection's job.
///
/// Built once when the attempt starts and shared immutably by the stream
/// status tracker and the sync persistence of that attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncContext {
    pub workspace_id: WorkspaceId,
    pub connection_id: ConnectionId,
    pub job_id: JobId,
    pub attempt_number: AttemptNumber,
}

impl SyncContext {
    pub fn new(
        workspace_id: WorkspaceId,
        connection_id: ConnectionId,
        job_id: JobId,
        attempt_number: AttemptNumber,
    ) -> Self {
        Self {
            workspace_id,
            connection_id,
            job_id,
            attempt_number,
        }
    }
}

impl fmt::Display for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connection {} job {} attempt {}",
            self.connection_id, self.job_id, self.attempt_number
        )
    }
}
