use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bail;
use crate::error::{ConduitError, ConduitResult, ErrorKind};

/// Termination source used by the launcher when a workload could not be started.
pub const LAUNCHER_SOURCE: &str = "workload-launcher";
/// Termination source used by the monitor when a workload missed its deadline.
pub const MONITOR_SOURCE: &str = "workload-monitor";
/// Termination source used when a newer workload took over the mutex key.
pub const SUPERSEDED_SOURCE: &str = "workload-service";

/// Lifecycle status of a [`Workload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Pending,
    Claimed,
    Launched,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl WorkloadStatus {
    /// Statuses that still hold their mutex key.
    pub const ACTIVE: [WorkloadStatus; 4] = [
        WorkloadStatus::Pending,
        WorkloadStatus::Claimed,
        WorkloadStatus::Launched,
        WorkloadStatus::Running,
    ];

    pub const TERMINAL: [WorkloadStatus; 3] = [
        WorkloadStatus::Success,
        WorkloadStatus::Failure,
        WorkloadStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadStatus::Pending => "pending",
            WorkloadStatus::Claimed => "claimed",
            WorkloadStatus::Launched => "launched",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Success => "success",
            WorkloadStatus::Failure => "failure",
            WorkloadStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadStatus {
    type Err = ConduitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "pending" => WorkloadStatus::Pending,
            "claimed" => WorkloadStatus::Claimed,
            "launched" => WorkloadStatus::Launched,
            "running" => WorkloadStatus::Running,
            "success" => WorkloadStatus::Success,
            "failure" => WorkloadStatus::Failure,
            "cancelled" => WorkloadStatus::Cancelled,
            other => bail!(
                ErrorKind::DeserializationError,
                "Unknown workload status",
                other
            ),
        };

        Ok(status)
    }
}

/// Kind of connector work a workload performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    Sync,
    Check,
    Discover,
    Spec,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::Sync => "sync",
            WorkloadType::Check => "check",
            WorkloadType::Discover => "discover",
            WorkloadType::Spec => "spec",
        }
    }
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadType {
    type Err = ConduitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let workload_type = match s {
            "sync" => WorkloadType::Sync,
            "check" => WorkloadType::Check,
            "discover" => WorkloadType::Discover,
            "spec" => WorkloadType::Spec,
            other => bail!(
                ErrorKind::DeserializationError,
                "Unknown workload type",
                other
            ),
        };

        Ok(workload_type)
    }
}

/// Dispatch priority. Each priority is its own queue bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPriority {
    #[default]
    Default,
    High,
}

impl WorkloadPriority {
    pub fn as_i32(&self) -> i32 {
        match self {
            WorkloadPriority::Default => 0,
            WorkloadPriority::High => 1,
        }
    }
}

impl TryFrom<i32> for WorkloadPriority {
    type Error = ConduitError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WorkloadPriority::Default),
            1 => Ok(WorkloadPriority::High),
            other => bail!(
                ErrorKind::DeserializationError,
                "Unknown workload priority",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadLabel {
    pub key: String,
    pub value: String,
}

impl WorkloadLabel {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One execution attempt of one unit of connector work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    pub dataplane_id: Option<String>,
    pub dataplane_group: Option<String>,
    pub status: WorkloadStatus,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub labels: Vec<WorkloadLabel>,
    pub input_payload: String,
    pub log_path: String,
    pub mutex_key: Option<String>,
    pub workload_type: WorkloadType,
    pub deadline: Option<DateTime<Utc>>,
    pub signal_input: Option<String>,
    pub priority: WorkloadPriority,
    pub termination_source: Option<String>,
    pub termination_reason: Option<String>,
    pub auto_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workload {
    /// Builds the pending workload described by `new`, stamped with `now`.
    pub fn pending(new: NewWorkload, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            dataplane_id: None,
            dataplane_group: new.dataplane_group,
            status: WorkloadStatus::Pending,
            last_heartbeat_at: None,
            labels: new.labels,
            input_payload: new.input_payload,
            log_path: new.log_path,
            mutex_key: new.mutex_key,
            workload_type: new.workload_type,
            deadline: new.deadline,
            signal_input: new.signal_input,
            priority: new.priority,
            termination_source: None,
            termination_reason: None,
            auto_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Everything needed to create a workload.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkload {
    pub id: String,
    pub workload_type: WorkloadType,
    pub labels: Vec<WorkloadLabel>,
    pub input_payload: String,
    pub log_path: String,
    pub dataplane_group: Option<String>,
    pub mutex_key: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub signal_input: Option<String>,
    pub priority: WorkloadPriority,
}

impl NewWorkload {
    pub fn new(id: impl Into<String>, workload_type: WorkloadType) -> Self {
        Self {
            id: id.into(),
            workload_type,
            labels: Vec::new(),
            input_payload: String::new(),
            log_path: String::new(),
            dataplane_group: None,
            mutex_key: None,
            deadline: None,
            signal_input: None,
            priority: WorkloadPriority::Default,
        }
    }

    pub fn with_mutex_key(mut self, mutex_key: impl Into<String>) -> Self {
        self.mutex_key = Some(mutex_key.into());
        self
    }

    pub fn with_labels(mut self, labels: Vec<WorkloadLabel>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_input_payload(mut self, input_payload: impl Into<String>) -> Self {
        self.input_payload = input_payload.into();
        self
    }

    pub fn with_log_path(mut self, log_path: impl Into<String>) -> Self {
        self.log_path = log_path.into();
        self
    }

    pub fn with_dataplane_group(mut self, dataplane_group: impl Into<String>) -> Self {
        self.dataplane_group = Some(dataplane_group.into());
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_signal_input(mut self, signal_input: impl Into<String>) -> Self {
        self.signal_input = Some(signal_input.into());
        self
    }

    pub fn with_priority(mut self, priority: WorkloadPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> ConduitResult<()> {
        if self.id.trim().is_empty() {
            bail!(ErrorKind::ValidationError, "Workload id must not be empty");
        }

        if matches!(&self.mutex_key, Some(key) if key.trim().is_empty()) {
            bail!(
                ErrorKind::ValidationError,
                "Workload mutex key must not be blank",
                self.id
            );
        }

        Ok(())
    }
}

/// Pending entries of one dispatch queue bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadQueueStats {
    pub dataplane_group: Option<String>,
    pub priority: WorkloadPriority,
    pub enqueued_count: u64,
}
