//! Workload lifecycle.
//!
//! A [`Workload`] is one unit of connector work. The [`WorkloadService`]
//! moves it from pending to a terminal status and keeps the dispatch queue
//! and the waiting workflow informed.

mod model;
mod service;
mod signal;

pub use model::{
    LAUNCHER_SOURCE, MONITOR_SOURCE, NewWorkload, SUPERSEDED_SOURCE, Workload, WorkloadLabel,
    WorkloadPriority, WorkloadQueueStats, WorkloadStatus, WorkloadType,
};
pub use service::WorkloadService;
pub use signal::{CompletionSignaler, NoopSignaler, SignalInput};
