mod base;

pub use base::WorkloadQueue;
