mod base;

pub use base::WorkloadRepository;
