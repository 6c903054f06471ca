//! Configuration management for conduit services.
//!
//! Provides environment detection, configuration loading from YAML files,
//! secret handling, and the shared configuration types used by the workload
//! service, stream status tracking and sync persistence.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
