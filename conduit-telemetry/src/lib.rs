//! Logging and metrics initialisation shared by conduit services.

pub mod metrics;
pub mod tracing;
