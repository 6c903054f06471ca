mod base;
mod connection;
mod orchestrator;
mod persistence;
mod retry;
mod stream_status;
mod workload;

pub use base::*;
pub use connection::*;
pub use orchestrator::*;
pub use persistence::*;
pub use retry::*;
pub use stream_status::*;
pub use workload::*;
