//! offload-core: payload format, task kinds, wire types and configuration.
//! Every other offload crate depends on this one.

pub mod config;
pub mod envelope;
pub mod payload;
pub mod task;

pub use envelope::{Priority, TaskAck, TaskEnvelope, TaskResult, TaskStatus};
pub use payload::{PayloadError, TaskKind, TaskPayload};
pub use task::{TaskError, TaskRegistry, TaskRunner};
