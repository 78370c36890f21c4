//! offload-services: server-side grid logic: admission control, audit
//! trail, task store, priority queue and executor.

pub mod admission;
pub mod audit;
pub mod caller;
pub mod executor;
pub mod grid;
pub mod queue;
pub mod store;

pub use admission::{Admission, AdmissionControl, Denial, Pool, TokenBucket};
pub use audit::{AuditEvent, AuditEventType, AuditLogger, AuditStats};
pub use caller::Caller;
pub use executor::Executor;
pub use grid::{operations, result_stream, GridError, GridService, GridStatus};
pub use queue::{QueuedTask, TaskQueue};
pub use store::{StatusCounts, TaskRecord, TaskStore};
