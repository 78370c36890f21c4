//! offload-client: remote-first task execution with local fallback.
//!
//! `ExecutionStrategy` submits a task to the grid through a `RemoteGrid`
//! transport and waits for its result under a deadline. Any failure on the
//! remote path runs the same payload through the local `TaskRegistry`
//! instead, so a step always produces a result.

pub mod breaker;
pub mod error;
pub mod remote;
pub mod strategy;

pub use breaker::{BreakerState, CircuitBreaker};
pub use error::{ClientError, RemoteError};
pub use remote::{HttpGrid, NdjsonDecoder, RemoteGrid, ResultStream};
pub use strategy::{ExecutionStrategy, FallbackReason, StepOutcome, StrategyState};
