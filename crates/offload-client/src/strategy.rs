//! Remote-first execution with local fallback.
//!
//! ```text
//! Idle → AttemptingRemote → ApplyingRemoteResult → Idle
//!                         ↘ FallingBackLocal     → Idle
//! ```
//!
//! One step runs one task once. The remote attempt is bounded by the
//! configured deadline; on any failure the same payload is executed
//! locally exactly once and the remote attempt is abandoned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use offload_core::config::ClientConfig;
use offload_core::{Priority, TaskEnvelope, TaskPayload, TaskRegistry, TaskStatus};

use crate::breaker::CircuitBreaker;
use crate::error::{ClientError, RemoteError};
use crate::remote::{HttpGrid, RemoteGrid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyState {
    Idle,
    AttemptingRemote,
    ApplyingRemoteResult,
    FallingBackLocal,
}

/// Why a step ran locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// No endpoint configured.
    NoRemote,
    /// The last probe found the endpoint down.
    Unreachable,
    /// The circuit breaker is open.
    BreakerOpen,
    /// The payload could not be wrapped for submission.
    Encode(String),
    /// Submission failed.
    Submit(RemoteError),
    /// The stream broke or could not be opened.
    Transport(RemoteError),
    /// The grid ran the task and reported `FAILED`.
    RemoteFailed(String),
    /// The deadline elapsed before a terminal result.
    DeadlineExceeded,
    /// The stream closed without a terminal result.
    StreamEnded,
    /// A `COMPLETED` result carried no payload or a corrupt one.
    InvalidResult(String),
}

impl FallbackReason {
    /// Whether this reason counts against the endpoint's health.
    fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            FallbackReason::Submit(_)
                | FallbackReason::Transport(_)
                | FallbackReason::DeadlineExceeded
                | FallbackReason::StreamEnded
        )
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::NoRemote => write!(f, "no remote configured"),
            FallbackReason::Unreachable => write!(f, "remote unreachable"),
            FallbackReason::BreakerOpen => write!(f, "circuit breaker open"),
            FallbackReason::Encode(e) => write!(f, "encode failed: {e}"),
            FallbackReason::Submit(e) => write!(f, "submit failed: {e}"),
            FallbackReason::Transport(e) => write!(f, "{e}"),
            FallbackReason::RemoteFailed(e) => write!(f, "remote task failed: {e}"),
            FallbackReason::DeadlineExceeded => write!(f, "remote deadline exceeded"),
            FallbackReason::StreamEnded => write!(f, "result stream ended without terminal status"),
            FallbackReason::InvalidResult(e) => write!(f, "invalid remote result: {e}"),
        }
    }
}

/// Which path a step took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Remote { task_id: String, elapsed_ms: u64 },
    Local { reason: FallbackReason },
}

impl StepOutcome {
    pub fn is_remote(&self) -> bool {
        matches!(self, StepOutcome::Remote { .. })
    }
}

pub struct ExecutionStrategy<R: RemoteGrid> {
    remote: Option<R>,
    reachable: bool,
    registry: Arc<TaskRegistry>,
    deadline: Duration,
    priority: Priority,
    breaker: Option<CircuitBreaker>,
    state: StrategyState,
    remote_steps: u64,
    local_steps: u64,
}

impl ExecutionStrategy<HttpGrid> {
    /// HTTP strategy from config, probed once. No endpoint → local only.
    pub async fn from_config(
        config: &ClientConfig,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self, ClientError> {
        let remote = match &config.endpoint {
            Some(endpoint) => Some(HttpGrid::new(endpoint, config.principal.clone())?),
            None => None,
        };
        let mut strategy = Self::new(remote, registry, config);
        strategy
            .connect(Duration::from_millis(config.probe_timeout_ms))
            .await;
        Ok(strategy)
    }
}

impl<R: RemoteGrid> ExecutionStrategy<R> {
    /// Starts unreachable until `connect` or `set_reachable`.
    pub fn new(remote: Option<R>, registry: Arc<TaskRegistry>, config: &ClientConfig) -> Self {
        Self {
            remote,
            reachable: false,
            registry,
            deadline: Duration::from_millis(config.deadline_ms),
            priority: Priority::Normal,
            breaker: config.breaker.as_ref().map(CircuitBreaker::new),
            state: StrategyState::Idle,
            remote_steps: 0,
            local_steps: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Probe the endpoint and record whether it answered.
    pub async fn connect(&mut self, timeout: Duration) -> bool {
        self.reachable = match &self.remote {
            Some(remote) => remote.probe(timeout).await,
            None => false,
        };
        tracing::info!(
            remote = self.remote.is_some(),
            reachable = self.reachable,
            "grid connection probed"
        );
        self.reachable
    }

    pub fn set_reachable(&mut self, reachable: bool) {
        self.reachable = reachable;
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn state(&self) -> StrategyState {
        self.state
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// (remote steps, local steps) completed so far.
    pub fn step_counts(&self) -> (u64, u64) {
        (self.remote_steps, self.local_steps)
    }

    /// Run `task` once and replace it with the result. Only a failure of
    /// the local computation itself is returned as an error.
    pub async fn step(&mut self, task: &mut TaskPayload) -> Result<StepOutcome, ClientError> {
        let reason = match self.remote_gate() {
            Err(reason) => reason,
            Ok(()) => {
                self.state = StrategyState::AttemptingRemote;
                let start = Instant::now();
                let attempt = tokio::time::timeout(self.deadline, self.attempt_remote(task, start));
                let reason = match attempt.await {
                    Ok(Ok((task_id, result))) => {
                        self.state = StrategyState::ApplyingRemoteResult;
                        *task = result;
                        if let Some(b) = self.breaker.as_mut() {
                            b.record_success();
                        }
                        self.remote_steps += 1;
                        self.state = StrategyState::Idle;
                        let elapsed_ms = start.elapsed().as_millis() as u64;
                        tracing::debug!(task_id = %task_id, elapsed_ms, "remote result applied");
                        return Ok(StepOutcome::Remote {
                            task_id,
                            elapsed_ms,
                        });
                    }
                    Ok(Err(reason)) => reason,
                    Err(_) => FallbackReason::DeadlineExceeded,
                };
                if reason.is_endpoint_failure() {
                    if let Some(b) = self.breaker.as_mut() {
                        b.record_failure(Instant::now());
                    }
                }
                reason
            }
        };

        match &reason {
            FallbackReason::NoRemote => tracing::debug!("running locally"),
            FallbackReason::RemoteFailed(e) => {
                tracing::warn!(error = %e, "remote task failed, running locally")
            }
            FallbackReason::DeadlineExceeded => {
                tracing::warn!(deadline_ms = self.deadline.as_millis() as u64, "remote timed out, running locally")
            }
            other => tracing::info!(reason = %other, "falling back to local execution"),
        }

        self.state = StrategyState::FallingBackLocal;
        let result = self.run_local(task).await;
        self.state = StrategyState::Idle;
        *task = result?;
        self.local_steps += 1;
        Ok(StepOutcome::Local { reason })
    }

    fn remote_gate(&mut self) -> Result<(), FallbackReason> {
        if self.remote.is_none() {
            return Err(FallbackReason::NoRemote);
        }
        if !self.reachable {
            return Err(FallbackReason::Unreachable);
        }
        if let Some(b) = self.breaker.as_mut() {
            if !b.allow(Instant::now()) {
                return Err(FallbackReason::BreakerOpen);
            }
        }
        Ok(())
    }

    async fn attempt_remote(
        &self,
        task: &TaskPayload,
        start: Instant,
    ) -> Result<(String, TaskPayload), FallbackReason> {
        let Some(remote) = self.remote.as_ref() else {
            return Err(FallbackReason::NoRemote);
        };
        let envelope = TaskEnvelope::new(task, self.priority)
            .map_err(|e| FallbackReason::Encode(e.to_string()))?;

        let ack = remote
            .submit(&envelope)
            .await
            .map_err(FallbackReason::Submit)?;
        tracing::debug!(task_id = %ack.task_id, "submitted to grid");

        let remaining = self.deadline.saturating_sub(start.elapsed());
        let mut results = remote
            .stream_results(&ack.task_id, remaining)
            .await
            .map_err(FallbackReason::Transport)?;

        while let Some(item) = results.recv().await {
            let result = item.map_err(FallbackReason::Transport)?;
            if result.task_id != ack.task_id {
                return Err(FallbackReason::InvalidResult(format!(
                    "result for task '{}' on the stream of '{}'",
                    result.task_id, ack.task_id
                )));
            }
            match result.status {
                TaskStatus::Completed => {
                    let bytes = result.payload.ok_or_else(|| {
                        FallbackReason::InvalidResult("completed result has no payload".to_string())
                    })?;
                    let payload = TaskPayload::decode(&bytes)
                        .map_err(|e| FallbackReason::InvalidResult(e.to_string()))?;
                    if payload.kind != task.kind {
                        return Err(FallbackReason::InvalidResult(format!(
                            "expected a {} result, got {}",
                            task.kind, payload.kind
                        )));
                    }
                    return Ok((ack.task_id, payload));
                }
                TaskStatus::Failed => {
                    return Err(FallbackReason::RemoteFailed(
                        result.error.unwrap_or_else(|| "unspecified".to_string()),
                    ));
                }
                TaskStatus::Queued | TaskStatus::Running => {}
            }
        }

        // The server closes the stream at its copy of the deadline.
        if start.elapsed() >= self.deadline {
            Err(FallbackReason::DeadlineExceeded)
        } else {
            Err(FallbackReason::StreamEnded)
        }
    }

    async fn run_local(&self, task: &TaskPayload) -> Result<TaskPayload, ClientError> {
        let registry = self.registry.clone();
        let task = task.clone();
        match tokio::task::spawn_blocking(move || registry.execute(&task)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ClientError::LocalPanicked),
        }
    }
}
