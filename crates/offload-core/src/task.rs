//! Task runners and the registry that maps kind tags to them.
//!
//! The same registry is used by the daemon's executor and by the client's
//! local fallback, so a payload produces an equivalent result on either
//! side given only its bytes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::payload::{PayloadError, TaskKind, TaskPayload};

/// Something that can execute one kind of task body.
///
/// Runners are synchronous and CPU-bound. Callers on an async runtime run
/// them on the blocking pool.
pub trait TaskRunner: Send + Sync {
    /// The kind tag this runner handles.
    fn kind(&self) -> TaskKind;

    /// Execute a body and return the result body.
    fn run(&self, body: &[u8]) -> Result<Vec<u8>, TaskError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("invalid payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("invalid {kind} body: {reason}")]
    InvalidBody { kind: TaskKind, reason: String },

    #[error("{kind} task failed: {reason}")]
    Failed { kind: TaskKind, reason: String },
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Kind tag → runner. Build once at startup, then share behind an `Arc`.
#[derive(Default)]
pub struct TaskRegistry {
    runners: HashMap<TaskKind, Arc<dyn TaskRunner>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    /// Registry with the built-in `echo` and `diffusion` runners.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoRunner));
        registry.register(Arc::new(DiffusionRunner));
        registry
    }

    /// Register a runner, replacing any previous runner for the same kind.
    pub fn register(&mut self, runner: Arc<dyn TaskRunner>) {
        self.runners.insert(runner.kind(), runner);
    }

    pub fn supports(&self, kind: TaskKind) -> bool {
        self.runners.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<_> = self.runners.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Run a decoded payload. The result carries the same kind.
    pub fn execute(&self, payload: &TaskPayload) -> Result<TaskPayload, TaskError> {
        let runner = self
            .runners
            .get(&payload.kind)
            .ok_or(PayloadError::UnknownKind(payload.kind.0))?;
        let body = runner.run(&payload.body)?;
        Ok(TaskPayload::new(payload.kind, body))
    }

    /// Decode, run and re-encode.
    pub fn execute_encoded(&self, bytes: &[u8]) -> Result<Vec<u8>, TaskError> {
        let payload = TaskPayload::decode(bytes)?;
        let result = self.execute(&payload)?;
        Ok(result.encode()?)
    }
}

// ── Built-in: echo ───────────────────────────────────────────────────────────

/// Returns its body unchanged. Used by probes and tests.
pub struct EchoRunner;

impl TaskRunner for EchoRunner {
    fn kind(&self) -> TaskKind {
        TaskKind::ECHO
    }

    fn run(&self, body: &[u8]) -> Result<Vec<u8>, TaskError> {
        Ok(body.to_vec())
    }
}

// ── Built-in: diffusion ──────────────────────────────────────────────────────

/// Largest stable explicit-scheme coefficient.
pub const MAX_ALPHA: f64 = 0.5;

/// Upper bound on steps per run.
pub const MAX_STEPS: u32 = 1_000_000;

/// State of a 1-D heat diffusion lattice. The body of a `diffusion` task and
/// of its result: each run advances `cells` by `steps` and adds `steps` to
/// `elapsed_steps`, so a result can be fed straight back in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffusionState {
    pub cells: Vec<f64>,
    /// Diffusion number `D·dt/dx²`. Must be in `(0, 0.5]`.
    pub alpha: f64,
    /// Steps to advance per run.
    pub steps: u32,
    #[serde(default)]
    pub elapsed_steps: u64,
}

impl DiffusionState {
    pub fn to_payload(&self) -> Result<TaskPayload, TaskError> {
        let body = serde_json::to_vec(self).map_err(|e| TaskError::InvalidBody {
            kind: TaskKind::DIFFUSION,
            reason: e.to_string(),
        })?;
        Ok(TaskPayload::new(TaskKind::DIFFUSION, body))
    }

    pub fn from_payload(payload: &TaskPayload) -> Result<Self, TaskError> {
        if payload.kind != TaskKind::DIFFUSION {
            return Err(TaskError::InvalidBody {
                kind: payload.kind,
                reason: "not a diffusion payload".to_string(),
            });
        }
        Self::from_body(&payload.body)
    }

    fn from_body(body: &[u8]) -> Result<Self, TaskError> {
        serde_json::from_slice(body).map_err(|e| TaskError::InvalidBody {
            kind: TaskKind::DIFFUSION,
            reason: e.to_string(),
        })
    }

    /// Advance in place with fixed (Dirichlet) boundary cells.
    pub fn advance(&mut self) {
        let n = self.cells.len();
        if n >= 3 {
            let mut next = self.cells.clone();
            for _ in 0..self.steps {
                for i in 1..n - 1 {
                    let c = &self.cells;
                    next[i] = c[i] + self.alpha * (c[i - 1] - 2.0 * c[i] + c[i + 1]);
                }
                std::mem::swap(&mut self.cells, &mut next);
            }
        }
        self.elapsed_steps += u64::from(self.steps);
    }
}

pub struct DiffusionRunner;

impl TaskRunner for DiffusionRunner {
    fn kind(&self) -> TaskKind {
        TaskKind::DIFFUSION
    }

    fn run(&self, body: &[u8]) -> Result<Vec<u8>, TaskError> {
        let mut state = DiffusionState::from_body(body)?;

        if !(state.alpha > 0.0 && state.alpha <= MAX_ALPHA) {
            return Err(TaskError::Failed {
                kind: TaskKind::DIFFUSION,
                reason: format!("alpha {} outside stable range (0, {MAX_ALPHA}]", state.alpha),
            });
        }
        if state.steps > MAX_STEPS {
            return Err(TaskError::Failed {
                kind: TaskKind::DIFFUSION,
                reason: format!("steps {} exceeds {MAX_STEPS}", state.steps),
            });
        }
        if state.cells.iter().any(|c| !c.is_finite()) {
            return Err(TaskError::Failed {
                kind: TaskKind::DIFFUSION,
                reason: "cells contain non-finite values".to_string(),
            });
        }

        state.advance();
        serde_json::to_vec(&state).map_err(|e| TaskError::Failed {
            kind: TaskKind::DIFFUSION,
            reason: e.to_string(),
        })
    }
}
