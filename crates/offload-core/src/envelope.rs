//! Wire types for task submission and result streaming.
//!
//! `TaskEnvelope` travels client → server on submit. `TaskResult` travels
//! server → client, one value per status transition. Payload bytes are
//! hex-encoded in JSON.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::payload::{PayloadError, TaskPayload};

// ── Priority ─────────────────────────────────────────────────────────────────

/// Scheduling hint. Higher priority is serviced no later than lower priority.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{other}' (expected low, normal or high)")),
        }
    }
}

// ── Status ───────────────────────────────────────────────────────────────────

/// Lifecycle status of a task. Advances monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Queued => 0,
            TaskStatus::Running => 1,
            TaskStatus::Completed | TaskStatus::Failed => 2,
        }
    }

    /// True if moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// The unit of work sent from client to server. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Client-generated id, `<kind>-<unix ms>-<seq>`.
    pub task_id: String,
    #[serde(default)]
    pub priority: Priority,
    /// Encoded `TaskPayload` (header + body).
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
}

static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

impl TaskEnvelope {
    /// Encode `payload` and stamp a fresh task id.
    pub fn new(payload: &TaskPayload, priority: Priority) -> Result<Self, PayloadError> {
        Ok(Self {
            task_id: next_task_id(&payload.kind.name()),
            priority,
            payload: payload.encode()?,
        })
    }
}

/// `<prefix>-<unix ms>-<seq>`. The sequence number keeps ids unique across
/// submissions issued within the same millisecond.
pub fn next_task_id(prefix: &str) -> String {
    let seq = TASK_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{seq}", now_ms())
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Ack / Result ─────────────────────────────────────────────────────────────

/// Server acknowledgment of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAck {
    pub task_id: String,
    pub status: TaskStatus,
}

/// One status transition of a task, as streamed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    /// Encoded result payload. Present only when `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_bytes_opt")]
    pub payload: Option<Vec<u8>>,
    /// Failure reason. Present only when `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock milliseconds spent executing, on terminal results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl TaskResult {
    pub fn queued(task_id: impl Into<String>) -> Self {
        Self::bare(task_id.into(), TaskStatus::Queued)
    }

    pub fn running(task_id: impl Into<String>) -> Self {
        Self::bare(task_id.into(), TaskStatus::Running)
    }

    pub fn completed(task_id: impl Into<String>, payload: Vec<u8>, elapsed_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            payload: Some(payload),
            error: None,
            elapsed_ms: Some(elapsed_ms),
        }
    }

    pub fn failed(task_id: impl Into<String>, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            payload: None,
            error: Some(error.into()),
            elapsed_ms: Some(elapsed_ms),
        }
    }

    fn bare(task_id: String, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            payload: None,
            error: None,
            elapsed_ms: None,
        }
    }
}

// ── Hex serde helpers ────────────────────────────────────────────────────────

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(text) => hex::decode(text).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
