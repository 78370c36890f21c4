use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;

use offload_core::envelope::now_ms;
use offload_core::{Priority, TaskKind, TaskResult, TaskStatus};

/// Bookkeeping for one submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub task_id: String,
    pub kind: TaskKind,
    pub priority: Priority,
    /// Submitting principal, or `"anonymous"`.
    pub user_id: String,
    pub status: TaskStatus,
    /// Unix ms when the task was accepted.
    pub submitted_at: u64,
    /// Unix ms of the last status change.
    pub updated_at: u64,
}

impl TaskRecord {
    pub fn queued(task_id: &str, kind: TaskKind, priority: Priority, user_id: &str) -> Self {
        let now = now_ms();
        Self {
            task_id: task_id.to_string(),
            kind,
            priority,
            user_id: user_id.to_string(),
            status: TaskStatus::Queued,
            submitted_at: now,
            updated_at: now,
        }
    }
}

struct Slot {
    record: TaskRecord,
    /// Latest result. Watchers only ever see the newest value.
    latest: watch::Sender<TaskResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-memory task table. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct TaskStore {
    /// task_id → record + latest result
    tasks: Arc<DashMap<String, Slot>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Store a new `Queued` task. Returns false if the id is already taken.
    pub fn insert(&self, record: TaskRecord) -> bool {
        match self.tasks.entry(record.task_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let (latest, _) = watch::channel(TaskResult::queued(&record.task_id));
                slot.insert(Slot { record, latest });
                true
            }
        }
    }

    /// Publish a status transition. Backward moves, moves out of a terminal
    /// state and unknown ids are ignored and return false.
    pub fn advance(&self, result: TaskResult) -> bool {
        let Some(mut entry) = self.tasks.get_mut(&result.task_id) else {
            tracing::debug!(task_id = %result.task_id, "advance on unknown task");
            return false;
        };
        let current = entry.record.status;
        if !current.can_advance_to(result.status) {
            tracing::debug!(
                task_id = %result.task_id,
                from = ?current,
                to = ?result.status,
                "ignoring non-forward status transition"
            );
            return false;
        }
        entry.record.status = result.status;
        entry.record.updated_at = now_ms();
        entry.latest.send_replace(result);
        true
    }

    pub fn subscribe(&self, task_id: &str) -> Option<watch::Receiver<TaskResult>> {
        self.tasks.get(task_id).map(|e| e.latest.subscribe())
    }

    pub fn latest(&self, task_id: &str) -> Option<TaskResult> {
        self.tasks.get(task_id).map(|e| e.latest.borrow().clone())
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|e| e.record.clone())
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.tasks.iter() {
            match entry.record.status {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Drop terminal tasks last updated before `cutoff_ms`. Open watchers
    /// see their stream end.
    pub fn evict_finished(&self, cutoff_ms: u64) -> usize {
        let before = self.tasks.len();
        self.tasks
            .retain(|_, e| !(e.record.status.is_terminal() && e.record.updated_at < cutoff_ms));
        before - self.tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
