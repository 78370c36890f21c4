//! Priority work queue between submission and the executor.
//!
//! Three FIFO lanes, drained strictly HIGH → NORMAL → LOW.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use offload_core::Priority;

use crate::caller::Caller;

/// A task waiting for an executor slot.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: String,
    /// Encoded payload, already verified at submission.
    pub payload: Vec<u8>,
    pub caller: Caller,
    pub priority: Priority,
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<QueuedTask>,
    normal: VecDeque<QueuedTask>,
    low: VecDeque<QueuedTask>,
}

impl Lanes {
    fn lane(&mut self, priority: Priority) -> &mut VecDeque<QueuedTask> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }

    fn pop(&mut self) -> Option<QueuedTask> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }
}

#[derive(Clone, Default)]
pub struct TaskQueue {
    lanes: Arc<Mutex<Lanes>>,
    ready: Arc<Notify>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: QueuedTask) {
        self.lock().lane(task.priority).push_back(task);
        self.ready.notify_one();
    }

    pub fn try_pop(&self) -> Option<QueuedTask> {
        self.lock().pop()
    }

    /// Wait for the next task.
    pub async fn pop(&self) -> QueuedTask {
        loop {
            if let Some(task) = self.try_pop() {
                return task;
            }
            self.ready.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Lanes> {
        match self.lanes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
