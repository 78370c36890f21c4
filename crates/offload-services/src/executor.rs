//! Task executor: drains the priority queue and runs tasks.
//!
//! At most `max_concurrent_tasks` bodies run at once, each on the blocking
//! pool. Every task gets `Running` and then exactly one terminal result
//! published to the store and recorded in the audit trail.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};

use offload_core::config::ExecutorConfig;
use offload_core::{TaskRegistry, TaskResult};

use crate::audit::{AuditEvent, AuditLogger};
use crate::queue::{QueuedTask, TaskQueue};
use crate::store::TaskStore;

/// Everything a worker needs. Cheap to clone.
#[derive(Clone)]
pub struct Executor {
    pub queue: TaskQueue,
    pub store: TaskStore,
    pub registry: Arc<TaskRegistry>,
    pub audit: AuditLogger,
}

/// `0` means one slot per available core.
pub fn concurrency(settings: &ExecutorConfig) -> usize {
    if settings.max_concurrent_tasks == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    } else {
        settings.max_concurrent_tasks as usize
    }
}

/// Runs until `shutdown` fires. Tasks already running finish on their own.
pub async fn run(executor: Executor, settings: ExecutorConfig, mut shutdown: broadcast::Receiver<()>) {
    let max_tasks = concurrency(&settings);
    let semaphore = Arc::new(Semaphore::new(max_tasks));
    let timeout = match settings.task_timeout_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };

    tracing::info!(max_concurrent = max_tasks, ?timeout, "task executor started");

    loop {
        // Take a slot before dequeuing so higher-priority arrivals still
        // overtake while every slot is busy.
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = shutdown.recv() => break,
        };
        let task = tokio::select! {
            task = executor.queue.pop() => task,
            _ = shutdown.recv() => break,
        };

        let executor = executor.clone();
        tokio::spawn(async move { execute(&executor, task, timeout, permit).await });
    }

    tracing::info!(queued = executor.queue.len(), "task executor stopped");
}

/// Holds `permit` until the task body has returned, even past a timeout.
async fn execute(
    executor: &Executor,
    task: QueuedTask,
    timeout: Option<Duration>,
    permit: OwnedSemaphorePermit,
) {
    let task_id = task.task_id.clone();
    executor.store.advance(TaskResult::running(&task_id));
    tracing::debug!(task_id = %task_id, priority = ?task.priority, "task running");

    let start = Instant::now();
    let registry = executor.registry.clone();
    let payload = task.payload;
    let mut handle = tokio::task::spawn_blocking(move || registry.execute_encoded(&payload));

    let mut timed_out = false;
    let outcome: Result<Vec<u8>, String> = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                timed_out = true;
                Err(format!("timed out after {} ms", limit.as_millis()))
            }
        },
        None => flatten((&mut handle).await),
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => {
            executor
                .store
                .advance(TaskResult::completed(&task_id, result, elapsed_ms));
            executor
                .audit
                .log(AuditEvent::task_completed(&task.caller, &task_id, elapsed_ms));
            tracing::info!(task_id = %task_id, elapsed_ms, "task completed");
        }
        Err(reason) => {
            executor
                .store
                .advance(TaskResult::failed(&task_id, &reason, elapsed_ms));
            executor
                .audit
                .log(AuditEvent::task_failed(&task.caller, &task_id, &reason));
            tracing::warn!(task_id = %task_id, elapsed_ms, error = %reason, "task failed");
        }
    }

    // The blocking thread cannot be interrupted. Its slot stays taken until
    // it returns; the result is discarded.
    if timed_out {
        let _ = handle.await;
        tracing::debug!(
            task_id = %task_id,
            overran_ms = start.elapsed().as_millis() as u64,
            "timed-out task body returned"
        );
    }
    drop(permit);
}

fn flatten(
    joined: Result<Result<Vec<u8>, offload_core::TaskError>, tokio::task::JoinError>,
) -> Result<Vec<u8>, String> {
    match joined {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err("task panicked".to_string()),
        Err(e) => Err(e.to_string()),
    }
}
