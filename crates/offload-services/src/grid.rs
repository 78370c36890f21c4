//! GridService: the server entry point behind the HTTP surface.
//!
//! Every operation runs admission control first; a denied request never
//! touches the store, queue or registry.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use offload_core::{
    PayloadError, TaskAck, TaskEnvelope, TaskKind, TaskPayload, TaskRegistry, TaskResult,
    TaskStatus,
};

use crate::admission::{Admission, AdmissionControl, Denial};
use crate::audit::{AuditEvent, AuditLogger, AuditStats};
use crate::caller::Caller;
use crate::executor::Executor;
use crate::queue::{QueuedTask, TaskQueue};
use crate::store::{StatusCounts, TaskRecord, TaskStore};

/// Operation names used as admission keys.
pub mod operations {
    pub const SUBMIT_TASK: &str = "submitTask";
    pub const STREAM_RESULTS: &str = "streamResults";
    pub const GET_TASK: &str = "getTask";
    pub const RESET_RATE_LIMIT: &str = "resetRateLimit";
}

const MAX_TASK_ID_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("rate limited: {0}")]
    RateLimited(Denial),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),

    #[error("unsupported task kind {0}")]
    UnsupportedKind(TaskKind),

    #[error("duplicate task id '{0}'")]
    DuplicateTask(String),

    #[error("task '{0}' not found")]
    NotFound(String),

    #[error("'{0}' may not perform admin actions")]
    Forbidden(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct GridStatus {
    pub queue_depth: usize,
    pub tasks: StatusCounts,
    pub audit: AuditStats,
    pub principal_buckets: usize,
    pub operation_buckets: usize,
    pub kinds: Vec<String>,
}

#[derive(Clone)]
pub struct GridService {
    store: TaskStore,
    queue: TaskQueue,
    admission: Arc<AdmissionControl>,
    audit: AuditLogger,
    registry: Arc<TaskRegistry>,
}

impl GridService {
    pub fn new(admission: AdmissionControl, audit: AuditLogger, registry: Arc<TaskRegistry>) -> Self {
        Self {
            store: TaskStore::new(),
            queue: TaskQueue::new(),
            admission: Arc::new(admission),
            audit,
            registry,
        }
    }

    /// Worker handle sharing this service's queue, store and registry.
    pub fn executor(&self) -> Executor {
        Executor {
            queue: self.queue.clone(),
            store: self.store.clone(),
            registry: self.registry.clone(),
            audit: self.audit.clone(),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Verify and enqueue. Returns as soon as the task is queued.
    pub fn submit(&self, caller: &Caller, envelope: TaskEnvelope) -> Result<TaskAck, GridError> {
        self.admit(caller, operations::SUBMIT_TASK)?;

        let kind = match self.validate(&envelope) {
            Ok(kind) => kind,
            Err(e) => {
                self.audit.log(AuditEvent::access_denied(
                    caller,
                    &envelope.task_id,
                    "submit",
                    &e.to_string(),
                ));
                tracing::debug!(task_id = %envelope.task_id, error = %e, "submission rejected");
                return Err(e);
            }
        };

        let record = TaskRecord::queued(&envelope.task_id, kind, envelope.priority, caller.user_id());
        if !self.store.insert(record) {
            let e = GridError::DuplicateTask(envelope.task_id.clone());
            self.audit.log(AuditEvent::access_denied(
                caller,
                &envelope.task_id,
                "submit",
                &e.to_string(),
            ));
            return Err(e);
        }

        let details = format!(
            "kind={kind} priority={:?} bytes={}",
            envelope.priority,
            envelope.payload.len()
        );
        self.audit
            .log(AuditEvent::task_submitted(caller, &envelope.task_id, &details));
        tracing::info!(
            task_id = %envelope.task_id,
            %kind,
            priority = ?envelope.priority,
            user_id = %caller.user_id(),
            "task queued"
        );

        let task_id = envelope.task_id.clone();
        self.queue.push(QueuedTask {
            task_id: envelope.task_id,
            payload: envelope.payload,
            caller: caller.clone(),
            priority: envelope.priority,
        });

        Ok(TaskAck {
            task_id,
            status: TaskStatus::Queued,
        })
    }

    fn validate(&self, envelope: &TaskEnvelope) -> Result<TaskKind, GridError> {
        let id = &envelope.task_id;
        if id.is_empty() {
            return Err(GridError::InvalidEnvelope("task_id is empty".to_string()));
        }
        if id.len() > MAX_TASK_ID_LEN {
            return Err(GridError::InvalidEnvelope(format!(
                "task_id longer than {MAX_TASK_ID_LEN} bytes"
            )));
        }
        if id.chars().any(|c| c.is_control() || c == '/') {
            return Err(GridError::InvalidEnvelope(
                "task_id contains control characters or '/'".to_string(),
            ));
        }

        let payload = TaskPayload::decode(&envelope.payload)?;
        if !self.registry.supports(payload.kind) {
            return Err(GridError::UnsupportedKind(payload.kind));
        }
        Ok(payload.kind)
    }

    /// Results for `task_id` until a terminal status or `deadline` elapses.
    pub fn stream_results(
        &self,
        caller: &Caller,
        task_id: &str,
        deadline: Duration,
    ) -> Result<impl Stream<Item = TaskResult> + Send + 'static, GridError> {
        self.admit(caller, operations::STREAM_RESULTS)?;
        let rx = self
            .store
            .subscribe(task_id)
            .ok_or_else(|| GridError::NotFound(task_id.to_string()))?;
        Ok(result_stream(rx, Instant::now() + deadline))
    }

    /// Latest result snapshot.
    pub fn get_task(&self, caller: &Caller, task_id: &str) -> Result<TaskResult, GridError> {
        self.admit(caller, operations::GET_TASK)?;
        self.store
            .latest(task_id)
            .ok_or_else(|| GridError::NotFound(task_id.to_string()))
    }

    /// Refill `principal`'s bucket. The caller must pass admission and be
    /// listed in `admin_principals`.
    pub fn reset_principal(&self, admin: &Caller, principal: &str) -> Result<bool, GridError> {
        self.admit(admin, operations::RESET_RATE_LIMIT)?;
        if !self.admission.is_admin(admin) {
            self.audit.log(AuditEvent::access_denied(
                admin,
                principal,
                "reset_rate_limit",
                "not an admin principal",
            ));
            tracing::warn!(user_id = %admin.user_id(), principal, "rate limit reset refused");
            return Err(GridError::Forbidden(admin.user_id().to_string()));
        }
        Ok(self.admission.reset_principal(principal, admin))
    }

    pub fn status(&self) -> GridStatus {
        let (principal_buckets, operation_buckets) = self.admission.bucket_counts();
        GridStatus {
            queue_depth: self.queue.len(),
            tasks: self.store.counts(),
            audit: self.audit.stats(),
            principal_buckets,
            operation_buckets,
            kinds: self.registry.kinds().iter().map(|k| k.name()).collect(),
        }
    }

    fn admit(&self, caller: &Caller, operation: &str) -> Result<(), GridError> {
        match self.admission.check(caller, operation) {
            Admission::Allowed => Ok(()),
            Admission::Denied(denial) => Err(GridError::RateLimited(denial)),
        }
    }
}

/// Turn a result watch into a finite stream: the current value first, then
/// each change. Ends after a terminal value, at `deadline`, or when the
/// task is evicted. Intermediate values may be skipped; the latest is never
/// skipped.
pub fn result_stream(
    rx: watch::Receiver<TaskResult>,
    deadline: Instant,
) -> impl Stream<Item = TaskResult> + Send + 'static {
    futures::stream::unfold(
        (rx, deadline, true, false),
        |(mut rx, deadline, first, done)| async move {
            if done {
                return None;
            }
            if !first {
                match tokio::time::timeout_at(deadline, rx.changed()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => return None,
                }
            }
            let result = rx.borrow_and_update().clone();
            let done = result.status.is_terminal();
            Some((result, (rx, deadline, false, done)))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use offload_core::config::{AdmissionConfig, BucketLimits};
    use offload_core::Priority;
    use std::collections::BTreeMap;

    fn service(admission: AdmissionConfig) -> GridService {
        let audit = AuditLogger::unavailable("/dev/null".into());
        GridService::new(
            AdmissionControl::new(admission, audit.clone()),
            audit,
            Arc::new(TaskRegistry::with_builtin()),
        )
    }

    fn alice() -> Caller {
        Caller::new(Some("alice".to_string()), Some("127.0.0.1:5000".to_string()))
    }

    fn echo(id: &str) -> TaskEnvelope {
        TaskEnvelope {
            task_id: id.to_string(),
            priority: Priority::Normal,
            payload: TaskPayload::new(TaskKind::ECHO, b"hello".to_vec())
                .encode()
                .unwrap(),
        }
    }

    #[test]
    fn submit_queues_task() {
        let grid = service(AdmissionConfig::default());
        let ack = grid.submit(&alice(), echo("t1")).unwrap();
        assert_eq!(ack.task_id, "t1");
        assert_eq!(ack.status, TaskStatus::Queued);

        let status = grid.status();
        assert_eq!(status.queue_depth, 1);
        assert_eq!(status.tasks.queued, 1);
        assert_eq!(status.kinds, vec!["echo", "diffusion"]);
        assert_eq!(grid.store().get("t1").unwrap().user_id, "alice");
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let grid = service(AdmissionConfig::default());
        grid.submit(&alice(), echo("t1")).unwrap();
        let err = grid.submit(&alice(), echo("t1")).unwrap_err();
        assert!(matches!(err, GridError::DuplicateTask(id) if id == "t1"));
        assert_eq!(grid.status().queue_depth, 1);
    }

    #[test]
    fn corrupt_payload_is_rejected_before_queueing() {
        let grid = service(AdmissionConfig::default());
        let mut env = echo("t1");
        let last = env.payload.len() - 1;
        env.payload[last] ^= 0xff;
        let err = grid.submit(&alice(), env).unwrap_err();
        assert!(matches!(err, GridError::InvalidPayload(PayloadError::HashMismatch)));
        assert!(grid.store().is_empty());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let grid = service(AdmissionConfig::default());
        let env = TaskEnvelope {
            task_id: "t1".to_string(),
            priority: Priority::Low,
            payload: TaskPayload::new(TaskKind(0x4242), vec![]).encode().unwrap(),
        };
        let err = grid.submit(&alice(), env).unwrap_err();
        assert!(matches!(err, GridError::UnsupportedKind(TaskKind(0x4242))));
    }

    #[test]
    fn bad_task_ids_are_rejected() {
        let grid = service(AdmissionConfig::default());
        for id in ["", "a/b", "tab\there"] {
            let err = grid.submit(&alice(), echo(id)).unwrap_err();
            assert!(matches!(err, GridError::InvalidEnvelope(_)), "{id:?}");
        }
        let long = "x".repeat(MAX_TASK_ID_LEN + 1);
        assert!(grid.submit(&alice(), echo(&long)).is_err());
    }

    #[test]
    fn rate_limited_submission_never_reaches_store() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            operations::SUBMIT_TASK.to_string(),
            BucketLimits {
                capacity: 3,
                refill_per_sec: 1,
            },
        );
        let grid = service(AdmissionConfig {
            operation_overrides: overrides,
            ..AdmissionConfig::default()
        });

        let results: Vec<_> = (0..4)
            .map(|i| grid.submit(&alice(), echo(&format!("t{i}"))))
            .collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
        assert!(matches!(&results[3], Err(GridError::RateLimited(d)) if d.key == "submitTask"));
        assert_eq!(grid.store().len(), 3);
    }

    #[test]
    fn throttled_caller_cannot_reset_its_own_bucket() {
        let grid = service(AdmissionConfig {
            principal_capacity: 1,
            principal_refill_per_sec: 1,
            ..AdmissionConfig::default()
        });
        grid.submit(&alice(), echo("t1")).unwrap();
        assert!(matches!(
            grid.submit(&alice(), echo("t2")),
            Err(GridError::RateLimited(_))
        ));

        // Denied by its own exhausted bucket before the admin check.
        assert!(matches!(
            grid.reset_principal(&alice(), "alice"),
            Err(GridError::RateLimited(_))
        ));
        let bob = Caller::new(Some("bob".to_string()), None);
        assert!(matches!(
            grid.reset_principal(&bob, "alice"),
            Err(GridError::Forbidden(who)) if who == "bob"
        ));
        assert!(matches!(
            grid.reset_principal(&Caller::anonymous(), "alice"),
            Err(GridError::Forbidden(_))
        ));

        let admin = Caller::new(Some("admin".to_string()), None);
        assert!(grid.reset_principal(&admin, "alice").unwrap());
        grid.submit(&alice(), echo("t3")).unwrap();
    }

    #[test]
    fn unknown_task_is_not_found() {
        let grid = service(AdmissionConfig::default());
        assert!(matches!(
            grid.get_task(&alice(), "missing"),
            Err(GridError::NotFound(_))
        ));
        assert!(matches!(
            grid.stream_results(&alice(), "missing", Duration::from_secs(1)),
            Err(GridError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stream_ends_at_terminal_status() {
        let grid = service(AdmissionConfig::default());
        grid.submit(&alice(), echo("t1")).unwrap();
        let stream = grid
            .stream_results(&alice(), "t1", Duration::from_secs(5))
            .unwrap();

        let store = grid.store().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            store.advance(TaskResult::running("t1"));
            tokio::time::sleep(Duration::from_millis(20)).await;
            store.advance(TaskResult::completed("t1", vec![7], 1));
        });

        let results: Vec<_> = stream.collect().await;
        assert_eq!(results.first().unwrap().status, TaskStatus::Queued);
        assert_eq!(results.last().unwrap().status, TaskStatus::Completed);
        assert_eq!(results.last().unwrap().payload, Some(vec![7]));
    }

    #[tokio::test]
    async fn stream_ends_at_deadline_without_terminal() {
        let grid = service(AdmissionConfig::default());
        grid.submit(&alice(), echo("t1")).unwrap();
        let start = std::time::Instant::now();
        let results: Vec<_> = grid
            .stream_results(&alice(), "t1", Duration::from_millis(50))
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, TaskStatus::Queued);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn stream_of_finished_task_yields_once() {
        let grid = service(AdmissionConfig::default());
        grid.submit(&alice(), echo("t1")).unwrap();
        grid.store().advance(TaskResult::failed("t1", "boom", 0));
        let results: Vec<_> = grid
            .stream_results(&alice(), "t1", Duration::from_secs(5))
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error.as_deref(), Some("boom"));
    }
}
