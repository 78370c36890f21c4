//! Audit trail: ordered, append-only record of security and task
//! lifecycle events.
//!
//! `AuditLogger::log` never blocks: events go into a bounded queue and a
//! single writer task appends them, one JSON object per line, flushing
//! after every write. A full queue drops the event and bumps a counter.
//! If the log file cannot be opened the logger still exists but drops
//! everything, and says so at error level.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use offload_core::config::AuditConfig;

use crate::caller::Caller;

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    AuthLoginSuccess,
    AuthLoginFailure,
    AccessGranted,
    AccessDenied,
    TaskSubmitted,
    TaskCompleted,
    TaskFailed,
    SecurityRateLimited,
    SecuritySuspiciousActivity,
    AdminAction,
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: AuditEventType,
    pub user_id: String,
    pub remote_address: String,
    pub resource: String,
    pub action: String,
    pub success: bool,
    pub details: String,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        caller: &Caller,
        resource: impl Into<String>,
        action: impl Into<String>,
        success: bool,
        details: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            user_id: caller.user_id().to_string(),
            remote_address: caller.remote_address().to_string(),
            resource: resource.into(),
            action: action.into(),
            success,
            details: details.into(),
        }
    }

    pub fn login_success(caller: &Caller) -> Self {
        Self::new(AuditEventType::AuthLoginSuccess, caller, "session", "login", true, "")
    }

    pub fn login_failure(caller: &Caller, reason: &str) -> Self {
        Self::new(AuditEventType::AuthLoginFailure, caller, "session", "login", false, reason)
    }

    pub fn access_granted(caller: &Caller, resource: &str, action: &str) -> Self {
        Self::new(AuditEventType::AccessGranted, caller, resource, action, true, "")
    }

    pub fn access_denied(caller: &Caller, resource: &str, action: &str, reason: &str) -> Self {
        Self::new(AuditEventType::AccessDenied, caller, resource, action, false, reason)
    }

    pub fn task_submitted(caller: &Caller, task_id: &str, details: &str) -> Self {
        Self::new(AuditEventType::TaskSubmitted, caller, task_id, "submit", true, details)
    }

    pub fn task_completed(caller: &Caller, task_id: &str, elapsed_ms: u64) -> Self {
        Self::new(
            AuditEventType::TaskCompleted,
            caller,
            task_id,
            "execute",
            true,
            format!("elapsed_ms={elapsed_ms}"),
        )
    }

    pub fn task_failed(caller: &Caller, task_id: &str, reason: &str) -> Self {
        Self::new(AuditEventType::TaskFailed, caller, task_id, "execute", false, reason)
    }

    /// `operation` is the resource; `details` names the bucket that denied.
    pub fn rate_limited(caller: &Caller, operation: &str, details: &str) -> Self {
        Self::new(
            AuditEventType::SecurityRateLimited,
            caller,
            operation,
            "admit",
            false,
            details,
        )
    }

    pub fn suspicious_activity(caller: &Caller, resource: &str, description: &str) -> Self {
        Self::new(
            AuditEventType::SecuritySuspiciousActivity,
            caller,
            resource,
            "detect",
            false,
            description,
        )
    }

    pub fn admin_action(caller: &Caller, resource: &str, action: &str, details: &str) -> Self {
        Self::new(AuditEventType::AdminAction, caller, resource, action, true, details)
    }
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Snapshot of the logger's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub written: u64,
    pub dropped: u64,
    pub queued: usize,
    /// False when the sink could not be opened.
    pub available: bool,
}

#[derive(Default)]
struct Counters {
    written: AtomicU64,
    dropped: AtomicU64,
}

struct Inner {
    /// None when the sink is unavailable.
    tx: Option<mpsc::Sender<AuditEvent>>,
    accepting: AtomicBool,
    counters: Arc<Counters>,
    shutdown: Arc<Notify>,
    writer: Mutex<Option<JoinHandle<()>>>,
    path: PathBuf,
}

/// Handle to the audit trail. Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<Inner>,
}

impl AuditLogger {
    /// Open the sink and spawn the writer. Never fails: an unopenable sink
    /// yields a logger that drops every event.
    pub async fn start(config: &AuditConfig) -> Self {
        let path = config.log_path.clone();
        match open_sink(&path).await {
            Ok(file) => {
                let capacity = config.queue_capacity.max(1);
                let (tx, rx) = mpsc::channel(capacity);
                let counters = Arc::new(Counters::default());
                let shutdown = Arc::new(Notify::new());
                let writer = tokio::spawn(write_loop(
                    rx,
                    file,
                    counters.clone(),
                    shutdown.clone(),
                    path.clone(),
                ));
                tracing::info!(path = %path.display(), capacity, "audit log opened");
                Self {
                    inner: Arc::new(Inner {
                        tx: Some(tx),
                        accepting: AtomicBool::new(true),
                        counters,
                        shutdown,
                        writer: Mutex::new(Some(writer)),
                        path,
                    }),
                }
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "audit log unavailable; all audit events will be dropped"
                );
                Self::unavailable(path)
            }
        }
    }

    /// A logger with no sink. Every event is counted as dropped.
    pub fn unavailable(path: PathBuf) -> Self {
        Self {
            inner: Arc::new(Inner {
                tx: None,
                accepting: AtomicBool::new(false),
                counters: Arc::new(Counters::default()),
                shutdown: Arc::new(Notify::new()),
                writer: Mutex::new(None),
                path,
            }),
        }
    }

    /// Enqueue an event. Returns false if it was dropped.
    pub fn log(&self, event: AuditEvent) -> bool {
        let Some(tx) = self.inner.tx.as_ref() else {
            self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        if !self.inner.accepting.load(Ordering::Acquire) {
            self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(event_type = ?event.event_type, "audit logger shut down, event dropped");
            return false;
        }
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    event_type = ?event.event_type,
                    user_id = %event.user_id,
                    dropped,
                    "audit queue full, event dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event_type = ?event.event_type, "audit queue closed, event dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> AuditStats {
        let queued = self
            .inner
            .tx
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0);
        AuditStats {
            written: self.inner.counters.written.load(Ordering::Relaxed),
            dropped: self.inner.counters.dropped.load(Ordering::Relaxed),
            queued,
            available: self.inner.tx.is_some(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Stop accepting, drain what is queued, close the sink. Events still
    /// queued when `timeout` expires are lost.
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.accepting.store(false, Ordering::Release);
        self.inner.shutdown.notify_one();

        let handle = match self.inner.writer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => {
                let stats = self.stats();
                tracing::info!(
                    written = stats.written,
                    dropped = stats.dropped,
                    "audit log closed"
                );
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    remaining = self.stats().queued,
                    "audit drain timed out, remaining events lost"
                );
            }
        }
    }
}

async fn open_sink(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn write_loop(
    mut rx: mpsc::Receiver<AuditEvent>,
    mut file: File,
    counters: Arc<Counters>,
    shutdown: Arc<Notify>,
    path: PathBuf,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => {
                rx.close();
                while let Some(event) = rx.recv().await {
                    write_event(&mut file, &event, &counters, &path).await;
                }
                break;
            }
            next = rx.recv() => match next {
                Some(event) => write_event(&mut file, &event, &counters, &path).await,
                None => break,
            },
        }
    }
    if let Err(e) = file.sync_all().await {
        tracing::warn!(path = %path.display(), error = %e, "audit log sync failed");
    }
}

async fn write_event(file: &mut File, event: &AuditEvent, counters: &Counters, path: &Path) {
    let mut line = match serde_json::to_string(event) {
        Ok(line) => line,
        Err(e) => {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "failed to serialize audit event");
            return;
        }
    };
    line.push('\n');

    let result = async {
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
    .await;

    match result {
        Ok(()) => {
            counters.written.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::error!(path = %path.display(), error = %e, "audit write failed");
        }
    }
}

// ── Reading ──────────────────────────────────────────────────────────────────

/// Parse an audit log back into events, in file order.
pub fn read_log(path: &Path) -> std::io::Result<Vec<AuditEvent>> {
    let text = std::fs::read_to_string(path)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
        .collect()
}
