//! Offload integration test harness.
//!
//! Every test starts its own daemon in-process on 127.0.0.1 with an
//! OS-assigned port and its own audit log under the system temp dir, so
//! tests run in parallel without interfering.
//!
//!   cargo test --test integration

mod admission;
mod audit;
mod fallback;
mod submission;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use offload_client::{HttpGrid, RemoteGrid};
use offload_core::config::OffloadConfig;
use offload_core::{
    Priority, TaskEnvelope, TaskError, TaskKind, TaskPayload, TaskRegistry, TaskResult, TaskRunner,
};
use offload_services::AuditEvent;
use offloadd::Daemon;

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct TestGrid {
    pub daemon: Daemon,
    pub audit_log: PathBuf,
}

/// Fresh audit log path for `name`.
pub fn audit_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("offload-it-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("audit.log")
}

/// Start a daemon with the built-in kinds plus the test kinds below.
pub async fn start_grid(name: &str, tweak: impl FnOnce(&mut OffloadConfig)) -> Result<TestGrid> {
    let mut registry = TaskRegistry::with_builtin();
    registry.register(Arc::new(FailingRunner));
    registry.register(Arc::new(SlowRunner));
    start_grid_with(name, registry, tweak).await
}

pub async fn start_grid_with(
    name: &str,
    registry: TaskRegistry,
    tweak: impl FnOnce(&mut OffloadConfig),
) -> Result<TestGrid> {
    let audit_log = audit_path(name);
    let mut config = OffloadConfig::default();
    config.network.bind_addr = "127.0.0.1".to_string();
    config.network.api_port = 0;
    config.audit.log_path = audit_log.clone();
    config.executor.max_concurrent_tasks = 2;
    tweak(&mut config);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind loopback")?;
    let daemon = offloadd::start(&config, listener, Arc::new(registry)).await?;
    Ok(TestGrid { daemon, audit_log })
}

impl TestGrid {
    pub fn endpoint(&self) -> String {
        self.daemon.endpoint()
    }

    pub fn client(&self, user: Option<&str>) -> HttpGrid {
        HttpGrid::new(&self.endpoint(), user.map(str::to_string)).unwrap()
    }

    pub fn api(&self, path: &str) -> String {
        format!("{}/api{}", self.endpoint(), path)
    }

    /// Stop the daemon and return everything it audited.
    pub async fn finish(self) -> Vec<AuditEvent> {
        let path = self.audit_log.clone();
        self.daemon.shutdown().await;
        offload_services::audit::read_log(&path).unwrap_or_default()
    }
}

pub fn echo_envelope(body: &[u8]) -> TaskEnvelope {
    TaskEnvelope::new(&TaskPayload::new(TaskKind::ECHO, body.to_vec()), Priority::Normal).unwrap()
}

/// Submit, then wait for the terminal result.
pub async fn run_remote(client: &HttpGrid, envelope: &TaskEnvelope) -> Result<TaskResult> {
    let ack = client.submit(envelope).await?;
    let mut results = client
        .stream_results(&ack.task_id, Duration::from_secs(10))
        .await?;
    let mut last = None;
    while let Some(item) = results.recv().await {
        last = Some(item?);
    }
    last.context("stream produced no results")
}

// ── Test task kinds ───────────────────────────────────────────────────────────

pub const FAILING: TaskKind = TaskKind(0x0100);
pub const SLOW: TaskKind = TaskKind(0x0101);

/// Always fails on the grid.
pub struct FailingRunner;

impl TaskRunner for FailingRunner {
    fn kind(&self) -> TaskKind {
        FAILING
    }

    fn run(&self, _body: &[u8]) -> Result<Vec<u8>, TaskError> {
        Err(TaskError::Failed {
            kind: FAILING,
            reason: "worker out of memory".to_string(),
        })
    }
}

/// Takes two seconds, then echoes.
pub struct SlowRunner;

impl TaskRunner for SlowRunner {
    fn kind(&self) -> TaskKind {
        SLOW
    }

    fn run(&self, body: &[u8]) -> Result<Vec<u8>, TaskError> {
        std::thread::sleep(Duration::from_secs(2));
        Ok(body.to_vec())
    }
}

/// Client-side stand-in for `FAILING`/`SLOW`: echoes with a marker.
pub struct LocalRunner(pub TaskKind);

impl TaskRunner for LocalRunner {
    fn kind(&self) -> TaskKind {
        self.0
    }

    fn run(&self, body: &[u8]) -> Result<Vec<u8>, TaskError> {
        let mut out = b"local:".to_vec();
        out.extend_from_slice(body);
        Ok(out)
    }
}
