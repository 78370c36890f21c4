//! offloadd: composition root for the grid daemon.
//!
//! `start` wires the audit logger, admission control, registry, store,
//! queue and executor together and serves the API on a bound listener.
//! Nothing here is global; tests start as many daemons as they like.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use offload_core::config::OffloadConfig;
use offload_core::envelope::now_ms;
use offload_core::TaskRegistry;
use offload_services::{executor, AdmissionControl, AuditLogger, GridService, TaskStore};

use offload_api::ApiState;

/// A running daemon.
pub struct Daemon {
    pub grid: GridService,
    pub addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    api_task: JoinHandle<Result<()>>,
    executor_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
    audit_drain_timeout: Duration,
}

/// Bind `network.bind_addr:network.api_port` and start.
pub async fn bind_and_start(config: &OffloadConfig) -> Result<Daemon> {
    let addr = format!("{}:{}", config.network.bind_addr, config.network.api_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind API on {addr}"))?;
    start(config, listener, Arc::new(TaskRegistry::with_builtin())).await
}

/// Start on an already-bound listener with the given registry.
pub async fn start(
    config: &OffloadConfig,
    listener: TcpListener,
    registry: Arc<TaskRegistry>,
) -> Result<Daemon> {
    let addr = listener.local_addr().context("listener has no local address")?;

    let audit = AuditLogger::start(&config.audit).await;
    let admission = AdmissionControl::new(config.admission.clone(), audit.clone());
    let grid = GridService::new(admission, audit, registry.clone());

    tracing::info!(
        %addr,
        kinds = ?registry.kinds().iter().map(|k| k.name()).collect::<Vec<_>>(),
        principal_capacity = config.admission.principal_capacity,
        principal_refill_per_sec = config.admission.principal_refill_per_sec,
        "offloadd starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // ── Spawn tasks ──────────────────────────────────────────────────────────
    let executor_task = tokio::spawn(executor::run(
        grid.executor(),
        config.executor.clone(),
        shutdown_tx.subscribe(),
    ));

    let sweeper_task = tokio::spawn(sweep_loop(
        grid.store().clone(),
        Duration::from_secs(config.executor.retention_secs),
        shutdown_tx.subscribe(),
    ));

    let api_task = {
        let state = ApiState {
            grid: grid.clone(),
            max_stream_deadline: Duration::from_millis(config.network.max_stream_deadline_ms),
        };
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(offload_api::serve_on(listener, state, async move {
            let _ = shutdown_rx.recv().await;
        }))
    };

    Ok(Daemon {
        grid,
        addr,
        shutdown_tx,
        api_task,
        executor_task,
        sweeper_task,
        audit_drain_timeout: Duration::from_millis(config.audit.shutdown_timeout_ms),
    })
}

impl Daemon {
    /// `http://<addr>`, for clients.
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Wait until something triggers shutdown or the API exits.
    pub async fn wait(&mut self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = shutdown_rx.recv() => tracing::info!("shutting down"),
            r = &mut self.api_task => {
                tracing::error!("API task exited: {:?}", r);
                let _ = self.shutdown_tx.send(());
            }
        }
    }

    /// Stop the API and executor, then drain the audit queue.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());

        if !self.api_task.is_finished() {
            match self.api_task.await {
                Ok(Err(e)) => tracing::error!(error = %e, "API stopped with error"),
                Err(e) => tracing::error!(error = %e, "API task panicked"),
                Ok(Ok(())) => {}
            }
        }
        let _ = self.executor_task.await;
        let _ = self.sweeper_task.await;

        self.grid.audit().shutdown(self.audit_drain_timeout).await;
        tracing::info!("offloadd stopped");
    }
}

/// Evict finished tasks older than `retention`. Zero retention keeps them.
async fn sweep_loop(store: TaskStore, retention: Duration, mut shutdown: broadcast::Receiver<()>) {
    if retention.is_zero() {
        let _ = shutdown.recv().await;
        return;
    }
    let period = (retention / 4).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let cutoff = now_ms().saturating_sub(retention.as_millis() as u64);
                let evicted = store.evict_finished(cutoff);
                if evicted > 0 {
                    tracing::debug!(evicted, remaining = store.len(), "finished tasks evicted");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
