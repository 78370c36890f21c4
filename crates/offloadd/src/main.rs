//! offloadd: scientific-task offload grid daemon.

use anyhow::Result;

use offload_core::config::OffloadConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = OffloadConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = OffloadConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        OffloadConfig::default()
    });
    tracing::info!(
        config = %OffloadConfig::file_path().display(),
        audit_log = %config.audit.log_path.display(),
        "configuration loaded"
    );

    let mut daemon = offloadd::bind_and_start(&config).await?;

    {
        let shutdown = daemon.shutdown_handle();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────
    daemon.wait().await;
    daemon.shutdown().await;
    Ok(())
}
