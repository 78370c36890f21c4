//! Daemon status and admin commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};
use super::Target;

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    queue_depth: usize,
    tasks: TaskCounts,
    audit: AuditInfo,
    principal_buckets: usize,
    operation_buckets: usize,
    kinds: Vec<String>,
}

#[derive(Deserialize)]
struct TaskCounts {
    queued: usize,
    running: usize,
    completed: usize,
    failed: usize,
}

#[derive(Deserialize)]
struct AuditInfo {
    written: u64,
    dropped: u64,
    queued: usize,
    available: bool,
}

#[derive(Deserialize)]
struct ResetResponse {
    principal: String,
    reset: bool,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(target: &Target) -> Result<()> {
    let resp: StatusResponse = get_json(target, &format!("{}/status", base_url(target.port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Offload Grid Status");
    println!("═══════════════════════════════════════");
    println!("  Task kinds       : {}", resp.kinds.join(", "));
    println!("  Queue depth      : {}", resp.queue_depth);
    println!(
        "  Tasks            : {} queued, {} running, {} completed, {} failed",
        resp.tasks.queued, resp.tasks.running, resp.tasks.completed, resp.tasks.failed
    );
    println!(
        "  Rate buckets     : {} principal, {} operation",
        resp.principal_buckets, resp.operation_buckets
    );
    println!();
    println!("  Audit:");
    println!("  ┌─ sink     : {}", if resp.audit.available { "open" } else { "UNAVAILABLE" });
    println!("  │  written  : {}", resp.audit.written);
    println!("  │  queued   : {}", resp.audit.queued);
    println!("  └─ dropped  : {}", resp.audit.dropped);

    Ok(())
}

pub async fn cmd_reset(target: &Target, principal: &str) -> Result<()> {
    let url = format!("{}/admin/rate-limits/{}/reset", base_url(target.port), principal);
    let resp: ResetResponse = post_json(target, &url).await?;
    if resp.reset {
        println!("Rate limit for '{}' reset to full capacity.", resp.principal);
    } else {
        println!("'{}' has no rate-limit bucket yet; nothing to reset.", resp.principal);
    }
    Ok(())
}
