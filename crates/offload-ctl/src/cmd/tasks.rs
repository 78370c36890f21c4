//! Task submission and result commands.

use std::time::Duration;

use anyhow::{Context, Result};

use offload_client::{HttpGrid, RemoteGrid};
use offload_core::{Priority, TaskEnvelope, TaskPayload, TaskResult, TaskStatus};

use super::http::endpoint;
use super::{parse_task, render_body, Target};

fn grid(target: &Target) -> Result<HttpGrid> {
    Ok(HttpGrid::new(&endpoint(target.port), target.user.clone())?)
}

pub async fn cmd_submit(target: &Target, kind: &str, body: &str, priority: Priority) -> Result<()> {
    let payload = parse_task(kind, body)?;
    let envelope = TaskEnvelope::new(&payload, priority)?;
    let ack = grid(target)?
        .submit(&envelope)
        .await
        .context("submit failed")?;
    println!("Task {} accepted ({:?}).", ack.task_id, ack.status);
    println!("Watch with: offload-ctl watch {}", ack.task_id);
    Ok(())
}

pub async fn cmd_watch(target: &Target, task_id: &str, deadline: Duration) -> Result<()> {
    let mut results = grid(target)?
        .stream_results(task_id, deadline)
        .await
        .with_context(|| format!("cannot watch task {task_id}"))?;

    let mut last: Option<TaskResult> = None;
    while let Some(item) = results.recv().await {
        let result = item.context("result stream broke")?;
        print_result(&result);
        last = Some(result);
    }

    if !last.is_some_and(|r| r.status.is_terminal()) {
        println!(
            "  … no terminal status within {} ms (task still running)",
            deadline.as_millis()
        );
    }
    Ok(())
}

fn print_result(result: &TaskResult) {
    let elapsed = result
        .elapsed_ms
        .map(|ms| format!(" ({ms} ms)"))
        .unwrap_or_default();
    println!("  {:<9} {}{}", format!("{:?}", result.status), result.task_id, elapsed);
    match result.status {
        TaskStatus::Completed => {
            let Some(bytes) = &result.payload else {
                return;
            };
            match TaskPayload::decode(bytes) {
                Ok(payload) => {
                    println!("  ┌─ kind : {}", payload.kind);
                    for line in render_body(&payload.body).lines() {
                        println!("  │ {line}");
                    }
                    println!("  └─");
                }
                Err(e) => println!("  result payload invalid: {e}"),
            }
        }
        TaskStatus::Failed => {
            println!("  error: {}", result.error.as_deref().unwrap_or("unspecified"));
        }
        TaskStatus::Queued | TaskStatus::Running => {}
    }
}
