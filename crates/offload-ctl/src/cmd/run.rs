//! Run a task through the client strategy: remote first, local fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use offload_client::{ExecutionStrategy, StepOutcome};
use offload_core::config::ClientConfig;
use offload_core::TaskRegistry;

use super::http::endpoint;
use super::{parse_task, render_body, Target};

pub async fn cmd_run(target: &Target, client: &ClientConfig, kind: &str, body: &str) -> Result<()> {
    let mut task = parse_task(kind, body)?;

    let mut config = client.clone();
    config.endpoint = Some(endpoint(target.port));
    config.principal = target.user.clone();

    let registry = Arc::new(TaskRegistry::with_builtin());
    let mut strategy = ExecutionStrategy::from_config(&config, registry).await?;

    let start = Instant::now();
    let outcome = strategy.step(&mut task).await?;
    let elapsed = start.elapsed();

    match &outcome {
        StepOutcome::Remote { task_id, .. } => {
            println!("Ran remotely as {task_id} in {}", fmt_ms(elapsed));
        }
        StepOutcome::Local { reason } => {
            println!("Ran locally in {} ({reason})", fmt_ms(elapsed));
        }
    }
    println!("{}", render_body(&task.body));
    Ok(())
}

fn fmt_ms(d: Duration) -> String {
    format!("{} ms", d.as_millis())
}
