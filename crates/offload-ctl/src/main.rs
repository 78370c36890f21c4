//! offload-ctl: command-line interface for the offload grid daemon.

mod cmd;

use std::time::Duration;

use anyhow::{Context, Result};

use offload_core::config::OffloadConfig;
use offload_core::Priority;

use cmd::Target;

const DEFAULT_WATCH_DEADLINE_MS: u64 = 30_000;

fn print_usage(default_port: u16) {
    println!("Usage: offload-ctl [--port <port>] [--user <id>] <command>");
    println!();
    println!("Commands:");
    println!("  status                                  Show queue, task and audit counters");
    println!("  submit <kind> <json> [--priority <p>]   Submit a task (p: low, normal, high)");
    println!("  watch <task_id> [--deadline-ms <n>]     Stream results until terminal or deadline");
    println!("  reset <principal>                       Refill a principal's rate-limit bucket (admin --user)");
    println!("  run <kind> <json>                       Execute remotely, falling back to local");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", default_port);
    println!("  --user <id>     Principal sent as x-user-id");
}

/// Remove `--name <value>` from `args`, returning the value.
fn take_flag(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(i) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    args.remove(i);
    if i >= args.len() {
        anyhow::bail!("{name} requires a value");
    }
    Ok(Some(args.remove(i)))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let config = OffloadConfig::load().unwrap_or_default();
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let port = match take_flag(&mut args, "--port")? {
        Some(p) => p.parse().context("--port must be a number")?,
        None => config.network.api_port,
    };
    let user = take_flag(&mut args, "--user")?.or_else(|| config.client.principal.clone());
    let priority: Priority = match take_flag(&mut args, "--priority")? {
        Some(p) => p.parse().map_err(anyhow::Error::msg)?,
        None => Priority::Normal,
    };
    let deadline_ms: u64 = match take_flag(&mut args, "--deadline-ms")? {
        Some(ms) => ms.parse().context("--deadline-ms must be a number")?,
        None => DEFAULT_WATCH_DEADLINE_MS,
    };

    let target = Target { port, user };
    let remaining: Vec<&str> = args.iter().map(String::as_str).collect();

    match remaining.as_slice() {
        ["status"] | []                  => cmd::status::cmd_status(&target).await,
        ["submit", kind, body]           => cmd::tasks::cmd_submit(&target, kind, body, priority).await,
        ["watch", task_id]               => {
            cmd::tasks::cmd_watch(&target, task_id, Duration::from_millis(deadline_ms)).await
        }
        ["reset", principal]             => cmd::status::cmd_reset(&target, principal).await,
        ["run", kind, body]              => cmd::run::cmd_run(&target, &config.client, kind, body).await,
        ["help"] | ["--help"] | ["-h"]   => { print_usage(config.network.api_port); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage(config.network.api_port);
            std::process::exit(1);
        }
    }
}
