//! CLI command modules.

pub mod http;
pub mod run;
pub mod status;
pub mod tasks;

use anyhow::{Context, Result};

use offload_core::{TaskKind, TaskPayload};

/// Connection options shared by every command.
#[derive(Debug, Clone)]
pub struct Target {
    pub port: u16,
    pub user: Option<String>,
}

/// `<kind> <json-body>` → payload. The body must be valid JSON.
pub fn parse_task(kind: &str, body: &str) -> Result<TaskPayload> {
    let kind = TaskKind::from_name(kind)
        .with_context(|| format!("unknown task kind '{kind}' (expected echo or diffusion)"))?;
    let value: serde_json::Value =
        serde_json::from_str(body).context("task body must be a JSON document")?;
    Ok(TaskPayload::new(kind, serde_json::to_vec(&value)?))
}

/// Result body as pretty JSON when it parses, else lossy UTF-8.
pub fn render_body(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}
