//! Shared HTTP request helpers for CLI commands.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::Target;

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/api", port)
}

/// Daemon root, as `HttpGrid` expects it.
pub fn endpoint(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

pub async fn get_json<T: for<'de> Deserialize<'de>>(target: &Target, url: &str) -> Result<T> {
    let request = with_user(reqwest::Client::new().get(url), target);
    parse(request.send().await, url).await
}

pub async fn post_json<T: for<'de> Deserialize<'de>>(target: &Target, url: &str) -> Result<T> {
    let request = with_user(reqwest::Client::new().post(url), target);
    parse(request.send().await, url).await
}

fn with_user(request: reqwest::RequestBuilder, target: &Target) -> reqwest::RequestBuilder {
    match &target.user {
        Some(user) => request.header("x-user-id", user),
        None => request,
    }
}

async fn parse<T: for<'de> Deserialize<'de>>(
    response: reqwest::Result<reqwest::Response>,
    url: &str,
) -> Result<T> {
    let response = response
        .with_context(|| format!("failed to connect to offloadd at {} (is it running?)", url))?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("offloadd returned {status}: {text}");
    }
    response.json::<T>().await.context("failed to parse response")
}
