//! Grid transports.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;

use offload_core::{TaskAck, TaskEnvelope, TaskResult};

use crate::error::{ClientError, RemoteError};

/// Results as they arrive. A closed channel means the server ended the
/// stream; an `Err` item means the connection broke mid-stream.
pub type ResultStream = mpsc::Receiver<Result<TaskResult, RemoteError>>;

/// A channel to a remote grid endpoint.
pub trait RemoteGrid: Send + Sync {
    fn submit(
        &self,
        envelope: &TaskEnvelope,
    ) -> impl Future<Output = Result<TaskAck, RemoteError>> + Send;

    /// Open the result stream for `task_id`. The server closes it at the
    /// first terminal result or after `deadline`.
    fn stream_results(
        &self,
        task_id: &str,
        deadline: Duration,
    ) -> impl Future<Output = Result<ResultStream, RemoteError>> + Send;

    /// Cheap liveness check bounded by `timeout`.
    fn probe(&self, timeout: Duration) -> impl Future<Output = bool> + Send;
}

// ── HTTP ─────────────────────────────────────────────────────────────────────

const USER_HEADER: &str = "x-user-id";
const STREAM_BUFFER: usize = 16;

/// `RemoteGrid` over the daemon's HTTP API.
#[derive(Clone)]
pub struct HttpGrid {
    client: reqwest::Client,
    /// `<endpoint>/api`
    base: reqwest::Url,
    principal: Option<String>,
}

impl HttpGrid {
    /// `endpoint` is the daemon root, e.g. `http://127.0.0.1:9070`.
    pub fn new(endpoint: &str, principal: Option<String>) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };
        let mut base = reqwest::Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
        }
        base.path_segments_mut()
            .map_err(|_| invalid("cannot be a base URL".to_string()))?
            .pop_if_empty()
            .push("api");
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            principal,
        })
    }

    fn url(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    fn with_principal(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.principal {
            Some(p) => request.header(USER_HEADER, p),
            None => request,
        }
    }
}

impl RemoteGrid for HttpGrid {
    async fn submit(&self, envelope: &TaskEnvelope) -> Result<TaskAck, RemoteError> {
        let request = self.client.post(self.url(&["tasks"])).json(envelope);
        let response = self
            .with_principal(request)
            .send()
            .await
            .map_err(classify)?;
        let response = check_status(response).await?;
        response
            .json::<TaskAck>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn stream_results(
        &self,
        task_id: &str,
        deadline: Duration,
    ) -> Result<ResultStream, RemoteError> {
        let mut url = self.url(&["tasks", task_id, "results"]);
        // The server rejects a zero deadline.
        let deadline_ms = deadline.as_millis().max(1) as u64;
        url.query_pairs_mut()
            .append_pair("deadline_ms", &deadline_ms.to_string());

        let response = self
            .with_principal(self.client.get(url))
            .send()
            .await
            .map_err(classify)?;
        let mut response = check_status(response).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let mut decoder = NdjsonDecoder::default();
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        for item in decoder.push(&chunk) {
                            if tx.send(item).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        if let Some(item) = decoder.finish() {
                            let _ = tx.send(item).await;
                        }
                        return;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(classify(e))).await;
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn probe(&self, timeout: Duration) -> bool {
        let request = self.client.get(self.url(&["health"])).timeout(timeout);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(base = %self.base, error = %e, "grid probe failed");
                false
            }
        }
    }
}

fn classify(e: reqwest::Error) -> RemoteError {
    if e.is_connect() {
        RemoteError::Unreachable(e.to_string())
    } else if e.is_timeout() {
        RemoteError::DeadlineExceeded
    } else if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Transport(e.to_string())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(RemoteError::RateLimited(message))
    } else {
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

// ── NDJSON ───────────────────────────────────────────────────────────────────

/// Splits a byte stream into newline-delimited `TaskResult`s.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    /// Feed bytes; returns every complete line decoded so far.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<TaskResult, RemoteError>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(item) = decode_line(&line[..pos]) {
                out.push(item);
            }
        }
        out
    }

    /// Decode a trailing line with no newline.
    pub fn finish(&mut self) -> Option<Result<TaskResult, RemoteError>> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Option<Result<TaskResult, RemoteError>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(serde_json::from_slice(line).map_err(|e| RemoteError::Decode(e.to_string())))
}
