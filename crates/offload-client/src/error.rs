use offload_core::{PayloadError, TaskError};

/// Failures on the remote path. Every one of them is recovered by local
/// fallback; none reaches the caller of `ExecutionStrategy::step`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("grid unreachable: {0}")]
    Unreachable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by grid: {0}")]
    RateLimited(String),

    #[error("grid rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid grid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("local execution failed: {0}")]
    Local(#[from] TaskError),

    #[error("invalid payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("local execution panicked")]
    LocalPanicked,
}
