//! Configuration system for offload.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $OFFLOAD_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/offload/config.toml
//!   3. ~/.config/offload/config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    pub network: NetworkConfig,
    pub admission: AdmissionConfig,
    pub audit: AuditConfig,
    pub executor: ExecutorConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the API binds to.
    pub bind_addr: String,
    /// API port. 0 = OS-assigned.
    pub api_port: u16,
    /// Upper bound applied to a client-supplied result-stream deadline.
    pub max_stream_deadline_ms: u64,
}

/// Token-bucket limits for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketLimits {
    pub capacity: u32,
    pub refill_per_sec: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub principal_capacity: u32,
    pub principal_refill_per_sec: u32,
    /// Operation buckets default to this multiple of the principal limits.
    pub operation_multiplier: u32,
    /// Per-operation limits, keyed by operation name.
    pub operation_overrides: BTreeMap<String, BucketLimits>,
    /// Principals allowed to reset rate limits. Empty disables resets.
    pub admin_principals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Append-only audit log file.
    pub log_path: PathBuf,
    /// Events held in memory awaiting the writer. Overflow is dropped.
    pub queue_capacity: usize,
    /// How long shutdown waits for the queue to drain.
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Max concurrent tasks. 0 = available parallelism.
    pub max_concurrent_tasks: u32,
    /// Per-task execution limit. 0 = none.
    pub task_timeout_ms: u64,
    /// Finished tasks are forgotten after this many seconds.
    pub retention_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the grid, e.g. `http://127.0.0.1:9070`. None = local only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Principal sent with every request. None = anonymous.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Deadline for one remote attempt (submit + result stream).
    pub deadline_ms: u64,
    /// Timeout of the reachability probe at connection setup.
    pub probe_timeout_ms: u64,
    /// Circuit breaker. None = every step tries remote first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive remote failures that open the breaker.
    pub failure_threshold: u32,
    /// How long an open breaker short-circuits to local before probing again.
    pub cooldown_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            api_port: 9070,
            max_stream_deadline_ms: 60_000,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            principal_capacity: 200,
            principal_refill_per_sec: 100,
            operation_multiplier: 10,
            operation_overrides: BTreeMap::new(),
            admin_principals: vec!["admin".to_string()],
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: data_dir().join("audit.log"),
            queue_capacity: 10_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 0,
            task_timeout_ms: 0,
            retention_secs: 300,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            principal: None,
            deadline_ms: 5_000,
            probe_timeout_ms: 500,
            breaker: None,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
        }
    }
}

impl AdmissionConfig {
    pub fn principal_limits(&self) -> BucketLimits {
        BucketLimits {
            capacity: self.principal_capacity,
            refill_per_sec: self.principal_refill_per_sec,
        }
    }

    /// Override for `operation`, else the multiplied principal limits.
    pub fn operation_limits(&self, operation: &str) -> BucketLimits {
        self.operation_overrides
            .get(operation)
            .copied()
            .unwrap_or(BucketLimits {
                capacity: self.principal_capacity.saturating_mul(self.operation_multiplier),
                refill_per_sec: self
                    .principal_refill_per_sec
                    .saturating_mul(self.operation_multiplier),
            })
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("offload")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("offload")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl OffloadConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a specific file, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(OffloadConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("OFFLOAD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    pub fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&OffloadConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply OFFLOAD_* overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("OFFLOAD_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = lookup("OFFLOAD_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(n) =
            lookup("OFFLOAD_ADMISSION__PRINCIPAL_CAPACITY").and_then(|v| v.parse().ok())
        {
            self.admission.principal_capacity = n;
        }
        if let Some(n) =
            lookup("OFFLOAD_ADMISSION__PRINCIPAL_REFILL_PER_SEC").and_then(|v| v.parse().ok())
        {
            self.admission.principal_refill_per_sec = n;
        }
        if let Some(v) = lookup("OFFLOAD_AUDIT__LOG_PATH") {
            self.audit.log_path = PathBuf::from(v);
        }
        if let Some(n) =
            lookup("OFFLOAD_EXECUTOR__MAX_CONCURRENT_TASKS").and_then(|v| v.parse().ok())
        {
            self.executor.max_concurrent_tasks = n;
        }
        if let Some(v) = lookup("OFFLOAD_CLIENT__ENDPOINT") {
            self.client.endpoint = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = lookup("OFFLOAD_CLIENT__PRINCIPAL") {
            self.client.principal = if v.is_empty() { None } else { Some(v) };
        }
    }
}
