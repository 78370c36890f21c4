//! Admission control: token buckets per principal and per operation.
//!
//! A request must pass its principal's bucket (unless anonymous) and then
//! the operation's bucket. Each request costs one token. Buckets refill in
//! whole-second increments and are created full on first use.
//!
//! Every denial is audited as `SECURITY_RATE_LIMITED` before the caller
//! sees it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use offload_core::config::{AdmissionConfig, BucketLimits};

use crate::audit::{AuditEvent, AuditLogger};
use crate::caller::Caller;

const REFILL_UNIT: Duration = Duration::from_secs(1);

// ── Bucket ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: u32,
    capacity: u32,
    refill_per_sec: u32,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(limits: BucketLimits, now: Instant) -> Self {
        Self {
            tokens: limits.capacity,
            capacity: limits.capacity,
            refill_per_sec: limits.refill_per_sec,
            last_refill: now,
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Credit whole elapsed seconds. A clock reading earlier than the last
    /// refill credits nothing.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed < REFILL_UNIT {
            return;
        }
        let whole_secs = elapsed.as_secs();
        let add = whole_secs.saturating_mul(u64::from(self.refill_per_sec));
        let tokens = (u64::from(self.tokens) + add).min(u64::from(self.capacity));
        self.tokens = tokens as u32;
        self.last_refill = now;
    }

    /// Back to full capacity.
    pub fn reset(&mut self, now: Instant) {
        self.tokens = self.capacity;
        self.last_refill = now;
    }

    pub fn available(&self) -> u32 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_per_sec(&self) -> u32 {
        self.refill_per_sec
    }
}

// ── Decision ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    Principal,
    Operation,
}

impl std::fmt::Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pool::Principal => f.write_str("principal"),
            Pool::Operation => f.write_str("operation"),
        }
    }
}

/// Which bucket ran dry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    pub pool: Pool,
    pub key: String,
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bucket '{}' exhausted", self.pool, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied(Denial),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

// ── Control ──────────────────────────────────────────────────────────────────

type Buckets = DashMap<String, Arc<Mutex<TokenBucket>>>;

pub struct AdmissionControl {
    config: AdmissionConfig,
    principals: Buckets,
    operations: Buckets,
    audit: AuditLogger,
}

impl AdmissionControl {
    pub fn new(config: AdmissionConfig, audit: AuditLogger) -> Self {
        Self {
            config,
            principals: DashMap::new(),
            operations: DashMap::new(),
            audit,
        }
    }

    pub fn check(&self, caller: &Caller, operation: &str) -> Admission {
        self.check_at(caller, operation, Instant::now())
    }

    /// `check` against an explicit clock reading.
    pub fn check_at(&self, caller: &Caller, operation: &str, now: Instant) -> Admission {
        if let Some(principal) = caller.principal() {
            let limits = self.config.principal_limits();
            if !acquire(&self.principals, principal, limits, now) {
                return self.deny(caller, operation, Pool::Principal, principal);
            }
        }

        let limits = self.config.operation_limits(operation);
        if !acquire(&self.operations, operation, limits, now) {
            return self.deny(caller, operation, Pool::Operation, operation);
        }

        Admission::Allowed
    }

    fn deny(&self, caller: &Caller, operation: &str, pool: Pool, key: &str) -> Admission {
        let denial = Denial {
            pool,
            key: key.to_string(),
        };
        tracing::debug!(
            user_id = %caller.user_id(),
            operation,
            %denial,
            "request rate limited"
        );
        self.audit
            .log(AuditEvent::rate_limited(caller, operation, &denial.to_string()));
        Admission::Denied(denial)
    }

    /// Whether `caller` is named in `admin_principals`. Anonymous never is.
    pub fn is_admin(&self, caller: &Caller) -> bool {
        caller
            .principal()
            .is_some_and(|p| self.config.admin_principals.iter().any(|a| a == p))
    }

    /// Refill `principal`'s bucket to capacity. Returns false if the
    /// principal has no bucket yet (it would start full anyway).
    pub fn reset_principal(&self, principal: &str, admin: &Caller) -> bool {
        let existed = match self.principals.get(principal) {
            Some(entry) => {
                lock(&entry).reset(Instant::now());
                true
            }
            None => false,
        };
        self.audit.log(AuditEvent::admin_action(
            admin,
            principal,
            "reset_rate_limit",
            if existed { "bucket refilled" } else { "no bucket" },
        ));
        tracing::info!(principal, admin = %admin.user_id(), existed, "rate limit reset");
        existed
    }

    /// Tokens currently in a bucket, if it exists.
    pub fn available(&self, pool: Pool, key: &str) -> Option<u32> {
        let buckets = match pool {
            Pool::Principal => &self.principals,
            Pool::Operation => &self.operations,
        };
        buckets.get(key).map(|entry| lock(&entry).available())
    }

    /// (principal buckets, operation buckets).
    pub fn bucket_counts(&self) -> (usize, usize) {
        (self.principals.len(), self.operations.len())
    }
}

fn acquire(buckets: &Buckets, key: &str, limits: BucketLimits, now: Instant) -> bool {
    // Clone the Arc so the map shard is released before the bucket lock.
    let bucket = match buckets.get(key) {
        Some(entry) => entry.clone(),
        None => buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(limits, now))))
            .clone(),
    };
    let allowed = lock(&bucket).try_acquire(now);
    allowed
}

fn lock(bucket: &Mutex<TokenBucket>) -> std::sync::MutexGuard<'_, TokenBucket> {
    match bucket.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
