//! Consecutive-failure circuit breaker for one grid endpoint.
//!
//! Closed: remote attempts pass. After `failure_threshold` consecutive
//! failures the breaker opens and the strategy goes straight to local
//! execution. Once `cooldown` has elapsed one attempt is let through
//! (half-open); success closes the breaker, failure reopens it.

use std::time::{Duration, Instant};

use offload_core::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_millis(config.cooldown_ms),
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    /// Whether a remote attempt may proceed now.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled = self
                    .opened_at
                    .map(|t| now.saturating_duration_since(t) >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    self.transition(BreakerState::HalfOpen);
                }
                cooled
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
        if self.state != BreakerState::Closed {
            self.transition(BreakerState::Closed);
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let trip = self.state == BreakerState::HalfOpen
            || self.consecutive_failures >= self.failure_threshold;
        if trip && self.state != BreakerState::Open {
            self.opened_at = Some(now);
            self.transition(BreakerState::Open);
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn transition(&mut self, to: BreakerState) {
        tracing::info!(
            from = %self.state,
            to = %to,
            failures = self.consecutive_failures,
            "circuit breaker state change"
        );
        self.state = to;
    }
}
