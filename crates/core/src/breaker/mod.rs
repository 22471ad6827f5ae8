//! Per-dependency circuit breakers.
//!
//! A breaker opens after a run of consecutive failures, fails calls fast while
//! open, and lets a single probe through after the cooldown. Breaker state is
//! process-local.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Breaker configuration shared by all dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before allowing a probe.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    30
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl BreakerConfig {
    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// The breaker is open (or a half-open probe is already in flight); the
    /// call was rejected without touching the dependency.
    #[error("circuit breaker open for dependency: {0}")]
    Open(String),
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker for one external dependency.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Check whether a call may proceed. Must be paired with exactly one
    /// `record_success`/`record_failure` when it returns `Ok`.
    pub fn try_acquire(&self) -> Result<(), BreakerError> {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.cooldown() {
                    // One probe only.
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!(dependency = %self.name, "circuit breaker half-open, probing");
                    crate::metrics::BREAKER_TRANSITIONS
                        .with_label_values(&[&self.name, "half_open"])
                        .inc();
                    Ok(())
                } else {
                    Err(BreakerError::Open(self.name.clone()))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(BreakerError::Open(self.name.clone()))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();

        if inner.state != BreakerState::Closed {
            tracing::info!(dependency = %self.name, "circuit breaker closed");
            crate::metrics::BREAKER_TRANSITIONS
                .with_label_values(&[&self.name, "closed"])
                .inc();
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();

        inner.consecutive_failures += 1;
        inner.probe_in_flight = false;

        let should_open = inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold;

        if should_open && inner.state != BreakerState::Open {
            tracing::warn!(
                dependency = %self.name,
                consecutive_failures = inner.consecutive_failures,
                "circuit breaker opened"
            );
            crate::metrics::BREAKER_TRANSITIONS
                .with_label_values(&[&self.name, "open"])
                .inc();
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// Breakers keyed by dependency name, created lazily with a shared config.
pub struct BreakerPool {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl BreakerPool {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn breaker(&self, dependency: &str) -> std::sync::Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(CircuitBreaker::new(dependency, self.config.clone()))
            })
            .clone()
    }
}
