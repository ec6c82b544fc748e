//! Per-dependency circuit breaker.
//!
//! All counters and transitions live behind one mutex so that concurrent
//! callers against the same dependency never lose an update. The lock is
//! never held across an await point.

use super::duration_from_secs;
use crate::error::{Result, ThreatError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

/// Consecutive HALF_OPEN successes required to close the breaker again.
pub const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60.0,
        }
    }
}

impl BreakerSettings {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("breaker.failure_threshold must be at least 1".to_string());
        }
        if duration_from_secs(self.recovery_timeout_secs).is_none() {
            return Err(
                "breaker.recovery_timeout_secs must be a non-negative, representable number of seconds"
                    .to_string(),
            );
        }
        Ok(())
    }

    pub fn recovery_timeout(&self) -> Duration {
        match duration_from_secs(self.recovery_timeout_secs) {
            Some(timeout) => timeout,
            None if self.recovery_timeout_secs > 0.0 => Duration::MAX,
            None => Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Read-only view of a breaker, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn from_settings(name: impl Into<String>, settings: &BreakerSettings) -> Self {
        Self::new(name, settings.failure_threshold, settings.recovery_timeout())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            since_last_failure: inner.last_failure.map(|t| t.elapsed()),
        }
    }

    /// The rejection a call would receive if made `wait` from now, or `None`
    /// if the breaker would let it through.
    pub fn rejection_after(&self, wait: Duration) -> Option<ThreatError> {
        let inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return None;
        }

        let cooled_down = inner
            .last_failure
            .map(|t| t.elapsed().saturating_add(wait) >= self.recovery_timeout)
            .unwrap_or(true);

        if cooled_down {
            None
        } else {
            Some(ThreatError::CircuitOpen {
                service: self.name.clone(),
                failure_count: inner.failure_count,
            })
        }
    }

    /// Run `operation` under the breaker.
    ///
    /// While OPEN the operation is not invoked and `CircuitOpen` is returned.
    /// Otherwise the operation's own result is returned after bookkeeping.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(err) => self.record_failure(err),
        }
        result
    }

    fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let recovered = inner
            .last_failure
            .map(|t| t.elapsed() >= self.recovery_timeout)
            .unwrap_or(true);

        if recovered {
            log::info!("Circuit '{}' entering half-open after cooldown", self.name);
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            Ok(())
        } else {
            log::debug!("Circuit '{}' is open, rejecting call", self.name);
            Err(ThreatError::CircuitOpen {
                service: self.name.clone(),
                failure_count: inner.failure_count,
            })
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= HALF_OPEN_SUCCESS_THRESHOLD {
                log::info!("Circuit '{}' closed after successful probes", self.name);
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                inner.last_failure = None;
            }
        }
    }

    fn record_failure(&self, err: &ThreatError) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    log::info!(
                        "Circuit '{}' opened after {} consecutive failures (last: {})",
                        self.name,
                        inner.failure_count,
                        err
                    );
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                log::info!("Circuit '{}' reopened, probe failed: {}", self.name, err);
                inner.failure_count += 1;
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.last_failure = Some(now);
            }
            CircuitState::Open => {
                // A call admitted before the breaker reopened; restart the cooldown.
                inner.failure_count += 1;
                inner.last_failure = Some(now);
            }
        }
    }
}
