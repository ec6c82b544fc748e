//! Resilience layer for outbound dependency calls: backoff computation,
//! per-dependency circuit breaking, and the client that composes the two.

pub mod circuit_breaker;
pub mod client;
pub mod retry;

pub use circuit_breaker::{
    BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState, HALF_OPEN_SUCCESS_THRESHOLD,
};
pub use client::{DependencySettings, ResilientClient};
pub use retry::{BackoffStrategy, RetryConfig, RetryPolicy, RetryPredicate, RetrySettings};

use std::sync::Arc;
use std::time::Duration;

/// Seconds as a `Duration`. `None` for negative, non-finite or unrepresentably
/// large values.
pub(crate) fn duration_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

/// A dependency handle paired with the client that guards every call to it.
///
/// Callers build one per dependency type and share it across analyses.
pub struct Protected<S: ?Sized> {
    pub service: Arc<S>,
    pub client: Arc<ResilientClient>,
}

impl<S: ?Sized> Protected<S> {
    pub fn new(service: Arc<S>, client: Arc<ResilientClient>) -> Self {
        Self { service, client }
    }
}

impl<S: ?Sized> Clone for Protected<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            client: self.client.clone(),
        }
    }
}
