use super::circuit_breaker::{BreakerSettings, CircuitBreaker};
use super::duration_from_secs;
use super::retry::{RetryConfig, RetryPolicy, RetrySettings};
use crate::error::{Result, ThreatError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Timeout, retry and breaker settings for one dependency type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySettings {
    pub timeout_seconds: f64,
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
}

impl Default for DependencySettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 10.0,
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
        }
    }
}

impl DependencySettings {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.timeout_seconds <= 0.0 || duration_from_secs(self.timeout_seconds).is_none() {
            return Err("timeout_seconds must be a positive, representable number of seconds".to_string());
        }
        self.retry.validate()?;
        self.breaker.validate()
    }

    pub fn timeout(&self) -> Duration {
        match duration_from_secs(self.timeout_seconds) {
            Some(timeout) if !timeout.is_zero() => timeout,
            None if self.timeout_seconds > 0.0 => Duration::MAX,
            _ => Duration::from_secs(10),
        }
    }
}

/// One breaker plus one retry policy around a single logical dependency.
#[derive(Debug)]
pub struct ResilientClient {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl ResilientClient {
    pub fn new(breaker: CircuitBreaker, retry: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            breaker,
            retry,
            attempt_timeout,
        }
    }

    pub fn from_settings(name: &str, settings: &DependencySettings) -> Self {
        Self::new(
            CircuitBreaker::from_settings(name, &settings.breaker),
            RetryPolicy::new(RetryConfig::from_settings(&settings.retry)),
            settings.timeout(),
        )
    }

    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `operation` with per-attempt timeout, retries and breaker accounting.
    ///
    /// Every attempt goes through the breaker. An open breaker ends the call
    /// immediately without using up an attempt. Once retries are exhausted the
    /// last failure is returned unmodified.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = self
                .breaker
                .call(|| self.bounded(operation()))
                .await;

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_circuit_open() => return Err(err),
                Err(err) => err,
            };

            if !self.retry.should_retry(attempt, &err) {
                log::debug!(
                    "{}: giving up after {} attempt(s): {}",
                    self.name(),
                    attempt + 1,
                    err
                );
                return Err(err);
            }

            let delay = self.retry.delay(attempt);
            if let Some(rejection) = self.breaker.rejection_after(delay) {
                log::debug!(
                    "{}: breaker opened after attempt {} ({}), not retrying",
                    self.name(),
                    attempt + 1,
                    err
                );
                return Err(rejection);
            }

            log::debug!(
                "{}: attempt {} failed ({}), retrying in {:?}",
                self.name(),
                attempt + 1,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Blocking adapter over [`execute`](Self::execute) for synchronous callers.
    ///
    /// Spins up a current-thread runtime, so it must not be called from inside
    /// an async context.
    pub fn execute_blocking<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ThreatError::external(self.name(), format!("runtime unavailable: {e}")))?;
        runtime.block_on(self.execute(operation))
    }

    async fn bounded<Fut, T>(&self, attempt: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.attempt_timeout, attempt).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ThreatError::OperationTimeout {
                service: self.name().to_string(),
                timeout_ms: u64::try_from(self.attempt_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
