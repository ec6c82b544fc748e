use super::duration_from_secs;
use crate::error::ThreatError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    Exponential,
    Fixed,
}

/// Serializable retry settings, as they appear in the YAML config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub backoff_factor: f64,
    pub strategy: BackoffStrategy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 60.0,
            backoff_factor: 2.0,
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetrySettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        for (name, value) in [
            ("base_delay_secs", self.base_delay_secs),
            ("max_delay_secs", self.max_delay_secs),
        ] {
            if duration_from_secs(value).is_none() {
                return Err(format!("retry.{name} must be a non-negative, representable number of seconds"));
            }
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err("retry.backoff_factor must be a finite, non-negative number".to_string());
        }
        Ok(())
    }
}

pub type RetryPredicate = Arc<dyn Fn(&ThreatError) -> bool + Send + Sync>;

/// Immutable retry configuration shared by every call through one client.
#[derive(Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub strategy: BackoffStrategy,
    pub retryable: RetryPredicate,
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryConfig {
    /// Build from settings using [`ThreatError::is_retryable`] as the predicate.
    /// Settings are expected to have passed [`RetrySettings::validate`].
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: secs(settings.base_delay_secs),
            max_delay: secs(settings.max_delay_secs),
            backoff_factor: settings.backoff_factor,
            strategy: settings.strategy,
            retryable: Arc::new(ThreatError::is_retryable),
        }
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ThreatError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }
}

fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        Duration::ZERO
    } else {
        duration_from_secs(value).unwrap_or(Duration::MAX)
    }
}

/// Pure backoff calculator. `attempt` is zero-based.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let raw = match self.config.strategy {
            BackoffStrategy::Linear => base * (f64::from(attempt) + 1.0),
            BackoffStrategy::Exponential => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                base * self.config.backoff_factor.powi(exponent)
            }
            BackoffStrategy::Fixed => base,
        };

        let capped = raw.min(self.config.max_delay.as_secs_f64());
        secs(capped)
    }

    pub fn should_retry(&self, attempt: u32, failure: &ThreatError) -> bool {
        attempt.saturating_add(1) < self.config.max_attempts && (self.config.retryable)(failure)
    }
}
