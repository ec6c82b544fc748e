//! Error types for the analysis pipeline and its resilience layer.

use thiserror::Error;

/// Failures produced while analyzing an email or calling an external dependency.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThreatError {
    /// Malformed input. Fatal to the single call, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transient dependency failure.
    #[error("{service} failed: {message}")]
    ExternalService { service: String, message: String },

    /// A single attempt exceeded its deadline.
    #[error("{service} timed out after {timeout_ms}ms")]
    OperationTimeout { service: String, timeout_ms: u64 },

    /// The breaker guarding `service` is open; the call was not attempted.
    #[error("circuit open for {service} ({failure_count} consecutive failures)")]
    CircuitOpen { service: String, failure_count: u32 },

    /// The dependency answered but the payload could not be decoded.
    #[error("{service} returned an invalid response: {message}")]
    InvalidResponse { service: String, message: String },
}

impl ThreatError {
    pub fn external(service: &str, message: impl Into<String>) -> Self {
        ThreatError::ExternalService {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_response(service: &str, message: impl Into<String>) -> Self {
        ThreatError::InvalidResponse {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Default retryable-failure predicate.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ThreatError::ExternalService { .. } | ThreatError::OperationTimeout { .. }
        )
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ThreatError::CircuitOpen { .. })
    }
}

/// Result type for pipeline and dependency operations.
pub type Result<T> = std::result::Result<T, ThreatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ThreatError::external("reputation", "503").is_retryable());
        assert!(ThreatError::OperationTimeout {
            service: "reputation".into(),
            timeout_ms: 10
        }
        .is_retryable());

        assert!(!ThreatError::Validation("missing sender".into()).is_retryable());
        assert!(!ThreatError::invalid_response("reputation", "bad json").is_retryable());
        assert!(!ThreatError::CircuitOpen {
            service: "reputation".into(),
            failure_count: 5
        }
        .is_retryable());
    }

    #[test]
    fn test_display_names_service() {
        let err = ThreatError::CircuitOpen {
            service: "sandbox".into(),
            failure_count: 3,
        };
        assert_eq!(
            err.to_string(),
            "circuit open for sandbox (3 consecutive failures)"
        );
    }
}
