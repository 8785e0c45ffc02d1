//! Pre-tuned configuration bundles for common dependency classes.

use std::time::Duration;

use crate::backoff::{BackoffStrategy, Jitter};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;

/// Breaker and retry settings for one class of downstream dependency.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    /// `None` means the operation must not be retried at all.
    pub retry: Option<RetryConfig>,
}

/// Internal gRPC calls: moderate thresholds, quick exponential retries.
pub fn grpc_config() -> ServiceConfig {
    ServiceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        },
        retry: Some(RetryConfig {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(100),
                multiplier: 2.0,
                max: Duration::from_secs(5),
            },
            jitter: Jitter::Equal,
            retry_circuit_open: false,
        }),
    }
}

/// Database queries: tolerant breaker, no retry to avoid duplicate writes.
pub fn database_config() -> ServiceConfig {
    ServiceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 10,
            success_threshold: 3,
            open_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        },
        retry: None,
    }
}

/// Cache operations: trip fast, recover fast, short retries for idempotent
/// reads.
pub fn cache_config() -> ServiceConfig {
    ServiceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_secs(15),
            half_open_max_calls: 1,
        },
        retry: Some(RetryConfig {
            max_attempts: 2,
            backoff: BackoffStrategy::Constant {
                delay: Duration::from_millis(50),
            },
            jitter: Jitter::Full,
            retry_circuit_open: false,
        }),
    }
}

/// Third-party HTTP APIs: patient breaker, decorrelated backoff to avoid
/// synchronized retry storms against a shared endpoint.
pub fn http_external_config() -> ServiceConfig {
    ServiceConfig {
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(120),
            half_open_max_calls: 2,
        },
        retry: Some(RetryConfig {
            max_attempts: 5,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(500),
                multiplier: 2.0,
                max: Duration::from_secs(30),
            },
            jitter: Jitter::Decorrelated,
            retry_circuit_open: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_values() {
        let config = grpc_config();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert!(config.retry.is_some());
        assert!(config.circuit_breaker.validate().is_ok());
    }

    #[test]
    fn database_has_no_retry() {
        let config = database_config();
        assert!(config.retry.is_none());
        assert!(config.circuit_breaker.validate().is_ok());
    }

    #[test]
    fn cache_trips_fast() {
        let config = cache_config();
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.open_timeout, Duration::from_secs(15));
    }

    #[test]
    fn all_preset_retry_configs_are_valid() {
        for preset in [grpc_config(), cache_config(), http_external_config()] {
            let retry = preset.retry.expect("preset has retry config");
            assert!(retry.validate().is_ok());
        }
    }
}
