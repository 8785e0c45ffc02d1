//! Resilience toolkit: a circuit breaker composed with a retry executor.
//!
//! The two halves nest instead of duplicating each other: the breaker guards
//! one downstream dependency and never retries; the executor retries and never
//! touches breaker bookkeeping. Wrap the breaker call in the retried
//! operation and let [`CircuitAware`] decide what a fail-fast rejection means
//! for the retry loop.
//!
//! # Example: guarded call with retries
//!
//! ```rust,no_run
//! use resilience_toolkit::{
//!     retry_with_policy, CircuitAware, CircuitBreaker, CircuitBreakerConfig, RetryConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let breaker = CircuitBreaker::named("billing-api", CircuitBreakerConfig::default())
//!         .expect("valid breaker config");
//!     let retry_config = RetryConfig::default();
//!
//!     let result = retry_with_policy(CircuitAware::from_config(retry_config), || {
//!         let breaker = breaker.clone();
//!         async move {
//!             breaker
//!                 .execute(|| async {
//!                     // Your fallible call here
//!                     Ok::<_, String>(())
//!                 })
//!                 .await
//!         }
//!     })
//!     .await;
//!
//!     if let Err(err) = result {
//!         eprintln!("billing call failed: {err}");
//!     }
//! }
//! ```
//!
//! # Example: retry with a deadline
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use resilience_toolkit::{cancel_after, RetryConfig, RetryExecutor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = RetryExecutor::new(RetryConfig::default());
//!     let deadline = cancel_after(Duration::from_secs(5));
//!
//!     let result = executor
//!         .execute_cancellable(&deadline, || async {
//!             // Your fallible call here
//!             Ok::<_, String>(())
//!         })
//!         .await;
//!
//!     if let Err(err) = result {
//!         eprintln!("gave up: {err}");
//!     }
//! }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod metrics;
pub mod presets;
pub mod retry;

// Re-export the main types for convenience
pub use backoff::{compute, compute_with, BackoffStrategy, ConfigError, ConfigResult, Jitter};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitError, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use presets::{
    cache_config, database_config, grpc_config, http_external_config, ServiceConfig,
};
pub use retry::{
    cancel_after, policies, retry, retry_with_policy, CircuitAware, RetryConfig,
    RetryConfigBuilder, RetryContext, RetryDecision, RetryError, RetryExecutor, RetryPolicy,
};
