//! Circuit breaker guarding a fallible downstream dependency.
//!
//! State transitions:
//! - Closed -> Open: consecutive failures reach `failure_threshold`
//! - Open -> HalfOpen: first call arriving at or after `open_timeout`
//! - HalfOpen -> Closed: consecutive trial successes reach `success_threshold`
//! - HalfOpen -> Open: any trial failure
//!
//! One breaker instance is shared by reference (cheap clone) across every
//! caller guarding the same dependency. All state lives behind a single mutex
//! that is held only across the decide-and-transition step, never across the
//! wrapped operation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backoff::{ConfigError, ConfigResult};
use crate::clock::{Clock, SystemClock};
use crate::metrics::BreakerMetrics;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Failing fast, calls are rejected without invoking the operation.
    Open,
    /// Probing recovery with a bounded number of trial calls.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for a circuit breaker. Built once, immutable afterwards.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive trial successes in `HalfOpen` before the circuit closes.
    pub success_threshold: u32,
    /// How long the circuit stays open before admitting a trial call.
    pub open_timeout: Duration,
    /// Concurrent trial calls admitted while `HalfOpen`.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Start building a configuration.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate threshold invariants.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::new("failure_threshold must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::new("success_threshold must be at least 1"));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::new("half_open_max_calls must be at least 1"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
        }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Errors surfaced by a breaker-guarded call.
#[derive(Debug, Error, PartialEq)]
pub enum CircuitError<E> {
    /// Rejected without invoking the operation. `retry_after` is the time
    /// remaining until the next trial call would be admitted.
    #[error("circuit breaker `{name}` is open; next trial in {retry_after:?}")]
    Open { name: String, retry_after: Duration },
    /// The operation itself failed; the underlying error passes through
    /// unmodified.
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> CircuitError<E> {
    /// Whether this is a fail-fast rejection.
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    /// Extract the operation error, if the operation actually ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            CircuitError::Open { .. } => None,
            CircuitError::Operation(e) => Some(e),
        }
    }
}

/// Point-in-time snapshot of breaker counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl CircuitBreakerMetrics {
    /// Fraction of calls (including rejections) that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_successes as f64 / self.total_calls as f64
    }
}

/// Everything the breaker mutates, guarded by one mutex.
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            total_calls: 0,
            total_failures: 0,
            total_successes: 0,
        }
    }

    fn transition(&mut self, to: CircuitState, opened_at: Option<Instant>) {
        BreakerMetrics::state_transition(&self.state.to_string(), &to.to_string());
        self.state = to;
        self.opened_at = opened_at;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.half_open_in_flight = 0;
    }
}

/// Three-state circuit breaker, generic over its clock.
///
/// Cloning shares the underlying state: hand out clones to every call site
/// that talks to the same dependency.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    shared: Arc<Mutex<BreakerState>>,
    clock: Arc<C>,
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.metrics();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &snapshot.state)
            .field("consecutive_failures", &snapshot.consecutive_failures)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the system clock.
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a named breaker; the name shows up in logs and in
    /// [`CircuitError::Open`].
    pub fn named(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        let mut breaker = Self::new(config)?;
        breaker.name = Arc::from(name.into());
        Ok(breaker)
    }

    /// Breaker with default configuration.
    pub fn with_defaults() -> Self {
        Self {
            name: Arc::from("circuit-breaker"),
            config: CircuitBreakerConfig::default(),
            shared: Arc::new(Mutex::new(BreakerState::new())),
            clock: Arc::new(SystemClock),
        }
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock, typically a
    /// [`MockClock`](crate::clock::MockClock) in tests.
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            name: Arc::from("circuit-breaker"),
            config,
            shared: Arc::new(Mutex::new(BreakerState::new())),
            clock: Arc::new(clock),
        })
    }

    /// Named variant of [`with_clock`](Self::with_clock).
    pub fn named_with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        let mut breaker = Self::with_clock(config, clock)?;
        breaker.name = Arc::from(name.into());
        Ok(breaker)
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute a synchronous operation under breaker protection.
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Err(retry_after) = self.admit() {
            return Err(self.rejection(retry_after));
        }
        match operation() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure();
                Err(CircuitError::Operation(error))
            }
        }
    }

    /// Execute an async operation under breaker protection. The internal lock
    /// is released before the future is awaited.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_after) = self.admit() {
            return Err(self.rejection(retry_after));
        }
        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.on_failure();
                Err(CircuitError::Operation(error))
            }
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> CircuitState {
        self.shared.lock().state
    }

    /// Current counter snapshot.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let s = self.shared.lock();
        CircuitBreakerMetrics {
            state: s.state,
            total_calls: s.total_calls,
            total_failures: s.total_failures,
            total_successes: s.total_successes,
            consecutive_failures: s.consecutive_failures,
            consecutive_successes: s.consecutive_successes,
        }
    }

    /// Force the breaker back to `Closed`, clearing consecutive counters.
    /// Cumulative totals are preserved.
    pub fn reset(&self) {
        let mut s = self.shared.lock();
        if s.state != CircuitState::Closed {
            s.transition(CircuitState::Closed, None);
        } else {
            s.consecutive_failures = 0;
            s.consecutive_successes = 0;
        }
        info!(breaker = %self.name, "circuit breaker manually reset");
    }

    /// Decide whether the incoming call may run. On rejection, returns the
    /// time remaining until the next trial would be admitted. Counts the call
    /// either way.
    fn admit(&self) -> Result<(), Duration> {
        let mut s = self.shared.lock();
        s.total_calls += 1;
        match s.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let now = self.clock.now();
                let elapsed = match s.opened_at {
                    Some(at) => now.duration_since(at),
                    // Unknown open instant; treat the timeout as elapsed.
                    None => self.config.open_timeout,
                };
                if elapsed >= self.config.open_timeout {
                    // The call that finds the timeout expired is itself the
                    // first trial.
                    s.transition(CircuitState::HalfOpen, None);
                    s.half_open_in_flight = 1;
                    info!(breaker = %self.name, "circuit breaker half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(self.config.open_timeout - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if s.half_open_in_flight < self.config.half_open_max_calls {
                    s.half_open_in_flight += 1;
                    Ok(())
                } else {
                    // Trials already in flight; report no extra wait beyond
                    // their resolution.
                    Err(Duration::ZERO)
                }
            }
        }
    }

    fn rejection<E>(&self, retry_after: Duration) -> CircuitError<E> {
        debug!(
            breaker = %self.name,
            retry_after_ms = retry_after.as_millis() as u64,
            "circuit breaker rejecting call"
        );
        BreakerMetrics::call("open", "rejected");
        CircuitError::Open {
            name: self.name.to_string(),
            retry_after,
        }
    }

    fn on_success(&self) {
        let mut s = self.shared.lock();
        s.total_successes += 1;
        BreakerMetrics::call(&s.state.to_string(), "success");
        match s.state {
            CircuitState::Closed => {
                s.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                s.half_open_in_flight = s.half_open_in_flight.saturating_sub(1);
                s.consecutive_successes += 1;
                if s.consecutive_successes >= self.config.success_threshold {
                    let successes = s.consecutive_successes;
                    s.transition(CircuitState::Closed, None);
                    info!(
                        breaker = %self.name,
                        successes,
                        "circuit breaker closed after successful trials"
                    );
                }
            }
            CircuitState::Open => {
                // A trial that was still in flight when another trial failed.
                debug!(breaker = %self.name, "success recorded while open, ignoring");
            }
        }
    }

    fn on_failure(&self) {
        let mut s = self.shared.lock();
        s.total_failures += 1;
        BreakerMetrics::call(&s.state.to_string(), "failure");
        match s.state {
            CircuitState::Closed => {
                s.consecutive_failures += 1;
                if s.consecutive_failures >= self.config.failure_threshold {
                    let failures = s.consecutive_failures;
                    s.transition(CircuitState::Open, Some(self.clock.now()));
                    warn!(
                        breaker = %self.name,
                        failures,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                s.transition(CircuitState::Open, Some(self.clock.now()));
                warn!(breaker = %self.name, "trial call failed, circuit breaker reopened");
            }
            CircuitState::Open => {
                // Late completion of a trial; already open.
            }
        }
    }
}
