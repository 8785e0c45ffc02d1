//! Prometheus metrics behind the `metrics` cargo feature.
//!
//! Recording calls are compiled into the hot paths unconditionally; without
//! the feature they resolve to no-op shims.

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

#[cfg(feature = "metrics")]
static BREAKER_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "circuit_breaker_transitions_total",
        "Circuit breaker state transitions",
        &["from", "to"]
    )
    .expect("register circuit breaker transition metric")
});

#[cfg(feature = "metrics")]
static BREAKER_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "circuit_breaker_calls_total",
        "Circuit breaker call outcomes by state",
        &["state", "outcome"]
    )
    .expect("register circuit breaker call metric")
});

#[cfg(feature = "metrics")]
static RETRY_ATTEMPTS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "retry_attempts",
        "Attempts used before the retry loop finished",
        &["outcome"]
    )
    .expect("register retry attempts metric")
});

/// Circuit breaker event recorder.
pub struct BreakerMetrics;

#[cfg(feature = "metrics")]
impl BreakerMetrics {
    pub fn state_transition(from: &str, to: &str) {
        BREAKER_TRANSITIONS.with_label_values(&[from, to]).inc();
    }

    pub fn call(state: &str, outcome: &str) {
        BREAKER_CALLS.with_label_values(&[state, outcome]).inc();
    }
}

#[cfg(not(feature = "metrics"))]
impl BreakerMetrics {
    pub fn state_transition(_from: &str, _to: &str) {}
    pub fn call(_state: &str, _outcome: &str) {}
}

/// Retry loop event recorder.
pub struct RetryMetrics;

#[cfg(feature = "metrics")]
impl RetryMetrics {
    pub fn attempts(outcome: &str, attempts: u32) {
        RETRY_ATTEMPTS
            .with_label_values(&[outcome])
            .observe(attempts as f64);
    }
}

#[cfg(not(feature = "metrics"))]
impl RetryMetrics {
    pub fn attempts(_outcome: &str, _attempts: u32) {}
}
