//! Cross-module scenarios: breaker lifecycle against a mock clock, retry
//! loops composed with a breaker, and cancellation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use resilience_toolkit::{
    cancel_after, retry, retry_with_policy, BackoffStrategy, CircuitAware, CircuitBreaker,
    CircuitBreakerConfig, CircuitError, CircuitState, Jitter, MockClock, RetryConfig,
    RetryError, RetryExecutor,
};
use tokio_util::sync::CancellationToken;

fn immediate_retries(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        backoff: BackoffStrategy::Immediate,
        jitter: Jitter::None,
        retry_circuit_open: false,
    }
}

// ==================== Circuit Breaker Lifecycle ====================

#[test]
fn breaker_full_lifecycle_with_mock_clock() {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        open_timeout: Duration::from_secs(60),
        half_open_max_calls: 1,
    };
    let breaker = CircuitBreaker::with_clock(config, clock.clone()).expect("valid config");

    // Three failing calls trip the breaker.
    for _ in 0..3 {
        let _ = breaker.call(|| Err::<(), _>("downstream unavailable"));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // An immediate fourth call is rejected without invoking the operation.
    let invoked = AtomicU32::new(0);
    let result = breaker.call(|| {
        invoked.fetch_add(1, Ordering::SeqCst);
        Ok::<_, &str>(())
    });
    assert!(matches!(result, Err(CircuitError::Open { .. })));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    // After the timeout the next call goes through as the trial.
    clock.advance(Duration::from_secs(60));
    assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // A second consecutive success closes the circuit and resets counters.
    assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);

    let metrics = breaker.metrics();
    assert_eq!(metrics.consecutive_failures, 0);
    assert_eq!(metrics.consecutive_successes, 0);
    assert_eq!(metrics.total_calls, 6);
    assert_eq!(metrics.total_failures, 3);
    assert_eq!(metrics.total_successes, 2);
}

#[test]
fn breaker_stays_open_until_timeout() {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig {
        failure_threshold: 1,
        success_threshold: 1,
        open_timeout: Duration::from_secs(30),
        half_open_max_calls: 1,
    };
    let breaker = CircuitBreaker::with_clock(config, clock.clone()).expect("valid config");

    let _ = breaker.call(|| Err::<(), _>("boom"));
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(29));
    assert!(breaker.call(|| Ok::<_, &str>(())).is_err());

    clock.advance(Duration::from_secs(1));
    assert!(breaker.call(|| Ok::<_, &str>(())).is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);
}

// ==================== Retry Executor ====================

#[tokio::test]
async fn retry_recovers_from_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result = retry(immediate_retries(3), move || {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("transient")
            } else {
                Ok(42)
            }
        }
    })
    .await;

    assert_eq!(result, Ok(42));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_reports_exhaustion() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<(), _> = retry(immediate_retries(2), move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("persistent")
        }
    })
    .await;

    assert_eq!(
        result,
        Err(RetryError::Exhausted {
            attempts: 2,
            last_error: "persistent"
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn deadline_cancels_pending_backoff() {
    let config = RetryConfig {
        max_attempts: 5,
        backoff: BackoffStrategy::Constant {
            delay: Duration::from_secs(30),
        },
        jitter: Jitter::None,
        retry_circuit_open: false,
    };

    let deadline = cancel_after(Duration::from_millis(20));
    let result: Result<(), _> = RetryExecutor::new(config)
        .execute_cancellable(&deadline, || async { Err("boom") })
        .await;

    assert_eq!(result, Err(RetryError::Cancelled));
}

#[tokio::test]
async fn external_token_cancels_in_flight_operation() {
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let result: Result<(), RetryError<&str>> = RetryExecutor::new(immediate_retries(3))
        .execute_cancellable(&cancel, || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

    assert_eq!(result, Err(RetryError::Cancelled));
}

// ==================== Composition: Retry Around a Breaker ====================

#[tokio::test]
async fn open_breaker_rejection_is_not_retried_by_default() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 1,
        success_threshold: 1,
        open_timeout: Duration::from_secs(60),
        half_open_max_calls: 1,
    })
    .expect("valid config");

    // Trip the breaker first.
    let _ = breaker.call(|| Err::<(), _>("boom"));
    assert_eq!(breaker.state(), CircuitState::Open);

    let invoked = Arc::new(AtomicU32::new(0));
    let counter = invoked.clone();
    let policy = CircuitAware::from_config(immediate_retries(5));

    let result: Result<(), _> = retry_with_policy(policy, move || {
        let breaker = breaker.clone();
        let counter = counter.clone();
        async move {
            breaker
                .execute(|| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &str>(())
                })
                .await
        }
    })
    .await;

    // One attempt, no operation invocation, rejection passed through.
    match result {
        Err(RetryError::NotRetried(CircuitError::Open { .. })) => {}
        other => panic!("expected pass-through rejection, got {other:?}"),
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn opted_in_retry_waits_out_the_breaker() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 1,
        success_threshold: 1,
        open_timeout: Duration::from_millis(50),
        half_open_max_calls: 1,
    })
    .expect("valid config");

    let mut config = immediate_retries(5);
    config.retry_circuit_open = true;
    let policy = CircuitAware::from_config(config);

    let invoked = Arc::new(AtomicU32::new(0));
    let counter = invoked.clone();

    let result = retry_with_policy(policy, move || {
        let breaker = breaker.clone();
        let counter = counter.clone();
        async move {
            breaker
                .execute(|| async move {
                    // First invocation trips the breaker, later ones recover.
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("boom")
                    } else {
                        Ok(42)
                    }
                })
                .await
        }
    })
    .await;

    assert_eq!(result, Ok(42));
    // Failed once, then succeeded on the half-open trial; rejections in
    // between never reached the operation.
    assert_eq!(invoked.load(Ordering::SeqCst), 2);
}

// ==================== Presets ====================

#[test]
fn presets_build_working_breakers() {
    let preset = resilience_toolkit::grpc_config();
    let breaker = CircuitBreaker::new(preset.circuit_breaker).expect("valid preset");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.call(|| Ok::<_, &str>(7)).is_ok());

    assert!(resilience_toolkit::database_config().retry.is_none());
}
