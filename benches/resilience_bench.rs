//! Benchmarks for breaker call paths and backoff computation.
//!
//! Run with: `cargo bench --bench resilience_bench`

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use resilience_toolkit::{
    compute, BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, Jitter, RetryConfig,
    RetryExecutor,
};
use tokio::runtime::Builder as RuntimeBuilder;

fn bench_breaker_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker");

    group.bench_function("call_success", |b| {
        let breaker = CircuitBreaker::with_defaults();
        b.iter(|| {
            let result = breaker.call(|| Ok::<_, &str>(()));
            black_box(result).ok();
        });
    });

    group.bench_function("call_rejected_while_open", |b| {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_timeout: Duration::from_secs(3600),
            half_open_max_calls: 1,
        };
        let breaker = CircuitBreaker::new(config).expect("valid config");
        let _ = breaker.call(|| Err::<(), _>("trip"));
        b.iter(|| {
            let result = breaker.call(|| Ok::<_, &str>(()));
            black_box(result).ok();
        });
    });

    group.finish();
}

fn bench_backoff_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff_compute");

    let strategies = [
        (
            "exponential",
            BackoffStrategy::Exponential {
                initial: Duration::from_millis(100),
                multiplier: 2.0,
                max: Duration::from_secs(30),
            },
        ),
        (
            "linear",
            BackoffStrategy::Linear {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(10),
            },
        ),
    ];

    for (name, strategy) in strategies {
        for jitter in [Jitter::None, Jitter::Full, Jitter::Decorrelated] {
            group.bench_with_input(
                BenchmarkId::new(name, format!("{jitter:?}")),
                &(strategy, jitter),
                |b, (strategy, jitter)| {
                    b.iter(|| {
                        let delay = compute(
                            black_box(strategy),
                            black_box(jitter),
                            black_box(4),
                            Duration::from_millis(150),
                        );
                        black_box(delay)
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_retry_fast_path(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread()
        .enable_time()
        .build()
        .expect("benchmark runtime");

    c.bench_function("retry_first_attempt_success", |b| {
        let executor = RetryExecutor::new(RetryConfig::default());
        b.iter(|| {
            let result: Result<u32, _> =
                runtime.block_on(executor.execute(|| async { Ok::<_, &str>(7) }));
            black_box(result).ok();
        });
    });
}

criterion_group!(
    benches,
    bench_breaker_paths,
    bench_backoff_compute,
    bench_retry_fast_path
);
criterion_main!(benches);
