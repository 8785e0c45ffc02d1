//! Retry execution under a configurable policy.
//!
//! The executor owns the loop: invoke, consult the policy on failure, sleep,
//! repeat. Policies own the decision: the built-in one is derived from
//! [`RetryConfig`], custom ones implement [`RetryPolicy`]. The executor holds
//! no per-call state, so one instance can serve any number of call sites; only
//! circuit breakers are intentionally shared.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::{self, BackoffStrategy, ConfigError, ConfigResult, Jitter};
use crate::circuit_breaker::CircuitError;
use crate::metrics::RetryMetrics;

/// Configuration for retry behavior. Built once, immutable afterwards.
///
/// A `RetryConfig` is itself a [`RetryPolicy`]: stop once `max_attempts` is
/// reached, otherwise retry after the configured backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempt budget, including the first attempt. At least 1.
    pub max_attempts: u32,
    /// Base delay growth between attempts.
    pub backoff: BackoffStrategy,
    /// Randomization applied to each delay.
    pub jitter: Jitter,
    /// Whether an open-breaker rejection is retried when this config guards a
    /// breaker-wrapped operation via [`CircuitAware::from_config`]. Off by
    /// default: retrying against an open breaker usually just burns the
    /// attempt budget.
    pub retry_circuit_open: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(100),
                multiplier: 2.0,
                max: Duration::from_secs(30),
            },
            jitter: Jitter::Equal,
            retry_circuit_open: false,
        }
    }
}

impl RetryConfig {
    /// Start building a configuration.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate attempt and backoff invariants.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::new("max_attempts must be at least 1"));
        }
        self.backoff.validate()
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn exponential_backoff(
        mut self,
        initial: Duration,
        multiplier: f64,
        max: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential {
            initial,
            multiplier,
            max,
        };
        self
    }

    pub fn linear_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Linear { initial, max };
        self
    }

    pub fn constant_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Constant { delay };
        self
    }

    pub fn immediate_backoff(mut self) -> Self {
        self.config.backoff = BackoffStrategy::Immediate;
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.config.jitter = Jitter::None;
        self
    }

    pub fn full_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Full;
        self
    }

    pub fn equal_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Equal;
        self
    }

    pub fn decorrelated_jitter(mut self) -> Self {
        self.config.jitter = Jitter::Decorrelated;
        self
    }

    pub fn retry_circuit_open(mut self, retry: bool) -> Self {
        self.config.retry_circuit_open = retry;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Failure context handed to the policy after every failed attempt.
#[derive(Debug)]
pub struct RetryContext<'a, E> {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    /// The error it failed with.
    pub last_error: &'a E,
    /// Total time since the first attempt started.
    pub elapsed: Duration,
    /// Delay slept before this attempt; zero for the first.
    pub previous_delay: Duration,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up and surface the error.
    DoNotRetry,
    /// Sleep for the given delay, then attempt again.
    RetryAfter(Duration),
}

/// Decision function consulted after every failure.
pub trait RetryPolicy<E> {
    fn should_retry(&self, ctx: &RetryContext<'_, E>) -> RetryDecision;
}

impl<E> RetryPolicy<E> for RetryConfig {
    fn should_retry(&self, ctx: &RetryContext<'_, E>) -> RetryDecision {
        if ctx.attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry;
        }
        RetryDecision::RetryAfter(backoff::compute(
            &self.backoff,
            &self.jitter,
            ctx.attempt,
            ctx.previous_delay,
        ))
    }
}

/// Errors surfaced by retry execution.
#[derive(Debug, Error, PartialEq)]
pub enum RetryError<E> {
    /// The attempt budget was the reason to stop. Only produced after more
    /// than one attempt.
    #[error("all {attempts} attempts exhausted, last error: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
    /// The sole attempt failed and the policy declined to retry; the error
    /// passes through unmodified.
    #[error("operation failed without retry: {0}")]
    NotRetried(E),
    /// External cancellation fired mid-attempt or mid-backoff.
    #[error("retry cancelled by caller")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// Extract the underlying operation error, if any.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::NotRetried(e) => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

/// Drives an operation through repeated attempts under a policy.
///
/// Stateless between calls: each execution builds a fresh attempt counter and
/// delay chain.
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create an executor from a policy. A [`RetryConfig`] works directly.
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    /// Execute an async operation, retrying per the policy. Backoff suspends
    /// only the calling task.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        P: RetryPolicy<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let never = CancellationToken::new();
        self.execute_cancellable(&never, operation).await
    }

    /// Execute with an external cancellation signal. Cancellation aborts an
    /// in-flight operation as well as a pending backoff sleep and yields
    /// [`RetryError::Cancelled`].
    ///
    /// Deadlines are cancellation too: see [`cancel_after`].
    pub async fn execute_cancellable<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        P: RetryPolicy<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 1;
        let mut previous_delay = Duration::ZERO;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    RetryMetrics::attempts("cancelled", attempt);
                    return Err(RetryError::Cancelled);
                }
                result = operation() => result,
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    RetryMetrics::attempts("success", attempt);
                    return Ok(value);
                }
                Err(error) => {
                    let ctx = RetryContext {
                        attempt,
                        last_error: &error,
                        elapsed: started.elapsed(),
                        previous_delay,
                    };
                    match self.policy.should_retry(&ctx) {
                        RetryDecision::DoNotRetry => {
                            RetryMetrics::attempts("failure", attempt);
                            return Err(give_up(attempt, error));
                        }
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "operation failed, retrying"
                            );
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    RetryMetrics::attempts("cancelled", attempt);
                                    return Err(RetryError::Cancelled);
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                            previous_delay = delay;
                            attempt += 1;
                        }
                    }
                }
            }
        }
    }

    /// Execute a blocking operation on the current thread, sleeping with
    /// [`std::thread::sleep`] between attempts.
    pub fn execute_blocking<F, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        P: RetryPolicy<E>,
        F: FnMut() -> Result<T, E>,
    {
        self.run_blocking(None, operation)
    }

    /// Blocking execution with a cancellation token. A blocked thread cannot
    /// be preempted mid-operation, so the token is observed before each
    /// attempt and before each sleep.
    pub fn execute_blocking_cancellable<F, T, E>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        P: RetryPolicy<E>,
        F: FnMut() -> Result<T, E>,
    {
        self.run_blocking(Some(cancel), operation)
    }

    fn run_blocking<F, T, E>(
        &self,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        P: RetryPolicy<E>,
        F: FnMut() -> Result<T, E>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 1;
        let mut previous_delay = Duration::ZERO;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                RetryMetrics::attempts("cancelled", attempt);
                return Err(RetryError::Cancelled);
            }

            match operation() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    RetryMetrics::attempts("success", attempt);
                    return Ok(value);
                }
                Err(error) => {
                    let ctx = RetryContext {
                        attempt,
                        last_error: &error,
                        elapsed: started.elapsed(),
                        previous_delay,
                    };
                    match self.policy.should_retry(&ctx) {
                        RetryDecision::DoNotRetry => {
                            RetryMetrics::attempts("failure", attempt);
                            return Err(give_up(attempt, error));
                        }
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "operation failed, retrying"
                            );
                            if cancel.is_some_and(CancellationToken::is_cancelled) {
                                RetryMetrics::attempts("cancelled", attempt);
                                return Err(RetryError::Cancelled);
                            }
                            std::thread::sleep(delay);
                            previous_delay = delay;
                            attempt += 1;
                        }
                    }
                }
            }
        }
    }
}

/// Exhaustion after several attempts wraps the last error; a sole failed
/// attempt passes through.
fn give_up<E>(attempt: u32, error: E) -> RetryError<E> {
    if attempt > 1 {
        warn!(attempts = attempt, "retry attempts exhausted");
        RetryError::Exhausted {
            attempts: attempt,
            last_error: error,
        }
    } else {
        debug!("operation failed, policy declined to retry");
        RetryError::NotRetried(error)
    }
}

/// Retry an async operation with the default policy derived from `config`.
pub async fn retry<F, Fut, T, E>(config: RetryConfig, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryExecutor::new(config).execute(operation).await
}

/// Retry an async operation under a custom policy.
pub async fn retry_with_policy<P, F, Fut, T, E>(
    policy: P,
    operation: F,
) -> Result<T, RetryError<E>>
where
    P: RetryPolicy<E>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryExecutor::new(policy).execute(operation).await
}

/// Token that cancels itself after `duration`, turning a deadline into a
/// cancellation signal for [`RetryExecutor::execute_cancellable`]. Must be
/// called within a tokio runtime.
pub fn cancel_after(duration: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        timer.cancel();
    });
    token
}

/// Adapts a policy over operation errors into one over breaker-wrapped
/// errors, the composition point between the retry executor and a
/// [`CircuitBreaker`](crate::circuit_breaker::CircuitBreaker).
///
/// By default an open-breaker rejection is not retried, so a retry loop never
/// spins against a breaker that is failing fast. Opting in via
/// [`retry_open`](Self::retry_open) (or `RetryConfig::retry_circuit_open`
/// through [`from_config`](Self::from_config)) retries rejections no earlier
/// than the breaker's own `retry_after` hint.
#[derive(Debug, Clone)]
pub struct CircuitAware<P> {
    inner: P,
    open_retries: Option<RetryConfig>,
}

impl<P> CircuitAware<P> {
    /// Wrap a policy; open-breaker rejections are non-retryable.
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            open_retries: None,
        }
    }

    /// Retry open-breaker rejections, scheduled by `config` but never sooner
    /// than the breaker's `retry_after` hint.
    pub fn retry_open(mut self, config: RetryConfig) -> Self {
        self.open_retries = Some(config);
        self
    }
}

impl CircuitAware<RetryConfig> {
    /// Derive the whole composition policy from one config, honoring its
    /// `retry_circuit_open` flag.
    pub fn from_config(config: RetryConfig) -> Self {
        let open_retries = config.retry_circuit_open.then(|| config.clone());
        Self {
            inner: config,
            open_retries,
        }
    }
}

impl<P, E> RetryPolicy<CircuitError<E>> for CircuitAware<P>
where
    P: RetryPolicy<E>,
{
    fn should_retry(&self, ctx: &RetryContext<'_, CircuitError<E>>) -> RetryDecision {
        match ctx.last_error {
            CircuitError::Open { retry_after, .. } => match &self.open_retries {
                None => RetryDecision::DoNotRetry,
                Some(config) => {
                    if ctx.attempt >= config.max_attempts {
                        return RetryDecision::DoNotRetry;
                    }
                    let backoff = backoff::compute(
                        &config.backoff,
                        &config.jitter,
                        ctx.attempt,
                        ctx.previous_delay,
                    );
                    RetryDecision::RetryAfter(backoff.max(*retry_after))
                }
            },
            CircuitError::Operation(error) => {
                let inner_ctx = RetryContext {
                    attempt: ctx.attempt,
                    last_error: error,
                    elapsed: ctx.elapsed,
                    previous_delay: ctx.previous_delay,
                };
                self.inner.should_retry(&inner_ctx)
            }
        }
    }
}

/// Ready-made policies for common situations.
pub mod policies {
    use super::*;

    /// Retry per `config`, but only for errors the predicate approves.
    #[derive(Debug, Clone)]
    pub struct RetryIf<F> {
        config: RetryConfig,
        predicate: F,
    }

    impl<F> RetryIf<F> {
        pub fn new(config: RetryConfig, predicate: F) -> Self {
            Self { config, predicate }
        }
    }

    impl<E, F> RetryPolicy<E> for RetryIf<F>
    where
        F: Fn(&E) -> bool,
    {
        fn should_retry(&self, ctx: &RetryContext<'_, E>) -> RetryDecision {
            if !(self.predicate)(ctx.last_error) {
                return RetryDecision::DoNotRetry;
            }
            self.config.should_retry(ctx)
        }
    }
}
