//! Backoff delay computation for retry scheduling.
//!
//! A delay is computed in two steps: the [`BackoffStrategy`] produces a base
//! delay from the attempt number, then the [`Jitter`] mode randomizes it to
//! spread out synchronized retry storms. Both steps are pure; randomness is
//! injected so tests can seed it.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Cap on the exponent used for exponential growth, preventing overflow for
/// large attempt numbers. The delay cap kicks in long before this anyway.
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Construction-time configuration error. The only fatal path in this crate;
/// nothing else fails at call time because of configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// How the base delay grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// `initial * multiplier^(attempt - 1)`, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// `initial * attempt`, capped at `max` (100ms, 200ms, 300ms, ...).
    Linear { initial: Duration, max: Duration },
    /// The same delay every attempt.
    Constant { delay: Duration },
    /// No delay between attempts.
    Immediate,
}

impl BackoffStrategy {
    /// Pre-jitter delay for a 1-based attempt number.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match *self {
            BackoffStrategy::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
                let millis = initial.as_millis() as f64 * multiplier.powi(exponent as i32);
                Duration::from_millis(millis.min(max.as_millis() as f64) as u64)
            }
            BackoffStrategy::Linear { initial, max } => initial.saturating_mul(attempt).min(max),
            BackoffStrategy::Constant { delay } => delay,
            BackoffStrategy::Immediate => Duration::ZERO,
        }
    }

    /// First-attempt delay, used as the lower bound for decorrelated jitter.
    pub(crate) fn initial_delay(&self) -> Duration {
        match *self {
            BackoffStrategy::Exponential { initial, .. } => initial,
            BackoffStrategy::Linear { initial, .. } => initial,
            BackoffStrategy::Constant { delay } => delay,
            BackoffStrategy::Immediate => Duration::ZERO,
        }
    }

    /// Hard cap every computed delay must respect.
    pub(crate) fn max_delay(&self) -> Duration {
        match *self {
            BackoffStrategy::Exponential { max, .. } => max,
            BackoffStrategy::Linear { max, .. } => max,
            BackoffStrategy::Constant { delay } => delay,
            BackoffStrategy::Immediate => Duration::ZERO,
        }
    }

    /// Validate strategy parameters. Called by the config builders so that a
    /// bad strategy is rejected before any retry loop runs.
    pub fn validate(&self) -> ConfigResult<()> {
        if let BackoffStrategy::Exponential { multiplier, .. } = self {
            if !multiplier.is_finite() || *multiplier <= 1.0 {
                return Err(ConfigError::new(
                    "exponential backoff multiplier must be finite and greater than 1",
                ));
            }
        }
        Ok(())
    }
}

/// Randomization applied on top of the base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Use the base delay unchanged.
    None,
    /// Uniform in `[0, base]`.
    Full,
    /// `base/2` plus uniform in `[0, base/2]`.
    Equal,
    /// Uniform in `[initial, previous_delay * 3]`, capped at the strategy
    /// maximum. Callers must thread the previous delay forward each attempt;
    /// a zero previous delay (first attempt) is seeded with the strategy's
    /// initial delay.
    Decorrelated,
}

impl Jitter {
    /// Apply this jitter mode to a base delay.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        base: Duration,
        strategy: &BackoffStrategy,
        previous_delay: Duration,
        rng: &mut R,
    ) -> Duration {
        match self {
            Jitter::None => base,
            Jitter::Full => {
                let max_ms = base.as_millis() as u64;
                if max_ms == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.gen_range(0..=max_ms))
            }
            Jitter::Equal => {
                let half_ms = base.as_millis() as u64 / 2;
                if half_ms == 0 {
                    return base;
                }
                Duration::from_millis(half_ms + rng.gen_range(0..=half_ms))
            }
            Jitter::Decorrelated => {
                let lo = strategy.initial_delay().as_millis() as u64;
                let cap = strategy.max_delay().as_millis() as u64;
                let prev = previous_delay.as_millis() as u64;
                let seed = if prev == 0 { lo } else { prev };
                let hi = seed.saturating_mul(3).max(lo);
                let picked = if hi <= lo {
                    lo
                } else {
                    rng.gen_range(lo..=hi)
                };
                Duration::from_millis(picked.min(cap))
            }
        }
    }
}

/// Compute the delay before the next attempt using the thread-local RNG.
///
/// `attempt` is the 1-based number of the attempt that just failed;
/// `previous_delay` is the delay used before it (zero on the first attempt)
/// and only influences [`Jitter::Decorrelated`].
pub fn compute(
    strategy: &BackoffStrategy,
    jitter: &Jitter,
    attempt: u32,
    previous_delay: Duration,
) -> Duration {
    compute_with(strategy, jitter, attempt, previous_delay, &mut rand::thread_rng())
}

/// [`compute`] with an explicit random source, for deterministic tests.
pub fn compute_with<R: Rng + ?Sized>(
    strategy: &BackoffStrategy,
    jitter: &Jitter,
    attempt: u32,
    previous_delay: Duration,
    rng: &mut R,
) -> Duration {
    let base = strategy.base_delay(attempt);
    jitter.apply(base, strategy, previous_delay, rng)
}
