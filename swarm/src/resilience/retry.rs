//! Retry with configurable backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// How long to wait between attempts.
#[derive(Clone)]
pub enum BackoffStrategy {
    /// No delay between attempts.
    Immediate,
    /// The same delay every time.
    Fixed(Duration),
    /// `initial + increment * (attempt - 1)`.
    Linear {
        /// Delay before the first retry.
        initial: Duration,
        /// Added per subsequent attempt.
        increment: Duration,
    },
    /// `initial * factor^(attempt - 1)`, capped at `max`.
    Exponential {
        /// Delay before the first retry.
        initial: Duration,
        /// Multiplier per attempt.
        factor: f64,
        /// Upper bound on any single delay.
        max: Duration,
        /// Scale the delay by a random factor in `[0, 1)`.
        jitter: bool,
    },
    /// Decorrelated jitter: `rand(base, previous * 3)`, capped at `max`.
    DecorrelatedJitter {
        /// Minimum delay.
        base: Duration,
        /// Upper bound on any single delay.
        max: Duration,
    },
    /// Custom delay computed from the attempt number (1-based).
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl std::fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "Immediate"),
            Self::Fixed(d) => write!(f, "Fixed({d:?})"),
            Self::Linear { initial, increment } => {
                write!(f, "Linear({initial:?} + {increment:?})")
            }
            Self::Exponential {
                initial,
                factor,
                max,
                jitter,
            } => write!(f, "Exponential({initial:?} x{factor}, max {max:?}, jitter {jitter})"),
            Self::DecorrelatedJitter { base, max } => {
                write!(f, "DecorrelatedJitter({base:?}..{max:?})")
            }
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl BackoffStrategy {
    /// Delay before retry number `attempt` (1-based). `previous` is the
    /// delay used before the prior retry, for decorrelated jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32, previous: Duration) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(d) => *d,
            Self::Linear { initial, increment } => {
                *initial + *increment * attempt.saturating_sub(1)
            }
            Self::Exponential {
                initial,
                factor,
                max,
                jitter,
            } => {
                let exp = factor.powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
                let mut secs = initial.as_secs_f64() * exp;
                if *jitter {
                    secs *= fastrand::f64();
                }
                Duration::from_secs_f64(secs.min(max.as_secs_f64()))
            }
            Self::DecorrelatedJitter { base, max } => {
                let low = base.as_secs_f64();
                let high = (previous.as_secs_f64() * 3.0).max(low);
                let secs = low + fastrand::f64() * (high - low);
                Duration::from_secs_f64(secs.min(max.as_secs_f64()))
            }
            Self::Custom(f) => f(attempt),
        }
    }
}

type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Wraps a failable operation with bounded, backoff-gated retries.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffStrategy,
    should_retry: Option<RetryPredicate>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Create a policy. A zero `max_attempts` is sanitized to 1.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        let max_attempts = if max_attempts == 0 {
            warn!("max_attempts of 0 sanitized to 1");
            1
        } else {
            max_attempts
        };
        Self {
            max_attempts,
            backoff,
            should_retry: None,
        }
    }

    /// Gate retries on a predicate over the error.
    #[must_use]
    pub fn with_should_retry(
        mut self,
        predicate: impl Fn(&Error) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Run `op` until it succeeds, the predicate declines, or attempts
    /// are exhausted. The closure receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the operation's error unchanged when the predicate
    /// declines to retry, or [`Error::RetriesExhausted`] after the final
    /// attempt fails.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut previous_delay = Duration::ZERO;
        let mut last_error: Option<Error> = None;

        for attempt in 1..=self.max_attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let retryable = self.should_retry.as_ref().is_none_or(|p| p(&e));
                    if !retryable {
                        return Err(e);
                    }
                    warn!(attempt, error = %e, "attempt failed");
                    last_error = Some(e);
                    if attempt < self.max_attempts {
                        let delay = self.backoff.delay(attempt, previous_delay);
                        previous_delay = delay;
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts: self.max_attempts,
            last: Box::new(last_error.unwrap_or(Error::Cancelled)),
        })
    }
}
