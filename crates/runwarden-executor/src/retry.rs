use serde::Deserialize;
use std::time::Duration;

/// Delay inserted between a failed attempt and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BackoffStrategy {
    /// Retry immediately.
    #[default]
    None,
    Fixed(Duration),
    /// `initial * multiplier^(retry - 1)`, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Delay before retry number `retry` (1 for the first retry).
    ///
    /// ```
    /// use runwarden_executor::retry::BackoffStrategy;
    /// use std::time::Duration;
    ///
    /// let backoff = BackoffStrategy::Exponential {
    ///     initial: Duration::from_secs(1),
    ///     max: Duration::from_secs(5),
    ///     multiplier: 2.0,
    /// };
    /// assert_eq!(backoff.delay(1), Duration::from_secs(1));
    /// assert_eq!(backoff.delay(3), Duration::from_secs(4));
    /// assert_eq!(backoff.delay(10), Duration::from_secs(5));
    /// ```
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed(delay) => delay,
            BackoffStrategy::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
                let factor = multiplier.max(1.0).powi(exponent);
                let secs = initial.as_secs_f64() * factor;
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// How overlapping firings of the same runbook are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// A second firing fails with `AlreadyRunning` while one is in flight.
    #[default]
    Reject,
    /// A second firing waits until the in-flight execution finishes.
    Queue,
}

/// Attempt bookkeeping for one step within one execution.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    attempts: u32,
    backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: 0,
            backoff,
        }
    }

    /// Records the start of an attempt and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Delay before the next attempt.
    pub fn next_delay(&self) -> Duration {
        self.backoff.delay(self.attempts)
    }
}
