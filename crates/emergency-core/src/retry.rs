//! Bounded exponential backoff for retryable store failures.

use std::time::Duration;

use rand::Rng as _;

/// Default number of deliveries before a message is dead-lettered.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first redelivery.
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default ceiling on any single redelivery delay.
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// What to do with a message whose processing failed retryably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redeliver after the given delay.
    Requeue(Duration),
    /// The attempt budget is spent; dead-letter the message.
    GiveUp,
}

/// Backoff schedule: `base * 2^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deliveries allowed before giving up, counting the first.
    pub max_attempts: u32,
    /// Delay after the first failed delivery.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Randomise each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Set the attempt budget. Values below one are treated as one.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base and maximum delays.
    #[must_use]
    pub const fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Decide the fate of a message that failed on delivery `attempt`
    /// (1-based).
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let delay = self.backoff(attempt);
        if self.jitter {
            RetryDecision::Requeue(jittered(delay))
        } else {
            RetryDecision::Requeue(delay)
        }
    }

    /// Un-jittered delay after delivery `attempt` (1-based) failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 2_u32.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Pick a delay uniformly in `[delay / 2, delay]`.
fn jittered(delay: Duration) -> Duration {
    let ceiling = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let floor = ceiling.checked_div(2).unwrap_or(0);
    if floor >= ceiling {
        return delay;
    }
    Duration::from_millis(rand::rng().random_range(floor..=ceiling))
}
