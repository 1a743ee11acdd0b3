//! Exponential backoff with a cap and optional jitter.
//!
//! Shared by the per-item rate limiter and the informer's reconnect loop.

use std::time::Duration;

use rand::Rng;

/// Upper bound on the extra fraction jitter may add to a delay.
const JITTER_FRACTION: f64 = 0.25;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay for the first attempt.
    pub initial_delay: Duration,
    /// Maximum delay (caps exponential growth, applied before jitter).
    pub max_delay: Duration,
    /// Multiplier per attempt (typically 2.0).
    pub multiplier: f64,
    /// Whether to add up to 25% jitter on top of the capped delay.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Create a doubling backoff without jitter.
    #[must_use]
    pub const fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Set the multiplier.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay for a 0-indexed attempt: `initial * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        if self.jitter {
            let fraction = rand::thread_rng().gen_range(0.0..JITTER_FRACTION);
            let extra = Duration::try_from_secs_f64(capped.as_secs_f64() * fraction)
                .unwrap_or(Duration::ZERO);
            capped.saturating_add(extra)
        } else {
            capped
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        // Rounded to whole nanoseconds so doubling from whole milliseconds stays exact.
        let nanos = nanos.round().max(0.0) as u64;
        Duration::from_nanos(nanos).min(self.max_delay)
    }

    /// Start a stateful sequence of delays.
    #[must_use]
    pub const fn sequence(self) -> BackoffSequence {
        BackoffSequence {
            backoff: self,
            attempt: 0,
        }
    }
}

/// A running backoff: each call to [`BackoffSequence::next_delay`] grows the delay.
#[derive(Debug, Clone)]
pub struct BackoffSequence {
    backoff: Backoff,
    attempt: u32,
}

impl BackoffSequence {
    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.backoff.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Start over from the initial delay (after a success).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
