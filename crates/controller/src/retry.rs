//! Bounded retry of failed keys.

use std::fmt;
use std::time::Duration;

use levelwatch_queue::RateLimitingQueue;
use levelwatch_store::ObjectKey;
use tracing::{debug, info, warn};

/// Default number of consecutive failed attempts before a key is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// What the policy did with a key after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Succeeded; failure history cleared.
    Clean,
    /// Failed and requeued with backoff. `attempt` counts consecutive failures.
    Requeued { attempt: u32, delay: Duration },
    /// Failed too many times; failure history cleared and the key left alone
    /// until the next external change.
    Dropped { attempts: u32 },
}

/// Decides between requeueing and dropping a failed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// A key is dropped on its `max_retries`-th consecutive failure.
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Record the outcome of one attempt for `key`.
    pub async fn handle<E: fmt::Display>(
        &self,
        queue: &RateLimitingQueue<ObjectKey>,
        key: &ObjectKey,
        outcome: Result<(), E>,
    ) -> RetryDecision {
        let err = match outcome {
            Ok(()) => {
                queue.forget(key).await;
                debug!(key = %key, "Reconciled");
                return RetryDecision::Clean;
            }
            Err(err) => err,
        };

        let attempt = queue.num_requeues(key).await.saturating_add(1);
        if attempt < self.max_retries {
            let delay = queue.add_rate_limited(key.clone()).await;
            info!(
                key = %key,
                attempt,
                delay_ms = delay.as_millis(),
                error = %err,
                "Error syncing, requeueing"
            );
            return RetryDecision::Requeued { attempt, delay };
        }

        queue.forget(key).await;
        warn!(
            key = %key,
            attempts = attempt,
            error = %err,
            "Dropping key out of the queue"
        );
        RetryDecision::Dropped { attempts: attempt }
    }
}
