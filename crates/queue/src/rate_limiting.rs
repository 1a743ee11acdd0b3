//! Work queue with rate-limited requeueing.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::rate_limiter::{default_controller_rate_limiter, RateLimiter};
use crate::work_queue::{QueueItem, WorkQueue};

/// A [`WorkQueue`] that delays requeued items according to a [`RateLimiter`].
pub struct RateLimitingQueue<T> {
    queue: WorkQueue<T>,
    limiter: Arc<dyn RateLimiter<T>>,
}

impl<T> Clone for RateLimitingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            limiter: Arc::clone(&self.limiter),
        }
    }
}

impl<T: QueueItem> Default for RateLimitingQueue<T> {
    fn default() -> Self {
        Self::new(default_controller_rate_limiter())
    }
}

impl<T: QueueItem> RateLimitingQueue<T> {
    /// Create an empty queue using `limiter` for requeue delays.
    #[must_use]
    pub fn new(limiter: Arc<dyn RateLimiter<T>>) -> Self {
        Self {
            queue: WorkQueue::new(),
            limiter,
        }
    }

    /// Requeue `item` after the delay the limiter assigns, recording a failure.
    ///
    /// Returns the delay applied.
    pub async fn add_rate_limited(&self, item: T) -> Duration {
        let delay = self.limiter.when(&item).await;
        trace!(item = ?item, delay_ms = delay.as_millis(), "Rate-limited requeue");
        self.queue.add_after(item, delay).await;
        delay
    }

    /// Clear the failure history of `item`. Does not remove it from the queue.
    pub async fn forget(&self, item: &T) {
        self.limiter.forget(item).await;
    }

    /// Failures recorded for `item` since it was last forgotten.
    pub async fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item).await
    }

    /// See [`WorkQueue::add`].
    pub async fn add(&self, item: T) {
        self.queue.add(item).await;
    }

    /// See [`WorkQueue::add_after`].
    pub async fn add_after(&self, item: T, delay: Duration) {
        self.queue.add_after(item, delay).await;
    }

    /// See [`WorkQueue::get`].
    pub async fn get(&self) -> Option<T> {
        self.queue.get().await
    }

    /// See [`WorkQueue::done`].
    pub async fn done(&self, item: &T) {
        self.queue.done(item).await;
    }

    /// See [`WorkQueue::shut_down`].
    pub async fn shut_down(&self) {
        self.queue.shut_down().await;
    }

    /// See [`WorkQueue::shut_down_with_drain`].
    pub async fn shut_down_with_drain(&self) {
        self.queue.shut_down_with_drain().await;
    }

    /// See [`WorkQueue::is_shutting_down`].
    pub async fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down().await
    }

    /// See [`WorkQueue::len`].
    pub async fn len(&self) -> usize {
        self.queue.len().await
    }

    /// See [`WorkQueue::is_empty`].
    pub async fn is_empty(&self) -> bool {
        self.queue.is_empty().await
    }

    /// The underlying work queue.
    #[must_use]
    pub const fn work_queue(&self) -> &WorkQueue<T> {
        &self.queue
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rate_limiter::ItemExponentialFailureRateLimiter;

    fn queue() -> RateLimitingQueue<&'static str> {
        RateLimitingQueue::new(Arc::new(ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_delays_and_counts() {
        let queue = queue();

        assert_eq!(queue.add_rate_limited("a").await, Duration::from_millis(5));
        assert_eq!(queue.num_requeues(&"a").await, 1);
        assert!(queue.is_empty().await);

        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(queue.get().await, Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_during_processing_retries_after_done() {
        let queue = queue();
        queue.add("a").await;

        let item = queue.get().await.unwrap();
        let delay = queue.add_rate_limited(item).await;
        queue.done(&item).await;

        tokio::time::sleep(delay + Duration::from_millis(1)).await;
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.num_requeues(&"a").await, 1);
    }

    #[tokio::test]
    async fn test_forget_keeps_pending_item() {
        let queue = queue();
        queue.add("a").await;
        queue.add_rate_limited("a").await;
        queue.forget(&"a").await;

        assert_eq!(queue.num_requeues(&"a").await, 0);
        assert_eq!(queue.len().await, 1);
    }
}
