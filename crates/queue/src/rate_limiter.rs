//! Rate limiters deciding how long a failed item waits before retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use levelwatch_core::{Backoff, RateLimitConfig};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::work_queue::QueueItem;

/// Decides the delay before an item may be retried.
#[async_trait]
pub trait RateLimiter<T>: Send + Sync {
    /// Record a failure of `item` and return how long it should wait.
    async fn when(&self, item: &T) -> Duration;

    /// Clear all failure history for `item`.
    async fn forget(&self, item: &T);

    /// Failures recorded for `item` since it was last forgotten.
    async fn num_requeues(&self, item: &T) -> u32;
}

/// Per-item exponential backoff: `base * 2^failures`, capped.
pub struct ItemExponentialFailureRateLimiter<T> {
    backoff: Backoff,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T: QueueItem> ItemExponentialFailureRateLimiter<T> {
    /// Create a limiter doubling from `base_delay` up to `max_delay`.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self::with_backoff(Backoff::new(base_delay, max_delay))
    }

    /// Create a limiter from explicit backoff parameters.
    #[must_use]
    pub fn with_backoff(backoff: Backoff) -> Self {
        Self {
            backoff,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<T: QueueItem> RateLimiter<T> for ItemExponentialFailureRateLimiter<T> {
    async fn when(&self, item: &T) -> Duration {
        let mut failures = self.failures.lock().await;
        let count = failures.entry(item.clone()).or_insert(0);
        let delay = self.backoff.delay_for(*count);
        *count = count.saturating_add(1);
        delay
    }

    async fn forget(&self, item: &T) {
        self.failures.lock().await.remove(item);
    }

    async fn num_requeues(&self, item: &T) -> u32 {
        self.failures.lock().await.get(item).copied().unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket shared by all items.
///
/// Each call to `when` takes a token. When the bucket is empty the token is
/// borrowed against the refill and the caller waits until it would exist.
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    /// Create a full bucket refilling at `qps` up to `burst` tokens.
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }
}

#[async_trait]
impl<T: QueueItem> RateLimiter<T> for BucketRateLimiter {
    async fn when(&self, _item: &T) -> Duration {
        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = elapsed.mul_add(self.qps, bucket.tokens).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 || self.qps <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps).unwrap_or(Duration::MAX)
        }
    }

    async fn forget(&self, _item: &T) {}

    async fn num_requeues(&self, _item: &T) -> u32 {
        0
    }
}

/// Combines limiters, waiting for the longest of their delays.
pub struct MaxOfRateLimiter<T> {
    limiters: Vec<Arc<dyn RateLimiter<T>>>,
}

impl<T: QueueItem> MaxOfRateLimiter<T> {
    /// Combine the given limiters.
    #[must_use]
    pub fn new(limiters: Vec<Arc<dyn RateLimiter<T>>>) -> Self {
        Self { limiters }
    }
}

#[async_trait]
impl<T: QueueItem> RateLimiter<T> for MaxOfRateLimiter<T> {
    async fn when(&self, item: &T) -> Duration {
        let mut longest = Duration::ZERO;
        for limiter in &self.limiters {
            longest = longest.max(limiter.when(item).await);
        }
        longest
    }

    async fn forget(&self, item: &T) {
        for limiter in &self.limiters {
            limiter.forget(item).await;
        }
    }

    async fn num_requeues(&self, item: &T) -> u32 {
        let mut most = 0;
        for limiter in &self.limiters {
            most = most.max(limiter.num_requeues(item).await);
        }
        most
    }
}

/// The standard controller limiter: per-item backoff (5ms to 1000s) combined
/// with an overall bucket of 10 qps and burst 100.
#[must_use]
pub fn default_controller_rate_limiter<T: QueueItem>() -> Arc<dyn RateLimiter<T>> {
    controller_rate_limiter(&RateLimitConfig::default())
}

/// Build the controller limiter from configuration.
#[must_use]
pub fn controller_rate_limiter<T: QueueItem>(config: &RateLimitConfig) -> Arc<dyn RateLimiter<T>> {
    Arc::new(MaxOfRateLimiter::new(vec![
        Arc::new(ItemExponentialFailureRateLimiter::new(
            config.base_delay(),
            config.max_delay(),
        )),
        Arc::new(BucketRateLimiter::new(config.qps, config.burst)),
    ]))
}
