//! Work queue for level-triggered controllers.
//!
//! - [`WorkQueue`]: deduplicating FIFO with in-flight tracking and delayed adds
//! - [`RateLimitingQueue`]: adds per-item failure backoff on requeue
//! - [`RateLimiter`]: pluggable delay policies, combined by [`default_controller_rate_limiter`]

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod rate_limiter;
pub mod rate_limiting;
pub mod work_queue;

pub use rate_limiter::{
    controller_rate_limiter, default_controller_rate_limiter, BucketRateLimiter,
    ItemExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter,
};
pub use rate_limiting::RateLimitingQueue;
pub use work_queue::{QueueItem, WorkQueue};
