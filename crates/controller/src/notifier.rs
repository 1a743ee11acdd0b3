//! Turns cache changes into work queue keys.

use async_trait::async_trait;
use levelwatch_queue::RateLimitingQueue;
use levelwatch_store::{EventKind, ObjectKey, Resource};
use tracing::{debug, warn};

/// Receives every change the informer applies to the cache.
#[async_trait]
pub trait EventHandler<K: Resource>: Send + Sync {
    /// Called once per applied change, in application order.
    async fn on_event(&self, kind: EventKind, item: &K);
}

/// Enqueues the key of every changed item.
///
/// Added and modified items are always enqueued, including updates that
/// changed nothing. Deleted items are enqueued only when configured to.
#[derive(Clone)]
pub struct QueueNotifier {
    queue: RateLimitingQueue<ObjectKey>,
    enqueue_deletes: bool,
}

impl QueueNotifier {
    /// Create a notifier feeding `queue`.
    #[must_use]
    pub fn new(queue: RateLimitingQueue<ObjectKey>) -> Self {
        Self {
            queue,
            enqueue_deletes: false,
        }
    }

    /// Also enqueue keys of deleted items.
    #[must_use]
    pub fn with_enqueue_deletes(mut self, enqueue_deletes: bool) -> Self {
        self.enqueue_deletes = enqueue_deletes;
        self
    }
}

#[async_trait]
impl<K: Resource> EventHandler<K> for QueueNotifier {
    async fn on_event(&self, kind: EventKind, item: &K) {
        if kind == EventKind::Deleted && !self.enqueue_deletes {
            return;
        }

        match ObjectKey::for_object(item) {
            Ok(key) => {
                debug!(key = %key, kind = %kind, "Enqueueing");
                self.queue.add(key).await;
            }
            Err(err) => {
                warn!(error = %err, kind = %kind, "Dropping event for item without a valid key");
            }
        }
    }
}
