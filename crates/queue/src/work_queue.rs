//! Deduplicating work queue with delayed insertion.
//!
//! An item is held at most once, no matter how often it is added. An item
//! handed out by [`WorkQueue::get`] is *in flight* until [`WorkQueue::done`];
//! adding it meanwhile marks it dirty and it is redelivered after `done`, so a
//! single item is never processed by two callers at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Bounds required of queued items.
pub trait QueueItem: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static {}

impl<T: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static> QueueItem for T {}

struct State<T> {
    /// Pending items in hand-out order.
    queue: VecDeque<T>,
    /// Items that need processing: everything in `queue` plus in-flight items re-added.
    dirty: HashSet<T>,
    /// Items currently handed out.
    processing: HashSet<T>,
    /// Delayed insertions and their ready time.
    waiting: HashMap<T, Instant>,
    shutting_down: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    item_ready: Notify,
    idle: Notify,
    shutdown_tx: watch::Sender<bool>,
}

/// Cloneable handle to a shared work queue.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: QueueItem> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueItem> WorkQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    waiting: HashMap::new(),
                    shutting_down: false,
                }),
                item_ready: Notify::new(),
                idle: Notify::new(),
                shutdown_tx,
            }),
        }
    }

    /// Add an item for processing.
    ///
    /// No-op if it is already pending. If it is in flight it is marked dirty
    /// and redelivered after [`WorkQueue::done`]. Supersedes any delayed
    /// insertion of the same item.
    pub async fn add(&self, item: T) {
        let mut state = self.inner.state.lock().await;
        state.waiting.remove(&item);
        self.insert(&mut state, item);
    }

    /// Add an item once `delay` has elapsed.
    ///
    /// If the item is already pending, or already scheduled to fire no later
    /// than this request, the request collapses into the earlier one.
    pub async fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item).await;
            return;
        }

        let Some(ready_at) = Instant::now().checked_add(delay) else {
            warn!(item = ?item, delay_secs = delay.as_secs(), "Delay is out of range, item not scheduled");
            return;
        };
        {
            let mut state = self.inner.state.lock().await;
            if state.shutting_down {
                return;
            }
            if state.dirty.contains(&item) {
                trace!(item = ?item, "Delayed add collapsed into pending item");
                return;
            }
            if let Some(existing) = state.waiting.get(&item) {
                if *existing <= ready_at {
                    trace!(item = ?item, "Delayed add collapsed into earlier schedule");
                    return;
                }
            }
            state.waiting.insert(item.clone(), ready_at);
        }

        trace!(item = ?item, delay_ms = delay.as_millis(), "Scheduled delayed add");

        let queue = self.clone();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let due = tokio::select! {
                () = tokio::time::sleep_until(ready_at) => true,
                _ = shutdown.wait_for(|stopped| *stopped) => false,
            };
            if due {
                queue.fire(item, ready_at).await;
            }
        });
    }

    /// Wait for the next item and mark it in flight.
    ///
    /// Returns `None` once the queue is shut down and no pending items remain.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock().await;
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release an in-flight item, requeueing it if it was re-added meanwhile.
    pub async fn done(&self, item: &T) {
        let mut state = self.inner.state.lock().await;
        state.processing.remove(item);

        if state.dirty.contains(item) {
            trace!(item = ?item, "Requeueing item re-added while in flight");
            state.queue.push_back(item.clone());
            self.inner.item_ready.notify_one();
        }

        if state.processing.is_empty() {
            self.inner.idle.notify_waiters();
        }
    }

    /// Stop accepting items and wake every waiting `get`.
    ///
    /// Items already pending are still handed out; `get` returns `None` once
    /// they are gone. Delayed insertions are discarded.
    pub async fn shut_down(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.waiting.clear();
            debug!(
                pending = state.queue.len(),
                in_flight = state.processing.len(),
                "Work queue shutting down"
            );
        }
        self.inner.shutdown_tx.send_replace(true);
        self.inner.item_ready.notify_waiters();
    }

    /// Shut down and wait until no item is in flight.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down().await;
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.inner.state.lock().await.processing.is_empty() {
                return;
            }
            idle.await;
        }
    }

    /// Whether [`WorkQueue::shut_down`] has been called.
    pub async fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().await.shutting_down
    }

    /// Number of pending items (excludes in-flight and delayed items).
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Whether no item is pending.
    pub async fn is_empty(&self) -> bool {
        self.inner.state.lock().await.queue.is_empty()
    }

    /// Number of items currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.inner.state.lock().await.processing.len()
    }

    /// Number of delayed insertions not yet fired.
    pub async fn waiting_len(&self) -> usize {
        self.inner.state.lock().await.waiting.len()
    }

    async fn fire(&self, item: T, ready_at: Instant) {
        let mut state = self.inner.state.lock().await;
        if state.waiting.get(&item) != Some(&ready_at) {
            // Superseded by an earlier schedule or a direct add.
            return;
        }
        state.waiting.remove(&item);
        self.insert(&mut state, item);
    }

    fn insert(&self, state: &mut State<T>, item: T) {
        if state.shutting_down {
            trace!(item = ?item, "Ignoring add after shutdown");
            return;
        }
        if !state.dirty.insert(item.clone()) {
            trace!(item = ?item, "Item already queued");
            return;
        }
        if state.processing.contains(&item) {
            trace!(item = ?item, "Item in flight, marked dirty");
            return;
        }
        state.queue.push_back(item);
        self.inner.item_ready.notify_one();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_adds_collapse() {
        let queue = WorkQueue::new();
        queue.add("a").await;
        queue.add("a").await;
        queue.add("b").await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
    }

    #[tokio::test]
    async fn test_readd_while_in_flight_redelivers_once() {
        let queue = WorkQueue::new();
        queue.add("a").await;

        let item = queue.get().await.unwrap();
        queue.add("a").await;
        queue.add("a").await;

        // Not handed out again while in flight.
        assert!(queue.is_empty().await);

        queue.done(&item).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a").await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add(1).await;
        let item = queue.get().await.unwrap();
        queue.done(&item).await;

        assert!(queue.is_empty().await);
        assert_eq!(queue.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_waiters() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.shut_down().await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert_eq!(result.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_then_stops() {
        let queue = WorkQueue::new();
        queue.add("a").await;
        queue.shut_down().await;
        queue.add("b").await;

        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delivers_after_delay() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(5)).await;

        assert!(queue.is_empty().await);
        assert_eq!(queue.waiting_len().await, 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.waiting_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_add_after_wins() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(10)).await;
        queue.add_after("a", Duration::from_secs(2)).await;
        queue.add_after("a", Duration::from_secs(5)).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(queue.len().await, 1);

        let item = queue.get().await.unwrap();
        queue.done(&item).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty().await, "later schedules must not redeliver");
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_add_cancels_delayed_add() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(5)).await;
        queue.add("a").await;

        let item = queue.get().await.unwrap();
        queue.done(&item).await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_while_in_flight_is_scheduled() {
        let queue = WorkQueue::new();
        queue.add("a").await;
        let item = queue.get().await.unwrap();

        queue.add_after("a", Duration::from_secs(1)).await;
        queue.done(&item).await;
        assert!(queue.is_empty().await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.get().await, Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_delayed_adds() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(1)).await;
        queue.shut_down().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_add_after_fires_on_multi_thread_runtime() {
        let queue = WorkQueue::new();
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.add_after("a", Duration::from_millis(10)).await })
        };
        producer.await.unwrap();

        let item = tokio::time::timeout(Duration::from_secs(1), queue.get())
            .await
            .unwrap();
        assert_eq!(item, Some("a"));
    }

    #[tokio::test]
    async fn test_add_after_with_unrepresentable_delay_is_ignored() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::MAX).await;

        assert!(queue.is_empty().await);
        assert_eq!(queue.waiting_len().await, 0);

        queue.add("b").await;
        assert_eq!(queue.get().await, Some("b"));
    }

    #[tokio::test]
    async fn test_shut_down_with_drain_waits_for_in_flight() {
        let queue = WorkQueue::new();
        queue.add("a").await;
        let item = queue.get().await.unwrap();

        let drain = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.shut_down_with_drain().await })
        };

        tokio::task::yield_now().await;
        assert!(!drain.is_finished());

        queue.done(&item).await;
        tokio::time::timeout(Duration::from_secs(1), drain)
            .await
            .unwrap()
            .unwrap();
    }
}
