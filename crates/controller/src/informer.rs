//! Keeps a [`Cache`] in step with an [`ExternalStore`] by list-then-watch.
//!
//! The informer lists once to fill the cache, then follows the watch stream
//! from the listed resource version. A dropped watch resumes from the last
//! version seen. A resume point the store no longer retains forces a relist,
//! which also recovers deletes that happened during the gap.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use levelwatch_core::Backoff;
use levelwatch_store::{ExternalStore, Resource, ResourceVersion};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{Applied, Cache};
use crate::notifier::EventHandler;

/// How a watch session ended.
enum WatchExit {
    Stopped,
    Relist,
}

/// Resolves once the stop flag is raised or its sender is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

/// Sleep for `delay` unless stopped first. Returns `false` if stopped.
async fn sleep_or_stop(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = stopped(stop) => false,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// List-then-watch loop feeding a cache and an event handler.
pub struct Informer<K, S> {
    store: S,
    cache: Arc<Cache<K>>,
    handler: Arc<dyn EventHandler<K>>,
    reconnect: Backoff,
    resync_interval: Option<Duration>,
    _resource: PhantomData<fn(K)>,
}

impl<K: Resource, S: ExternalStore<K>> Informer<K, S> {
    pub fn new(store: S, cache: Arc<Cache<K>>, handler: Arc<dyn EventHandler<K>>) -> Self {
        Self {
            store,
            cache,
            handler,
            reconnect: Backoff::default(),
            resync_interval: None,
            _resource: PhantomData,
        }
    }

    /// Backoff between failed lists and watch reconnects.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, backoff: Backoff) -> Self {
        self.reconnect = backoff;
        self
    }

    /// Relist every `interval`, re-notifying every item. `None` disables resync.
    #[must_use]
    pub fn with_resync_interval(mut self, interval: Option<Duration>) -> Self {
        self.resync_interval = interval;
        self
    }

    /// The cache this informer fills.
    #[must_use]
    pub fn cache(&self) -> Arc<Cache<K>> {
        Arc::clone(&self.cache)
    }

    /// Run until the stop flag is raised.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(
            resync_secs = self.resync_interval.map(|d| d.as_secs()),
            "Starting informer"
        );

        loop {
            let Some(version) = self.list(&mut stop).await else {
                break;
            };
            match self.watch(version, &mut stop).await {
                WatchExit::Stopped => break,
                WatchExit::Relist => {}
            }
        }

        info!("Informer stopped");
    }

    /// List until it succeeds, replacing the cache content. `None` if stopped.
    async fn list(&self, stop: &mut watch::Receiver<bool>) -> Option<ResourceVersion> {
        let mut backoff = self.reconnect.sequence();
        loop {
            let result = tokio::select! {
                result = self.store.list() => result,
                () = stopped(stop) => return None,
            };

            match result {
                Ok(list) => {
                    let version = list.resource_version;
                    let count = list.items.len();
                    let changes = self.cache.replace(list.items, version).await;
                    self.dispatch(changes).await;
                    self.cache.mark_synced();
                    info!(items = count, resource_version = %version, "List complete");
                    return Some(version);
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %err,
                        attempt = backoff.attempts(),
                        retry_in_ms = delay.as_millis(),
                        "List failed, retrying"
                    );
                    if !sleep_or_stop(delay, stop).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Follow watch streams from `version` until a relist is needed or stopped.
    async fn watch(&self, mut version: ResourceVersion, stop: &mut watch::Receiver<bool>) -> WatchExit {
        let mut backoff = self.reconnect.sequence();
        let resync_at = self
            .resync_interval
            .and_then(|interval| Instant::now().checked_add(interval));

        loop {
            if resync_at.is_some_and(|at| Instant::now() >= at) {
                info!("Periodic resync");
                return WatchExit::Relist;
            }

            let opened = tokio::select! {
                opened = self.store.watch(version) => opened,
                () = stopped(stop) => return WatchExit::Stopped,
            };

            let mut stream = match opened {
                Ok(stream) => stream,
                Err(err) if err.requires_relist() => {
                    warn!(error = %err, resource_version = %version, "Watch expired, relisting");
                    return WatchExit::Relist;
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(error = %err, retry_in_ms = delay.as_millis(), "Watch failed to open");
                    if !sleep_or_stop(delay, stop).await {
                        return WatchExit::Stopped;
                    }
                    continue;
                }
            };

            debug!(resource_version = %version, "Watch opened");

            loop {
                tokio::select! {
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            backoff.reset();
                            version = version.max(event.resource_version());
                            let change = self.cache.apply(event).await;
                            self.dispatch(vec![change]).await;
                        }
                        Some(Err(err)) if err.requires_relist() => {
                            warn!(error = %err, "Watch expired, relisting");
                            return WatchExit::Relist;
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, resource_version = %version, "Watch disconnected, resuming");
                            break;
                        }
                        None => {
                            debug!(resource_version = %version, "Watch stream ended, resuming");
                            break;
                        }
                    },
                    () = sleep_until_opt(resync_at) => {
                        info!("Periodic resync");
                        return WatchExit::Relist;
                    }
                    () = stopped(stop) => return WatchExit::Stopped,
                }
            }

            let delay = backoff.next_delay();
            if !sleep_or_stop(delay, stop).await {
                return WatchExit::Stopped;
            }
        }
    }

    async fn dispatch(&self, changes: Vec<Applied<K>>) {
        for (kind, item) in changes {
            self.handler.on_event(kind, item.as_ref()).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use async_trait::async_trait;
    use levelwatch_store::{DynamicObject, EventKind, InMemoryStore, ObjectKey};
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(EventKind, ObjectKey)>>,
    }

    #[async_trait]
    impl EventHandler<DynamicObject> for Recorder {
        async fn on_event(&self, kind: EventKind, item: &DynamicObject) {
            let key = ObjectKey::for_object(item).unwrap();
            self.events.lock().await.push((kind, key));
        }
    }

    fn fast_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(5), Duration::from_millis(20))
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(check().await, "condition not reached");
    }

    #[tokio::test]
    async fn test_list_then_watch_fills_cache() {
        let store = Arc::new(InMemoryStore::new());
        store.create(DynamicObject::new("ns", "a")).await.unwrap();

        let cache: Arc<Cache<DynamicObject>> = Arc::new(Cache::new());
        let recorder = Arc::new(Recorder::default());
        let informer = Informer::new(Arc::clone(&store), Arc::clone(&cache), recorder.clone())
            .with_reconnect_backoff(fast_backoff());

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(informer.run(stop_rx));

        assert!(cache.wait_for_sync(Duration::from_secs(1)).await);
        store.create(DynamicObject::new("ns", "b")).await.unwrap();

        eventually(|| async { cache.len().await == 2 }).await;
        assert_eq!(
            recorder.events.lock().await.clone(),
            vec![
                (EventKind::Added, ObjectKey::from("ns/a")),
                (EventKind::Added, ObjectKey::from("ns/b")),
            ]
        );

        stop_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_lists_are_retried() {
        let store = Arc::new(InMemoryStore::new());
        store.create(DynamicObject::new("ns", "a")).await.unwrap();
        store.fail_next_lists(3).await;

        let cache: Arc<Cache<DynamicObject>> = Arc::new(Cache::new());
        let informer = Informer::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::new(Recorder::default()),
        )
        .with_reconnect_backoff(fast_backoff());

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(informer.run(stop_rx));

        assert!(cache.wait_for_sync(Duration::from_secs(2)).await);
        assert_eq!(cache.len().await, 1);

        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_while_listing_fails() {
        let store: Arc<InMemoryStore<DynamicObject>> = Arc::new(InMemoryStore::new());
        store.fail_next_lists(u32::MAX).await;

        let cache: Arc<Cache<DynamicObject>> = Arc::new(Cache::new());
        let informer = Informer::new(store, Arc::clone(&cache), Arc::new(Recorder::default()))
            .with_reconnect_backoff(fast_backoff());

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(informer.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        stop_tx.send_replace(true);

        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(!cache.has_synced());
    }

    #[tokio::test]
    async fn test_resync_renotifies_every_item() {
        let store = Arc::new(InMemoryStore::new());
        store.create(DynamicObject::new("ns", "a")).await.unwrap();

        let cache: Arc<Cache<DynamicObject>> = Arc::new(Cache::new());
        let recorder = Arc::new(Recorder::default());
        let informer = Informer::new(Arc::clone(&store), Arc::clone(&cache), recorder.clone())
            .with_reconnect_backoff(fast_backoff())
            .with_resync_interval(Some(Duration::from_millis(50)));

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(informer.run(stop_rx));

        eventually(|| async {
            recorder
                .events
                .lock()
                .await
                .contains(&(EventKind::Modified, ObjectKey::from("ns/a")))
        })
        .await;

        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_resync_deadline_keeps_watching() {
        let store = Arc::new(InMemoryStore::new());
        let cache: Arc<Cache<DynamicObject>> = Arc::new(Cache::new());
        let informer = Informer::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::new(Recorder::default()),
        )
        .with_reconnect_backoff(fast_backoff())
        .with_resync_interval(Some(Duration::from_secs(u64::MAX)));

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(informer.run(stop_rx));

        assert!(cache.wait_for_sync(Duration::from_secs(1)).await);
        store.create(DynamicObject::new("ns", "a")).await.unwrap();
        eventually(|| async { cache.len().await == 1 }).await;

        stop_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
