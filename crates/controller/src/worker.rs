//! Worker loop: pull a key, reconcile it against the cache, apply the retry policy.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use levelwatch_queue::RateLimitingQueue;
use levelwatch_store::{ObjectKey, Resource};
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

use crate::cache::Cache;
use crate::retry::{RetryDecision, RetryPolicy};

/// Business logic invoked for each key that needs syncing.
///
/// Must be idempotent: a key may be delivered again after a failure or a
/// later change, and only the current cached state matters.
#[async_trait]
pub trait Reconciler<K: Resource>: Send + Sync + 'static {
    type Error: fmt::Display + fmt::Debug + Send + Sync + 'static;

    /// Drive the world towards `item`, the latest cached state for `key`.
    async fn reconcile(&self, key: &ObjectKey, item: Arc<K>) -> Result<(), Self::Error>;
}

/// Adapts an async closure into a [`Reconciler`].
pub struct FnReconciler<F, K> {
    func: F,
    _resource: PhantomData<fn(K)>,
}

impl<F, K> FnReconciler<F, K> {
    pub fn new<Fut>(func: F) -> Self
    where
        F: Fn(ObjectKey, Arc<K>) -> Fut,
    {
        Self {
            func,
            _resource: PhantomData,
        }
    }
}

#[async_trait]
impl<K, F, Fut, E> Reconciler<K> for FnReconciler<F, K>
where
    K: Resource,
    F: Fn(ObjectKey, Arc<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
    E: fmt::Display + fmt::Debug + Send + Sync + 'static,
{
    type Error = E;

    async fn reconcile(&self, key: &ObjectKey, item: Arc<K>) -> Result<(), E> {
        (self.func)(key.clone(), item).await
    }
}

/// Why a reconcile attempt failed.
#[derive(Debug, Error)]
pub enum ReconcileError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("reconcile panicked: {message}")]
    Panicked { message: String },
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// One worker task's loop over the shared queue.
pub struct Worker<K, R> {
    id: usize,
    queue: RateLimitingQueue<ObjectKey>,
    cache: Arc<Cache<K>>,
    reconciler: Arc<R>,
    policy: RetryPolicy,
}

impl<K: Resource, R: Reconciler<K>> Worker<K, R> {
    pub fn new(
        id: usize,
        queue: RateLimitingQueue<ObjectKey>,
        cache: Arc<Cache<K>>,
        reconciler: Arc<R>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            id,
            queue,
            cache,
            reconciler,
            policy,
        }
    }

    /// Process keys until the queue shuts down and drains.
    pub async fn run(self) {
        let span = info_span!("worker", id = self.id);
        async {
            info!("Worker started");
            while self.process_next_item().await {}
            info!("Worker stopped");
        }
        .instrument(span)
        .await;
    }

    /// Handle one key. Returns `false` once the queue is shut down and empty.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let outcome = self.reconcile_key(&key).await;
        let decision = self.policy.handle(&self.queue, &key, outcome).await;
        if let RetryDecision::Requeued { attempt, .. } = decision {
            debug!(key = %key, attempt, "Key requeued");
        }

        self.queue.done(&key).await;
        true
    }

    /// Reconcile the cached state of `key`. A key no longer cached is a success.
    pub async fn reconcile_key(&self, key: &ObjectKey) -> Result<(), ReconcileError<R::Error>> {
        let Some(item) = self.cache.get_by_key(key).await else {
            debug!(key = %key, "Object no longer exists");
            return Ok(());
        };

        debug!(key = %key, "Reconciling");
        match AssertUnwindSafe(self.reconciler.reconcile(key, item))
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(ReconcileError::Failed),
            Err(payload) => Err(ReconcileError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}
