//! Controller lifecycle: wire informer, queue and workers together.

use std::future::Future;
use std::sync::Arc;

use levelwatch_core::ControllerConfig;
use levelwatch_queue::{controller_rate_limiter, RateLimitingQueue};
use levelwatch_store::{ExternalStore, ObjectKey, Resource};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::informer::Informer;
use crate::notifier::{EventHandler, QueueNotifier};
use crate::retry::RetryPolicy;
use crate::worker::{Reconciler, Worker};

/// A configured, not yet running controller.
pub struct Controller<K, S, R> {
    store: S,
    reconciler: Arc<R>,
    config: ControllerConfig,
    cache: Arc<Cache<K>>,
    queue: RateLimitingQueue<ObjectKey>,
    handler: Option<Arc<dyn EventHandler<K>>>,
}

impl<K, S, R> Controller<K, S, R>
where
    K: Resource,
    S: ExternalStore<K> + 'static,
    R: Reconciler<K>,
{
    /// Create a controller watching `store` and reconciling with `reconciler`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn new(store: S, reconciler: R, config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        let queue = RateLimitingQueue::new(controller_rate_limiter(&config.rate_limit));
        Ok(Self {
            store,
            reconciler: Arc::new(reconciler),
            config,
            cache: Arc::new(Cache::new()),
            queue,
            handler: None,
        })
    }

    /// Replace the default queue-feeding event handler.
    #[must_use]
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler<K>>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// The cache the informer will fill. Indexes may be added before starting.
    #[must_use]
    pub fn cache(&self) -> Arc<Cache<K>> {
        Arc::clone(&self.cache)
    }

    /// The shared work queue.
    #[must_use]
    pub fn queue(&self) -> RateLimitingQueue<ObjectKey> {
        self.queue.clone()
    }

    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Start the informer, wait for the initial sync, then start the workers.
    ///
    /// # Errors
    ///
    /// Returns `FatalSync` if the cache does not sync within `sync_timeout`.
    pub async fn start(self) -> Result<RunningController<K>> {
        match self.launch(std::future::pending()).await? {
            Launch::Running(running) => Ok(running),
            Launch::Stopped => Err(Error::fatal_sync("stopped before caches synced")),
        }
    }

    /// Run until `signal` resolves, then stop gracefully.
    ///
    /// The signal is honoured during the initial sync as well: if it resolves
    /// first, the informer is stopped and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// Returns `FatalSync` if the initial sync fails, or `TaskJoin` if a task
    /// could not be joined on shutdown.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(signal);
        match self.launch(&mut signal).await? {
            Launch::Running(running) => {
                signal.await;
                running.stop().await
            }
            Launch::Stopped => Ok(()),
        }
    }

    async fn launch<F>(self, stop_signal: F) -> Result<Launch<K>>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);

        let handler: Arc<dyn EventHandler<K>> = match self.handler {
            Some(handler) => handler,
            None => Arc::new(
                QueueNotifier::new(self.queue.clone())
                    .with_enqueue_deletes(self.config.enqueue_deletes),
            ),
        };
        let informer = Informer::new(self.store, Arc::clone(&self.cache), handler)
            .with_reconnect_backoff(self.config.reconnect.backoff())
            .with_resync_interval(self.config.resync_interval());

        info!(workers = self.config.workers, "Starting controller");
        let informer = tokio::spawn(informer.run(stop_rx.clone()));

        let wait_for_sync = {
            let cache = Arc::clone(&self.cache);
            let sync_timeout = self.config.sync_timeout();
            async move {
                match sync_timeout {
                    Some(timeout) => cache.wait_for_sync(timeout).await,
                    None => {
                        cache.wait_until_synced().await;
                        true
                    }
                }
            }
        };
        let synced = tokio::select! {
            synced = wait_for_sync => Some(synced),
            () = stop_signal => None,
        };

        match synced {
            Some(true) => {}
            Some(false) => {
                error!("Timed out waiting for caches to sync");
                stop_tx.send_replace(true);
                self.queue.shut_down().await;
                informer.await?;
                return Err(Error::fatal_sync("timed out waiting for caches to sync"));
            }
            None => {
                info!("Stop requested before caches synced");
                stop_tx.send_replace(true);
                self.queue.shut_down().await;
                informer.await?;
                return Ok(Launch::Stopped);
            }
        }

        let queue_closer = {
            let queue = self.queue.clone();
            let mut stop_rx = stop_rx;
            tokio::spawn(async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
                queue.shut_down().await;
            })
        };

        let policy = RetryPolicy::new(self.config.max_retries);
        let workers = (0..self.config.workers)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    self.queue.clone(),
                    Arc::clone(&self.cache),
                    Arc::clone(&self.reconciler),
                    policy,
                );
                tokio::spawn(worker.run())
            })
            .collect();

        info!("Controller started");
        Ok(Launch::Running(RunningController {
            stop_tx,
            cache: self.cache,
            queue: self.queue,
            informer,
            queue_closer,
            workers,
        }))
    }
}

/// Outcome of starting a controller against a stop signal.
enum Launch<K> {
    Running(RunningController<K>),
    Stopped,
}

/// A started controller. Dropping it without [`RunningController::stop`]
/// leaves the tasks running.
pub struct RunningController<K> {
    stop_tx: watch::Sender<bool>,
    cache: Arc<Cache<K>>,
    queue: RateLimitingQueue<ObjectKey>,
    informer: JoinHandle<()>,
    queue_closer: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl<K: Resource> RunningController<K> {
    #[must_use]
    pub fn cache(&self) -> Arc<Cache<K>> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn queue(&self) -> RateLimitingQueue<ObjectKey> {
        self.queue.clone()
    }

    /// A handle that can signal shutdown from elsewhere.
    #[must_use]
    pub fn stopper(&self) -> ControllerStopper {
        ControllerStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Signal shutdown and wait for every task to finish.
    ///
    /// Items already queued are still processed; in-flight reconciles are not
    /// interrupted.
    ///
    /// # Errors
    ///
    /// Returns `TaskJoin` if a task panicked or was cancelled.
    pub async fn stop(self) -> Result<()> {
        self.stop_tx.send_replace(true);
        self.join().await
    }

    /// Wait for shutdown signalled through a [`ControllerStopper`].
    ///
    /// # Errors
    ///
    /// Returns `TaskJoin` if a task panicked or was cancelled.
    pub async fn join(self) -> Result<()> {
        self.informer.await?;
        self.queue_closer.await?;
        for worker in self.workers {
            worker.await?;
        }
        info!("Controller stopped");
        Ok(())
    }
}

/// Cloneable handle that stops a running controller.
#[derive(Clone)]
pub struct ControllerStopper {
    stop_tx: watch::Sender<bool>,
}

impl ControllerStopper {
    /// Signal shutdown.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStopped` if shutdown was already signalled.
    pub fn stop(&self) -> Result<()> {
        let mut first = false;
        self.stop_tx.send_if_modified(|stop| {
            first = !*stop;
            *stop = true;
            first
        });
        if first {
            Ok(())
        } else {
            Err(Error::AlreadyStopped)
        }
    }

    /// Whether shutdown has been signalled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}
