//! Level-triggered controller core.
//!
//! An [`Informer`] mirrors an external store into a [`Cache`] and reports each
//! applied change to an [`EventHandler`]. The default handler,
//! [`QueueNotifier`], enqueues the changed key. [`Worker`]s take keys off the
//! queue, look up the latest cached state and call the [`Reconciler`]. Failures
//! go through the [`RetryPolicy`], which requeues with backoff or drops the key.
//!
//! [`Controller`] wires these together and owns their lifecycle.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use levelwatch_controller::{Controller, FnReconciler};
//! use levelwatch_core::ControllerConfig;
//! use levelwatch_store::{DynamicObject, InMemoryStore, ObjectKey};
//!
//! let store = Arc::new(InMemoryStore::<DynamicObject>::new());
//! let reconciler = FnReconciler::new(|key: ObjectKey, _item: Arc<DynamicObject>| async move {
//!     println!("Syncing {key}");
//!     Ok::<(), String>(())
//! });
//!
//! let controller = Controller::new(store, reconciler, ControllerConfig::default())?;
//! controller.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cache;
pub mod controller;
pub mod error;
pub mod informer;
pub mod notifier;
pub mod retry;
pub mod worker;

pub use cache::{namespace_index, Cache, IndexFn, Snapshot, NAMESPACE_INDEX};
pub use controller::{Controller, ControllerStopper, RunningController};
pub use error::{Error, Result};
pub use informer::Informer;
pub use notifier::{EventHandler, QueueNotifier};
pub use retry::{RetryDecision, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use worker::{FnReconciler, ReconcileError, Reconciler, Worker};
