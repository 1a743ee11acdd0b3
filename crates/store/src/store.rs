//! External store trait and tracing wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::{Result, StoreError};
use crate::types::{ListResult, Resource, ResourceVersion, WatchEvent};

/// Stream of changes returned by [`ExternalStore::watch`].
///
/// The stream ends with `Some(Err(_))` or `None` when the connection drops.
pub type WatchStream<K> = BoxStream<'static, std::result::Result<WatchEvent<K>, StoreError>>;

/// The remote source of truth: list-then-watch semantics.
#[async_trait]
pub trait ExternalStore<K: Resource>: Send + Sync {
    /// Fetch the full current collection and the version it reflects.
    async fn list(&self) -> Result<ListResult<K>>;

    /// Stream every change after `from`.
    ///
    /// Fails with [`StoreError::Expired`] when `from` is older than the
    /// retained history.
    async fn watch(&self, from: ResourceVersion) -> Result<WatchStream<K>>;
}

#[async_trait]
impl<K: Resource, S: ExternalStore<K> + ?Sized> ExternalStore<K> for Arc<S> {
    async fn list(&self) -> Result<ListResult<K>> {
        (**self).list().await
    }

    async fn watch(&self, from: ResourceVersion) -> Result<WatchStream<K>> {
        (**self).watch(from).await
    }
}

/// A wrapper that adds tracing to an external store.
pub struct TracingStore<S> {
    inner: S,
}

impl<S> TracingStore<S> {
    /// Create a new tracing store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Get the wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<K: Resource, S: ExternalStore<K>> ExternalStore<K> for TracingStore<S> {
    async fn list(&self) -> Result<ListResult<K>> {
        tracing::debug!("Listing objects");
        let result = self.inner.list().await;
        match &result {
            Ok(list) => tracing::debug!(
                items = list.items.len(),
                resource_version = %list.resource_version,
                "List complete"
            ),
            Err(e) => tracing::debug!(error = %e, "List failed"),
        }
        result
    }

    async fn watch(&self, from: ResourceVersion) -> Result<WatchStream<K>> {
        tracing::debug!(from = %from, "Opening watch");
        let stream = self.inner.watch(from).await?;
        Ok(stream
            .inspect(|item| match item {
                Ok(event) => tracing::trace!(
                    kind = %event.kind,
                    resource_version = %event.resource_version(),
                    "Watch event"
                ),
                Err(e) => tracing::debug!(error = %e, "Watch stream error"),
            })
            .boxed())
    }
}
