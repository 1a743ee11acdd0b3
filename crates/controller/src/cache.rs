//! Local mirror of the external store.
//!
//! The cache holds the last applied state of every item, keyed by
//! [`ObjectKey`]. Items live in a persistent [`im::HashMap`], so taking a
//! [`Snapshot`] for listing is cheap and never blocks writers for long.
//!
//! Writes come only from the informer. Everything else reads.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use levelwatch_store::{EventKind, ObjectKey, Resource, ResourceVersion, WatchEvent};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

/// Name of the index installed by [`namespace_index`].
pub const NAMESPACE_INDEX: &str = "namespace";

/// Computes the index values an item is filed under.
pub type IndexFn<K> = Arc<dyn Fn(&K) -> Vec<String> + Send + Sync>;

/// Index function filing items under their namespace.
///
/// Cluster-scoped items are not indexed.
#[must_use]
pub fn namespace_index<K: Resource>() -> IndexFn<K> {
    Arc::new(|item: &K| item.meta().namespace.iter().cloned().collect())
}

/// A change applied to the cache, ready to be handed to an event handler.
pub type Applied<K> = (EventKind, Arc<K>);

/// Point-in-time view of every cached item.
///
/// Iteration is restartable: [`Snapshot::iter`] may be called any number of times.
#[derive(Clone)]
pub struct Snapshot<K> {
    items: im::HashMap<ObjectKey, Arc<K>>,
}

impl<K> Snapshot<K> {
    /// Iterate over all items in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<K>> {
        self.items.values()
    }

    /// Iterate over keys and items in unspecified order.
    pub fn entries(&self) -> impl Iterator<Item = (&ObjectKey, &Arc<K>)> {
        self.items.iter()
    }

    /// Look up one item.
    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<&Arc<K>> {
        self.items.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

struct Index<K> {
    func: IndexFn<K>,
    entries: HashMap<String, BTreeSet<ObjectKey>>,
}

impl<K> Index<K> {
    fn insert(&mut self, key: &ObjectKey, item: &K) {
        for value in (self.func)(item) {
            self.entries.entry(value).or_default().insert(key.clone());
        }
    }

    fn remove(&mut self, key: &ObjectKey, item: &K) {
        for value in (self.func)(item) {
            if let Some(keys) = self.entries.get_mut(&value) {
                keys.remove(key);
                if keys.is_empty() {
                    self.entries.remove(&value);
                }
            }
        }
    }
}

struct CacheState<K> {
    items: im::HashMap<ObjectKey, Arc<K>>,
    indexes: HashMap<String, Index<K>>,
    resource_version: ResourceVersion,
}

impl<K: Resource> CacheState<K> {
    fn upsert(&mut self, key: ObjectKey, item: Arc<K>) {
        if let Some(old) = self.items.get(&key) {
            for index in self.indexes.values_mut() {
                index.remove(&key, old);
            }
        }
        for index in self.indexes.values_mut() {
            index.insert(&key, &item);
        }
        self.items.insert(key, item);
    }

    fn remove(&mut self, key: &ObjectKey) -> Option<Arc<K>> {
        let old = self.items.remove(key)?;
        for index in self.indexes.values_mut() {
            index.remove(key, &old);
        }
        Some(old)
    }
}

/// Thread-safe local mirror with a one-way `synced` flag.
pub struct Cache<K> {
    state: RwLock<CacheState<K>>,
    synced: watch::Sender<bool>,
}

impl<K: Resource> Default for Cache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Resource> Cache<K> {
    /// Create an empty, unsynced cache.
    #[must_use]
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            state: RwLock::new(CacheState {
                items: im::HashMap::new(),
                indexes: HashMap::new(),
                resource_version: ResourceVersion::ZERO,
            }),
            synced,
        }
    }

    /// Snapshot of every cached item.
    pub async fn list(&self) -> Snapshot<K> {
        Snapshot {
            items: self.state.read().await.items.clone(),
        }
    }

    /// Look up one item.
    pub async fn get_by_key(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.state.read().await.items.get(key).cloned()
    }

    /// All cached keys in sorted order.
    pub async fn keys(&self) -> Vec<ObjectKey> {
        self.state.read().await.items.keys().cloned().sorted().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.items.is_empty()
    }

    /// Resource version of the last applied list or event.
    pub async fn resource_version(&self) -> ResourceVersion {
        self.state.read().await.resource_version
    }

    /// Whether the initial list has been applied. Never reverts to false.
    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait up to `timeout` for the initial sync. Returns the final sync state.
    pub async fn wait_for_sync(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_until_synced())
            .await
            .is_ok()
    }

    /// Wait until the initial sync completes.
    pub async fn wait_until_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives as long as `self`, so this only returns once synced.
        let _ = rx.wait_for(|synced| *synced).await;
    }

    /// Register a secondary index, filing every current item under it.
    ///
    /// Replaces any index of the same name.
    pub async fn add_index(&self, name: impl Into<String>, func: IndexFn<K>) {
        let mut state = self.state.write().await;
        let mut index = Index {
            func,
            entries: HashMap::new(),
        };
        for (key, item) in &state.items {
            index.insert(key, item);
        }
        state.indexes.insert(name.into(), index);
    }

    /// Items filed under `value` in the named index, in key order.
    ///
    /// Returns `None` if no index of that name exists.
    pub async fn by_index(&self, name: &str, value: &str) -> Option<Vec<Arc<K>>> {
        let state = self.state.read().await;
        let index = state.indexes.get(name)?;
        Some(
            index
                .entries
                .get(value)
                .into_iter()
                .flatten()
                .filter_map(|key| state.items.get(key).cloned())
                .collect(),
        )
    }

    /// Apply one watch event. Returns the change to report to handlers.
    ///
    /// Items whose key cannot be derived are reported but not cached.
    pub(crate) async fn apply(&self, event: WatchEvent<K>) -> Applied<K> {
        let version = event.resource_version();
        let kind = event.kind;
        let item = Arc::new(event.object);

        let mut state = self.state.write().await;
        state.resource_version = state.resource_version.max(version);

        match ObjectKey::for_object(item.as_ref()) {
            Ok(key) => match kind {
                EventKind::Added | EventKind::Modified => state.upsert(key, Arc::clone(&item)),
                EventKind::Deleted => {
                    state.remove(&key);
                }
            },
            Err(err) => debug!(error = %err, "Event item has no key, not cached"),
        }

        (kind, item)
    }

    /// Replace the whole content with a fresh list.
    ///
    /// Keys absent from `items` are reported as deleted, known keys as
    /// modified and new keys as added.
    pub(crate) async fn replace(&self, items: Vec<K>, version: ResourceVersion) -> Vec<Applied<K>> {
        let mut state = self.state.write().await;
        let mut previous = state.items.clone();
        let mut changes = Vec::with_capacity(items.len());

        for item in items {
            let item = Arc::new(item);
            match ObjectKey::for_object(item.as_ref()) {
                Ok(key) => {
                    let kind = if previous.remove(&key).is_some() {
                        EventKind::Modified
                    } else {
                        EventKind::Added
                    };
                    state.upsert(key, Arc::clone(&item));
                    changes.push((kind, item));
                }
                Err(err) => {
                    debug!(error = %err, "Listed item has no key, not cached");
                    changes.push((EventKind::Added, item));
                }
            }
        }

        for (key, _) in previous {
            if let Some(old) = state.remove(&key) {
                changes.push((EventKind::Deleted, old));
            }
        }

        state.resource_version = version;
        changes
    }

    /// Flip the synced flag. Later calls are no-ops.
    pub(crate) fn mark_synced(&self) {
        let flipped = self.synced.send_if_modified(|synced| {
            let was = *synced;
            *synced = true;
            !was
        });
        if flipped {
            info!("Cache synced");
        }
    }
}
