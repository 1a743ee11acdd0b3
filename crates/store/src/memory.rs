//! In-memory external store for tests and demos.
//!
//! Keeps a bounded history of changes so watches can resume from a recent
//! resource version, and exposes fault injection hooks (dropped watches,
//! failing lists, compaction) to exercise reconnect paths.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::error::{Result, StoreError};
use crate::store::{ExternalStore, WatchStream};
use crate::types::{EventKind, ListResult, ObjectKey, Resource, ResourceVersion, WatchEvent};

const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// Message fanned out to live watchers.
#[derive(Clone)]
enum Notice<K> {
    Event(WatchEvent<K>),
    Disconnect,
}

struct State<K> {
    objects: HashMap<ObjectKey, K>,
    history: VecDeque<WatchEvent<K>>,
    resource_version: ResourceVersion,
    /// Resume points below this version are no longer served.
    oldest_resumable: ResourceVersion,
    failing_lists: u32,
}

/// In-memory list/watch store.
pub struct InMemoryStore<K: Resource> {
    state: RwLock<State<K>>,
    notices: broadcast::Sender<Notice<K>>,
    history_limit: usize,
}

impl<K: Resource> Default for InMemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Resource> InMemoryStore<K> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a store that retains at most `limit` past events for watch resume.
    ///
    /// The same bound applies to each watcher's backlog before it is
    /// considered lagging and expired.
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        let limit = limit.max(1);
        let (notices, _) = broadcast::channel(limit);
        Self {
            state: RwLock::new(State {
                objects: HashMap::new(),
                history: VecDeque::new(),
                resource_version: ResourceVersion::ZERO,
                oldest_resumable: ResourceVersion::ZERO,
                failing_lists: 0,
            }),
            notices,
            history_limit: limit,
        }
    }

    /// Insert a new object. Assigns uid, creation timestamp and resource version.
    ///
    /// # Errors
    ///
    /// Returns `Key` if the object has no valid identity, `AlreadyExists` if the
    /// key is taken.
    pub async fn create(&self, mut object: K) -> Result<K> {
        let key = ObjectKey::for_object(&object)?;
        let mut state = self.state.write().await;

        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                key: key.to_string(),
            });
        }

        let version = state.resource_version.next();
        let meta = object.meta_mut();
        meta.resource_version = version;
        meta.uid.get_or_insert_with(Ulid::new);
        meta.creation_timestamp.get_or_insert_with(Utc::now);

        state.resource_version = version;
        state.objects.insert(key, object.clone());
        self.record(&mut state, WatchEvent::new(EventKind::Added, object.clone()));

        Ok(object)
    }

    /// Replace an existing object, preserving its uid and creation timestamp.
    ///
    /// # Errors
    ///
    /// Returns `Key` if the object has no valid identity, `NotFound` if absent.
    pub async fn update(&self, mut object: K) -> Result<K> {
        let key = ObjectKey::for_object(&object)?;
        let mut state = self.state.write().await;

        let (uid, created) = match state.objects.get(&key) {
            Some(existing) => (existing.meta().uid, existing.meta().creation_timestamp),
            None => return Err(StoreError::not_found(key.to_string())),
        };

        let version = state.resource_version.next();
        let meta = object.meta_mut();
        meta.resource_version = version;
        meta.uid = uid;
        meta.creation_timestamp = created;

        state.resource_version = version;
        state.objects.insert(key, object.clone());
        self.record(&mut state, WatchEvent::new(EventKind::Modified, object.clone()));

        Ok(object)
    }

    /// Remove an object, returning its final state.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent.
    pub async fn delete(&self, key: &ObjectKey) -> Result<K> {
        let mut state = self.state.write().await;

        let Some(mut object) = state.objects.remove(key) else {
            return Err(StoreError::not_found(key.to_string()));
        };

        let version = state.resource_version.next();
        object.meta_mut().resource_version = version;
        state.resource_version = version;
        self.record(&mut state, WatchEvent::new(EventKind::Deleted, object.clone()));

        Ok(object)
    }

    /// Get an object by key.
    pub async fn get(&self, key: &ObjectKey) -> Option<K> {
        self.state.read().await.objects.get(key).cloned()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.state.read().await.objects.len()
    }

    /// Whether the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.objects.is_empty()
    }

    /// Current store-wide resource version.
    pub async fn resource_version(&self) -> ResourceVersion {
        self.state.read().await.resource_version
    }

    /// Drop all retained history. Watches resuming from an older version get `Expired`.
    pub async fn compact(&self) {
        let mut state = self.state.write().await;
        state.history.clear();
        state.oldest_resumable = state.resource_version;
    }

    /// End every open watch stream with `Disconnected`.
    pub async fn disconnect_watchers(&self) {
        // Held so the disconnect is ordered with respect to writes.
        let _state = self.state.write().await;
        let _ = self.notices.send(Notice::Disconnect);
    }

    /// Make the next `count` calls to `list` fail.
    pub async fn fail_next_lists(&self, count: u32) {
        self.state.write().await.failing_lists = count;
    }

    fn record(&self, state: &mut State<K>, event: WatchEvent<K>) {
        state.history.push_back(event.clone());
        while state.history.len() > self.history_limit {
            if let Some(dropped) = state.history.pop_front() {
                state.oldest_resumable = dropped.resource_version();
            }
        }
        // No receivers is fine: nobody is watching.
        let _ = self.notices.send(Notice::Event(event));
    }
}

#[async_trait]
impl<K: Resource> ExternalStore<K> for InMemoryStore<K> {
    async fn list(&self) -> Result<ListResult<K>> {
        let mut state = self.state.write().await;

        if state.failing_lists > 0 {
            state.failing_lists = state.failing_lists.saturating_sub(1);
            return Err(StoreError::list_failed("injected list failure"));
        }

        let mut entries: Vec<(&ObjectKey, &K)> = state.objects.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        Ok(ListResult {
            items: entries.into_iter().map(|(_, obj)| obj.clone()).collect(),
            resource_version: state.resource_version,
        })
    }

    async fn watch(&self, from: ResourceVersion) -> Result<WatchStream<K>> {
        let state = self.state.read().await;

        if from < state.oldest_resumable {
            return Err(StoreError::expired(from));
        }

        let backlog: Vec<WatchEvent<K>> = state
            .history
            .iter()
            .filter(|event| event.resource_version() > from)
            .cloned()
            .collect();
        let last_seen = backlog.last().map_or(from, WatchEvent::resource_version);

        // Subscribe under the lock: writers send while holding it, so nothing
        // falls between the backlog and the live feed.
        let receiver = self.notices.subscribe();
        drop(state);

        let live = futures::stream::unfold(
            Some((receiver, last_seen)),
            |cursor| async move {
                let (mut receiver, mut last_seen) = cursor?;
                loop {
                    match receiver.recv().await {
                        Ok(Notice::Event(event)) => {
                            if event.resource_version() <= last_seen {
                                continue;
                            }
                            last_seen = event.resource_version();
                            return Some((Ok(event), Some((receiver, last_seen))));
                        }
                        Ok(Notice::Disconnect) => {
                            return Some((
                                Err(StoreError::disconnected("watch closed by store")),
                                None,
                            ));
                        }
                        Err(RecvError::Lagged(_)) => {
                            return Some((Err(StoreError::expired(last_seen)), None));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(futures::stream::iter(backlog.into_iter().map(Ok))
            .chain(live)
            .boxed())
    }
}
