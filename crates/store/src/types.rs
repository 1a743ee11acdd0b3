//! Core types for watched items.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::KeyError;

/// Monotonic change token assigned by the external store.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    /// Watch from the beginning of retained history.
    pub const ZERO: Self = Self(0);

    /// Create from a raw token.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Get the raw token.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The version following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a watched item: `namespace/name`, or `name` when cluster-scoped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Build a key from identity parts without validation.
    #[must_use]
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => Self(format!("{ns}/{name}")),
            None => Self(name.to_string()),
        }
    }

    /// Derive the key of an item.
    ///
    /// # Errors
    ///
    /// Returns `KeyError` when the name is absent or a segment contains `/`.
    pub fn for_object<K: Resource>(object: &K) -> Result<Self, KeyError> {
        Self::from_meta(object.meta())
    }

    /// Derive a key from metadata.
    ///
    /// # Errors
    ///
    /// Returns `KeyError` when the name is absent or a segment contains `/`.
    pub fn from_meta(meta: &ObjectMeta) -> Result<Self, KeyError> {
        let name = meta
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| KeyError::MissingName {
                namespace: meta.namespace.clone(),
            })?;

        let namespace = meta.namespace.as_deref().filter(|ns| !ns.is_empty());
        if let Some(segment) = namespace.into_iter().chain([name]).find(|s| s.contains('/')) {
            return Err(KeyError::InvalidSegment {
                segment: segment.to_string(),
            });
        }

        Ok(Self::new(namespace, name))
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(namespace, name)`.
    #[must_use]
    pub fn split(&self) -> (Option<&str>, &str) {
        match self.0.split_once('/') {
            Some((ns, name)) => (Some(ns), name),
            None => (None, self.0.as_str()),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ObjectKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Identity and bookkeeping fields shared by every watched item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Assigned by the store on creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Ulid>,

    #[serde(default)]
    pub resource_version: ResourceVersion,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a cluster-scoped item.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the namespace.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A watched item. The payload is opaque to the controller core.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Identity and version metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Mutable metadata, used by stores to stamp versions.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Shortcut for `meta().resource_version`.
    fn resource_version(&self) -> ResourceVersion {
        self.meta().resource_version
    }
}

/// Schemaless item: metadata plus an arbitrary JSON spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: serde_json::Value,
}

impl DynamicObject {
    /// Create a namespaced object with an empty spec.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name).in_namespace(namespace),
            spec: serde_json::Value::Null,
        }
    }

    /// Create a cluster-scoped object with an empty spec.
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: serde_json::Value::Null,
        }
    }

    /// Replace the spec.
    #[must_use]
    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata = self.metadata.with_label(key, value);
        self
    }
}

impl Resource for DynamicObject {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Kind of change carried by a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "ADDED"),
            Self::Modified => write!(f, "MODIFIED"),
            Self::Deleted => write!(f, "DELETED"),
        }
    }
}

/// A single change delivered on a watch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent<K> {
    pub kind: EventKind,
    pub object: K,
}

impl<K: Resource> WatchEvent<K> {
    /// Create a watch event.
    pub const fn new(kind: EventKind, object: K) -> Self {
        Self { kind, object }
    }

    /// Version of the store after this change.
    pub fn resource_version(&self) -> ResourceVersion {
        self.object.resource_version()
    }
}

/// A full snapshot of the collection.
#[derive(Debug, Clone)]
pub struct ListResult<K> {
    pub items: Vec<K>,
    /// Version to resume watching from.
    pub resource_version: ResourceVersion,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_key() {
        let obj = DynamicObject::new("ns", "a");
        let key = ObjectKey::for_object(&obj).unwrap();
        assert_eq!(key.as_str(), "ns/a");
        assert_eq!(key.split(), (Some("ns"), "a"));
    }

    #[test]
    fn test_cluster_scoped_key() {
        let obj = DynamicObject::cluster_scoped("node-1");
        let key = ObjectKey::for_object(&obj).unwrap();
        assert_eq!(key.as_str(), "node-1");
        assert_eq!(key.split(), (None, "node-1"));
    }

    #[test]
    fn test_empty_namespace_is_cluster_scoped() {
        let meta = ObjectMeta::named("x").in_namespace("");
        assert_eq!(ObjectKey::from_meta(&meta).unwrap().as_str(), "x");
    }

    #[test]
    fn test_missing_name_is_key_error() {
        let meta = ObjectMeta::default().in_namespace("ns");
        let err = ObjectKey::from_meta(&meta).unwrap_err();
        assert_eq!(
            err,
            KeyError::MissingName {
                namespace: Some("ns".to_string())
            }
        );
    }

    #[test]
    fn test_empty_name_is_key_error() {
        let meta = ObjectMeta::named("");
        assert!(ObjectKey::from_meta(&meta).is_err());
    }

    #[test]
    fn test_slash_in_name_is_rejected() {
        let meta = ObjectMeta::named("a/b").in_namespace("ns");
        assert!(matches!(
            ObjectKey::from_meta(&meta),
            Err(KeyError::InvalidSegment { .. })
        ));
    }

    #[test]
    fn test_dynamic_object_round_trips_through_json() {
        let obj = DynamicObject::new("ns", "a")
            .with_label("app", "web")
            .with_spec(serde_json::json!({ "replicas": 3 }));

        let json = serde_json::to_value(&obj).unwrap();
        assert_eq!(json["metadata"]["namespace"], "ns");
        assert_eq!(json["metadata"]["resourceVersion"], 0);

        let back: DynamicObject = serde_json::from_value(json).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn test_resource_version_ordering() {
        let v1 = ResourceVersion::new(1);
        assert!(v1.next() > v1);
        assert_eq!(ResourceVersion::new(u64::MAX).next().get(), u64::MAX);
        assert_eq!(v1.to_string(), "1");
    }
}
