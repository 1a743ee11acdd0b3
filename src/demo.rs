//! Demo wiring: seed data and a reconciler that only logs.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use levelwatch_controller::Reconciler;
use levelwatch_store::{DynamicObject, InMemoryStore, ObjectKey, StoreError};
use thiserror::Error;
use tracing::info;

/// Errors loading seed data.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file '{path}': {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("seed file is not a JSON array of objects: {reason}")]
    ParseFailed { reason: String },

    #[error("failed to store seed object: {0}")]
    Store(#[from] StoreError),
}

/// Parse a JSON array of objects.
///
/// # Errors
///
/// Returns `ParseFailed` if the input is not an array of objects.
pub fn parse_seed(input: &str) -> Result<Vec<DynamicObject>, SeedError> {
    serde_json::from_str(input).map_err(|e| SeedError::ParseFailed {
        reason: e.to_string(),
    })
}

/// Read and parse a seed file.
///
/// # Errors
///
/// Returns `ReadFailed` if the file cannot be read, or `ParseFailed`.
pub fn load_seed(path: &Path) -> Result<Vec<DynamicObject>, SeedError> {
    let contents = std::fs::read_to_string(path).map_err(|e| SeedError::ReadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_seed(&contents)
}

/// Create every object in `store`. Returns the number created.
///
/// # Errors
///
/// Returns `Store` on the first object the store rejects.
pub async fn seed_store(
    store: &InMemoryStore<DynamicObject>,
    objects: Vec<DynamicObject>,
) -> Result<usize, SeedError> {
    let count = objects.len();
    for object in objects {
        store.create(object).await?;
    }
    Ok(count)
}

/// Reconciler that logs each key it is asked to sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingReconciler;

#[async_trait]
impl Reconciler<DynamicObject> for LoggingReconciler {
    type Error = Infallible;

    async fn reconcile(&self, key: &ObjectKey, item: Arc<DynamicObject>) -> Result<(), Infallible> {
        info!(
            resource_version = %item.metadata.resource_version,
            "Syncing {key}"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed_reads_metadata_and_spec() {
        let objects = parse_seed(
            r#"[
                {"metadata": {"namespace": "default", "name": "web"}, "spec": {"replicas": 3}},
                {"metadata": {"name": "node-1"}}
            ]"#,
        )
        .unwrap();

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].metadata.namespace.as_deref(), Some("default"));
        assert_eq!(objects[0].spec, serde_json::json!({"replicas": 3}));
        assert!(objects[1].spec.is_null());
    }

    #[test]
    fn test_parse_seed_rejects_non_array() {
        let err = parse_seed(r#"{"metadata": {"name": "web"}}"#).unwrap_err();
        assert!(matches!(err, SeedError::ParseFailed { .. }));
    }

    #[tokio::test]
    async fn test_seed_store_rejects_duplicates() {
        let store = InMemoryStore::new();
        let objects = vec![DynamicObject::new("ns", "a"), DynamicObject::new("ns", "a")];

        let err = seed_store(&store, objects).await.unwrap_err();
        assert!(matches!(err, SeedError::Store(StoreError::AlreadyExists { .. })));
        assert_eq!(store.len().await, 1);
    }
}
