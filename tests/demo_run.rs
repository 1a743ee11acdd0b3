//! Demo wiring end to end: config and seed files on disk, a running controller.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use levelwatch::demo::{load_seed, seed_store, LoggingReconciler, SeedError};
use levelwatch_controller::Controller;
use levelwatch_core::ControllerConfig;
use levelwatch_store::{DynamicObject, InMemoryStore, ObjectKey, TracingStore};
use tempfile::NamedTempFile;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn seeded_store_is_mirrored_by_running_controller() {
    let config_file = write_temp(
        r"
workers = 2
resync_interval_secs = 0
sync_timeout_secs = 5

[reconnect]
initial_delay_ms = 10
max_delay_ms = 50
",
    );
    let seed_file = write_temp(
        r#"[
            {"metadata": {"namespace": "default", "name": "web"}, "spec": {"replicas": 3}},
            {"metadata": {"namespace": "default", "name": "db"}},
            {"metadata": {"name": "node-1"}}
        ]"#,
    );

    let config = ControllerConfig::from_file(config_file.path()).unwrap();
    assert_eq!(config.workers, 2);

    let store = Arc::new(InMemoryStore::<DynamicObject>::new());
    let seeded = seed_store(&store, load_seed(seed_file.path()).unwrap())
        .await
        .unwrap();
    assert_eq!(seeded, 3);

    let running = Controller::new(TracingStore::new(Arc::clone(&store)), LoggingReconciler, config)
        .unwrap()
        .start()
        .await
        .unwrap();

    let cache = running.cache();
    assert!(cache.has_synced());
    assert_eq!(
        cache.keys().await,
        vec![
            ObjectKey::from("default/db"),
            ObjectKey::from("default/web"),
            ObjectKey::from("node-1"),
        ]
    );

    let queue = running.queue();
    for _ in 0..200 {
        if queue.is_empty().await && queue.work_queue().in_flight().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(queue.is_empty().await);

    tokio::time::timeout(Duration::from_secs(2), running.stop())
        .await
        .unwrap()
        .unwrap();
}

#[test]
fn missing_seed_file_reports_path() {
    let err = load_seed(std::path::Path::new("/nonexistent/levelwatch-seed.json")).unwrap_err();

    assert!(matches!(err, SeedError::ReadFailed { .. }));
    assert!(err.to_string().contains("levelwatch-seed.json"));
}
