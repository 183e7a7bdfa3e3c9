//! End-to-end retry behaviour of the deletion service.

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use segmentdb::DeletionService;
use segmentdb::common::config::Configuration;
use segmentdb::controller::{
    ArtifactCleanupSink, InMemoryClusterState, InMemoryMetadataStore, PlacementView, StorePath,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

const TABLE: &str = "myTable_OFFLINE";

fn fast_retry_config() -> Configuration {
    let mut config = Configuration::default();
    config.deletion.default_retry_delay = Duration::from_millis(20);
    config.deletion.retry.max_delay = Duration::from_millis(100);
    config
}

fn metadata_path(segment_id: &str) -> StorePath {
    StorePath::for_segment("SEGMENTS", TABLE, segment_id)
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(Duration::from_secs(10), async {
        while !condition().await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_referenced_segment_is_removed_once_cluster_converges() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cluster = Arc::new(InMemoryClusterState::new());
    cluster
        .set_external_view(
            TABLE,
            PlacementView::new().with_segment("seg11", [("server_1", "ONLINE")]),
        )
        .await;

    let store = Arc::new(InMemoryMetadataStore::new());
    store.put(&metadata_path("seg1"), b"{}".to_vec()).await;
    store.put(&metadata_path("seg11"), b"{}".to_vec()).await;

    let service =
        DeletionService::start_with_store(&fast_retry_config(), cluster.clone(), store.clone())
            .await
            .unwrap();

    let report = service.delete_segments(TABLE, ["seg1", "seg11"]).await.unwrap();
    assert!(report.removed.contains("seg1"));
    assert!(report.still_referenced().contains("seg11"));
    assert!(store.get(&metadata_path("seg11")).await.is_some());

    // Let a couple of retries go by while the segment is still served.
    sleep(Duration::from_millis(60)).await;
    assert!(store.get(&metadata_path("seg11")).await.is_some());

    cluster.remove_segment(TABLE, "seg11").await;

    wait_until(|| {
        let store = store.clone();
        async move { store.is_empty().await }
    })
    .await;

    let metrics = service.manager().metrics();
    assert_eq!(metrics.segments_removed(), 2);
    assert!(metrics.retries_scheduled() >= 2);
    assert_eq!(metrics.store_failures(), 0);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_submit_is_fire_and_forget() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cluster = Arc::new(InMemoryClusterState::new());
    let store = Arc::new(InMemoryMetadataStore::new());
    for segment in ["seg1", "seg2", "seg3"] {
        store.put(&metadata_path(segment), b"{}".to_vec()).await;
    }

    let service = DeletionService::start_with_store(&fast_retry_config(), cluster, store.clone())
        .await
        .unwrap();

    service.submit(TABLE, ["seg1", "seg2", "seg3"]).unwrap();

    wait_until(|| {
        let store = store.clone();
        async move { store.is_empty().await }
    })
    .await;

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_object_store_backed_service_with_artifact_archive() {
    let _ = env_logger::builder().is_test(true).try_init();

    let temp_dir = TempDir::new().unwrap();
    let metadata_dir = temp_dir.path().join("metadata");
    let deep_store_dir = temp_dir.path().join("deep-store");
    std::fs::create_dir_all(&metadata_dir).unwrap();
    std::fs::create_dir_all(&deep_store_dir).unwrap();

    let mut config = fast_retry_config();
    config.storage.dsn = format!("file://{}", metadata_dir.to_string_lossy());
    config.deletion.artifacts.enabled = true;
    config.deletion.artifacts.dsn = format!("file://{}", deep_store_dir.to_string_lossy());

    let metadata = LocalFileSystem::new_with_prefix(&metadata_dir).unwrap();
    let deep_store = LocalFileSystem::new_with_prefix(&deep_store_dir).unwrap();
    for segment in ["seg1", "seg2"] {
        metadata
            .put(&metadata_path(segment).to_object_path(), b"{}".to_vec().into())
            .await
            .unwrap();
        deep_store
            .put(
                &ArtifactCleanupSink::artifact_path(TABLE, segment),
                b"segment".to_vec().into(),
            )
            .await
            .unwrap();
    }

    let service = DeletionService::start(&config, Arc::new(InMemoryClusterState::new()))
        .await
        .unwrap();

    let report = service.delete_segments(TABLE, ["seg1", "seg2"]).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.removed.len(), 2);
    for segment in ["seg1", "seg2"] {
        assert!(
            metadata
                .head(&metadata_path(segment).to_object_path())
                .await
                .is_err()
        );
        assert!(
            deep_store
                .head(&ArtifactCleanupSink::artifact_path(TABLE, segment))
                .await
                .is_err()
        );
        let archived = ObjectPath::from_iter(["Deleted_Segments", TABLE, segment]);
        assert!(deep_store.head(&archived).await.is_ok());
    }

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_disarms_pending_retries() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cluster = Arc::new(InMemoryClusterState::new());
    cluster
        .set_ideal_state(
            TABLE,
            PlacementView::new().with_segment("seg11", [("server_1", "ONLINE")]),
        )
        .await;
    let store = Arc::new(InMemoryMetadataStore::new());
    store.put(&metadata_path("seg11"), b"{}".to_vec()).await;

    let mut config = Configuration::default();
    config.deletion.default_retry_delay = Duration::from_secs(3600);
    config.deletion.retry.max_delay = Duration::from_secs(3600);

    let service = DeletionService::start_with_store(&config, cluster, store.clone())
        .await
        .unwrap();

    let report = service.delete_segments(TABLE, ["seg11"]).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(service.pending_retries(), 1);

    timeout(Duration::from_secs(5), service.shutdown())
        .await
        .expect("shutdown should not wait for pending retries")
        .unwrap();

    // The record stays for the next sweep.
    assert!(store.get(&metadata_path("seg11")).await.is_some());
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let mut config = Configuration::default();
    config.deletion.bulk_remove_concurrency = 0;

    let result = DeletionService::start(&config, Arc::new(InMemoryClusterState::new())).await;
    assert!(result.is_err());
}
