//! SegmentDB controller: segment deletion service.
//!
//! Wires the deletion core from configuration: the metadata store, the
//! optional artifact cleanup, the in-process retry scheduler and the worker
//! draining it.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub use common;
pub use controller;

use common::config::Configuration;
use common::storage::{create_artifact_store, create_object_store};
use controller::{
    ArtifactCleanupSink, ClusterStateReader, DelayedRetryScheduler, DeletionOutcomeSink,
    DeletionReport, MetadataStoreGateway, NoopSink, ObjectStoreMetadataGateway, RetryPolicy,
    SegmentDeletionManager,
};

/// A running deletion manager together with its retry worker.
pub struct DeletionService {
    manager: Arc<SegmentDeletionManager>,
    scheduler: Arc<DelayedRetryScheduler>,
    worker: JoinHandle<()>,
    default_retry_delay: Duration,
}

impl DeletionService {
    /// Start the service against the object store configured in `storage`.
    pub async fn start(config: &Configuration, cluster: Arc<dyn ClusterStateReader>) -> Result<Self> {
        let object_store =
            create_object_store(&config.storage).context("Failed to create metadata store")?;
        let store = Arc::new(ObjectStoreMetadataGateway::new(
            object_store,
            config.deletion.bulk_remove_concurrency,
        ));
        Self::start_with_store(config, cluster, store).await
    }

    /// Start the service against an explicit metadata store gateway.
    pub async fn start_with_store(
        config: &Configuration,
        cluster: Arc<dyn ClusterStateReader>,
        store: Arc<dyn MetadataStoreGateway>,
    ) -> Result<Self> {
        let deletion = &config.deletion;
        deletion
            .validate()
            .context("Invalid deletion configuration")?;

        let sink: Arc<dyn DeletionOutcomeSink> = if deletion.artifacts.enabled {
            let artifact_store = create_artifact_store(&deletion.artifacts)
                .context("Failed to create artifact store")?;
            let sink = ArtifactCleanupSink::new(artifact_store);
            match &deletion.artifacts.archive_prefix {
                Some(prefix) => Arc::new(sink.with_archive_prefix(prefix.clone())),
                None => Arc::new(sink),
            }
        } else {
            Arc::new(NoopSink)
        };

        let (scheduler, queue) = DelayedRetryScheduler::new(Handle::current());
        let scheduler = Arc::new(scheduler);

        let manager = Arc::new(
            SegmentDeletionManager::new(cluster, store, scheduler.clone())
                .with_sink(sink)
                .with_policy(RetryPolicy::from(&deletion.retry))
                .with_metadata_root(deletion.metadata_root.clone()),
        );

        let worker = tokio::spawn(manager.clone().process_retries(queue));

        tracing::info!(
            metadata_root = %deletion.metadata_root,
            default_retry_delay = ?deletion.default_retry_delay,
            artifact_cleanup = deletion.artifacts.enabled,
            "Segment deletion service started"
        );

        Ok(Self {
            manager,
            scheduler,
            worker,
            default_retry_delay: deletion.default_retry_delay,
        })
    }

    pub fn manager(&self) -> &Arc<SegmentDeletionManager> {
        &self.manager
    }

    /// Evaluate segments now, retrying leftovers after the configured delay.
    pub async fn delete_segments<I, S>(
        &self,
        table_name: &str,
        segment_ids: I,
    ) -> controller::Result<DeletionReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manager
            .delete_segments(table_name, segment_ids, self.default_retry_delay)
            .await
    }

    /// Queue segments for evaluation without waiting for the outcome.
    pub fn submit<I, S>(&self, table_name: &str, segment_ids: I) -> controller::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manager
            .submit(table_name, segment_ids, self.default_retry_delay)
    }

    /// Retries armed and not yet due.
    pub fn pending_retries(&self) -> usize {
        self.scheduler.pending()
    }

    /// Disarm pending retries and wait for the worker to finish its current
    /// run.
    pub async fn shutdown(self) -> Result<()> {
        self.scheduler.shutdown();
        self.worker
            .await
            .context("Retry worker terminated abnormally")?;
        tracing::info!("Segment deletion service stopped");
        Ok(())
    }
}
