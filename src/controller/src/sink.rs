//! Hooks invoked once per segment whose metadata record was removed.
//!
//! A sink failure is logged and counted by the manager but never changes the
//! segment's outcome: the metadata record is already gone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::error::{DeletionError, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeletionOutcomeSink: Send + Sync {
    async fn on_segment_removed(&self, table_name: &str, segment_id: &str) -> Result<()>;
}

/// Default sink: nothing to do.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl DeletionOutcomeSink for NoopSink {
    async fn on_segment_removed(&self, _table_name: &str, _segment_id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRemovedEvent {
    pub table_name: String,
    pub segment_id: String,
    pub removed_at: DateTime<Utc>,
}

/// Publishes a `SegmentRemovedEvent` per removal on a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<SegmentRemovedEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SegmentRemovedEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl DeletionOutcomeSink for BroadcastSink {
    async fn on_segment_removed(&self, table_name: &str, segment_id: &str) -> Result<()> {
        let event = SegmentRemovedEvent {
            table_name: table_name.to_string(),
            segment_id: segment_id.to_string(),
            removed_at: Utc::now(),
        };
        // No subscribers is fine; the event is simply dropped.
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Removes the physical segment artifact `{table}/{segment}` from the deep
/// store, or moves it under `archive_prefix` when one is set.
pub struct ArtifactCleanupSink {
    object_store: Arc<dyn ObjectStore>,
    archive_prefix: Option<String>,
}

impl ArtifactCleanupSink {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            object_store,
            archive_prefix: None,
        }
    }

    pub fn with_archive_prefix(mut self, archive_prefix: impl Into<String>) -> Self {
        self.archive_prefix = Some(archive_prefix.into());
        self
    }

    pub fn artifact_path(table_name: &str, segment_id: &str) -> ObjectPath {
        ObjectPath::from_iter([table_name, segment_id])
    }
}

#[async_trait]
impl DeletionOutcomeSink for ArtifactCleanupSink {
    async fn on_segment_removed(&self, table_name: &str, segment_id: &str) -> Result<()> {
        let location = Self::artifact_path(table_name, segment_id);

        let outcome = match &self.archive_prefix {
            Some(prefix) => {
                let target = ObjectPath::from_iter([prefix.as_str(), table_name, segment_id]);
                self.object_store.rename(&location, &target).await
            }
            None => self.object_store.delete(&location).await,
        };

        match outcome {
            Ok(()) => {
                info!(
                    table_name = %table_name,
                    segment_id = %segment_id,
                    archived = self.archive_prefix.is_some(),
                    "Removed segment artifact"
                );
                Ok(())
            }
            // Already gone, e.g. a previous attempt got this far.
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(DeletionError::Sink(format!(
                "failed to remove artifact {location}: {e}"
            ))),
        }
    }
}
