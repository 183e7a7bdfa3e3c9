//! Segment deletion coordination for the cluster controller.
//!
//! Decides whether a table's segments can be purged from the metadata store,
//! removes them in bulk, and reschedules whatever cannot be purged yet.
//!
//! The manager is wired from narrow collaborators:
//! - `ClusterStateReader`: ideal state and external view of a table
//! - `MetadataStoreGateway`: positional bulk removal and existence checks
//! - `RetryScheduler`: deferred re-evaluation
//! - `DeletionOutcomeSink`: per-segment hook after a confirmed removal

pub mod cluster;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod reference;
pub mod retry;
pub mod sink;
pub mod store;

// Re-export commonly used types
pub use cluster::{ClusterStateReader, InMemoryClusterState, InstanceStateMap, PlacementView};
pub use error::{DeletionError, Result};
pub use manager::{DeletionReport, RetryReason, SegmentDeletionManager};
pub use metrics::DeletionMetrics;
pub use reference::is_referenced;
pub use retry::{DelayedRetryScheduler, DeletionRequest, RetryPolicy, RetryQueue, RetryScheduler};
pub use sink::{
    ArtifactCleanupSink, BroadcastSink, DeletionOutcomeSink, NoopSink, SegmentRemovedEvent,
};
pub use store::{InMemoryMetadataStore, MetadataStoreGateway, ObjectStoreMetadataGateway, StorePath};
