//! Errors surfaced by the deletion core.
//!
//! Only `InvalidRequest` and `ClusterState` ever cross the
//! `SegmentDeletionManager::delete_segments` boundary. Store and sink failures
//! are folded into per-segment outcomes.

#[derive(Debug, thiserror::Error)]
pub enum DeletionError {
    #[error("Invalid deletion request: {0}")]
    InvalidRequest(String),
    #[error("Cluster state unavailable: {0}")]
    ClusterState(String),
    #[error("Metadata store error: {0}")]
    Store(String),
    #[error("Removal hook failed: {0}")]
    Sink(String),
}

impl From<object_store::Error> for DeletionError {
    fn from(err: object_store::Error) -> Self {
        DeletionError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DeletionError>;
