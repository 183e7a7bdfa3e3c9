//! Metadata store access: deterministic record paths, bulk removal and
//! existence checks.
//!
//! `bulk_remove` answers with one boolean per input path, aligned by position.
//! A failed removal never aborts the rest of the batch.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{DeletionError, Result};

/// Location of a segment's metadata record: `/{root}/{table}/{segment}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    root: String,
    table_name: String,
    segment_id: String,
}

impl StorePath {
    pub fn for_segment(root: &str, table_name: &str, segment_id: &str) -> Self {
        Self {
            root: root.to_string(),
            table_name: table_name.to_string(),
            segment_id: segment_id.to_string(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn segment_id(&self) -> &str {
        &self.segment_id
    }

    pub fn to_object_path(&self) -> ObjectPath {
        ObjectPath::from_iter([
            self.root.as_str(),
            self.table_name.as_str(),
            self.segment_id.as_str(),
        ])
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/{}", self.root, self.table_name, self.segment_id)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStoreGateway: Send + Sync {
    /// Remove every record in `paths`. `result[i]` is false when `paths[i]`
    /// could not be removed, including when it did not exist.
    async fn bulk_remove(&self, paths: &[StorePath]) -> Vec<bool>;

    /// Whether a record is currently present.
    async fn exists(&self, path: &StorePath) -> Result<bool>;
}

/// Metadata records kept in process memory.
///
/// Removing an absent record reports `false`, the way coordination stores do.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, path: &StorePath, record: Vec<u8>) {
        self.records.write().await.insert(path.to_string(), record);
    }

    pub async fn get(&self, path: &StorePath) -> Option<Vec<u8>> {
        self.records.read().await.get(&path.to_string()).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MetadataStoreGateway for InMemoryMetadataStore {
    async fn bulk_remove(&self, paths: &[StorePath]) -> Vec<bool> {
        let mut records = self.records.write().await;
        paths
            .iter()
            .map(|path| records.remove(&path.to_string()).is_some())
            .collect()
    }

    async fn exists(&self, path: &StorePath) -> Result<bool> {
        Ok(self.records.read().await.contains_key(&path.to_string()))
    }
}

/// Metadata records stored as objects, one object per segment.
pub struct ObjectStoreMetadataGateway {
    object_store: Arc<dyn ObjectStore>,
    concurrency: usize,
}

impl ObjectStoreMetadataGateway {
    pub fn new(object_store: Arc<dyn ObjectStore>, concurrency: usize) -> Self {
        Self {
            object_store,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn put(&self, path: &StorePath, record: Vec<u8>) -> Result<()> {
        self.object_store
            .put(&path.to_object_path(), record.into())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStoreGateway for ObjectStoreMetadataGateway {
    async fn bulk_remove(&self, paths: &[StorePath]) -> Vec<bool> {
        let locations: Vec<(String, ObjectPath)> = paths
            .iter()
            .map(|path| (path.to_string(), path.to_object_path()))
            .collect();

        // `buffered` yields results in input order
        stream::iter(locations)
            .map(|(path, location)| {
                let object_store = Arc::clone(&self.object_store);
                async move {
                    match object_store.delete(&location).await {
                        Ok(()) => true,
                        Err(e) => {
                            debug!(path = %path, error = %e, "Metadata record removal failed");
                            false
                        }
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn exists(&self, path: &StorePath) -> Result<bool> {
        match self.object_store.head(&path.to_object_path()).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(DeletionError::from(e)),
        }
    }
}
