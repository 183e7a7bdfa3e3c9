use anyhow::{Context, Result};
use object_store::{ObjectStore, local::LocalFileSystem, memory::InMemory};
use std::sync::Arc;
use url::Url;

use crate::config::{ArtifactConfig, StorageConfig};

/// Create the metadata object store from storage configuration
pub fn create_object_store(storage_config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    create_object_store_from_dsn(&storage_config.dsn)
}

/// Create the deep store holding segment artifacts
pub fn create_artifact_store(artifact_config: &ArtifactConfig) -> Result<Arc<dyn ObjectStore>> {
    create_object_store_from_dsn(&artifact_config.dsn)
}

/// Create an object store from a DSN string
///
/// Supported schemes: `memory://` and `file:///path`. The directory of a
/// `file://` DSN is created when missing.
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/storage"
                ));
            }
            std::fs::create_dir_all(path)
                .with_context(|| format!("Failed to create storage directory {path}"))?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: file, memory",
            scheme
        )),
    }
}
