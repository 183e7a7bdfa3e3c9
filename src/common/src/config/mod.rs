use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Object storage holding segment metadata records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// DSN of the metadata store (`memory://`, `file:///path`)
    pub dsn: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://"),
        }
    }
}

/// Retry behaviour for segments that could not be purged yet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Factor applied to the delay on every rescheduling. 1 keeps the delay fixed.
    ///
    /// Env: SEGMENTDB__DELETION__RETRY__BACKOFF_MULTIPLIER
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    /// Upper bound for the delay between two attempts.
    ///
    /// Env: SEGMENTDB__DELETION__RETRY__MAX_DELAY
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Attempt count after which stuck segments are reported at warn level.
    ///
    /// Env: SEGMENTDB__DELETION__RETRY__ALERT_AFTER_ATTEMPTS
    #[serde(default = "default_alert_after_attempts")]
    pub alert_after_attempts: Option<u32>,
}

fn default_backoff_multiplier() -> u32 {
    1
}

fn default_max_delay() -> Duration {
    Duration::from_secs(3600)
}

fn default_alert_after_attempts() -> Option<u32> {
    Some(10)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
            alert_after_attempts: default_alert_after_attempts(),
        }
    }
}

/// Removal of the physical segment artifact once its metadata record is gone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Remove artifacts from the deep store after a confirmed metadata removal.
    ///
    /// Env: SEGMENTDB__DELETION__ARTIFACTS__ENABLED
    #[serde(default)]
    pub enabled: bool,

    /// DSN of the deep store holding segment artifacts.
    ///
    /// Env: SEGMENTDB__DELETION__ARTIFACTS__DSN
    #[serde(default = "default_artifact_dsn")]
    pub dsn: String,

    /// Move artifacts under this prefix instead of deleting them.
    ///
    /// Env: SEGMENTDB__DELETION__ARTIFACTS__ARCHIVE_PREFIX
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: Option<String>,
}

fn default_artifact_dsn() -> String {
    String::from("memory://")
}

fn default_archive_prefix() -> Option<String> {
    Some(String::from("Deleted_Segments"))
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dsn: default_artifact_dsn(),
            archive_prefix: default_archive_prefix(),
        }
    }
}

/// Segment deletion settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionConfig {
    /// Delay applied when a request does not specify one.
    ///
    /// Env: SEGMENTDB__DELETION__DEFAULT_RETRY_DELAY
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub default_retry_delay: Duration,

    /// Root component of every segment metadata path.
    ///
    /// Env: SEGMENTDB__DELETION__METADATA_ROOT
    #[serde(default = "default_metadata_root")]
    pub metadata_root: String,

    /// Removals kept in flight by the object store gateway.
    ///
    /// Env: SEGMENTDB__DELETION__BULK_REMOVE_CONCURRENCY
    #[serde(default = "default_bulk_remove_concurrency")]
    pub bulk_remove_concurrency: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub artifacts: ArtifactConfig,
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(600)
}

fn default_metadata_root() -> String {
    String::from("SEGMENTS")
}

fn default_bulk_remove_concurrency() -> usize {
    16
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            default_retry_delay: default_retry_delay(),
            metadata_root: default_metadata_root(),
            bulk_remove_concurrency: default_bulk_remove_concurrency(),
            retry: RetryConfig::default(),
            artifacts: ArtifactConfig::default(),
        }
    }
}

impl DeletionConfig {
    /// Validate the deletion configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.metadata_root.is_empty() || self.metadata_root.contains('/') {
            anyhow::bail!(
                "metadata_root must be a single non-empty path component, got {:?}",
                self.metadata_root
            );
        }

        if self.bulk_remove_concurrency == 0 {
            anyhow::bail!("bulk_remove_concurrency must be positive");
        }

        if self.retry.backoff_multiplier == 0 {
            anyhow::bail!("retry.backoff_multiplier must be positive");
        }

        if self.retry.max_delay < self.default_retry_delay {
            anyhow::bail!(
                "retry.max_delay ({:?}) must not be shorter than default_retry_delay ({:?})",
                self.retry.max_delay,
                self.default_retry_delay
            );
        }

        if self.retry.alert_after_attempts == Some(0) {
            anyhow::bail!("retry.alert_after_attempts must be positive when set");
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Metadata store configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Segment deletion configuration
    #[serde(default)]
    pub deletion: DeletionConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file("segmentdb.toml"))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path))
    }

    fn figment(file: figment::providers::Data<Toml>) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed("SEGMENTDB__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}
