//! Destination store: where one plan's artifacts are written and pruned

use std::sync::Arc;

use tracing::{info, instrument};

use backup_common::crd::S3Destination;

use crate::backend::{object_key, ArtifactReader, CustomerKey, ObjectStorage};
use crate::error::Result;
use crate::retention::{enforce_retention, RetentionOutcome};
use crate::s3::{S3Backend, S3Config};

/// One backup run's output
pub struct Artifact {
    /// Stable identifier; becomes the last key segment
    pub id: String,
    /// Artifact bytes
    pub data: ArtifactReader,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Bucket, prefix and encryption for one destination
#[derive(Clone, Debug)]
pub struct DestinationConfig {
    /// Bucket receiving artifacts
    pub bucket: String,
    /// Key prefix for this destination's artifacts
    pub prefix: String,
    /// SSE-C key, when configured
    pub encryption: Option<CustomerKey>,
}

impl DestinationConfig {
    /// Settings for a plan's S3 destination under `prefix`
    pub fn from_s3(dest: &S3Destination, prefix: impl Into<String>) -> Self {
        Self {
            bucket: dest.bucket.clone(),
            prefix: prefix.into(),
            encryption: dest
                .encryption_key
                .as_ref()
                .map(|key| CustomerKey::new(key.clone(), dest.encryption_algorithm.as_deref())),
        }
    }
}

/// Stores artifacts under a prefix and enforces retention on that prefix
pub struct BackupDestination {
    storage: Arc<dyn ObjectStorage>,
    config: DestinationConfig,
}

impl BackupDestination {
    /// Connect to `storage` and make sure the bucket exists.
    ///
    /// A bucket that already exists (owned by us or not) is fine; any other
    /// creation error is returned.
    pub async fn new(storage: Arc<dyn ObjectStorage>, config: DestinationConfig) -> Result<Self> {
        match storage.create_bucket(&config.bucket).await {
            Ok(()) => {}
            Err(e) if e.is_bucket_exists() => {
                info!(bucket = %config.bucket, "bucket already exists");
            }
            Err(e) => return Err(e),
        }
        Ok(Self { storage, config })
    }

    /// S3 destination for a plan, ensuring its bucket
    pub async fn s3(dest: &S3Destination, prefix: impl Into<String>) -> Result<Self> {
        let backend = S3Backend::new(S3Config::from_destination(dest))?;
        Self::new(Arc::new(backend), DestinationConfig::from_s3(dest, prefix)).await
    }

    /// Settings in use
    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    /// Upload `artifact` to `prefix/id` and return its stored size.
    ///
    /// The size comes from a head request made with the same encryption
    /// parameters as the upload.
    #[instrument(skip(self, artifact), fields(bucket = %self.config.bucket, id = %artifact.id))]
    pub async fn store(&self, artifact: Artifact) -> Result<u64> {
        let key = object_key(&self.config.prefix, &artifact.id);
        let encryption = self.config.encryption.as_ref();

        info!(key = %key, encrypted = encryption.is_some(), "upload starting");
        self.storage
            .upload(&self.config.bucket, &key, artifact.data, encryption)
            .await?;

        let size = self
            .storage
            .head_object(&self.config.bucket, &key, encryption)
            .await?;
        info!(key = %key, size, "upload successful");
        Ok(size)
    }

    /// Keep only the newest `max` artifacts under the prefix
    pub async fn ensure_retention(&self, max: usize) -> Result<RetentionOutcome> {
        enforce_retention(
            self.storage.as_ref(),
            &self.config.bucket,
            &self.config.prefix,
            max,
        )
        .await
    }
}
