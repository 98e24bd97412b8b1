//! Object storage backend abstraction
//!
//! The destination and the retention enforcer only talk to storage through
//! [`ObjectStorage`]. The production implementation is
//! [`S3Backend`](crate::s3::S3Backend); tests use an in-memory backend.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::error::{Result, StorageError};

/// SSE-C algorithm used when a key is configured without an algorithm
pub const DEFAULT_ENCRYPTION_ALGORITHM: &str = "AES256";

/// Readable artifact body
pub type ArtifactReader = Pin<Box<dyn AsyncRead + Send>>;

/// Server-side encryption with a customer-provided key
#[derive(Clone, PartialEq, Eq)]
pub struct CustomerKey {
    /// Raw key material
    pub key: String,
    /// Encryption algorithm
    pub algorithm: String,
}

impl CustomerKey {
    /// Build a key, falling back to [`DEFAULT_ENCRYPTION_ALGORITHM`] when
    /// no algorithm (or an empty one) is given
    pub fn new(key: impl Into<String>, algorithm: Option<&str>) -> Self {
        let algorithm = match algorithm {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => DEFAULT_ENCRYPTION_ALGORITHM.to_string(),
        };
        Self {
            key: key.into(),
            algorithm,
        }
    }

    /// Reject algorithms the S3 protocol does not define for SSE-C
    pub fn ensure_supported(&self) -> Result<()> {
        if self.algorithm == DEFAULT_ENCRYPTION_ALGORITHM {
            Ok(())
        } else {
            Err(StorageError::Unsupported(format!(
                "SSE-C algorithm {}",
                self.algorithm
            )))
        }
    }
}

impl std::fmt::Debug for CustomerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomerKey")
            .field("key", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// One listed object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Full object key
    pub key: String,
    /// Last modification time reported by the backend
    pub last_modified: DateTime<Utc>,
    /// Size in bytes
    pub size: u64,
}

/// One page of a listing
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    /// Objects on this page, in backend order
    pub objects: Vec<StoredObject>,
    /// Marker to pass to fetch the next page; `None` on the last page
    pub next_marker: Option<String>,
}

/// Minimal object storage surface needed to store and prune artifacts
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Create `bucket`. Returns [`StorageError::BucketAlreadyOwned`] or
    /// [`StorageError::BucketAlreadyExists`] when it is already there.
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Stream `body` into `bucket/key`. The object becomes visible
    /// atomically on success.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: ArtifactReader,
        encryption: Option<&CustomerKey>,
    ) -> Result<()>;

    /// Stored size of `bucket/key`. Encrypted objects need the same key
    /// they were uploaded with.
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        encryption: Option<&CustomerKey>,
    ) -> Result<u64>;

    /// List one page of objects under `prefix`, starting after `marker`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ListPage>;

    /// Delete `bucket/key`. Deleting a missing object succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Join a prefix and an artifact id into an object key
pub fn object_key(prefix: &str, id: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let id = id.trim_start_matches('/');
    if prefix.is_empty() {
        id.to_string()
    } else {
        format!("{prefix}/{id}")
    }
}
