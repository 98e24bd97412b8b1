//! Errors raised by object storage backends

use thiserror::Error;

/// Errors from bucket creation, upload, listing and deletion
#[derive(Debug, Error)]
pub enum StorageError {
    /// The bucket exists and belongs to someone else
    #[error("bucket {bucket} already exists")]
    BucketAlreadyExists {
        /// Bucket name
        bucket: String,
    },

    /// The bucket exists and belongs to us
    #[error("bucket {bucket} already owned by you")]
    BucketAlreadyOwned {
        /// Bucket name
        bucket: String,
    },

    /// Object or bucket does not exist
    #[error("object not found: {key}")]
    NotFound {
        /// Key (or bucket) that was looked up
        key: String,
    },

    /// A requested feature is not supported by the backend
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Error reported by the object store client
    #[error("object store error: {0}")]
    Backend(#[from] object_store::Error),

    /// Reading the artifact stream failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A raw HTTP request against the endpoint failed
    #[error("request failed ({status}): {message}")]
    Request {
        /// HTTP status, 0 when no response was received
        status: u16,
        /// Response body or transport error
        message: String,
    },
}

impl StorageError {
    /// Whether this error means "the bucket is already there"
    pub fn is_bucket_exists(&self) -> bool {
        matches!(
            self,
            StorageError::BucketAlreadyExists { .. } | StorageError::BucketAlreadyOwned { .. }
        )
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Request {
            status: e.status().map(|s| s.as_u16()).unwrap_or(0),
            message: e.to_string(),
        }
    }
}

/// Result alias for storage operations
pub type Result<T, E = StorageError> = std::result::Result<T, E>;
