//! Object storage destination for backup artifacts
//!
//! - **backend**: the [`ObjectStorage`] trait the rest of the crate is written against
//! - **s3**: S3-compatible implementation (`object_store` plus a signed CreateBucket)
//! - **destination**: [`BackupDestination`], upload with size verification
//! - **retention**: newest-N retention over the complete, multi-page listing

#![deny(missing_docs)]

pub mod backend;
pub mod destination;
pub mod error;
pub mod retention;
pub mod s3;

#[cfg(test)]
mod memory;

pub use backend::{
    ArtifactReader, CustomerKey, ListPage, ObjectStorage, StoredObject,
    DEFAULT_ENCRYPTION_ALGORITHM,
};
pub use destination::{Artifact, BackupDestination, DestinationConfig};
pub use error::StorageError;
pub use retention::{enforce_retention, select_obsolete, RetentionOutcome};
pub use s3::{S3Backend, S3Config};
