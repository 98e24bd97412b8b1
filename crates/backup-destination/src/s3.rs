//! S3-compatible backend built on `object_store`
//!
//! Uploads, heads, listings and deletes go through `object_store`'s
//! `AmazonS3`. Bucket creation is not part of that API, so it is sent as a
//! SigV4-signed `PUT /<bucket>` with `reqwest`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3, AmazonS3Builder, AwsAuthorizer, AwsCredential};
use object_store::path::Path;
use object_store::{ClientOptions, ObjectMeta, ObjectStore, WriteMultipart};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use backup_common::crd::S3Destination;

use crate::backend::{ArtifactReader, CustomerKey, ListPage, ObjectStorage, StoredObject};
use crate::error::{Result, StorageError};

/// Region used for signing; S3-compatible servers ignore it
pub const DEFAULT_REGION: &str = "us-east-1";

/// Keys returned per listing page, matching the S3 maximum
pub const LIST_PAGE_SIZE: usize = 1000;

/// Parts uploaded concurrently during a multipart upload
const MAX_CONCURRENT_PARTS: usize = 4;

/// Size of each read from the artifact stream
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// S3 protocol minimum for all but the last part
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Connection settings for an S3-compatible endpoint
#[derive(Clone)]
pub struct S3Config {
    /// Endpoint URL including scheme
    pub endpoint_url: String,
    /// Signing region
    pub region: String,
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Accept any TLS certificate
    pub insecure_skip_verify: bool,
    /// Multipart part size in bytes
    pub part_size: usize,
}

impl S3Config {
    /// Derive the connection settings from a plan's destination
    pub fn from_destination(dest: &S3Destination) -> Self {
        let endpoint_url = if dest.endpoint.contains("://") {
            dest.endpoint.trim_end_matches('/').to_string()
        } else {
            let scheme = if dest.use_ssl { "https" } else { "http" };
            format!("{scheme}://{}", dest.endpoint.trim_end_matches('/'))
        };
        let part_size = usize::try_from(dest.part_size)
            .unwrap_or(MIN_PART_SIZE)
            .max(MIN_PART_SIZE);
        Self {
            endpoint_url,
            region: DEFAULT_REGION.to_string(),
            access_key_id: dest.access_key_id.clone(),
            secret_access_key: dest.secret_access_key.clone(),
            insecure_skip_verify: dest.insecure_skip_verify,
            part_size,
        }
    }

    fn allow_http(&self) -> bool {
        self.endpoint_url.starts_with("http://")
    }
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

/// [`ObjectStorage`] backed by an S3-compatible service
#[derive(Debug)]
pub struct S3Backend {
    config: S3Config,
    http: reqwest::Client,
}

impl S3Backend {
    /// Build a backend for `config`
    pub fn new(config: S3Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()?;
        Ok(Self { config, http })
    }

    /// Build an `AmazonS3` client for one bucket. SSE-C is configured on the
    /// client, so every request it sends carries the same key and algorithm.
    fn store(&self, bucket: &str, encryption: Option<&CustomerKey>) -> Result<AmazonS3> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&self.config.region)
            .with_endpoint(&self.config.endpoint_url)
            .with_access_key_id(&self.config.access_key_id)
            .with_secret_access_key(&self.config.secret_access_key)
            .with_allow_http(self.config.allow_http())
            .with_virtual_hosted_style_request(false)
            .with_client_options(
                ClientOptions::new()
                    .with_allow_invalid_certificates(self.config.insecure_skip_verify),
            );

        if let Some(enc) = encryption {
            enc.ensure_supported()?;
            builder = builder.with_ssec_encryption(BASE64.encode(enc.key.as_bytes()));
        }

        Ok(builder.build()?)
    }
}

fn not_found_as(key: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound {
            key: key.to_string(),
        },
        other => StorageError::Backend(other),
    }
}

fn to_stored(meta: ObjectMeta) -> StoredObject {
    StoredObject {
        key: meta.location.to_string(),
        last_modified: meta.last_modified,
        size: meta.size as u64,
    }
}

/// Map a 409 CreateBucket response body to the matching error
fn bucket_conflict(bucket: &str, body: &str) -> Option<StorageError> {
    if body.contains("<Code>BucketAlreadyOwnedByYou</Code>") {
        Some(StorageError::BucketAlreadyOwned {
            bucket: bucket.to_string(),
        })
    } else if body.contains("<Code>BucketAlreadyExists</Code>") {
        Some(StorageError::BucketAlreadyExists {
            bucket: bucket.to_string(),
        })
    } else {
        None
    }
}

#[async_trait]
impl ObjectStorage for S3Backend {
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let url = format!("{}/{}", self.config.endpoint_url, bucket);
        let mut request = self.http.put(&url).build()?;

        let credential = AwsCredential {
            key_id: self.config.access_key_id.clone(),
            secret_key: self.config.secret_access_key.clone(),
            token: None,
        };
        AwsAuthorizer::new(&credential, "s3", &self.config.region).authorize(&mut request, None);

        let response = self.http.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            info!(bucket, "created bucket");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_else(|error| {
            debug!(bucket, %error, "failed to read CreateBucket response body");
            String::new()
        });
        if status == reqwest::StatusCode::CONFLICT {
            if let Some(err) = bucket_conflict(bucket, &body) {
                return Err(err);
            }
        }
        Err(StorageError::Request {
            status: status.as_u16(),
            message: body,
        })
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        mut body: ArtifactReader,
        encryption: Option<&CustomerKey>,
    ) -> Result<()> {
        let store = self.store(bucket, encryption)?;
        let path = Path::from(key);
        let upload = store.put_multipart(&path).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.config.part_size);

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut total: u64 = 0;
        loop {
            let n = match body.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    // Leaves no partial object behind.
                    let _ = writer.abort().await;
                    return Err(e.into());
                }
            };
            if let Err(e) = writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await {
                let _ = writer.abort().await;
                return Err(e.into());
            }
            writer.write(&buf[..n]);
            total += n as u64;
        }

        let result = writer.finish().await?;
        debug!(bucket, key, streamed = total, e_tag = ?result.e_tag, "multipart upload completed");
        Ok(())
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        encryption: Option<&CustomerKey>,
    ) -> Result<u64> {
        let store = self.store(bucket, encryption)?;
        let meta = store
            .head(&Path::from(key))
            .await
            .map_err(|e| not_found_as(key, e))?;
        Ok(meta.size as u64)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ListPage> {
        let store = self.store(bucket, None)?;
        let prefix = (!prefix.is_empty()).then(|| Path::from(prefix));
        let stream = match marker {
            Some(m) => store.list_with_offset(prefix.as_ref(), &Path::from(m)),
            None => store.list(prefix.as_ref()),
        };

        let metas: Vec<ObjectMeta> = stream.take(LIST_PAGE_SIZE).try_collect().await?;
        let next_marker = if metas.len() == LIST_PAGE_SIZE {
            metas.last().map(|m| m.location.to_string())
        } else {
            None
        };
        Ok(ListPage {
            objects: metas.into_iter().map(to_stored).collect(),
            next_marker,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let store = self.store(bucket, None)?;
        match store.delete(&Path::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
