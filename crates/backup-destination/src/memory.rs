//! In-memory [`ObjectStorage`] used by unit tests
//!
//! Behaves like S3 where the tests care: keys are listed in ascending order
//! in pages of `page_size`, SSE-C parameters used on upload must be repeated
//! on head, and delete of a missing key succeeds.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::io::AsyncReadExt;

use crate::backend::{ArtifactReader, CustomerKey, ListPage, ObjectStorage, StoredObject};
use crate::error::{Result, StorageError};

struct Entry {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
    encryption: Option<CustomerKey>,
}

#[derive(Default)]
struct State {
    buckets: BTreeSet<String>,
    objects: BTreeMap<(String, String), Entry>,
    clock: i64,
    list_calls: usize,
    deleted: Vec<String>,
    head_encryption: Vec<Option<CustomerKey>>,
    upload_encryption: Vec<Option<CustomerKey>>,
}

pub(crate) struct MemoryStorage {
    page_size: usize,
    state: Mutex<State>,
    failing_deletes: HashSet<String>,
    create_bucket_error: Option<fn(&str) -> StorageError>,
}

impl MemoryStorage {
    pub(crate) fn new(page_size: usize) -> Self {
        Self {
            page_size,
            state: Mutex::new(State::default()),
            failing_deletes: HashSet::new(),
            create_bucket_error: None,
        }
    }

    pub(crate) fn fail_delete_of(mut self, key: &str) -> Self {
        self.failing_deletes.insert(key.to_string());
        self
    }

    pub(crate) fn fail_create_bucket(mut self, err: fn(&str) -> StorageError) -> Self {
        self.create_bucket_error = Some(err);
        self
    }

    /// Timestamp `secs` seconds after a fixed epoch
    pub(crate) fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    pub(crate) fn insert(&self, bucket: &str, key: &str, last_modified: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        state.buckets.insert(bucket.to_string());
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            Entry {
                data: key.as_bytes().to_vec(),
                last_modified,
                encryption: None,
            },
        );
    }

    pub(crate) fn keys(&self, bucket: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub(crate) fn has_bucket(&self, bucket: &str) -> bool {
        self.state.lock().unwrap().buckets.contains(bucket)
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub(crate) fn upload_encryption(&self) -> Vec<Option<CustomerKey>> {
        self.state.lock().unwrap().upload_encryption.clone()
    }

    pub(crate) fn head_encryption(&self) -> Vec<Option<CustomerKey>> {
        self.state.lock().unwrap().head_encryption.clone()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        if let Some(err) = self.create_bucket_error {
            return Err(err(bucket));
        }
        let mut state = self.state.lock().unwrap();
        if !state.buckets.insert(bucket.to_string()) {
            return Err(StorageError::BucketAlreadyOwned {
                bucket: bucket.to_string(),
            });
        }
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        mut body: ArtifactReader,
        encryption: Option<&CustomerKey>,
    ) -> Result<()> {
        if let Some(enc) = encryption {
            enc.ensure_supported()?;
        }
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;

        let mut state = self.state.lock().unwrap();
        if !state.buckets.contains(bucket) {
            return Err(StorageError::NotFound {
                key: bucket.to_string(),
            });
        }
        state.clock += 1;
        let last_modified = Self::at(1_000_000 + state.clock);
        state.upload_encryption.push(encryption.cloned());
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            Entry {
                data,
                last_modified,
                encryption: encryption.cloned(),
            },
        );
        Ok(())
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        encryption: Option<&CustomerKey>,
    ) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.head_encryption.push(encryption.cloned());
        let entry = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;
        if entry.encryption.as_ref() != encryption {
            return Err(StorageError::Request {
                status: 400,
                message: "SSE-C parameters do not match the stored object".to_string(),
            });
        }
        Ok(entry.data.len() as u64)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<ListPage> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        let mut objects: Vec<StoredObject> = state
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .filter(|((_, k), _)| marker.map_or(true, |m| k.as_str() > m))
            .take(self.page_size + 1)
            .map(|((_, k), e)| StoredObject {
                key: k.clone(),
                last_modified: e.last_modified,
                size: e.data.len() as u64,
            })
            .collect();

        let next_marker = if objects.len() > self.page_size {
            objects.truncate(self.page_size);
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_marker,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        if self.failing_deletes.contains(key) {
            return Err(StorageError::Request {
                status: 503,
                message: format!("SlowDown while deleting {key}"),
            });
        }
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        state.deleted.push(key.to_string());
        Ok(())
    }
}
