//! Retention enforcement
//!
//! Keeps the newest `max` artifacts under a prefix and deletes the rest.
//! Decisions are only made over the complete listing: every page is fetched
//! and merged before anything is sorted or deleted.

use std::cmp::Ordering;

use tracing::{debug, info, warn};

use crate::backend::{ObjectStorage, StoredObject};
use crate::error::Result;

/// What an enforcement pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    /// Number of artifacts found under the prefix
    pub listed: usize,
    /// Keys deleted, oldest last
    pub deleted: Vec<String>,
}

/// Newest first; equal timestamps ordered by ascending key
fn newest_first(a: &StoredObject, b: &StoredObject) -> Ordering {
    b.last_modified
        .cmp(&a.last_modified)
        .then_with(|| a.key.cmp(&b.key))
}

/// Pick the artifacts that fall outside the newest `max`.
///
/// Returns an empty list when `objects.len() <= max`. With `max == 0`
/// every artifact is obsolete.
pub fn select_obsolete(mut objects: Vec<StoredObject>, max: usize) -> Vec<StoredObject> {
    if objects.len() <= max {
        return Vec::new();
    }
    objects.sort_by(newest_first);
    objects.split_off(max)
}

/// Fetch every page of the listing under `prefix`
pub async fn list_all(
    storage: &dyn ObjectStorage,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<StoredObject>> {
    let mut objects = Vec::new();
    let mut marker: Option<String> = None;
    loop {
        let page = storage
            .list_objects(bucket, prefix, marker.as_deref())
            .await?;
        let empty = page.objects.is_empty();
        objects.extend(page.objects);
        match page.next_marker {
            Some(next) if !empty && marker.as_deref() != Some(next.as_str()) => {
                marker = Some(next)
            }
            Some(_) => {
                warn!(bucket, prefix, "listing returned a marker that does not advance, stopping");
                break;
            }
            None => break,
        }
    }
    Ok(objects)
}

/// Delete everything but the newest `max` artifacts under `prefix`.
///
/// Deletes run one at a time. The first failure aborts the pass and is
/// returned; keys already deleted stay deleted and the remainder is picked
/// up by the next pass.
pub async fn enforce_retention(
    storage: &dyn ObjectStorage,
    bucket: &str,
    prefix: &str,
    max: usize,
) -> Result<RetentionOutcome> {
    let objects = list_all(storage, bucket, prefix).await?;
    let listed = objects.len();
    let obsolete = select_obsolete(objects, max);
    if obsolete.is_empty() {
        debug!(bucket, prefix, listed, max, "retention satisfied");
        return Ok(RetentionOutcome {
            listed,
            deleted: Vec::new(),
        });
    }

    info!(
        bucket,
        prefix,
        listed,
        max,
        obsolete = obsolete.len(),
        "pruning obsolete artifacts"
    );
    let mut deleted = Vec::with_capacity(obsolete.len());
    for object in obsolete {
        storage.delete_object(bucket, &object.key).await?;
        debug!(bucket, key = %object.key, "deleted artifact");
        deleted.push(object.key);
    }
    Ok(RetentionOutcome { listed, deleted })
}
