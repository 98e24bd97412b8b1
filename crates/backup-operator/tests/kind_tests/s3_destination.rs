//! Integration tests for the S3 destination
//!
//! These run against a real S3-compatible endpoint and tell the story of a
//! backup job storing encrypted artifacts and pruning old ones.

use std::time::Duration;

use backup_common::crd::S3Destination;
use backup_destination::{Artifact, BackupDestination};

fn endpoint() -> Option<S3Destination> {
    let endpoint = std::env::var("BACKUP_TEST_S3_ENDPOINT").ok()?;
    Some(S3Destination {
        endpoint,
        bucket: "backup-integration".to_string(),
        access_key_id: std::env::var("BACKUP_TEST_S3_ACCESS_KEY")
            .unwrap_or_else(|_| "minioadmin".to_string()),
        secret_access_key: std::env::var("BACKUP_TEST_S3_SECRET_KEY")
            .unwrap_or_else(|_| "minioadmin".to_string()),
        part_size: 5_242_880,
        ..Default::default()
    })
}

fn artifact(id: &str, len: usize) -> Artifact {
    let data: &'static [u8] = Vec::leak(vec![7u8; len]);
    Artifact {
        id: id.to_string(),
        data: Box::pin(data),
    }
}

/// Story: an encrypted artifact larger than one part is stored and its
/// size is read back with the same customer key
#[tokio::test]
#[ignore = "requires an S3 endpoint - set BACKUP_TEST_S3_ENDPOINT"]
async fn story_encrypted_multipart_upload_reports_size() {
    let Some(mut dest) = endpoint() else {
        println!("BACKUP_TEST_S3_ENDPOINT not set, skipping");
        return;
    };
    dest.encryption_key = Some("0123456789abcdef0123456789abcdef".to_string());

    let destination = BackupDestination::s3(&dest, "sse-c")
        .await
        .expect("failed to connect destination");
    let size = destination
        .store(artifact("large.bin", 12 * 1024 * 1024))
        .await
        .expect("upload failed");

    assert_eq!(size, 12 * 1024 * 1024);
}

/// Story: a plan keeping two artifacts prunes the oldest after the third run
#[tokio::test]
#[ignore = "requires an S3 endpoint - set BACKUP_TEST_S3_ENDPOINT"]
async fn story_retention_keeps_newest_two() {
    let Some(dest) = endpoint() else {
        println!("BACKUP_TEST_S3_ENDPOINT not set, skipping");
        return;
    };
    let prefix = format!("retention-{}", chrono::Utc::now().timestamp());
    let destination = BackupDestination::s3(&dest, prefix.clone())
        .await
        .expect("failed to connect destination");

    for id in ["first", "second", "third"] {
        destination.store(artifact(id, 16)).await.expect("upload failed");
        // last-modified has second resolution
        tokio::time::sleep(Duration::from_millis(1100)).await;
    }

    let outcome = destination.ensure_retention(2).await.expect("retention failed");
    assert_eq!(outcome.listed, 3);
    assert_eq!(outcome.deleted, vec![format!("{prefix}/first")]);

    let again = destination.ensure_retention(2).await.expect("retention failed");
    assert_eq!(again.listed, 2);
    assert!(again.deleted.is_empty());
}
