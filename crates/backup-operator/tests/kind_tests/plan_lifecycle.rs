//! Integration tests for the plan lifecycle
//!
//! These tests tell the story of a platform team managing backup plans
//! against a running controller: the plan is picked up, converged into a
//! Secret and a CronJob, kept in sync, and cleaned up on deletion.

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};

use backup_common::crd::{
    BackupPlanSpec, Destination, MongoDBBackupPlan, MongoDBBackupPlanSpec, ObjectRef,
    S3Destination,
};
use backup_common::{BackupPlan, PLAN_FINALIZER, SECRET_FIELD_NAME};

use super::helpers::{ensure_test_cluster, fresh_namespace, spawn_controllers, wait_for};

// =============================================================================
// Test Fixtures
// =============================================================================

fn sample_plan(name: &str, namespace: &str) -> MongoDBBackupPlan {
    MongoDBBackupPlan {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: MongoDBBackupPlanSpec {
            common: BackupPlanSpec {
                schedule: "* * * * *".to_string(),
                active_deadline_seconds: 3600,
                retention: 2,
                destination: Destination {
                    s3: Some(S3Destination {
                        endpoint: "minio.backup.svc:9000".to_string(),
                        bucket: "test".to_string(),
                        access_key_id: "TESTACCESSKEY".to_string(),
                        secret_access_key: "TESTSECRETKEY".to_string(),
                        part_size: 5_242_880,
                        ..Default::default()
                    }),
                },
                ..Default::default()
            },
            uri: "mongodb://mongo.backup.svc:27017".to_string(),
        },
        status: None,
    }
}

// =============================================================================
// Lifecycle Stories
// =============================================================================

/// Story: a team creates a MongoDB backup plan and later removes it
///
/// Expected behavior:
/// - The controller claims the plan with its finalizer
/// - A Secret holding the spec and a CronJob on the plan's schedule appear
/// - Status references both owned resources
/// - Editing the schedule updates the CronJob in place
/// - Deleting the plan removes both owned resources and then the plan
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test -p backup-operator --test kind -- --ignored"]
async fn story_team_creates_and_deletes_mongodb_plan() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = "backup-lifecycle";
    fresh_namespace(&client, namespace).await;
    let controllers = spawn_controllers(client.clone());

    let plans: Api<MongoDBBackupPlan> = Api::namespaced(client.clone(), namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let cron_jobs: Api<CronJob> = Api::namespaced(client.clone(), namespace);
    let owned_name = "nightly-mongodb-backup";

    let plan = sample_plan("nightly", namespace);
    plans
        .create(&PostParams::default(), &plan)
        .await
        .expect("failed to create plan");

    wait_for("plan to converge", || async {
        plans.get("nightly").await.is_ok_and(|p| {
            p.has_finalizer(PLAN_FINALIZER)
                && p.status.as_ref().and_then(|s| s.cron_job.clone())
                    == Some(ObjectRef::new(namespace, owned_name))
        })
    })
    .await;

    let secret = secrets.get(owned_name).await.expect("secret exists");
    let payload = &secret.data.expect("secret has data")[SECRET_FIELD_NAME].0;
    let stored: MongoDBBackupPlanSpec = serde_json::from_slice(payload).unwrap();
    assert_eq!(stored, plan.spec);

    let cron_job = cron_jobs.get(owned_name).await.expect("cron job exists");
    assert_eq!(cron_job.spec.unwrap().schedule, "* * * * *");

    let patch = serde_json::json!({ "spec": { "schedule": "0 3 * * *" } });
    plans
        .patch("nightly", &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .expect("failed to edit plan");
    wait_for("cron job to follow the schedule edit", || async {
        cron_jobs
            .get(owned_name)
            .await
            .is_ok_and(|c| c.spec.is_some_and(|s| s.schedule == "0 3 * * *"))
    })
    .await;

    plans
        .delete("nightly", &DeleteParams::default())
        .await
        .expect("failed to delete plan");
    wait_for("plan and owned resources to be gone", || async {
        plans.get_opt("nightly").await.ok().flatten().is_none()
            && secrets.get_opt(owned_name).await.ok().flatten().is_none()
            && cron_jobs.get_opt(owned_name).await.ok().flatten().is_none()
    })
    .await;

    for handle in controllers {
        handle.abort();
    }
}

/// Story: a Secret with the plan's resource name already belongs to someone else
///
/// Expected behavior:
/// - The controller refuses to take it over and creates no CronJob
/// - The foreign Secret survives deletion of the plan
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test -p backup-operator --test kind -- --ignored"]
async fn story_foreign_secret_blocks_convergence() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = "backup-conflict";
    fresh_namespace(&client, namespace).await;
    let controllers = spawn_controllers(client.clone());

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let cron_jobs: Api<CronJob> = Api::namespaced(client.clone(), namespace);
    let plans: Api<MongoDBBackupPlan> = Api::namespaced(client.clone(), namespace);

    let foreign = Secret {
        metadata: ObjectMeta {
            name: Some("taken-mongodb-backup".to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    secrets
        .create(&PostParams::default(), &foreign)
        .await
        .expect("failed to create foreign secret");

    plans
        .create(&PostParams::default(), &sample_plan("taken", namespace))
        .await
        .expect("failed to create plan");

    wait_for("finalizer to be added", || async {
        plans
            .get("taken")
            .await
            .is_ok_and(|p| p.has_finalizer(PLAN_FINALIZER))
    })
    .await;
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    assert!(cron_jobs
        .get_opt("taken-mongodb-backup")
        .await
        .unwrap()
        .is_none());

    plans
        .delete("taken", &DeleteParams::default())
        .await
        .expect("failed to delete plan");
    wait_for("plan to be released", || async {
        plans.get_opt("taken").await.ok().flatten().is_none()
    })
    .await;
    assert!(secrets
        .get_opt("taken-mongodb-backup")
        .await
        .unwrap()
        .is_some());

    for handle in controllers {
        handle.abort();
    }
}
