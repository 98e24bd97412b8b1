//! Desired-state synthesis for a plan's owned Secret and CronJob
//!
//! Everything here is pure: the same plan always yields byte-identical
//! resources, which is what lets the reconciler detect no-op passes.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, Secret, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::ResourceExt;

use backup_common::kube_utils::deterministic_hash;
use backup_common::{
    BackupPlan, Error, Result, KIND_LABEL_KEY, MANAGED_BY, PLAN_LABEL_KEY, SECRET_FIELD_NAME,
    SPEC_HASH_ANNOTATION,
};

/// Directory the plan Secret is mounted at inside the job container
pub const CONFIG_MOUNT_PATH: &str = "/etc/backup-operator";

/// Volume name of the mounted plan Secret
pub const CONFIG_VOLUME_NAME: &str = "plan-config";

/// Name of the backup container
pub const CONTAINER_NAME: &str = "backup";

/// Env var carrying the plan name into the job
pub const PLAN_NAME_ENV: &str = "BACKUP_PLAN_NAME";

/// Env var carrying the plan namespace into the job
pub const PLAN_NAMESPACE_ENV: &str = "BACKUP_PLAN_NAMESPACE";

/// Operator-level settings for the generated job pods
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobTemplateConfig {
    /// Image running `backup-operator run`
    pub image: String,
    /// Pull policy for that image
    pub image_pull_policy: Option<String>,
    /// Service account for the job pods
    pub service_account: Option<String>,
}

impl Default for JobTemplateConfig {
    fn default() -> Self {
        Self {
            image: "ghcr.io/kubism/backup-operator:latest".to_string(),
            image_pull_policy: None,
            service_account: None,
        }
    }
}

/// Name shared by a plan's Secret and CronJob: `<plan>-<source>-backup`
pub fn resource_name<P: BackupPlan>(plan: &P) -> String {
    format!("{}-{}-backup", plan.name_any(), P::SOURCE)
}

/// Path of the serialized spec inside the job container
pub fn config_path() -> String {
    format!("{CONFIG_MOUNT_PATH}/{SECRET_FIELD_NAME}")
}

/// Labels put on every owned resource and job pod
pub fn labels<P: BackupPlan>(plan: &P) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/managed-by".to_string(),
            MANAGED_BY.to_string(),
        ),
        (PLAN_LABEL_KEY.to_string(), plan.name_any()),
        (KIND_LABEL_KEY.to_string(), P::KIND.to_string()),
    ])
}

fn namespace_of<P: BackupPlan>(plan: &P) -> Result<String> {
    plan.namespace()
        .ok_or_else(|| Error::validation_for(plan.plan_ref(), "plan has no namespace"))
}

fn owner_reference<P: BackupPlan>(plan: &P) -> Result<OwnerReference> {
    let mut owner = plan
        .controller_owner_ref(&())
        .ok_or_else(|| Error::validation_for(plan.plan_ref(), "plan has no uid yet"))?;
    owner.block_owner_deletion = Some(true);
    Ok(owner)
}

fn owned_meta<P: BackupPlan>(plan: &P) -> Result<ObjectMeta> {
    Ok(ObjectMeta {
        name: Some(resource_name(plan)),
        namespace: Some(namespace_of(plan)?),
        labels: Some(labels(plan)),
        owner_references: Some(vec![owner_reference(plan)?]),
        ..Default::default()
    })
}

/// JSON payload stored in the Secret: the plan spec and nothing else
pub fn serialize_spec<P: BackupPlan>(plan: &P) -> Result<Vec<u8>> {
    serde_json::to_vec(plan.plan_spec())
        .map_err(|e| Error::serialization_for_kind(P::KIND, e.to_string()))
}

/// Decode a payload produced by [`serialize_spec`]
pub fn deserialize_spec<P: BackupPlan>(payload: &[u8]) -> Result<P::Spec> {
    serde_json::from_slice(payload)
        .map_err(|e| Error::serialization_for_kind(P::KIND, e.to_string()))
}

/// The Secret holding the plan's serialized spec
pub fn desired_secret<P: BackupPlan>(plan: &P) -> Result<Secret> {
    Ok(Secret {
        metadata: owned_meta(plan)?,
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(
            SECRET_FIELD_NAME.to_string(),
            ByteString(serialize_spec(plan)?),
        )])),
        ..Default::default()
    })
}

fn container_env<P: BackupPlan>(plan: &P, namespace: &str) -> Vec<EnvVar> {
    let mut env = plan.common_spec().env.clone();
    env.push(EnvVar {
        name: PLAN_NAME_ENV.to_string(),
        value: Some(plan.name_any()),
        value_from: None,
    });
    env.push(EnvVar {
        name: PLAN_NAMESPACE_ENV.to_string(),
        value: Some(namespace.to_string()),
        value_from: None,
    });
    env
}

/// The CronJob running the backup on the plan's schedule.
///
/// The container only gets the kind and the path of the mounted Secret;
/// credentials never appear in args or metadata. The spec hash is stored
/// as an annotation for change detection.
pub fn desired_cron_job<P: BackupPlan>(plan: &P, job: &JobTemplateConfig) -> Result<CronJob> {
    let namespace = namespace_of(plan)?;
    let name = resource_name(plan);
    let common = plan.common_spec();
    let pod_labels = labels(plan);

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(job.image.clone()),
        image_pull_policy: job.image_pull_policy.clone(),
        args: Some(vec![
            "run".to_string(),
            "--kind".to_string(),
            P::KIND.to_string(),
            "--config".to_string(),
            config_path(),
        ]),
        env: Some(container_env(plan, &namespace)),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME_NAME.to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let spec = CronJobSpec {
        schedule: common.schedule.clone(),
        concurrency_policy: Some("Forbid".to_string()),
        suspend: Some(false),
        job_template: JobTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(pod_labels.clone()),
                ..Default::default()
            }),
            spec: Some(JobSpec {
                active_deadline_seconds: Some(common.active_deadline_seconds),
                backoff_limit: Some(0),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        service_account_name: job.service_account.clone(),
                        containers: vec![container],
                        volumes: Some(vec![Volume {
                            name: CONFIG_VOLUME_NAME.to_string(),
                            secret: Some(SecretVolumeSource {
                                secret_name: Some(name),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
        },
        ..Default::default()
    };

    let spec_json = serde_json::to_string(&spec)
        .map_err(|e| Error::serialization_for_kind("CronJob", e.to_string()))?;

    let mut metadata = owned_meta(plan)?;
    metadata.annotations = Some(BTreeMap::from([(
        SPEC_HASH_ANNOTATION.to_string(),
        deterministic_hash(&spec_json),
    )]));

    Ok(CronJob {
        metadata,
        spec: Some(spec),
        status: None,
    })
}
