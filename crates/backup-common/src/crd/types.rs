//! Spec and status types shared by every backup plan kind

use k8s_openapi::api::core::v1::EnvVar;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default multipart upload part size (5 MiB, the S3 minimum)
pub const DEFAULT_PART_SIZE: i64 = 5 * 1024 * 1024;

fn default_part_size() -> i64 {
    DEFAULT_PART_SIZE
}

/// Common specification embedded (flattened) in every plan kind
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupPlanSpec {
    /// Cron expression, interpreted by the CronJob controller
    pub schedule: String,

    /// Deadline for a single backup run, in seconds
    pub active_deadline_seconds: i64,

    /// Number of artifacts to keep in the destination (0 keeps all)
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub retention: i32,

    /// Where artifacts are written
    pub destination: Destination,

    /// Optional Prometheus Pushgateway receiving run metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushgateway: Option<Pushgateway>,

    /// Environment variables copied into the backup container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Destination descriptor; exactly one backend is expected to be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// S3-compatible object storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Destination>,
}

/// S3-compatible object storage destination
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Destination {
    /// Host (and optional port) of the S3 endpoint, without scheme
    pub endpoint: String,

    /// Bucket receiving the artifacts; created when missing
    pub bucket: String,

    /// Key prefix under which this plan's artifacts live
    #[serde(default)]
    pub prefix: String,

    /// Talk HTTPS to the endpoint
    #[serde(default, rename = "useSSL")]
    pub use_ssl: bool,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Access key id
    #[serde(rename = "accessKeyID")]
    pub access_key_id: String,

    /// Secret access key
    pub secret_access_key: String,

    /// SSE-C customer key (raw key material, 32 bytes for AES256)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,

    /// SSE-C algorithm; AES256 when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_algorithm: Option<String>,

    /// Multipart upload part size in bytes
    #[serde(default = "default_part_size")]
    pub part_size: i64,
}

/// Prometheus Pushgateway target
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pushgateway {
    /// Base URL of the Pushgateway, e.g. `http://pushgateway:9091`
    #[serde(default)]
    pub url: String,
}

/// Reference to a namespaced object owned by a plan
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectRef {
    /// Build a reference from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Observed state of a plan, written only by the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupPlanStatus {
    /// Owned Secret holding the serialized spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<ObjectRef>,

    /// Owned CronJob running the backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_job: Option<ObjectRef>,
}

impl BackupPlanStatus {
    /// Status referencing both owned resources
    pub fn converged(secret: ObjectRef, cron_job: ObjectRef) -> Self {
        Self {
            secret: Some(secret),
            cron_job: Some(cron_job),
        }
    }
}
