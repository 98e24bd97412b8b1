//! MongoDBBackupPlan Custom Resource Definition
//!
//! Dumps a MongoDB deployment with `mongodump --archive --gzip`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BackupPlanSpec, BackupPlanStatus};

/// Specification for a MongoDBBackupPlan
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "backup.kubism.io",
    version = "v1alpha1",
    kind = "MongoDBBackupPlan",
    plural = "mongodbbackupplans",
    shortname = "mbp",
    namespaced,
    status = "BackupPlanStatus",
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Retention","type":"integer","jsonPath":".spec.retention"}"#,
    printcolumn = r#"{"name":"CronJob","type":"string","jsonPath":".status.cronJob.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBBackupPlanSpec {
    /// Fields shared with every plan kind
    #[serde(flatten)]
    pub common: BackupPlanSpec,

    /// Connection string passed to mongodump. `$VAR` and `${VAR}` are
    /// expanded from the job environment, so credentials can come from `env`.
    pub uri: String,
}
