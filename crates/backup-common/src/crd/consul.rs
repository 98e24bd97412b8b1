//! ConsulBackupPlan Custom Resource Definition
//!
//! Periodically snapshots a Consul cluster through its HTTP snapshot API.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BackupPlanSpec, BackupPlanStatus};

/// Specification for a ConsulBackupPlan
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "backup.kubism.io",
    version = "v1alpha1",
    kind = "ConsulBackupPlan",
    plural = "consulbackupplans",
    shortname = "cbp",
    namespaced,
    status = "BackupPlanStatus",
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Retention","type":"integer","jsonPath":".spec.retention"}"#,
    printcolumn = r#"{"name":"CronJob","type":"string","jsonPath":".status.cronJob.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConsulBackupPlanSpec {
    /// Fields shared with every plan kind
    #[serde(flatten)]
    pub common: BackupPlanSpec,

    /// Consul HTTP address, e.g. `consul-server:8500` or `https://consul:8501`
    pub address: String,
}
