//! Custom Resource Definitions for backup plans

mod consul;
mod mongodb;
mod types;

pub use consul::{ConsulBackupPlan, ConsulBackupPlanSpec};
pub use mongodb::{MongoDBBackupPlan, MongoDBBackupPlanSpec};
pub use types::{
    BackupPlanSpec, BackupPlanStatus, Destination, ObjectRef, Pushgateway, S3Destination,
    DEFAULT_PART_SIZE,
};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// All plan CRDs served by the operator
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![ConsulBackupPlan::crd(), MongoDBBackupPlan::crd()]
}
