//! The capability set every backup plan kind exposes
//!
//! The reconciler and the synthesizer are written against [`BackupPlan`]
//! only; they never match on a concrete kind. Adding a new source means
//! adding a CRD and one `impl_backup_plan!` line.

use std::fmt::Debug;

use kube::core::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crd::{
    BackupPlanSpec, BackupPlanStatus, ConsulBackupPlan, ConsulBackupPlanSpec, MongoDBBackupPlan,
    MongoDBBackupPlanSpec,
};

/// A namespaced plan resource the controller can converge
pub trait BackupPlan:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Full kind-specific spec, serialized verbatim into the owned Secret
    type Spec: Serialize + DeserializeOwned + PartialEq + Clone + Debug + Send + Sync + 'static;

    /// Kubernetes kind name, e.g. `MongoDBBackupPlan`
    const KIND: &'static str;

    /// Short source name used in resource names and metric labels
    const SOURCE: &'static str;

    /// The kind-specific spec
    fn plan_spec(&self) -> &Self::Spec;

    /// The fields shared by every kind
    fn common_spec(&self) -> &BackupPlanSpec;

    /// Current status, absent until the first successful convergence
    fn plan_status(&self) -> Option<&BackupPlanStatus>;

    /// Replace the status
    fn set_plan_status(&mut self, status: BackupPlanStatus);

    /// A zero-valued instance of the same kind
    fn new_empty() -> Self;

    /// Kind name of this instance
    fn plan_kind(&self) -> &'static str {
        Self::KIND
    }

    /// Replace the finalizer list
    fn set_finalizers(&mut self, finalizers: Vec<String>) {
        *self.finalizers_mut() = finalizers;
    }

    /// Whether `finalizer` is present
    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// `namespace/name`, used in logs and errors
    fn plan_ref(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }
}

macro_rules! impl_backup_plan {
    ($plan:ty, $spec:ty, $kind:literal, $source:literal) => {
        impl BackupPlan for $plan {
            type Spec = $spec;
            const KIND: &'static str = $kind;
            const SOURCE: &'static str = $source;

            fn plan_spec(&self) -> &Self::Spec {
                &self.spec
            }

            fn common_spec(&self) -> &BackupPlanSpec {
                &self.spec.common
            }

            fn plan_status(&self) -> Option<&BackupPlanStatus> {
                self.status.as_ref()
            }

            fn set_plan_status(&mut self, status: BackupPlanStatus) {
                self.status = Some(status);
            }

            fn new_empty() -> Self {
                <$plan>::new("", <$spec>::default())
            }
        }
    };
}

impl_backup_plan!(
    ConsulBackupPlan,
    ConsulBackupPlanSpec,
    "ConsulBackupPlan",
    "consul"
);
impl_backup_plan!(
    MongoDBBackupPlan,
    MongoDBBackupPlanSpec,
    "MongoDBBackupPlan",
    "mongodb"
);
