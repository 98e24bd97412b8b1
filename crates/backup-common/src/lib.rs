//! Common types for the backup operator: CRDs, the plan abstraction, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod plan;
pub mod telemetry;

pub use error::Error;
pub use plan::BackupPlan;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of all backup plan CRDs
pub const API_GROUP: &str = "backup.kubism.io";

/// Finalizer held by a plan while it owns a Secret and a CronJob
pub const PLAN_FINALIZER: &str = "backup.kubism.io/finalizer";

/// Key in the owned Secret holding the serialized plan spec
pub const SECRET_FIELD_NAME: &str = "plan.json";

/// Label value identifying resources created by this operator
pub const MANAGED_BY: &str = "backup-operator";

/// Label key carrying the owning plan's name
pub const PLAN_LABEL_KEY: &str = "backup.kubism.io/plan";

/// Label key carrying the owning plan's kind
pub const KIND_LABEL_KEY: &str = "backup.kubism.io/kind";

/// Annotation on the owned CronJob holding the hash of its desired spec
pub const SPEC_HASH_ANNOTATION: &str = "backup.kubism.io/spec-hash";

/// Requeue interval after a retryable reconcile error (30 seconds)
pub const REQUEUE_ERROR_SECS: u64 = 30;

/// Requeue interval after a validation error that needs human attention (5 minutes)
pub const REQUEUE_VALIDATION_SECS: u64 = 300;
