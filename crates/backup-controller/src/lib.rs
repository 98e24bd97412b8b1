//! Backup plan controller
//!
//! Converges every registered plan kind into an owned Secret holding the
//! serialized spec and an owned CronJob that runs the backup job.
//!
//! - **resources**: pure synthesis of the desired Secret and CronJob
//! - **client**: [`KubeClient`], the cluster operations the reconciler uses
//! - **reconciler**: finalizer handling, convergence and teardown
//! - **registry**: the explicit set of plan kinds to run
//! - **runner**: kube-runtime controller wiring per kind

#![deny(missing_docs)]

pub mod client;
pub mod reconciler;
pub mod registry;
pub mod resources;
pub mod runner;

#[cfg(test)]
mod fake;

pub use client::{KubeClient, KubeClientImpl};
pub use reconciler::{error_policy, reconcile, Context, PlanState};
pub use registry::{PlanKind, PlanRegistry};
pub use resources::JobTemplateConfig;
pub use runner::ControllerFuture;
