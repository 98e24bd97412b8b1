//! Backup operator: controller process and backup job runtime
//!
//! The same binary runs in two roles. As `controller` it converges plans
//! into Secrets and CronJobs; as `run` it is the command those CronJobs
//! execute.

#![deny(missing_docs)]

pub mod crds;
pub mod worker;

pub use crds::{ensure_crds_installed, render_crds};
