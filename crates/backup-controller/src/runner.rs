//! Controller construction for one plan kind
//!
//! Each plan controller watches its CRD plus the Secrets and CronJobs it
//! owns, so drift or deletion of an owned resource triggers a reconcile.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use backup_common::{BackupPlan, MANAGED_BY};

use crate::reconciler::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A running controller, boxed so controllers of different kinds compose
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Label selector matching resources created by the operator
pub fn managed_selector() -> String {
    format!("app.kubernetes.io/managed-by={MANAGED_BY}")
}

/// Build the controller future for plan kind `P`
pub fn plan_controller<P: BackupPlan>(client: Client, ctx: Arc<Context>) -> ControllerFuture {
    let plans: Api<P> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let cron_jobs: Api<CronJob> = Api::all(client);
    let owned = WatcherConfig::default()
        .labels(&managed_selector())
        .timeout(WATCH_TIMEOUT_SECS);

    tracing::info!(kind = P::KIND, "- {} controller", P::KIND);

    Box::pin(
        Controller::new(plans, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .owns(secrets, owned.clone())
            .owns(cron_jobs, owned)
            .shutdown_on_signal()
            .run(reconcile::<P>, error_policy::<P>, ctx)
            .for_each(log_reconcile_result(P::KIND)),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
