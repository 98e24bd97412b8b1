//! Backup plan reconciliation
//!
//! One generic reconcile function serves every plan kind. Each pass derives
//! a [`PlanState`] from the observed object and acts on it:
//!
//! ```text
//! Absent ──add finalizer──▶ Converging ──upsert Secret, CronJob, status──▶ Converged
//!                                                                            │
//!            Absent ◀──remove finalizer── Terminating ◀──deletionTimestamp───┘
//! ```
//!
//! Every step is an idempotent upsert or delete computed from scratch, so a
//! pass may be repeated at any point without observable change.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::discovery::ApiResource;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use backup_common::crd::{BackupPlanStatus, ObjectRef};
use backup_common::kube_utils::{annotation, covers, is_controlled_by};
use backup_common::{
    BackupPlan, Error, Result, PLAN_FINALIZER, REQUEUE_ERROR_SECS, REQUEUE_VALIDATION_SECS,
    SPEC_HASH_ANNOTATION,
};

use crate::client::{KubeClient, KubeClientImpl};
use crate::resources::{desired_cron_job, desired_secret, resource_name, JobTemplateConfig};

/// Lifecycle state of a plan, derived purely from the observed object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanState {
    /// Not yet claimed: no finalizer, not being deleted
    Absent,
    /// Finalizer present, owned resources not yet recorded in status
    Converging,
    /// Finalizer present and status references both owned resources
    Converged,
    /// Deletion requested while the finalizer is still held
    Terminating,
    /// Deletion requested and the finalizer is already released
    Released,
}

impl PlanState {
    /// Classify `plan`
    pub fn observe<P: BackupPlan>(plan: &P) -> Self {
        let deleting = plan.meta().deletion_timestamp.is_some();
        let claimed = plan.has_finalizer(PLAN_FINALIZER);
        match (deleting, claimed) {
            (true, true) => Self::Terminating,
            (true, false) => Self::Released,
            (false, false) => Self::Absent,
            (false, true) => {
                let converged = plan
                    .plan_status()
                    .is_some_and(|s| s.secret.is_some() && s.cron_job.is_some());
                if converged {
                    Self::Converged
                } else {
                    Self::Converging
                }
            }
        }
    }
}

/// Shared context for every plan controller
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Settings applied to every generated job pod
    pub job: JobTemplateConfig,
}

impl Context {
    /// Create a context backed by a real client
    pub fn new(client: Client, job: JobTemplateConfig) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
            job,
        }
    }

    /// Create a context around any [`KubeClient`]
    pub fn with_kube_client(kube: Arc<dyn KubeClient>, job: JobTemplateConfig) -> Self {
        Self { kube, job }
    }
}

/// Reconcile one backup plan
///
/// Returns `Action::await_change()` on success; the watch on the plan and on
/// its owned resources drives the next pass.
#[instrument(skip(plan, ctx), fields(plan = %plan.plan_ref(), kind = P::KIND))]
pub async fn reconcile<P: BackupPlan>(plan: Arc<P>, ctx: Arc<Context>) -> Result<Action> {
    let state = PlanState::observe(plan.as_ref());
    debug!(?state, "reconciling plan");

    match state {
        PlanState::Released => Ok(Action::await_change()),
        PlanState::Terminating => {
            teardown(plan.as_ref(), &ctx).await?;
            Ok(Action::await_change())
        }
        PlanState::Absent => {
            add_finalizer(plan.as_ref(), &ctx).await?;
            converge(plan.as_ref(), &ctx).await?;
            Ok(Action::await_change())
        }
        PlanState::Converging | PlanState::Converged => {
            converge(plan.as_ref(), &ctx).await?;
            Ok(Action::await_change())
        }
    }
}

/// Error policy shared by every plan controller
///
/// Validation failures need a human to fix the plan or a conflicting
/// resource and are retried slowly; everything else is retried on the
/// normal error interval.
pub fn error_policy<P: BackupPlan>(plan: Arc<P>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        plan = %plan.plan_ref(),
        kind = P::KIND,
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
    } else {
        Action::requeue(Duration::from_secs(REQUEUE_VALIDATION_SECS))
    }
}

fn api_resource<P: BackupPlan>() -> ApiResource {
    ApiResource::erase::<P>(&())
}

fn plan_identity<P: BackupPlan>(plan: &P) -> Result<(String, String, String)> {
    let namespace = plan
        .namespace()
        .ok_or_else(|| Error::validation_for(plan.plan_ref(), "plan has no namespace"))?;
    let uid = plan
        .uid()
        .ok_or_else(|| Error::validation_for(plan.plan_ref(), "plan has no uid"))?;
    Ok((namespace, plan.name_any(), uid))
}

async fn add_finalizer<P: BackupPlan>(plan: &P, ctx: &Context) -> Result<()> {
    let (namespace, name, _) = plan_identity(plan)?;
    let mut finalizers = plan.finalizers().to_vec();
    finalizers.push(PLAN_FINALIZER.to_string());

    info!("adding finalizer");
    ctx.kube
        .patch_plan_finalizers(
            &api_resource::<P>(),
            &namespace,
            &name,
            plan.resource_version(),
            finalizers,
        )
        .await
}

async fn remove_finalizer<P: BackupPlan>(plan: &P, ctx: &Context) -> Result<()> {
    let (namespace, name, _) = plan_identity(plan)?;
    let finalizers: Vec<String> = plan
        .finalizers()
        .iter()
        .filter(|f| *f != PLAN_FINALIZER)
        .cloned()
        .collect();

    info!("removing finalizer");
    ctx.kube
        .patch_plan_finalizers(
            &api_resource::<P>(),
            &namespace,
            &name,
            plan.resource_version(),
            finalizers,
        )
        .await
}

/// Upsert Secret then CronJob, then record both in status
async fn converge<P: BackupPlan>(plan: &P, ctx: &Context) -> Result<()> {
    let (namespace, name, uid) = plan_identity(plan)?;
    let plan_ref = plan.plan_ref();

    let secret = ensure_secret(ctx, desired_secret(plan)?, &uid, &plan_ref).await?;
    let cron_job = ensure_cron_job(ctx, desired_cron_job(plan, &ctx.job)?, &uid, &plan_ref).await?;

    let status = BackupPlanStatus::converged(secret, cron_job);
    if plan.plan_status() != Some(&status) {
        ctx.kube
            .patch_plan_status(&api_resource::<P>(), &namespace, &name, &status)
            .await?;
        info!("plan converged");
    } else {
        debug!("plan already converged");
    }
    Ok(())
}

fn secret_matches(existing: &Secret, desired: &Secret) -> bool {
    existing.data == desired.data
        && existing.type_ == desired.type_
        && labels_contain(&existing.metadata.labels, &desired.metadata.labels)
}

/// The hash annotation catches plan edits; the field comparison catches
/// hand edits of the live CronJob that leave the annotation alone.
fn cron_job_matches(existing: &CronJob, desired: &CronJob) -> bool {
    annotation(&existing.metadata, SPEC_HASH_ANNOTATION).is_some()
        && annotation(&existing.metadata, SPEC_HASH_ANNOTATION)
            == annotation(&desired.metadata, SPEC_HASH_ANNOTATION)
        && labels_contain(&existing.metadata.labels, &desired.metadata.labels)
        && spec_covers(existing, desired)
}

fn spec_covers(existing: &CronJob, desired: &CronJob) -> bool {
    match (
        serde_json::to_value(&existing.spec),
        serde_json::to_value(&desired.spec),
    ) {
        (Ok(observed), Ok(wanted)) => covers(&observed, &wanted),
        _ => false,
    }
}

fn labels_contain(
    existing: &Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired else {
        return true;
    };
    let Some(existing) = existing else {
        return desired.is_empty();
    };
    desired.iter().all(|(k, v)| existing.get(k) == Some(v))
}

fn reference(meta: &ObjectMeta) -> ObjectRef {
    ObjectRef::new(
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

async fn ensure_secret(
    ctx: &Context,
    mut desired: Secret,
    owner_uid: &str,
    plan_ref: &str,
) -> Result<ObjectRef> {
    let target = reference(&desired.metadata);
    match ctx.kube.get_secret(&target.namespace, &target.name).await? {
        None => {
            info!(secret = %target, "creating secret");
            ctx.kube.create_secret(&desired).await?;
        }
        Some(existing) => {
            if !is_controlled_by(&existing.metadata, owner_uid) {
                return Err(Error::validation_for(
                    plan_ref,
                    format!("secret {target} exists and is not controlled by this plan"),
                ));
            }
            if secret_matches(&existing, &desired) {
                debug!(secret = %target, "secret up to date");
            } else {
                info!(secret = %target, "updating secret");
                desired.metadata.resource_version = existing.metadata.resource_version.clone();
                ctx.kube.replace_secret(&desired).await?;
            }
        }
    }
    Ok(target)
}

async fn ensure_cron_job(
    ctx: &Context,
    mut desired: CronJob,
    owner_uid: &str,
    plan_ref: &str,
) -> Result<ObjectRef> {
    let target = reference(&desired.metadata);
    match ctx.kube.get_cron_job(&target.namespace, &target.name).await? {
        None => {
            info!(cron_job = %target, "creating cron job");
            ctx.kube.create_cron_job(&desired).await?;
        }
        Some(existing) => {
            if !is_controlled_by(&existing.metadata, owner_uid) {
                return Err(Error::validation_for(
                    plan_ref,
                    format!("cron job {target} exists and is not controlled by this plan"),
                ));
            }
            if cron_job_matches(&existing, &desired) {
                debug!(cron_job = %target, "cron job up to date");
            } else {
                info!(cron_job = %target, "updating cron job");
                desired.metadata.resource_version = existing.metadata.resource_version.clone();
                ctx.kube.replace_cron_job(&desired).await?;
            }
        }
    }
    Ok(target)
}

/// Delete owned resources, then release the finalizer.
///
/// Targets come from status, or the deterministic names when status was
/// never written. Resources the plan does not control are left alone.
async fn teardown<P: BackupPlan>(plan: &P, ctx: &Context) -> Result<()> {
    let (namespace, _, uid) = plan_identity(plan)?;
    let default_ref = ObjectRef::new(namespace, resource_name(plan));
    let status = plan.plan_status();
    let secret_ref = status
        .and_then(|s| s.secret.clone())
        .unwrap_or_else(|| default_ref.clone());
    let cron_job_ref = status
        .and_then(|s| s.cron_job.clone())
        .unwrap_or(default_ref);

    match ctx
        .kube
        .get_cron_job(&cron_job_ref.namespace, &cron_job_ref.name)
        .await?
    {
        Some(existing) if is_controlled_by(&existing.metadata, &uid) => {
            info!(cron_job = %cron_job_ref, "deleting cron job");
            ctx.kube
                .delete_cron_job(&cron_job_ref.namespace, &cron_job_ref.name)
                .await?;
        }
        Some(_) => warn!(cron_job = %cron_job_ref, "cron job not controlled by plan, leaving it"),
        None => debug!(cron_job = %cron_job_ref, "cron job already absent"),
    }

    match ctx
        .kube
        .get_secret(&secret_ref.namespace, &secret_ref.name)
        .await?
    {
        Some(existing) if is_controlled_by(&existing.metadata, &uid) => {
            info!(secret = %secret_ref, "deleting secret");
            ctx.kube
                .delete_secret(&secret_ref.namespace, &secret_ref.name)
                .await?;
        }
        Some(_) => warn!(secret = %secret_ref, "secret not controlled by plan, leaving it"),
        None => debug!(secret = %secret_ref, "secret already absent"),
    }

    remove_finalizer(plan, ctx).await
}
