//! Cluster access used by the reconciler
//!
//! The reconciler only talks to the API server through [`KubeClient`], so
//! tests can swap in a mock or an in-memory cluster.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use backup_common::crd::BackupPlanStatus;
use backup_common::{Error, Result};

/// Field manager recorded on patches made by the controller
pub const FIELD_MANAGER: &str = "backup-operator";

/// Trait abstracting the Kubernetes operations the reconciler needs
///
/// `get_*` return `Ok(None)` for 404 and `delete_*` treat 404 as success.
/// Plans are addressed through their [`ApiResource`] so one implementation
/// serves every plan kind.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<Secret>;

    /// Replace a Secret; its `resourceVersion` must match the stored one
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret>;

    /// Delete a Secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    /// Get a CronJob
    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<Option<CronJob>>;

    /// Create a CronJob
    async fn create_cron_job(&self, cron_job: &CronJob) -> Result<CronJob>;

    /// Replace a CronJob; its `resourceVersion` must match the stored one
    async fn replace_cron_job(&self, cron_job: &CronJob) -> Result<CronJob>;

    /// Delete a CronJob
    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<()>;

    /// Set a plan's finalizer list. With a `resource_version` the write is
    /// rejected with 409 if the plan changed since it was read.
    async fn patch_plan_finalizers(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<()>;

    /// Merge-patch a plan's status subresource
    async fn patch_plan_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        status: &BackupPlanStatus,
    ) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn plans(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

fn name_and_namespace(meta: &ObjectMeta) -> Result<(String, String)> {
    match (meta.name.clone(), meta.namespace.clone()) {
        (Some(name), Some(namespace)) => Ok((name, namespace)),
        _ => Err(Error::internal_with_context(
            "kube-client",
            "object is missing name or namespace",
        )),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        let (_, namespace) = name_and_namespace(&secret.metadata)?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api.create(&PostParams::default(), secret).await?)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret> {
        let (name, namespace) = name_and_namespace(&secret.metadata)?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api.replace(&name, &PostParams::default(), secret).await?)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace, name, "secret already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<Option<CronJob>> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cron_job) => Ok(Some(cron_job)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_cron_job(&self, cron_job: &CronJob) -> Result<CronJob> {
        let (_, namespace) = name_and_namespace(&cron_job.metadata)?;
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api.create(&PostParams::default(), cron_job).await?)
    }

    async fn replace_cron_job(&self, cron_job: &CronJob) -> Result<CronJob> {
        let (name, namespace) = name_and_namespace(&cron_job.metadata)?;
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api.replace(&name, &PostParams::default(), cron_job).await?)
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
        // Background propagation so the CronJob's Jobs and Pods go with it.
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace, name, "cron job already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_plan_finalizers(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let mut metadata = serde_json::json!({ "finalizers": finalizers });
        if let Some(rv) = resource_version {
            metadata["resourceVersion"] = serde_json::Value::String(rv);
        }
        let patch = serde_json::json!({ "metadata": metadata });

        self.plans(resource, namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_plan_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        status: &BackupPlanStatus,
    ) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.plans(resource, namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
