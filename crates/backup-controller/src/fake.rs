//! In-memory cluster for reconciler stories
//!
//! Holds one plan plus Secrets and CronJobs keyed by `namespace/name`, and
//! enforces the optimistic concurrency rules the API server applies:
//! create of an existing name and writes with a stale `resourceVersion`
//! both fail with 409.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::core::ErrorResponse;
use kube::discovery::ApiResource;
use serde_json::Value;

use backup_common::crd::BackupPlanStatus;
use backup_common::{BackupPlan, Error, Result, SECRET_FIELD_NAME};

use crate::client::KubeClient;

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn key(meta: &ObjectMeta) -> String {
    format!(
        "{}/{}",
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default()
    )
}

fn bump(version: Option<&str>) -> String {
    let current: u64 = version.and_then(|v| v.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

#[derive(Default)]
pub(crate) struct FakeCluster {
    plan: Mutex<Option<Value>>,
    secrets: Mutex<BTreeMap<String, Secret>>,
    cron_jobs: Mutex<BTreeMap<String, CronJob>>,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl FakeCluster {
    pub(crate) fn with_plan<P: BackupPlan>(plan: &P) -> Self {
        let cluster = Self::default();
        cluster.put_plan(plan);
        cluster
    }

    /// Store `plan` as-is, as if a user edited it
    pub(crate) fn put_plan<P: BackupPlan>(&self, plan: &P) {
        let value = serde_json::to_value(plan).expect("plan serializes");
        *self.plan.lock().unwrap() = Some(value);
    }

    pub(crate) fn plan<P: BackupPlan>(&self) -> Option<P> {
        self.plan
            .lock()
            .unwrap()
            .clone()
            .map(|v| serde_json::from_value(v).expect("stored plan deserializes"))
    }

    pub(crate) fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned()
    }

    pub(crate) fn cron_job(&self, namespace: &str, name: &str) -> Option<CronJob> {
        self.cron_jobs
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned()
    }

    /// Insert a Secret directly, bypassing counters
    pub(crate) fn insert_secret(&self, mut secret: Secret) {
        secret.metadata.resource_version = Some("1".to_string());
        self.secrets
            .lock()
            .unwrap()
            .insert(key(&secret.metadata), secret);
    }

    /// Overwrite the payload of a stored Secret, as a manual edit would
    pub(crate) fn tamper_secret(&self, namespace: &str, name: &str, payload: Vec<u8>) {
        let mut secrets = self.secrets.lock().unwrap();
        let secret = secrets
            .get_mut(&format!("{namespace}/{name}"))
            .expect("secret exists");
        secret.data = Some(BTreeMap::from([(
            SECRET_FIELD_NAME.to_string(),
            ByteString(payload),
        )]));
        secret.metadata.resource_version =
            Some(bump(secret.metadata.resource_version.as_deref()));
    }

    /// Modify a stored CronJob in place, as `kubectl edit` or API server
    /// defaulting would
    pub(crate) fn edit_cron_job(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut CronJob)) {
        let mut cron_jobs = self.cron_jobs.lock().unwrap();
        let cron_job = cron_jobs
            .get_mut(&format!("{namespace}/{name}"))
            .expect("cron job exists");
        edit(cron_job);
        cron_job.metadata.resource_version =
            Some(bump(cron_job.metadata.resource_version.as_deref()));
    }

    /// Number of mutating calls received
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of delete calls that removed something
    pub(crate) fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeCluster {
    fn create_in<T: Clone>(
        store: &Mutex<BTreeMap<String, T>>,
        meta: impl Fn(&mut T) -> &mut ObjectMeta,
        object: &T,
    ) -> Result<T> {
        let mut stored = object.clone();
        let metadata = meta(&mut stored);
        let key = key(metadata);
        let mut store = store.lock().unwrap();
        if store.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{key} already exists")));
        }
        metadata.resource_version = Some("1".to_string());
        store.insert(key, stored.clone());
        Ok(stored)
    }

    fn replace_in<T: Clone>(
        store: &Mutex<BTreeMap<String, T>>,
        meta: impl Fn(&mut T) -> &mut ObjectMeta,
        object: &T,
    ) -> Result<T> {
        let mut stored = object.clone();
        let metadata = meta(&mut stored);
        let key = key(metadata);
        let mut store = store.lock().unwrap();
        let Some(existing) = store.get_mut(&key) else {
            return Err(api_error(404, "NotFound", format!("{key} not found")));
        };
        let current = meta(existing).resource_version.clone();
        if metadata.resource_version != current {
            return Err(api_error(409, "Conflict", format!("{key} was modified")));
        }
        metadata.resource_version = Some(bump(current.as_deref()));
        *existing = stored.clone();
        Ok(stored)
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        self.record_write();
        Self::create_in(&self.secrets, |s| &mut s.metadata, secret)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret> {
        self.record_write();
        Self::replace_in(&self.secrets, |s| &mut s.metadata, secret)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.record_write();
        if self
            .secrets
            .lock()
            .unwrap()
            .remove(&format!("{namespace}/{name}"))
            .is_some()
        {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<Option<CronJob>> {
        Ok(self.cron_job(namespace, name))
    }

    async fn create_cron_job(&self, cron_job: &CronJob) -> Result<CronJob> {
        self.record_write();
        Self::create_in(&self.cron_jobs, |c| &mut c.metadata, cron_job)
    }

    async fn replace_cron_job(&self, cron_job: &CronJob) -> Result<CronJob> {
        self.record_write();
        Self::replace_in(&self.cron_jobs, |c| &mut c.metadata, cron_job)
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<()> {
        self.record_write();
        if self
            .cron_jobs
            .lock()
            .unwrap()
            .remove(&format!("{namespace}/{name}"))
            .is_some()
        {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn patch_plan_finalizers(
        &self,
        _resource: &ApiResource,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<()> {
        self.record_write();
        let mut guard = self.plan.lock().unwrap();
        let Some(plan) = guard.as_mut() else {
            return Err(api_error(404, "NotFound", format!("{namespace}/{name} not found")));
        };
        let current = plan["metadata"]["resourceVersion"].as_str().map(str::to_string);
        if resource_version.is_some() && resource_version != current {
            return Err(api_error(409, "Conflict", format!("{namespace}/{name} was modified")));
        }
        plan["metadata"]["finalizers"] = serde_json::json!(finalizers);
        plan["metadata"]["resourceVersion"] = Value::String(bump(current.as_deref()));
        Ok(())
    }

    async fn patch_plan_status(
        &self,
        _resource: &ApiResource,
        namespace: &str,
        name: &str,
        status: &BackupPlanStatus,
    ) -> Result<()> {
        self.record_write();
        let mut guard = self.plan.lock().unwrap();
        let Some(plan) = guard.as_mut() else {
            return Err(api_error(404, "NotFound", format!("{namespace}/{name} not found")));
        };
        let current = plan["metadata"]["resourceVersion"].as_str().map(str::to_string);
        plan["status"] = serde_json::to_value(status)
            .map_err(|e| Error::serialization(e.to_string()))?;
        plan["metadata"]["resourceVersion"] = Value::String(bump(current.as_deref()));
        Ok(())
    }
}
