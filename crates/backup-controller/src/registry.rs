//! Explicit registry of plan kinds the operator serves
//!
//! Built once at start-up and handed to the runner; there is no global
//! table. Each entry knows how to produce its CRD and its controller.

use std::sync::Arc;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Client, CustomResourceExt};

use backup_common::crd::{ConsulBackupPlan, MongoDBBackupPlan};
use backup_common::BackupPlan;

use crate::reconciler::Context;
use crate::runner::{plan_controller, ControllerFuture};

/// One registered plan kind
#[derive(Clone, Copy)]
pub struct PlanKind {
    kind: &'static str,
    source: &'static str,
    crd: fn() -> CustomResourceDefinition,
    controller: fn(Client, Arc<Context>) -> ControllerFuture,
}

impl PlanKind {
    fn of<P: BackupPlan + CustomResourceExt>() -> Self {
        Self {
            kind: P::KIND,
            source: P::SOURCE,
            crd: P::crd,
            controller: plan_controller::<P>,
        }
    }

    /// Kubernetes kind name
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Short source name
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// The kind's CRD
    pub fn crd(&self) -> CustomResourceDefinition {
        (self.crd)()
    }

    /// Build this kind's controller future
    pub fn controller(&self, client: Client, ctx: Arc<Context>) -> ControllerFuture {
        (self.controller)(client, ctx)
    }
}

impl std::fmt::Debug for PlanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanKind")
            .field("kind", &self.kind)
            .field("source", &self.source)
            .finish()
    }
}

/// Ordered mapping of kind name to [`PlanKind`]
#[derive(Clone, Debug, Default)]
pub struct PlanRegistry {
    kinds: Vec<PlanKind>,
}

impl PlanRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Every plan kind shipped with the operator
    pub fn builtin() -> Self {
        Self::new()
            .register::<ConsulBackupPlan>()
            .register::<MongoDBBackupPlan>()
    }

    /// Add kind `P`, replacing an earlier entry of the same kind
    pub fn register<P: BackupPlan + CustomResourceExt>(mut self) -> Self {
        self.kinds.retain(|k| k.kind != P::KIND);
        self.kinds.push(PlanKind::of::<P>());
        self
    }

    /// Look up a kind by name
    pub fn get(&self, kind: &str) -> Option<&PlanKind> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    /// Registered kind names in registration order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.kinds.iter().map(|k| k.kind).collect()
    }

    /// CRDs of every registered kind
    pub fn crds(&self) -> Vec<CustomResourceDefinition> {
        self.kinds.iter().map(PlanKind::crd).collect()
    }

    /// One controller future per registered kind, sharing `ctx`
    pub fn build_controllers(&self, client: Client, ctx: Arc<Context>) -> Vec<ControllerFuture> {
        self.kinds
            .iter()
            .map(|k| k.controller(client.clone(), ctx.clone()))
            .collect()
    }
}
