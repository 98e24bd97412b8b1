//! CRD installation and rendering
//!
//! The operator applies its own CRDs on startup with server-side apply, so
//! the installed schema always matches the running version.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use backup_controller::client::FIELD_MANAGER;
use backup_controller::PlanRegistry;

/// Install or update the CRD of every registered kind
pub async fn ensure_crds_installed(client: &Client, registry: &PlanRegistry) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in registry.crds() {
        let name = crd
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generated CRD has no name"))?;
        tracing::info!("Installing {} CRD...", name);
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    }

    tracing::info!("All backup plan CRDs installed/updated");
    Ok(())
}

/// Multi-document YAML of every registered CRD
pub fn render_crds(registry: &PlanRegistry) -> anyhow::Result<String> {
    let mut out = String::new();
    for crd in registry.crds() {
        let yaml = serde_yaml::to_string(&crd)
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}
