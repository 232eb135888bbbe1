//! CRD installation on startup
//!
//! The core controller owns the Switchyard CRDs and installs them with
//! server-side apply, so upgrades roll schema changes forward.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use switchyard_common::crd::{InferenceProvider, ModelDeployment};
use switchyard_deployment::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn switchyard_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "modeldeployments.switchyard.dev",
            crd: ModelDeployment::crd(),
        },
        CrdDef {
            name: "inferenceproviders.switchyard.dev",
            crd: InferenceProvider::crd(),
        },
    ]
}

/// Install or update every Switchyard CRD
pub async fn ensure_crds(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in switchyard_crds() {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }
    tracing::info!("Switchyard CRDs installed/updated");
    Ok(())
}

/// All CRDs as a multi-document YAML stream
pub fn crd_yaml() -> anyhow::Result<String> {
    let docs = switchyard_crds()
        .iter()
        .map(|def| serde_yaml::to_string(&def.crd))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs.join("---\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_names_match_generated_metadata() {
        for def in switchyard_crds() {
            assert_eq!(def.crd.metadata.name.as_deref(), Some(def.name));
        }
    }

    #[test]
    fn yaml_stream_holds_both_crds() {
        let yaml = crd_yaml().expect("render");
        assert_eq!(yaml.matches("kind: CustomResourceDefinition").count(), 2);
        assert!(yaml.contains("---\n"));
        assert!(yaml.contains("modeldeployments.switchyard.dev"));
        assert!(yaml.contains("inferenceproviders.switchyard.dev"));
    }
}
