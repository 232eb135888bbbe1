//! Kubernetes seam for the runtime controller

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;

use switchyard_common::crd::{ModelDeployment, ProviderResource};
use switchyard_common::kube_utils::{
    apply_dynamic, build_api_resource, is_not_found, patch_namespaced_status, with_api_timeout,
    DEFAULT_API_TIMEOUT,
};
use switchyard_common::{Error, DEPLOYMENT_LABEL, PROVIDER_LABEL};

/// Field manager for one provider's runtime controller
pub fn field_manager(provider: &str) -> String {
    format!("switchyard-runtime-{provider}")
}

/// API calls the runtime controller makes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Latest copy of a deployment, `None` if it was deleted
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ModelDeployment>, Error>;

    /// Server-side apply one child object; returns the live object
    async fn apply(&self, object: &Value) -> Result<Value, Error>;

    /// Merge-patch the status subresource with `{"status": ...}`
    async fn patch_status(&self, namespace: &str, name: &str, patch: &Value)
        -> Result<(), Error>;

    /// Names of the `resource` objects labelled as this provider's children
    /// of deployment `deployment`
    async fn list_children(
        &self,
        namespace: &str,
        deployment: &str,
        resource: &ProviderResource,
    ) -> Result<Vec<String>, Error>;

    /// Delete one child; an already missing object is not an error
    async fn delete(
        &self,
        namespace: &str,
        resource: &ProviderResource,
        name: &str,
    ) -> Result<(), Error>;
}

/// [`RuntimeClient`] backed by the API server
pub struct KubeRuntimeClient {
    client: Client,
    provider: String,
    field_manager: String,
}

impl KubeRuntimeClient {
    /// Client applying as `switchyard-runtime-<provider>`
    pub fn new(client: Client, provider: &str) -> Self {
        Self {
            client,
            provider: provider.to_string(),
            field_manager: field_manager(provider),
        }
    }

    fn dynamic_api(&self, namespace: &str, resource: &ProviderResource) -> Api<DynamicObject> {
        let ar = build_api_resource(&resource.api_version, &resource.kind);
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }
}

#[async_trait]
impl RuntimeClient for KubeRuntimeClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ModelDeployment>, Error> {
        let api: Api<ModelDeployment> = Api::namespaced(self.client.clone(), namespace);
        with_api_timeout(
            &format!("get ModelDeployment {namespace}/{name}"),
            DEFAULT_API_TIMEOUT,
            api.get_opt(name),
        )
        .await
    }

    async fn apply(&self, object: &Value) -> Result<Value, Error> {
        let live = apply_dynamic(&self.client, object, &self.field_manager).await?;
        Ok(serde_json::to_value(live)?)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), Error> {
        patch_namespaced_status::<ModelDeployment>(
            &self.client,
            namespace,
            name,
            patch,
            &self.field_manager,
        )
        .await
    }

    async fn list_children(
        &self,
        namespace: &str,
        deployment: &str,
        resource: &ProviderResource,
    ) -> Result<Vec<String>, Error> {
        let selector = format!(
            "{DEPLOYMENT_LABEL}={deployment},{PROVIDER_LABEL}={}",
            self.provider
        );
        let api = self.dynamic_api(namespace, resource);
        let list = with_api_timeout(
            &format!("list {} in {namespace}", resource.kind),
            DEFAULT_API_TIMEOUT,
            api.list_metadata(&ListParams::default().labels(&selector)),
        )
        .await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|o| o.metadata.name)
            .collect())
    }

    async fn delete(
        &self,
        namespace: &str,
        resource: &ProviderResource,
        name: &str,
    ) -> Result<(), Error> {
        let api = self.dynamic_api(namespace, resource);
        with_api_timeout(
            &format!("delete {} {namespace}/{name}", resource.kind),
            DEFAULT_API_TIMEOUT,
            async {
                match api.delete(name, &DeleteParams::background()).await {
                    Ok(_) => Ok(()),
                    Err(e) if is_not_found(&e) => Ok(()),
                    Err(e) => Err(e),
                }
            },
        )
        .await
    }
}
