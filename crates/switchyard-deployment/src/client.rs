//! Kubernetes seam for the reconciler

use async_trait::async_trait;
use kube::api::Api;
use kube::runtime::reflector::Store;
use kube::Client;
#[cfg(test)]
use mockall::automock;

use switchyard_common::crd::{InferenceProvider, ModelDeployment};
use switchyard_common::kube_utils::{patch_namespaced_status, with_api_timeout, DEFAULT_API_TIMEOUT};
use switchyard_common::Error;

/// Field manager for core status writes
pub const FIELD_MANAGER: &str = "switchyard-controller";

/// API calls the reconciler makes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeploymentClient: Send + Sync {
    /// Latest copy of a deployment, `None` if it was deleted
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ModelDeployment>, Error>;

    /// Snapshot of the provider registry
    async fn list_providers(&self) -> Result<Vec<InferenceProvider>, Error>;

    /// Merge-patch the status subresource with `{"status": ...}`
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;
}

/// [`DeploymentClient`] backed by the API server and, when available, a
/// reflector store of registry entries
pub struct KubeDeploymentClient {
    client: Client,
    providers: Option<Store<InferenceProvider>>,
}

impl KubeDeploymentClient {
    /// Client that lists providers from the API on every call
    pub fn new(client: Client) -> Self {
        Self {
            client,
            providers: None,
        }
    }

    /// Read providers from a reflector store instead of the API
    pub fn with_provider_store(mut self, store: Store<InferenceProvider>) -> Self {
        self.providers = Some(store);
        self
    }
}

#[async_trait]
impl DeploymentClient for KubeDeploymentClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ModelDeployment>, Error> {
        let api: Api<ModelDeployment> = Api::namespaced(self.client.clone(), namespace);
        with_api_timeout(
            &format!("get ModelDeployment {namespace}/{name}"),
            DEFAULT_API_TIMEOUT,
            api.get_opt(name),
        )
        .await
    }

    async fn list_providers(&self) -> Result<Vec<InferenceProvider>, Error> {
        if let Some(store) = &self.providers {
            return Ok(store.state().iter().map(|p| (**p).clone()).collect());
        }
        let api: Api<InferenceProvider> = Api::all(self.client.clone());
        let list = with_api_timeout(
            "list InferenceProviders",
            DEFAULT_API_TIMEOUT,
            api.list(&Default::default()),
        )
        .await?;
        Ok(list.items)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        patch_namespaced_status::<ModelDeployment>(&self.client, namespace, name, patch, FIELD_MANAGER)
            .await
    }
}
