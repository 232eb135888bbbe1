//! Provider Config Manager
//!
//! Owned by a runtime controller process. Registers the runtime's
//! `InferenceProvider` entry, keeps its heartbeat fresh, and marks it not
//! ready on shutdown. The entry is never deleted, so deployments already
//! assigned to the runtime keep a record of where they went.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use switchyard_common::crd::{InferenceProvider, InferenceProviderSpec, InferenceProviderStatus};
use switchyard_common::kube_utils::{patch_cluster_status, with_api_timeout, DEFAULT_API_TIMEOUT};
use switchyard_common::retry::{retry_with_backoff, RetryConfig};
use switchyard_common::{
    Error, API_VERSION, DEFAULT_HEARTBEAT_INTERVAL_SECS, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
};

/// Field manager for registry writes
pub const FIELD_MANAGER: &str = "switchyard-provider";

/// Registry API surface used by the manager
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Create or update the entry's spec
    async fn apply_entry(&self, name: &str, spec: &InferenceProviderSpec) -> Result<(), Error>;

    /// Merge-patch the entry's status
    async fn patch_entry_status(
        &self,
        name: &str,
        status: &InferenceProviderStatus,
    ) -> Result<(), Error>;
}

/// [`RegistryClient`] backed by the Kubernetes API
pub struct KubeRegistryClient {
    client: Client,
}

impl KubeRegistryClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RegistryClient for KubeRegistryClient {
    async fn apply_entry(&self, name: &str, spec: &InferenceProviderSpec) -> Result<(), Error> {
        let api: Api<InferenceProvider> = Api::all(self.client.clone());
        let entry = serde_json::json!({
            "apiVersion": API_VERSION,
            "kind": "InferenceProvider",
            "metadata": {
                "name": name,
                "labels": { MANAGED_BY_LABEL: MANAGED_BY_VALUE },
            },
            "spec": spec,
        });
        with_api_timeout(
            &format!("apply InferenceProvider {name}"),
            DEFAULT_API_TIMEOUT,
            api.patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&entry),
            ),
        )
        .await?;
        Ok(())
    }

    async fn patch_entry_status(
        &self,
        name: &str,
        status: &InferenceProviderStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        patch_cluster_status::<InferenceProvider>(&self.client, name, &patch, FIELD_MANAGER).await
    }
}

/// Registers one runtime in the provider registry and heartbeats it
pub struct ProviderConfigManager {
    client: Arc<dyn RegistryClient>,
    name: String,
    spec: InferenceProviderSpec,
    version: Option<String>,
    heartbeat_interval: Duration,
    retry: RetryConfig,
    ready: AtomicBool,
    message: Mutex<Option<String>>,
}

impl ProviderConfigManager {
    /// Manager for entry `name` with the given static descriptor
    pub fn new(
        client: Arc<dyn RegistryClient>,
        name: impl Into<String>,
        spec: InferenceProviderSpec,
    ) -> Self {
        Self {
            client,
            name: name.into(),
            spec,
            version: None,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            retry: RetryConfig::default(),
            ready: AtomicBool::new(false),
            message: Mutex::new(None),
        }
    }

    /// Runtime version reported in status
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Heartbeat period; also published so readers can judge staleness
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_secs(1));
        self
    }

    /// Retry policy for the post-registration status write
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Entry name (provider id)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Readiness last published
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Create or update the entry, then mark it ready.
    ///
    /// The status write right after create can race the object becoming
    /// visible, so it is retried with backoff.
    #[instrument(skip(self), fields(provider = %self.name))]
    pub async fn register(&self) -> Result<(), Error> {
        self.client.apply_entry(&self.name, &self.spec).await?;
        info!("Registered provider");

        self.ready.store(true, Ordering::SeqCst);
        *self.message.lock() = None;
        retry_with_backoff(&self.retry, "register provider status", || async {
            self.client
                .patch_entry_status(&self.name, &self.status_now())
                .await
        })
        .await
    }

    /// Publish readiness with a fresh heartbeat
    pub async fn update_status(&self, ready: bool, message: Option<String>) -> Result<(), Error> {
        self.ready.store(ready, Ordering::SeqCst);
        *self.message.lock() = message;
        self.client
            .patch_entry_status(&self.name, &self.status_now())
            .await
    }

    /// Refresh `lastHeartbeat` with the current readiness
    pub async fn heartbeat(&self) -> Result<(), Error> {
        self.client
            .patch_entry_status(&self.name, &self.status_now())
            .await
    }

    /// Heartbeat every interval until `token` is cancelled.
    ///
    /// Failed heartbeats are logged and retried on the next tick.
    pub fn start_heartbeat(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.heartbeat_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(provider = %self.name, "Heartbeat stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.heartbeat().await {
                            Ok(()) => debug!(provider = %self.name, "Heartbeat sent"),
                            Err(e) => warn!(provider = %self.name, error = %e, "Heartbeat failed"),
                        }
                    }
                }
            }
        })
    }

    /// Mark the entry not ready. The entry itself is kept.
    #[instrument(skip(self), fields(provider = %self.name))]
    pub async fn unregister(&self) -> Result<(), Error> {
        info!("Unregistering provider");
        self.update_status(false, Some("provider controller stopped".to_string()))
            .await
    }

    fn status_now(&self) -> InferenceProviderStatus {
        InferenceProviderStatus {
            ready: self.is_ready(),
            last_heartbeat: Some(Utc::now()),
            heartbeat_interval_seconds: self.heartbeat_interval.as_secs(),
            version: self.version.clone(),
            message: self.message.lock().clone(),
        }
    }
}
