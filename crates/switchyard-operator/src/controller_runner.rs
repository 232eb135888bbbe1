//! Controller runner - builds controller futures for each process mode
//!
//! Each `build_*` function returns a boxed future the caller awaits. This
//! keeps controller construction separate from process lifecycle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client};

use switchyard_common::crd::{InferenceProvider, ModelDeployment};
use switchyard_common::events::KubeEventPublisher;
use switchyard_common::kube_utils::build_api_resource;
use switchyard_common::PROVIDER_LABEL;
use switchyard_deployment::{self as deployment, KubeDeploymentClient};
use switchyard_runtime::{self as runtime, KubeRuntimeClient, RuntimeContext};
use switchyard_transform::Transformer;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller future ready to be awaited
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build the core ModelDeployment controller.
///
/// Registry entries are cached in a reflector the selection engine reads
/// from. A registry change requeues every deployment still waiting for a
/// provider.
pub fn build_deployment_controller(client: Client) -> ControllerFuture {
    let (provider_store, writer) = reflector::store::<InferenceProvider>();
    let providers: Api<InferenceProvider> = Api::all(client.clone());
    let provider_reflector = watcher(providers.clone(), watcher_config())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .for_each(|event| {
            if let Err(e) = event {
                tracing::warn!(error = %e, "InferenceProvider watch error");
            }
            std::future::ready(())
        });

    let deployment_client =
        KubeDeploymentClient::new(client.clone()).with_provider_store(provider_store);
    let events = KubeEventPublisher::new(client.clone(), deployment::FIELD_MANAGER);
    let ctx = Arc::new(deployment::Context::new(
        Arc::new(deployment_client),
        Arc::new(events),
    ));

    let deployments: Api<ModelDeployment> = Api::all(client);
    let controller = Controller::new(deployments, watcher_config());
    let deployment_store = controller.store();

    tracing::info!("- ModelDeployment controller");

    let controller = controller
        .watches(
            providers,
            watcher_config(),
            deployment::unassigned_deployments(deployment_store),
        )
        .shutdown_on_signal()
        .run(deployment::reconcile, deployment::error_policy, ctx)
        .for_each(log_reconcile_result("ModelDeployment"));

    Box::pin(async move {
        tokio::select! {
            _ = controller => {}
            _ = provider_reflector => {
                tracing::warn!("InferenceProvider reflector ended");
            }
        }
    })
}

/// Build one provider's runtime controller.
///
/// Watches every ModelDeployment and the provider's primary runtime objects
/// (selected by the provider label), so runtime status changes requeue the
/// owning deployment.
pub fn build_runtime_controller(
    client: Client,
    transformer: Arc<dyn Transformer>,
) -> ControllerFuture {
    let provider = transformer.provider();
    let resource = transformer.resource();
    let ar = build_api_resource(&resource.api_version, &resource.kind);

    let events = KubeEventPublisher::new(client.clone(), &runtime::field_manager(provider));
    let ctx = Arc::new(RuntimeContext::new(
        Arc::new(KubeRuntimeClient::new(client.clone(), provider)),
        transformer,
        Arc::new(events),
    ));

    let deployments: Api<ModelDeployment> = Api::all(client.clone());
    let children: Api<DynamicObject> = Api::all_with(client, &ar);
    let label_selector = format!("{PROVIDER_LABEL}={provider}");

    tracing::info!(provider, kind = %resource.kind, "- runtime controller");

    Box::pin(
        Controller::new(deployments, watcher_config())
            .owns_with(children, ar, watcher_config().labels(&label_selector))
            .shutdown_on_signal()
            .run(runtime::reconcile, runtime::error_policy, ctx)
            .for_each(log_reconcile_result("Runtime")),
    )
}

/// Creates a closure for logging reconciliation results.
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
