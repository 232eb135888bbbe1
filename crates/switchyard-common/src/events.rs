//! Kubernetes Events for ModelDeployment lifecycle transitions
//!
//! Events are fire-and-forget: a failed publish is logged and never fails the
//! reconciliation that emitted it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

/// Publishes Kubernetes Events about an object
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one Event on `resource_ref`.
    ///
    /// `reason` is the machine-readable REASON column (see [`reasons`]);
    /// `action` is the ACTION column (see [`actions`]).
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Reference to `obj` suitable for attaching Events
pub fn event_ref<K>(obj: &K) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    obj.object_ref(&())
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` is reported as the Event's reporting component
    /// (e.g. `switchyard-controller`, `switchyard-runtime-kuberay`).
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// A provider was assigned to the deployment
    pub const PROVIDER_SELECTED: &str = "ProviderSelected";
    /// No ready provider can serve the deployment
    pub const NO_ELIGIBLE_PROVIDER: &str = "NoEligibleProvider";
    /// The deployment spec failed structural validation
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// The runtime reports the deployment is serving
    pub const DEPLOYMENT_READY: &str = "DeploymentReady";
    /// The runtime gave up on the deployment
    pub const DEPLOYMENT_FAILED: &str = "DeploymentFailed";
    /// Runtime child resources were applied
    pub const RESOURCES_APPLIED: &str = "ResourcesApplied";
    /// Runtime child resources no longer produced were deleted
    pub const RESOURCES_DELETED: &str = "ResourcesDeleted";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// Core reconciliation
    pub const RECONCILE: &str = "Reconcile";
    /// Provider selection
    pub const SELECT: &str = "Select";
    /// Runtime child resource application
    pub const APPLY: &str = "Apply";
    /// Runtime child resource deletion
    pub const DELETE: &str = "Delete";
}
