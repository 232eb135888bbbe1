//! Runtime controller reconciliation
//!
//! Transform → apply every child → delete children no longer produced →
//! observe the primary → write `status.runtime`. Nothing outside
//! `status.runtime` is written on the deployment. When the deployment is
//! reassigned, this provider's children are deleted.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use switchyard_common::crd::{ModelDeployment, RuntimeStatus};
use switchyard_common::events::{actions, event_ref, reasons, EventPublisher};
use switchyard_common::validation::validate_spec;
use switchyard_common::{backoff_delay_secs, Error};
use switchyard_transform::{ChildResource, ObservedStatus, Transformer};

use crate::client::RuntimeClient;

/// Re-check interval once the runtime reports ready
const READY_RECHECK: Duration = Duration::from_secs(300);

/// Re-check interval while children come up
const PENDING_RECHECK: Duration = Duration::from_secs(15);

/// Optional `status.runtime` fields, nulled explicitly when unset so a merge
/// patch cannot leave a stale value behind
const OPTIONAL_FIELDS: [&str; 4] = ["message", "resourceName", "replicas", "observedGeneration"];

/// Shared state for one provider's runtime controller
pub struct RuntimeContext {
    /// API seam
    pub client: Arc<dyn RuntimeClient>,
    /// Transformer of the provider this controller serves
    pub transformer: Arc<dyn Transformer>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    failures: DashMap<String, u32>,
}

impl RuntimeContext {
    /// Create a context for `transformer`'s provider
    pub fn new(
        client: Arc<dyn RuntimeClient>,
        transformer: Arc<dyn Transformer>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            client,
            transformer,
            events,
            failures: DashMap::new(),
        }
    }

    /// Provider id served by this controller
    pub fn provider(&self) -> &'static str {
        self.transformer.provider()
    }
}

/// Whether the core controller assigned `md` to `provider`
pub fn is_assigned_to(md: &ModelDeployment, provider: &str) -> bool {
    md.status
        .as_ref()
        .and_then(|s| s.provider.as_ref())
        .is_some_and(|p| p.name == provider)
}

/// Reconcile one ModelDeployment on behalf of the context's provider
#[instrument(
    skip(md, ctx),
    fields(deployment = %md.name_any(), provider = ctx.provider())
)]
pub async fn reconcile(md: Arc<ModelDeployment>, ctx: Arc<RuntimeContext>) -> Result<Action, Error> {
    let provider = ctx.provider();
    let name = md.name_any();
    let namespace = md
        .namespace()
        .ok_or_else(|| Error::validation("ModelDeployment must be namespaced"))?;
    let key = format!("{namespace}/{name}");

    let Some(current) = ctx.client.get(&namespace, &name).await? else {
        ctx.failures.remove(&key);
        return Ok(Action::await_change());
    };
    if !is_assigned_to(&current, provider) {
        let deleted = prune_children(&ctx, &namespace, &name, &[]).await?;
        if deleted > 0 {
            info!(count = deleted, "Released runtime resources of a reassigned deployment");
            publish_deleted(&ctx, &current, deleted).await;
        } else {
            debug!("not assigned to this provider");
        }
        return Ok(Action::await_change());
    }
    // The core controller owns the Failed phase for invalid specs.
    if validate_spec(&current.spec).is_err() {
        debug!("spec is invalid, waiting for a fix");
        return Ok(Action::await_change());
    }

    let generation = current.metadata.generation;
    let previous = current.status.as_ref().and_then(|s| s.runtime.clone());

    let children = match ctx.transformer.transform(&current) {
        Ok(children) => children,
        Err(e) if e.is_permanent() => {
            warn!(error = %e, "Runtime cannot serve this deployment");
            let runtime = RuntimeStatus {
                provider: provider.to_string(),
                ready: false,
                failed: true,
                message: Some(e.to_string()),
                resource_name: previous.as_ref().and_then(|r| r.resource_name.clone()),
                replicas: None,
                observed_generation: generation,
            };
            write_runtime(&ctx, &namespace, &name, previous.as_ref(), &runtime).await?;
            ctx.failures.remove(&key);
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into_error(&name, provider)),
    };

    let primary = primary_index(&children, ctx.transformer.as_ref());
    let mut primary_live = Value::Null;
    for (i, child) in children.iter().enumerate() {
        let live = ctx.client.apply(&child.to_value()).await?;
        if i == primary {
            primary_live = live;
        }
    }
    let resource_name = children.get(primary).map(|c| c.name().to_string());

    let deleted = prune_children(&ctx, &namespace, &name, &children).await?;
    if deleted > 0 {
        info!(count = deleted, "Deleted runtime resources no longer produced");
        publish_deleted(&ctx, &current, deleted).await;
    }

    let first_apply = previous
        .as_ref()
        .map_or(true, |r| r.observed_generation != generation);
    if first_apply {
        info!(count = children.len(), "Applied runtime resources");
        ctx.events
            .publish(
                &event_ref(&current),
                EventType::Normal,
                reasons::RESOURCES_APPLIED,
                actions::APPLY,
                Some(format!("applied {} {} object(s)", children.len(), provider)),
            )
            .await;
    }

    let observed = ctx.transformer.observe(&primary_live);
    let runtime = runtime_status(provider, generation, resource_name, observed);
    write_runtime(&ctx, &namespace, &name, previous.as_ref(), &runtime).await?;
    ctx.failures.remove(&key);

    Ok(if runtime.ready || runtime.failed {
        Action::requeue(READY_RECHECK)
    } else {
        Action::requeue(PENDING_RECHECK)
    })
}

/// Index of the child whose kind is the provider's native resource
fn primary_index(children: &[ChildResource], transformer: &dyn Transformer) -> usize {
    let resource = transformer.resource();
    children
        .iter()
        .position(|c| c.api_version() == resource.api_version && c.kind() == resource.kind)
        .unwrap_or(0)
}

/// Delete every child this provider labelled for the deployment that is not
/// in `keep`. Returns how many were deleted.
async fn prune_children(
    ctx: &RuntimeContext,
    namespace: &str,
    name: &str,
    keep: &[ChildResource],
) -> Result<usize, Error> {
    let mut deleted = 0;
    for resource in ctx.transformer.child_kinds() {
        for child in ctx.client.list_children(namespace, name, &resource).await? {
            let wanted = keep.iter().any(|c| {
                c.api_version() == resource.api_version
                    && c.kind() == resource.kind
                    && c.name() == child
            });
            if wanted {
                continue;
            }
            ctx.client.delete(namespace, &resource, &child).await?;
            debug!(kind = %resource.kind, child = %child, "Deleted runtime resource");
            deleted += 1;
        }
    }
    Ok(deleted)
}

async fn publish_deleted(ctx: &RuntimeContext, md: &ModelDeployment, count: usize) {
    ctx.events
        .publish(
            &event_ref(md),
            EventType::Normal,
            reasons::RESOURCES_DELETED,
            actions::DELETE,
            Some(format!("deleted {count} {} object(s)", ctx.provider())),
        )
        .await;
}

fn runtime_status(
    provider: &str,
    generation: Option<i64>,
    resource_name: Option<String>,
    observed: ObservedStatus,
) -> RuntimeStatus {
    RuntimeStatus {
        provider: provider.to_string(),
        ready: observed.ready && !observed.failed,
        failed: observed.failed,
        message: observed.message,
        resource_name,
        replicas: observed.replicas,
        observed_generation: generation,
    }
}

async fn write_runtime(
    ctx: &RuntimeContext,
    namespace: &str,
    name: &str,
    previous: Option<&RuntimeStatus>,
    runtime: &RuntimeStatus,
) -> Result<(), Error> {
    if previous == Some(runtime) {
        return Ok(());
    }
    let patch = json!({ "status": { "runtime": runtime_patch(runtime)? } });
    ctx.client.patch_status(namespace, name, &patch).await?;
    debug!(ready = runtime.ready, failed = runtime.failed, "Wrote runtime status");
    Ok(())
}

/// `status.runtime` as a merge-patch value with unset fields nulled
pub(crate) fn runtime_patch(runtime: &RuntimeStatus) -> Result<Value, Error> {
    let mut value = serde_json::to_value(runtime)?;
    if let Some(obj) = value.as_object_mut() {
        for field in OPTIONAL_FIELDS {
            obj.entry(field).or_insert(Value::Null);
        }
    }
    Ok(value)
}

/// Error policy for the runtime controller
pub fn error_policy(md: Arc<ModelDeployment>, error: &Error, ctx: Arc<RuntimeContext>) -> Action {
    let name = md.name_any();
    if !error.is_retryable() {
        warn!(deployment = %name, error = %error, "Runtime reconcile failed permanently");
        return Action::await_change();
    }
    let key = format!("{}/{}", md.namespace().unwrap_or_default(), name);
    let delay = {
        let mut failures = ctx.failures.entry(key).or_insert(0);
        let delay = backoff_delay_secs(*failures);
        *failures = failures.saturating_add(1);
        Duration::from_secs(delay)
    };
    warn!(
        deployment = %name,
        error = %error,
        retry_in_secs = delay.as_secs(),
        "Runtime reconcile failed, will retry"
    );
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockRuntimeClient;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::ObjectReference;
    use parking_lot::Mutex;
    use switchyard_common::crd::{
        GpuSpec, ModelDeploymentSpec, ModelDeploymentStatus, ModelSourceKind,
        ProviderAssignment, ReplicaSummary,
    };
    use switchyard_transform::{KaitoTransformer, KubeRayTransformer};

    #[derive(Default)]
    struct RecordingEvents {
        reasons: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingEvents {
        async fn publish(
            &self,
            _resource_ref: &ObjectReference,
            _type_: EventType,
            reason: &str,
            _action: &str,
            _note: Option<String>,
        ) {
            self.reasons.lock().push(reason.to_string());
        }
    }

    fn deployment(spec: ModelDeploymentSpec, provider: &str) -> ModelDeployment {
        let mut md = ModelDeployment::new("llama", spec.clone());
        md.metadata.namespace = Some("ml".to_string());
        md.metadata.uid = Some("uid-1".to_string());
        md.metadata.generation = Some(1);
        md.status = Some(ModelDeploymentStatus {
            provider: Some(ProviderAssignment {
                name: provider.to_string(),
                selection_key: spec.selection_key(),
                ..Default::default()
            }),
            ..Default::default()
        });
        md
    }

    fn gpu_spec() -> ModelDeploymentSpec {
        let mut spec = ModelDeploymentSpec::default();
        spec.model.id = "meta-llama/Llama-3.1-8B-Instruct".to_string();
        spec.resources.gpu = Some(GpuSpec {
            count: 1,
            gpu_type: None,
        });
        spec
    }

    struct Harness {
        applied: Arc<Mutex<Vec<Value>>>,
        patches: Arc<Mutex<Vec<Value>>>,
        deleted: Arc<Mutex<Vec<String>>>,
        events: Arc<RecordingEvents>,
    }

    /// Mock that serves `md`, echoes applied objects with `live_status`
    /// attached and records status patches
    fn harness(md: &ModelDeployment, live_status: Value) -> (MockRuntimeClient, Harness) {
        harness_with_children(md, live_status, &[])
    }

    /// [`harness`] where the cluster already holds labelled children, given
    /// as `(kind, name)`. Deletions are recorded as `kind/name`.
    fn harness_with_children(
        md: &ModelDeployment,
        live_status: Value,
        existing: &[(&str, &str)],
    ) -> (MockRuntimeClient, Harness) {
        let h = Harness {
            applied: Arc::new(Mutex::new(Vec::new())),
            patches: Arc::new(Mutex::new(Vec::new())),
            deleted: Arc::new(Mutex::new(Vec::new())),
            events: Arc::new(RecordingEvents::default()),
        };
        let existing: Vec<(String, String)> = existing
            .iter()
            .map(|(kind, name)| (kind.to_string(), name.to_string()))
            .collect();
        let mut client = MockRuntimeClient::new();
        client
            .expect_list_children()
            .returning(move |_, _, resource| {
                Ok(existing
                    .iter()
                    .filter(|(kind, _)| *kind == resource.kind)
                    .map(|(_, name)| name.clone())
                    .collect())
            });
        let deleted = h.deleted.clone();
        client.expect_delete().returning(move |_, resource, name| {
            deleted.lock().push(format!("{}/{name}", resource.kind));
            Ok(())
        });
        let served = md.clone();
        client
            .expect_get()
            .returning(move |_, _| Ok(Some(served.clone())));
        let applied = h.applied.clone();
        client.expect_apply().returning(move |object| {
            applied.lock().push(object.clone());
            let mut live = object.clone();
            live["status"] = live_status.clone();
            Ok(live)
        });
        let patches = h.patches.clone();
        client.expect_patch_status().returning(move |_, _, patch| {
            patches.lock().push(patch.clone());
            Ok(())
        });
        (client, h)
    }

    fn context(
        client: MockRuntimeClient,
        transformer: Arc<dyn Transformer>,
        events: &Arc<RecordingEvents>,
    ) -> Arc<RuntimeContext> {
        Arc::new(RuntimeContext::new(Arc::new(client), transformer, events.clone()))
    }

    /// Story: a vllm deployment assigned to kuberay. The RayService is
    /// applied, Ray reports it Running, and `status.runtime` says ready with
    /// the worker count.
    #[tokio::test]
    async fn story_kuberay_applies_and_reports_ready() {
        let md = deployment(gpu_spec(), "kuberay");
        let (client, h) = harness(
            &md,
            json!({
                "serviceStatus": "Running",
                "activeServiceStatus": { "rayClusterStatus": { "readyWorkerReplicas": 1 } }
            }),
        );
        let ctx = context(client, Arc::new(KubeRayTransformer), &h.events);

        let action = reconcile(Arc::new(md), ctx).await.expect("reconcile");

        assert_eq!(action, Action::requeue(READY_RECHECK));
        let applied = h.applied.lock();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0]["kind"], "RayService");
        assert_eq!(applied[0]["metadata"]["ownerReferences"][0]["uid"], "uid-1");

        let patches = h.patches.lock();
        assert_eq!(patches.len(), 1);
        let runtime = &patches[0]["status"]["runtime"];
        assert_eq!(runtime["provider"], "kuberay");
        assert_eq!(runtime["ready"], true);
        assert_eq!(runtime["failed"], false);
        assert_eq!(runtime["resourceName"], "llama");
        assert_eq!(runtime["observedGeneration"], 1);
        assert_eq!(runtime["replicas"], json!({"desired": 1, "ready": 1}));
        assert_eq!(runtime["message"], Value::Null);
        assert!(patches[0]["status"].get("phase").is_none(), "only runtime is written");
        assert_eq!(*h.events.reasons.lock(), vec![reasons::RESOURCES_APPLIED]);
    }

    /// Story: kuberay was assigned an image-sourced model it cannot run.
    /// Nothing is applied and the infeasibility lands in `status.runtime`.
    #[tokio::test]
    async fn story_infeasible_spec_reports_failed_without_applying() {
        let mut spec = gpu_spec();
        spec.model.source = ModelSourceKind::Image;
        spec.model.id = "registry.example.com/models/llama:1".to_string();
        let md = deployment(spec, "kuberay");
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut client = MockRuntimeClient::new();
        let served = md.clone();
        client
            .expect_get()
            .returning(move |_, _| Ok(Some(served.clone())));
        client.expect_apply().never();
        let sink = patches.clone();
        client.expect_patch_status().times(1).returning(move |_, _, patch| {
            sink.lock().push(patch.clone());
            Ok(())
        });
        let events = Arc::new(RecordingEvents::default());
        let ctx = context(client, Arc::new(KubeRayTransformer), &events);

        let action = reconcile(Arc::new(md), ctx).await.expect("reconcile");

        assert_eq!(action, Action::await_change());
        assert!(events.reasons.lock().is_empty());
        let runtime = patches.lock()[0]["status"]["runtime"].clone();
        assert_eq!(runtime["failed"], true);
        assert_eq!(runtime["ready"], false);
        let message = runtime["message"].as_str().expect("message");
        assert!(message.starts_with("kuberay cannot serve this deployment"), "{message}");
    }

    #[tokio::test]
    async fn deployment_assigned_elsewhere_is_ignored() {
        let md = deployment(gpu_spec(), "dynamo");
        let mut client = MockRuntimeClient::new();
        let served = md.clone();
        client
            .expect_get()
            .returning(move |_, _| Ok(Some(served.clone())));
        client.expect_list_children().returning(|_, _, _| Ok(Vec::new()));
        client.expect_delete().never();
        client.expect_apply().never();
        client.expect_patch_status().never();
        let events = Arc::new(RecordingEvents::default());
        let ctx = context(client, Arc::new(KubeRayTransformer), &events);

        let action = reconcile(Arc::new(md), ctx).await.expect("reconcile");

        assert_eq!(action, Action::await_change());
        assert!(events.reasons.lock().is_empty());
    }

    /// Story: kuberay served the deployment, then the core controller moved
    /// it to dynamo. On the next pass kuberay deletes its RayService instead
    /// of leaving it running next to the new runtime, and leaves
    /// `status.runtime` for dynamo to overwrite.
    #[tokio::test]
    async fn story_reassigned_deployment_releases_old_children() {
        let mut md = deployment(gpu_spec(), "dynamo");
        if let Some(status) = md.status.as_mut() {
            status.runtime = Some(RuntimeStatus {
                provider: "kuberay".to_string(),
                ready: true,
                resource_name: Some("llama".to_string()),
                observed_generation: Some(1),
                ..Default::default()
            });
        }
        let (client, h) =
            harness_with_children(&md, Value::Null, &[("RayService", "llama")]);
        let ctx = context(client, Arc::new(KubeRayTransformer), &h.events);

        let action = reconcile(Arc::new(md), ctx).await.expect("reconcile");

        assert_eq!(action, Action::await_change());
        assert_eq!(*h.deleted.lock(), vec!["RayService/llama".to_string()]);
        assert!(h.applied.lock().is_empty());
        assert!(h.patches.lock().is_empty());
        assert_eq!(*h.events.reasons.lock(), vec![reasons::RESOURCES_DELETED]);
    }

    /// Story: a KAITO deployment drops its engine args. The Workspace is
    /// re-applied without a config reference and the inference ConfigMap
    /// from the previous generation is deleted.
    #[tokio::test]
    async fn story_kaito_deletes_config_map_once_args_are_removed() {
        let md = deployment(gpu_spec(), "kaito");
        let (client, h) = harness_with_children(
            &md,
            json!({ "conditions": [ { "type": "WorkspaceSucceeded", "status": "True" } ] }),
            &[("Workspace", "llama"), ("ConfigMap", "llama-inference-config")],
        );
        let ctx = context(client, Arc::new(KaitoTransformer), &h.events);

        reconcile(Arc::new(md), ctx).await.expect("reconcile");

        assert_eq!(h.applied.lock().len(), 1);
        assert_eq!(
            *h.deleted.lock(),
            vec!["ConfigMap/llama-inference-config".to_string()]
        );
        assert_eq!(
            *h.events.reasons.lock(),
            vec![reasons::RESOURCES_DELETED, reasons::RESOURCES_APPLIED]
        );
    }

    #[tokio::test]
    async fn current_children_are_not_pruned() {
        let mut spec = gpu_spec();
        spec.engine.args.insert("max-model-len".to_string(), "4096".to_string());
        let md = deployment(spec, "kaito");
        let (client, h) = harness_with_children(
            &md,
            json!({ "conditions": [] }),
            &[("Workspace", "llama"), ("ConfigMap", "llama-inference-config")],
        );
        let ctx = context(client, Arc::new(KaitoTransformer), &h.events);

        reconcile(Arc::new(md), ctx).await.expect("reconcile");

        assert_eq!(h.applied.lock().len(), 2);
        assert!(h.deleted.lock().is_empty());
    }

    #[tokio::test]
    async fn unchanged_runtime_status_is_not_rewritten() {
        let mut md = deployment(gpu_spec(), "kuberay");
        if let Some(status) = md.status.as_mut() {
            status.runtime = Some(RuntimeStatus {
                provider: "kuberay".to_string(),
                ready: false,
                failed: false,
                message: None,
                resource_name: Some("llama".to_string()),
                replicas: Some(ReplicaSummary { desired: 1, ready: 0 }),
                observed_generation: Some(1),
            });
        }
        let (client, h) = harness(&md, json!({ "serviceStatus": "Pending" }));
        let ctx = context(client, Arc::new(KubeRayTransformer), &h.events);

        let action = reconcile(Arc::new(md), ctx).await.expect("reconcile");

        assert_eq!(action, Action::requeue(PENDING_RECHECK));
        assert_eq!(h.applied.lock().len(), 1, "children are re-applied every pass");
        assert!(h.patches.lock().is_empty());
        assert!(h.events.reasons.lock().is_empty());
    }

    #[tokio::test]
    async fn kaito_observes_the_workspace_not_the_config_map() {
        let mut spec = gpu_spec();
        spec.engine.args.insert("max-model-len".to_string(), "4096".to_string());
        let md = deployment(spec, "kaito");
        let (client, h) = harness(
            &md,
            json!({ "conditions": [ { "type": "WorkspaceSucceeded", "status": "True" } ] }),
        );
        let ctx = context(client, Arc::new(KaitoTransformer), &h.events);

        reconcile(Arc::new(md), ctx).await.expect("reconcile");

        let kinds: Vec<_> = h
            .applied
            .lock()
            .iter()
            .map(|o| o["kind"].as_str().unwrap_or_default().to_string())
            .collect();
        assert!(kinds.contains(&"ConfigMap".to_string()), "{kinds:?}");
        let runtime = h.patches.lock()[0]["status"]["runtime"].clone();
        assert_eq!(runtime["ready"], true);
        assert_eq!(runtime["resourceName"], "llama");
    }

    #[tokio::test]
    async fn apply_failure_surfaces_as_retryable_error() {
        let md = deployment(gpu_spec(), "kuberay");
        let mut client = MockRuntimeClient::new();
        let served = md.clone();
        client
            .expect_get()
            .returning(move |_, _| Ok(Some(served.clone())));
        client
            .expect_apply()
            .returning(|_| Err(Error::timeout("apply RayService ml/llama", Duration::from_secs(10))));
        client.expect_patch_status().never();
        let events = Arc::new(RecordingEvents::default());
        let ctx = context(client, Arc::new(KubeRayTransformer), &events);

        let err = reconcile(Arc::new(md.clone()), ctx.clone())
            .await
            .expect_err("apply error");

        assert!(err.is_retryable());
        assert_eq!(
            error_policy(Arc::new(md.clone()), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(30))
        );
        assert_eq!(
            error_policy(Arc::new(md), &err, ctx),
            Action::requeue(Duration::from_secs(60))
        );
    }

    #[test]
    fn runtime_patch_nulls_unset_fields() {
        let runtime = RuntimeStatus {
            provider: "dynamo".to_string(),
            ready: true,
            ..Default::default()
        };
        assert_eq!(
            runtime_patch(&runtime).expect("patch"),
            json!({
                "provider": "dynamo",
                "ready": true,
                "failed": false,
                "message": null,
                "resourceName": null,
                "replicas": null,
                "observedGeneration": null
            })
        );
    }

    #[test]
    fn assignment_check_reads_status_provider() {
        let md = deployment(gpu_spec(), "kaito");
        assert!(is_assigned_to(&md, "kaito"));
        assert!(!is_assigned_to(&md, "kuberay"));
        let unassigned = ModelDeployment::new("llama", gpu_spec());
        assert!(!is_assigned_to(&unassigned, "kaito"));
    }
}
