//! ModelDeployment reconciliation
//!
//! A pass validates the spec, selects a provider only when the selection key
//! changed, mirrors `status.runtime` from the assigned runtime controller and
//! ends with at most one status merge-patch. `status.runtime` belongs to the
//! runtime controller and is never written here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use switchyard_common::crd::{
    DeploymentPhase, InferenceProvider, ModelDeployment, ModelDeploymentStatus, ProviderAssignment,
    RuntimeStatus,
};
use switchyard_common::events::{actions, event_ref, reasons, EventPublisher};
use switchyard_common::validation::{summarize, validate_spec};
use switchyard_common::{backoff_delay_secs, Error, MatchContext};
use switchyard_selection::{SelectionEngine, SelectionOutcome};

use crate::client::DeploymentClient;

/// Re-check interval for a serving deployment
pub const READY_RECHECK: Duration = Duration::from_secs(300);

/// Re-check interval while the runtime is still materializing children
pub const PROVISIONING_RECHECK: Duration = Duration::from_secs(30);

/// Shared state for the ModelDeployment controller
pub struct Context {
    /// API seam
    pub client: Arc<dyn DeploymentClient>,
    /// Selection engine with its compiled-rule cache
    pub engine: SelectionEngine,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Consecutive failures per `namespace/name`, drives requeue backoff
    failures: DashMap<String, u32>,
}

impl Context {
    /// Create a context with a fresh selection engine
    pub fn new(client: Arc<dyn DeploymentClient>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            client,
            engine: SelectionEngine::new(),
            events,
            failures: DashMap::new(),
        }
    }

    /// Share an existing engine (and its rule cache)
    pub fn with_engine(mut self, engine: SelectionEngine) -> Self {
        self.engine = engine;
        self
    }

    fn next_backoff(&self, key: &str) -> Duration {
        let mut failures = self.failures.entry(key.to_string()).or_insert(0);
        let delay = backoff_delay_secs(*failures);
        *failures = failures.saturating_add(1);
        Duration::from_secs(delay)
    }

    fn reset_backoff(&self, key: &str) {
        self.failures.remove(key);
    }
}

/// An Event to publish once the status write went through
struct Note {
    type_: EventType,
    reason: &'static str,
    action: &'static str,
    message: String,
}

impl Note {
    fn normal(reason: &'static str, action: &'static str, message: String) -> Self {
        Self {
            type_: EventType::Normal,
            reason,
            action,
            message,
        }
    }

    fn warning(reason: &'static str, action: &'static str, message: String) -> Self {
        Self {
            type_: EventType::Warning,
            reason,
            action,
            message,
        }
    }
}

/// Reconcile one ModelDeployment.
///
/// The object handed in by the controller may lag behind the API server, so
/// the pass works on a fresh read.
#[instrument(
    skip(md, ctx),
    fields(deployment = %md.name_any(), namespace = ?md.namespace())
)]
pub async fn reconcile(md: Arc<ModelDeployment>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = md.name_any();
    let namespace = md
        .namespace()
        .ok_or_else(|| Error::validation("ModelDeployment must be namespaced"))?;
    let key = format!("{namespace}/{name}");

    let Some(current) = ctx.client.get(&namespace, &name).await? else {
        debug!("ModelDeployment is gone");
        ctx.reset_backoff(&key);
        return Ok(Action::await_change());
    };

    let generation = current.metadata.generation;
    let status = current.status.clone().unwrap_or_default();
    if let (Some(seen), Some(generation)) = (status.observed_generation, generation) {
        if seen > generation {
            debug!(seen, generation, "status is ahead of this copy, skipping");
            return Ok(Action::await_change());
        }
    }

    let mut next = status.clone();
    next.observed_generation = generation;
    let mut notes = Vec::new();

    let action = plan(&current, &status, &mut next, &mut notes, &ctx, &key).await?;

    if write_status(&ctx, &namespace, &name, current.status.as_ref(), &next).await? {
        info!(phase = %next.phase, message = ?next.message, "Updated ModelDeployment status");
    }

    let reference = event_ref(&current);
    for note in notes {
        ctx.events
            .publish(
                &reference,
                note.type_,
                note.reason,
                note.action,
                Some(note.message),
            )
            .await;
    }

    Ok(action)
}

/// Compute the next status and the follow-up action for one pass
async fn plan(
    md: &ModelDeployment,
    status: &ModelDeploymentStatus,
    next: &mut ModelDeploymentStatus,
    notes: &mut Vec<Note>,
    ctx: &Context,
    key: &str,
) -> Result<Action, Error> {
    if let Err(errors) = validate_spec(&md.spec) {
        let message = format!("invalid spec: {}", summarize(&errors));
        warn!(%message, "ModelDeployment failed validation");
        if status.phase != DeploymentPhase::Failed || status.message.as_ref() != Some(&message) {
            notes.push(Note::warning(
                reasons::VALIDATION_FAILED,
                actions::RECONCILE,
                message.clone(),
            ));
        }
        next.phase = DeploymentPhase::Failed;
        next.message = Some(message);
        ctx.reset_backoff(key);
        return Ok(Action::await_change());
    }

    let selection_key = md.spec.selection_key();
    let assignment = match status
        .provider
        .as_ref()
        .filter(|p| p.selection_key == selection_key)
    {
        Some(assignment) => assignment.clone(),
        None => match select(md, &selection_key, ctx).await? {
            Selected::Provider(assignment) => {
                info!(provider = %assignment.name, "Assigned provider");
                notes.push(Note::normal(
                    reasons::PROVIDER_SELECTED,
                    actions::SELECT,
                    format!(
                        "assigned to {}: {}",
                        assignment.name,
                        assignment.reason.as_deref().unwrap_or_default()
                    ),
                ));
                next.provider = Some(assignment.clone());
                next.replicas = None;
                assignment
            }
            Selected::NoProviders => {
                next.phase = DeploymentPhase::Pending;
                next.provider = None;
                next.replicas = None;
                next.message = Some("waiting for an inference provider to register".to_string());
                return Ok(Action::requeue(ctx.next_backoff(key)));
            }
            Selected::NoMatch(reason) => {
                let message = format!("no eligible provider: {reason}");
                warn!(%message, "No provider can serve this ModelDeployment");
                if status.phase != DeploymentPhase::Failed
                    || status.message.as_ref() != Some(&message)
                {
                    notes.push(Note::warning(
                        reasons::NO_ELIGIBLE_PROVIDER,
                        actions::SELECT,
                        message.clone(),
                    ));
                }
                next.phase = DeploymentPhase::Failed;
                next.provider = None;
                next.replicas = None;
                next.message = Some(message);
                return Ok(Action::requeue(ctx.next_backoff(key)));
            }
        },
    };

    ctx.reset_backoff(key);
    let runtime = status
        .runtime
        .as_ref()
        .filter(|r| r.provider == assignment.name && r.observed_generation == md.metadata.generation);
    Ok(mirror_runtime(&assignment, runtime, status, next, notes))
}

enum Selected {
    Provider(ProviderAssignment),
    NoProviders,
    NoMatch(String),
}

async fn select(md: &ModelDeployment, selection_key: &str, ctx: &Context) -> Result<Selected, Error> {
    // A context that fails to build aborts the pass; rules never see a partial view.
    let match_ctx = MatchContext::from_deployment(md)?;
    let providers: Vec<InferenceProvider> = ctx.client.list_providers().await?;
    if providers.is_empty() {
        debug!("provider registry is empty");
        return Ok(Selected::NoProviders);
    }

    let outcome = ctx
        .engine
        .select(&md.spec, &match_ctx, &providers, Utc::now())
        .map_err(|e| Error::selection_for(md.name_any(), e.to_string()))?;

    Ok(match outcome {
        SelectionOutcome::Selected(selection) => Selected::Provider(ProviderAssignment {
            name: selection.provider,
            api_version: selection.api_version,
            kind: selection.kind,
            selection_key: selection_key.to_string(),
            reason: Some(selection.reason),
        }),
        SelectionOutcome::NoMatch { reason } => Selected::NoMatch(reason),
    })
}

/// Fold the runtime controller's report for the current generation into the
/// user-facing phase. Without a current report the deployment is provisioning.
fn mirror_runtime(
    assignment: &ProviderAssignment,
    runtime: Option<&RuntimeStatus>,
    status: &ModelDeploymentStatus,
    next: &mut ModelDeploymentStatus,
    notes: &mut Vec<Note>,
) -> Action {
    if let Some(runtime) = runtime {
        next.replicas = runtime.replicas.clone();
    }

    match runtime {
        Some(runtime) if runtime.failed => {
            let message = runtime
                .message
                .clone()
                .unwrap_or_else(|| format!("provider {} cannot serve this deployment", assignment.name));
            if status.phase != DeploymentPhase::Failed || status.message.as_ref() != Some(&message) {
                notes.push(Note::warning(
                    reasons::DEPLOYMENT_FAILED,
                    actions::RECONCILE,
                    message.clone(),
                ));
            }
            next.phase = DeploymentPhase::Failed;
            next.message = Some(message);
            Action::await_change()
        }
        Some(runtime) if runtime.ready => {
            if status.phase != DeploymentPhase::Ready {
                notes.push(Note::normal(
                    reasons::DEPLOYMENT_READY,
                    actions::RECONCILE,
                    format!("serving on {}", assignment.name),
                ));
            }
            next.phase = DeploymentPhase::Ready;
            next.message = None;
            Action::requeue(READY_RECHECK)
        }
        _ => {
            next.phase = DeploymentPhase::Provisioning;
            next.message = None;
            Action::requeue(PROVISIONING_RECHECK)
        }
    }
}

/// Patch the status subresource when `next` differs from what is stored.
/// Returns whether a write happened.
async fn write_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    current: Option<&ModelDeploymentStatus>,
    next: &ModelDeploymentStatus,
) -> Result<bool, Error> {
    if current == Some(next) {
        return Ok(false);
    }
    let patch = status_patch(current, next)?;
    if patch.as_object().is_some_and(Map::is_empty) {
        return Ok(false);
    }
    ctx.client
        .patch_status(namespace, name, &json!({ "status": patch }))
        .await?;
    Ok(true)
}

/// Merge patch turning `current` into `next`, leaving `runtime` alone.
///
/// Fields that `next` no longer carries become explicit nulls so a stale
/// message or assignment cannot survive the merge.
pub(crate) fn status_patch(
    current: Option<&ModelDeploymentStatus>,
    next: &ModelDeploymentStatus,
) -> Result<Value, Error> {
    let mut before = match current {
        Some(status) => serde_json::to_value(status)?,
        None => Value::Object(Map::new()),
    };
    let mut after = serde_json::to_value(next)?;
    for value in [&mut before, &mut after] {
        if let Some(obj) = value.as_object_mut() {
            obj.remove("runtime");
        }
    }
    Ok(merge_diff(&before, &after))
}

fn merge_diff(before: &Value, after: &Value) -> Value {
    let (Value::Object(before), Value::Object(after)) = (before, after) else {
        return after.clone();
    };
    let mut patch = Map::new();
    for (key, value) in after {
        match before.get(key) {
            Some(old) if old == value => {}
            Some(old) => {
                patch.insert(key.clone(), merge_diff(old, value));
            }
            None => {
                patch.insert(key.clone(), value.clone());
            }
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    Value::Object(patch)
}

/// Error policy for the ModelDeployment controller.
///
/// Errors that need a spec change wait for one; everything else requeues
/// with per-deployment exponential backoff.
pub fn error_policy(md: Arc<ModelDeployment>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = md.name_any();
    if !error.is_retryable() {
        warn!(deployment = %name, error = %error, "ModelDeployment reconcile failed permanently");
        return Action::await_change();
    }
    let key = format!("{}/{}", md.namespace().unwrap_or_default(), name);
    let delay = ctx.next_backoff(&key);
    warn!(
        deployment = %name,
        error = %error,
        retry_in_secs = delay.as_secs(),
        "ModelDeployment reconcile failed, will retry"
    );
    Action::requeue(delay)
}

/// Whether a deployment still needs a provider for its current inputs
pub fn needs_selection(md: &ModelDeployment) -> bool {
    match md.status.as_ref().and_then(|s| s.provider.as_ref()) {
        Some(assignment) => assignment.selection_key != md.spec.selection_key(),
        None => true,
    }
}

/// Watch mapper: a registry change re-enqueues every deployment that has no
/// provider for its current selection key.
pub fn unassigned_deployments(
    store: Store<ModelDeployment>,
) -> impl Fn(InferenceProvider) -> Vec<ObjectRef<ModelDeployment>> {
    move |provider: InferenceProvider| {
        let refs: Vec<_> = store
            .state()
            .iter()
            .filter(|md| needs_selection(md))
            .map(|md| ObjectRef::from_obj(&**md))
            .collect();
        if !refs.is_empty() {
            debug!(provider = %provider.name_any(), count = refs.len(), "Registry change re-enqueues deployments");
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockDeploymentClient;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use k8s_openapi::api::core::v1::ObjectReference;
    use parking_lot::Mutex;
    use switchyard_common::crd::{
        EngineType, InferenceProviderSpec, InferenceProviderStatus, ModelDeploymentSpec, ModelSourceKind,
        ProviderCapabilities, ProviderResource, ReplicaSummary, RoleScaling, SelectionRule,
        ServingMode,
    };

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

    fn gpu_spec() -> ModelDeploymentSpec {
        let mut spec = ModelDeploymentSpec::default();
        spec.model.id = "meta-llama/Llama-3.1-8B-Instruct".to_string();
        spec.resources.gpu = Some(switchyard_common::crd::GpuSpec {
            count: 1,
            gpu_type: None,
        });
        spec
    }

    fn deployment(spec: ModelDeploymentSpec, status: Option<ModelDeploymentStatus>) -> ModelDeployment {
        let mut md = ModelDeployment::new("llama", spec);
        md.metadata.namespace = Some("ml".to_string());
        md.metadata.generation = Some(1);
        md.metadata.uid = Some("uid-1".to_string());
        md.status = status;
        md
    }

    fn provider(name: &str, rules: &[(&str, i32)], heartbeat_age_secs: i64) -> InferenceProvider {
        let mut p = InferenceProvider::new(
            name,
            InferenceProviderSpec {
                display_name: None,
                capabilities: ProviderCapabilities {
                    engines: vec![EngineType::Vllm],
                    serving_modes: ServingMode::ALL.to_vec(),
                    cpu: false,
                    gpu: true,
                },
                selection_rules: rules
                    .iter()
                    .map(|(expression, priority)| SelectionRule {
                        expression: expression.to_string(),
                        priority: *priority,
                    })
                    .collect(),
                resource: ProviderResource {
                    api_version: "serving.example.com/v1".to_string(),
                    kind: format!("{name}Service"),
                },
                installation: None,
            },
        );
        p.status = Some(InferenceProviderStatus {
            ready: true,
            last_heartbeat: Some(Utc::now() - ChronoDuration::seconds(heartbeat_age_secs)),
            heartbeat_interval_seconds: 60,
            ..Default::default()
        });
        p
    }

    fn assignment(name: &str, spec: &ModelDeploymentSpec) -> ProviderAssignment {
        ProviderAssignment {
            name: name.to_string(),
            api_version: "serving.example.com/v1".to_string(),
            kind: format!("{name}Service"),
            selection_key: spec.selection_key(),
            reason: Some("rule matched".to_string()),
        }
    }

    fn runtime(provider: &str, generation: i64) -> RuntimeStatus {
        RuntimeStatus {
            provider: provider.to_string(),
            observed_generation: Some(generation),
            ..Default::default()
        }
    }

    /// Mock that serves `md` and records every status patch
    fn client_for(md: &ModelDeployment, patches: &Arc<Mutex<Vec<Value>>>) -> MockDeploymentClient {
        let mut client = MockDeploymentClient::new();
        let served = md.clone();
        client
            .expect_get()
            .returning(move |_, _| Ok(Some(served.clone())));
        let sink = patches.clone();
        client
            .expect_patch_status()
            .returning(move |_, _, patch| {
                sink.lock().push(patch.clone());
                Ok(())
            });
        client
    }

    fn context(client: MockDeploymentClient, events: &Arc<RecordingEvents>) -> Arc<Context> {
        Arc::new(Context::new(Arc::new(client), events.clone()))
    }

    fn patched_status(patches: &Arc<Mutex<Vec<Value>>>) -> Value {
        let patches = patches.lock();
        assert_eq!(patches.len(), 1, "expected exactly one status write");
        patches[0]["status"].clone()
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Story: P1 matches aggregated deployments at priority 50, P2 matches
    /// everything at priority 10. The aggregated vllm deployment goes to P1,
    /// lands in Provisioning and is re-checked shortly.
    #[tokio::test]
    async fn story_higher_priority_rule_wins() {
        let md = deployment(gpu_spec(), None);
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut client = client_for(&md, &patches);
        client.expect_list_providers().times(1).returning(|| {
            Ok(vec![
                provider("p2", &[("true", 10)], 0),
                provider("p1", &[(r#"spec.serving.mode == "aggregated""#, 50)], 0),
            ])
        });
        let events = Arc::new(RecordingEvents::default());

        let action = reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        assert_eq!(action, Action::requeue(PROVISIONING_RECHECK));
        let status = patched_status(&patches);
        assert_eq!(status["phase"], "Provisioning");
        assert_eq!(status["observedGeneration"], 1);
        assert_eq!(status["provider"]["name"], "p1");
        assert_eq!(status["provider"]["kind"], "p1Service");
        assert_eq!(status["provider"]["selectionKey"], "vllm/aggregated/huggingface/-/gpu");
        assert_eq!(*events.reasons.lock(), vec![reasons::PROVIDER_SELECTED]);
    }

    #[tokio::test]
    async fn stale_heartbeat_excludes_provider() {
        let md = deployment(gpu_spec(), None);
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut client = client_for(&md, &patches);
        client.expect_list_providers().returning(|| {
            Ok(vec![
                // ten minutes stale against a one minute interval, still ready=true
                provider("a-stale", &[("true", 90)], 600),
                provider("b-fresh", &[("true", 10)], 0),
            ])
        });
        let events = Arc::new(RecordingEvents::default());

        reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        assert_eq!(patched_status(&patches)["provider"]["name"], "b-fresh");
    }

    #[tokio::test]
    async fn no_eligible_provider_fails_and_backs_off() {
        let mut spec = gpu_spec();
        spec.engine.engine_type = EngineType::Trtllm;
        let md = deployment(spec, None);
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut client = client_for(&md, &patches);
        client
            .expect_list_providers()
            .returning(|| Ok(vec![provider("p1", &[("true", 10)], 0)]));
        let events = Arc::new(RecordingEvents::default());
        let ctx = context(client, &events);

        let first = reconcile(Arc::new(md.clone()), ctx.clone())
            .await
            .expect("reconcile");
        let second = reconcile(Arc::new(md), ctx).await.expect("reconcile");

        assert_eq!(first, Action::requeue(Duration::from_secs(30)));
        assert_eq!(second, Action::requeue(Duration::from_secs(60)));
        let patches = patches.lock();
        let status = &patches[0]["status"];
        assert_eq!(status["phase"], "Failed");
        let message = status["message"].as_str().expect("message");
        assert!(message.starts_with("no eligible provider:"), "{message}");
        assert_eq!(events.reasons.lock()[0], reasons::NO_ELIGIBLE_PROVIDER);
    }

    #[tokio::test]
    async fn empty_registry_leaves_deployment_pending() {
        let md = deployment(gpu_spec(), None);
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut client = client_for(&md, &patches);
        client.expect_list_providers().returning(|| Ok(vec![]));
        let events = Arc::new(RecordingEvents::default());

        let action = reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
        assert_eq!(patched_status(&patches)["phase"], "Pending");
        assert!(events.reasons.lock().is_empty());
    }

    #[tokio::test]
    async fn selection_clears_stale_failure_message() {
        let previous = ModelDeploymentStatus {
            phase: DeploymentPhase::Failed,
            observed_generation: Some(1),
            message: Some("no eligible provider: nothing supports vllm".to_string()),
            ..Default::default()
        };
        let md = deployment(gpu_spec(), Some(previous));
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut client = client_for(&md, &patches);
        client
            .expect_list_providers()
            .returning(|| Ok(vec![provider("p1", &[("true", 10)], 0)]));
        let events = Arc::new(RecordingEvents::default());

        reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        let status = patched_status(&patches);
        assert_eq!(status["phase"], "Provisioning");
        assert!(status.as_object().expect("object").contains_key("message"));
        assert_eq!(status["message"], Value::Null);
    }

    #[tokio::test]
    async fn changed_selection_inputs_reselect() {
        let mut old_spec = gpu_spec();
        old_spec.engine.engine_type = EngineType::Sglang;
        let previous = ModelDeploymentStatus {
            phase: DeploymentPhase::Ready,
            observed_generation: Some(1),
            provider: Some(assignment("p2", &old_spec)),
            replicas: Some(ReplicaSummary { desired: 1, ready: 1 }),
            runtime: Some(RuntimeStatus {
                ready: true,
                ..runtime("p2", 1)
            }),
            ..Default::default()
        };
        let mut md = deployment(gpu_spec(), Some(previous));
        md.metadata.generation = Some(2);
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut client = client_for(&md, &patches);
        client
            .expect_list_providers()
            .times(1)
            .returning(|| Ok(vec![provider("p1", &[("true", 10)], 0)]));
        let events = Arc::new(RecordingEvents::default());

        reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        let status = patched_status(&patches);
        assert_eq!(status["provider"]["name"], "p1");
        assert_eq!(status["phase"], "Provisioning");
        assert_eq!(status["replicas"], Value::Null);
        assert!(!status.as_object().expect("object").contains_key("runtime"));
    }

    #[tokio::test]
    async fn rule_evaluation_error_aborts_without_status_write() {
        let md = deployment(gpu_spec(), None);
        let mut client = MockDeploymentClient::new();
        let served = md.clone();
        client
            .expect_get()
            .returning(move |_, _| Ok(Some(served.clone())));
        // a string-valued rule is an evaluation error, not a match
        client
            .expect_list_providers()
            .returning(|| Ok(vec![provider("p1", &[("spec.engine.type", 10)], 0)]));
        client.expect_patch_status().never();
        let events = Arc::new(RecordingEvents::default());

        let err = reconcile(Arc::new(md), context(client, &events))
            .await
            .expect_err("evaluation error must surface");

        assert!(matches!(err, Error::Selection { .. }), "{err:?}");
        assert!(err.is_retryable());
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Story: GPU count 2, disaggregated, but only the prefill role is given.
    /// The pass stops at validation: Failed, no registry read, no requeue.
    #[tokio::test]
    async fn story_disaggregated_without_decode_fails_validation() {
        let mut spec = gpu_spec();
        spec.serving.mode = ServingMode::Disaggregated;
        spec.resources.gpu = Some(switchyard_common::crd::GpuSpec {
            count: 2,
            gpu_type: None,
        });
        spec.scaling.prefill = Some(RoleScaling { replicas: 1, gpus: 1 });
        let md = deployment(spec, None);
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut client = client_for(&md, &patches);
        client.expect_list_providers().never();
        let events = Arc::new(RecordingEvents::default());

        let action = reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        assert_eq!(action, Action::await_change());
        let status = patched_status(&patches);
        assert_eq!(status["phase"], "Failed");
        let message = status["message"].as_str().expect("message");
        assert!(message.starts_with("invalid spec:"), "{message}");
        assert!(message.contains("spec.scaling.decode"), "{message}");
        assert!(status.get("provider").is_none());
        assert_eq!(*events.reasons.lock(), vec![reasons::VALIDATION_FAILED]);
    }

    // =========================================================================
    // Runtime mirroring
    // =========================================================================

    #[tokio::test]
    async fn ready_deployment_with_unchanged_inputs_writes_nothing() {
        let spec = gpu_spec();
        let replicas = ReplicaSummary { desired: 2, ready: 2 };
        let status = ModelDeploymentStatus {
            phase: DeploymentPhase::Ready,
            observed_generation: Some(1),
            provider: Some(assignment("p1", &spec)),
            message: None,
            replicas: Some(replicas.clone()),
            runtime: Some(RuntimeStatus {
                ready: true,
                replicas: Some(replicas),
                ..runtime("p1", 1)
            }),
        };
        let md = deployment(spec, Some(status));
        let mut client = MockDeploymentClient::new();
        let served = md.clone();
        client
            .expect_get()
            .returning(move |_, _| Ok(Some(served.clone())));
        client.expect_list_providers().never();
        client.expect_patch_status().never();
        let events = Arc::new(RecordingEvents::default());

        let action = reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        assert_eq!(action, Action::requeue(READY_RECHECK));
        assert!(events.reasons.lock().is_empty());
    }

    #[tokio::test]
    async fn runtime_readiness_is_mirrored() {
        let spec = gpu_spec();
        let status = ModelDeploymentStatus {
            phase: DeploymentPhase::Provisioning,
            observed_generation: Some(1),
            provider: Some(assignment("p1", &spec)),
            runtime: Some(RuntimeStatus {
                ready: true,
                replicas: Some(ReplicaSummary { desired: 3, ready: 3 }),
                ..runtime("p1", 1)
            }),
            ..Default::default()
        };
        let md = deployment(spec, Some(status));
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut client = client_for(&md, &patches);
        client.expect_list_providers().never();
        let events = Arc::new(RecordingEvents::default());

        let action = reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        assert_eq!(action, Action::requeue(READY_RECHECK));
        let status = patched_status(&patches);
        assert_eq!(status["phase"], "Ready");
        assert_eq!(status["replicas"], json!({"desired": 3, "ready": 3}));
        assert_eq!(*events.reasons.lock(), vec![reasons::DEPLOYMENT_READY]);
    }

    #[tokio::test]
    async fn runtime_report_for_older_generation_is_not_mirrored() {
        let spec = gpu_spec();
        let status = ModelDeploymentStatus {
            phase: DeploymentPhase::Ready,
            observed_generation: Some(1),
            provider: Some(assignment("p1", &spec)),
            runtime: Some(RuntimeStatus {
                ready: true,
                ..runtime("p1", 1)
            }),
            ..Default::default()
        };
        let mut md = deployment(spec, Some(status));
        md.metadata.generation = Some(2);
        let patches = Arc::new(Mutex::new(Vec::new()));
        let client = client_for(&md, &patches);
        let events = Arc::new(RecordingEvents::default());

        reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        let status = patched_status(&patches);
        assert_eq!(status["phase"], "Provisioning");
        assert_eq!(status["observedGeneration"], 2);
    }

    /// Story: the runtime discovers it has no CPU path after being assigned.
    /// The deployment turns Failed with the runtime's message and stays on
    /// its provider until the user edits the spec.
    #[tokio::test]
    async fn story_runtime_infeasibility_fails_without_reselection() {
        let spec = gpu_spec();
        let status = ModelDeploymentStatus {
            phase: DeploymentPhase::Provisioning,
            observed_generation: Some(1),
            provider: Some(assignment("p1", &spec)),
            runtime: Some(RuntimeStatus {
                failed: true,
                message: Some("this runtime has no CPU serving path".to_string()),
                ..runtime("p1", 1)
            }),
            ..Default::default()
        };
        let md = deployment(spec, Some(status));
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut client = client_for(&md, &patches);
        client.expect_list_providers().never();
        let events = Arc::new(RecordingEvents::default());

        let action = reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        assert_eq!(action, Action::await_change());
        let status = patched_status(&patches);
        assert_eq!(status["phase"], "Failed");
        assert_eq!(status["message"], "this runtime has no CPU serving path");
        assert!(status.get("provider").is_none(), "assignment must be untouched");
        assert_eq!(*events.reasons.lock(), vec![reasons::DEPLOYMENT_FAILED]);
    }

    #[tokio::test]
    async fn runtime_report_from_another_provider_is_ignored() {
        let spec = gpu_spec();
        let status = ModelDeploymentStatus {
            phase: DeploymentPhase::Provisioning,
            observed_generation: Some(1),
            provider: Some(assignment("p1", &spec)),
            runtime: Some(RuntimeStatus {
                failed: true,
                ..runtime("p2", 1)
            }),
            ..Default::default()
        };
        let md = deployment(spec, Some(status));
        let mut client = MockDeploymentClient::new();
        let served = md.clone();
        client
            .expect_get()
            .returning(move |_, _| Ok(Some(served.clone())));
        client.expect_patch_status().never();
        let events = Arc::new(RecordingEvents::default());

        let action = reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        assert_eq!(action, Action::requeue(PROVISIONING_RECHECK));
    }

    // =========================================================================
    // Lifecycle guards
    // =========================================================================

    #[tokio::test]
    async fn deleted_deployment_is_a_noop() {
        let md = deployment(gpu_spec(), None);
        let mut client = MockDeploymentClient::new();
        client.expect_get().returning(|_, _| Ok(None));
        client.expect_list_providers().never();
        client.expect_patch_status().never();
        let events = Arc::new(RecordingEvents::default());

        let action = reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn status_ahead_of_generation_is_not_regressed() {
        let status = ModelDeploymentStatus {
            phase: DeploymentPhase::Ready,
            observed_generation: Some(3),
            ..Default::default()
        };
        let mut md = deployment(gpu_spec(), Some(status));
        md.metadata.generation = Some(2);
        let mut client = MockDeploymentClient::new();
        let served = md.clone();
        client
            .expect_get()
            .returning(move |_, _| Ok(Some(served.clone())));
        client.expect_list_providers().never();
        client.expect_patch_status().never();
        let events = Arc::new(RecordingEvents::default());

        let action = reconcile(Arc::new(md), context(client, &events))
            .await
            .expect("reconcile");

        assert_eq!(action, Action::await_change());
    }

    #[test]
    fn error_policy_backs_off_retryable_errors_only() {
        let md = Arc::new(deployment(gpu_spec(), None));
        let events = Arc::new(RecordingEvents::default());
        let ctx = context(MockDeploymentClient::new(), &events);

        let permanent = Error::validation("ModelDeployment must be namespaced");
        assert_eq!(
            error_policy(md.clone(), &permanent, ctx.clone()),
            Action::await_change()
        );

        let transient = Error::timeout("get ModelDeployment ml/llama", Duration::from_secs(30));
        assert_eq!(
            error_policy(md.clone(), &transient, ctx.clone()),
            Action::requeue(Duration::from_secs(30))
        );
        assert_eq!(
            error_policy(md, &transient, ctx),
            Action::requeue(Duration::from_secs(60))
        );
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn needs_selection_tracks_the_selection_key() {
        let spec = gpu_spec();
        assert!(needs_selection(&deployment(spec.clone(), None)));

        let assigned = ModelDeploymentStatus {
            provider: Some(assignment("p1", &spec)),
            ..Default::default()
        };
        assert!(!needs_selection(&deployment(spec.clone(), Some(assigned.clone()))));

        let mut changed = spec.clone();
        changed.engine.engine_type = EngineType::Sglang;
        assert!(needs_selection(&deployment(changed, Some(assigned.clone()))));

        // kuberay cannot run image models, so a source switch must reselect
        let mut image = spec;
        image.model.source = ModelSourceKind::Image;
        image.model.id = "registry.example.com/models/llama:1".to_string();
        assert!(needs_selection(&deployment(image, Some(assigned))));
    }

    #[test]
    fn status_patch_nulls_dropped_fields_and_skips_runtime() {
        let current = ModelDeploymentStatus {
            phase: DeploymentPhase::Failed,
            message: Some("boom".to_string()),
            runtime: Some(runtime("p1", 1)),
            ..Default::default()
        };
        let next = ModelDeploymentStatus {
            phase: DeploymentPhase::Provisioning,
            runtime: None,
            ..Default::default()
        };

        let patch = status_patch(Some(&current), &next).expect("patch");

        assert_eq!(patch, json!({"phase": "Provisioning", "message": null}));
    }

    #[test]
    fn status_patch_recurses_into_the_assignment() {
        let spec = gpu_spec();
        let current = ModelDeploymentStatus {
            provider: Some(assignment("p1", &spec)),
            ..Default::default()
        };
        let mut next = current.clone();
        if let Some(p) = next.provider.as_mut() {
            p.reason = None;
        }

        let patch = status_patch(Some(&current), &next).expect("patch");

        assert_eq!(patch, json!({"provider": {"reason": null}}));
    }
}
