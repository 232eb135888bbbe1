//! KAITO transformer: ModelDeployment → Workspace (+ inference ConfigMap)
//!
//! Aggregated vLLM only. This is the one built-in runtime with a CPU serving
//! path. Engine args are passed through a ConfigMap referenced by
//! `inference.config`, since Workspaces have no args field.

pub mod types;

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::Value;
use switchyard_common::crd::{
    EngineType, ModelDeployment, ModelDeploymentSpec, ModelSourceKind, ProviderResource,
    ReplicaSummary, ServingMode,
};
use switchyard_common::DEPLOYMENT_LABEL;

use crate::child::ChildResource;
use crate::error::TransformError;
use crate::overrides::{apply_overrides, OverrideTarget};
use crate::pod::{
    render_args, secret_env, typed_value, Container, ContainerPort, EnvVar, PodTemplate,
    ResourceRequirements,
};
use crate::transformer::{count_at, find_condition, ObservedStatus, Transformer};

use types::*;

/// Provider id
pub const PROVIDER: &str = "kaito";
/// Workspace apiVersion
pub const API_VERSION: &str = "kaito.sh/v1beta1";
/// Workspace kind
pub const KIND: &str = "Workspace";
/// Annotation selecting the inference runtime
pub const RUNTIME_ANNOTATION: &str = "kaito.sh/runtime";
/// Node label read for the instance type
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";
/// Key of the inference config inside the ConfigMap
pub const INFERENCE_CONFIG_KEY: &str = "inference_config.yaml";

const MODEL_PORT: u16 = 5000;

/// Builds KAITO Workspaces
#[derive(Clone, Copy, Debug, Default)]
pub struct KaitoTransformer;

impl Transformer for KaitoTransformer {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn resource(&self) -> ProviderResource {
        ProviderResource {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
        }
    }

    fn child_kinds(&self) -> Vec<ProviderResource> {
        vec![
            self.resource(),
            ProviderResource {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
            },
        ]
    }

    fn transform(&self, md: &ModelDeployment) -> Result<Vec<ChildResource>, TransformError> {
        let spec = &md.spec;
        check_feasible(spec)?;
        let name = md.name_any();

        let mut children = Vec::new();
        let config = match inference_config(spec)? {
            Some(data) => {
                let config_name = format!("{name}-inference-config");
                children.push(
                    ChildResource::owned_by(md, PROVIDER, "v1", "ConfigMap", &config_name)?
                        .with_body(&ConfigMapBody {
                            data: BTreeMap::from([(INFERENCE_CONFIG_KEY.to_string(), data)]),
                        })?,
                );
                Some(config_name)
            }
            None => None,
        };

        let workspace = ChildResource::owned_by(md, PROVIDER, API_VERSION, KIND, &name)?
            .with_annotation(RUNTIME_ANNOTATION, spec.engine.engine_type.as_str());
        let labels = workspace.metadata().labels.clone();
        let body = WorkspaceBody {
            resource: WorkspaceResource {
                count: spec.replicas(),
                instance_type: spec.pod_template.node_selector.get(INSTANCE_TYPE_LABEL).cloned(),
                label_selector: LabelSelector {
                    match_labels: BTreeMap::from([(DEPLOYMENT_LABEL.to_string(), name.clone())]),
                },
            },
            inference: inference(spec, &labels, config),
        };
        let mut workspace = workspace.with_body(&body)?;
        apply_overrides(&mut workspace, spec.provider_overrides(), OverrideTarget::Body);

        // Workspace first: it is the primary object
        children.insert(0, workspace);
        Ok(children)
    }

    fn observe(&self, primary: &Value) -> ObservedStatus {
        let succeeded = find_condition(primary, "WorkspaceSucceeded");
        let ready = succeeded.map(|c| c.is_true()).unwrap_or(false);
        let failed = succeeded
            .filter(|c| c.is_false())
            .and_then(|c| c.reason)
            .map(|r| r.to_ascii_lowercase().contains("failed"))
            .unwrap_or(false);
        let message = succeeded
            .and_then(|c| c.message)
            .or_else(|| find_condition(primary, "InferenceReady").and_then(|c| c.message))
            .map(str::to_string);

        let desired = count_at(primary, "/resource/count");
        ObservedStatus {
            ready,
            failed,
            message,
            replicas: Some(ReplicaSummary {
                desired,
                ready: if ready { desired } else { 0 },
            }),
        }
    }
}

fn check_feasible(spec: &ModelDeploymentSpec) -> Result<(), TransformError> {
    if spec.engine.engine_type != EngineType::Vllm {
        return Err(TransformError::infeasible(
            PROVIDER,
            format!("KAITO workspaces run vllm, not {}", spec.engine.engine_type),
        ));
    }
    if spec.serving.mode != ServingMode::Aggregated {
        return Err(TransformError::infeasible(
            PROVIDER,
            "KAITO workspaces only support aggregated serving",
        ));
    }
    Ok(())
}

/// `vllm:` section of the KAITO inference config, keys in order
fn inference_config(spec: &ModelDeploymentSpec) -> Result<Option<String>, TransformError> {
    if spec.engine.args.is_empty() || spec.model.source == ModelSourceKind::Image {
        return Ok(None);
    }
    let args: BTreeMap<&str, Value> = spec
        .engine
        .args
        .iter()
        .map(|(k, v)| (k.as_str(), typed_value(v)))
        .collect();
    let doc = BTreeMap::from([("vllm", args)]);
    serde_yaml::to_string(&doc)
        .map(Some)
        .map_err(|e| TransformError::serialization(INFERENCE_CONFIG_KEY, e))
}

fn inference(
    spec: &ModelDeploymentSpec,
    labels: &BTreeMap<String, String>,
    config: Option<String>,
) -> InferenceSpec {
    match spec.model.source {
        ModelSourceKind::Image => {
            let mut env = vec![EnvVar::literal("MODEL_NAME", spec.model.served_name())];
            env.extend(secret_env(spec));
            let container = Container {
                name: "model".to_string(),
                image: spec.model.id.clone(),
                args: render_args(&spec.engine.args),
                env,
                ports: vec![ContainerPort::new("http", MODEL_PORT)],
                resources: ResourceRequirements::for_worker(
                    &spec.resources,
                    spec.resources.gpu_count(),
                ),
                ..Default::default()
            };
            InferenceSpec {
                template: Some(PodTemplate::for_deployment(spec, labels, container)),
                ..Default::default()
            }
        }
        ModelSourceKind::Catalog | ModelSourceKind::HuggingFace => InferenceSpec {
            preset: Some(PresetSpec {
                name: spec.model.id.clone(),
                preset_options: spec.secrets.hugging_face_token.as_ref().map(|s| PresetOptions {
                    model_access_secret: s.name.clone(),
                }),
            }),
            template: None,
            config,
        },
    }
}
