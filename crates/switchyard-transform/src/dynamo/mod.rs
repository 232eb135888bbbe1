//! NVIDIA Dynamo transformer: ModelDeployment → DynamoGraphDeployment
//!
//! Every graph has a `Frontend` plus one worker service (aggregated) or a
//! prefill and a decode worker service (disaggregated).

pub mod types;

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::Value;
use switchyard_common::crd::{
    EngineType, ModelDeployment, ModelDeploymentSpec, ModelSourceKind, ProviderResource,
    ReplicaSummary,
};

use crate::child::ChildResource;
use crate::error::TransformError;
use crate::overrides::{apply_overrides, OverrideTarget};
use crate::pod::{node_selector, render_args, secret_env};
use crate::topology::{Topology, WorkerGroup};
use crate::transformer::{count_at, find_condition, ObservedStatus, Transformer};

use types::*;

/// Provider id
pub const PROVIDER: &str = "dynamo";
/// DynamoGraphDeployment apiVersion
pub const API_VERSION: &str = "nvidia.com/v1alpha1";
/// DynamoGraphDeployment kind
pub const KIND: &str = "DynamoGraphDeployment";

const DYNAMO_VERSION: &str = "0.4.1";
const FRONTEND: &str = "Frontend";
const FRONTEND_PORT: u16 = 8000;

/// Builds DynamoGraphDeployment objects
#[derive(Clone, Copy, Debug, Default)]
pub struct DynamoTransformer;

impl Transformer for DynamoTransformer {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn resource(&self) -> ProviderResource {
        ProviderResource {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
        }
    }

    fn transform(&self, md: &ModelDeployment) -> Result<Vec<ChildResource>, TransformError> {
        let spec = &md.spec;
        check_feasible(spec)?;
        let topology = Topology::of(PROVIDER, spec)?;

        let child = ChildResource::owned_by(md, PROVIDER, API_VERSION, KIND, md.name_any())?;
        let labels = child.metadata().labels.clone();

        let mut services = BTreeMap::new();
        services.insert(FRONTEND.to_string(), frontend(spec, &labels));
        for group in topology.groups() {
            let (name, service) = worker(spec, &topology, &group, &labels);
            services.insert(name, service);
        }

        let body = GraphDeploymentBody {
            spec: GraphDeploymentSpec {
                backend_framework: spec.engine.engine_type.as_str().to_string(),
                services,
            },
        };
        let mut child = child.with_body(&body)?;
        apply_overrides(&mut child, spec.provider_overrides(), OverrideTarget::SpecField);
        Ok(vec![child])
    }

    fn observe(&self, primary: &Value) -> ObservedStatus {
        let state = primary.pointer("/status/state").and_then(Value::as_str);
        let condition = find_condition(primary, "Ready");
        let ready = state == Some("successful") || condition.map(|c| c.is_true()).unwrap_or(false);
        let failed = state == Some("failed");

        let desired = primary
            .pointer("/spec/services")
            .and_then(Value::as_object)
            .map(|services| {
                services
                    .values()
                    .filter(|s| s.get("componentType").and_then(Value::as_str) == Some("worker"))
                    .map(|s| count_at(s, "/replicas"))
                    .sum::<u32>()
            })
            .unwrap_or(0);

        ObservedStatus {
            ready,
            failed,
            message: condition
                .and_then(|c| c.message)
                .map(str::to_string)
                .or_else(|| failed.then(|| "graph deployment failed".to_string())),
            replicas: Some(ReplicaSummary {
                desired,
                ready: if ready { desired } else { 0 },
            }),
        }
    }
}

fn check_feasible(spec: &ModelDeploymentSpec) -> Result<(), TransformError> {
    if !spec.requests_gpu() {
        return Err(TransformError::infeasible(
            PROVIDER,
            "Dynamo workers need GPUs; request at least one GPU",
        ));
    }
    if spec.model.source == ModelSourceKind::Image {
        return Err(TransformError::infeasible(
            PROVIDER,
            "models packaged as images are not supported; use a huggingface or catalog source",
        ));
    }
    Ok(())
}

fn runtime_image(spec: &ModelDeploymentSpec) -> String {
    if let Some(image) = &spec.engine.image {
        return image.clone();
    }
    let runtime = match spec.engine.engine_type {
        EngineType::Vllm => "vllm-runtime",
        EngineType::Sglang => "sglang-runtime",
        EngineType::Trtllm => "tensorrtllm-runtime",
    };
    format!("nvcr.io/nvidia/ai-dynamo/{runtime}:{DYNAMO_VERSION}")
}

fn pod_labels(spec: &ModelDeploymentSpec, labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = spec.pod_template.labels.clone();
    merged.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn frontend(spec: &ModelDeploymentSpec, labels: &BTreeMap<String, String>) -> ServiceSpec {
    ServiceSpec {
        component_type: "frontend".to_string(),
        sub_component_type: None,
        replicas: 1,
        labels: pod_labels(spec, labels),
        annotations: spec.pod_template.annotations.clone(),
        resources: None,
        envs: Vec::new(),
        extra_pod_spec: ExtraPodSpec {
            main_container: MainContainer {
                image: runtime_image(spec),
                working_dir: None,
                command: vec!["python3".into(), "-m".into(), "dynamo.frontend".into()],
                args: vec![format!("--http-port={FRONTEND_PORT}")],
            },
            node_selector: spec.pod_template.node_selector.clone(),
            tolerations: spec.pod_template.tolerations.clone(),
        },
    }
}

fn worker(
    spec: &ModelDeploymentSpec,
    topology: &Topology,
    group: &WorkerGroup,
    labels: &BTreeMap<String, String>,
) -> (String, ServiceSpec) {
    let engine = spec.engine.engine_type;
    let prefix = match engine {
        EngineType::Vllm => "Vllm",
        EngineType::Sglang => "Sglang",
        EngineType::Trtllm => "Trtllm",
    };
    let (name, sub_component) = match topology {
        Topology::Aggregated(_) => (format!("{prefix}Worker"), None),
        Topology::Disaggregated { .. } if group.role == "prefill" => {
            (format!("{prefix}PrefillWorker"), Some("prefill".to_string()))
        }
        Topology::Disaggregated { .. } => {
            (format!("{prefix}DecodeWorker"), Some("decode".to_string()))
        }
    };

    let resources = ServiceResources {
        requests: ResourceItem {
            cpu: spec.resources.cpu.clone(),
            memory: spec.resources.memory.clone(),
            gpu: None,
        },
        limits: ResourceItem {
            cpu: None,
            memory: spec.resources.memory.clone(),
            gpu: (group.gpus > 0).then(|| group.gpus.to_string()),
        },
    };

    let service = ServiceSpec {
        component_type: "worker".to_string(),
        sub_component_type: sub_component.clone(),
        replicas: group.replicas,
        labels: pod_labels(spec, labels),
        annotations: spec.pod_template.annotations.clone(),
        resources: Some(resources),
        envs: secret_env(spec),
        extra_pod_spec: ExtraPodSpec {
            main_container: MainContainer {
                image: runtime_image(spec),
                working_dir: Some("/workspace".to_string()),
                command: vec!["python3".into(), "-m".into(), format!("dynamo.{engine}")],
                args: worker_args(spec, group, sub_component.as_deref()),
            },
            node_selector: node_selector(spec),
            tolerations: spec.pod_template.tolerations.clone(),
        },
    };
    (name, service)
}

/// Worker command line: model identity, role flags, then user args in key
/// order. User args win over derived tensor parallelism.
fn worker_args(spec: &ModelDeploymentSpec, group: &WorkerGroup, role: Option<&str>) -> Vec<String> {
    let engine = spec.engine.engine_type;
    let model_flag = match engine {
        EngineType::Vllm => "--model",
        EngineType::Sglang | EngineType::Trtllm => "--model-path",
    };
    let mut args = vec![
        model_flag.to_string(),
        spec.model.id.clone(),
        "--served-model-name".to_string(),
        spec.model.served_name().to_string(),
    ];

    if let Some(role) = role {
        match engine {
            EngineType::Vllm if role == "prefill" => args.push("--is-prefill-worker".to_string()),
            EngineType::Vllm => {}
            EngineType::Sglang | EngineType::Trtllm => {
                args.push("--disaggregation-mode".to_string());
                args.push(role.to_string());
            }
        }
    }

    let tp_flag = match engine {
        EngineType::Sglang => "tp-size",
        EngineType::Vllm | EngineType::Trtllm => "tensor-parallel-size",
    };
    if group.gpus > 1 && !spec.engine.args.contains_key(tp_flag) {
        args.push(format!("--{tp_flag}={}", group.gpus));
    }
    if let (EngineType::Vllm, Some(revision)) = (engine, &spec.model.revision) {
        if !spec.engine.args.contains_key("revision") {
            args.push(format!("--revision={revision}"));
        }
    }

    args.extend(render_args(&spec.engine.args));
    args
}
