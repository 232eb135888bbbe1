//! KubeRay transformer: ModelDeployment → RayService running Ray Serve LLM
//!
//! Aggregated serving uses `build_openai_app`; disaggregated serving uses
//! `build_pd_openai_app` with separate prefill and decode worker groups.

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
use crate::pod::{secret_env, typed_args, Container, ContainerPort, PodTemplate, ResourceRequirements};
use crate::topology::{Topology, WorkerGroup};
use crate::transformer::{count_at, find_condition, ObservedStatus, Transformer};

use types::*;

/// Provider id
pub const PROVIDER: &str = "kuberay";
/// RayService apiVersion
pub const API_VERSION: &str = "ray.io/v1";
/// RayService kind
pub const KIND: &str = "RayService";
/// Ray LLM image used when the spec names none
pub const DEFAULT_IMAGE: &str = "rayproject/ray-llm:2.46.0-py311-cu124";
/// Ray version of [`DEFAULT_IMAGE`]
pub const RAY_VERSION: &str = "2.46.0";

const SERVE_PORT: u16 = 8000;
const OPENAI_APP: &str = "ray.serve.llm:build_openai_app";
const PD_OPENAI_APP: &str = "ray.serve.llm:build_pd_openai_app";

/// Builds RayService objects
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeRayTransformer;

impl Transformer for KubeRayTransformer {
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

        let serve = serve_config(spec, &topology);
        let serve_yaml = serde_yaml::to_string(&serve)
            .map_err(|e| TransformError::serialization("serveConfigV2", e))?;

        let child = ChildResource::owned_by(md, PROVIDER, API_VERSION, KIND, md.name_any())?;
        let labels = child.metadata().labels.clone();
        let body = RayServiceBody {
            spec: RayServiceSpec {
                serve_config_v2: serve_yaml,
                ray_cluster_config: cluster_spec(spec, &topology, &labels),
            },
        };
        let mut child = child.with_body(&body)?;
        apply_overrides(&mut child, spec.provider_overrides(), OverrideTarget::SpecField);
        Ok(vec![child])
    }

    fn observe(&self, primary: &Value) -> ObservedStatus {
        let condition = find_condition(primary, "Ready");
        let running = primary.pointer("/status/serviceStatus").and_then(Value::as_str)
            == Some("Running");
        let ready = condition.map(|c| c.is_true()).unwrap_or(false) || running;

        let desired = primary
            .pointer("/spec/rayClusterConfig/workerGroupSpecs")
            .and_then(Value::as_array)
            .map(|groups| {
                groups
                    .iter()
                    .map(|g| count_at(g, "/replicas"))
                    .sum::<u32>()
            })
            .unwrap_or(0);
        let ready_workers = count_at(
            primary,
            "/status/activeServiceStatus/rayClusterStatus/readyWorkerReplicas",
        );

        ObservedStatus {
            ready,
            failed: false,
            message: condition.and_then(|c| c.message).map(str::to_string),
            replicas: Some(ReplicaSummary {
                desired,
                ready: ready_workers,
            }),
        }
    }
}

fn check_feasible(spec: &ModelDeploymentSpec) -> Result<(), TransformError> {
    if spec.engine.engine_type != EngineType::Vllm {
        return Err(TransformError::infeasible(
            PROVIDER,
            format!("Ray Serve LLM runs vllm, not {}", spec.engine.engine_type),
        ));
    }
    if !spec.requests_gpu() {
        return Err(TransformError::infeasible(
            PROVIDER,
            "Ray Serve LLM has no CPU serving path; request at least one GPU",
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

fn serve_config(spec: &ModelDeploymentSpec, topology: &Topology) -> ServeConfig {
    let (import_path, args) = match topology {
        Topology::Aggregated(group) => (
            OPENAI_APP,
            ServeArgs::Aggregated {
                llm_configs: vec![llm_config(spec, group)],
            },
        ),
        Topology::Disaggregated { prefill, decode } => (
            PD_OPENAI_APP,
            ServeArgs::Disaggregated {
                prefill_config: llm_config(spec, prefill),
                decode_config: llm_config(spec, decode),
            },
        ),
    };
    ServeConfig {
        applications: vec![ServeApplication {
            name: "llm".to_string(),
            route_prefix: "/".to_string(),
            import_path: import_path.to_string(),
            args,
        }],
    }
}

fn llm_config(spec: &ModelDeploymentSpec, group: &WorkerGroup) -> LlmConfig {
    let mut engine_kwargs = typed_args(&spec.engine.args);
    if group.gpus > 1 {
        engine_kwargs
            .entry("tensor_parallel_size".to_string())
            .or_insert_with(|| group.gpus.into());
    }
    if let Some(revision) = &spec.model.revision {
        engine_kwargs
            .entry("revision".to_string())
            .or_insert_with(|| Value::String(revision.clone()));
    }
    LlmConfig {
        model_loading_config: ModelLoadingConfig {
            model_id: spec.model.served_name().to_string(),
            model_source: spec.model.id.clone(),
        },
        engine_kwargs,
        deployment_config: DeploymentConfig {
            autoscaling_config: AutoscalingConfig {
                min_replicas: group.replicas,
                max_replicas: group.replicas,
            },
        },
        accelerator_type: spec.resources.gpu.as_ref().and_then(|g| g.gpu_type.clone()),
    }
}

fn cluster_spec(
    spec: &ModelDeploymentSpec,
    topology: &Topology,
    labels: &BTreeMap<String, String>,
) -> RayClusterSpec {
    let image = spec.engine.image.as_deref().unwrap_or(DEFAULT_IMAGE);

    let head = Container {
        name: "ray-head".to_string(),
        image: image.to_string(),
        env: secret_env(spec),
        ports: vec![
            ContainerPort::new("gcs", 6379),
            ContainerPort::new("dashboard", 8265),
            ContainerPort::new("client", 10001),
            ContainerPort::new("serve", SERVE_PORT),
        ],
        resources: ResourceRequirements {
            requests: BTreeMap::from([
                ("cpu".to_string(), "2".to_string()),
                ("memory".to_string(), "8Gi".to_string()),
            ]),
            limits: BTreeMap::from([("memory".to_string(), "8Gi".to_string())]),
        },
        ..Default::default()
    };

    let worker_group_specs = topology
        .groups()
        .into_iter()
        .map(|group| {
            let container = Container {
                name: "ray-worker".to_string(),
                image: image.to_string(),
                env: secret_env(spec),
                resources: ResourceRequirements::for_worker(&spec.resources, group.gpus),
                ..Default::default()
            };
            WorkerGroupSpec {
                group_name: group_name(&group),
                replicas: group.replicas,
                min_replicas: group.replicas,
                max_replicas: group.replicas,
                ray_start_params: BTreeMap::new(),
                template: PodTemplate::for_deployment(spec, labels, container),
            }
        })
        .collect();

    RayClusterSpec {
        ray_version: RAY_VERSION.to_string(),
        head_group_spec: HeadGroupSpec {
            ray_start_params: BTreeMap::from([
                ("dashboard-host".to_string(), "0.0.0.0".to_string()),
                ("num-cpus".to_string(), "0".to_string()),
            ]),
            template: PodTemplate::for_deployment(spec, labels, head),
        },
        worker_group_specs,
    }
}

fn group_name(group: &WorkerGroup) -> String {
    match group.role {
        "worker" => "workers".to_string(),
        role => format!("{role}-workers"),
    }
}
