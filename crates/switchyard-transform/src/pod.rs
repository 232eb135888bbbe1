//! Pod-level building blocks shared by transformers
//!
//! Typed, serializable subsets of the Kubernetes pod API. Every map is a
//! `BTreeMap` so generated content is byte-stable across reconciliations.

use std::collections::BTreeMap;

use serde::Serialize;
use switchyard_common::crd::{ModelDeploymentSpec, ResourceSpec, Toleration};

/// Extended resource name for NVIDIA GPUs
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Node label carrying the GPU product name
pub const GPU_PRODUCT_LABEL: &str = "nvidia.com/gpu.product";

/// Environment variable the HuggingFace token is exposed as
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

/// Container spec
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name
    pub name: String,
    /// Image
    pub image: String,
    /// Command
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Args
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Ports
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Resource requirements
    #[serde(skip_serializing_if = "ResourceRequirements::is_empty")]
    pub resources: ResourceRequirements,
}

/// Container port
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port name
    pub name: String,
    /// Port number
    pub container_port: u16,
}

impl ContainerPort {
    /// Named TCP port
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            container_port: port,
        }
    }
}

/// Environment variable, either a literal or a secret key reference
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Literal value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Secret key reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    /// Literal value
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Value read from `key` of Secret `secret_name` by the kubelet
    pub fn from_secret(
        name: impl Into<String>,
        secret_name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: SecretKeySelector {
                    name: secret_name.into(),
                    key: key.into(),
                },
            }),
        }
    }
}

/// Source of an environment variable value
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    /// Key within a Secret
    pub secret_key_ref: SecretKeySelector,
}

/// Selector for a key within a Secret
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SecretKeySelector {
    /// Secret name
    pub name: String,
    /// Key
    pub key: String,
}

/// Resource requests and limits
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ResourceRequirements {
    /// Requests
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    /// Limits
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

impl ResourceRequirements {
    /// CPU and memory as requests, `gpus` as a GPU limit (and request)
    pub fn for_worker(resources: &ResourceSpec, gpus: u32) -> Self {
        let mut req = Self::default();
        if let Some(cpu) = &resources.cpu {
            req.requests.insert("cpu".to_string(), cpu.clone());
        }
        if let Some(memory) = &resources.memory {
            req.requests.insert("memory".to_string(), memory.clone());
            req.limits.insert("memory".to_string(), memory.clone());
        }
        if gpus > 0 {
            req.requests.insert(GPU_RESOURCE.to_string(), gpus.to_string());
            req.limits.insert(GPU_RESOURCE.to_string(), gpus.to_string());
        }
        req
    }

    /// No requests and no limits
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

/// Pod metadata
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct PodMeta {
    /// Labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Pod spec
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers
    pub containers: Vec<Container>,
    /// Node selector
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Tolerations
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

/// Pod template
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct PodTemplate {
    /// Metadata
    pub metadata: PodMeta,
    /// Spec
    pub spec: PodSpec,
}

impl PodTemplate {
    /// Template running `container` with the deployment's pod-level overrides.
    ///
    /// `labels` are the child's own labels; they win over user pod labels.
    pub fn for_deployment(
        spec: &ModelDeploymentSpec,
        labels: &BTreeMap<String, String>,
        container: Container,
    ) -> Self {
        let mut pod_labels = spec.pod_template.labels.clone();
        pod_labels.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            metadata: PodMeta {
                labels: pod_labels,
                annotations: spec.pod_template.annotations.clone(),
            },
            spec: PodSpec {
                containers: vec![container],
                node_selector: node_selector(spec),
                tolerations: spec.pod_template.tolerations.clone(),
            },
        }
    }
}

/// Node selector from the pod template plus the GPU product, if requested
pub fn node_selector(spec: &ModelDeploymentSpec) -> BTreeMap<String, String> {
    let mut selector = spec.pod_template.node_selector.clone();
    if let Some(gpu_type) = spec.resources.gpu.as_ref().and_then(|g| g.gpu_type.as_ref()) {
        selector
            .entry(GPU_PRODUCT_LABEL.to_string())
            .or_insert_with(|| gpu_type.clone());
    }
    selector
}

/// `HF_TOKEN` from the referenced Secret, never inlined
pub fn secret_env(spec: &ModelDeploymentSpec) -> Vec<EnvVar> {
    spec.secrets
        .hugging_face_token
        .iter()
        .map(|r| EnvVar::from_secret(HF_TOKEN_ENV, &r.name, &r.key))
        .collect()
}

/// Engine args as `--key=value` in key order; an empty value renders `--key`
pub fn render_args(args: &BTreeMap<String, String>) -> Vec<String> {
    args.iter()
        .map(|(k, v)| {
            if v.is_empty() {
                format!("--{k}")
            } else {
                format!("--{k}={v}")
            }
        })
        .collect()
}

/// Engine args as typed key/value pairs for runtimes that take a config map
/// rather than a command line. Keys use `_` instead of `-`.
pub fn typed_args(args: &BTreeMap<String, String>) -> BTreeMap<String, serde_json::Value> {
    args.iter()
        .map(|(k, v)| (k.replace('-', "_"), typed_value(v)))
        .collect()
}

pub(crate) fn typed_value(raw: &str) -> serde_json::Value {
    match raw {
        "" | "true" => serde_json::Value::Bool(true),
        "false" => serde_json::Value::Bool(false),
        _ => {
            if let Ok(i) = raw.parse::<i64>() {
                i.into()
            } else if let Some(f) = raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
            {
                serde_json::Value::Number(f)
            } else {
                serde_json::Value::String(raw.to_string())
            }
        }
    }
}
