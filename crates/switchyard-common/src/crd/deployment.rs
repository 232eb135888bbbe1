//! ModelDeployment CRD types
//!
//! Defines `ModelDeployment`, the single abstract serving intent a user writes.
//! The core controller only ever writes `status`; the runtime controller that
//! owns the assignment writes `status.runtime`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::preserve_unknown_fields;

// =============================================================================
// Model source
// =============================================================================

/// Where the model weights come from
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelSourceKind {
    /// Entry in the curated model catalog
    Catalog,
    /// HuggingFace Hub repository (`org/name`)
    #[default]
    HuggingFace,
    /// Prebuilt container image that bundles the model
    Image,
}

impl std::fmt::Display for ModelSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Catalog => write!(f, "catalog"),
            Self::HuggingFace => write!(f, "huggingface"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// Model reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Source kind of `id`
    #[serde(default)]
    pub source: ModelSourceKind,

    /// Catalog id, HuggingFace repository, or image reference
    pub id: String,

    /// Optional revision (branch, tag, or commit) for HuggingFace sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Name the model is served under; defaults to `id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_name: Option<String>,
}

impl ModelSpec {
    /// Name clients use to address the model
    pub fn served_name(&self) -> &str {
        self.served_name.as_deref().unwrap_or(&self.id)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Inference engine
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// vLLM
    #[default]
    Vllm,
    /// SGLang
    Sglang,
    /// TensorRT-LLM
    Trtllm,
}

impl EngineType {
    /// All engines, in a stable order
    pub const ALL: [EngineType; 3] = [EngineType::Vllm, EngineType::Sglang, EngineType::Trtllm];

    /// Lowercase identifier used in CRDs and rule expressions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vllm => "vllm",
            Self::Sglang => "sglang",
            Self::Trtllm => "trtllm",
        }
    }

    /// Whether this engine has no CPU serving path at all
    pub fn requires_gpu(&self) -> bool {
        match self {
            Self::Vllm => false,
            Self::Sglang | Self::Trtllm => true,
        }
    }
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine selection and free-form engine arguments
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSpec {
    /// Engine type
    #[serde(rename = "type", default)]
    pub engine_type: EngineType,

    /// Container image override for the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Engine command-line arguments, rendered as `--key=value` in key order
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

// =============================================================================
// Serving
// =============================================================================

/// Worker topology
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServingMode {
    /// Single worker group handles prefill and decode
    #[default]
    Aggregated,
    /// Separate prefill and decode worker groups
    Disaggregated,
}

impl ServingMode {
    /// All serving modes, in a stable order
    pub const ALL: [ServingMode; 2] = [ServingMode::Aggregated, ServingMode::Disaggregated];

    /// Lowercase identifier used in CRDs and rule expressions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggregated => "aggregated",
            Self::Disaggregated => "disaggregated",
        }
    }
}

impl std::fmt::Display for ServingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serving configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServingSpec {
    /// Aggregated or disaggregated serving
    #[serde(default)]
    pub mode: ServingMode,
}

// =============================================================================
// Provider override
// =============================================================================

/// Explicit provider choice and provider-specific overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Pin the deployment to this provider instead of rule-based selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Partial child object merged into the generated resource.
    ///
    /// Only the `spec` key is honored; `apiVersion`, `kind`, `metadata`
    /// and anything else at the top level is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub overrides: Option<serde_json::Value>,
}

// =============================================================================
// Scaling & resources
// =============================================================================

/// Replica and GPU counts for one disaggregated role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleScaling {
    /// Worker replicas for this role
    #[serde(default = "default_one")]
    pub replicas: u32,

    /// GPUs per worker replica
    #[serde(default)]
    pub gpus: u32,
}

/// Scaling configuration
///
/// `replicas` applies to aggregated serving; `prefill`/`decode` apply to
/// disaggregated serving. Setting both is invalid.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScalingSpec {
    /// Aggregated worker replicas (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,

    /// Prefill role scaling (disaggregated only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefill: Option<RoleScaling>,

    /// Decode role scaling (disaggregated only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode: Option<RoleScaling>,
}

/// GPU request
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GpuSpec {
    /// GPUs per replica
    #[serde(default)]
    pub count: u32,

    /// GPU model (e.g. `nvidia-a100`), used as a node selector hint
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
}

/// Compute resources per replica
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// GPU request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuSpec>,

    /// CPU request (Kubernetes quantity)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory request (Kubernetes quantity)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ResourceSpec {
    /// GPUs per replica, 0 when none requested
    pub fn gpu_count(&self) -> u32 {
        self.gpu.as_ref().map(|g| g.count).unwrap_or(0)
    }
}

// =============================================================================
// Secrets & pod template
// =============================================================================

/// Reference to a key in an existing Secret in the deployment's namespace
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,

    /// Key within the Secret
    #[serde(default = "default_hf_token_key")]
    pub key: String,
}

/// Secrets consumed by the serving runtime
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretsSpec {
    /// HuggingFace access token, injected as `HF_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hugging_face_token: Option<SecretKeyRef>,
}

/// Pod toleration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    /// Taint key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// `Exists` or `Equal`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    /// Taint value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// `NoSchedule`, `PreferNoSchedule` or `NoExecute`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    /// Seconds the pod tolerates a `NoExecute` taint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Pod-level overrides applied to every generated worker pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    /// Extra pod labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra pod annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Node selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

fn default_one() -> u32 {
    1
}

fn default_hf_token_key() -> String {
    "HF_TOKEN".to_string()
}

// =============================================================================
// CRD
// =============================================================================

/// Abstract model serving intent, materialized by one installed runtime
///
/// Example:
/// ```yaml
/// apiVersion: switchyard.dev/v1alpha1
/// kind: ModelDeployment
/// metadata:
///   name: llama-8b
/// spec:
///   model:
///     source: huggingface
///     id: meta-llama/Llama-3.1-8B-Instruct
///   engine:
///     type: vllm
///     args:
///       max-model-len: "8192"
///   serving:
///     mode: aggregated
///   resources:
///     gpu:
///       count: 1
///   secrets:
///     huggingFaceToken:
///       name: hf-token
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "switchyard.dev",
    version = "v1alpha1",
    kind = "ModelDeployment",
    plural = "modeldeployments",
    shortname = "md",
    namespaced,
    status = "ModelDeploymentStatus",
    printcolumn = r#"{"name":"Engine","type":"string","jsonPath":".spec.engine.type"}"#,
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.serving.mode"}"#,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".status.provider.name"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelDeploymentSpec {
    /// Model reference
    pub model: ModelSpec,

    /// Engine selection
    #[serde(default)]
    pub engine: EngineSpec,

    /// Serving topology
    #[serde(default)]
    pub serving: ServingSpec,

    /// Explicit provider choice and overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderSpec>,

    /// Replica counts
    #[serde(default)]
    pub scaling: ScalingSpec,

    /// Compute resources
    #[serde(default)]
    pub resources: ResourceSpec,

    /// Secret references
    #[serde(default)]
    pub secrets: SecretsSpec,

    /// Pod template overrides
    #[serde(default)]
    pub pod_template: PodTemplateSpec,
}

impl ModelDeploymentSpec {
    /// Name of the explicitly requested provider, if any
    pub fn provider_override(&self) -> Option<&str> {
        self.provider.as_ref().and_then(|p| p.name.as_deref())
    }

    /// Provider-specific override document, if any
    pub fn provider_overrides(&self) -> Option<&serde_json::Value> {
        self.provider.as_ref().and_then(|p| p.overrides.as_ref())
    }

    /// Whether any worker of this deployment asks for a GPU
    pub fn requests_gpu(&self) -> bool {
        match self.serving.mode {
            ServingMode::Aggregated => self.resources.gpu_count() > 0,
            ServingMode::Disaggregated => {
                let role_gpus = |r: &Option<RoleScaling>| r.as_ref().map(|r| r.gpus).unwrap_or(0);
                role_gpus(&self.scaling.prefill) > 0
                    || role_gpus(&self.scaling.decode) > 0
                    || self.resources.gpu_count() > 0
            }
        }
    }

    /// Aggregated replica count (defaults to 1)
    pub fn replicas(&self) -> u32 {
        self.scaling.replicas.unwrap_or(1)
    }

    /// Key over every field that influences provider selection.
    ///
    /// The reconciler re-runs selection only when this changes. The model
    /// source is part of it because shipped rules and feasibility checks
    /// branch on it.
    pub fn selection_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.engine.engine_type,
            self.serving.mode,
            self.model.source,
            self.provider_override().unwrap_or("-"),
            if self.requests_gpu() { "gpu" } else { "cpu" }
        )
    }
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle phase of a ModelDeployment
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeploymentPhase {
    /// Waiting for a provider to become available
    #[default]
    Pending,
    /// A provider is assigned and is materializing the deployment
    Provisioning,
    /// The runtime reports the deployment is serving
    Ready,
    /// The spec is invalid, no provider can serve it, or the runtime gave up
    Failed,
}

impl std::fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Provisioning => write!(f, "Provisioning"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// The provider a deployment has been assigned to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAssignment {
    /// Provider id (InferenceProvider name)
    pub name: String,

    /// apiVersion of the provider's native resource
    pub api_version: String,

    /// Kind of the provider's native resource
    pub kind: String,

    /// Selection key of the spec this assignment was computed for
    pub selection_key: String,

    /// Why this provider was chosen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Replica summary mirrored from the runtime's child resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSummary {
    /// Desired worker replicas
    #[serde(default)]
    pub desired: u32,

    /// Ready worker replicas
    #[serde(default)]
    pub ready: u32,
}

/// Status written by the runtime controller that owns the assignment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    /// Provider id of the runtime controller that wrote this
    pub provider: String,

    /// Child resource reports ready
    #[serde(default)]
    pub ready: bool,

    /// Runtime determined it cannot serve this spec
    #[serde(default)]
    pub failed: bool,

    /// Provider-specific message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Name of the primary child resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,

    /// Replica summary of the child resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<ReplicaSummary>,

    /// Spec generation the runtime last acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Status of a ModelDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelDeploymentStatus {
    /// Current phase
    #[serde(default)]
    pub phase: DeploymentPhase,

    /// Spec generation this status reflects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Assigned provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderAssignment>,

    /// Human-readable message; cleared on every successful transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Replica summary mirrored from `runtime`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<ReplicaSummary>,

    /// Written by the runtime controller; read by the core controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeStatus>,
}

// =============================================================================
// Tests
// =============================================================================
