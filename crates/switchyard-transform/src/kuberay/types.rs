//! RayService (ray.io/v1) and Ray Serve LLM config types

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::pod::PodTemplate;

/// RayService body
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RayServiceBody {
    /// Spec
    pub spec: RayServiceSpec,
}

/// RayService spec
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RayServiceSpec {
    /// Ray Serve config, as YAML text
    #[serde(rename = "serveConfigV2")]
    pub serve_config_v2: String,
    /// Cluster the service runs on
    pub ray_cluster_config: RayClusterSpec,
}

/// RayCluster spec
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RayClusterSpec {
    /// Ray version of the image
    pub ray_version: String,
    /// Head group
    pub head_group_spec: HeadGroupSpec,
    /// Worker groups
    pub worker_group_specs: Vec<WorkerGroupSpec>,
}

/// Head group
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeadGroupSpec {
    /// `ray start` parameters
    pub ray_start_params: BTreeMap<String, String>,
    /// Pod template
    pub template: PodTemplate,
}

/// Worker group
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerGroupSpec {
    /// Group name
    pub group_name: String,
    /// Replicas
    pub replicas: u32,
    /// Lower bound
    pub min_replicas: u32,
    /// Upper bound
    pub max_replicas: u32,
    /// `ray start` parameters
    pub ray_start_params: BTreeMap<String, String>,
    /// Pod template
    pub template: PodTemplate,
}

// =============================================================================
// Ray Serve LLM
// =============================================================================

/// Top-level `serveConfigV2` document
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServeConfig {
    /// Serve applications
    pub applications: Vec<ServeApplication>,
}

/// One Serve application
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServeApplication {
    /// Application name
    pub name: String,
    /// HTTP route prefix
    pub route_prefix: String,
    /// Builder import path
    pub import_path: String,
    /// Builder arguments
    pub args: ServeArgs,
}

/// Builder arguments for the aggregated or prefill/decode OpenAI app
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ServeArgs {
    /// `build_openai_app`
    Aggregated {
        /// One config per served model
        llm_configs: Vec<LlmConfig>,
    },
    /// `build_pd_openai_app`
    Disaggregated {
        /// Prefill deployment
        prefill_config: LlmConfig,
        /// Decode deployment
        decode_config: LlmConfig,
    },
}

/// Ray Serve `LLMConfig`
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LlmConfig {
    /// Model identity
    pub model_loading_config: ModelLoadingConfig,
    /// vLLM engine keyword arguments
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub engine_kwargs: BTreeMap<String, Value>,
    /// Serve deployment options
    pub deployment_config: DeploymentConfig,
    /// Accelerator hint for placement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accelerator_type: Option<String>,
}

/// Model id and where to load it from
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ModelLoadingConfig {
    /// Name the model is served under
    pub model_id: String,
    /// HuggingFace repository or catalog id
    pub model_source: String,
}

/// Serve deployment options
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DeploymentConfig {
    /// Replica bounds; fixed at the requested count
    pub autoscaling_config: AutoscalingConfig,
}

/// Replica bounds
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AutoscalingConfig {
    /// Lower bound
    pub min_replicas: u32,
    /// Upper bound
    pub max_replicas: u32,
}
