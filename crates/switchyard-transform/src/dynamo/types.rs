//! DynamoGraphDeployment (nvidia.com/v1alpha1) types

use std::collections::BTreeMap;

use serde::Serialize;
use switchyard_common::crd::Toleration;

use crate::pod::EnvVar;

/// DynamoGraphDeployment body
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct GraphDeploymentBody {
    /// Spec
    pub spec: GraphDeploymentSpec,
}

/// DynamoGraphDeployment spec
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphDeploymentSpec {
    /// `vllm`, `sglang` or `trtllm`
    pub backend_framework: String,
    /// Graph components keyed by service name
    pub services: BTreeMap<String, ServiceSpec>,
}

/// One graph component
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// `frontend` or `worker`
    pub component_type: String,
    /// `prefill` or `decode` for disaggregated workers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_component_type: Option<String>,
    /// Replicas
    pub replicas: u32,
    /// Pod labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Pod annotations
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Resources in Dynamo's `cpu`/`memory`/`gpu` shape
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ServiceResources>,
    /// Extra environment
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<EnvVar>,
    /// Pod overrides
    pub extra_pod_spec: ExtraPodSpec,
}

/// Requests and limits
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ServiceResources {
    /// Requests
    #[serde(skip_serializing_if = "ResourceItem::is_empty")]
    pub requests: ResourceItem,
    /// Limits
    #[serde(skip_serializing_if = "ResourceItem::is_empty")]
    pub limits: ResourceItem,
}

/// Resource amounts
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ResourceItem {
    /// CPU quantity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// GPU count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
}

impl ResourceItem {
    /// Nothing set
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none() && self.gpu.is_none()
    }
}

/// Pod-level overrides with the main container
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtraPodSpec {
    /// Main container
    pub main_container: MainContainer,
    /// Node selector
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Tolerations
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

/// Main container of a component
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MainContainer {
    /// Image
    pub image: String,
    /// Working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Command
    pub command: Vec<String>,
    /// Args
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}
