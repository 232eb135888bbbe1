//! KAITO Workspace (kaito.sh/v1beta1) types

use std::collections::BTreeMap;

use serde::Serialize;

use crate::pod::PodTemplate;

/// Workspace body; KAITO keeps desired state at the top level
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct WorkspaceBody {
    /// Node provisioning
    pub resource: WorkspaceResource,
    /// Inference workload
    pub inference: InferenceSpec,
}

/// Nodes to provision
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceResource {
    /// Node (and replica) count
    pub count: u32,
    /// Cloud instance type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    /// Selects the nodes that run the workspace
    pub label_selector: LabelSelector,
}

/// Label selector
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Labels that must match
    pub match_labels: BTreeMap<String, String>,
}

/// Inference workload: a preset model or a custom pod template
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct InferenceSpec {
    /// Preset model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<PresetSpec>,
    /// Custom pod template for image-packaged models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplate>,
    /// ConfigMap with runtime parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

/// Preset model reference
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresetSpec {
    /// Preset or HuggingFace model name
    pub name: String,
    /// Preset options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_options: Option<PresetOptions>,
}

/// Preset options
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresetOptions {
    /// Secret holding the model access token
    pub model_access_secret: String,
}

/// ConfigMap body
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ConfigMapBody {
    /// Data
    pub data: BTreeMap<String, String>,
}
