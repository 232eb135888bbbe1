//! Custom Resource Definitions for Switchyard
//!
//! `ModelDeployment` is the user-facing serving intent; `InferenceProvider`
//! is the registry entry each installed runtime maintains for itself.

mod deployment;
mod provider;

pub use deployment::{
    DeploymentPhase, EngineSpec, EngineType, GpuSpec, ModelDeployment, ModelDeploymentSpec,
    ModelDeploymentStatus, ModelSourceKind, ModelSpec, PodTemplateSpec, ProviderAssignment,
    ProviderSpec, ReplicaSummary, ResourceSpec, RoleScaling, RuntimeStatus, ScalingSpec,
    SecretKeyRef, SecretsSpec, ServingMode, ServingSpec, Toleration,
};
pub use provider::{
    InferenceProvider, InferenceProviderSpec, InferenceProviderStatus, InstallationInfo,
    InstallationStep, ProviderCapabilities, ProviderResource, SelectionRule,
};

/// Schema for free-form objects that the API server must keep verbatim
pub(crate) fn preserve_unknown_fields(
    _gen: &mut schemars::gen::SchemaGenerator,
) -> schemars::schema::Schema {
    let mut obj = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    obj.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(obj)
}
