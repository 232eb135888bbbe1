//! Registry descriptors shipped with each built-in runtime
//!
//! Capabilities and rules are static per release. Rules only reference
//! fields that always serialize, or probe optional ones with `has()`.

use switchyard_common::crd::{
    EngineType, InferenceProviderSpec, InstallationInfo, InstallationStep, ProviderCapabilities,
    ProviderResource, SelectionRule, ServingMode,
};
use switchyard_transform::{dynamo, kaito, kuberay};

/// Provider ids with a built-in descriptor, in order
pub const BUILTIN_PROVIDERS: [&str; 3] = [dynamo::PROVIDER, kaito::PROVIDER, kuberay::PROVIDER];

/// Descriptor for a built-in provider id
pub fn builtin_descriptor(provider: &str) -> Option<InferenceProviderSpec> {
    match provider {
        p if p == kuberay::PROVIDER => Some(kuberay_descriptor()),
        p if p == dynamo::PROVIDER => Some(dynamo_descriptor()),
        p if p == kaito::PROVIDER => Some(kaito_descriptor()),
        _ => None,
    }
}

fn rule(expression: &str, priority: i32) -> SelectionRule {
    SelectionRule {
        expression: expression.to_string(),
        priority,
    }
}

fn step(title: &str, command: &str) -> InstallationStep {
    InstallationStep {
        title: title.to_string(),
        command: command.to_string(),
    }
}

fn kuberay_descriptor() -> InferenceProviderSpec {
    InferenceProviderSpec {
        display_name: Some("KubeRay (Ray Serve LLM)".to_string()),
        capabilities: ProviderCapabilities {
            engines: vec![EngineType::Vllm],
            serving_modes: ServingMode::ALL.to_vec(),
            cpu: false,
            gpu: true,
        },
        selection_rules: vec![
            rule(
                r#"spec.engine.type == "vllm" && spec.model.source != "image""#,
                50,
            ),
            rule(
                r#"spec.serving.mode == "disaggregated" && spec.model.source != "image""#,
                40,
            ),
        ],
        resource: ProviderResource {
            api_version: kuberay::API_VERSION.to_string(),
            kind: kuberay::KIND.to_string(),
        },
        installation: Some(InstallationInfo {
            description: Some("Ray Serve LLM on KubeRay RayService".to_string()),
            helm_repo: Some("https://ray-project.github.io/kuberay-helm/".to_string()),
            helm_chart: Some("kuberay/kuberay-operator".to_string()),
            steps: vec![
                step(
                    "Add the KubeRay Helm repository",
                    "helm repo add kuberay https://ray-project.github.io/kuberay-helm/",
                ),
                step(
                    "Install the KubeRay operator",
                    "helm install kuberay-operator kuberay/kuberay-operator --namespace kuberay-system --create-namespace",
                ),
            ],
        }),
    }
}

fn dynamo_descriptor() -> InferenceProviderSpec {
    InferenceProviderSpec {
        display_name: Some("NVIDIA Dynamo".to_string()),
        capabilities: ProviderCapabilities {
            engines: EngineType::ALL.to_vec(),
            serving_modes: ServingMode::ALL.to_vec(),
            cpu: false,
            gpu: true,
        },
        selection_rules: vec![
            rule(r#"spec.engine.type in ["sglang", "trtllm"]"#, 80),
            rule(
                r#"spec.serving.mode == "disaggregated" && spec.model.source != "image""#,
                70,
            ),
            rule(r#"spec.model.source != "image""#, 10),
        ],
        resource: ProviderResource {
            api_version: dynamo::API_VERSION.to_string(),
            kind: dynamo::KIND.to_string(),
        },
        installation: Some(InstallationInfo {
            description: Some("NVIDIA Dynamo platform with the Dynamo operator".to_string()),
            helm_repo: Some("https://helm.ngc.nvidia.com/nvidia/ai-dynamo".to_string()),
            helm_chart: Some("dynamo-platform".to_string()),
            steps: vec![
                step(
                    "Install the Dynamo CRDs",
                    "helm install dynamo-crds https://helm.ngc.nvidia.com/nvidia/ai-dynamo/charts/dynamo-crds-0.4.1.tgz --namespace default",
                ),
                step(
                    "Install the Dynamo platform",
                    "helm install dynamo-platform https://helm.ngc.nvidia.com/nvidia/ai-dynamo/charts/dynamo-platform-0.4.1.tgz --namespace dynamo-system --create-namespace",
                ),
            ],
        }),
    }
}

fn kaito_descriptor() -> InferenceProviderSpec {
    InferenceProviderSpec {
        display_name: Some("KAITO".to_string()),
        capabilities: ProviderCapabilities {
            engines: vec![EngineType::Vllm],
            serving_modes: vec![ServingMode::Aggregated],
            cpu: true,
            gpu: true,
        },
        selection_rules: vec![
            rule(r#"spec.model.source == "image""#, 90),
            rule(
                "!has(spec.resources.gpu) || spec.resources.gpu.count == 0",
                90,
            ),
            rule(r#"spec.model.source == "catalog""#, 30),
        ],
        resource: ProviderResource {
            api_version: kaito::API_VERSION.to_string(),
            kind: kaito::KIND.to_string(),
        },
        installation: Some(InstallationInfo {
            description: Some("Kubernetes AI Toolchain Operator workspaces".to_string()),
            helm_repo: Some("https://kaito-project.github.io/kaito/charts/kaito".to_string()),
            helm_chart: Some("kaito/workspace".to_string()),
            steps: vec![
                step(
                    "Add the KAITO Helm repository",
                    "helm repo add kaito https://kaito-project.github.io/kaito/charts/kaito",
                ),
                step(
                    "Install the workspace controller",
                    "helm install kaito-workspace kaito/workspace --namespace kaito-workspace --create-namespace",
                ),
            ],
        }),
    }
}
