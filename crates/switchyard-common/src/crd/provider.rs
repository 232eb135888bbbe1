//! InferenceProvider CRD: the provider registry
//!
//! One cluster-scoped entry per installed serving runtime. Entries are
//! written by the runtime's own controller (see `switchyard-provider`) and
//! read by the core selection loop.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::deployment::{EngineType, ServingMode};
use crate::{DEFAULT_HEARTBEAT_INTERVAL_SECS, HEARTBEAT_STALENESS_MULTIPLIER};

/// What a provider can serve
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Engines the runtime can run
    #[serde(default)]
    pub engines: Vec<EngineType>,

    /// Serving topologies the runtime supports
    #[serde(default)]
    pub serving_modes: Vec<ServingMode>,

    /// Runtime can serve CPU-only deployments
    #[serde(default)]
    pub cpu: bool,

    /// Runtime can serve GPU deployments
    #[serde(default)]
    pub gpu: bool,
}

impl ProviderCapabilities {
    /// Whether the capability set admits this engine
    pub fn supports_engine(&self, engine: EngineType) -> bool {
        self.engines.contains(&engine)
    }

    /// Whether the capability set admits this serving mode
    pub fn supports_mode(&self, mode: ServingMode) -> bool {
        self.serving_modes.contains(&mode)
    }

    /// Whether the capability set admits a GPU (`true`) or CPU (`false`) request
    pub fn supports_accelerator(&self, wants_gpu: bool) -> bool {
        if wants_gpu {
            self.gpu
        } else {
            self.cpu
        }
    }
}

/// A priority-weighted boolean rule evaluated against a ModelDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRule {
    /// Boolean expression over `spec` and `metadata`
    pub expression: String,

    /// Higher wins; ties are broken by provider name
    #[serde(default)]
    pub priority: i32,
}

/// The native resource type a provider materializes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResource {
    /// apiVersion (e.g. `ray.io/v1`)
    pub api_version: String,

    /// Kind (e.g. `RayService`)
    pub kind: String,
}

/// How to install the runtime behind a provider
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationInfo {
    /// Short description of the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Helm repository URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_repo: Option<String>,

    /// Helm chart reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_chart: Option<String>,

    /// Ordered install steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<InstallationStep>,
}

/// A single install step
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStep {
    /// Step title
    pub title: String,

    /// Shell command to run
    pub command: String,
}

/// Registry entry for an installed serving runtime
///
/// Example:
/// ```yaml
/// apiVersion: switchyard.dev/v1alpha1
/// kind: InferenceProvider
/// metadata:
///   name: kuberay
/// spec:
///   capabilities:
///     engines: [vllm]
///     servingModes: [aggregated, disaggregated]
///     gpu: true
///   selectionRules:
///     - expression: spec.engine.type == "vllm"
///       priority: 50
///   resource:
///     apiVersion: ray.io/v1
///     kind: RayService
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "switchyard.dev",
    version = "v1alpha1",
    kind = "InferenceProvider",
    plural = "inferenceproviders",
    shortname = "ip",
    status = "InferenceProviderStatus",
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.resource.kind"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Heartbeat","type":"date","jsonPath":".status.lastHeartbeat"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InferenceProviderSpec {
    /// Human-friendly name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Declared capabilities
    #[serde(default)]
    pub capabilities: ProviderCapabilities,

    /// Selection rules; the highest-priority rule that matches counts
    #[serde(default)]
    pub selection_rules: Vec<SelectionRule>,

    /// Native resource this provider creates
    pub resource: ProviderResource,

    /// Installation guidance surfaced to operators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation: Option<InstallationInfo>,
}

/// Liveness reported by the provider's own controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceProviderStatus {
    /// Provider controller is up and its runtime is installed
    #[serde(default)]
    pub ready: bool,

    /// Last heartbeat written by the provider controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Interval between heartbeats; 0 means the default
    #[serde(default)]
    pub heartbeat_interval_seconds: u64,

    /// Provider controller version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Human-readable status message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InferenceProviderStatus {
    /// Heartbeat interval, falling back to the default when unset
    pub fn heartbeat_interval_secs(&self) -> u64 {
        if self.heartbeat_interval_seconds == 0 {
            DEFAULT_HEARTBEAT_INTERVAL_SECS
        } else {
            self.heartbeat_interval_seconds
        }
    }
}

impl InferenceProvider {
    /// Whether the entry is ready and its heartbeat is recent enough at `now`.
    ///
    /// An entry without a heartbeat is never fresh. A heartbeat from the
    /// future is tolerated up to the same staleness window in the other
    /// direction; beyond that the timestamp cannot be trusted and the entry is
    /// stale.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let Some(status) = &self.status else {
            return false;
        };
        if !status.ready {
            return false;
        }
        let Some(last) = status.last_heartbeat else {
            return false;
        };
        let max_age = status
            .heartbeat_interval_secs()
            .saturating_mul(HEARTBEAT_STALENESS_MULTIPLIER as u64);
        let max_age = i64::try_from(max_age).unwrap_or(i64::MAX);
        let age = now.signed_duration_since(last).num_seconds();
        (-max_age..=max_age).contains(&age)
    }
}
