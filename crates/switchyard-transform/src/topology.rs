//! Worker topology resolved from the serving mode and scaling block

use switchyard_common::crd::{ModelDeploymentSpec, RoleScaling, ServingMode};

use crate::error::TransformError;

/// One worker group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerGroup {
    /// Role name (`worker`, `prefill`, `decode`)
    pub role: &'static str,
    /// Replicas
    pub replicas: u32,
    /// GPUs per replica
    pub gpus: u32,
}

/// Aggregated or prefill/decode worker groups
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// A single group serves prefill and decode
    Aggregated(WorkerGroup),
    /// Separate prefill and decode groups
    Disaggregated {
        /// Prefill group
        prefill: WorkerGroup,
        /// Decode group
        decode: WorkerGroup,
    },
}

impl Topology {
    /// Resolve the topology of `spec`.
    ///
    /// A disaggregated role without its own GPU count inherits
    /// `resources.gpu.count`. Missing role blocks are reported as an error
    /// instead of being defaulted.
    pub fn of(provider: &str, spec: &ModelDeploymentSpec) -> Result<Self, TransformError> {
        match spec.serving.mode {
            ServingMode::Aggregated => Ok(Self::Aggregated(WorkerGroup {
                role: "worker",
                replicas: spec.replicas(),
                gpus: spec.resources.gpu_count(),
            })),
            ServingMode::Disaggregated => {
                let role = |name: &'static str, scaling: &Option<RoleScaling>| {
                    scaling
                        .as_ref()
                        .map(|s| WorkerGroup {
                            role: name,
                            replicas: s.replicas,
                            gpus: if s.gpus > 0 {
                                s.gpus
                            } else {
                                spec.resources.gpu_count()
                            },
                        })
                        .ok_or_else(|| {
                            TransformError::infeasible(
                                provider,
                                format!("disaggregated serving needs spec.scaling.{name}"),
                            )
                        })
                };
                Ok(Self::Disaggregated {
                    prefill: role("prefill", &spec.scaling.prefill)?,
                    decode: role("decode", &spec.scaling.decode)?,
                })
            }
        }
    }

    /// Groups in a stable order
    pub fn groups(&self) -> Vec<WorkerGroup> {
        match self {
            Self::Aggregated(group) => vec![*group],
            Self::Disaggregated { prefill, decode } => vec![*prefill, *decode],
        }
    }

    /// Total worker replicas
    pub fn desired_replicas(&self) -> u32 {
        self.groups().iter().map(|g| g.replicas).sum()
    }
}
