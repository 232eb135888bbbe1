//! ModelDeployment controller for Switchyard
//!
//! Validates deployment specs, assigns each one a provider from the live
//! registry and mirrors the assigned runtime's health back into status.
//! Child resources are applied by the runtime controllers, not here.

#![deny(missing_docs)]

pub mod client;
pub mod reconciler;

pub use client::{DeploymentClient, KubeDeploymentClient, FIELD_MANAGER};
pub use reconciler::{
    error_policy, needs_selection, reconcile, unassigned_deployments, Context,
    PROVISIONING_RECHECK, READY_RECHECK,
};
