//! Runtime-specific controller for Switchyard
//!
//! One instance runs per installed provider. It picks up ModelDeployments
//! the core controller assigned to its provider id, applies the provider
//! transformer's children with server-side apply and reports what the
//! runtime observes under `status.runtime`.

#![deny(missing_docs)]

pub mod client;
pub mod controller;

pub use client::{field_manager, KubeRuntimeClient, RuntimeClient};
pub use controller::{error_policy, is_assigned_to, reconcile, RuntimeContext};
