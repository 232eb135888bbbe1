//! Provider registration for Switchyard runtimes
//!
//! Each runtime controller publishes an `InferenceProvider` entry describing
//! what it can serve ([`descriptors`]) and keeps it fresh with a heartbeat
//! ([`ProviderConfigManager`]).

#![deny(missing_docs)]

pub mod descriptors;
pub mod manager;

pub use descriptors::{builtin_descriptor, BUILTIN_PROVIDERS};
pub use manager::{KubeRegistryClient, ProviderConfigManager, RegistryClient, FIELD_MANAGER};
