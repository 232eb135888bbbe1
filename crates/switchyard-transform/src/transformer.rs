//! The transformer contract and the provider id → transformer registry

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use switchyard_common::crd::{ModelDeployment, ProviderResource, ReplicaSummary};

use crate::child::ChildResource;
use crate::error::TransformError;

/// Runtime health read back from a provider's primary child object
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservedStatus {
    /// The runtime reports the model is serving
    pub ready: bool,
    /// The runtime reports a terminal failure
    pub failed: bool,
    /// Runtime-provided detail
    pub message: Option<String>,
    /// Worker replicas, desired vs ready
    pub replicas: Option<ReplicaSummary>,
}

/// Converts a validated ModelDeployment into runtime-native objects.
///
/// Implementations are pure: no I/O, and the same deployment always yields
/// the same children. They assume structural validation already passed and
/// only reject specs their runtime cannot serve.
pub trait Transformer: Send + Sync {
    /// Provider id this transformer serves (matches the InferenceProvider name)
    fn provider(&self) -> &'static str;

    /// Native resource whose readiness reflects the deployment's
    fn resource(&self) -> ProviderResource;

    /// Every kind [`Transformer::transform`] can emit. Children of these
    /// kinds that carry this provider's labels but are no longer produced
    /// get deleted.
    fn child_kinds(&self) -> Vec<ProviderResource> {
        vec![self.resource()]
    }

    /// Produce every child object for `md`. The primary object (of
    /// [`Transformer::resource`]'s kind) is named after the deployment.
    fn transform(&self, md: &ModelDeployment) -> Result<Vec<ChildResource>, TransformError>;

    /// Interpret the live primary object
    fn observe(&self, primary: &Value) -> ObservedStatus;
}

/// Explicit provider id → transformer table, populated at process start
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    transformers: BTreeMap<&'static str, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in transformer
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::kuberay::KubeRayTransformer));
        registry.register(Arc::new(crate::dynamo::DynamoTransformer));
        registry.register(Arc::new(crate::kaito::KaitoTransformer));
        registry
    }

    /// Add or replace the transformer for its provider id
    pub fn register(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformers.insert(transformer.provider(), transformer);
    }

    /// Look up by provider id
    pub fn get(&self, provider: &str) -> Result<Arc<dyn Transformer>, TransformError> {
        self.transformers
            .get(provider)
            .cloned()
            .ok_or_else(|| TransformError::UnknownProvider(provider.to_string()))
    }

    /// Registered provider ids in order
    pub fn providers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.transformers.keys().copied()
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerRegistry")
            .field("providers", &self.transformers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A `status.conditions[]` entry as most operators write it
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Condition<'a> {
    /// `True`, `False` or `Unknown`
    pub status: &'a str,
    /// Machine-readable reason
    pub reason: Option<&'a str>,
    /// Human-readable message
    pub message: Option<&'a str>,
}

impl Condition<'_> {
    /// Status is `True`
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }

    /// Status is `False`
    pub fn is_false(&self) -> bool {
        self.status == "False"
    }
}

/// Find condition `type_` in `obj.status.conditions`
pub fn find_condition<'a>(obj: &'a Value, type_: &str) -> Option<Condition<'a>> {
    obj.pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(type_))
        .map(|c| Condition {
            status: c.get("status").and_then(Value::as_str).unwrap_or("Unknown"),
            reason: c.get("reason").and_then(Value::as_str),
            message: c.get("message").and_then(Value::as_str),
        })
}

/// Read a non-negative integer at a JSON pointer, 0 when absent
pub(crate) fn count_at(obj: &Value, pointer: &str) -> u32 {
    obj.pointer(pointer)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}
