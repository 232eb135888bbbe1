//! Child resources produced by transformers
//!
//! A [`ChildResource`] separates identity (`apiVersion`, `kind`, `metadata`)
//! from the runtime-specific body. Identity is fixed at construction from the
//! owning deployment and cannot be reached from the body, so neither the
//! transformer nor a user override can retarget a child or its owner.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::{Map, Value};
use switchyard_common::crd::ModelDeployment;
use switchyard_common::{DEPLOYMENT_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE, PROVIDER_LABEL};

use crate::error::TransformError;

/// Top-level keys that belong to the object's identity or to the API server
pub const RESERVED_KEYS: [&str; 4] = ["apiVersion", "kind", "metadata", "status"];

/// Metadata of a generated child
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildMetadata {
    /// Object name
    pub name: String,
    /// Object namespace (always the deployment's namespace)
    pub namespace: String,
    /// Labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owner references; always contains the deployment as controller
    pub owner_references: Vec<OwnerReference>,
}

/// One runtime-native object to apply
#[derive(Clone, Debug, PartialEq)]
pub struct ChildResource {
    api_version: String,
    kind: String,
    metadata: ChildMetadata,
    body: Map<String, Value>,
}

impl ChildResource {
    /// Start a child owned by `md`, named `name`, in the deployment's namespace.
    ///
    /// The owner reference has `controller` and `blockOwnerDeletion` set, so
    /// deleting the deployment garbage-collects the child.
    pub fn owned_by(
        md: &ModelDeployment,
        provider: &str,
        api_version: &str,
        kind: &str,
        name: impl Into<String>,
    ) -> Result<Self, TransformError> {
        let namespace = md
            .namespace()
            .ok_or(TransformError::MissingMetadata { field: "namespace" })?;
        Ok(Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            metadata: ChildMetadata {
                name: name.into(),
                namespace,
                labels: child_labels(md, provider),
                annotations: BTreeMap::new(),
                owner_references: vec![owner_reference(md)?],
            },
            body: Map::new(),
        })
    }

    /// Replace the body with the fields of `body`, which must serialize to an
    /// object. Reserved keys in `body` are dropped.
    pub fn with_body(mut self, body: &impl Serialize) -> Result<Self, TransformError> {
        let value = serde_json::to_value(body)
            .map_err(|e| TransformError::serialization(format!("{} body", self.kind), e))?;
        let Value::Object(map) = value else {
            return Err(TransformError::serialization(
                format!("{} body", self.kind),
                "body is not an object",
            ));
        };
        self.body = map
            .into_iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .collect();
        Ok(self)
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// apiVersion
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Kind
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Object name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Metadata
    pub fn metadata(&self) -> &ChildMetadata {
        &self.metadata
    }

    /// Runtime-specific body (everything but identity)
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.body
    }

    /// Full object as JSON, ready for server-side apply
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("apiVersion".into(), Value::String(self.api_version.clone()));
        obj.insert("kind".into(), Value::String(self.kind.clone()));
        obj.insert(
            "metadata".into(),
            serde_json::to_value(&self.metadata).unwrap_or(Value::Null),
        );
        for (k, v) in &self.body {
            if !RESERVED_KEYS.contains(&k.as_str()) {
                obj.insert(k.clone(), v.clone());
            }
        }
        Value::Object(obj)
    }
}

/// Controller owner reference pointing at the deployment
pub fn owner_reference(md: &ModelDeployment) -> Result<OwnerReference, TransformError> {
    if md.meta().name.is_none() {
        return Err(TransformError::MissingMetadata { field: "name" });
    }
    md.controller_owner_ref(&())
        .ok_or(TransformError::MissingMetadata { field: "uid" })
}

/// Labels applied to every child of `md`
pub fn child_labels(md: &ModelDeployment, provider: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (DEPLOYMENT_LABEL.to_string(), md.name_any()),
        (PROVIDER_LABEL.to_string(), provider.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_common::crd::ModelDeploymentSpec;

    fn deployment() -> ModelDeployment {
        let mut md = ModelDeployment::new("llama", ModelDeploymentSpec::default());
        md.metadata.namespace = Some("ml".to_string());
        md.metadata.uid = Some("uid-123".to_string());
        md
    }

    #[test]
    fn owner_reference_is_controller_with_block_deletion() {
        let owner = owner_reference(&deployment()).expect("owner ref");
        assert_eq!(owner.api_version, "switchyard.dev/v1alpha1");
        assert_eq!(owner.kind, "ModelDeployment");
        assert_eq!(owner.name, "llama");
        assert_eq!(owner.uid, "uid-123");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    #[test]
    fn missing_uid_or_namespace_is_an_error() {
        let mut md = deployment();
        md.metadata.uid = None;
        assert_eq!(
            owner_reference(&md),
            Err(TransformError::MissingMetadata { field: "uid" })
        );

        let mut md = deployment();
        md.metadata.namespace = None;
        assert_eq!(
            ChildResource::owned_by(&md, "kuberay", "ray.io/v1", "RayService", "llama").err(),
            Some(TransformError::MissingMetadata { field: "namespace" })
        );
    }

    #[test]
    fn body_cannot_carry_identity() {
        let child = ChildResource::owned_by(&deployment(), "kuberay", "ray.io/v1", "RayService", "llama")
            .expect("child")
            .with_body(&json!({
                "apiVersion": "evil/v1",
                "kind": "Secret",
                "metadata": { "name": "other" },
                "status": {},
                "spec": { "x": 1 }
            }))
            .expect("body");

        let value = child.to_value();
        assert_eq!(value["apiVersion"], "ray.io/v1");
        assert_eq!(value["kind"], "RayService");
        assert_eq!(value["metadata"]["name"], "llama");
        assert_eq!(value["metadata"]["namespace"], "ml");
        assert!(value.get("status").is_none());
        assert_eq!(value["spec"]["x"], 1);
        assert_eq!(
            value["metadata"]["labels"][DEPLOYMENT_LABEL],
            json!("llama")
        );
        assert_eq!(value["metadata"]["labels"][PROVIDER_LABEL], json!("kuberay"));
    }
}
