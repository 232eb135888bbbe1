//! Provider override containment
//!
//! `spec.provider.overrides` is a partial child object. Only its `spec` key is
//! honored, and it is merged into the runtime-specific subtree of the
//! generated child. Identity (`apiVersion`, `kind`, `metadata`) and `status`
//! are never reachable from an override.

use serde_json::{Map, Value};
use tracing::warn;

use crate::child::{ChildResource, RESERVED_KEYS};

/// The only top-level override key that is applied
pub const OVERRIDE_SPEC_KEY: &str = "spec";

/// Where a runtime keeps its desired state inside the child object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverrideTarget {
    /// Under the child's `spec` field (RayService, DynamoGraphDeployment)
    SpecField,
    /// At the top level of the child, beside `metadata` (KAITO Workspace)
    Body,
}

/// Merge the `spec` portion of `overrides` into `child`.
///
/// Everything else in `overrides` is ignored with a warning. Returns the
/// number of top-level keys that were dropped.
pub fn apply_overrides(
    child: &mut ChildResource,
    overrides: Option<&Value>,
    target: OverrideTarget,
) -> usize {
    let Some(overrides) = overrides else {
        return 0;
    };
    let Value::Object(doc) = overrides else {
        warn!(kind = child.kind(), "provider overrides are not an object, ignoring");
        return 1;
    };

    let mut dropped = 0;
    for key in doc.keys().filter(|k| k.as_str() != OVERRIDE_SPEC_KEY) {
        warn!(kind = child.kind(), key = %key, "ignoring provider override outside spec");
        dropped += 1;
    }

    let Some(patch) = doc.get(OVERRIDE_SPEC_KEY) else {
        return dropped;
    };
    let Value::Object(patch) = patch else {
        warn!(kind = child.kind(), "provider override spec is not an object, ignoring");
        return dropped + 1;
    };

    let kind = child.kind().to_string();
    match target {
        OverrideTarget::SpecField => {
            let body = child.body_mut();
            let spec = body
                .entry(OVERRIDE_SPEC_KEY)
                .or_insert_with(|| Value::Object(Map::new()));
            merge(spec, &Value::Object(patch.clone()));
        }
        OverrideTarget::Body => {
            let mut contained = Map::new();
            for (k, v) in patch {
                if RESERVED_KEYS.contains(&k.as_str()) {
                    warn!(kind = %kind, key = %k, "ignoring provider override of reserved field");
                    dropped += 1;
                } else {
                    contained.insert(k.clone(), v.clone());
                }
            }
            let mut body = Value::Object(std::mem::take(child.body_mut()));
            merge(&mut body, &Value::Object(contained));
            if let Value::Object(map) = body {
                *child.body_mut() = map;
            }
        }
    }
    dropped
}

/// JSON merge patch: objects merge recursively, `null` removes a key, anything
/// else replaces.
pub fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge(
                    target.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_common::crd::{ModelDeployment, ModelDeploymentSpec};

    fn child() -> ChildResource {
        let mut md = ModelDeployment::new("llama", ModelDeploymentSpec::default());
        md.metadata.namespace = Some("ml".to_string());
        md.metadata.uid = Some("uid-1".to_string());
        ChildResource::owned_by(&md, "kuberay", "ray.io/v1", "RayService", "llama")
            .expect("child")
            .with_body(&json!({ "spec": { "serveConfigV2": "x", "rayClusterConfig": { "rayVersion": "2.46.0" } } }))
            .expect("body")
    }

    #[test]
    fn merges_nested_spec_fields() {
        let mut child = child();
        let dropped = apply_overrides(
            &mut child,
            Some(&json!({ "spec": { "rayClusterConfig": { "enableInTreeAutoscaling": true } } })),
            OverrideTarget::SpecField,
        );
        assert_eq!(dropped, 0);
        let value = child.to_value();
        assert_eq!(value["spec"]["rayClusterConfig"]["rayVersion"], "2.46.0");
        assert_eq!(value["spec"]["rayClusterConfig"]["enableInTreeAutoscaling"], true);
        assert_eq!(value["spec"]["serveConfigV2"], "x");
    }

    #[test]
    fn null_removes_a_field() {
        let mut child = child();
        apply_overrides(
            &mut child,
            Some(&json!({ "spec": { "serveConfigV2": null } })),
            OverrideTarget::SpecField,
        );
        assert!(child.to_value()["spec"].get("serveConfigV2").is_none());
    }

    /// Story: a user tries to rename the child through the override block.
    /// The child keeps the deployment's name and owner.
    #[test]
    fn story_metadata_override_is_ignored() {
        let mut child = child();
        let dropped = apply_overrides(
            &mut child,
            Some(&json!({
                "metadata": { "name": "kube-system-takeover", "namespace": "kube-system" },
                "apiVersion": "v1",
                "kind": "Secret",
                "spec": { "metadata": { "name": "nested-is-just-data" } }
            })),
            OverrideTarget::SpecField,
        );
        assert_eq!(dropped, 3);

        let value = child.to_value();
        assert_eq!(value["metadata"]["name"], "llama");
        assert_eq!(value["metadata"]["namespace"], "ml");
        assert_eq!(value["kind"], "RayService");
        assert_eq!(value["apiVersion"], "ray.io/v1");
        assert_eq!(value["metadata"]["ownerReferences"][0]["uid"], "uid-1");
    }

    #[test]
    fn body_target_cannot_reach_identity() {
        let mut child = child();
        let dropped = apply_overrides(
            &mut child,
            Some(&json!({ "spec": {
                "metadata": { "name": "evil" },
                "kind": "Secret",
                "inference": { "preset": { "name": "phi-3" } }
            } })),
            OverrideTarget::Body,
        );
        assert_eq!(dropped, 2);
        let value = child.to_value();
        assert_eq!(value["metadata"]["name"], "llama");
        assert_eq!(value["kind"], "RayService");
        assert_eq!(value["inference"]["preset"]["name"], "phi-3");
    }

    #[test]
    fn non_object_overrides_are_ignored() {
        let mut child = child();
        let before = child.clone();
        assert_eq!(apply_overrides(&mut child, Some(&json!("spec")), OverrideTarget::SpecField), 1);
        assert_eq!(apply_overrides(&mut child, Some(&json!({ "spec": 3 })), OverrideTarget::SpecField), 1);
        assert_eq!(apply_overrides(&mut child, None, OverrideTarget::SpecField), 0);
        assert_eq!(child, before);
    }
}
