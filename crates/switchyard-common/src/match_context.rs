//! Match context: the JSON view of a deployment that selection rules read
//!
//! The context is built strictly through serde. A serialization failure is an
//! error for the caller to propagate; there is no empty-context fallback,
//! because an empty context makes rules match arbitrarily.

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::{json, Value};

use crate::crd::{ModelDeployment, ModelDeploymentSpec};
use crate::{Error, Result};

/// Flattened, serializable view of a ModelDeployment used as rule input.
///
/// Root variables are `spec` (camelCase, as stored in the API) and
/// `metadata` (`name`, `namespace`, `labels`, `annotations`).
#[derive(Clone, Debug, PartialEq)]
pub struct MatchContext {
    root: Value,
}

impl MatchContext {
    /// Build the context for a deployment object
    pub fn from_deployment(md: &ModelDeployment) -> Result<Self> {
        Self::build(
            &md.spec,
            &md.name_any(),
            md.namespace().as_deref().unwrap_or_default(),
            md.labels(),
            md.annotations(),
        )
    }

    /// Build the context from a bare spec plus identifying metadata
    pub fn build(
        spec: &ModelDeploymentSpec,
        name: &str,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let spec_value = serde_json::to_value(spec).map_err(|e| {
            Error::serialization_for_kind("ModelDeployment", format!("match context: {e}"))
        })?;
        if !spec_value.is_object() {
            return Err(Error::serialization_for_kind(
                "ModelDeployment",
                "match context: spec did not serialize to an object",
            ));
        }

        Ok(Self {
            root: json!({
                "spec": spec_value,
                "metadata": {
                    "name": name,
                    "namespace": namespace,
                    "labels": labels,
                    "annotations": annotations,
                },
            }),
        })
    }

    /// Value bound to a root variable (`spec` or `metadata`)
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    /// Resolve a dotted path such as `spec.serving.mode`
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.root, |value, segment| value.get(segment))
    }

    /// The whole context as JSON
    pub fn as_value(&self) -> &Value {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{EngineType, ServingMode};

    fn deployment() -> ModelDeployment {
        let mut spec = ModelDeploymentSpec::default();
        spec.model.id = "meta-llama/Llama-3.1-8B-Instruct".to_string();
        spec.engine.engine_type = EngineType::Sglang;
        spec.serving.mode = ServingMode::Disaggregated;
        spec.engine
            .args
            .insert("tp-size".to_string(), "2".to_string());
        let mut md = ModelDeployment::new("llama", spec);
        md.metadata.namespace = Some("ml".to_string());
        md.metadata.labels = Some(BTreeMap::from([("team".to_string(), "search".to_string())]));
        md
    }

    #[test]
    fn exposes_spec_in_api_casing() {
        let ctx = MatchContext::from_deployment(&deployment()).expect("context");
        assert_eq!(ctx.lookup("spec.engine.type"), Some(&json!("sglang")));
        assert_eq!(ctx.lookup("spec.serving.mode"), Some(&json!("disaggregated")));
        assert_eq!(ctx.lookup("spec.model.source"), Some(&json!("huggingface")));
        assert_eq!(ctx.lookup("spec.engine.args.tp-size"), Some(&json!("2")));
    }

    #[test]
    fn exposes_identifying_metadata() {
        let ctx = MatchContext::from_deployment(&deployment()).expect("context");
        assert_eq!(ctx.lookup("metadata.name"), Some(&json!("llama")));
        assert_eq!(ctx.lookup("metadata.namespace"), Some(&json!("ml")));
        assert_eq!(ctx.lookup("metadata.labels.team"), Some(&json!("search")));
        assert_eq!(ctx.lookup("metadata.annotations"), Some(&json!({})));
    }

    #[test]
    fn missing_paths_resolve_to_none() {
        let ctx = MatchContext::from_deployment(&deployment()).expect("context");
        assert!(ctx.lookup("spec.provider.name").is_none());
        assert!(ctx.variable("status").is_none());
    }
}
