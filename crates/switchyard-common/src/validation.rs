//! Structural validation for ModelDeployment specs
//!
//! The reconciler and the admission webhook both call into this module, so a
//! spec the webhook admits is exactly a spec the reconciler accepts.
//! Functions here are pure: no cluster access, no clock.

use serde::Serialize;

use crate::crd::{ModelDeploymentSpec, ModelSourceKind, ServingMode};

/// Top-level override key that may be merged into a child resource
pub const OVERRIDES_ALLOWED_KEY: &str = "spec";

/// A single field-level validation failure
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// JSON path of the offending field (e.g. `spec.scaling.decode`)
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Join field errors into the single-line message written to status
pub fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate a spec's structure. Returns every problem found, not just the first.
pub fn validate_spec(spec: &ModelDeploymentSpec) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if spec.model.id.trim().is_empty() {
        errors.push(FieldError::new("spec.model.id", "model id is required"));
    }
    if let Some(name) = &spec.model.served_name {
        if name.trim().is_empty() {
            errors.push(FieldError::new(
                "spec.model.servedName",
                "served name must not be empty when set",
            ));
        }
    }

    validate_scaling(spec, &mut errors);
    validate_gpu(spec, &mut errors);
    validate_provider(spec, &mut errors);

    for key in spec.engine.args.keys() {
        if key.is_empty() || key.starts_with('-') || key.contains(char::is_whitespace) {
            errors.push(FieldError::new(
                format!("spec.engine.args.{key}"),
                "argument names must be bare flag names without leading dashes or whitespace",
            ));
        }
    }

    if let Some(token) = &spec.secrets.hugging_face_token {
        if token.name.trim().is_empty() {
            errors.push(FieldError::new(
                "spec.secrets.huggingFaceToken.name",
                "secret name is required",
            ));
        }
        if token.key.trim().is_empty() {
            errors.push(FieldError::new(
                "spec.secrets.huggingFaceToken.key",
                "secret key must not be empty",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_scaling(spec: &ModelDeploymentSpec, errors: &mut Vec<FieldError>) {
    let scaling = &spec.scaling;
    let has_roles = scaling.prefill.is_some() || scaling.decode.is_some();

    if scaling.replicas.is_some() && has_roles {
        errors.push(FieldError::new(
            "spec.scaling",
            "replicas and prefill/decode scaling are mutually exclusive",
        ));
    }

    match spec.serving.mode {
        ServingMode::Aggregated => {
            if has_roles {
                errors.push(FieldError::new(
                    "spec.scaling",
                    "prefill/decode scaling requires serving mode disaggregated",
                ));
            }
            if scaling.replicas == Some(0) {
                errors.push(FieldError::new(
                    "spec.scaling.replicas",
                    "replicas must be at least 1",
                ));
            }
        }
        ServingMode::Disaggregated => {
            for (field, role) in [
                ("spec.scaling.prefill", &scaling.prefill),
                ("spec.scaling.decode", &scaling.decode),
            ] {
                match role {
                    None => errors.push(FieldError::new(
                        field,
                        "required when serving mode is disaggregated",
                    )),
                    Some(r) if r.replicas == 0 => errors.push(FieldError::new(
                        format!("{field}.replicas"),
                        "replicas must be at least 1",
                    )),
                    Some(_) => {}
                }
            }
        }
    }
}

fn validate_gpu(spec: &ModelDeploymentSpec, errors: &mut Vec<FieldError>) {
    let engine = spec.engine.engine_type;
    if !engine.requires_gpu() {
        return;
    }
    match spec.serving.mode {
        ServingMode::Aggregated => {
            if spec.resources.gpu_count() < 1 {
                errors.push(FieldError::new(
                    "spec.resources.gpu.count",
                    format!("engine {engine} requires at least 1 GPU"),
                ));
            }
        }
        ServingMode::Disaggregated => {
            let fallback = spec.resources.gpu_count();
            for (field, role) in [
                ("spec.scaling.prefill.gpus", &spec.scaling.prefill),
                ("spec.scaling.decode.gpus", &spec.scaling.decode),
            ] {
                // A missing role is already reported by validate_scaling
                if let Some(r) = role {
                    if r.gpus < 1 && fallback < 1 {
                        errors.push(FieldError::new(
                            field,
                            format!("engine {engine} requires at least 1 GPU"),
                        ));
                    }
                }
            }
        }
    }
}

fn validate_provider(spec: &ModelDeploymentSpec, errors: &mut Vec<FieldError>) {
    let Some(provider) = &spec.provider else {
        return;
    };

    if let Some(name) = &provider.name {
        if let Err(msg) = validate_provider_name(name) {
            errors.push(FieldError::new("spec.provider.name", msg));
        }
    }

    if let Some(overrides) = &provider.overrides {
        match overrides.as_object() {
            None => errors.push(FieldError::new(
                "spec.provider.overrides",
                "overrides must be an object",
            )),
            Some(map) => {
                for key in map.keys().filter(|k| k.as_str() != OVERRIDES_ALLOWED_KEY) {
                    errors.push(FieldError::new(
                        format!("spec.provider.overrides.{key}"),
                        format!("only the '{OVERRIDES_ALLOWED_KEY}' subtree may be overridden"),
                    ));
                }
                if let Some(inner) = map.get(OVERRIDES_ALLOWED_KEY) {
                    if !inner.is_object() {
                        errors.push(FieldError::new(
                            "spec.provider.overrides.spec",
                            "must be an object",
                        ));
                    }
                }
            }
        }
    }
}

/// Provider ids are DNS labels: lowercase alphanumeric and hyphens, starting
/// with a letter, at most 63 characters.
pub fn validate_provider_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("provider name cannot be empty".to_string());
    }
    if name.len() > 63 {
        return Err(format!("provider name exceeds 63 characters: {name}"));
    }
    let mut chars = name.chars();
    if !matches!(chars.next(), Some(c) if c.is_ascii_lowercase()) {
        return Err(format!("provider name must start with a lowercase letter: {name}"));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(format!(
            "provider name must be lowercase alphanumeric with hyphens: {name}"
        ));
    }
    if name.ends_with('-') {
        return Err(format!("provider name cannot end with hyphen: {name}"));
    }
    Ok(())
}

/// Admission check for a new deployment
pub fn validate_create(spec: &ModelDeploymentSpec) -> Result<(), Vec<FieldError>> {
    validate_spec(spec)
}

/// Admission check for an update.
///
/// In addition to structural validation, a direct image model reference and
/// an explicit provider choice are immutable once set.
pub fn validate_update(
    old: &ModelDeploymentSpec,
    new: &ModelDeploymentSpec,
) -> Result<(), Vec<FieldError>> {
    let mut errors = validate_spec(new).err().unwrap_or_default();

    if old.model.source == ModelSourceKind::Image
        && (new.model.source != ModelSourceKind::Image || new.model.id != old.model.id)
    {
        errors.push(FieldError::new(
            "spec.model",
            "an image model reference is immutable; create a new deployment instead",
        ));
    }

    if let Some(old_name) = old.provider_override() {
        if new.provider_override() != Some(old_name) {
            errors.push(FieldError::new(
                "spec.provider.name",
                format!("provider '{old_name}' was set explicitly and cannot be changed"),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
