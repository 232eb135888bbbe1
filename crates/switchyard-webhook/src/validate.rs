//! ModelDeployment admission validation
//!
//! CREATE runs `validate_create`, UPDATE runs `validate_update` against the
//! old object. Everything else is allowed.

use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde_json::Value;
use tracing::{debug, error, info};

use switchyard_common::crd::ModelDeploymentSpec;
use switchyard_common::validation::{summarize, validate_create, validate_update, FieldError};

/// Handle a validating AdmissionReview for ModelDeployments
pub async fn validate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(review(&req).into_review())
}

/// Decide one admission request
pub fn review(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let allowed = AdmissionResponse::from(req);
    let result = match req.operation {
        Operation::Create => match spec_of(req.object.as_ref()) {
            Ok(spec) => validate_create(&spec),
            Err(message) => return allowed.deny(message),
        },
        Operation::Update => {
            match (spec_of(req.old_object.as_ref()), spec_of(req.object.as_ref())) {
                (Ok(old), Ok(new)) => validate_update(&old, &new),
                (Err(message), _) | (_, Err(message)) => return allowed.deny(message),
            }
        }
        _ => {
            debug!(uid = %req.uid, operation = ?req.operation, "Allowing operation without checks");
            return allowed;
        }
    };

    match result {
        Ok(()) => allowed,
        Err(errors) => {
            info!(
                uid = %req.uid,
                deployment = %req.name,
                errors = errors.len(),
                "Rejecting ModelDeployment"
            );
            allowed.deny(denial(&errors))
        }
    }
}

fn spec_of(obj: Option<&DynamicObject>) -> Result<ModelDeploymentSpec, String> {
    let spec = obj
        .and_then(|o| o.data.get("spec"))
        .cloned()
        .unwrap_or(Value::Null);
    serde_json::from_value(spec).map_err(|e| format!("malformed ModelDeployment spec: {e}"))
}

fn denial(errors: &[FieldError]) -> String {
    format!("invalid ModelDeployment: {}", summarize(errors))
}
