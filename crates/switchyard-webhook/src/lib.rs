//! Validating admission webhook for Switchyard
//!
//! Rejects ModelDeployment creates and updates that the reconciler would
//! mark Failed, using the same validation helpers, so users see the error at
//! `kubectl apply` time instead of in status.

#![deny(missing_docs)]

pub mod validate;

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

/// Path the ValidatingWebhookConfiguration points at
pub const VALIDATE_PATH: &str = "/validate/modeldeployments";

/// Errors starting the webhook server
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The certificate or key could not be loaded
    #[error("TLS config error: {0}")]
    Tls(String),

    /// The listener failed
    #[error("webhook server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// Address to bind
    pub addr: SocketAddr,
    /// Serving certificate PEM
    pub cert_pem: Vec<u8>,
    /// Serving key PEM
    pub key_pem: Vec<u8>,
}

/// Router with the validation endpoint and a health check
pub fn webhook_router() -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate::validate_handler))
        .route("/healthz", get(|| async { "ok" }))
}

/// Serve the webhook over TLS until the listener fails
pub async fn serve(config: WebhookConfig) -> Result<(), WebhookError> {
    let tls = RustlsConfig::from_pem(config.cert_pem, config.key_pem)
        .await
        .map_err(|e| WebhookError::Tls(e.to_string()))?;

    info!(addr = %config.addr, "Starting admission webhook");
    axum_server::bind_rustls(config.addr, tls)
        .serve(webhook_router().into_make_service())
        .await?;
    Ok(())
}
