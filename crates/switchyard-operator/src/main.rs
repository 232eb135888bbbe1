//! Switchyard Operator - one ModelDeployment API over many inference runtimes

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;

use switchyard_common::kube_utils::create_client;
use switchyard_common::telemetry::{init_telemetry, TelemetryConfig};
use switchyard_operator::config::{Cli, Command, LogFormat};
use switchyard_operator::controller_runner::{
    build_deployment_controller, build_runtime_controller,
};
use switchyard_operator::crds::{crd_yaml, ensure_crds};
use switchyard_provider::{builtin_descriptor, KubeRegistryClient, ProviderConfigManager};
use switchyard_transform::TransformerRegistry;
use switchyard_webhook::WebhookConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The webhook serves TLS through rustls; pin the process-wide provider.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_yaml()?);
        return Ok(());
    }

    let mode = cli.mode();
    let service_name = match &mode {
        Command::Controller { .. } => "switchyard-controller".to_string(),
        Command::Runtime { provider, .. } => format!("switchyard-runtime-{provider}"),
        Command::Webhook { .. } => "switchyard-webhook".to_string(),
    };
    init_telemetry(TelemetryConfig {
        service_name,
        json: cli.log_format == LogFormat::Json,
    })?;

    match mode {
        Command::Controller { skip_crd_install } => {
            let client = create_client(cli.kubeconfig.as_deref()).await?;
            run_controller(client, skip_crd_install).await
        }
        Command::Runtime {
            provider,
            heartbeat_interval_secs,
            runtime_version,
        } => {
            let client = create_client(cli.kubeconfig.as_deref()).await?;
            run_runtime(
                client,
                &provider,
                Duration::from_secs(heartbeat_interval_secs),
                runtime_version,
            )
            .await
        }
        Command::Webhook { addr, cert, key } => {
            let cert_pem = tokio::fs::read(&cert)
                .await
                .map_err(|e| anyhow::anyhow!("failed to read {}: {}", cert.display(), e))?;
            let key_pem = tokio::fs::read(&key)
                .await
                .map_err(|e| anyhow::anyhow!("failed to read {}: {}", key.display(), e))?;
            switchyard_webhook::serve(WebhookConfig {
                addr,
                cert_pem,
                key_pem,
            })
            .await?;
            Ok(())
        }
    }
}

async fn run_controller(client: Client, skip_crd_install: bool) -> anyhow::Result<()> {
    if skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        ensure_crds(&client).await?;
    }

    tracing::info!("Starting Switchyard controller...");
    build_deployment_controller(client).await;
    tracing::info!("Switchyard controller shutting down");
    Ok(())
}

async fn run_runtime(
    client: Client,
    provider: &str,
    heartbeat_interval: Duration,
    runtime_version: Option<String>,
) -> anyhow::Result<()> {
    let descriptor = builtin_descriptor(provider)
        .ok_or_else(|| anyhow::anyhow!("unknown provider {provider:?}"))?;
    let transformer = TransformerRegistry::builtin().get(provider)?;

    let manager = Arc::new(
        ProviderConfigManager::new(
            Arc::new(KubeRegistryClient::new(client.clone())),
            provider,
            descriptor,
        )
        .with_version(runtime_version.unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()))
        .with_heartbeat_interval(heartbeat_interval),
    );

    manager.register().await?;
    let token = CancellationToken::new();
    let heartbeat = manager.clone().start_heartbeat(token.clone());

    tracing::info!(provider, "Starting Switchyard runtime controller...");
    build_runtime_controller(client, transformer).await;

    tracing::info!(provider, "Runtime controller shutting down");
    token.cancel();
    if let Err(e) = heartbeat.await {
        tracing::warn!(error = %e, "heartbeat task ended abnormally");
    }
    manager.unregister().await?;
    Ok(())
}
