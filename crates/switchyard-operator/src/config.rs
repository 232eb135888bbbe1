//! Command line and environment configuration
//!
//! Every flag has a `SWITCHYARD_*` environment fallback so the same image
//! runs each mode from its Deployment manifest alone.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use switchyard_common::DEFAULT_HEARTBEAT_INTERVAL_SECS;

/// Switchyard - one ModelDeployment API over many inference runtimes
#[derive(Parser, Debug)]
#[command(name = "switchyard", version, about, long_about = None)]
pub struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Kubeconfig path; in-cluster config or $KUBECONFIG when unset
    #[arg(long, global = true, env = "SWITCHYARD_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json, env = "SWITCHYARD_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand; defaults to `controller`
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable lines
    Text,
}

/// Process mode
#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum Command {
    /// Run the core ModelDeployment controller (default)
    Controller {
        /// Skip installing CRDs at startup
        #[arg(long, env = "SWITCHYARD_SKIP_CRD_INSTALL")]
        skip_crd_install: bool,
    },

    /// Run one provider's runtime controller with its registry heartbeat
    Runtime {
        /// Provider id (`kuberay`, `dynamo`, `kaito`)
        #[arg(long, env = "SWITCHYARD_PROVIDER")]
        provider: String,

        /// Seconds between registry heartbeats
        #[arg(long, default_value_t = DEFAULT_HEARTBEAT_INTERVAL_SECS, env = "SWITCHYARD_HEARTBEAT_INTERVAL_SECS")]
        heartbeat_interval_secs: u64,

        /// Runtime version reported in the registry entry
        #[arg(long, env = "SWITCHYARD_RUNTIME_VERSION")]
        runtime_version: Option<String>,
    },

    /// Serve the validating admission webhook
    Webhook {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:9443", env = "SWITCHYARD_WEBHOOK_ADDR")]
        addr: SocketAddr,

        /// Serving certificate (PEM)
        #[arg(long, default_value = "/etc/switchyard/tls/tls.crt", env = "SWITCHYARD_WEBHOOK_CERT")]
        cert: PathBuf,

        /// Serving key (PEM)
        #[arg(long, default_value = "/etc/switchyard/tls/tls.key", env = "SWITCHYARD_WEBHOOK_KEY")]
        key: PathBuf,
    },
}

impl Cli {
    /// The selected mode, `controller` when none was given
    pub fn mode(&self) -> Command {
        self.command.clone().unwrap_or(Command::Controller {
            skip_crd_install: false,
        })
    }
}
