//! Common types for Switchyard: CRDs, validation, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod match_context;
pub mod retry;
pub mod telemetry;
pub mod validation;

pub use error::Error;
pub use match_context::MatchContext;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all Switchyard custom resources
pub const API_GROUP: &str = "switchyard.dev";

/// API version string (`group/version`) for Switchyard custom resources
pub const API_VERSION: &str = "switchyard.dev/v1alpha1";

/// Namespace for Switchyard system resources (operator, webhook)
pub const SWITCHYARD_SYSTEM_NAMESPACE: &str = "switchyard-system";

/// Label applied to every child resource produced by a transformer
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] on Switchyard-managed children
pub const MANAGED_BY_VALUE: &str = "switchyard";

/// Label carrying the owning ModelDeployment name on child resources
pub const DEPLOYMENT_LABEL: &str = "switchyard.dev/deployment";

/// Label carrying the provider id on child resources
pub const PROVIDER_LABEL: &str = "switchyard.dev/provider";

/// Default interval between provider heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// A registry entry whose heartbeat is older than this multiple of its
/// heartbeat interval is treated as not ready.
pub const HEARTBEAT_STALENESS_MULTIPLIER: u32 = 3;

/// Base delay for exponential requeue backoff
pub const RETRY_BASE_DELAY_SECS: u64 = 30;

/// Upper bound for exponential requeue backoff
pub const RETRY_MAX_DELAY_SECS: u64 = 300;

/// Compute the exponential requeue delay for the given failure count.
///
/// `30s, 60s, 120s, 240s` and then capped at `300s`. Saturates on large counts.
pub fn backoff_delay_secs(failures: u32) -> u64 {
    std::cmp::min(
        RETRY_BASE_DELAY_SECS.saturating_mul(2u64.saturating_pow(failures)),
        RETRY_MAX_DELAY_SECS,
    )
}
