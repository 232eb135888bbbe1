//! Error types for Switchyard controllers
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries contextual information such as the deployment or
//! provider involved, so a log line alone is enough to locate the problem.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Switchyard operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A Kubernetes API call did not complete within its deadline
    #[error("timed out after {timeout_secs}s during {operation}")]
    Timeout {
        /// The operation that timed out (e.g. "get ModelDeployment")
        operation: String,
        /// Deadline that elapsed
        timeout_secs: u64,
    },

    /// Validation error for a ModelDeployment spec
    #[error("validation error for {deployment}: {message}")]
    Validation {
        /// Name of the deployment with invalid configuration
        deployment: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.scaling.decode")
        field: Option<String>,
    },

    /// Provider selection could not be completed
    #[error("selection error for {deployment}: {message}")]
    Selection {
        /// Name of the deployment being placed
        deployment: String,
        /// Description of what failed
        message: String,
    },

    /// A transformer could not produce child resources
    #[error("transform error [{provider}] for {deployment}: {message}")]
    Transform {
        /// Name of the deployment being transformed
        deployment: String,
        /// Provider id of the transformer
        provider: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "heartbeat")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            deployment: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with deployment context and field path
    pub fn validation_for_field(
        deployment: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            deployment: deployment.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a selection error with deployment context
    pub fn selection_for(deployment: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Selection {
            deployment: deployment.into(),
            message: msg.into(),
        }
    }

    /// Create a retryable transform error
    pub fn transform_for(
        deployment: impl Into<String>,
        provider: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Transform {
            deployment: deployment.into(),
            provider: provider.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable transform error (runtime cannot satisfy the spec)
    pub fn transform_permanent(
        deployment: impl Into<String>,
        provider: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Transform {
            deployment: deployment.into(),
            provider: provider.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation errors require a spec change and are never retried.
    /// Serialization errors indicate a code bug but are still requeued so the
    /// failure stays loud in logs instead of silently stopping.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // 4xx other than conflict/throttling will not fix themselves
                !matches!(
                    source,
                    kube::Error::Api(ae)
                        if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
                )
            }
            Error::Timeout { .. } => true,
            Error::Validation { .. } => false,
            Error::Selection { .. } => true,
            Error::Transform { retryable, .. } => *retryable,
            Error::Serialization { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the deployment name if this error is associated with one
    pub fn deployment(&self) -> Option<&str> {
        match self {
            Error::Validation { deployment, .. }
            | Error::Selection { deployment, .. }
            | Error::Transform { deployment, .. } => Some(deployment),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
