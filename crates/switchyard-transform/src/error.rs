//! Transformer errors

use thiserror::Error;

/// Errors produced while transforming a deployment
#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    /// The runtime cannot serve this spec at all
    #[error("{provider} cannot serve this deployment: {message}")]
    Infeasible {
        /// Provider id
        provider: String,
        /// Why
        message: String,
    },

    /// The deployment object lacks metadata needed to own children
    #[error("deployment is missing metadata.{field}")]
    MissingMetadata {
        /// Missing field (`name`, `namespace`, `uid`)
        field: &'static str,
    },

    /// Generated content could not be serialized
    #[error("failed to serialize {what}: {message}")]
    Serialization {
        /// What was being serialized
        what: String,
        /// Underlying error
        message: String,
    },

    /// No transformer is registered under this provider id
    #[error("no transformer registered for provider {0}")]
    UnknownProvider(String),
}

impl TransformError {
    /// Build an infeasibility error for `provider`
    pub fn infeasible(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Infeasible {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub(crate) fn serialization(what: impl Into<String>, e: impl std::fmt::Display) -> Self {
        Self::Serialization {
            what: what.into(),
            message: e.to_string(),
        }
    }

    /// Whether retrying without a spec change could succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Infeasible { .. } | Self::UnknownProvider(_))
    }

    /// Convert into the shared error type with deployment and provider context
    pub fn into_error(self, deployment: &str, provider: &str) -> switchyard_common::Error {
        let permanent = self.is_permanent();
        let message = self.to_string();
        if permanent {
            switchyard_common::Error::transform_permanent(deployment, provider, message)
        } else {
            switchyard_common::Error::transform_for(deployment, provider, message)
        }
    }
}
