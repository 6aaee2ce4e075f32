//! Error types for connector provisioning
//!
//! Errors carry the step that failed and keep the underlying cause reachable
//! through [`std::error::Error::source`], so a control loop can decide whether
//! to requeue and an operator can see exactly what broke.

use thiserror::Error;

use crate::credentials::CredentialError;

/// Main error type for connector provisioning
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or contradictory configuration supplied by the operator
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's invalid
        message: String,
        /// The offending setting (e.g., "CLOUDFLARED_REPLICA_COUNT")
        field: Option<String>,
    },

    /// Failure talking to the Kubernetes API while listing or creating the connector
    #[error("{context}: {source}")]
    Infrastructure {
        /// Step that failed
        context: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Failure obtaining a tunnel credential from the tunnel service
    #[error("{context}: {source}")]
    Upstream {
        /// Step that failed
        context: String,
        /// The underlying credential source error
        #[source]
        source: CredentialError,
    },

    /// The caller cancelled provisioning while a step was in flight
    #[error("cancelled during {step}")]
    Cancelled {
        /// Step that was interrupted
        step: String,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a specific setting
    pub fn configuration_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Wrap a Kubernetes API failure with the step it happened in
    pub fn infrastructure(context: impl Into<String>, source: kube::Error) -> Self {
        Self::Infrastructure {
            context: context.into(),
            source,
        }
    }

    /// Wrap a credential source failure with the step it happened in
    pub fn upstream(context: impl Into<String>, source: CredentialError) -> Self {
        Self::Upstream {
            context: context.into(),
            source,
        }
    }

    /// Create a cancellation error for the given step
    pub fn cancelled(step: impl Into<String>) -> Self {
        Self::Cancelled { step: step.into() }
    }

    /// Check if re-invoking provisioning may succeed
    ///
    /// Configuration errors need an operator fix and cancellation is a caller
    /// decision, so neither is retried. API and credential failures are treated
    /// as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Configuration { .. } => false,
            Error::Infrastructure { .. } => true,
            Error::Upstream { .. } => true,
            Error::Cancelled { .. } => false,
        }
    }

    /// Get the offending setting if this is a configuration error that names one
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Configuration { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}
