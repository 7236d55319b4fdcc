//! Error types for the selenosis operator
//!
//! Errors carry enough context (resource names, attempt counts) to be
//! useful in a JSON log line without a stack trace.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for selenosis operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid resource content
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the offending resource
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Optimistic update kept losing to concurrent writers
    #[error("conflict updating {resource}: gave up after {attempts} attempts")]
    Conflict {
        /// Name of the resource being updated
        resource: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "store", "startup")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error naming the resource
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an optimistic-retry exhaustion error
    pub fn conflict(resource: impl Into<String>, attempts: u32) -> Self {
        Self::Conflict {
            resource: resource.into(),
            attempts,
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

    /// Whether requeueing the reconcile can fix this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube { .. } | Self::Conflict { .. } | Self::Internal { .. } => true,
            Self::Validation { .. } | Self::Serialization { .. } => false,
        }
    }

    /// Whether this wraps a Kubernetes 409 (stale resourceVersion)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Whether this wraps a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Whether a create failed because the object is already there
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(ae) } if ae.reason == "AlreadyExists")
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
