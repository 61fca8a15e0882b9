//! Error types for the operator
//!
//! Vault lookups, path parsing and Secret writes all surface through one
//! error enum so the reconcilers can decide between retry, cooldown and
//! giving up without string matching.

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Malformed vault address
    #[error("invalid item path '{path}': {message}")]
    InvalidPath {
        /// The path as written by the user
        path: String,
        /// What is wrong with it
        message: String,
    },

    /// A vault, item or title lookup matched nothing
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport, auth or rate-limit failure reported by the vault client
    #[error("vault error: {message}")]
    Vault {
        /// Description including the underlying cause
        message: String,
        /// The vault asked us to slow down
        rate_limited: bool,
    },

    /// Secret `.type` is immutable; the existing Secret has a different type
    #[error("cannot change type of secret {namespace}/{name} from '{current}' to '{desired}'")]
    CannotChangeSecretType {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Type currently stored in the cluster
        current: String,
        /// Type requested by the caller
        desired: String,
    },

    /// Invalid user-provided configuration (annotations, flags)
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a vault error
    pub fn vault(msg: impl Into<String>) -> Self {
        Self::Vault {
            message: msg.into(),
            rate_limited: false,
        }
    }

    /// Create a rate-limited vault error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::Vault {
            message: msg.into(),
            rate_limited: true,
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// True when the vault reported rate limiting
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Error::Vault {
                rate_limited: true,
                ..
            }
        )
    }

    /// True for errors that can only be fixed by a human changing something.
    ///
    /// Reconcilers stop requeueing these and wait for the object to change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::InvalidPath { .. } | Error::CannotChangeSecretType { .. } | Error::Validation(_)
        )
    }

    /// True for vault lookups with no match and Kubernetes 404s
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }
}
